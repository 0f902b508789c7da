//! 2D canvas on both sides of the bridge.
//!
//! [`CanvasContext`] lives in the logic realm and records calls into a queue
//! that is flushed once per rendering turn. [`CanvasState`] lives in the
//! render realm and replays those queues against a drawing state. Both keep
//! a LIFO save stack so that `restore` undoes exactly what the matching
//! `save` captured.

use std::collections::HashMap;

use pocket_protocol::{
    CanvasBatch, CanvasOp, Gradient, GradientGeometry, ImageDraw, PaintStyle, Pattern, Transform,
};

/// The part of the drawing state the logic side tracks itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub transform: Transform,
    pub global_alpha: f64,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Transform::IDENTITY,
            global_alpha: 1.0,
        }
    }
}

/// Logic-side recorder for one canvas surface.
#[derive(Debug)]
pub struct CanvasContext {
    canvas_id: String,
    ops: Vec<CanvasOp>,
    state: DrawState,
    saved: Vec<DrawState>,
}

impl CanvasContext {
    pub fn new(canvas_id: impl Into<String>) -> Self {
        Self {
            canvas_id: canvas_id.into(),
            ops: Vec::new(),
            state: DrawState::default(),
            saved: Vec::new(),
        }
    }

    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    pub fn state(&self) -> DrawState {
        self.state
    }

    /// Depth of the save stack.
    pub fn save_depth(&self) -> usize {
        self.saved.len()
    }

    pub fn pending(&self) -> &[CanvasOp] {
        &self.ops
    }

    fn record(&mut self, op: CanvasOp) {
        self.ops.push(op);
    }

    pub fn create_linear_gradient(&self, x0: f64, y0: f64, x1: f64, y1: f64) -> Gradient {
        Gradient::new(GradientGeometry::Linear { x0, y0, x1, y1 })
    }

    pub fn create_radial_gradient(
        &self,
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
    ) -> Gradient {
        Gradient::new(GradientGeometry::Radial {
            x0,
            y0,
            r0,
            x1,
            y1,
            r1,
        })
    }

    pub fn create_circular_gradient(&self, x: f64, y: f64, r: f64) -> Gradient {
        Gradient::new(GradientGeometry::Circular { x, y, r })
    }

    pub fn create_pattern(
        &self,
        image: impl Into<String>,
        repetition: impl Into<String>,
    ) -> Pattern {
        Pattern {
            image: image.into(),
            repetition: repetition.into(),
        }
    }

    pub fn set_fill_style(&mut self, style: impl Into<PaintStyle>) {
        self.record(CanvasOp::SetFillStyle(style.into()));
    }

    pub fn set_stroke_style(&mut self, style: impl Into<PaintStyle>) {
        self.record(CanvasOp::SetStrokeStyle(style.into()));
    }

    pub fn set_line_width(&mut self, width: f64) {
        self.record(CanvasOp::SetLineWidth(width));
    }

    pub fn set_line_cap(&mut self, cap: impl Into<String>) {
        self.record(CanvasOp::SetLineCap(cap.into()));
    }

    pub fn set_line_join(&mut self, join: impl Into<String>) {
        self.record(CanvasOp::SetLineJoin(join.into()));
    }

    pub fn set_miter_limit(&mut self, limit: f64) {
        self.record(CanvasOp::SetMiterLimit(limit));
    }

    pub fn set_line_dash(&mut self, pattern: Vec<f64>, offset: f64) {
        self.record(CanvasOp::SetLineDash { pattern, offset });
    }

    pub fn set_shadow(
        &mut self,
        offset_x: f64,
        offset_y: f64,
        blur: f64,
        color: impl Into<String>,
    ) {
        self.record(CanvasOp::SetShadow {
            offset_x,
            offset_y,
            blur,
            color: color.into(),
        });
    }

    pub fn set_global_alpha(&mut self, alpha: f64) {
        let alpha = alpha.clamp(0.0, 1.0);
        self.state.global_alpha = alpha;
        self.record(CanvasOp::SetGlobalAlpha(alpha));
    }

    pub fn set_font(&mut self, font: impl Into<String>) {
        self.record(CanvasOp::SetFont(font.into()));
    }

    pub fn set_text_align(&mut self, align: impl Into<String>) {
        self.record(CanvasOp::SetTextAlign(align.into()));
    }

    pub fn set_text_baseline(&mut self, baseline: impl Into<String>) {
        self.record(CanvasOp::SetTextBaseline(baseline.into()));
    }

    pub fn set_global_composite_operation(&mut self, op: impl Into<String>) {
        self.record(CanvasOp::SetCompositeOperation(op.into()));
    }

    pub fn save(&mut self) {
        self.saved.push(self.state);
        self.record(CanvasOp::Save);
    }

    /// Pop the most recent unmatched `save`. Without one this is a no-op
    /// and nothing is recorded.
    pub fn restore(&mut self) {
        match self.saved.pop() {
            Some(state) => {
                self.state = state;
                self.record(CanvasOp::Restore);
            }
            None => tracing::debug!(canvas = %self.canvas_id, "restore without save ignored"),
        }
    }

    pub fn translate(&mut self, x: f64, y: f64) {
        self.state.transform = self.state.transform.multiply(&Transform::translation(x, y));
        self.record(CanvasOp::Translate(x, y));
    }

    pub fn rotate(&mut self, angle: f64) {
        self.state.transform = self.state.transform.multiply(&Transform::rotation(angle));
        self.record(CanvasOp::Rotate(angle));
    }

    pub fn scale(&mut self, x: f64, y: f64) {
        self.state.transform = self.state.transform.multiply(&Transform::scaling(x, y));
        self.record(CanvasOp::Scale(x, y));
    }

    pub fn transform(&mut self, m: Transform) {
        self.state.transform = self.state.transform.multiply(&m);
        self.record(CanvasOp::Transform(m));
    }

    pub fn set_transform(&mut self, m: Transform) {
        self.state.transform = m;
        self.record(CanvasOp::SetTransform(m));
    }

    pub fn begin_path(&mut self) {
        self.record(CanvasOp::BeginPath);
    }

    pub fn close_path(&mut self) {
        self.record(CanvasOp::ClosePath);
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.record(CanvasOp::MoveTo(x, y));
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        self.record(CanvasOp::LineTo(x, y));
    }

    pub fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64, ccw: bool) {
        self.record(CanvasOp::Arc {
            x,
            y,
            radius,
            start,
            end,
            counter_clockwise: ccw,
        });
    }

    pub fn arc_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, radius: f64) {
        self.record(CanvasOp::ArcTo {
            x1,
            y1,
            x2,
            y2,
            radius,
        });
    }

    pub fn bezier_curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64) {
        self.record(CanvasOp::BezierCurveTo([cp1x, cp1y, cp2x, cp2y, x, y]));
    }

    pub fn quadratic_curve_to(&mut self, cpx: f64, cpy: f64, x: f64, y: f64) {
        self.record(CanvasOp::QuadraticCurveTo([cpx, cpy, x, y]));
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        self.record(CanvasOp::Rect([x, y, w, h]));
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        self.record(CanvasOp::FillRect([x, y, w, h]));
    }

    pub fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        self.record(CanvasOp::StrokeRect([x, y, w, h]));
    }

    pub fn clear_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        self.record(CanvasOp::ClearRect([x, y, w, h]));
    }

    pub fn fill(&mut self) {
        self.record(CanvasOp::Fill);
    }

    pub fn stroke(&mut self) {
        self.record(CanvasOp::Stroke);
    }

    pub fn clip(&mut self) {
        self.record(CanvasOp::Clip);
    }

    pub fn fill_text(&mut self, text: impl Into<String>, x: f64, y: f64, max_width: Option<f64>) {
        self.record(CanvasOp::FillText {
            text: text.into(),
            x,
            y,
            max_width,
        });
    }

    pub fn stroke_text(&mut self, text: impl Into<String>, x: f64, y: f64, max_width: Option<f64>) {
        self.record(CanvasOp::StrokeText {
            text: text.into(),
            x,
            y,
            max_width,
        });
    }

    pub fn draw_image(&mut self, draw: ImageDraw) {
        self.record(CanvasOp::DrawImage(draw));
    }

    /// End the rendering turn: everything recorded since the last flush, in
    /// call order, or `None` if nothing was recorded.
    pub fn flush(&mut self) -> Option<CanvasBatch> {
        if self.ops.is_empty() {
            return None;
        }
        Some(CanvasBatch {
            canvas_id: self.canvas_id.clone(),
            ops: std::mem::take(&mut self.ops),
        })
    }
}

/// Full drawing state replayed on the render side.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintState {
    pub transform: Transform,
    pub global_alpha: f64,
    pub fill_style: PaintStyle,
    pub stroke_style: PaintStyle,
    pub line_width: f64,
    pub line_cap: String,
    pub line_join: String,
    pub miter_limit: f64,
    pub line_dash: Vec<f64>,
    pub line_dash_offset: f64,
    pub shadow: (f64, f64, f64, String),
    pub font: String,
    pub text_align: String,
    pub text_baseline: String,
    pub composite_operation: String,
}

impl Default for PaintState {
    fn default() -> Self {
        Self {
            transform: Transform::IDENTITY,
            global_alpha: 1.0,
            fill_style: PaintStyle::Color("#000000".into()),
            stroke_style: PaintStyle::Color("#000000".into()),
            line_width: 1.0,
            line_cap: "butt".into(),
            line_join: "miter".into(),
            miter_limit: 10.0,
            line_dash: Vec::new(),
            line_dash_offset: 0.0,
            shadow: (0.0, 0.0, 0.0, "rgba(0,0,0,0)".into()),
            font: "10px sans-serif".into(),
            text_align: "start".into(),
            text_baseline: "alphabetic".into(),
            composite_operation: "source-over".into(),
        }
    }
}

/// A drawing call together with the transform and alpha it ran under.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub op: CanvasOp,
    pub transform: Transform,
    pub global_alpha: f64,
}

/// Render-side replay target for one canvas surface.
#[derive(Debug, Default)]
pub struct CanvasState {
    state: PaintState,
    saved: Vec<PaintState>,
    commands: Vec<DrawCommand>,
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PaintState {
        &self.state
    }

    /// Draw calls of the most recently applied batch.
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn save_depth(&self) -> usize {
        self.saved.len()
    }

    /// Replay one flushed batch, in order. Paint state carries over from
    /// earlier batches; their draw calls do not.
    pub fn apply(&mut self, batch: &CanvasBatch) {
        self.commands.clear();
        for op in &batch.ops {
            self.apply_op(op);
        }
    }

    pub fn apply_op(&mut self, op: &CanvasOp) {
        use CanvasOp as C;
        let s = &mut self.state;
        match op {
            C::SetFillStyle(style) => s.fill_style = style.clone(),
            C::SetStrokeStyle(style) => s.stroke_style = style.clone(),
            C::SetLineWidth(w) => s.line_width = *w,
            C::SetLineCap(v) => s.line_cap = v.clone(),
            C::SetLineJoin(v) => s.line_join = v.clone(),
            C::SetMiterLimit(v) => s.miter_limit = *v,
            C::SetLineDash { pattern, offset } => {
                s.line_dash = pattern.clone();
                s.line_dash_offset = *offset;
            }
            C::SetShadow {
                offset_x,
                offset_y,
                blur,
                color,
            } => s.shadow = (*offset_x, *offset_y, *blur, color.clone()),
            C::SetGlobalAlpha(a) => s.global_alpha = a.clamp(0.0, 1.0),
            C::SetFont(v) => s.font = v.clone(),
            C::SetTextAlign(v) => s.text_align = v.clone(),
            C::SetTextBaseline(v) => s.text_baseline = v.clone(),
            C::SetCompositeOperation(v) => s.composite_operation = v.clone(),
            C::Save => {
                let snapshot = s.clone();
                self.saved.push(snapshot);
            }
            C::Restore => {
                if let Some(previous) = self.saved.pop() {
                    self.state = previous;
                }
            }
            C::Translate(x, y) => {
                s.transform = s.transform.multiply(&Transform::translation(*x, *y))
            }
            C::Rotate(angle) => s.transform = s.transform.multiply(&Transform::rotation(*angle)),
            C::Scale(x, y) => s.transform = s.transform.multiply(&Transform::scaling(*x, *y)),
            C::Transform(m) => s.transform = s.transform.multiply(m),
            C::SetTransform(m) => s.transform = *m,
            draw => {
                let command = DrawCommand {
                    op: draw.clone(),
                    transform: s.transform,
                    global_alpha: s.global_alpha,
                };
                self.commands.push(command);
            }
        }
    }
}

/// All canvas surfaces of one page, keyed by canvas id.
#[derive(Debug, Default)]
pub struct CanvasHost {
    canvases: HashMap<String, CanvasState>,
}

impl CanvasHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a batch to its canvas, creating the canvas on first use.
    pub fn apply(&mut self, batch: &CanvasBatch) {
        self.canvases
            .entry(batch.canvas_id.clone())
            .or_default()
            .apply(batch);
    }

    pub fn get(&self, canvas_id: &str) -> Option<&CanvasState> {
        self.canvases.get(canvas_id)
    }

    pub fn remove(&mut self, canvas_id: &str) -> Option<CanvasState> {
        self.canvases.remove(canvas_id)
    }
}
