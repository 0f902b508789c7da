//! The 2D canvas instruction stream.
//!
//! Each state mutation and drawing call is one `[opcode, ...args]` tuple. A
//! [`CanvasBatch`] holds one rendering turn's worth of tuples for one canvas
//! surface, in call order.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::{ProtocolError, Result};
use crate::wire::{split_tuple, Fields};

/// Upper bound on the color stops carried by one gradient.
pub const MAX_COLOR_STOPS: usize = 8;

/// A 2D affine transform `[a, b, c, d, e, f]`, as in the canvas API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform(pub [f64; 6]);

impl Transform {
    pub const IDENTITY: Transform = Transform([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// `self * other`: apply `other` first, then `self`.
    pub fn multiply(&self, other: &Transform) -> Transform {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Transform([
            a1 * a2 + c1 * b2,
            b1 * a2 + d1 * b2,
            a1 * c2 + c1 * d2,
            b1 * c2 + d1 * d2,
            a1 * e2 + c1 * f2 + e1,
            b1 * e2 + d1 * f2 + f1,
        ])
    }

    pub fn translation(x: f64, y: f64) -> Transform {
        Transform([1.0, 0.0, 0.0, 1.0, x, y])
    }

    pub fn scaling(x: f64, y: f64) -> Transform {
        Transform([x, 0.0, 0.0, y, 0.0, 0.0])
    }

    pub fn rotation(angle: f64) -> Transform {
        let (sin, cos) = angle.sin_cos();
        Transform([cos, sin, -sin, cos, 0.0, 0.0])
    }

    /// Map a point through the transform.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

/// Geometry of a gradient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GradientGeometry {
    Linear {
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
    },
    Radial {
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
    },
    /// A radial gradient centred on one point, starting at radius zero.
    Circular { x: f64, y: f64, r: f64 },
}

/// `[offset, color]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop(pub f64, pub String);

/// A gradient expanded into geometry plus its ordered color stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    #[serde(flatten)]
    pub geometry: GradientGeometry,
    pub stops: Vec<ColorStop>,
}

impl Gradient {
    pub fn new(geometry: GradientGeometry) -> Self {
        Self {
            geometry,
            stops: Vec::new(),
        }
    }

    /// Append a stop, clamping `offset` into `0..=1`. Returns `false` for a
    /// non-finite offset or once [`MAX_COLOR_STOPS`] is reached.
    pub fn add_color_stop(&mut self, offset: f64, color: impl Into<String>) -> bool {
        if !offset.is_finite() {
            tracing::warn!(offset, "gradient color stop ignored, offset is not finite");
            return false;
        }
        if self.stops.len() >= MAX_COLOR_STOPS {
            tracing::warn!(
                max = MAX_COLOR_STOPS,
                "gradient color stop ignored, stop list is full"
            );
            return false;
        }
        self.stops.push(ColorStop(offset.clamp(0.0, 1.0), color.into()));
        true
    }
}

/// An image pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub image: String,
    /// `repeat`, `repeat-x`, `repeat-y` or `no-repeat`.
    pub repetition: String,
}

/// A fill or stroke style. A plain color travels as a bare string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaintStyle {
    Color(String),
    Gradient(Gradient),
    Pattern(Pattern),
}

impl From<&str> for PaintStyle {
    fn from(color: &str) -> Self {
        PaintStyle::Color(color.to_string())
    }
}

impl From<Gradient> for PaintStyle {
    fn from(g: Gradient) -> Self {
        PaintStyle::Gradient(g)
    }
}

impl From<Pattern> for PaintStyle {
    fn from(p: Pattern) -> Self {
        PaintStyle::Pattern(p)
    }
}

/// Stable canvas opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    SetFillStyle = 0,
    SetStrokeStyle = 1,
    SetLineWidth = 2,
    SetLineCap = 3,
    SetLineJoin = 4,
    SetMiterLimit = 5,
    SetLineDash = 6,
    SetShadow = 7,
    SetGlobalAlpha = 8,
    SetFont = 9,
    SetTextAlign = 10,
    SetTextBaseline = 11,
    Save = 12,
    Restore = 13,
    Translate = 14,
    Rotate = 15,
    Scale = 16,
    Transform = 17,
    SetTransform = 18,
    BeginPath = 19,
    ClosePath = 20,
    MoveTo = 21,
    LineTo = 22,
    Arc = 23,
    ArcTo = 24,
    BezierCurveTo = 25,
    QuadraticCurveTo = 26,
    Rect = 27,
    FillRect = 28,
    StrokeRect = 29,
    ClearRect = 30,
    Fill = 31,
    Stroke = 32,
    Clip = 33,
    FillText = 34,
    StrokeText = 35,
    DrawImage = 36,
    SetCompositeOperation = 37,
}

impl Opcode {
    const ALL: [Opcode; 38] = [
        Opcode::SetFillStyle,
        Opcode::SetStrokeStyle,
        Opcode::SetLineWidth,
        Opcode::SetLineCap,
        Opcode::SetLineJoin,
        Opcode::SetMiterLimit,
        Opcode::SetLineDash,
        Opcode::SetShadow,
        Opcode::SetGlobalAlpha,
        Opcode::SetFont,
        Opcode::SetTextAlign,
        Opcode::SetTextBaseline,
        Opcode::Save,
        Opcode::Restore,
        Opcode::Translate,
        Opcode::Rotate,
        Opcode::Scale,
        Opcode::Transform,
        Opcode::SetTransform,
        Opcode::BeginPath,
        Opcode::ClosePath,
        Opcode::MoveTo,
        Opcode::LineTo,
        Opcode::Arc,
        Opcode::ArcTo,
        Opcode::BezierCurveTo,
        Opcode::QuadraticCurveTo,
        Opcode::Rect,
        Opcode::FillRect,
        Opcode::StrokeRect,
        Opcode::ClearRect,
        Opcode::Fill,
        Opcode::Stroke,
        Opcode::Clip,
        Opcode::FillText,
        Opcode::StrokeText,
        Opcode::DrawImage,
        Opcode::SetCompositeOperation,
    ];

    pub fn from_i64(code: i64) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }
}

/// Where and how large an image is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDraw {
    pub src: String,
    pub dx: f64,
    pub dy: f64,
    /// Destination size; natural size when absent.
    pub size: Option<(f64, f64)>,
    /// Source sub-rectangle `[sx, sy, sw, sh]`.
    pub source: Option<[f64; 4]>,
}

/// One canvas call.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasOp {
    SetFillStyle(PaintStyle),
    SetStrokeStyle(PaintStyle),
    SetLineWidth(f64),
    SetLineCap(String),
    SetLineJoin(String),
    SetMiterLimit(f64),
    SetLineDash { pattern: Vec<f64>, offset: f64 },
    SetShadow {
        offset_x: f64,
        offset_y: f64,
        blur: f64,
        color: String,
    },
    SetGlobalAlpha(f64),
    SetFont(String),
    SetTextAlign(String),
    SetTextBaseline(String),
    Save,
    Restore,
    Translate(f64, f64),
    Rotate(f64),
    Scale(f64, f64),
    Transform(Transform),
    SetTransform(Transform),
    BeginPath,
    ClosePath,
    MoveTo(f64, f64),
    LineTo(f64, f64),
    Arc {
        x: f64,
        y: f64,
        radius: f64,
        start: f64,
        end: f64,
        counter_clockwise: bool,
    },
    ArcTo {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        radius: f64,
    },
    BezierCurveTo([f64; 6]),
    QuadraticCurveTo([f64; 4]),
    Rect([f64; 4]),
    FillRect([f64; 4]),
    StrokeRect([f64; 4]),
    ClearRect([f64; 4]),
    Fill,
    Stroke,
    Clip,
    FillText {
        text: String,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    },
    StrokeText {
        text: String,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    },
    DrawImage(ImageDraw),
    SetCompositeOperation(String),
}

impl CanvasOp {
    pub fn opcode(&self) -> Opcode {
        use CanvasOp as C;
        match self {
            C::SetFillStyle(_) => Opcode::SetFillStyle,
            C::SetStrokeStyle(_) => Opcode::SetStrokeStyle,
            C::SetLineWidth(_) => Opcode::SetLineWidth,
            C::SetLineCap(_) => Opcode::SetLineCap,
            C::SetLineJoin(_) => Opcode::SetLineJoin,
            C::SetMiterLimit(_) => Opcode::SetMiterLimit,
            C::SetLineDash { .. } => Opcode::SetLineDash,
            C::SetShadow { .. } => Opcode::SetShadow,
            C::SetGlobalAlpha(_) => Opcode::SetGlobalAlpha,
            C::SetFont(_) => Opcode::SetFont,
            C::SetTextAlign(_) => Opcode::SetTextAlign,
            C::SetTextBaseline(_) => Opcode::SetTextBaseline,
            C::Save => Opcode::Save,
            C::Restore => Opcode::Restore,
            C::Translate(..) => Opcode::Translate,
            C::Rotate(_) => Opcode::Rotate,
            C::Scale(..) => Opcode::Scale,
            C::Transform(_) => Opcode::Transform,
            C::SetTransform(_) => Opcode::SetTransform,
            C::BeginPath => Opcode::BeginPath,
            C::ClosePath => Opcode::ClosePath,
            C::MoveTo(..) => Opcode::MoveTo,
            C::LineTo(..) => Opcode::LineTo,
            C::Arc { .. } => Opcode::Arc,
            C::ArcTo { .. } => Opcode::ArcTo,
            C::BezierCurveTo(_) => Opcode::BezierCurveTo,
            C::QuadraticCurveTo(_) => Opcode::QuadraticCurveTo,
            C::Rect(_) => Opcode::Rect,
            C::FillRect(_) => Opcode::FillRect,
            C::StrokeRect(_) => Opcode::StrokeRect,
            C::ClearRect(_) => Opcode::ClearRect,
            C::Fill => Opcode::Fill,
            C::Stroke => Opcode::Stroke,
            C::Clip => Opcode::Clip,
            C::FillText { .. } => Opcode::FillText,
            C::StrokeText { .. } => Opcode::StrokeText,
            C::DrawImage(_) => Opcode::DrawImage,
            C::SetCompositeOperation(_) => Opcode::SetCompositeOperation,
        }
    }

    /// Encode as an `[opcode, ...args]` tuple.
    pub fn to_wire(&self) -> Value {
        use CanvasOp as C;
        let op = self.opcode() as u8;
        match self {
            C::SetFillStyle(style) | C::SetStrokeStyle(style) => json!([op, style]),
            C::SetLineWidth(n) | C::SetMiterLimit(n) | C::SetGlobalAlpha(n) | C::Rotate(n) => {
                json!([op, n])
            }
            C::SetLineCap(s)
            | C::SetLineJoin(s)
            | C::SetFont(s)
            | C::SetTextAlign(s)
            | C::SetTextBaseline(s)
            | C::SetCompositeOperation(s) => json!([op, s]),
            C::SetLineDash { pattern, offset } => json!([op, pattern, offset]),
            C::SetShadow {
                offset_x,
                offset_y,
                blur,
                color,
            } => json!([op, offset_x, offset_y, blur, color]),
            C::Save | C::Restore | C::BeginPath | C::ClosePath | C::Fill | C::Stroke | C::Clip => {
                json!([op])
            }
            C::Translate(x, y) | C::Scale(x, y) | C::MoveTo(x, y) | C::LineTo(x, y) => {
                json!([op, x, y])
            }
            C::Transform(t) | C::SetTransform(t) => {
                let [a, b, c, d, e, f] = t.0;
                json!([op, a, b, c, d, e, f])
            }
            C::Arc {
                x,
                y,
                radius,
                start,
                end,
                counter_clockwise,
            } => json!([op, x, y, radius, start, end, counter_clockwise]),
            C::ArcTo {
                x1,
                y1,
                x2,
                y2,
                radius,
            } => json!([op, x1, y1, x2, y2, radius]),
            C::BezierCurveTo(p) => json!([op, p[0], p[1], p[2], p[3], p[4], p[5]]),
            C::QuadraticCurveTo(p)
            | C::Rect(p)
            | C::FillRect(p)
            | C::StrokeRect(p)
            | C::ClearRect(p) => json!([op, p[0], p[1], p[2], p[3]]),
            C::FillText {
                text,
                x,
                y,
                max_width,
            }
            | C::StrokeText {
                text,
                x,
                y,
                max_width,
            } => json!([op, text, x, y, max_width]),
            C::DrawImage(draw) => {
                let (dw, dh) = match draw.size {
                    Some((w, h)) => (json!(w), json!(h)),
                    None => (Value::Null, Value::Null),
                };
                json!([op, draw.src, draw.dx, draw.dy, dw, dh, draw.source])
            }
        }
    }

    /// Decode an `[opcode, ...args]` tuple.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let (code, items) = split_tuple("canvas op", value)?;
        let opcode = Opcode::from_i64(code).ok_or(ProtocolError::UnknownTag {
            kind: "canvas",
            tag: code,
        })?;
        let f = Fields::new("canvas op", items);
        use CanvasOp as C;
        Ok(match opcode {
            Opcode::SetFillStyle => C::SetFillStyle(decode_style(&f)?),
            Opcode::SetStrokeStyle => C::SetStrokeStyle(decode_style(&f)?),
            Opcode::SetLineWidth => C::SetLineWidth(f.f64(0)?),
            Opcode::SetLineCap => C::SetLineCap(f.string(0)?),
            Opcode::SetLineJoin => C::SetLineJoin(f.string(0)?),
            Opcode::SetMiterLimit => C::SetMiterLimit(f.f64(0)?),
            Opcode::SetLineDash => C::SetLineDash {
                pattern: f.decode(0)?,
                offset: f.optional(1).and_then(Value::as_f64).unwrap_or(0.0),
            },
            Opcode::SetShadow => C::SetShadow {
                offset_x: f.f64(0)?,
                offset_y: f.f64(1)?,
                blur: f.f64(2)?,
                color: f.string(3)?,
            },
            Opcode::SetGlobalAlpha => C::SetGlobalAlpha(f.f64(0)?),
            Opcode::SetFont => C::SetFont(f.string(0)?),
            Opcode::SetTextAlign => C::SetTextAlign(f.string(0)?),
            Opcode::SetTextBaseline => C::SetTextBaseline(f.string(0)?),
            Opcode::Save => C::Save,
            Opcode::Restore => C::Restore,
            Opcode::Translate => C::Translate(f.f64(0)?, f.f64(1)?),
            Opcode::Rotate => C::Rotate(f.f64(0)?),
            Opcode::Scale => C::Scale(f.f64(0)?, f.f64(1)?),
            Opcode::Transform => C::Transform(Transform(f.numbers::<6>()?)),
            Opcode::SetTransform => C::SetTransform(Transform(f.numbers::<6>()?)),
            Opcode::BeginPath => C::BeginPath,
            Opcode::ClosePath => C::ClosePath,
            Opcode::MoveTo => C::MoveTo(f.f64(0)?, f.f64(1)?),
            Opcode::LineTo => C::LineTo(f.f64(0)?, f.f64(1)?),
            Opcode::Arc => C::Arc {
                x: f.f64(0)?,
                y: f.f64(1)?,
                radius: f.f64(2)?,
                start: f.f64(3)?,
                end: f.f64(4)?,
                counter_clockwise: f.optional(5).and_then(Value::as_bool).unwrap_or(false),
            },
            Opcode::ArcTo => {
                let [x1, y1, x2, y2, radius] = f.numbers::<5>()?;
                C::ArcTo {
                    x1,
                    y1,
                    x2,
                    y2,
                    radius,
                }
            }
            Opcode::BezierCurveTo => C::BezierCurveTo(f.numbers::<6>()?),
            Opcode::QuadraticCurveTo => C::QuadraticCurveTo(f.numbers::<4>()?),
            Opcode::Rect => C::Rect(f.numbers::<4>()?),
            Opcode::FillRect => C::FillRect(f.numbers::<4>()?),
            Opcode::StrokeRect => C::StrokeRect(f.numbers::<4>()?),
            Opcode::ClearRect => C::ClearRect(f.numbers::<4>()?),
            Opcode::Fill => C::Fill,
            Opcode::Stroke => C::Stroke,
            Opcode::Clip => C::Clip,
            Opcode::FillText => C::FillText {
                text: f.string(0)?,
                x: f.f64(1)?,
                y: f.f64(2)?,
                max_width: f.optional(3).and_then(Value::as_f64),
            },
            Opcode::StrokeText => C::StrokeText {
                text: f.string(0)?,
                x: f.f64(1)?,
                y: f.f64(2)?,
                max_width: f.optional(3).and_then(Value::as_f64),
            },
            Opcode::DrawImage => {
                let size = match (f.optional(3), f.optional(4)) {
                    (Some(_), Some(_)) => Some((f.f64(3)?, f.f64(4)?)),
                    _ => None,
                };
                C::DrawImage(ImageDraw {
                    src: f.string(0)?,
                    dx: f.f64(1)?,
                    dy: f.f64(2)?,
                    size,
                    source: f.opt_decode(5)?,
                })
            }
            Opcode::SetCompositeOperation => C::SetCompositeOperation(f.string(0)?),
        })
    }
}

fn decode_style(f: &Fields<'_>) -> Result<PaintStyle> {
    let style: PaintStyle = f.decode(0)?;
    if let PaintStyle::Gradient(g) = &style {
        if g.stops.len() > MAX_COLOR_STOPS {
            return Err(ProtocolError::Field {
                instruction: "canvas op",
                index: 0,
                message: format!(
                    "gradient carries {} color stops, at most {} allowed",
                    g.stops.len(),
                    MAX_COLOR_STOPS
                ),
            });
        }
        if let Some(ColorStop(offset, _)) = g.stops.iter().find(|s| !(0.0..=1.0).contains(&s.0)) {
            return Err(ProtocolError::Field {
                instruction: "canvas op",
                index: 0,
                message: format!("color stop offset {} is outside 0..=1", offset),
            });
        }
    }
    Ok(style)
}

impl Serialize for CanvasOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CanvasOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        CanvasOp::from_wire(&value).map_err(D::Error::custom)
    }
}

/// One rendering turn of canvas calls for one canvas surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasBatch {
    pub canvas_id: String,
    pub ops: Vec<CanvasOp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_matches_discriminants() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
        assert_eq!(Opcode::from_i64(38), None);
        assert_eq!(Opcode::from_i64(-1), None);
    }

    #[test]
    fn transform_composition() {
        let t = Transform::translation(10.0, 5.0).multiply(&Transform::scaling(2.0, 2.0));
        assert_eq!(t.apply(1.0, 1.0), (12.0, 7.0));
        assert_eq!(
            Transform::IDENTITY.multiply(&Transform::translation(3.0, 4.0)),
            Transform::translation(3.0, 4.0)
        );
    }

    #[test]
    fn gradient_style_is_one_instruction() {
        let mut g = Gradient::new(GradientGeometry::Linear {
            x0: 0.0,
            y0: 0.0,
            x1: 100.0,
            y1: 0.0,
        });
        g.add_color_stop(0.0, "red");
        g.add_color_stop(1.0, "blue");
        let op = CanvasOp::SetFillStyle(g.into());
        let wire = op.to_wire();
        assert_eq!(wire[0], 0);
        assert_eq!(wire[1]["type"], "linear");
        assert_eq!(wire[1]["stops"], json!([[0.0, "red"], [1.0, "blue"]]));
        assert_eq!(CanvasOp::from_wire(&wire).unwrap(), op);
    }

    #[test]
    fn color_style_is_bare_string() {
        let op = CanvasOp::SetStrokeStyle("#fff".into());
        assert_eq!(op.to_wire(), json!([1, "#fff"]));
    }

    #[test]
    fn pattern_style_decodes() {
        let op = CanvasOp::from_wire(&json!([0, {"image": "a.png", "repetition": "repeat-x"}]))
            .unwrap();
        assert_eq!(
            op,
            CanvasOp::SetFillStyle(PaintStyle::Pattern(Pattern {
                image: "a.png".into(),
                repetition: "repeat-x".into()
            }))
        );
    }

    #[test]
    fn color_stops_are_capped() {
        let mut g = Gradient::new(GradientGeometry::Circular {
            x: 0.0,
            y: 0.0,
            r: 10.0,
        });
        for i in 0..MAX_COLOR_STOPS {
            assert!(g.add_color_stop(i as f64 / 10.0, "red"));
        }
        assert!(!g.add_color_stop(0.9, "blue"));
        assert_eq!(g.stops.len(), MAX_COLOR_STOPS);

        let stops: Vec<_> = (0..=MAX_COLOR_STOPS).map(|_| json!([0.5, "red"])).collect();
        let wire = json!([0, {"type": "circular", "x": 0, "y": 0, "r": 1, "stops": stops}]);
        assert!(CanvasOp::from_wire(&wire).is_err());
    }

    #[test]
    fn non_finite_stop_offsets_are_rejected() {
        let mut g = Gradient::new(GradientGeometry::Linear {
            x0: 0.0,
            y0: 0.0,
            x1: 1.0,
            y1: 0.0,
        });
        assert!(!g.add_color_stop(f64::NAN, "red"));
        assert!(!g.add_color_stop(f64::INFINITY, "red"));
        assert!(g.add_color_stop(-2.0, "red"));
        assert!(g.add_color_stop(3.0, "blue"));
        assert_eq!(
            g.stops,
            vec![ColorStop(0.0, "red".into()), ColorStop(1.0, "blue".into())]
        );

        let stops = json!([[1.5, "red"]]);
        let wire = json!([0, {"type": "circular", "x": 0, "y": 0, "r": 1, "stops": stops}]);
        assert!(CanvasOp::from_wire(&wire).is_err());
    }

    #[test]
    fn draw_image_optional_fields() {
        let op = CanvasOp::DrawImage(ImageDraw {
            src: "img".into(),
            dx: 1.0,
            dy: 2.0,
            size: None,
            source: None,
        });
        let wire = op.to_wire();
        assert_eq!(wire, json!([36, "img", 1.0, 2.0, null, null, null]));
        assert_eq!(CanvasOp::from_wire(&wire).unwrap(), op);
    }

    #[test]
    fn batch_wire_shape() {
        let batch = CanvasBatch {
            canvas_id: "chart".into(),
            ops: vec![CanvasOp::Save, CanvasOp::Translate(10.0, 10.0), CanvasOp::Restore],
        };
        let wire = serde_json::to_value(&batch).unwrap();
        assert_eq!(
            wire,
            json!({"canvasId": "chart", "ops": [[12], [14, 10.0, 10.0], [13]]})
        );
        let back: CanvasBatch = serde_json::from_value(wire).unwrap();
        assert_eq!(back, batch);
    }
}
