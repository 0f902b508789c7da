//! One page's render surface: node tree, canvases and the evaluate hook.

use std::collections::VecDeque;

use pocket_protocol::{BridgeError, FromRender, InvokeResponse, PublishMessage, Rect, ToRender};
use serde_json::{json, Value};

use crate::canvas::CanvasHost;
use crate::tree::{NodeTree, RenderReply};

/// Answers `Evaluate` requests. Without one, evaluation fails with
/// `evaluateUnsupported`.
pub trait Evaluator: Send {
    fn evaluate(&mut self, script: &str, tree: &NodeTree) -> Result<Value, BridgeError>;
}

impl<F> Evaluator for F
where
    F: FnMut(&str, &NodeTree) -> Result<Value, BridgeError> + Send,
{
    fn evaluate(&mut self, script: &str, tree: &NodeTree) -> Result<Value, BridgeError> {
        self(script, tree)
    }
}

/// Event published to the logic realm when a batch is rejected.
pub const RENDER_ERROR_EVENT: &str = "renderError";

/// How many inbound responses and publishes a surface remembers.
pub const RECEIVED_LIMIT: usize = 64;

/// The render realm state behind one page.
pub struct RenderSurface {
    tree: NodeTree,
    canvases: CanvasHost,
    route: Option<String>,
    query: Value,
    loads: u64,
    evaluator: Option<Box<dyn Evaluator>>,
    received: VecDeque<ToRender>,
}

impl Default for RenderSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface {
    pub fn new() -> Self {
        Self {
            tree: NodeTree::new(),
            canvases: CanvasHost::new(),
            route: None,
            query: Value::Null,
            loads: 0,
            evaluator: None,
            received: VecDeque::new(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    pub fn canvases(&self) -> &CanvasHost {
        &self.canvases
    }

    /// Route of the last `Load`.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn query(&self) -> &Value {
        &self.query
    }

    /// How many times a page was loaded into this surface.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// The last [`RECEIVED_LIMIT`] responses and publishes that reached this
    /// surface, oldest first.
    pub fn received(&self) -> impl Iterator<Item = &ToRender> {
        self.received.iter()
    }

    /// Drop all page state, as when the surface returns to its pool.
    pub fn reset(&mut self) {
        self.tree = NodeTree::new();
        self.canvases = CanvasHost::new();
        self.route = None;
        self.query = Value::Null;
        self.received.clear();
    }

    /// Handle one inbound message and return what goes back to the host.
    pub fn handle(&mut self, message: ToRender) -> Vec<FromRender> {
        match message {
            ToRender::Load { route, query } => {
                self.reset();
                tracing::debug!(%route, "page loaded into surface");
                self.route = Some(route);
                self.query = query;
                self.loads += 1;
                Vec::new()
            }
            ToRender::Render { batch } => match self.tree.apply(&batch) {
                Ok(replies) => replies
                    .into_iter()
                    .map(|reply| match reply {
                        RenderReply::Query { query_id, results } => {
                            FromRender::QueryReply { query_id, results }
                        }
                    })
                    .collect(),
                Err(error) => {
                    tracing::warn!(%error, "render batch rejected");
                    vec![FromRender::Publish(PublishMessage::new(
                        RENDER_ERROR_EVENT,
                        json!({
                            "index": error.index,
                            "instruction": error.instruction,
                            "errMsg": BridgeError::from(error.error).to_err_msg(),
                        }),
                    ))]
                }
            },
            ToRender::Canvas(batch) => {
                self.canvases.apply(&batch);
                Vec::new()
            }
            ToRender::Evaluate {
                callback_id,
                script,
            } => {
                let result = match self.evaluator.as_mut() {
                    Some(evaluator) => evaluator.evaluate(&script, &self.tree),
                    None => Err(BridgeError::custom(
                        "evaluateUnsupported",
                        "this surface cannot evaluate scripts",
                    )),
                };
                let response = match result {
                    Ok(data) => InvokeResponse::success(callback_id, Some(data)),
                    Err(error) => InvokeResponse::failure(callback_id, &error),
                };
                vec![FromRender::EvaluateResult(response)]
            }
            other @ (ToRender::Response(_) | ToRender::Publish(_)) => {
                if self.received.len() == RECEIVED_LIMIT {
                    self.received.pop_front();
                }
                self.received.push_back(other);
                Vec::new()
            }
        }
    }

    /// Feed renderer layout for a node and the viewport, then report any
    /// observer whose threshold was crossed.
    pub fn layout(&mut self, viewport: Rect, boxes: &[(u64, Rect)]) -> Option<FromRender> {
        self.tree.set_viewport(viewport);
        for (node, rect) in boxes {
            if let Err(error) = self.tree.set_layout(*node, *rect) {
                tracing::debug!(%error, "layout for unknown node ignored");
            }
        }
        let entries = self.tree.compute_intersections();
        if entries.is_empty() {
            None
        } else {
            Some(FromRender::Intersection { entries })
        }
    }
}
