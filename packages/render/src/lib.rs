//! Render-realm state for Pocket pages.
//!
//! [`NodeTree`] applies render-sync batches strictly in order and answers
//! selector queries and intersection observers. [`RenderBatcher`] and
//! [`CanvasContext`] are the logic-side producers: they accumulate one turn
//! of instructions and flush them as a single batch. [`RenderSurface`] ties
//! a tree and its canvases together behind the [`ToRender`] message set.
//!
//! [`ToRender`]: pocket_protocol::ToRender

mod batcher;
pub mod canvas;
mod error;
pub mod selector;
mod surface;
pub mod tree;

pub use batcher::RenderBatcher;
pub use canvas::{CanvasContext, CanvasHost, CanvasState, DrawCommand, DrawState, PaintState};
pub use error::{BatchError, RenderError, Result};
pub use selector::Selector;
pub use surface::{Evaluator, RenderSurface, RECEIVED_LIMIT, RENDER_ERROR_EVENT};
pub use tree::{Node, NodeTree, RenderReply};
