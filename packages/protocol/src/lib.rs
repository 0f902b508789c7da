//! Pocket wire protocol.
//!
//! Everything that crosses a realm boundary is defined here as plain data:
//!
//! - [`InvokeRequest`] / [`InvokeResponse`]: request/response between a realm
//!   and the native host, paired by [`CallbackId`]
//! - [`PublishMessage`]: fire-and-forget named events
//! - [`RenderBatch`]: the ordered render-sync instruction stream
//! - [`CanvasBatch`]: the ordered 2D canvas instruction stream
//! - [`ToLogic`], [`FromLogic`], [`ToRender`], [`FromRender`]: the closed set
//!   of messages each realm sends and receives
//!
//! Failures are data too: a [`BridgeError`] becomes the `errMsg` field of a
//! response and is never raised across the boundary.

pub mod canvas;
mod error;
pub mod message;
pub mod render;
mod wire;

pub use canvas::{
    CanvasBatch, CanvasOp, ColorStop, Gradient, GradientGeometry, ImageDraw, Opcode, PaintStyle,
    Pattern, Transform, MAX_COLOR_STOPS,
};
pub use error::{BridgeError, ProtocolError, Result};
pub use message::{
    CallbackId, FromLogic, FromRender, InvokeRequest, InvokeResponse, Origin, PageId,
    PublishMessage, ToLogic, ToRender,
};
pub use render::{
    IntersectionEntry, ListenerOptions, Margins, NodeId, NodeInfo, ObserverOptions, QueryFields,
    QueryResult, Rect, RenderBatch, RenderInstruction, RenderTag, SelectorQuery, ROOT_NODE,
};
