//! Error types for applying render-sync and canvas batches.

use pocket_protocol::{BridgeError, NodeId};
use thiserror::Error;

/// Why a single instruction could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The instruction names a node the surface does not hold.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// `child` is not a direct child of `parent`.
    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    /// Inserting would make a node its own ancestor.
    #[error("inserting {node} under {parent} would create a cycle")]
    Cycle { parent: NodeId, node: NodeId },

    /// The root node cannot be inserted or removed.
    #[error("the root node cannot be moved or removed")]
    Root,

    /// An intersection observer id that was never added.
    #[error("unknown intersection observer: {0}")]
    UnknownObserver(u64),

    /// A selector could not be parsed.
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

impl From<RenderError> for BridgeError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::UnknownObserver(id) => {
                BridgeError::ResourceNotFound(format!("observer {}", id))
            }
            RenderError::UnknownNode(id) => BridgeError::ResourceNotFound(format!("node {}", id)),
            other => BridgeError::InvalidParams(other.to_string()),
        }
    }
}

/// A batch stopped at the instruction at `index`.
///
/// Every instruction before `index` has been applied; none after it has.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("instruction {index} ({instruction}): {error}")]
pub struct BatchError {
    pub index: usize,
    pub instruction: &'static str,
    #[source]
    pub error: RenderError,
}

/// Result type alias for tree operations.
pub type Result<T> = std::result::Result<T, RenderError>;
