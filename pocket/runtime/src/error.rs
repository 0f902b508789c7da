//! Error types for the Pocket runtime.

use pocket_protocol::{BridgeError, PageId, ProtocolError};
use thiserror::Error;

/// Errors raised on the native side of the runtime.
///
/// These never cross into a realm as-is: when one answers an invoke it is
/// first converted into a [`BridgeError`] and carried as `errMsg`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The pool is empty and may not create resources on demand.
    #[error("pool `{0}` is exhausted")]
    PoolExhausted(&'static str),

    /// The pool's factory failed to create a resource.
    #[error("pool `{pool}` factory failed: {message}")]
    Factory { pool: &'static str, message: String },

    /// A lease was handed back to a pool that does not consider it in use.
    #[error("pool `{pool}` does not hold lease {lease}")]
    LeaseNotHeld { pool: &'static str, lease: u64 },

    /// The realm on the other end of a channel is gone.
    #[error("realm closed")]
    RealmClosed,

    /// No running app has the given identity.
    #[error("app not running: {0}")]
    AppNotRunning(String),

    /// The app has already exited.
    #[error("app has exited: {0}")]
    AppExited(String),

    /// No page with the given id belongs to the app.
    #[error("page not found: {0}")]
    PageNotFound(PageId),

    /// Pushing would exceed the configured page stack depth.
    #[error("page stack limit reached ({0})")]
    PageStackOverflow(usize),

    /// A launch supplied no presentation host to attach pages to.
    #[error("no presentation host for {0}")]
    MissingPresentation(String),

    /// Another launch of the same identity has not finished yet.
    #[error("launch already in progress: {0}")]
    LaunchInProgress(String),

    /// The engine already runs its configured maximum of apps.
    #[error("running app limit reached ({0})")]
    TooManyApps(usize),

    /// An evaluation did not answer within its deadline.
    #[error("evaluation timed out after {0} ms")]
    EvaluateTimeout(u64),

    /// A wire payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A JSON payload or config file was malformed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RuntimeError> for BridgeError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::PageNotFound(id) => BridgeError::PageNotFound(id.0),
            RuntimeError::RealmClosed => BridgeError::RealmClosed,
            RuntimeError::EvaluateTimeout(_) => BridgeError::Timeout,
            RuntimeError::Protocol(p) => p.into(),
            RuntimeError::Json(j) => j.into(),
            RuntimeError::PageStackOverflow(limit) => BridgeError::custom(
                "pageStackOverflow",
                format!("page stack limit reached ({})", limit),
            ),
            RuntimeError::AppExited(id) => {
                BridgeError::custom("appExited", format!("app has exited: {}", id))
            }
            other => BridgeError::Internal(other.to_string()),
        }
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
