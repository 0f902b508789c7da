//! Error types for the session host.

use pocket_protocol::BridgeError;
use pocket_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// An evaluation was answered with an error.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("app not running: {0}")]
    UnknownApp(String),

    #[error("app has no pages: {0}")]
    NoActivePage(String),

    #[error("surface of page {0} is not local")]
    NotLocal(u64),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
