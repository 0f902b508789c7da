//! Error types carried across the realm boundary.
//!
//! Nothing in this module is ever thrown across the boundary. A
//! [`BridgeError`] is converted into the `errMsg` field of an invoke response,
//! and a [`ProtocolError`] describes a payload the decoder could not accept.

use thiserror::Error;

/// Failures reported to a realm through the `errMsg` field of a response.
///
/// The `Display` form is the human readable detail; [`BridgeError::code`]
/// is the stable identifier a script can match on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A required field was missing or had the wrong shape.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The request body was not valid JSON.
    #[error("json parse failed: {0}")]
    JsonParseFailed(String),

    /// A module was addressed by name but is not registered.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// The page id does not belong to the calling application.
    #[error("page not found: {0}")]
    PageNotFound(u64),

    /// The page exists but has no live render surface.
    #[error("view not found: {0}")]
    ViewNotFound(u64),

    /// A resource addressed by id (canvas, observer, query) does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// No handler resolves for the requested API name.
    #[error("unknown api: {0}")]
    UnknownApi(String),

    /// A bounded wait elapsed before the other realm answered.
    #[error("timed out")]
    Timeout,

    /// The realm that should answer has been torn down.
    #[error("realm closed")]
    RealmClosed,

    /// The handler failed for a reason it could not classify.
    #[error("internal error: {0}")]
    Internal(String),

    /// Domain specific failure raised by a capability module.
    #[error("{message}")]
    Custom { code: String, message: String },
}

impl BridgeError {
    /// Build a module specific error.
    pub fn custom(code: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Custom {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing required parameter.
    pub fn missing(field: &str) -> Self {
        BridgeError::InvalidParams(format!("missing required field `{}`", field))
    }

    /// Stable camelCase identifier for this error kind.
    pub fn code(&self) -> &str {
        match self {
            BridgeError::InvalidParams(_) => "invalidParams",
            BridgeError::JsonParseFailed(_) => "jsonParseFailed",
            BridgeError::ModuleNotFound(_) => "moduleNotFound",
            BridgeError::PageNotFound(_) => "pageNotFound",
            BridgeError::ViewNotFound(_) => "viewNotFound",
            BridgeError::ResourceNotFound(_) => "resourceNotFound",
            BridgeError::UnknownApi(_) => "unknownAPI",
            BridgeError::Timeout => "timeout",
            BridgeError::RealmClosed => "realmClosed",
            BridgeError::Internal(_) => "internal",
            BridgeError::Custom { code, .. } => code,
        }
    }

    /// The string placed in the `errMsg` field of an invoke response.
    ///
    /// Always non-empty, so a present `errMsg` is never mistaken for success.
    pub fn to_err_msg(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() {
            BridgeError::JsonParseFailed(e.to_string())
        } else {
            BridgeError::InvalidParams(e.to_string())
        }
    }
}

/// Failures decoding the tuple-encoded wire formats.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The tuple's leading tag is not part of the instruction set.
    #[error("unknown {kind} tag: {tag}")]
    UnknownTag { kind: &'static str, tag: i64 },

    /// An instruction was not encoded as a non-empty array.
    #[error("malformed {kind}: expected a non-empty array")]
    NotATuple { kind: &'static str },

    /// A field was missing or had the wrong type.
    #[error("{instruction}: field {index} {message}")]
    Field {
        instruction: &'static str,
        index: usize,
        message: String,
    },

    /// A whole message failed to decode.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<ProtocolError> for BridgeError {
    fn from(e: ProtocolError) -> Self {
        BridgeError::InvalidParams(e.to_string())
    }
}

/// Result type alias for wire decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BridgeError::UnknownApi("x".into()).code(), "unknownAPI");
        assert_eq!(BridgeError::PageNotFound(3).code(), "pageNotFound");
        assert_eq!(BridgeError::missing("url").code(), "invalidParams");
        assert_eq!(
            BridgeError::custom("recordBusy", "already recording").code(),
            "recordBusy"
        );
    }

    #[test]
    fn err_msg_carries_code_and_detail() {
        let msg = BridgeError::ResourceNotFound("canvas-1".into()).to_err_msg();
        assert!(msg.starts_with("resourceNotFound"));
        assert!(msg.contains("canvas-1"));
    }

    #[test]
    fn json_syntax_errors_map_to_parse_failed() {
        let err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        assert_eq!(BridgeError::from(err).code(), "jsonParseFailed");
    }

    #[test]
    fn json_shape_errors_map_to_invalid_params() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Params {
            url: String,
        }
        let err = serde_json::from_value::<Params>(serde_json::json!({})).unwrap_err();
        assert_eq!(BridgeError::from(err).code(), "invalidParams");
    }

    #[test]
    fn protocol_error_becomes_invalid_params() {
        let err: BridgeError = ProtocolError::UnknownTag {
            kind: "render",
            tag: 99,
        }
        .into();
        assert_eq!(err.code(), "invalidParams");
        assert!(err.to_string().contains("99"));
    }
}
