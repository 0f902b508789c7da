//! Messages exchanged between the native host and the two realms.
//!
//! The realm boundary is a plain-data boundary: every crossing is one of the
//! enums below, serialized with serde. No live objects cross it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canvas::CanvasBatch;
use crate::error::BridgeError;
use crate::render::{IntersectionEntry, QueryResult, RenderBatch};

/// Identifier pairing an invoke request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique page identifier (the render surface's "webview id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The realm a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "realm", content = "pageId")]
pub enum Origin {
    /// The application's single logic realm.
    Logic,
    /// The render realm of one page.
    Render(PageId),
}

/// `{ event, params, callbackId }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub event: String,
    #[serde(default)]
    pub params: Value,
    pub callback_id: CallbackId,
}

impl InvokeRequest {
    pub fn new(event: impl Into<String>, params: Value, callback_id: u64) -> Self {
        Self {
            event: event.into(),
            params,
            callback_id: CallbackId(callback_id),
        }
    }

    /// Decode a request from raw JSON text.
    ///
    /// Syntax errors are `jsonParseFailed`, shape errors `invalidParams`.
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// `{ callbackId, data?, errMsg? }`
///
/// Absence of `errMsg`, or an empty string, signals success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub callback_id: CallbackId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
}

impl InvokeResponse {
    pub fn success(callback_id: CallbackId, data: Option<Value>) -> Self {
        Self {
            callback_id,
            data,
            err_msg: None,
        }
    }

    pub fn failure(callback_id: CallbackId, error: &BridgeError) -> Self {
        Self {
            callback_id,
            data: None,
            err_msg: Some(error.to_err_msg()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err_msg.as_deref().map_or(true, str::is_empty)
    }
}

/// `{ event, data }`, one-directional and without an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl PublishMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Messages delivered into a logic realm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToLogic {
    /// Response to an invoke the logic realm sent.
    Response(InvokeResponse),
    /// A named event for the realm's `subscribe` handlers.
    Publish {
        #[serde(flatten)]
        message: PublishMessage,
        /// The page that originated the event, when it came from a render realm.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "pageId")]
        page_id: Option<PageId>,
    },
    /// Selector query results, answered over the render-sync channel.
    QueryReply {
        #[serde(rename = "pageId")]
        page_id: PageId,
        #[serde(rename = "queryId")]
        query_id: u64,
        results: Vec<QueryResult>,
    },
    /// Intersection observer notifications from a page.
    Intersection {
        #[serde(rename = "pageId")]
        page_id: PageId,
        entries: Vec<IntersectionEntry>,
    },
}

/// Messages a logic realm sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromLogic {
    Invoke(InvokeRequest),
    /// Publish to the render realms of the listed pages.
    Publish {
        #[serde(flatten)]
        message: PublishMessage,
        #[serde(rename = "pageIds")]
        page_ids: Vec<PageId>,
    },
    /// One render-sync flush for a page.
    Render {
        #[serde(rename = "pageId")]
        page_id: PageId,
        batch: RenderBatch,
    },
    /// One canvas flush for a page.
    Canvas {
        #[serde(rename = "pageId")]
        page_id: PageId,
        batch: CanvasBatch,
    },
}

/// Messages delivered into a render realm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToRender {
    /// Response to an invoke this render realm sent.
    Response(InvokeResponse),
    Publish(PublishMessage),
    Render { batch: RenderBatch },
    Canvas(CanvasBatch),
    /// Evaluate script inside the page and answer with `EvaluateResult`.
    Evaluate {
        #[serde(rename = "callbackId")]
        callback_id: CallbackId,
        script: String,
    },
    /// Load (or reload) a route into the surface.
    Load { route: String, query: Value },
}

/// Messages a render realm sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromRender {
    Invoke(InvokeRequest),
    /// Publish to the logic realm.
    Publish(PublishMessage),
    QueryReply {
        #[serde(rename = "queryId")]
        query_id: u64,
        results: Vec<QueryResult>,
    },
    Intersection { entries: Vec<IntersectionEntry> },
    EvaluateResult(InvokeResponse),
}
