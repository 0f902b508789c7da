//! Scripted sessions.
//!
//! A session is a JSON document listing what the platform and the realms do,
//! one step at a time:
//!
//! ```json
//! {
//!   "steps": [
//!     { "step": "launch", "appId": "wx1", "path": "pages/index?id=3" },
//!     { "step": "invoke", "appId": "wx1", "event": "navigateTo",
//!       "params": { "url": "pages/detail" }, "callbackId": 1 },
//!     { "step": "render", "appId": "wx1", "batch": [[0, 0, 1, "view", null]] },
//!     { "step": "layout", "appId": "wx1",
//!       "viewport": { "left": 0, "top": 0, "width": 375, "height": 667 },
//!       "boxes": [[1, { "left": 0, "top": 40, "width": 375, "height": 80 }]] },
//!     { "step": "hostEvent", "event": "enterBackground" },
//!     { "step": "exit", "appId": "wx1" }
//!   ]
//! }
//! ```
//!
//! Steps that address a page take an optional `pageId`; without one they
//! target the app's top page.

use std::path::Path;

use pocket_protocol::{CanvasBatch, NodeId, PageId, Rect, RenderBatch};
use pocket_runtime::{AppIdentity, Environment, HostEvent};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;

fn production() -> Environment {
    Environment::Production
}

/// Which app a step addresses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRef {
    pub app_id: String,
    #[serde(default = "production")]
    pub env: Environment,
}

impl AppRef {
    pub fn identity(&self) -> AppIdentity {
        AppIdentity::new(self.app_id.clone(), self.env)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum Step {
    Launch {
        #[serde(flatten)]
        app: AppRef,
        #[serde(default = "default_path")]
        path: String,
        #[serde(default)]
        query: Map<String, Value>,
        #[serde(default)]
        relaunch: bool,
    },
    Show {
        #[serde(flatten)]
        app: AppRef,
    },
    Hide {
        #[serde(flatten)]
        app: AppRef,
    },
    Exit {
        #[serde(flatten)]
        app: AppRef,
    },
    /// An invoke from the logic realm, or from a page when `fromPage` is set.
    #[serde(rename_all = "camelCase")]
    Invoke {
        #[serde(flatten)]
        app: AppRef,
        event: String,
        #[serde(default)]
        params: Value,
        callback_id: u64,
        #[serde(default)]
        from_page: Option<PageId>,
    },
    /// A publish from the logic realm, or from a page when `fromPage` is set.
    #[serde(rename_all = "camelCase")]
    Publish {
        #[serde(flatten)]
        app: AppRef,
        event: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        page_ids: Vec<PageId>,
        #[serde(default)]
        from_page: Option<PageId>,
    },
    #[serde(rename_all = "camelCase")]
    Render {
        #[serde(flatten)]
        app: AppRef,
        #[serde(default)]
        page_id: Option<PageId>,
        batch: RenderBatch,
    },
    #[serde(rename_all = "camelCase")]
    Canvas {
        #[serde(flatten)]
        app: AppRef,
        #[serde(default)]
        page_id: Option<PageId>,
        batch: CanvasBatch,
    },
    #[serde(rename_all = "camelCase")]
    Evaluate {
        #[serde(flatten)]
        app: AppRef,
        #[serde(default)]
        page_id: Option<PageId>,
        script: String,
    },
    /// Flag the top page's surface as reclaimed by the platform.
    #[serde(rename_all = "camelCase")]
    Reclaim {
        #[serde(flatten)]
        app: AppRef,
        #[serde(default)]
        page_id: Option<PageId>,
    },
    /// Renderer layout for a page: the viewport and the boxes of laid-out
    /// nodes. Observers whose thresholds were crossed report to logic.
    #[serde(rename_all = "camelCase")]
    Layout {
        #[serde(flatten)]
        app: AppRef,
        #[serde(default)]
        page_id: Option<PageId>,
        viewport: Rect,
        boxes: Vec<(NodeId, Rect)>,
    },
    HostEvent {
        event: HostEvent,
    },
}

fn default_path() -> String {
    "pages/index".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Session {
    pub steps: Vec<Step>,
}

impl Session {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
