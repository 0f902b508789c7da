//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Sizing policy of one resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Resources created ahead of first use.
    pub preload: usize,

    /// Whether `acquire` may create a resource when none is idle.
    pub auto_generate: bool,

    /// Idle resources kept on release; extras are dropped.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            preload: 1,
            auto_generate: true,
            max_idle: 4,
        }
    }
}

/// Configuration for one [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Maximum number of concurrently resident apps.
    pub max_apps: usize,

    /// Maximum depth of one app's page stack.
    pub max_page_stack: usize,

    /// Pool of logic realms (script execution contexts).
    pub logic_pool: PoolConfig,

    /// Pool of render surfaces.
    pub render_pool: PoolConfig,

    /// Upper bound on waiting for an `evaluateInPage` answer.
    pub evaluate_timeout_ms: u64,

    /// Answer of `getSystemInfo`.
    pub system_info: Map<String, Value>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_apps: 8,
            max_page_stack: 10,
            logic_pool: PoolConfig::default(),
            render_pool: PoolConfig::default(),
            evaluate_timeout_ms: 3000,
            system_info: Map::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON text. Missing keys take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn evaluate_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluate_timeout_ms)
    }
}
