//! API name to handler resolution.
//!
//! Built-in handlers are seeded once when the engine starts. Extra handlers
//! may be registered at any time and shadow a built-in of the same name
//! without replacing it: the two tables are kept apart and lookups try the
//! extra table first, so unregistering an extra brings the built-in back.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use pocket_protocol::{BridgeError, Origin};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::app::AppService;
use crate::bridge::Responder;

/// One invocation as a handler sees it.
pub struct ApiCall {
    pub event: String,
    pub params: Value,
    pub origin: Origin,
    app: Weak<AppService>,
}

impl ApiCall {
    pub fn new(
        event: impl Into<String>,
        params: Value,
        origin: Origin,
        app: Weak<AppService>,
    ) -> Self {
        Self {
            event: event.into(),
            params,
            origin,
            app,
        }
    }

    /// The calling app, if it is still alive.
    pub fn app(&self) -> Result<Arc<AppService>, BridgeError> {
        self.app.upgrade().ok_or(BridgeError::RealmClosed)
    }

    /// Decode the whole params object.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, BridgeError> {
        Ok(serde_json::from_value(self.params.clone())?)
    }

    /// Decode one required field of the params object.
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> Result<T, BridgeError> {
        match self.params.get(name) {
            None | Some(Value::Null) => Err(BridgeError::missing(name)),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| BridgeError::InvalidParams(format!("`{}`: {}", name, e))),
        }
    }

    /// Decode one optional field of the params object.
    pub fn opt_param<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, BridgeError> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.param(name).map(Some),
        }
    }
}

/// Services one API.
///
/// The handler answers through `responder`, now or later, at most once. An
/// `Err` return is answered on the handler's behalf unless it already
/// responded.
pub trait ApiHandler: Send + Sync {
    fn call(&self, call: ApiCall, responder: Responder) -> Result<(), BridgeError>;
}

impl<F> ApiHandler for F
where
    F: Fn(ApiCall, Responder) -> Result<(), BridgeError> + Send + Sync,
{
    fn call(&self, call: ApiCall, responder: Responder) -> Result<(), BridgeError> {
        self(call, responder)
    }
}

/// An API whose work is a future. Its output is the response.
#[async_trait]
pub trait AsyncApiHandler: Send + Sync + 'static {
    async fn call(&self, call: ApiCall) -> Result<Option<Value>, BridgeError>;
}

/// Runs an [`AsyncApiHandler`] as a task on the ambient tokio runtime.
struct Spawned<H>(Arc<H>);

impl<H: AsyncApiHandler> ApiHandler for Spawned<H> {
    fn call(&self, call: ApiCall, responder: Responder) -> Result<(), BridgeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BridgeError::Internal("no async runtime to run handler".into()))?;
        let handler = self.0.clone();
        runtime.spawn(async move {
            let result = handler.call(call).await;
            responder.respond(result);
        });
        Ok(())
    }
}

/// Answers immediately with the closure's result.
struct Immediate<F>(F);

impl<F> ApiHandler for Immediate<F>
where
    F: Fn(&ApiCall) -> Result<Option<Value>, BridgeError> + Send + Sync,
{
    fn call(&self, call: ApiCall, responder: Responder) -> Result<(), BridgeError> {
        responder.respond((self.0)(&call));
        Ok(())
    }
}

/// Where a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// On whatever thread delivered the invoke.
    #[default]
    Inline,
    /// Marshalled onto the main queue; required for anything touching a
    /// render surface or presentation state.
    Main,
}

/// A registered API.
#[derive(Clone)]
pub struct ApiEntry {
    pub handler: Arc<dyn ApiHandler>,
    pub dispatch: Dispatch,
}

impl ApiEntry {
    pub fn new(handler: impl ApiHandler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            dispatch: Dispatch::Inline,
        }
    }

    /// A handler that computes its response synchronously.
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(&ApiCall) -> Result<Option<Value>, BridgeError> + Send + Sync + 'static,
    {
        Self::new(Immediate(f))
    }

    pub fn asynchronous(handler: impl AsyncApiHandler) -> Self {
        Self::new(Spawned(Arc::new(handler)))
    }

    pub fn on_main(mut self) -> Self {
        self.dispatch = Dispatch::Main;
        self
    }
}

/// A named bundle of APIs registered together.
pub struct ModuleSpec {
    pub name: String,
    pub apis: Vec<(String, ApiEntry)>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            apis: Vec::new(),
        }
    }

    pub fn api(mut self, name: impl Into<String>, entry: ApiEntry) -> Self {
        self.apis.push((name.into(), entry));
        self
    }
}

#[derive(Default)]
struct Tables {
    builtin: HashMap<String, ApiEntry>,
    extra: HashMap<String, ApiEntry>,
    modules: BTreeSet<String>,
}

/// Process-wide API table, safe to mutate from any thread.
#[derive(Default)]
pub struct ModuleRegistry {
    tables: RwLock<Tables>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_builtin(&self, name: impl Into<String>, entry: ApiEntry) {
        self.write().builtin.insert(name.into(), entry);
    }

    /// Shadow `name` for future lookups. The latest registration wins.
    pub fn register_extra(&self, name: impl Into<String>, entry: ApiEntry) {
        let name = name.into();
        tracing::debug!(api = %name, "extra api registered");
        self.write().extra.insert(name, entry);
    }

    /// Drop an extra registration, exposing the built-in again if any.
    pub fn unregister_extra(&self, name: &str) -> bool {
        self.write().extra.remove(name).is_some()
    }

    /// Merge a module into the built-in table.
    pub fn register_module(&self, module: ModuleSpec) {
        let mut tables = self.write();
        tracing::debug!(
            module = %module.name,
            apis = module.apis.len(),
            "built-in module registered"
        );
        tables.modules.insert(module.name);
        tables.builtin.extend(module.apis);
    }

    /// Merge an injected module into the extra table.
    ///
    /// Returns `false` without touching anything if a module with the same
    /// name is already known.
    pub fn inject_module(&self, module: ModuleSpec) -> bool {
        let mut tables = self.write();
        if tables.modules.contains(&module.name) {
            tracing::debug!(module = %module.name, "module already present, injection skipped");
            return false;
        }
        tables.modules.insert(module.name);
        tables.extra.extend(module.apis);
        true
    }

    pub fn resolve(&self, name: &str) -> Option<ApiEntry> {
        let tables = self.read();
        tables
            .extra
            .get(name)
            .or_else(|| tables.builtin.get(name))
            .cloned()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.read().modules.contains(name)
    }

    /// Every resolvable API name, sorted.
    pub fn api_names(&self) -> Vec<String> {
        let tables = self.read();
        let names: BTreeSet<&String> = tables.builtin.keys().chain(tables.extra.keys()).collect();
        names.into_iter().cloned().collect()
    }
}
