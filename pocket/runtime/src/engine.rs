//! Engine coordinator for resident apps.
//!
//! The engine owns everything shared between apps:
//! - the logic realm and render surface pools
//! - the API registry, seeded with the built-in modules
//! - the main queue
//! - the table of running apps, keyed by [`AppIdentity`]
//!
//! Launching an identity that is already resident brings that instance back
//! instead of creating a second one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::{AppIdentity, AppService, AppState, LaunchOptions, PresentationHost};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::modules::builtin_modules;
use crate::pool::{Factory, ResourcePool};
use crate::queue::{MainQueue, MainQueueWorker};
use crate::realm::{LogicRealm, RenderRealm};
use crate::registry::ModuleRegistry;

pub type LogicPool = ResourcePool<Box<dyn LogicRealm>>;
pub type RenderPool = ResourcePool<Box<dyn RenderRealm>>;

/// Hooks into app lifecycle transitions driven by the engine.
///
/// Observers run after the transition, outside every runtime lock.
pub trait LifecycleObserver: Send + Sync {
    /// A new instance came up. Not called when a launch re-enters a
    /// resident app.
    fn on_launch(&self, app: &AppService, options: &LaunchOptions) {
        let _ = (app, options);
    }

    fn on_show(&self, app: &AppService, options: &LaunchOptions) {
        let _ = (app, options);
    }

    fn on_hide(&self, app: &AppService) {
        let _ = app;
    }
}

/// Signals from the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostEvent {
    EnterBackground,
    EnterForeground,
    MemoryWarning,
    Terminate,
}

/// State shared by the engine and every app it runs.
pub struct EngineContext {
    config: RuntimeConfig,
    logic_pool: LogicPool,
    render_pool: RenderPool,
    registry: Arc<ModuleRegistry>,
    main: MainQueue,
    observers: RwLock<Vec<Arc<dyn LifecycleObserver>>>,
    running: Mutex<HashMap<AppIdentity, Arc<AppService>>>,
    /// Identities whose launch is under way. Locked after `running`.
    launching: Mutex<HashSet<AppIdentity>>,
    /// Most recently focused last.
    focus: Mutex<Vec<AppIdentity>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EngineContext {
    /// Build pools, preload them and seed the built-in modules.
    pub fn new(
        config: RuntimeConfig,
        logic_factory: Factory<Box<dyn LogicRealm>>,
        render_factory: Factory<Box<dyn RenderRealm>>,
    ) -> Result<(Arc<Self>, MainQueueWorker)> {
        let logic_pool = ResourcePool::new("logic", config.logic_pool.clone(), logic_factory);
        let render_pool = ResourcePool::new("render", config.render_pool.clone(), render_factory)
            .with_health_check(Box::new(|realm: &Box<dyn RenderRealm>| !realm.is_reclaimed()));
        logic_pool.preload(config.logic_pool.preload)?;
        render_pool.preload(config.render_pool.preload)?;

        let registry = Arc::new(ModuleRegistry::new());
        for module in builtin_modules() {
            registry.register_module(module);
        }
        let (main, worker) = MainQueue::new();
        tracing::info!(
            max_apps = config.max_apps,
            logic_preload = config.logic_pool.preload,
            render_preload = config.render_pool.preload,
            "engine context ready"
        );

        let ctx = Self {
            config,
            logic_pool,
            render_pool,
            registry,
            main,
            observers: RwLock::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
            launching: Mutex::new(HashSet::new()),
            focus: Mutex::new(Vec::new()),
        };
        Ok((Arc::new(ctx), worker))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn logic_pool(&self) -> &LogicPool {
        &self.logic_pool
    }

    pub fn render_pool(&self) -> &RenderPool {
        &self.render_pool
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn main_queue(&self) -> &MainQueue {
        &self.main
    }

    fn observers(&self) -> Vec<Arc<dyn LifecycleObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn touch_focus(&self, identity: &AppIdentity) {
        let mut focus = lock(&self.focus);
        focus.retain(|id| id != identity);
        focus.push(identity.clone());
    }

    pub fn get(&self, identity: &AppIdentity) -> Option<Arc<AppService>> {
        lock(&self.running).get(identity).cloned()
    }

    /// Drop an exited app from the running table, unless a newer instance
    /// already took its place.
    pub(crate) fn forget_app(&self, identity: &AppIdentity, instance: Uuid) {
        let mut running = lock(&self.running);
        if running.get(identity).is_some_and(|app| app.instance_id() == instance) {
            running.remove(identity);
            lock(&self.focus).retain(|id| id != identity);
        }
    }
}

/// What `launch` found for an identity.
enum Slot {
    Resident(Arc<AppService>),
    /// The identity is now marked as launching.
    Reserved(Arc<dyn PresentationHost>),
}

/// Hosts mini-programs.
///
/// # Example
///
/// ```ignore
/// let (engine, worker) = Engine::new(RuntimeConfig::default(), logic, render)?;
/// tokio::spawn(worker.run());
///
/// let id = AppIdentity::new("wx123", Environment::Production);
/// let app = engine.launch(id, LaunchOptions::new("pages/index").presented_by(host))?;
/// assert_eq!(app.state(), AppState::Foreground);
/// ```
pub struct Engine {
    ctx: Arc<EngineContext>,
}

impl Engine {
    pub fn new(
        config: RuntimeConfig,
        logic_factory: Factory<Box<dyn LogicRealm>>,
        render_factory: Factory<Box<dyn RenderRealm>>,
    ) -> Result<(Self, MainQueueWorker)> {
        let (ctx, worker) = EngineContext::new(config, logic_factory, render_factory)?;
        Ok((Self { ctx }, worker))
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.ctx.registry()
    }

    pub fn add_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        self.ctx
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Launch `identity`, or bring back its resident instance.
    ///
    /// Re-entry shows the app and, with `relaunch` set, also re-launches it
    /// at `options.path`. Only a fresh instance reaches
    /// [`LifecycleObserver::on_launch`].
    ///
    /// A fresh instance is built with no engine lock held, so presentation
    /// hosts and observers may call back into the engine.
    pub fn launch(&self, identity: AppIdentity, options: LaunchOptions) -> Result<Arc<AppService>> {
        let slot = {
            let running = lock(&self.ctx.running);
            match running.get(&identity) {
                Some(app) => Slot::Resident(app.clone()),
                None => {
                    let mut launching = lock(&self.ctx.launching);
                    if launching.contains(&identity) {
                        return Err(RuntimeError::LaunchInProgress(identity.to_string()));
                    }
                    let max_apps = self.ctx.config.max_apps;
                    if running.len() + launching.len() >= max_apps {
                        return Err(RuntimeError::TooManyApps(max_apps));
                    }
                    let presentation = options
                        .presentation
                        .clone()
                        .ok_or_else(|| RuntimeError::MissingPresentation(identity.to_string()))?;
                    launching.insert(identity.clone());
                    Slot::Reserved(presentation)
                }
            }
        };
        let presentation = match slot {
            Slot::Reserved(presentation) => presentation,
            Slot::Resident(app) => return self.reenter(app, &options),
        };

        let launched =
            AppService::launch(self.ctx.clone(), identity.clone(), &options, presentation);
        {
            let mut running = lock(&self.ctx.running);
            lock(&self.ctx.launching).remove(&identity);
            if let Ok(app) = &launched {
                running.insert(identity, app.clone());
            }
        }
        let app = launched?;
        app.present_top();
        for observer in self.ctx.observers() {
            observer.on_launch(&app, &options);
            observer.on_show(&app, &options);
        }
        Ok(app)
    }

    fn reenter(&self, app: Arc<AppService>, options: &LaunchOptions) -> Result<Arc<AppService>> {
        tracing::debug!(
            app = %app.identity(),
            relaunch = options.relaunch,
            "re-entering resident app"
        );
        app.show()?;
        if options.relaunch {
            app.re_launch_with(&options.path, &options.query)?;
        }
        for observer in self.ctx.observers() {
            observer.on_show(&app, options);
        }
        Ok(app)
    }

    pub fn get(&self, identity: &AppIdentity) -> Option<Arc<AppService>> {
        self.ctx.get(identity)
    }

    /// Identities of every resident app.
    pub fn running(&self) -> Vec<AppIdentity> {
        let mut ids: Vec<AppIdentity> = lock(&self.ctx.running).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn require(&self, identity: &AppIdentity) -> Result<Arc<AppService>> {
        self.get(identity)
            .ok_or_else(|| RuntimeError::AppNotRunning(identity.to_string()))
    }

    pub fn show(&self, identity: &AppIdentity) -> Result<()> {
        let app = self.require(identity)?;
        app.show()?;
        let options = LaunchOptions::new(
            app.active_page()
                .map(|p| p.route)
                .unwrap_or_default(),
        );
        for observer in self.ctx.observers() {
            observer.on_show(&app, &options);
        }
        Ok(())
    }

    pub fn hide(&self, identity: &AppIdentity) -> Result<()> {
        let app = self.require(identity)?;
        let was = app.state();
        app.hide()?;
        if was == AppState::Foreground {
            for observer in self.ctx.observers() {
                observer.on_hide(&app);
            }
        }
        Ok(())
    }

    /// Exit `identity`. Returns `false` if it was already on its way out.
    pub fn exit(&self, identity: &AppIdentity) -> Result<bool> {
        Ok(self.require(identity)?.exit())
    }

    pub fn handle_host_event(&self, event: HostEvent) {
        tracing::info!(?event, "host event");
        let apps: Vec<Arc<AppService>> = lock(&self.ctx.running).values().cloned().collect();
        match event {
            HostEvent::EnterBackground => {
                for app in apps.iter().filter(|a| a.state() == AppState::Foreground) {
                    if let Err(error) = self.hide(app.identity()) {
                        tracing::warn!(app = %app.identity(), %error, "hide on background failed");
                    }
                }
            }
            HostEvent::EnterForeground => {
                let last = lock(&self.ctx.focus)
                    .iter()
                    .rev()
                    .find(|id| apps.iter().any(|a| a.identity() == *id))
                    .cloned();
                if let Some(identity) = last {
                    if let Err(error) = self.show(&identity) {
                        tracing::warn!(app = %identity, %error, "show on foreground failed");
                    }
                }
            }
            HostEvent::MemoryWarning => {
                let logic = self.ctx.logic_pool.drain_idle();
                let render = self.ctx.render_pool.drain_idle();
                tracing::info!(logic, render, "idle realms dropped");
                for app in &apps {
                    let message =
                        pocket_protocol::PublishMessage::new("onMemoryWarning", json!({}));
                    if let Err(error) = app.bridge().publish_to_logic(message, None) {
                        tracing::debug!(
                            app = %app.identity(),
                            %error,
                            "memory warning not delivered"
                        );
                    }
                }
            }
            HostEvent::Terminate => self.shutdown_apps(apps),
        }
    }

    fn shutdown_apps(&self, apps: Vec<Arc<AppService>>) {
        for app in apps {
            app.exit();
        }
    }

    /// Exit every resident app.
    pub fn shutdown(&self) {
        let apps = lock(&self.ctx.running).values().cloned().collect();
        self.shutdown_apps(apps);
    }
}
