//! Per-application lifecycle.
//!
//! An [`AppService`] is one resident mini-program: a leased logic realm, a
//! stack of pages each holding a leased render surface, and the bridge that
//! connects them. Its state only moves forward along
//! `launching -> foreground <-> background -> exited`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use pocket_protocol::{FromLogic, FromRender, Origin, PageId, PublishMessage, ToLogic, ToRender};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::bridge::{Bridge, RealmRouter};
use crate::engine::EngineContext;
use crate::error::{Result, RuntimeError};
use crate::pool::Lease;
use crate::realm::{LogicRealm, RenderOutbox, RenderRealm};

static NEXT_PAGE: AtomicU64 = AtomicU64::new(1);

/// Deployment flavour of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        })
    }
}

/// What makes two launches the same app. At most one instance per identity
/// is resident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
    pub app_id: String,
    pub env: Environment,
}

impl AppIdentity {
    pub fn new(app_id: impl Into<String>, env: Environment) -> Self {
        Self {
            app_id: app_id.into(),
            env,
        }
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.app_id, self.env)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppState {
    Launching,
    Foreground,
    Background,
    Exited,
}

/// The native UI that shows an app's pages.
pub trait PresentationHost: Send + Sync {
    /// A page became the visible top of the app's stack.
    fn present(&self, app: &AppIdentity, page: PageId);

    /// The app is gone; take its container down.
    fn dismiss(&self, app: &AppIdentity);
}

/// How an app is launched or brought back.
#[derive(Clone)]
pub struct LaunchOptions {
    /// Entry page, optionally with a `?key=value` query.
    pub path: String,
    pub query: Map<String, Value>,
    /// When the app is already running, also re-launch it at `path`.
    pub relaunch: bool,
    /// Required for a fresh launch.
    pub presentation: Option<Arc<dyn PresentationHost>>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::new("pages/index")
    }
}

impl fmt::Debug for LaunchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchOptions")
            .field("path", &self.path)
            .field("query", &self.query)
            .field("relaunch", &self.relaunch)
            .finish_non_exhaustive()
    }
}

impl LaunchOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Map::new(),
            relaunch: false,
            presentation: None,
        }
    }

    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    pub fn relaunch(mut self) -> Self {
        self.relaunch = true;
        self
    }

    pub fn presented_by(mut self, host: Arc<dyn PresentationHost>) -> Self {
        self.presentation = Some(host);
        self
    }
}

/// Split `pages/detail?id=3&tab=a` into its route and query.
pub fn split_url(url: &str) -> (String, Map<String, Value>) {
    let (route, query) = url.split_once('?').unwrap_or((url, ""));
    let mut params = Map::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(key.to_string(), Value::String(value.to_string()));
    }
    (route.trim_start_matches('/').to_string(), params)
}

/// Snapshot of one page, as `getCurrentPages` reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page_id: PageId,
    pub route: String,
    pub query: Map<String, Value>,
    pub visible: bool,
}

struct Page {
    id: PageId,
    route: String,
    query: Map<String, Value>,
    surface: Option<Lease<Box<dyn RenderRealm>>>,
    visible: bool,
}

impl Page {
    fn info(&self) -> PageInfo {
        PageInfo {
            page_id: self.id,
            route: self.route.clone(),
            query: self.query.clone(),
            visible: self.visible,
        }
    }

    fn load_message(&self) -> ToRender {
        ToRender::Load {
            route: self.route.clone(),
            query: Value::Object(self.query.clone()),
        }
    }
}

/// One lazily created instance per module type, per app.
#[derive(Default)]
pub struct ModuleInstances {
    instances: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ModuleInstances {
    pub fn get_or_init<T: Any + Send + Sync + Default>(&self) -> Arc<T> {
        self.get_or_init_with(T::default)
    }

    pub fn get_or_init_with<T: Any + Send + Sync>(&self, init: impl FnOnce() -> T) -> Arc<T> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = instances.get(&TypeId::of::<T>()) {
            if let Ok(instance) = existing.clone().downcast::<T>() {
                return instance;
            }
        }
        let fresh = Arc::new(init());
        instances.insert(TypeId::of::<T>(), fresh.clone() as Arc<dyn Any + Send + Sync>);
        fresh
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .and_then(|i| i.clone().downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct AppInner {
    state: AppState,
    pages: Vec<Page>,
    logic: Option<Lease<Box<dyn LogicRealm>>>,
}

impl AppInner {
    fn send_logic(&self, message: ToLogic) -> Result<()> {
        match &self.logic {
            Some(logic) => logic.deliver(message),
            None => Err(RuntimeError::RealmClosed),
        }
    }

    fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == id)
    }
}

/// One resident app.
pub struct AppService {
    identity: AppIdentity,
    instance: Uuid,
    ctx: Arc<EngineContext>,
    bridge: Arc<Bridge>,
    presentation: Arc<dyn PresentationHost>,
    modules: ModuleInstances,
    inner: Mutex<AppInner>,
    self_ref: Weak<AppService>,
}

impl AppService {
    /// Lease a logic realm, open the entry page and come up in foreground.
    /// Nothing is presented yet; see [`AppService::present_top`].
    pub(crate) fn launch(
        ctx: Arc<EngineContext>,
        identity: AppIdentity,
        options: &LaunchOptions,
        presentation: Arc<dyn PresentationHost>,
    ) -> Result<Arc<Self>> {
        let logic = ctx.logic_pool().acquire()?;
        let instance = Uuid::new_v4();
        let app = Arc::new_cyclic(|weak: &Weak<AppService>| {
            let router: Weak<dyn RealmRouter> = weak.clone();
            let bridge = Bridge::new(
                identity.to_string(),
                ctx.registry().clone(),
                ctx.main_queue().clone(),
                router,
                weak.clone(),
                ctx.config().evaluate_timeout(),
            );
            AppService {
                identity: identity.clone(),
                instance,
                ctx: ctx.clone(),
                bridge,
                presentation,
                modules: ModuleInstances::default(),
                inner: Mutex::new(AppInner {
                    state: AppState::Launching,
                    pages: Vec::new(),
                    logic: Some(logic),
                }),
                self_ref: weak.clone(),
            }
        });
        tracing::info!(app_id = %identity.app_id, env = %identity.env, %instance, "launching app");

        let (route, mut query) = split_url(&options.path);
        query.extend(options.query.clone());
        let page = match app.open_page(route.clone(), query.clone()) {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(app_id = %identity.app_id, %error, "launch failed");
                app.shut_down();
                return Err(error);
            }
        };

        let page_id = {
            let mut inner = app.lock();
            app.publish(
                &inner,
                "onAppLaunch",
                json!({
                    "appId": identity.app_id,
                    "env": identity.env,
                    "instanceId": instance,
                    "path": route,
                    "query": query,
                }),
                None,
            );
            inner.state = AppState::Foreground;
            app.publish(&inner, "onAppShow", json!({"path": route, "query": query}), None);
            app.install(&mut inner, page)
        };
        tracing::debug!(app = %identity, page_id = %page_id, "app launched");
        Ok(app)
    }

    /// Present the top page and take focus. Runs once the launching engine
    /// has released its own locks.
    pub(crate) fn present_top(&self) {
        let top = self.lock().pages.last().map(|p| p.id);
        if let Some(top) = top {
            self.presentation.present(&self.identity, top);
        }
        self.ctx.touch_focus(&self.identity);
    }

    fn lock(&self) -> MutexGuard<'_, AppInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    /// Distinguishes successive instances of the same identity.
    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    pub fn state(&self) -> AppState {
        self.lock().state
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn modules(&self) -> &ModuleInstances {
        &self.modules
    }

    fn publish(&self, inner: &AppInner, event: &str, data: Value, page: Option<PageId>) {
        let message = ToLogic::Publish {
            message: PublishMessage::new(event, data),
            page_id: page,
        };
        if let Err(error) = inner.send_logic(message) {
            tracing::debug!(app = %self.identity, event, %error, "lifecycle event not delivered");
        }
    }

    fn ensure_alive(&self, inner: &AppInner) -> Result<()> {
        if inner.state == AppState::Exited {
            return Err(RuntimeError::AppExited(self.identity.to_string()));
        }
        Ok(())
    }

    fn outbox(&self, page: PageId) -> RenderOutbox {
        let app = self.self_ref.clone();
        let main = self.ctx.main_queue().clone();
        Arc::new(move |message: FromRender| {
            let app = app.clone();
            let queued = main.dispatch(move || {
                if let Some(app) = app.upgrade() {
                    if let Err(error) = app.handle_render_message(page, message) {
                        tracing::debug!(page_id = %page, %error, "render output dropped");
                    }
                }
            });
            if queued.is_err() {
                tracing::debug!(page_id = %page, "main queue closed, render output dropped");
            }
        })
    }

    /// Lease a surface and load a route into it. The stack is not touched.
    fn open_page(&self, route: String, query: Map<String, Value>) -> Result<Page> {
        let surface = self.ctx.render_pool().acquire()?;
        let id = PageId(NEXT_PAGE.fetch_add(1, Ordering::Relaxed));
        let page = Page {
            id,
            route,
            query,
            surface: None,
            visible: false,
        };
        surface.attach(id, self.outbox(id));
        if let Err(error) = surface.deliver(page.load_message()) {
            if let Err(e) = self.ctx.render_pool().discard(surface) {
                tracing::warn!(%e, "discarding failed surface");
            }
            return Err(error);
        }
        Ok(Page {
            surface: Some(surface),
            ..page
        })
    }

    /// Push an opened page on top of the stack and show it.
    fn install(&self, inner: &mut AppInner, mut page: Page) -> PageId {
        if let Some(top) = inner.pages.last_mut() {
            if top.visible {
                top.visible = false;
                let id = top.id;
                self.publish(inner, "onPageHide", json!({"pageId": id}), Some(id));
            }
        }
        let id = page.id;
        self.publish(
            inner,
            "onPageLoad",
            json!({"pageId": id, "route": page.route, "query": page.query}),
            Some(id),
        );
        page.visible = inner.state == AppState::Foreground;
        let visible = page.visible;
        inner.pages.push(page);
        if visible {
            self.publish(inner, "onPageShow", json!({"pageId": id}), Some(id));
        }
        tracing::debug!(
            app = %self.identity,
            page_id = %id,
            depth = inner.pages.len(),
            "page installed"
        );
        id
    }

    /// Tear a page down and return its surface to the pool. A reclaimed
    /// surface is discarded instead.
    fn unload(&self, inner: &AppInner, mut page: Page) {
        if page.visible {
            self.publish(inner, "onPageHide", json!({"pageId": page.id}), Some(page.id));
        }
        self.publish(inner, "onPageUnload", json!({"pageId": page.id}), Some(page.id));
        self.bridge.forget_origin(Origin::Render(page.id));
        if let Some(surface) = page.surface.take() {
            let pool = self.ctx.render_pool();
            let returned = if surface.is_reclaimed() {
                pool.discard(surface)
            } else {
                surface.reset();
                pool.release(surface)
            };
            if let Err(error) = returned {
                tracing::warn!(page_id = %page.id, %error, "surface release failed");
            }
        }
    }

    fn show_top(&self, inner: &mut AppInner) -> Option<PageId> {
        let foreground = inner.state == AppState::Foreground;
        let top = inner.pages.last_mut()?;
        let id = top.id;
        if foreground && !top.visible {
            top.visible = true;
            self.publish(inner, "onPageShow", json!({"pageId": id}), Some(id));
        }
        Some(id)
    }

    /// Push a new page for `url`.
    pub fn navigate_to(&self, url: &str) -> Result<PageId> {
        let (route, query) = split_url(url);
        let id = {
            let mut inner = self.lock();
            self.ensure_alive(&inner)?;
            let limit = self.ctx.config().max_page_stack;
            if inner.pages.len() >= limit {
                return Err(RuntimeError::PageStackOverflow(limit));
            }
            let page = self.open_page(route, query)?;
            self.install(&mut inner, page)
        };
        self.presentation.present(&self.identity, id);
        Ok(id)
    }

    /// Replace the top page with a new page for `url`.
    pub fn redirect_to(&self, url: &str) -> Result<PageId> {
        let (route, query) = split_url(url);
        let id = {
            let mut inner = self.lock();
            self.ensure_alive(&inner)?;
            let page = self.open_page(route, query)?;
            if let Some(top) = inner.pages.pop() {
                self.unload(&inner, top);
            }
            self.install(&mut inner, page)
        };
        self.presentation.present(&self.identity, id);
        Ok(id)
    }

    /// Pop up to `delta` pages, always keeping the bottom one. Returns how
    /// many were popped.
    ///
    /// A page uncovered this way whose surface was reclaimed is reloaded on a
    /// fresh surface before it is shown.
    pub fn navigate_back(&self, delta: usize) -> Result<usize> {
        let (popped, top) = {
            let mut inner = self.lock();
            self.ensure_alive(&inner)?;
            let popped = delta.max(1).min(inner.pages.len().saturating_sub(1));
            for _ in 0..popped {
                if let Some(page) = inner.pages.pop() {
                    self.unload(&inner, page);
                }
            }
            self.recreate_reclaimed_top(&mut inner)?;
            (popped, self.show_top(&mut inner))
        };
        if let (true, Some(top)) = (popped > 0, top) {
            self.presentation.present(&self.identity, top);
        }
        Ok(popped)
    }

    /// Close every page and start over at `url` in the same logic realm.
    pub fn re_launch(&self, url: &str) -> Result<PageId> {
        self.re_launch_with(url, &Map::new())
    }

    pub(crate) fn re_launch_with(&self, url: &str, extra: &Map<String, Value>) -> Result<PageId> {
        let (route, mut query) = split_url(url);
        query.extend(extra.clone());
        let id = {
            let mut inner = self.lock();
            self.ensure_alive(&inner)?;
            let page = self.open_page(route, query)?;
            while let Some(old) = inner.pages.pop() {
                self.unload(&inner, old);
            }
            tracing::info!(app = %self.identity, %url, "re-launched");
            self.install(&mut inner, page)
        };
        self.presentation.present(&self.identity, id);
        Ok(id)
    }

    /// The page stack, bottom first.
    pub fn current_pages(&self) -> Vec<PageInfo> {
        self.lock().pages.iter().map(Page::info).collect()
    }

    pub fn active_page(&self) -> Option<PageInfo> {
        self.lock().pages.last().map(Page::info)
    }

    /// Bring the app to foreground.
    ///
    /// A top page whose surface the platform reclaimed gets a fresh surface
    /// and is loaded again.
    pub fn show(&self) -> Result<()> {
        let top = {
            let mut inner = self.lock();
            self.ensure_alive(&inner)?;
            self.recreate_reclaimed_top(&mut inner)?;
            let was = inner.state;
            inner.state = AppState::Foreground;
            if was != AppState::Foreground {
                let path = inner.pages.last().map(|p| p.route.clone());
                self.publish(&inner, "onAppShow", json!({ "path": path }), None);
                tracing::debug!(app = %self.identity, "app shown");
            }
            self.show_top(&mut inner)
        };
        if let Some(top) = top {
            self.presentation.present(&self.identity, top);
        }
        self.ctx.touch_focus(&self.identity);
        Ok(())
    }

    fn recreate_reclaimed_top(&self, inner: &mut AppInner) -> Result<()> {
        let Some(top) = inner.pages.last_mut() else {
            return Ok(());
        };
        if !top.surface.as_ref().is_some_and(|s| s.is_reclaimed()) {
            return Ok(());
        }
        let id = top.id;
        tracing::info!(
            app = %self.identity,
            page_id = %id,
            "surface was reclaimed, reloading page"
        );
        if let Some(old) = top.surface.take() {
            if let Err(error) = self.ctx.render_pool().discard(old) {
                tracing::warn!(page_id = %id, %error, "discarding reclaimed surface");
            }
        }
        self.bridge.forget_origin(Origin::Render(id));
        let surface = self.ctx.render_pool().acquire()?;
        surface.attach(id, self.outbox(id));
        if let Err(error) = surface.deliver(top.load_message()) {
            if let Err(e) = self.ctx.render_pool().discard(surface) {
                tracing::warn!(%e, "discarding failed surface");
            }
            return Err(error);
        }
        top.surface = Some(surface);
        let data = json!({"pageId": id, "route": top.route, "query": top.query, "reloaded": true});
        self.publish(inner, "onPageLoad", data, Some(id));
        Ok(())
    }

    /// Send the app to background.
    pub fn hide(&self) -> Result<()> {
        let mut inner = self.lock();
        self.ensure_alive(&inner)?;
        if inner.state != AppState::Foreground {
            return Ok(());
        }
        inner.state = AppState::Background;
        if let Some(top) = inner.pages.last_mut() {
            if top.visible {
                top.visible = false;
                let id = top.id;
                self.publish(&inner, "onPageHide", json!({"pageId": id}), Some(id));
            }
        }
        self.publish(&inner, "onAppHide", json!({}), None);
        tracing::debug!(app = %self.identity, "app hidden");
        Ok(())
    }

    /// Tear down and release every lease. Returns `false` if the app had
    /// already exited.
    pub fn exit(&self) -> bool {
        let done = self.shut_down();
        if done {
            self.ctx.forget_app(&self.identity, self.instance);
        }
        done
    }

    fn shut_down(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.state == AppState::Exited {
                return false;
            }
            inner.state = AppState::Exited;
            self.publish(&inner, "onAppExit", json!({}), None);
            while let Some(page) = inner.pages.pop() {
                self.unload(&inner, page);
            }
            if let Some(logic) = inner.logic.take() {
                logic.reset();
                if let Err(error) = self.ctx.logic_pool().release(logic) {
                    tracing::warn!(app = %self.identity, %error, "logic realm release failed");
                }
            }
        }
        self.bridge.teardown();
        self.presentation.dismiss(&self.identity);
        tracing::info!(app = %self.identity, instance = %self.instance, "app exited");
        true
    }

    /// Evaluate script in one of this app's pages.
    pub async fn evaluate_in_page(
        &self,
        page: PageId,
        script: impl Into<String>,
    ) -> std::result::Result<Value, pocket_protocol::BridgeError> {
        self.bridge.evaluate_in_page(page, script).await
    }

    /// Route one message coming out of the logic realm.
    pub fn handle_logic_message(&self, message: FromLogic) -> Result<()> {
        self.ensure_alive(&self.lock())?;
        match message {
            FromLogic::Invoke(request) => {
                self.bridge.invoke(Origin::Logic, request);
                Ok(())
            }
            FromLogic::Publish { message, page_ids } => {
                self.bridge.notify(Origin::Logic, &message);
                self.bridge.publish_to_pages(message, &page_ids);
                Ok(())
            }
            FromLogic::Render { page_id, batch } => {
                self.to_page(page_id, ToRender::Render { batch })
            }
            FromLogic::Canvas { page_id, batch } => self.to_page(page_id, ToRender::Canvas(batch)),
        }
    }

    /// Route one message coming out of a page's render realm.
    pub fn handle_render_message(&self, page: PageId, message: FromRender) -> Result<()> {
        {
            let inner = self.lock();
            self.ensure_alive(&inner)?;
            if inner.page(page).is_none() {
                return Err(RuntimeError::PageNotFound(page));
            }
        }
        match message {
            FromRender::Invoke(request) => {
                self.bridge.invoke(Origin::Render(page), request);
                Ok(())
            }
            FromRender::Publish(message) => {
                self.bridge.notify(Origin::Render(page), &message);
                self.to_logic(ToLogic::Publish {
                    message,
                    page_id: Some(page),
                })
            }
            FromRender::QueryReply { query_id, results } => self.to_logic(ToLogic::QueryReply {
                page_id: page,
                query_id,
                results,
            }),
            FromRender::Intersection { entries } => self.to_logic(ToLogic::Intersection {
                page_id: page,
                entries,
            }),
            FromRender::EvaluateResult(response) => {
                if !self.bridge.complete_evaluation(page, response) {
                    tracing::debug!(
                        app = %self.identity,
                        page_id = %page,
                        "stale evaluation result"
                    );
                }
                Ok(())
            }
        }
    }
}

impl RealmRouter for AppService {
    fn to_logic(&self, message: ToLogic) -> Result<()> {
        self.lock().send_logic(message)
    }

    fn to_page(&self, page: PageId, message: ToRender) -> Result<()> {
        let inner = self.lock();
        let surface = inner
            .page(page)
            .ok_or(RuntimeError::PageNotFound(page))?
            .surface
            .as_ref()
            .ok_or(RuntimeError::RealmClosed)?;
        surface.deliver(message)
    }

    fn pages(&self) -> Vec<PageId> {
        self.lock().pages.iter().map(|p| p.id).collect()
    }
}

impl fmt::Debug for AppService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppService")
            .field("identity", &self.identity)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}
