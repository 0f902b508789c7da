#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use pocket_protocol::{BridgeError, InvokeResponse, PageId, PublishMessage, ToLogic, ToRender};
use pocket_render::RenderSurface;
use pocket_runtime::{
    AppIdentity, ChannelLogicRealm, Engine, Environment, LaunchOptions, LocalRenderRealm,
    LogicRealm, LogicTraffic, MainQueueWorker, PresentationHost, Reclaimer, RenderRealm,
    RenderTraffic, RuntimeConfig,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Default)]
pub struct Presenter {
    pub presented: Mutex<Vec<(AppIdentity, PageId)>>,
    pub dismissed: Mutex<Vec<AppIdentity>>,
}

impl PresentationHost for Presenter {
    fn present(&self, app: &AppIdentity, page: PageId) {
        self.presented.lock().unwrap().push((app.clone(), page));
    }

    fn dismiss(&self, app: &AppIdentity) {
        self.dismissed.lock().unwrap().push(app.clone());
    }
}

pub struct Harness {
    pub engine: Engine,
    pub worker: Option<MainQueueWorker>,
    pub logic_rx: UnboundedReceiver<LogicTraffic>,
    pub render_rx: UnboundedReceiver<RenderTraffic>,
    pub realms: Arc<Mutex<Vec<Arc<LocalRenderRealm>>>>,
    pub presenter: Arc<Presenter>,
}

/// Evaluates `"title"` to the text of node 1 and anything else to an error.
fn evaluator(script: &str, tree: &pocket_render::NodeTree) -> Result<Value, BridgeError> {
    match script {
        "title" => Ok(json!(tree.get(1).and_then(|n| n.text.clone()))),
        "echo" => Ok(json!("echo")),
        other => Err(BridgeError::custom("scriptError", format!("cannot run {}", other))),
    }
}

pub fn harness(config: RuntimeConfig) -> Harness {
    let (logic_tx, logic_rx) = tokio::sync::mpsc::unbounded_channel();
    let (render_tx, render_rx) = tokio::sync::mpsc::unbounded_channel();
    let realms = Arc::new(Mutex::new(Vec::new()));
    let created = realms.clone();
    let (engine, worker) = Engine::new(
        config,
        Box::new(move || {
            Ok(Box::new(ChannelLogicRealm::attached(logic_tx.clone())) as Box<dyn LogicRealm>)
        }),
        Box::new(move || {
            let realm = Arc::new(
                LocalRenderRealm::new(RenderSurface::new().with_evaluator(evaluator))
                    .with_tap(render_tx.clone()),
            );
            created.lock().unwrap().push(realm.clone());
            Ok(Box::new(realm) as Box<dyn RenderRealm>)
        }),
    )
    .unwrap();
    Harness {
        engine,
        worker: Some(worker),
        logic_rx,
        render_rx,
        realms,
        presenter: Arc::new(Presenter::default()),
    }
}

pub fn wx(app_id: &str) -> AppIdentity {
    AppIdentity::new(app_id, Environment::Production)
}

impl Harness {
    pub fn options(&self, path: &str) -> LaunchOptions {
        LaunchOptions::new(path).presented_by(self.presenter.clone())
    }

    pub fn drain_main(&mut self) -> usize {
        self.worker.as_mut().map_or(0, |w| w.drain())
    }

    pub fn logic_messages(&mut self) -> Vec<ToLogic> {
        let mut out = Vec::new();
        while let Ok(traffic) = self.logic_rx.try_recv() {
            out.push(traffic.message);
        }
        out
    }

    pub fn render_traffic(&mut self) -> Vec<RenderTraffic> {
        let mut out = Vec::new();
        while let Ok(traffic) = self.render_rx.try_recv() {
            out.push(traffic);
        }
        out
    }

    pub fn realm(&self, id: Uuid) -> Arc<LocalRenderRealm> {
        self.realms
            .lock()
            .unwrap()
            .iter()
            .find(|realm| realm.id() == id)
            .cloned()
            .unwrap()
    }

    pub fn reclaimer_of(&self, realm: Uuid) -> Reclaimer {
        self.realm(realm).reclaimer()
    }

    /// The realm that last loaded `page`. Drains pending render traffic.
    pub fn realm_of(&mut self, page: PageId) -> Arc<LocalRenderRealm> {
        let traffic = self.render_traffic();
        let id = load_realm(&traffic, page).unwrap();
        self.realm(id)
    }
}

/// Event names of the publishes in `messages`, in order.
pub fn events(messages: &[ToLogic]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ToLogic::Publish { message, .. } => Some(message.event.clone()),
            _ => None,
        })
        .collect()
}

pub fn publishes(messages: &[ToLogic]) -> Vec<(PublishMessage, Option<PageId>)> {
    messages
        .iter()
        .filter_map(|m| match m {
            ToLogic::Publish { message, page_id } => Some((message.clone(), *page_id)),
            _ => None,
        })
        .collect()
}

pub fn responses(messages: &[ToLogic]) -> Vec<InvokeResponse> {
    messages
        .iter()
        .filter_map(|m| match m {
            ToLogic::Response(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

/// The realm that received the `Load` for `page`, most recent first.
pub fn load_realm(traffic: &[RenderTraffic], page: PageId) -> Option<Uuid> {
    traffic
        .iter()
        .rev()
        .find(|t| t.page_id == Some(page) && matches!(t.message, ToRender::Load { .. }))
        .map(|t| t.realm)
}
