//! Replays a [`Session`] against an [`Engine`] and reports what crossed the
//! bridge.
//!
//! Logic realms are plain channels, since there is no script engine behind
//! them. Render realms are in-process [`RenderSurface`]s, so batches are
//! really applied and queries, evaluations and render errors really come
//! back. Every step is followed by a settle pass over the main queue, after
//! which the traffic it caused is written out as JSON lines.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pocket_protocol::{
    BridgeError, FromLogic, FromRender, InvokeRequest, PageId, PublishMessage, ToRender,
};
use pocket_render::{NodeTree, RenderSurface};
use pocket_runtime::{
    AppIdentity, AppService, ChannelLogicRealm, Engine, LaunchOptions, LocalRenderRealm,
    LogicRealm, LogicTraffic, MainQueueWorker, PresentationHost, RenderRealm, RenderTraffic,
    RuntimeConfig,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{HostError, Result};
use crate::session::{AppRef, Session, Step};

const SETTLE_ROUNDS: usize = 3;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One output line.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum Record<'a> {
    Logic(&'a LogicTraffic),
    Render(&'a RenderTraffic),
    #[serde(rename_all = "camelCase")]
    Present { app: String, page_id: PageId },
    Dismiss { app: String },
    #[serde(rename_all = "camelCase")]
    Evaluated { page_id: PageId, value: &'a Value },
    Error { step: usize, message: String },
}

enum Presentation {
    Present(AppIdentity, PageId),
    Dismiss(AppIdentity),
}

/// Remembers presentation calls until the next flush.
#[derive(Default)]
struct RecordingPresenter {
    events: Mutex<Vec<Presentation>>,
}

impl PresentationHost for RecordingPresenter {
    fn present(&self, app: &AppIdentity, page: PageId) {
        tracing::info!(%app, page_id = %page, "present");
        lock(&self.events).push(Presentation::Present(app.clone(), page));
    }

    fn dismiss(&self, app: &AppIdentity) {
        tracing::info!(%app, "dismiss");
        lock(&self.events).push(Presentation::Dismiss(app.clone()));
    }
}

/// The script language of local surfaces: `len`, `text <id>`, `node <id>`.
fn inspect(script: &str, tree: &NodeTree) -> std::result::Result<Value, BridgeError> {
    let unsupported =
        || BridgeError::custom("evaluateUnsupported", format!("unsupported script `{}`", script));
    let command = script.split_whitespace().next().ok_or_else(unsupported)?;
    let node = || -> std::result::Result<_, BridgeError> {
        let id: u64 = script
            .split_whitespace()
            .nth(1)
            .and_then(|w| w.parse().ok())
            .ok_or_else(|| BridgeError::InvalidParams(format!("`{}` needs a node id", command)))?;
        tree.get(id)
            .ok_or_else(|| BridgeError::ResourceNotFound(format!("node {}", id)))
    };
    match command {
        "len" => Ok(json!(tree.len())),
        "text" => Ok(json!(node()?.text)),
        "node" => {
            let node = node()?;
            Ok(json!({
                "id": node.id,
                "tag": node.tag,
                "className": node.class_name,
                "text": node.text,
                "children": node.children,
            }))
        }
        _ => Err(unsupported()),
    }
}

/// Drives one engine through scripted steps, writing JSON lines to `out`.
pub struct Host<W: Write> {
    engine: Engine,
    out: W,
    logic_rx: mpsc::UnboundedReceiver<LogicTraffic>,
    render_rx: mpsc::UnboundedReceiver<RenderTraffic>,
    presenter: Arc<RecordingPresenter>,
    realms: Arc<Mutex<HashMap<Uuid, Arc<LocalRenderRealm>>>>,
    /// Surface that last loaded each page.
    surfaces: HashMap<PageId, Uuid>,
}

impl<W: Write> Host<W> {
    /// The host and the main queue worker it needs running.
    pub fn new(config: RuntimeConfig, out: W) -> Result<(Self, MainQueueWorker)> {
        let (logic_tx, logic_rx) = mpsc::unbounded_channel();
        let (render_tx, render_rx) = mpsc::unbounded_channel();
        let realms = Arc::new(Mutex::new(HashMap::new()));
        let registered = realms.clone();

        let (engine, worker) = Engine::new(
            config,
            Box::new(move || {
                Ok(Box::new(ChannelLogicRealm::attached(logic_tx.clone())) as Box<dyn LogicRealm>)
            }),
            Box::new(move || {
                let realm = Arc::new(
                    LocalRenderRealm::new(RenderSurface::new().with_evaluator(inspect))
                        .with_tap(render_tx.clone()),
                );
                lock(&registered).insert(realm.id(), realm.clone());
                Ok(Box::new(realm) as Box<dyn RenderRealm>)
            }),
        )?;

        let host = Self {
            engine,
            out,
            logic_rx,
            render_rx,
            presenter: Arc::new(RecordingPresenter::default()),
            realms,
            surfaces: HashMap::new(),
        };
        Ok((host, worker))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run every step. A failing step is reported and the session goes on;
    /// the number of failed steps is returned.
    pub async fn run(&mut self, session: Session) -> Result<usize> {
        let mut failures = 0;
        for (index, step) in session.steps.into_iter().enumerate() {
            tracing::debug!(step = index, "running step");
            let outcome = self.step(step).await;
            self.settle().await;
            self.flush()?;
            if let Err(error) = outcome {
                tracing::warn!(step = index, %error, "step failed");
                failures += 1;
                self.emit(&Record::Error {
                    step: index,
                    message: error.to_string(),
                })?;
            }
        }
        Ok(failures)
    }

    /// Exit every app and report the teardown traffic.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.engine.shutdown();
        self.settle().await;
        self.flush()
    }

    fn app(&self, app: &AppRef) -> Result<Arc<AppService>> {
        let identity = app.identity();
        self.engine
            .get(&identity)
            .ok_or_else(|| HostError::UnknownApp(identity.to_string()))
    }

    fn page(app: &AppService, page: Option<PageId>) -> Result<PageId> {
        match page {
            Some(page) => Ok(page),
            None => app
                .active_page()
                .map(|p| p.page_id)
                .ok_or_else(|| HostError::NoActivePage(app.identity().to_string())),
        }
    }

    async fn step(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Launch {
                app,
                path,
                query,
                relaunch,
            } => {
                let mut options = LaunchOptions::new(path)
                    .with_query(query)
                    .presented_by(self.presenter.clone());
                if relaunch {
                    options = options.relaunch();
                }
                self.engine.launch(app.identity(), options)?;
            }
            Step::Show { app } => self.engine.show(&app.identity())?,
            Step::Hide { app } => self.engine.hide(&app.identity())?,
            Step::Exit { app } => {
                self.engine.exit(&app.identity())?;
            }
            Step::Invoke {
                app,
                event,
                params,
                callback_id,
                from_page,
            } => {
                let app = self.app(&app)?;
                let request = InvokeRequest::new(event, params, callback_id);
                match from_page {
                    Some(page) => app.handle_render_message(page, FromRender::Invoke(request))?,
                    None => app.handle_logic_message(FromLogic::Invoke(request))?,
                }
            }
            Step::Publish {
                app,
                event,
                data,
                page_ids,
                from_page,
            } => {
                let app = self.app(&app)?;
                let message = PublishMessage::new(event, data);
                match from_page {
                    Some(page) => app.handle_render_message(page, FromRender::Publish(message))?,
                    None => app.handle_logic_message(FromLogic::Publish { message, page_ids })?,
                }
            }
            Step::Render {
                app,
                page_id,
                batch,
            } => {
                let app = self.app(&app)?;
                let page_id = Self::page(&app, page_id)?;
                app.handle_logic_message(FromLogic::Render { page_id, batch })?;
            }
            Step::Canvas {
                app,
                page_id,
                batch,
            } => {
                let app = self.app(&app)?;
                let page_id = Self::page(&app, page_id)?;
                app.handle_logic_message(FromLogic::Canvas { page_id, batch })?;
            }
            Step::Evaluate {
                app,
                page_id,
                script,
            } => {
                let app = self.app(&app)?;
                let page_id = Self::page(&app, page_id)?;
                let value = app.evaluate_in_page(page_id, script).await?;
                self.emit(&Record::Evaluated {
                    page_id,
                    value: &value,
                })?;
            }
            Step::Reclaim { app, page_id } => {
                let app = self.app(&app)?;
                let page = Self::page(&app, page_id)?;
                self.realm_of(page)?.reclaimer().reclaim();
                tracing::info!(app = %app.identity(), page_id = %page, "surface reclaimed");
            }
            Step::Layout {
                app,
                page_id,
                viewport,
                boxes,
            } => {
                let app = self.app(&app)?;
                let page = Self::page(&app, page_id)?;
                let reported = self.realm_of(page)?.layout(viewport, &boxes)?;
                tracing::debug!(page_id = %page, reported, "layout applied");
            }
            Step::HostEvent { event } => self.engine.handle_host_event(event),
        }
        Ok(())
    }

    /// The local realm that last loaded `page`.
    fn realm_of(&mut self, page: PageId) -> Result<Arc<LocalRenderRealm>> {
        self.drain_render()?;
        self.surfaces
            .get(&page)
            .and_then(|realm| lock(&self.realms).get(realm).cloned())
            .ok_or(HostError::NotLocal(page.0))
    }

    /// Let the main queue and spawned handlers catch up.
    async fn settle(&self) {
        for _ in 0..SETTLE_ROUNDS {
            let (tx, rx) = oneshot::channel();
            let queued = self.engine.context().main_queue().dispatch(move || {
                let _ = tx.send(());
            });
            if queued.is_err() {
                return;
            }
            let _ = rx.await;
            tokio::task::yield_now().await;
        }
    }

    fn emit(&mut self, record: &Record<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn drain_render(&mut self) -> Result<()> {
        while let Ok(traffic) = self.render_rx.try_recv() {
            if let (Some(page), ToRender::Load { .. }) = (traffic.page_id, &traffic.message) {
                self.surfaces.insert(page, traffic.realm);
            }
            self.emit(&Record::Render(&traffic))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let presented: Vec<Presentation> = lock(&self.presenter.events).drain(..).collect();
        for event in presented {
            let record = match event {
                Presentation::Present(app, page_id) => Record::Present {
                    app: app.to_string(),
                    page_id,
                },
                Presentation::Dismiss(app) => Record::Dismiss {
                    app: app.to_string(),
                },
            };
            self.emit(&record)?;
        }
        while let Ok(traffic) = self.logic_rx.try_recv() {
            self.emit(&Record::Logic(&traffic))?;
        }
        self.drain_render()?;
        self.out.flush()?;
        Ok(())
    }
}

/// Replay `session` on a fresh engine, then shut it down.
pub async fn run_session<W: Write>(
    config: RuntimeConfig,
    session: Session,
    out: W,
) -> Result<usize> {
    let (mut host, worker) = Host::new(config, out)?;
    let worker = tokio::spawn(worker.run());
    let failures = host.run(session).await?;
    host.shutdown().await?;
    drop(host);
    if let Err(error) = worker.await {
        tracing::warn!(%error, "main queue worker ended abnormally");
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(out: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn kinds<'a>(lines: &'a [Value], kind: &str) -> Vec<&'a Value> {
        lines.iter().filter(|l| l["kind"] == kind).collect()
    }

    #[test]
    fn inspect_scripts() {
        let tree = NodeTree::new();
        assert_eq!(inspect("len", &tree).unwrap(), json!(1));
        assert_eq!(inspect("node 0", &tree).unwrap()["id"], 0);
        assert_eq!(inspect("text 9", &tree).unwrap_err().code(), "resourceNotFound");
        assert_eq!(inspect("text", &tree).unwrap_err().code(), "invalidParams");
        assert_eq!(inspect("rm -rf", &tree).unwrap_err().code(), "evaluateUnsupported");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_round_trip() {
        let session = Session::from_json_str(
            r#"{"steps": [
                {"step": "launch", "appId": "wx1", "path": "pages/index?id=3"},
                {"step": "render", "appId": "wx1", "batch": [[0, 0, 1, "text", null], [2, 1, "hi"]]},
                {"step": "evaluate", "appId": "wx1", "script": "text 1"},
                {"step": "invoke", "appId": "wx1", "event": "navigateTo",
                 "params": {"url": "pages/b"}, "callbackId": 1},
                {"step": "invoke", "appId": "wx9", "event": "getSystemInfo", "callbackId": 2},
                {"step": "exit", "appId": "wx1"}
            ]}"#,
        )
        .unwrap();
        let mut out = Vec::new();
        let failures = run_session(RuntimeConfig::default(), session, &mut out)
            .await
            .unwrap();
        assert_eq!(failures, 1);

        let lines = lines(&out);
        let evaluated = kinds(&lines, "evaluated");
        assert_eq!(evaluated.len(), 1);
        assert_eq!(evaluated[0]["value"], "hi");

        let response = kinds(&lines, "logic")
            .into_iter()
            .find(|l| l["message"]["type"] == "response")
            .unwrap();
        assert_eq!(response["message"]["callbackId"], 1);
        assert!(response["message"]["data"]["pageId"].is_u64());

        assert_eq!(kinds(&lines, "present").len(), 2);
        assert_eq!(kinds(&lines, "dismiss").len(), 1);
        let errors = kinds(&lines, "error");
        assert_eq!(errors[0]["step"], 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reclaimed_page_reloads_on_show() {
        let session = Session::from_json_str(
            r#"{"steps": [
                {"step": "launch", "appId": "wx1"},
                {"step": "hide", "appId": "wx1"},
                {"step": "reclaim", "appId": "wx1"},
                {"step": "show", "appId": "wx1"}
            ]}"#,
        )
        .unwrap();
        let mut out = Vec::new();
        assert_eq!(
            run_session(RuntimeConfig::default(), session, &mut out)
                .await
                .unwrap(),
            0
        );
        let lines = lines(&out);
        let loads: Vec<&Value> = kinds(&lines, "render")
            .into_iter()
            .filter(|l| l["message"]["type"] == "load")
            .collect();
        assert_eq!(loads.len(), 2);
        assert_ne!(loads[0]["realm"], loads[1]["realm"]);
        assert_eq!(loads[0]["pageId"], loads[1]["pageId"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn layout_reports_intersections_to_logic() {
        let session = Session::from_json_str(
            r#"{"steps": [
                {"step": "launch", "appId": "wx1"},
                {"step": "render", "appId": "wx1", "batch": [
                    [0, 0, 1, "view", null],
                    [10, 5, {"target": "view"}]
                ]},
                {"step": "layout", "appId": "wx1",
                 "viewport": {"left": 0, "top": 0, "width": 100, "height": 100},
                 "boxes": [[1, {"left": 0, "top": 0, "width": 10, "height": 10}]]},
                {"step": "layout", "appId": "wx1",
                 "viewport": {"left": 0, "top": 0, "width": 100, "height": 100},
                 "boxes": [[1, {"left": 0, "top": 0, "width": 10, "height": 10}]]}
            ]}"#,
        )
        .unwrap();
        let mut out = Vec::new();
        assert_eq!(
            run_session(RuntimeConfig::default(), session, &mut out)
                .await
                .unwrap(),
            0
        );
        let lines = lines(&out);
        let reports: Vec<&Value> = kinds(&lines, "logic")
            .into_iter()
            .filter(|l| l["message"]["type"] == "intersection")
            .collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["message"]["entries"][0]["observerId"], 5);
        assert!(reports[0]["message"]["pageId"].is_u64());
    }
}
