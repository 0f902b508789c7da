//! Invoke and publish between an app's realms and the native side.
//!
//! Every invoke is recorded as a [`PendingInvocation`] keyed by its origin
//! and callback id. A [`Responder`] delivers by removing that record, so a
//! response reaches the realm at most once no matter how often a handler
//! answers, and a response racing teardown finds nothing and is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use pocket_protocol::{
    BridgeError, CallbackId, InvokeRequest, InvokeResponse, Origin, PageId, PublishMessage,
    ToLogic, ToRender,
};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::app::AppService;
use crate::error::Result;
use crate::queue::MainQueue;
use crate::registry::{ApiCall, ApiHandler, Dispatch, ModuleRegistry};

/// Where the bridge sends what it has to say to an app's realms.
pub trait RealmRouter: Send + Sync {
    fn to_logic(&self, message: ToLogic) -> Result<()>;

    fn to_page(&self, page: PageId, message: ToRender) -> Result<()>;

    /// Pages currently alive, bottom of the stack first.
    fn pages(&self) -> Vec<PageId>;
}

/// An invoke that has been sent but not yet answered.
#[derive(Debug, Clone)]
pub struct PendingInvocation {
    pub callback_id: CallbackId,
    pub event: String,
    pub origin: Origin,
    pub timestamp: Instant,
}

type Subscriber = Arc<dyn Fn(&PublishMessage, Origin) + Send + Sync>;

/// Handle returned by [`Bridge::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type PendingKey = (Origin, CallbackId);

/// The bridge of one app.
pub struct Bridge {
    app_label: String,
    registry: Arc<ModuleRegistry>,
    main: MainQueue,
    router: Weak<dyn RealmRouter>,
    app: Weak<AppService>,
    evaluate_timeout: Duration,
    pending: Mutex<HashMap<PendingKey, PendingInvocation>>,
    evaluations: Mutex<HashMap<CallbackId, (PageId, oneshot::Sender<InvokeResponse>)>>,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    self_ref: Weak<Bridge>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Bridge {
    pub fn new(
        app_label: impl Into<String>,
        registry: Arc<ModuleRegistry>,
        main: MainQueue,
        router: Weak<dyn RealmRouter>,
        app: Weak<AppService>,
        evaluate_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            app_label: app_label.into(),
            registry,
            main,
            router,
            app,
            evaluate_timeout,
            pending: Mutex::new(HashMap::new()),
            evaluations: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Invocations still waiting for an answer.
    pub fn pending(&self) -> Vec<PendingInvocation> {
        lock(&self.pending).values().cloned().collect()
    }

    /// Resolve and run the handler for `request`.
    ///
    /// Never fails: every outcome, including an unknown API name, becomes a
    /// response to the caller. A callback id that is still pending for the
    /// same origin is answered with `invalidParams` and the earlier
    /// invocation keeps running.
    pub fn invoke(&self, origin: Origin, request: InvokeRequest) {
        if self.is_closed() {
            tracing::debug!(
                app = %self.app_label,
                event = %request.event,
                "invoke after teardown dropped"
            );
            return;
        }
        {
            let key = (origin, request.callback_id);
            let mut pending = lock(&self.pending);
            if pending.contains_key(&key) {
                drop(pending);
                tracing::warn!(
                    app = %self.app_label,
                    callback_id = %request.callback_id,
                    "callback id already pending, invoke refused"
                );
                let error = BridgeError::InvalidParams(format!(
                    "callback id {} is already pending",
                    request.callback_id
                ));
                self.deliver(origin, InvokeResponse::failure(request.callback_id, &error));
                return;
            }
            pending.insert(
                key,
                PendingInvocation {
                    callback_id: request.callback_id,
                    event: request.event.clone(),
                    origin,
                    timestamp: Instant::now(),
                },
            );
        }

        let responder = Responder::new(self.self_ref.clone(), origin, request.callback_id);
        let Some(entry) = self.registry.resolve(&request.event) else {
            tracing::debug!(app = %self.app_label, event = %request.event, "unknown api");
            responder.fail(BridgeError::UnknownApi(request.event));
            return;
        };
        tracing::debug!(
            app = %self.app_label,
            event = %request.event,
            callback_id = %request.callback_id,
            "invoke"
        );

        let call = ApiCall::new(request.event, request.params, origin, self.app.clone());
        let handler = entry.handler;
        match entry.dispatch {
            Dispatch::Inline => run_handler(handler.as_ref(), call, responder),
            Dispatch::Main if self.main.is_closed() => {
                responder.fail(BridgeError::Internal("main queue closed".into()))
            }
            Dispatch::Main => {
                // If the worker vanished since the check, the dropped
                // responder answers for itself.
                let _ = self
                    .main
                    .dispatch(move || run_handler(handler.as_ref(), call, responder));
            }
        }
    }

    /// Deliver a response if its invocation is still pending.
    fn complete(&self, origin: Origin, response: InvokeResponse) -> bool {
        let Some(pending) = lock(&self.pending).remove(&(origin, response.callback_id)) else {
            tracing::debug!(
                app = %self.app_label,
                callback_id = %response.callback_id,
                "response without pending invocation dropped"
            );
            return false;
        };
        tracing::debug!(
            app = %self.app_label,
            event = %pending.event,
            callback_id = %response.callback_id,
            elapsed_ms = pending.timestamp.elapsed().as_millis() as u64,
            success = response.is_success(),
            "invoke answered"
        );
        self.deliver(origin, response)
    }

    /// Route a response back to the realm that asked.
    fn deliver(&self, origin: Origin, response: InvokeResponse) -> bool {
        let Some(router) = self.router.upgrade() else {
            return false;
        };
        let delivered = match origin {
            Origin::Logic => router.to_logic(ToLogic::Response(response)),
            Origin::Render(page) => router.to_page(page, ToRender::Response(response)),
        };
        if let Err(error) = delivered {
            tracing::debug!(app = %self.app_label, %error, "response undeliverable");
            return false;
        }
        true
    }

    /// Native to logic publish, optionally on behalf of one page.
    pub fn publish_to_logic(&self, message: PublishMessage, page: Option<PageId>) -> Result<()> {
        let router = self.router.upgrade().ok_or(crate::RuntimeError::RealmClosed)?;
        router.to_logic(ToLogic::Publish {
            message,
            page_id: page,
        })
    }

    /// Publish to the given pages, or to every page when `pages` is empty.
    ///
    /// A page that has gone away in the meantime is skipped.
    pub fn publish_to_pages(&self, message: PublishMessage, pages: &[PageId]) {
        let Some(router) = self.router.upgrade() else {
            return;
        };
        let targets = if pages.is_empty() {
            router.pages()
        } else {
            pages.to_vec()
        };
        for page in targets {
            if let Err(error) = router.to_page(page, ToRender::Publish(message.clone())) {
                tracing::debug!(app = %self.app_label, page_id = %page, %error, "publish skipped");
            }
        }
    }

    /// Listen natively to publishes coming out of either realm.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&PublishMessage, Origin) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers)
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let mut found = false;
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            found |= list.len() != before;
        }
        subscribers.retain(|_, list| !list.is_empty());
        found
    }

    /// Run native subscribers of `message.event`, in subscription order.
    pub fn notify(&self, origin: Origin, message: &PublishMessage) {
        let handlers: Vec<Subscriber> = lock(&self.subscribers)
            .get(&message.event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(message, origin);
        }
    }

    /// Evaluate `script` inside a page and wait for its answer.
    ///
    /// The wait is bounded by the configured evaluate timeout and never
    /// blocks a thread.
    pub async fn evaluate_in_page(
        &self,
        page: PageId,
        script: impl Into<String>,
    ) -> std::result::Result<Value, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::RealmClosed);
        }
        let router = self.router.upgrade().ok_or(BridgeError::RealmClosed)?;
        let callback_id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        lock(&self.evaluations).insert(callback_id, (page, tx));

        let sent = router.to_page(
            page,
            ToRender::Evaluate {
                callback_id,
                script: script.into(),
            },
        );
        drop(router);
        if let Err(error) = sent {
            lock(&self.evaluations).remove(&callback_id);
            return Err(error.into());
        }

        match tokio::time::timeout(self.evaluate_timeout, rx).await {
            Err(_) => {
                lock(&self.evaluations).remove(&callback_id);
                tracing::warn!(app = %self.app_label, page_id = %page, "evaluation timed out");
                Err(BridgeError::Timeout)
            }
            Ok(Err(_)) => Err(BridgeError::RealmClosed),
            Ok(Ok(response)) => match response.err_msg {
                Some(msg) if !msg.is_empty() => Err(parse_err_msg(&msg)),
                _ => Ok(response.data.unwrap_or(Value::Null)),
            },
        }
    }

    /// Hand an evaluation result to whoever is waiting for it.
    pub fn complete_evaluation(&self, page: PageId, response: InvokeResponse) -> bool {
        let mut evaluations = lock(&self.evaluations);
        match evaluations.get(&response.callback_id) {
            Some((expected, _)) if *expected == page => {}
            Some(_) => {
                tracing::warn!(
                    app = %self.app_label,
                    page_id = %page,
                    callback_id = %response.callback_id,
                    "evaluation answered by the wrong page"
                );
                return false;
            }
            None => return false,
        }
        match evaluations.remove(&response.callback_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Forget invocations that came from `origin`, e.g. an unloaded page.
    /// Their handlers may still answer; those answers are dropped.
    pub fn forget_origin(&self, origin: Origin) -> usize {
        let mut pending = lock(&self.pending);
        let before = pending.len();
        pending.retain(|(o, _), _| *o != origin);
        if let Origin::Render(page) = origin {
            lock(&self.evaluations).retain(|_, (p, _)| *p != page);
        }
        before - pending.len()
    }

    /// Drop everything in flight. Later responses are discarded silently.
    pub fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut pending = lock(&self.pending);
            let n = pending.len();
            pending.clear();
            n
        };
        lock(&self.evaluations).clear();
        lock(&self.subscribers).clear();
        tracing::debug!(app = %self.app_label, dropped, "bridge torn down");
    }
}

fn run_handler(handler: &dyn ApiHandler, call: ApiCall, responder: Responder) {
    let fallback = responder.clone();
    if let Err(error) = handler.call(call, responder) {
        fallback.fail(error);
    }
}

/// Split an `errMsg` back into its code and detail.
fn parse_err_msg(msg: &str) -> BridgeError {
    match msg.split_once(": ") {
        Some((code, message)) => BridgeError::custom(code, message),
        None => BridgeError::custom("evaluateFailed", msg),
    }
}

struct ResponderState {
    bridge: Weak<Bridge>,
    origin: Origin,
    callback_id: CallbackId,
    answered: AtomicBool,
}

impl Drop for ResponderState {
    fn drop(&mut self) {
        if !self.answered.load(Ordering::SeqCst) {
            if let Some(bridge) = self.bridge.upgrade() {
                let response = InvokeResponse::failure(
                    self.callback_id,
                    &BridgeError::Internal("handler dropped its callback".into()),
                );
                bridge.complete(self.origin, response);
            }
        }
    }
}

/// The one way a handler answers an invoke.
///
/// Clones share state: whichever answers first wins, later answers are
/// ignored. If every clone is dropped unanswered the caller receives an
/// `internal` error instead of waiting forever.
#[derive(Clone)]
pub struct Responder {
    state: Arc<ResponderState>,
}

impl Responder {
    fn new(bridge: Weak<Bridge>, origin: Origin, callback_id: CallbackId) -> Self {
        Self {
            state: Arc::new(ResponderState {
                bridge,
                origin,
                callback_id,
                answered: AtomicBool::new(false),
            }),
        }
    }

    pub fn callback_id(&self) -> CallbackId {
        self.state.callback_id
    }

    pub fn origin(&self) -> Origin {
        self.state.origin
    }

    /// True once any clone has answered.
    pub fn is_answered(&self) -> bool {
        self.state.answered.load(Ordering::SeqCst)
    }

    pub fn respond(&self, result: std::result::Result<Option<Value>, BridgeError>) {
        if self.state.answered.swap(true, Ordering::SeqCst) {
            tracing::debug!(callback_id = %self.state.callback_id, "duplicate callback suppressed");
            return;
        }
        let response = match result {
            Ok(data) => InvokeResponse::success(self.state.callback_id, data),
            Err(error) => InvokeResponse::failure(self.state.callback_id, &error),
        };
        if let Some(bridge) = self.state.bridge.upgrade() {
            bridge.complete(self.state.origin, response);
        }
    }

    pub fn success(&self, data: Option<Value>) {
        self.respond(Ok(data));
    }

    pub fn fail(&self, error: BridgeError) {
        self.respond(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ApiEntry;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        logic: Mutex<Vec<ToLogic>>,
        pages: Mutex<Vec<(PageId, ToRender)>>,
    }

    impl RealmRouter for Recorder {
        fn to_logic(&self, message: ToLogic) -> Result<()> {
            self.logic.lock().unwrap().push(message);
            Ok(())
        }

        fn to_page(&self, page: PageId, message: ToRender) -> Result<()> {
            if page == PageId(404) {
                return Err(crate::RuntimeError::PageNotFound(page));
            }
            self.pages.lock().unwrap().push((page, message));
            Ok(())
        }

        fn pages(&self) -> Vec<PageId> {
            vec![PageId(1), PageId(2)]
        }
    }

    impl Recorder {
        fn responses(&self) -> Vec<InvokeResponse> {
            self.logic
                .lock()
                .unwrap()
                .iter()
                .filter_map(|m| match m {
                    ToLogic::Response(r) => Some(r.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    struct Fixture {
        router: Arc<Recorder>,
        bridge: Arc<Bridge>,
        registry: Arc<ModuleRegistry>,
        worker: crate::queue::MainQueueWorker,
    }

    fn fixture() -> Fixture {
        let router = Arc::new(Recorder::default());
        let registry = Arc::new(ModuleRegistry::new());
        let (main, worker) = MainQueue::new();
        let weak: Weak<dyn RealmRouter> = Arc::downgrade(&router) as Weak<dyn RealmRouter>;
        let bridge = Bridge::new(
            "test",
            registry.clone(),
            main,
            weak,
            Weak::new(),
            Duration::from_millis(50),
        );
        Fixture {
            router,
            bridge,
            registry,
            worker,
        }
    }

    #[test]
    fn unknown_api_is_answered() {
        let f = fixture();
        f.bridge
            .invoke(Origin::Logic, InvokeRequest::new("nope", json!({}), 1));
        let responses = f.router.responses();
        assert_eq!(responses.len(), 1);
        assert!(responses[0]
            .err_msg
            .as_deref()
            .unwrap()
            .starts_with("unknownAPI"));
        assert!(f.bridge.pending().is_empty());
    }

    #[test]
    fn double_callback_is_suppressed() {
        let f = fixture();
        f.registry.register_builtin(
            "twice",
            ApiEntry::new(|_call: ApiCall, responder: Responder| {
                let again = responder.clone();
                responder.success(Some(json!(1)));
                again.success(Some(json!(2)));
                Ok(())
            }),
        );
        f.bridge
            .invoke(Origin::Logic, InvokeRequest::new("twice", json!({}), 7));
        let responses = f.router.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].data, Some(json!(1)));
    }

    #[test]
    fn handler_error_becomes_err_msg() {
        let f = fixture();
        f.registry.register_builtin(
            "strict",
            ApiEntry::new(|call: ApiCall, _responder: Responder| {
                call.param::<String>("url").map(|_| ())
            }),
        );
        f.bridge
            .invoke(Origin::Logic, InvokeRequest::new("strict", json!({}), 3));
        let responses = f.router.responses();
        assert_eq!(responses.len(), 1);
        assert!(responses[0]
            .err_msg
            .as_deref()
            .unwrap()
            .starts_with("invalidParams"));
    }

    #[test]
    fn dropped_responder_answers_internal() {
        let f = fixture();
        f.registry.register_builtin(
            "forgetful",
            ApiEntry::new(|_call: ApiCall, _responder: Responder| Ok(())),
        );
        f.bridge
            .invoke(Origin::Logic, InvokeRequest::new("forgetful", json!({}), 3));
        let responses = f.router.responses();
        assert_eq!(responses.len(), 1);
        assert!(responses[0]
            .err_msg
            .as_deref()
            .unwrap()
            .starts_with("internal"));
    }

    #[test]
    fn teardown_drops_late_responses() {
        let f = fixture();
        let parked = Arc::new(Mutex::new(None));
        let slot = parked.clone();
        f.registry.register_builtin(
            "slow",
            ApiEntry::new(move |_call: ApiCall, responder: Responder| {
                *slot.lock().unwrap() = Some(responder);
                Ok(())
            }),
        );
        f.bridge
            .invoke(Origin::Logic, InvokeRequest::new("slow", json!({}), 11));
        assert_eq!(f.bridge.pending().len(), 1);
        f.bridge.teardown();
        let responder = parked.lock().unwrap().take().unwrap();
        responder.success(None);
        drop(responder);
        assert!(f.router.responses().is_empty());
        f.bridge
            .invoke(Origin::Logic, InvokeRequest::new("slow", json!({}), 12));
        assert!(f.bridge.pending().is_empty());
    }

    #[test]
    fn main_dispatch_waits_for_queue() {
        let mut f = fixture();
        f.registry.register_builtin(
            "ui",
            ApiEntry::immediate(|_| Ok(Some(json!("done")))).on_main(),
        );
        f.bridge.invoke(
            Origin::Render(PageId(2)),
            InvokeRequest::new("ui", json!({}), 1),
        );
        assert!(f.router.pages.lock().unwrap().is_empty());
        assert_eq!(f.worker.drain(), 1);
        let pages = f.router.pages.lock().unwrap();
        match &pages[..] {
            [(PageId(2), ToRender::Response(r))] => assert_eq!(r.data, Some(json!("done"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn callback_ids_are_scoped_by_origin() {
        let f = fixture();
        f.registry
            .register_builtin("echo", ApiEntry::immediate(|c| Ok(Some(c.params.clone()))));
        let parked = Arc::new(Mutex::new(Vec::new()));
        let slot = parked.clone();
        f.registry.register_builtin(
            "hold",
            ApiEntry::new(move |_c: ApiCall, r: Responder| {
                slot.lock().unwrap().push(r);
                Ok(())
            }),
        );
        f.bridge
            .invoke(Origin::Logic, InvokeRequest::new("hold", json!({}), 1));
        f.bridge.invoke(
            Origin::Render(PageId(1)),
            InvokeRequest::new("hold", json!({}), 1),
        );
        assert_eq!(f.bridge.pending().len(), 2);
        assert_eq!(f.bridge.forget_origin(Origin::Render(PageId(1))), 1);
        parked.lock().unwrap().clear();
        assert_eq!(f.router.responses().len(), 1);
        assert!(f.router.pages.lock().unwrap().is_empty());
    }

    #[test]
    fn publish_to_all_pages_and_subscribers() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = f.bridge.subscribe("pageReady", move |msg, origin| {
            sink.lock().unwrap().push((msg.data.clone(), origin));
        });
        let msg = PublishMessage::new("pageReady", json!({"n": 1}));
        f.bridge.notify(Origin::Render(PageId(1)), &msg);
        assert!(f.bridge.unsubscribe(id));
        f.bridge.notify(Origin::Render(PageId(1)), &msg);
        assert_eq!(seen.lock().unwrap().len(), 1);

        f.bridge
            .publish_to_pages(PublishMessage::new("tick", json!(1)), &[]);
        f.bridge
            .publish_to_pages(PublishMessage::new("tick", json!(2)), &[PageId(404)]);
        assert_eq!(f.router.pages.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn evaluate_round_trip_and_timeout() {
        let f = fixture();
        let bridge = f.bridge.clone();
        let router = f.router.clone();
        let answer = tokio::spawn(async move {
            loop {
                let sent = router.pages.lock().unwrap().pop();
                if let Some((page, ToRender::Evaluate { callback_id, .. })) = sent {
                    bridge.complete_evaluation(
                        page,
                        InvokeResponse::success(callback_id, Some(json!(42))),
                    );
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        let value = f.bridge.evaluate_in_page(PageId(1), "answer").await.unwrap();
        assert_eq!(value, json!(42));
        answer.await.unwrap();

        let err = f.bridge.evaluate_in_page(PageId(1), "never").await.unwrap_err();
        assert_eq!(err, BridgeError::Timeout);

        let err = f.bridge.evaluate_in_page(PageId(404), "x").await.unwrap_err();
        assert_eq!(err.code(), "pageNotFound");
    }

    #[test]
    fn evaluate_failure_keeps_code() {
        let err = parse_err_msg("evaluateUnsupported: this surface cannot evaluate scripts");
        assert_eq!(err.code(), "evaluateUnsupported");
        assert_eq!(
            err.to_err_msg(),
            "evaluateUnsupported: this surface cannot evaluate scripts"
        );
    }
}
