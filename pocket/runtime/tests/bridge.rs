//! Realm traffic flowing through a live app.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{harness, publishes, responses, wx};
use pocket_protocol::{
    FromLogic, FromRender, InvokeRequest, ObserverOptions, Origin, PageId, PublishMessage,
    QueryFields, Rect, RenderBatch, RenderInstruction, SelectorQuery, ToLogic, ToRender, ROOT_NODE,
};
use pocket_runtime::{ApiCall, ApiEntry, AppState, Responder, RuntimeConfig};
use serde_json::{json, Map, Value};

fn invoke(event: &str, params: Value, id: u64) -> FromLogic {
    FromLogic::Invoke(InvokeRequest::new(event, params, id))
}

#[test]
fn navigate_to_runs_on_the_main_queue() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    h.logic_messages();

    app.handle_logic_message(invoke("navigateTo", json!({"url": "pages/b?id=7"}), 1))
        .unwrap();
    assert_eq!(app.current_pages().len(), 1);
    assert_eq!(app.bridge().pending().len(), 1);

    assert_eq!(h.drain_main(), 1);
    let pages = app.current_pages();
    assert_eq!(pages.len(), 2);
    let answers = responses(&h.logic_messages());
    assert_eq!(answers.len(), 1);
    assert!(answers[0].is_success());
    assert_eq!(answers[0].data, Some(json!({"pageId": pages[1].page_id})));
    assert!(app.bridge().pending().is_empty());
}

#[test]
fn duplicate_callback_id_is_refused_while_pending() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    h.logic_messages();

    app.handle_logic_message(invoke("navigateTo", json!({"url": "pages/b"}), 4))
        .unwrap();
    app.handle_logic_message(invoke("navigateTo", json!({"url": "pages/c"}), 4))
        .unwrap();
    let refused = responses(&h.logic_messages());
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].callback_id.0, 4);
    assert!(refused[0]
        .err_msg
        .as_deref()
        .unwrap()
        .starts_with("invalidParams"));
    assert_eq!(app.bridge().pending().len(), 1);

    assert_eq!(h.drain_main(), 1);
    let answers = responses(&h.logic_messages());
    assert_eq!(answers.len(), 1);
    assert!(answers[0].is_success());
    assert_eq!(app.current_pages()[1].route, "pages/b");
}

#[test]
fn route_errors_come_back_as_err_msg() {
    let mut h = harness(RuntimeConfig {
        max_page_stack: 1,
        ..RuntimeConfig::default()
    });
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    h.logic_messages();

    app.handle_logic_message(invoke("navigateTo", json!({"url": "pages/b"}), 1))
        .unwrap();
    app.handle_logic_message(invoke("navigateTo", json!({}), 2))
        .unwrap();
    app.handle_logic_message(invoke("noSuchApi", json!({}), 3))
        .unwrap();
    h.drain_main();

    let answers = responses(&h.logic_messages());
    let err = |id: u64| {
        answers
            .iter()
            .find(|r| r.callback_id.0 == id)
            .and_then(|r| r.err_msg.clone())
            .unwrap()
    };
    assert!(err(1).starts_with("pageStackOverflow"));
    assert!(err(2).starts_with("invalidParams"));
    assert!(err(3).starts_with("unknownAPI"));
}

#[test]
fn current_pages_and_system_info_answer_inline() {
    let mut config = RuntimeConfig::default();
    config
        .system_info
        .insert("platform".into(), json!("linux"));
    let mut h = harness(config);
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    h.logic_messages();

    app.handle_logic_message(invoke("getCurrentPages", Value::Null, 1))
        .unwrap();
    app.handle_logic_message(invoke("getSystemInfo", Value::Null, 2))
        .unwrap();
    app.handle_logic_message(invoke("getSystemInfo", Value::Null, 3))
        .unwrap();
    assert_eq!(h.drain_main(), 0);

    let answers = responses(&h.logic_messages());
    assert_eq!(answers.len(), 3);
    assert_eq!(answers[0].data.as_ref().unwrap()[0]["route"], "pages/index");
    let info = answers[1].data.clone().unwrap();
    assert_eq!(info["platform"], "linux");
    assert_eq!(info["appId"], "a");
    assert_eq!(info["env"], "production");
    assert_eq!(answers[2].data, Some(info));
    assert_eq!(app.modules().len(), 1);
}

#[test]
fn extra_api_shadows_builtin() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    h.engine.registry().register_extra(
        "getSystemInfo",
        ApiEntry::immediate(|_| Ok(Some(json!({"custom": true})))),
    );
    h.logic_messages();

    app.handle_logic_message(invoke("getSystemInfo", Value::Null, 1))
        .unwrap();
    h.engine.registry().unregister_extra("getSystemInfo");
    app.handle_logic_message(invoke("getSystemInfo", Value::Null, 2))
        .unwrap();

    let answers = responses(&h.logic_messages());
    assert_eq!(answers[0].data, Some(json!({"custom": true})));
    assert_eq!(answers[1].data.as_ref().unwrap()["appId"], "a");
}

#[test]
fn selector_query_reply_reaches_logic_with_page() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    let page = app.current_pages()[0].page_id;
    h.logic_messages();

    let batch = RenderBatch::new(vec![
        RenderInstruction::InsertBefore {
            parent: ROOT_NODE,
            node: 1,
            tag: "text".into(),
            anchor: None,
        },
        RenderInstruction::UpdateAttribute {
            node: 1,
            name: "id".into(),
            value: Some(json!("title")),
        },
        RenderInstruction::RunSelectorQuery {
            query_id: 5,
            queue: vec![SelectorQuery {
                selector: "#title".into(),
                single: false,
                fields: QueryFields {
                    id: true,
                    ..QueryFields::default()
                },
            }],
        },
    ]);
    app.handle_logic_message(FromLogic::Render {
        page_id: page,
        batch,
    })
    .unwrap();
    assert_eq!(h.drain_main(), 1);

    match &h.logic_messages()[..] {
        [ToLogic::QueryReply {
            page_id,
            query_id,
            results,
        }] => {
            assert_eq!(*page_id, page);
            assert_eq!(*query_id, 5);
            assert_eq!(results.len(), 1);
        }
        other => panic!("unexpected traffic {:?}", other),
    }
}

#[test]
fn layout_intersections_reach_logic_with_page() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    let page = app.current_pages()[0].page_id;
    app.handle_logic_message(FromLogic::Render {
        page_id: page,
        batch: RenderBatch::new(vec![
            RenderInstruction::InsertBefore {
                parent: ROOT_NODE,
                node: 1,
                tag: "view".into(),
                anchor: None,
            },
            RenderInstruction::AddIntersectionObserver {
                observer_id: 9,
                options: ObserverOptions {
                    target: "view".into(),
                    thresholds: vec![0.0],
                    root_margin: Default::default(),
                    observe_all: false,
                },
            },
        ]),
    })
    .unwrap();
    h.logic_messages();

    let realm = h.realm_of(page);
    let viewport = Rect::new(0.0, 0.0, 100.0, 100.0);
    assert!(realm
        .layout(viewport, &[(1, Rect::new(10.0, 10.0, 20.0, 20.0))])
        .unwrap());
    assert_eq!(h.drain_main(), 1);

    match &h.logic_messages()[..] {
        [ToLogic::Intersection { page_id, entries }] => {
            assert_eq!(*page_id, page);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].observer_id, 9);
            assert_eq!(entries[0].node, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn render_to_unknown_page_fails() {
    let h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    let result = app.handle_logic_message(FromLogic::Render {
        page_id: PageId(u64::MAX),
        batch: RenderBatch::new(vec![]),
    });
    assert!(result.is_err());
}

#[test]
fn publish_crosses_between_realms() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    let first = app.current_pages()[0].page_id;
    let second = app.navigate_to("pages/b").unwrap();
    h.logic_messages();
    h.render_traffic();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    app.bridge().subscribe("tap", move |message: &PublishMessage, origin: Origin| {
        sink.lock().unwrap().push((origin, message.data.clone()));
    });

    let tap = PublishMessage::new("tap", json!({"x": 1}));
    app.handle_render_message(second, FromRender::Publish(tap))
        .unwrap();
    let forwarded = publishes(&h.logic_messages());
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].0.event, "tap");
    assert_eq!(forwarded[0].1, Some(second));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(Origin::Render(second), json!({"x": 1}))]
    );

    app.handle_logic_message(FromLogic::Publish {
        message: PublishMessage::new("theme", json!("dark")),
        page_ids: vec![],
    })
    .unwrap();
    let mut reached: Vec<PageId> = h
        .render_traffic()
        .into_iter()
        .filter(|t| matches!(&t.message, ToRender::Publish(m) if m.event == "theme"))
        .filter_map(|t| t.page_id)
        .collect();
    reached.sort();
    assert_eq!(reached, vec![first, second]);
}

#[test]
fn exit_mini_program_answers_before_tearing_down() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    h.logic_messages();

    app.handle_logic_message(invoke("exitMiniProgram", Value::Null, 1))
        .unwrap();
    h.drain_main();

    let messages = h.logic_messages();
    match messages.first() {
        Some(ToLogic::Response(r)) => assert!(r.is_success()),
        other => panic!("expected the response first, got {:?}", other),
    }
    assert_eq!(app.state(), AppState::Exited);
    assert!(h.engine.running().is_empty());
}

#[test]
fn closing_a_page_forgets_its_pending_invocations() {
    let mut h = harness(RuntimeConfig::default());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    let page = app.navigate_to("pages/b").unwrap();
    h.engine.registry().register_extra(
        "slow",
        ApiEntry::new(|_call: ApiCall, responder: Responder| {
            std::mem::forget(responder);
            Ok(())
        }),
    );
    app.handle_render_message(page, FromRender::Invoke(InvokeRequest::new("slow", Value::Null, 1)))
        .unwrap();
    assert_eq!(app.bridge().pending().len(), 1);
    app.navigate_back(1).unwrap();
    assert!(app.bridge().pending().is_empty());
    h.logic_messages();
}

#[tokio::test]
async fn evaluate_in_page_round_trips_through_the_surface() {
    let mut h = harness(RuntimeConfig::default());
    tokio::spawn(h.worker.take().unwrap().run());
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    let page = app.current_pages()[0].page_id;
    app.handle_logic_message(FromLogic::Render {
        page_id: page,
        batch: RenderBatch::new(vec![
            RenderInstruction::InsertBefore {
                parent: ROOT_NODE,
                node: 1,
                tag: "text".into(),
                anchor: None,
            },
            RenderInstruction::SetText {
                node: 1,
                text: "hello".into(),
            },
        ]),
    })
    .unwrap();

    let value = app.evaluate_in_page(page, "title").await.unwrap();
    assert_eq!(value, json!("hello"));

    let error = app.evaluate_in_page(page, "boom").await.unwrap_err();
    assert_eq!(error.code(), "scriptError");

    let mut params = Map::new();
    params.insert("script".into(), json!("echo"));
    app.handle_logic_message(invoke("evaluateInPage", Value::Object(params), 9))
        .unwrap();
    let answer = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match h.logic_rx.recv().await.map(|t| t.message) {
                Some(ToLogic::Response(r)) => break r,
                Some(_) => continue,
                None => panic!("logic channel closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(answer.callback_id.0, 9);
    assert_eq!(answer.data, Some(json!("echo")));
}

#[tokio::test(start_paused = true)]
async fn evaluate_times_out_without_a_worker() {
    let h = harness(RuntimeConfig {
        evaluate_timeout_ms: 100,
        ..RuntimeConfig::default()
    });
    let app = h.engine.launch(wx("a"), h.options("pages/index")).unwrap();
    let page = app.current_pages()[0].page_id;
    let error = app.evaluate_in_page(page, "title").await.unwrap_err();
    assert_eq!(error.code(), "timeout");
}
