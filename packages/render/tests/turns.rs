//! A logic-realm turn travelling through the wire format into a surface.

use pocket_protocol::{
    FromLogic, FromRender, PageId, QueryFields, QueryResult, RenderInstruction, SelectorQuery,
    ToRender, Transform, ROOT_NODE,
};
use pocket_render::{CanvasContext, RenderBatcher, RenderSurface};
use serde_json::json;

fn over_the_wire(message: FromLogic) -> FromLogic {
    let text = serde_json::to_string(&message).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn into_render(message: FromLogic) -> ToRender {
    match message {
        FromLogic::Render { batch, .. } => ToRender::Render { batch },
        FromLogic::Canvas { batch, .. } => ToRender::Canvas(batch),
        other => panic!("not a render message: {:?}", other),
    }
}

#[test]
fn query_sees_mutations_from_the_same_turn() {
    let mut batcher = RenderBatcher::new();
    batcher.push(RenderInstruction::InsertBefore {
        parent: ROOT_NODE,
        node: 1,
        tag: "view".into(),
        anchor: None,
    });
    batcher.push(RenderInstruction::UpdateAttribute {
        node: 1,
        name: "id".into(),
        value: Some(json!("title")),
    });
    batcher.push(RenderInstruction::SetText {
        node: 1,
        text: "hello".into(),
    });
    let query_id = batcher.query(vec![SelectorQuery {
        selector: "#title".into(),
        single: true,
        fields: QueryFields {
            id: true,
            ..QueryFields::default()
        },
    }]);

    let message = over_the_wire(FromLogic::Render {
        page_id: PageId(1),
        batch: batcher.flush().unwrap(),
    });

    let mut surface = RenderSurface::new();
    let replies = surface.handle(into_render(message));
    match &replies[..] {
        [FromRender::QueryReply {
            query_id: got,
            results,
        }] => {
            assert_eq!(*got, query_id);
            match &results[..] {
                [QueryResult::Single(Some(info))] => {
                    assert_eq!(info.id.as_deref(), Some("title"))
                }
                other => panic!("unexpected results {:?}", other),
            }
        }
        other => panic!("unexpected replies {:?}", other),
    }
    assert_eq!(surface.tree().get(1).unwrap().text.as_deref(), Some("hello"));
}

#[test]
fn reversed_turn_is_rejected() {
    let forward = vec![
        RenderInstruction::InsertBefore {
            parent: ROOT_NODE,
            node: 1,
            tag: "view".into(),
            anchor: None,
        },
        RenderInstruction::InsertBefore {
            parent: 1,
            node: 2,
            tag: "text".into(),
            anchor: None,
        },
    ];
    let mut batcher = RenderBatcher::new();
    for instruction in forward.into_iter().rev() {
        batcher.push(instruction);
    }
    let mut surface = RenderSurface::new();
    let replies = surface.handle(ToRender::Render {
        batch: batcher.flush().unwrap(),
    });
    match &replies[..] {
        [FromRender::Publish(msg)] => assert_eq!(msg.data["index"], 0),
        other => panic!("unexpected replies {:?}", other),
    }
    assert!(surface.tree().is_empty());
}

#[test]
fn canvas_turn_replays_with_balanced_state() {
    let mut ctx = CanvasContext::new("chart");
    let mut gradient = ctx.create_radial_gradient(0.0, 0.0, 0.0, 0.0, 0.0, 50.0);
    gradient.add_color_stop(0.0, "#fff");
    gradient.add_color_stop(1.0, "#000");
    ctx.set_fill_style(gradient);
    ctx.save();
    ctx.translate(10.0, 10.0);
    ctx.rotate(std::f64::consts::FRAC_PI_2);
    ctx.fill_rect(0.0, 0.0, 5.0, 5.0);
    ctx.restore();
    ctx.fill_rect(0.0, 0.0, 5.0, 5.0);

    let message = over_the_wire(FromLogic::Canvas {
        page_id: PageId(1),
        batch: ctx.flush().unwrap(),
    });
    let mut surface = RenderSurface::new();
    assert!(surface.handle(into_render(message)).is_empty());

    let canvas = surface.canvases().get("chart").unwrap();
    assert_eq!(canvas.state().transform, Transform::IDENTITY);
    let commands = canvas.commands();
    assert_eq!(commands.len(), 2);
    let (x, y) = commands[0].transform.apply(0.0, 0.0);
    assert!((x - 10.0).abs() < 1e-9 && (y - 10.0).abs() < 1e-9);
    assert_eq!(commands[1].transform, Transform::IDENTITY);
}
