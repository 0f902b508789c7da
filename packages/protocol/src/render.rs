//! The render-sync instruction stream.
//!
//! A [`RenderBatch`] is an ordered array of `[tag, ...fields]` tuples. The
//! tag values are stable across versions; new instructions only ever take new
//! tags. The render realm applies a batch strictly in array order.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::{ProtocolError, Result};
use crate::wire::{split_tuple, Fields};

/// Opaque node identifier, scoped to one render surface.
pub type NodeId = u64;

/// The node every surface starts with.
pub const ROOT_NODE: NodeId = 0;

/// Stable wire tags of the render-sync instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RenderTag {
    InsertBefore = 0,
    RemoveChild = 1,
    SetText = 2,
    SetClass = 3,
    SetStyle = 4,
    SetDisplay = 5,
    AddEventListener = 6,
    UpdateAttribute = 7,
    SetModelValue = 8,
    RunSelectorQuery = 9,
    AddIntersectionObserver = 10,
    RemoveIntersectionObserver = 11,
    RemoveEventListener = 12,
}

impl RenderTag {
    pub fn from_i64(tag: i64) -> Option<Self> {
        use RenderTag::*;
        Some(match tag {
            0 => InsertBefore,
            1 => RemoveChild,
            2 => SetText,
            3 => SetClass,
            4 => SetStyle,
            5 => SetDisplay,
            6 => AddEventListener,
            7 => UpdateAttribute,
            8 => SetModelValue,
            9 => RunSelectorQuery,
            10 => AddIntersectionObserver,
            11 => RemoveIntersectionObserver,
            12 => RemoveEventListener,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use RenderTag::*;
        match self {
            InsertBefore => "insertBefore",
            RemoveChild => "removeChild",
            SetText => "setText",
            SetClass => "setClass",
            SetStyle => "setStyle",
            SetDisplay => "setDisplay",
            AddEventListener => "addEventListener",
            UpdateAttribute => "updateAttribute",
            SetModelValue => "setModelValue",
            RunSelectorQuery => "runSelectorQuery",
            AddIntersectionObserver => "addIntersectionObserver",
            RemoveIntersectionObserver => "removeIntersectionObserver",
            RemoveEventListener => "removeEventListener",
        }
    }
}

/// Options of an `addEventListener` instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerOptions {
    pub capture: bool,
    pub passive: bool,
    pub once: bool,
}

/// Which node properties a selector query reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryFields {
    pub id: bool,
    pub dataset: bool,
    pub rect: bool,
    pub size: bool,
    /// Attribute names to report verbatim.
    pub properties: Vec<String>,
}

/// One entry in a selector query's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorQuery {
    pub selector: String,
    /// Report only the first match (`select`) instead of all (`selectAll`).
    #[serde(default)]
    pub single: bool,
    #[serde(default)]
    pub fields: QueryFields,
}

/// Margins that grow or shrink the observer's root rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

/// Parameters of an intersection observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverOptions {
    /// Selector of the observed node(s).
    pub target: String,
    /// Ratios at which a notification fires. Defaults to `[0.0]`.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,
    #[serde(default)]
    pub root_margin: Margins,
    /// Observe every match instead of only the first.
    #[serde(default)]
    pub observe_all: bool,
}

fn default_thresholds() -> Vec<f64> {
    vec![0.0]
}

/// Axis-aligned rectangle in surface coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// The overlapping region, or `None` when the rectangles do not touch.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right < left || bottom < top {
            return None;
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }

    /// Grow by the given margins (negative margins shrink).
    pub fn expand(&self, m: &Margins) -> Rect {
        Rect::new(
            self.left - m.left,
            self.top - m.top,
            self.width + m.left + m.right,
            self.height + m.top + m.bottom,
        )
    }
}

/// Properties of one node matched by a selector query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

/// The answer to one queued selector query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResult {
    All(Vec<NodeInfo>),
    Single(Option<NodeInfo>),
}

/// One intersection observer notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionEntry {
    pub observer_id: u64,
    pub node: NodeId,
    pub intersection_ratio: f64,
    pub bounding_rect: Rect,
    pub intersection_rect: Rect,
}

/// A single render-sync instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderInstruction {
    /// Insert `node` under `parent` before `anchor` (or last). An unknown
    /// `node` is created with `tag`; a known one is moved.
    InsertBefore {
        parent: NodeId,
        node: NodeId,
        tag: String,
        anchor: Option<NodeId>,
    },
    /// Detach `child` from `parent` and drop its subtree.
    RemoveChild { parent: NodeId, child: NodeId },
    SetText { node: NodeId, text: String },
    SetClass { node: NodeId, class_name: String },
    /// Replace the inline style; `None` clears it.
    SetStyle {
        node: NodeId,
        style: Option<BTreeMap<String, String>>,
    },
    /// Override `display`; `None` restores the stylesheet value.
    SetDisplay { node: NodeId, value: Option<String> },
    AddEventListener {
        node: NodeId,
        event: String,
        options: ListenerOptions,
    },
    /// Set an attribute; `None` removes it.
    UpdateAttribute {
        node: NodeId,
        name: String,
        value: Option<Value>,
    },
    SetModelValue { node: NodeId, value: Value },
    /// Answered with a `QueryReply` carrying the same `query_id`.
    RunSelectorQuery {
        query_id: u64,
        queue: Vec<SelectorQuery>,
    },
    AddIntersectionObserver {
        observer_id: u64,
        options: ObserverOptions,
    },
    RemoveIntersectionObserver { observer_id: u64 },
    RemoveEventListener { node: NodeId, event: String },
}

impl RenderInstruction {
    pub fn tag(&self) -> RenderTag {
        use RenderInstruction::*;
        match self {
            InsertBefore { .. } => RenderTag::InsertBefore,
            RemoveChild { .. } => RenderTag::RemoveChild,
            SetText { .. } => RenderTag::SetText,
            SetClass { .. } => RenderTag::SetClass,
            SetStyle { .. } => RenderTag::SetStyle,
            SetDisplay { .. } => RenderTag::SetDisplay,
            AddEventListener { .. } => RenderTag::AddEventListener,
            UpdateAttribute { .. } => RenderTag::UpdateAttribute,
            SetModelValue { .. } => RenderTag::SetModelValue,
            RunSelectorQuery { .. } => RenderTag::RunSelectorQuery,
            AddIntersectionObserver { .. } => RenderTag::AddIntersectionObserver,
            RemoveIntersectionObserver { .. } => RenderTag::RemoveIntersectionObserver,
            RemoveEventListener { .. } => RenderTag::RemoveEventListener,
        }
    }

    /// Encode as a `[tag, ...fields]` tuple.
    pub fn to_wire(&self) -> Value {
        use RenderInstruction::*;
        let tag = self.tag() as u8;
        match self {
            InsertBefore {
                parent,
                node,
                tag: node_tag,
                anchor,
            } => json!([tag, parent, node, node_tag, anchor]),
            RemoveChild { parent, child } => json!([tag, parent, child]),
            SetText { node, text } => json!([tag, node, text]),
            SetClass { node, class_name } => json!([tag, node, class_name]),
            SetStyle { node, style } => json!([tag, node, style]),
            SetDisplay { node, value } => json!([tag, node, value]),
            AddEventListener {
                node,
                event,
                options,
            } => json!([tag, node, event, options]),
            UpdateAttribute { node, name, value } => json!([tag, node, name, value]),
            SetModelValue { node, value } => json!([tag, node, value]),
            RunSelectorQuery { query_id, queue } => json!([tag, query_id, queue]),
            AddIntersectionObserver {
                observer_id,
                options,
            } => json!([tag, observer_id, options]),
            RemoveIntersectionObserver { observer_id } => json!([tag, observer_id]),
            RemoveEventListener { node, event } => json!([tag, node, event]),
        }
    }

    /// Decode a `[tag, ...fields]` tuple.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let (raw_tag, items) = split_tuple("render instruction", value)?;
        let tag = RenderTag::from_i64(raw_tag).ok_or(ProtocolError::UnknownTag {
            kind: "render",
            tag: raw_tag,
        })?;
        let f = Fields::new(tag.name(), items);
        use RenderInstruction as I;
        Ok(match tag {
            RenderTag::InsertBefore => I::InsertBefore {
                parent: f.u64(0)?,
                node: f.u64(1)?,
                tag: f.string(2)?,
                anchor: f.opt_u64(3)?,
            },
            RenderTag::RemoveChild => I::RemoveChild {
                parent: f.u64(0)?,
                child: f.u64(1)?,
            },
            RenderTag::SetText => I::SetText {
                node: f.u64(0)?,
                text: f.string(1)?,
            },
            RenderTag::SetClass => I::SetClass {
                node: f.u64(0)?,
                class_name: f.string(1)?,
            },
            RenderTag::SetStyle => I::SetStyle {
                node: f.u64(0)?,
                style: f.opt_decode(1)?,
            },
            RenderTag::SetDisplay => I::SetDisplay {
                node: f.u64(0)?,
                value: f.opt_string(1)?,
            },
            RenderTag::AddEventListener => I::AddEventListener {
                node: f.u64(0)?,
                event: f.string(1)?,
                options: f.opt_decode(2)?.unwrap_or_default(),
            },
            RenderTag::UpdateAttribute => I::UpdateAttribute {
                node: f.u64(0)?,
                name: f.string(1)?,
                value: f.optional(2).cloned(),
            },
            RenderTag::SetModelValue => I::SetModelValue {
                node: f.u64(0)?,
                value: f.value(1)?.clone(),
            },
            RenderTag::RunSelectorQuery => I::RunSelectorQuery {
                query_id: f.u64(0)?,
                queue: f.decode(1)?,
            },
            RenderTag::AddIntersectionObserver => I::AddIntersectionObserver {
                observer_id: f.u64(0)?,
                options: f.decode(1)?,
            },
            RenderTag::RemoveIntersectionObserver => I::RemoveIntersectionObserver {
                observer_id: f.u64(0)?,
            },
            RenderTag::RemoveEventListener => I::RemoveEventListener {
                node: f.u64(0)?,
                event: f.string(1)?,
            },
        })
    }
}

impl Serialize for RenderInstruction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RenderInstruction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RenderInstruction::from_wire(&value).map_err(D::Error::custom)
    }
}

/// One flush worth of render-sync instructions, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderBatch(pub Vec<RenderInstruction>);

impl RenderBatch {
    pub fn new(instructions: Vec<RenderInstruction>) -> Self {
        Self(instructions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderInstruction> {
        self.0.iter()
    }
}

impl IntoIterator for RenderBatch {
    type Item = RenderInstruction;
    type IntoIter = std::vec::IntoIter<RenderInstruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_before_tuple_layout() {
        let inst = RenderInstruction::InsertBefore {
            parent: 0,
            node: 5,
            tag: "view".into(),
            anchor: None,
        };
        assert_eq!(inst.to_wire(), json!([0, 0, 5, "view", null]));
    }

    #[test]
    fn batch_decodes_in_order() {
        let wire = json!([
            [0, 0, 1, "view", null],
            [0, 0, 2, "text", null],
            [2, 1, "a"],
            [4, 1, {"color": "red"}],
            [7, 2, "data-id", null]
        ]);
        let batch: RenderBatch = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.0[2].tag(), RenderTag::SetText);
        assert_eq!(
            batch.0[4],
            RenderInstruction::UpdateAttribute {
                node: 2,
                name: "data-id".into(),
                value: None
            }
        );
        assert_eq!(serde_json::to_value(&batch).unwrap(), wire);
    }

    #[test]
    fn selector_query_defaults() {
        let inst = RenderInstruction::from_wire(&json!([9, 3, [{"selector": "#a"}]])).unwrap();
        match inst {
            RenderInstruction::RunSelectorQuery { query_id, queue } => {
                assert_eq!(query_id, 3);
                assert!(!queue[0].single);
                assert_eq!(queue[0].fields, QueryFields::default());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn observer_thresholds_default() {
        let inst =
            RenderInstruction::from_wire(&json!([10, 1, {"target": ".item"}])).unwrap();
        match inst {
            RenderInstruction::AddIntersectionObserver { options, .. } => {
                assert_eq!(options.thresholds, vec![0.0]);
                assert!(!options.observe_all);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let err = RenderInstruction::from_wire(&json!([42, 1])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownTag {
                kind: "render",
                tag: 42
            }
        );
    }

    #[test]
    fn wrong_field_type_rejected() {
        assert!(RenderInstruction::from_wire(&json!([2, "node", "text"])).is_err());
        assert!(RenderInstruction::from_wire(&json!([1, 0])).is_err());
    }

    #[test]
    fn rect_intersection() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(50.0, 80.0, 100.0, 100.0);
        let i = a.intersect(&b).unwrap();
        assert_eq!(i, Rect::new(50.0, 80.0, 50.0, 20.0));
        assert!(a.intersect(&Rect::new(200.0, 0.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn query_result_untagged() {
        let single: QueryResult = serde_json::from_value(json!(null)).unwrap();
        assert_eq!(single, QueryResult::Single(None));
        let all: QueryResult = serde_json::from_value(json!([{"id": "a"}])).unwrap();
        match all {
            QueryResult::All(nodes) => assert_eq!(nodes[0].id.as_deref(), Some("a")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
