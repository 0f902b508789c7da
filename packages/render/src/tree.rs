//! The render realm's node tree.
//!
//! A [`NodeTree`] is the state a render surface holds for one page. It is
//! mutated only by applying [`RenderBatch`]es, strictly in array order: an
//! instruction may depend on a node created by an earlier instruction of the
//! same batch, so reordering a batch changes its meaning (and usually makes
//! it fail).

use std::collections::{BTreeMap, HashMap};

use pocket_protocol::{
    IntersectionEntry, ListenerOptions, NodeId, NodeInfo, ObserverOptions, QueryResult, Rect,
    RenderBatch, RenderInstruction, SelectorQuery, ROOT_NODE,
};
use serde_json::Value;

use crate::error::{BatchError, RenderError, Result};
use crate::selector::Selector;

/// One element of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub tag: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: BTreeMap<String, Value>,
    pub class_name: String,
    pub style: BTreeMap<String, String>,
    pub display: Option<String>,
    pub text: Option<String>,
    pub listeners: BTreeMap<String, ListenerOptions>,
    pub model_value: Option<Value>,
    /// Layout box reported by the renderer.
    pub layout: Option<Rect>,
}

impl Node {
    fn new(id: NodeId, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into(),
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            class_name: String::new(),
            style: BTreeMap::new(),
            display: None,
            text: None,
            listeners: BTreeMap::new(),
            model_value: None,
            layout: None,
        }
    }

    /// The `id` attribute, when it is a string.
    pub fn element_id(&self) -> Option<&str> {
        self.attributes.get("id").and_then(Value::as_str)
    }

    pub fn classes(&self) -> Vec<&str> {
        self.class_name.split_whitespace().collect()
    }

    /// `data-*` attributes keyed by their camelCase name.
    pub fn dataset(&self) -> BTreeMap<String, Value> {
        self.attributes
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix("data-")
                    .map(|key| (camel_case(key), value.clone()))
            })
            .collect()
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Something the render realm must send back after applying a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderReply {
    /// Results of a `runSelectorQuery` instruction.
    Query {
        query_id: u64,
        results: Vec<QueryResult>,
    },
}

struct Observer {
    options: ObserverOptions,
    selector: Selector,
    /// Last reported ratio per observed node.
    ratios: HashMap<NodeId, f64>,
}

/// Node tree of one render surface.
pub struct NodeTree {
    nodes: HashMap<NodeId, Node>,
    observers: BTreeMap<u64, Observer>,
    viewport: Rect,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// A tree holding only the root node.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_NODE, Node::new(ROOT_NODE, "root"));
        Self {
            nodes,
            observers: BTreeMap::new(),
            viewport: Rect::default(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(RenderError::UnknownNode(id))
    }

    /// Apply a whole batch in order.
    ///
    /// Stops at the first instruction that fails; the error carries its index.
    pub fn apply(
        &mut self,
        batch: &RenderBatch,
    ) -> std::result::Result<Vec<RenderReply>, BatchError> {
        let mut replies = Vec::new();
        for (index, instruction) in batch.iter().enumerate() {
            match self.apply_one(instruction) {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!(index, %error, "render batch rejected");
                    return Err(BatchError {
                        index,
                        instruction: instruction.tag().name(),
                        error,
                    });
                }
            }
        }
        Ok(replies)
    }

    /// Apply one instruction.
    pub fn apply_one(&mut self, instruction: &RenderInstruction) -> Result<Option<RenderReply>> {
        use RenderInstruction as I;
        match instruction {
            I::InsertBefore {
                parent,
                node,
                tag,
                anchor,
            } => self.insert_before(*parent, *node, tag, *anchor)?,
            I::RemoveChild { parent, child } => self.remove_child(*parent, *child)?,
            I::SetText { node, text } => self.node_mut(*node)?.text = Some(text.clone()),
            I::SetClass { node, class_name } => {
                self.node_mut(*node)?.class_name = class_name.clone()
            }
            I::SetStyle { node, style } => {
                self.node_mut(*node)?.style = style.clone().unwrap_or_default()
            }
            I::SetDisplay { node, value } => self.node_mut(*node)?.display = value.clone(),
            I::AddEventListener {
                node,
                event,
                options,
            } => {
                self.node_mut(*node)?
                    .listeners
                    .insert(event.clone(), options.clone());
            }
            I::RemoveEventListener { node, event } => {
                self.node_mut(*node)?.listeners.remove(event);
            }
            I::UpdateAttribute { node, name, value } => {
                let attrs = &mut self.node_mut(*node)?.attributes;
                match value {
                    Some(v) => {
                        attrs.insert(name.clone(), v.clone());
                    }
                    None => {
                        attrs.remove(name);
                    }
                }
            }
            I::SetModelValue { node, value } => {
                self.node_mut(*node)?.model_value = Some(value.clone())
            }
            I::RunSelectorQuery { query_id, queue } => {
                let results = queue
                    .iter()
                    .map(|q| self.run_query(q))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Some(RenderReply::Query {
                    query_id: *query_id,
                    results,
                }));
            }
            I::AddIntersectionObserver {
                observer_id,
                options,
            } => {
                let selector = Selector::parse(&options.target)?;
                self.observers.insert(
                    *observer_id,
                    Observer {
                        options: options.clone(),
                        selector,
                        ratios: HashMap::new(),
                    },
                );
            }
            I::RemoveIntersectionObserver { observer_id } => {
                self.observers
                    .remove(observer_id)
                    .ok_or(RenderError::UnknownObserver(*observer_id))?;
            }
        }
        Ok(None)
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    fn detach(&mut self, node: NodeId) {
        let parent = self.nodes.get_mut(&node).and_then(|n| n.parent.take());
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != node);
        }
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        tag: &str,
        anchor: Option<NodeId>,
    ) -> Result<()> {
        if node == ROOT_NODE {
            return Err(RenderError::Root);
        }
        if !self.nodes.contains_key(&parent) {
            return Err(RenderError::UnknownNode(parent));
        }
        if let Some(anchor) = anchor {
            if self.nodes.get(&anchor).and_then(|n| n.parent) != Some(parent) {
                return Err(RenderError::NotAChild {
                    parent,
                    child: anchor,
                });
            }
        }

        if self.nodes.contains_key(&node) {
            if self.is_ancestor_or_self(node, parent) {
                return Err(RenderError::Cycle { parent, node });
            }
            self.detach(node);
        } else {
            self.nodes.insert(node, Node::new(node, tag));
        }

        let siblings = &mut self.node_mut(parent)?.children;
        let position = anchor
            .and_then(|a| siblings.iter().position(|c| *c == a))
            .unwrap_or(siblings.len());
        siblings.insert(position, node);
        self.node_mut(node)?.parent = Some(parent);
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if child == ROOT_NODE {
            return Err(RenderError::Root);
        }
        let actual = self
            .nodes
            .get(&child)
            .ok_or(RenderError::UnknownNode(child))?
            .parent;
        if actual != Some(parent) {
            return Err(RenderError::NotAChild { parent, child });
        }
        self.detach(child);

        let mut stack = vec![child];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.children);
                for observer in self.observers.values_mut() {
                    observer.ratios.remove(&id);
                }
            }
        }
        Ok(())
    }

    /// Node ids in document order, root excluded.
    pub fn document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(ROOT_NODE).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    fn matches(&self, selector: &Selector, id: NodeId) -> bool {
        selector.alternatives.iter().any(|complex| {
            let mut compounds = complex.compounds.iter().rev();
            let Some(last) = compounds.next() else {
                return false;
            };
            let Some(node) = self.nodes.get(&id) else {
                return false;
            };
            if !last.matches(&node.tag, node.element_id(), &node.classes()) {
                return false;
            }
            let mut cursor = node.parent;
            for compound in compounds {
                loop {
                    match cursor.and_then(|p| self.nodes.get(&p)) {
                        Some(ancestor) if ancestor.id != ROOT_NODE => {
                            cursor = ancestor.parent;
                            if compound.matches(
                                &ancestor.tag,
                                ancestor.element_id(),
                                &ancestor.classes(),
                            ) {
                                break;
                            }
                        }
                        _ => return false,
                    }
                }
            }
            true
        })
    }

    /// All nodes matching `selector`, in document order.
    pub fn select_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self.select_parsed(&selector))
    }

    fn select_parsed(&self, selector: &Selector) -> Vec<NodeId> {
        self.document_order()
            .into_iter()
            .filter(|id| self.matches(selector, *id))
            .collect()
    }

    fn node_info(&self, id: NodeId, query: &SelectorQuery) -> NodeInfo {
        let mut info = NodeInfo::default();
        let Some(node) = self.nodes.get(&id) else {
            return info;
        };
        let fields = &query.fields;
        if fields.id {
            info.id = Some(node.element_id().unwrap_or_default().to_string());
        }
        if fields.dataset {
            info.dataset = Some(node.dataset());
        }
        let layout = node.layout.unwrap_or_default();
        if fields.rect {
            info.rect = Some(layout);
        }
        if fields.size {
            info.width = Some(layout.width);
            info.height = Some(layout.height);
        }
        for name in &fields.properties {
            let value = match (name.as_str(), &node.model_value) {
                ("value", Some(v)) => v.clone(),
                _ => node.attributes.get(name).cloned().unwrap_or(Value::Null),
            };
            info.properties.insert(name.clone(), value);
        }
        info
    }

    fn run_query(&self, query: &SelectorQuery) -> Result<QueryResult> {
        let matched = self.select_all(&query.selector)?;
        Ok(if query.single {
            QueryResult::Single(matched.first().map(|id| self.node_info(*id, query)))
        } else {
            QueryResult::All(
                matched
                    .iter()
                    .map(|id| self.node_info(*id, query))
                    .collect(),
            )
        })
    }

    /// Record the layout box the renderer computed for a node.
    pub fn set_layout(&mut self, id: NodeId, rect: Rect) -> Result<()> {
        self.node_mut(id)?.layout = Some(rect);
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Evaluate every observer against the current layout.
    ///
    /// The first evaluation of a node always reports; later ones report only
    /// when the ratio crosses one of the observer's thresholds.
    pub fn compute_intersections(&mut self) -> Vec<IntersectionEntry> {
        let mut entries = Vec::new();
        let mut updates = Vec::new();

        for (observer_id, observer) in &self.observers {
            let mut targets = self.select_parsed(&observer.selector);
            if !observer.options.observe_all {
                targets.truncate(1);
            }
            let root = self.viewport.expand(&observer.options.root_margin);

            for id in targets {
                let Some(bounds) = self.nodes.get(&id).and_then(|n| n.layout) else {
                    continue;
                };
                let overlap = bounds.intersect(&root);
                let ratio = match overlap {
                    Some(r) if bounds.area() > 0.0 => (r.area() / bounds.area()).min(1.0),
                    Some(_) => 1.0,
                    None => 0.0,
                };
                let crossed = match observer.ratios.get(&id) {
                    None => true,
                    Some(previous) => observer
                        .options
                        .thresholds
                        .iter()
                        .any(|t| above(*previous, *t) != above(ratio, *t)),
                };
                if crossed {
                    entries.push(IntersectionEntry {
                        observer_id: *observer_id,
                        node: id,
                        intersection_ratio: ratio,
                        bounding_rect: bounds,
                        intersection_rect: overlap.unwrap_or_default(),
                    });
                }
                updates.push((*observer_id, id, ratio));
            }
        }

        for (observer_id, id, ratio) in updates {
            if let Some(observer) = self.observers.get_mut(&observer_id) {
                observer.ratios.insert(id, ratio);
            }
        }
        entries
    }

    /// Deliver a UI event at `target`.
    ///
    /// Returns the nodes whose listener fires, bubbling from the target up to
    /// the root. `once` listeners are removed as they fire.
    pub fn dispatch(&mut self, target: NodeId, event: &str) -> Result<Vec<NodeId>> {
        if !self.nodes.contains_key(&target) {
            return Err(RenderError::UnknownNode(target));
        }
        let mut fired = Vec::new();
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get_mut(&id) else {
                break;
            };
            if let Some(once) = node.listeners.get(event).map(|o| o.once) {
                if once {
                    node.listeners.remove(event);
                }
                fired.push(id);
            }
            cursor = node.parent;
        }
        Ok(fired)
    }
}

fn above(ratio: f64, threshold: f64) -> bool {
    if threshold <= 0.0 {
        ratio > 0.0
    } else {
        ratio >= threshold
    }
}
