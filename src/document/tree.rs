//! In-memory document host.
//!
//! `MemoryDocument` is an arena tree that behaves like the parts of a browser
//! document the engine depends on:
//!
//! - text nodes and elements, with lowercase tag names;
//! - value fields carrying a reactive *value tracker*: the last value the bound
//!   state layer saw. Writes through the instance setter
//!   ([`MemoryDocument::framework_set_value`]) update the tracker, so a later
//!   input notification looks like "no change". Writes through the base setter
//!   ([`Document::set_native_value`]) leave it stale, so the next input
//!   notification is committed as a real edit;
//! - rich regions whose content is a child subtree of text and `br` nodes;
//! - synchronous, re-entrant listener dispatch;
//! - a mutation record queue honouring [`ObserveScope`] and a pause switch.
//!
//! Node ids are never reused; removed nodes stay in the arena detached.

use super::markup::{FragmentNode, parse_fragment, plain_fragment};
use super::{
    Document, FieldEvent, FieldKind, Listener, ListenerId, MutationRecord, NodeId, NotificationKind, ObserveScope,
    Selection,
};
use crate::error::WriteError;
use std::rc::Rc;

#[derive(Debug, Clone)]
struct ValueControl {
    value: String,
    tracked: String,
    selection: Selection,
}

#[derive(Debug, Clone)]
enum Field {
    Value(ValueControl),
    Rich { selection: Selection },
}

#[derive(Debug, Clone)]
enum Payload {
    Element { tag: String, field: Option<Field> },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    payload: Payload,
    attached: bool,
    read_only: bool,
}

#[derive(Debug, Clone, Copy)]
struct Observer {
    root: NodeId,
    scope: ObserveScope,
}

/// Arena-backed [`Document`] implementation.
pub struct MemoryDocument {
    nodes: Vec<NodeData>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    observer: Option<Observer>,
    paused: bool,
    records: Vec<MutationRecord>,
    reactive_updates: Vec<(NodeId, String)>,
    dispatched: Vec<FieldEvent>,
}

impl std::fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocument")
            .field("nodes", &self.nodes.len())
            .field("listeners", &self.listeners.len())
            .field("observer", &self.observer)
            .field("paused", &self.paused)
            .field("pending_records", &self.records.len())
            .finish()
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// A document with a single `body` root element.
    pub fn new() -> Self {
        let root = NodeData {
            parent: None,
            children: Vec::new(),
            payload: Payload::Element { tag: "body".to_string(), field: None },
            attached: true,
            read_only: false,
        };
        MemoryDocument {
            nodes: vec![root],
            listeners: Vec::new(),
            next_listener: 0,
            observer: None,
            paused: false,
            records: Vec::new(),
            reactive_updates: Vec::new(),
            dispatched: Vec::new(),
        }
    }

    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.raw() as usize)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.raw() as usize)
    }

    fn alloc(&mut self, parent: Option<NodeId>, payload: Payload) -> NodeId {
        let id = NodeId::from_raw(self.nodes.len() as u32);
        let attached = parent.map(|p| self.is_attached(p)).unwrap_or(false);
        self.nodes.push(NodeData { parent, children: Vec::new(), payload, attached, read_only: false });
        id
    }

    fn fragment_payload(node: &FragmentNode) -> Payload {
        match node {
            FragmentNode::Text(t) => Payload::Text(t.clone()),
            FragmentNode::LineBreak => Payload::Element { tag: "br".to_string(), field: None },
        }
    }

    fn append(&mut self, parent: NodeId, payload: Payload) -> NodeId {
        let id = self.alloc(Some(parent), payload);
        if let Some(p) = self.node_mut(parent) {
            p.children.push(id);
        }
        self.record(MutationRecord::ChildList { target: parent, added: vec![id], removed: Vec::new() });
        id
    }

    fn record(&mut self, record: MutationRecord) {
        let Some(Observer { root, scope }) = self.observer else { return };
        if self.paused {
            return;
        }
        let wanted = match &record {
            MutationRecord::ChildList { .. } => ObserveScope::CHILD_LIST,
            MutationRecord::CharacterData { .. } => ObserveScope::CHARACTER_DATA,
        };
        if !scope.contains(wanted) {
            return;
        }
        let target = record.target();
        let in_scope =
            if scope.contains(ObserveScope::SUBTREE) { self.is_within(target, root) } else { target == root };
        if in_scope {
            self.records.push(record);
        }
    }

    fn detach_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.node_mut(id) {
                n.attached = false;
                stack.extend(n.children.iter().copied());
            }
        }
    }

    fn is_read_only(&self, node: NodeId) -> bool {
        let own = self.node(node).map(|n| n.read_only).unwrap_or(false);
        own || self.ancestors(node).iter().any(|&a| self.node(a).map(|n| n.read_only).unwrap_or(false))
    }

    fn writable(&self, node: NodeId) -> Result<&NodeData, WriteError> {
        let data = self.node(node).filter(|n| n.attached).ok_or(WriteError::Detached(node))?;
        if self.is_read_only(node) {
            return Err(WriteError::ReadOnly(node));
        }
        Ok(data)
    }

    fn field_mut(&mut self, field: NodeId) -> Result<&mut Field, WriteError> {
        match self.node_mut(field) {
            Some(NodeData { payload: Payload::Element { field: Some(f), .. }, .. }) => Ok(f),
            Some(_) => Err(WriteError::NotField(field)),
            None => Err(WriteError::Detached(field)),
        }
    }

    fn text_of(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.node(node) else { return };
        match &data.payload {
            Payload::Text(t) => out.push_str(t),
            Payload::Element { tag, .. } if tag == "br" => out.push('\n'),
            Payload::Element { field: Some(Field::Value(ctrl)), .. } => out.push_str(&ctrl.value),
            Payload::Element { .. } => {
                for &child in &data.children {
                    self.text_of(child, out);
                }
            }
        }
    }

    fn replace_children(&mut self, parent: NodeId, fragment: &[FragmentNode]) -> (Vec<NodeId>, Vec<NodeId>) {
        let removed = self.node_mut(parent).map(|p| std::mem::take(&mut p.children)).unwrap_or_default();
        for &old in &removed {
            self.detach_subtree(old);
            if let Some(n) = self.node_mut(old) {
                n.parent = None;
            }
        }
        let added: Vec<NodeId> =
            fragment.iter().map(|f| self.alloc(Some(parent), Self::fragment_payload(f))).collect();
        if let Some(p) = self.node_mut(parent) {
            p.children = added.clone();
        }
        (added, removed)
    }

    // --- Builders ---------------------------------------------------------------

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        self.append(parent, Payload::Element { tag: tag.to_ascii_lowercase(), field: None })
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.append(parent, Payload::Text(text.to_string()))
    }

    /// Append a value-holding control (`input`, `textarea`, ...).
    pub fn append_value_field(&mut self, parent: NodeId, tag: &str, value: &str) -> NodeId {
        let end = value.chars().count();
        let ctrl = ValueControl { value: value.to_string(), tracked: value.to_string(), selection: Selection::caret(end) };
        self.append(parent, Payload::Element { tag: tag.to_ascii_lowercase(), field: Some(Field::Value(ctrl)) })
    }

    /// Append a rich editable region whose initial content is `markup`.
    pub fn append_rich_region(&mut self, parent: NodeId, markup: &str) -> NodeId {
        let region =
            self.append(parent, Payload::Element { tag: "div".to_string(), field: Some(Field::Rich { selection: Selection::default() }) });
        let fragment = parse_fragment(markup);
        for piece in &fragment {
            let id = self.alloc(Some(region), Self::fragment_payload(piece));
            if let Some(r) = self.node_mut(region) {
                r.children.push(id);
            }
        }
        let end = self.field_text(region).map(|t| t.chars().count()).unwrap_or(0);
        if let Ok(Field::Rich { selection }) = self.field_mut(region) {
            *selection = Selection::caret(end);
        }
        region
    }

    /// Detach `node` from its parent.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let Some(parent) = self.parent(node) else { return false };
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|&c| c != node);
        }
        self.detach_subtree(node);
        if let Some(n) = self.node_mut(node) {
            n.parent = None;
        }
        self.record(MutationRecord::ChildList { target: parent, added: Vec::new(), removed: vec![node] });
        true
    }

    /// Mark `node` (and everything below it) as refusing writes.
    pub fn set_read_only(&mut self, node: NodeId, read_only: bool) {
        if let Some(n) = self.node_mut(node) {
            n.read_only = read_only;
        }
    }

    // --- Simulated external activity -------------------------------------------

    /// Change a text node in place the way page script would.
    pub fn edit_text(&mut self, node: NodeId, text: &str) -> Result<(), WriteError> {
        self.set_text(node, text)
    }

    /// Simulate the user typing so that the field ends up holding `value`, with
    /// the caret at the end, followed by a trusted input notification.
    pub fn type_into(&mut self, field: NodeId, value: &str) -> Result<(), WriteError> {
        let end = value.chars().count();
        match self.field_kind(field) {
            Some(FieldKind::ValueField) => {
                if let Field::Value(ctrl) = self.field_mut(field)? {
                    ctrl.value = value.to_string();
                    ctrl.selection = Selection::caret(end);
                }
            }
            Some(FieldKind::RichRegion) => {
                let fragment = plain_fragment(value);
                let (added, removed) = self.replace_children(field, &fragment);
                self.record(MutationRecord::ChildList { target: field, added, removed });
                if let Field::Rich { selection } = self.field_mut(field)? {
                    *selection = Selection::caret(end);
                }
            }
            None => return Err(WriteError::NotField(field)),
        }
        self.dispatch(FieldEvent::user(field, NotificationKind::Input));
        Ok(())
    }

    /// Set a value field through the reactive layer's own instance setter: the
    /// value tracker is updated together with the value.
    pub fn framework_set_value(&mut self, field: NodeId, value: &str) -> Result<(), WriteError> {
        match self.field_mut(field)? {
            Field::Value(ctrl) => {
                ctrl.value = value.to_string();
                ctrl.tracked = value.to_string();
                Ok(())
            }
            Field::Rich { .. } => Err(WriteError::WrongFieldKind(field)),
        }
    }

    fn sync_value_tracker(&mut self, field: NodeId) {
        let text = self.field_text(field);
        match self.nodes.get_mut(field.raw() as usize) {
            Some(NodeData { payload: Payload::Element { field: Some(Field::Value(ctrl)), .. }, .. }) => {
                if ctrl.value != ctrl.tracked {
                    ctrl.tracked = ctrl.value.clone();
                    self.reactive_updates.push((field, ctrl.value.clone()));
                }
            }
            Some(NodeData { payload: Payload::Element { field: Some(Field::Rich { .. }), .. }, .. }) => {
                if let Some(text) = text {
                    self.reactive_updates.push((field, text));
                }
            }
            _ => {}
        }
    }

    // --- Inspection -----------------------------------------------------------

    /// Concatenated text below `node` (`br` reads as `\n`, value fields as their value).
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.text_of(node, &mut out);
        out
    }

    /// Markup of the children of `node`.
    pub fn inner_markup(&self, node: NodeId) -> String {
        let Some(data) = self.node(node) else { return String::new() };
        let mut out = String::new();
        for &child in &data.children {
            match self.node(child).map(|c| &c.payload) {
                Some(Payload::Text(t)) => out.push_str(t),
                Some(Payload::Element { tag, .. }) if tag == "br" => out.push_str(super::LINE_BREAK_TOKEN),
                Some(Payload::Element { tag, field: Some(Field::Value(ctrl)) }) => {
                    out.push_str(&format!("<{tag} value=\"{}\">", ctrl.value))
                }
                Some(Payload::Element { tag, .. }) => {
                    out.push_str(&format!("<{tag}>{}</{tag}>", self.inner_markup(child)))
                }
                None => {}
            }
        }
        out
    }

    /// Values the reactive layer committed for `field`, oldest first.
    pub fn reactive_updates(&self, field: NodeId) -> Vec<&str> {
        self.reactive_updates.iter().filter(|(f, _)| *f == field).map(|(_, v)| v.as_str()).collect()
    }

    /// Every notification dispatched so far.
    pub fn dispatched(&self) -> &[FieldEvent] {
        &self.dispatched
    }

    /// Number of records waiting in the queue.
    pub fn pending_records(&self) -> usize {
        self.records.len()
    }
}

impl Document for MemoryDocument {
    fn root(&self) -> NodeId {
        NodeId::from_raw(0)
    }

    fn is_attached(&self, node: NodeId) -> bool {
        self.node(node).map(|n| n.attached).unwrap_or(false)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|n| n.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn is_text(&self, node: NodeId) -> bool {
        matches!(self.node(node).map(|n| &n.payload), Some(Payload::Text(_)))
    }

    fn tag_name(&self, node: NodeId) -> Option<&str> {
        match self.node(node).map(|n| &n.payload) {
            Some(Payload::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    fn text(&self, node: NodeId) -> Option<&str> {
        match self.node(node).map(|n| &n.payload) {
            Some(Payload::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    fn field_kind(&self, node: NodeId) -> Option<FieldKind> {
        match self.node(node).map(|n| &n.payload) {
            Some(Payload::Element { field: Some(Field::Value(_)), .. }) => Some(FieldKind::ValueField),
            Some(Payload::Element { field: Some(Field::Rich { .. }), .. }) => Some(FieldKind::RichRegion),
            _ => None,
        }
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), WriteError> {
        if !matches!(self.writable(node)?.payload, Payload::Text(_)) {
            return Err(WriteError::NotText(node));
        }
        if let Some(NodeData { payload: Payload::Text(t), .. }) = self.node_mut(node) {
            *t = text.to_string();
        }
        self.record(MutationRecord::CharacterData { target: node });
        Ok(())
    }

    fn replace_with_fragment(&mut self, node: NodeId, fragment: &[FragmentNode]) -> Result<Vec<NodeId>, WriteError> {
        let data = self.writable(node)?;
        if !matches!(data.payload, Payload::Text(_)) {
            return Err(WriteError::NotText(node));
        }
        let parent = data.parent.ok_or(WriteError::Detached(node))?;
        let pos = self.children(parent).iter().position(|&c| c == node).ok_or(WriteError::Detached(node))?;

        let added: Vec<NodeId> =
            fragment.iter().map(|f| self.alloc(Some(parent), Self::fragment_payload(f))).collect();
        if let Some(p) = self.node_mut(parent) {
            p.children.splice(pos..pos + 1, added.iter().copied());
        }
        self.detach_subtree(node);
        if let Some(n) = self.node_mut(node) {
            n.parent = None;
        }
        self.record(MutationRecord::ChildList { target: parent, added: added.clone(), removed: vec![node] });
        Ok(added)
    }

    fn field_text(&self, field: NodeId) -> Option<String> {
        match self.node(field).map(|n| &n.payload) {
            Some(Payload::Element { field: Some(Field::Value(ctrl)), .. }) => Some(ctrl.value.clone()),
            Some(Payload::Element { field: Some(Field::Rich { .. }), .. }) => Some(self.text_content(field)),
            _ => None,
        }
    }

    fn set_native_value(&mut self, field: NodeId, value: &str) -> Result<(), WriteError> {
        self.writable(field)?;
        match self.field_mut(field)? {
            Field::Value(ctrl) => {
                ctrl.value = value.to_string();
                ctrl.selection = Selection::caret(value.chars().count());
                Ok(())
            }
            Field::Rich { .. } => Err(WriteError::WrongFieldKind(field)),
        }
    }

    fn set_rich_content(&mut self, field: NodeId, fragment: &[FragmentNode]) -> Result<(), WriteError> {
        self.writable(field)?;
        if !matches!(self.field_mut(field)?, Field::Rich { .. }) {
            return Err(WriteError::WrongFieldKind(field));
        }
        let (added, removed) = self.replace_children(field, fragment);
        self.record(MutationRecord::ChildList { target: field, added, removed });
        let end = self.field_text(field).map(|t| t.chars().count()).unwrap_or(0);
        if let Field::Rich { selection } = self.field_mut(field)? {
            *selection = Selection::caret(end);
        }
        Ok(())
    }

    fn selection(&self, field: NodeId) -> Option<Selection> {
        match self.node(field).map(|n| &n.payload) {
            Some(Payload::Element { field: Some(Field::Value(ctrl)), .. }) => Some(ctrl.selection),
            Some(Payload::Element { field: Some(Field::Rich { selection }), .. }) => Some(*selection),
            _ => None,
        }
    }

    fn set_selection(&mut self, field: NodeId, selection: Selection) -> Result<(), WriteError> {
        let len = self.field_text(field).ok_or(WriteError::NotField(field))?.chars().count();
        let clamped = Selection { start: selection.start.min(len), end: selection.end.min(len) };
        match self.field_mut(field)? {
            Field::Value(ctrl) => ctrl.selection = clamped,
            Field::Rich { selection } => *selection = clamped,
        }
        Ok(())
    }

    fn dispatch(&mut self, event: FieldEvent) {
        self.dispatched.push(event.clone());
        if event.kind == NotificationKind::Input {
            self.sync_value_tracker(event.target);
        }
        let listeners: Vec<Listener> = self.listeners.iter().map(|(_, l)| Rc::clone(l)).collect();
        for listener in listeners {
            (*listener)(self, &event);
        }
    }

    fn add_listener(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn observe(&mut self, root: NodeId, scope: ObserveScope) {
        self.observer = Some(Observer { root, scope });
    }

    fn disconnect(&mut self) {
        self.observer = None;
        self.records.clear();
    }

    fn pause_observation(&mut self, paused: bool) -> bool {
        std::mem::replace(&mut self.paused, paused)
    }

    fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }
}
