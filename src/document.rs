//! Document boundary.
//!
//! The engine never owns the document it rewrites. Everything it needs from
//! the host is expressed by the [`Document`] trait:
//!
//! - a traversable tree of nodes (`root`, `parent`, `children`);
//! - classification: text node, element tag, and the closed two-variant
//!   interactive field classification ([`FieldKind`]);
//! - passive writes (`set_text`, `replace_with_fragment`);
//! - field writes through the base value setter (`set_native_value`) and rich
//!   content replacement (`set_rich_content`);
//! - synchronous notification dispatch plus listener registration;
//! - mutation observation with a configurable scope ([`ObserveScope`]) and a
//!   pause switch used to keep the engine's own writes out of the record queue.
//!
//! `MemoryDocument` (in `document/tree.rs`) is a complete in-process host used
//! by the tests and by embedders without a browser.
//!
//! ## Echo model
//!
//! `dispatch` is synchronous: listeners run before it returns, and a listener
//! may itself write and dispatch again. This is exactly how the engine's own
//! synthetic notifications come back to it, which is why the engine checks its
//! edit phase before touching any state (see `engine/fields.rs`).

#[path = "document/markup.rs"]
pub mod markup;
#[path = "document/tree.rs"]
mod tree;

pub use markup::{FragmentNode, LINE_BREAK_TOKEN};
pub use tree::MemoryDocument;

use crate::error::WriteError;
use std::rc::Rc;

/// Opaque handle to a node of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// The two shapes of interactive field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// A control whose content is a scalar `value` (text inputs, text areas).
    ValueField,
    /// An editable region whose content is a markup subtree.
    RichRegion,
}

/// Caret/selection as character offsets into a field's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn caret(at: usize) -> Self {
        Selection { start: at, end: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// Notification kinds the engine listens to and dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Input,
    Change,
}

/// A notification delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEvent {
    pub target: NodeId,
    pub kind: NotificationKind,
    /// `true` when dispatched by script rather than by the user agent.
    pub synthetic: bool,
}

impl FieldEvent {
    pub fn user(target: NodeId, kind: NotificationKind) -> Self {
        FieldEvent { target, kind, synthetic: false }
    }

    pub fn synthetic(target: NodeId, kind: NotificationKind) -> Self {
        FieldEvent { target, kind, synthetic: true }
    }
}

/// Listener callback. Receives the document so it can read and write while
/// the notification is being dispatched.
pub type Listener = Rc<dyn Fn(&mut dyn Document, &FieldEvent)>;

/// Registration handle returned by [`Document::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

bitflags::bitflags! {
    /// What a mutation observation reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObserveScope: u8 {
        /// Child insertions and removals.
        const CHILD_LIST     = 1 << 0;
        /// In-place text changes.
        const CHARACTER_DATA = 1 << 1;
        /// Report changes anywhere below the observed root, not only on it.
        const SUBTREE        = 1 << 2;
    }
}

impl ObserveScope {
    /// Structural + content changes across the whole subtree.
    pub fn everything() -> Self {
        ObserveScope::CHILD_LIST | ObserveScope::CHARACTER_DATA | ObserveScope::SUBTREE
    }
}

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    /// Children of `target` were inserted and/or removed.
    ChildList { target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId> },
    /// The text of `target` changed in place.
    CharacterData { target: NodeId },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            MutationRecord::ChildList { target, .. } | MutationRecord::CharacterData { target } => *target,
        }
    }
}

/// Host document as seen by the engine.
pub trait Document {
    fn root(&self) -> NodeId;

    /// Whether `node` is still connected to the tree.
    fn is_attached(&self, node: NodeId) -> bool;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    fn is_text(&self, node: NodeId) -> bool;

    /// Lowercase tag name for elements, `None` for text nodes.
    fn tag_name(&self, node: NodeId) -> Option<&str>;

    /// Content of a text node.
    fn text(&self, node: NodeId) -> Option<&str>;

    /// `Some` when `node` is an interactive field.
    fn field_kind(&self, node: NodeId) -> Option<FieldKind>;

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), WriteError>;

    /// Replace a text node by the nodes of `fragment`, keeping its siblings.
    /// Returns the inserted node ids in order.
    fn replace_with_fragment(&mut self, node: NodeId, fragment: &[FragmentNode]) -> Result<Vec<NodeId>, WriteError>;

    /// The committed text of a field: the value of a value field, or the text
    /// of a rich region with line-break elements read as `\n`.
    fn field_text(&self, field: NodeId) -> Option<String>;

    /// Set a value field through the base-class setter, bypassing any value
    /// tracker a reactive layer installed on the instance.
    fn set_native_value(&mut self, field: NodeId, value: &str) -> Result<(), WriteError>;

    /// Replace the content of a rich region.
    fn set_rich_content(&mut self, field: NodeId, fragment: &[FragmentNode]) -> Result<(), WriteError>;

    fn selection(&self, field: NodeId) -> Option<Selection>;

    fn set_selection(&mut self, field: NodeId, selection: Selection) -> Result<(), WriteError>;

    /// Deliver `event` synchronously to every registered listener.
    fn dispatch(&mut self, event: FieldEvent);

    fn add_listener(&mut self, listener: Listener) -> ListenerId;

    fn remove_listener(&mut self, id: ListenerId) -> bool;

    /// Start recording mutations under `root`.
    fn observe(&mut self, root: NodeId, scope: ObserveScope);

    /// Stop recording and drop pending records.
    fn disconnect(&mut self);

    /// Suspend or resume recording; returns the previous state.
    fn pause_observation(&mut self, paused: bool) -> bool;

    /// Drain pending records.
    fn take_records(&mut self) -> Vec<MutationRecord>;

    /// Position of `node` among its parent's children (0 for the root).
    fn sibling_index(&self, node: NodeId) -> usize {
        self.parent(node).and_then(|p| self.children(p).iter().position(|&c| c == node)).unwrap_or(0)
    }

    /// Ancestors of `node`, nearest first.
    fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(node);
        while let Some(p) = cur {
            out.push(p);
            cur = self.parent(p);
        }
        out
    }

    /// Whether `node` is `ancestor` or lies below it.
    fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        node == ancestor || self.ancestors(node).contains(&ancestor)
    }
}

/// Run `f` with mutation recording suspended, restoring the previous state.
pub fn with_observation_paused<R>(doc: &mut dyn Document, f: impl FnOnce(&mut dyn Document) -> R) -> R {
    let previous = doc.pause_observation(true);
    let out = f(&mut *doc);
    doc.pause_observation(previous);
    out
}
