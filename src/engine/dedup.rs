//! Processing keys and the idempotency tracker.
//!
//! Scanning is repeated constantly (every mutation burst, every backstop
//! rescan). Without a record of what was already handled, the engine would:
//!
//! - re-apply rules to its own output (`a -> aa` turning into `aaaa...`);
//! - redo the regex work for every unchanged node on every scan.
//!
//! ## What counts as "the same content"
//!
//! The key combines:
//!
//! - the text itself;
//! - the parent element's tag;
//! - the node's position among its siblings.
//!
//! Keys are content + location based, not node-identity based, because writes
//! replace nodes (a text node becomes a text/`br`/text fragment) and a node id
//! says nothing about what the node holds now.
//!
//! ## Engine output inside edited content
//!
//! A key only says "this exact text was handled". Once a page script (or the
//! user, in a field) edits text that already holds engine output, the key is
//! new and the content gets another pass. To keep that pass off the engine's
//! own output the tracker also remembers, per node, what was last written and
//! which byte ranges of it are replacement output ([`WrittenOutput`]). The
//! ranges the edit left intact are handed to the substitution engine as
//! protected.
//!
//! ```text
//! written "Dr."      spans [0..3)
//! now     "Dr. Smith"         common prefix "Dr."  -> [0..3) survives
//! now     "Dr"                prefix "Dr"          -> [0..2) survives
//! ```
//!
//! ## Lifetime
//!
//! A key is only valid for the rule set it was inspected under. The engine
//! calls [`IdempotencyTracker::reset`] on every rule change; otherwise stale
//! keys would suppress rewrites the new rules call for. Recorded output goes
//! with them: under new rules all text is fair game again.
//!
//! ## Bound
//!
//! Unbounded by default. With a capacity the oldest inserted key is evicted
//! first; an evicted key only costs one redundant inspection later.

use crate::document::{Document, NodeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use tracing::debug;

/// Identity of "this text at this place".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessingKey {
    pub content: String,
    pub parent_tag: Option<String>,
    pub sibling_index: usize,
}

impl ProcessingKey {
    pub fn new(content: impl Into<String>, parent_tag: Option<&str>, sibling_index: usize) -> Self {
        ProcessingKey { content: content.into(), parent_tag: parent_tag.map(str::to_string), sibling_index }
    }

    /// Key for a text node as it currently stands in `doc`.
    pub fn for_node(doc: &dyn Document, node: NodeId) -> Option<Self> {
        let content = doc.text(node)?;
        let parent_tag = doc.parent(node).and_then(|p| doc.tag_name(p));
        Some(ProcessingKey::new(content, parent_tag, doc.sibling_index(node)))
    }
}

/// What the engine last wrote into a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenOutput {
    pub content: String,
    /// Sorted byte ranges of `content` that are replacement output.
    pub spans: Vec<Range<usize>>,
}

impl WrittenOutput {
    /// The parts of [`WrittenOutput::spans`] that are still unchanged once the
    /// node reads `current`, in `current`'s offsets.
    ///
    /// The edit is taken to be whatever lies between the common prefix and
    /// the common suffix; output inside it is the editor's text now.
    pub fn surviving_spans(&self, current: &str) -> Vec<Range<usize>> {
        let old = self.content.as_str();
        let prefix: usize = old.chars().zip(current.chars()).take_while(|(a, b)| a == b).map(|(a, _)| a.len_utf8()).sum();
        let suffix: usize = old[prefix..]
            .chars()
            .rev()
            .zip(current[prefix..].chars().rev())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();
        let (old_tail, new_tail) = (old.len() - suffix, current.len() - suffix);

        let mut out = Vec::new();
        for span in &self.spans {
            if span.start < prefix {
                out.push(span.start..span.end.min(prefix));
            }
            if span.end > old_tail {
                let start = span.start.max(old_tail);
                out.push(start - old_tail + new_tail..span.end - old_tail + new_tail);
            }
        }
        out
    }
}

/// Registry of keys already inspected under the current rule set, plus the
/// output written per node.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyTracker {
    seen: HashSet<ProcessingKey>,
    order: VecDeque<ProcessingKey>,
    capacity: Option<usize>,
    written: HashMap<NodeId, WrittenOutput>,
}

impl IdempotencyTracker {
    pub fn new(capacity: Option<usize>) -> Self {
        IdempotencyTracker {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.filter(|&c| c > 0),
            written: HashMap::new(),
        }
    }

    pub fn should_process(&self, key: &ProcessingKey) -> bool {
        !self.seen.contains(key)
    }

    pub fn mark_processed(&mut self, key: ProcessingKey) {
        if self.seen.contains(&key) {
            return;
        }
        if self.capacity.is_some() {
            self.order.push_back(key.clone());
        }
        self.seen.insert(key);

        if let Some(cap) = self.capacity {
            while self.seen.len() > cap {
                let Some(oldest) = self.order.pop_front() else { break };
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn reset(&mut self) {
        if !self.seen.is_empty() || !self.written.is_empty() {
            debug!(dropped = self.seen.len(), outputs = self.written.len(), "tracker reset");
        }
        self.seen.clear();
        self.order.clear();
        self.written.clear();
    }

    /// Remember that `node` now holds `content` with engine output at `spans`.
    /// Content without output is not worth remembering.
    pub fn record_output(&mut self, node: NodeId, content: impl Into<String>, spans: Vec<Range<usize>>) {
        if spans.is_empty() {
            self.written.remove(&node);
        } else {
            self.written.insert(node, WrittenOutput { content: content.into(), spans });
        }
    }

    pub fn output(&self, node: NodeId) -> Option<&WrittenOutput> {
        self.written.get(&node)
    }

    /// Engine output still present in `node`, which now reads `current`.
    pub fn protected_spans(&self, node: NodeId, current: &str) -> Vec<Range<usize>> {
        self.written.get(&node).map(|w| w.surviving_spans(current)).unwrap_or_default()
    }

    pub fn forget_output(&mut self, node: NodeId) {
        self.written.remove(&node);
    }

    /// Drop recorded output for nodes `keep` rejects (typically detached ones).
    pub fn retain_outputs(&mut self, mut keep: impl FnMut(NodeId) -> bool) {
        self.written.retain(|&node, _| keep(node));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;

    #[test]
    fn marks_and_suppresses() {
        let mut tracker = IdempotencyTracker::default();
        let key = ProcessingKey::new("hello", Some("p"), 0);
        assert!(tracker.should_process(&key));
        tracker.mark_processed(key.clone());
        assert!(!tracker.should_process(&key));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn location_distinguishes_identical_text() {
        let mut tracker = IdempotencyTracker::default();
        tracker.mark_processed(ProcessingKey::new("hello", Some("p"), 0));
        assert!(tracker.should_process(&ProcessingKey::new("hello", Some("p"), 1)));
        assert!(tracker.should_process(&ProcessingKey::new("hello", Some("li"), 0)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut tracker = IdempotencyTracker::new(Some(4));
        tracker.mark_processed(ProcessingKey::new("a", None, 0));
        tracker.reset();
        assert!(tracker.is_empty());
        assert!(tracker.should_process(&ProcessingKey::new("a", None, 0)));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut tracker = IdempotencyTracker::new(Some(2));
        let keys: Vec<_> = (0..3).map(|i| ProcessingKey::new(format!("t{i}"), None, 0)).collect();
        for k in &keys {
            tracker.mark_processed(k.clone());
        }
        assert_eq!(tracker.len(), 2);
        assert!(tracker.should_process(&keys[0]));
        assert!(!tracker.should_process(&keys[1]));
        assert!(!tracker.should_process(&keys[2]));
    }

    #[test]
    fn output_survives_appends_and_partial_edits() {
        let written = WrittenOutput { content: "Dr.".into(), spans: vec![0..3] };
        assert_eq!(written.surviving_spans("Dr."), vec![0..3]);
        assert_eq!(written.surviving_spans("Dr. Smith"), vec![0..3]);
        assert_eq!(written.surviving_spans("Hi Dr."), vec![3..6]);
        // The user took the dot back out; what is left of the output stays.
        assert_eq!(written.surviving_spans("Dr"), vec![0..2]);
        assert_eq!(written.surviving_spans("Mr."), vec![1..3]);
    }

    #[test]
    fn recorded_output_is_dropped_on_reset() {
        let mut doc = MemoryDocument::new();
        let node = doc.append_text(doc.root(), "hi");
        let mut tracker = IdempotencyTracker::default();
        tracker.record_output(node, "hi", vec![0..2]);
        assert_eq!(tracker.protected_spans(node, "hi there"), vec![0..2]);

        tracker.reset();
        assert!(tracker.protected_spans(node, "hi there").is_empty());
        tracker.record_output(node, "hi", Vec::new());
        assert_eq!(tracker.output(node), None);
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        assert_eq!(IdempotencyTracker::new(Some(0)).capacity(), None);
    }

    #[test]
    fn key_from_document_node() {
        let mut doc = MemoryDocument::new();
        let li = doc.append_element(doc.root(), "li");
        doc.append_text(li, "first");
        let second = doc.append_text(li, "second");
        assert_eq!(ProcessingKey::for_node(&doc, second), Some(ProcessingKey::new("second", Some("li"), 1)));
        assert_eq!(ProcessingKey::for_node(&doc, li), None);
    }
}
