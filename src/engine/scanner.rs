//! Passive content scanning.
//!
//! The scanner walks a subtree, picks out eligible text nodes and routes each
//! through the substitution engine in markup-capable mode.
//!
//! ```text
//! root ── TextWalker ──▶ [text nodes, document order]
//!                            │ key tracked?      -> skip
//!                            │ apply(MarkupCapable, protected = earlier output)
//!                            │ unchanged         -> mark key
//!                            └ changed
//!                                ├ no break in output -> set_text
//!                                └ break in output    -> split, splice in place
//!                                   mark pre-write key + keys of what was written
//!                                   record output spans per written node
//! ```
//!
//! ## Exclusions
//!
//! Subtrees rooted at `script`, `style`, `noscript` and `template` elements
//! are never visited. Neither are interactive fields: their content belongs to
//! the field's input path (`fields.rs`), and rewriting it passively would
//! double-process it and corrupt the caret. A scan whose root already sits
//! inside an excluded container yields nothing.
//!
//! ## Idempotence
//!
//! After a write the scanner marks the key of the content it *produced*, so a
//! second scan finds every node already tracked and mutates nothing. Write
//! failures are marked too: retrying a failed write risks applying twice.
//!
//! Keys do not cover text that changes in place after a write. For that the
//! scanner records the output spans of every node it writes, and the next
//! pass over that node leaves them alone (see `dedup.rs`). A `<br>` that was
//! already in the page text is never turned into a break.
//!
//! All writes happen with mutation observation paused.

use super::dedup::{IdempotencyTracker, ProcessingKey};
use super::metrics::ScanReport;
use super::substitute::{Substitution, SubstitutionEngine};
use crate::RenderContext;
use crate::document::markup::{FragmentNode, split_output};
use crate::document::{Document, NodeId, with_observation_paused};
use crate::error::WriteError;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Elements whose text is never content.
pub const EXCLUDED_CONTAINERS: &[&str] = &["script", "style", "noscript", "template"];

/// Whether the subtree at `node` is off limits to passive scanning.
pub fn is_excluded_container(doc: &dyn Document, node: NodeId) -> bool {
    doc.field_kind(node).is_some() || doc.tag_name(node).map(|t| EXCLUDED_CONTAINERS.contains(&t)).unwrap_or(false)
}

/// Depth-first, document-order iterator over eligible text nodes.
pub struct TextWalker<'d> {
    doc: &'d dyn Document,
    root: NodeId,
    stack: Vec<NodeId>,
}

impl<'d> TextWalker<'d> {
    pub fn new(doc: &'d dyn Document, root: NodeId) -> Self {
        let mut walker = TextWalker { doc, root, stack: Vec::new() };
        walker.restart();
        walker
    }

    /// Rewind to the beginning of the subtree.
    pub fn restart(&mut self) {
        self.stack.clear();
        let blocked = self.doc.ancestors(self.root).into_iter().any(|a| is_excluded_container(self.doc, a));
        if !blocked && self.doc.is_attached(self.root) {
            self.stack.push(self.root);
        }
    }
}

impl Iterator for TextWalker<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(node) = self.stack.pop() {
            if self.doc.is_text(node) {
                return Some(node);
            }
            if is_excluded_container(self.doc, node) {
                continue;
            }
            self.stack.extend(self.doc.children(node).into_iter().rev());
        }
        None
    }
}

/// Runs substitutions over passive text.
pub struct DocumentScanner<'a> {
    engine: &'a SubstitutionEngine,
    tracker: &'a mut IdempotencyTracker,
}

impl<'a> DocumentScanner<'a> {
    pub fn new(engine: &'a SubstitutionEngine, tracker: &'a mut IdempotencyTracker) -> Self {
        DocumentScanner { engine, tracker }
    }

    /// Scan every eligible text node under `root`.
    pub fn scan(&mut self, doc: &mut dyn Document, root: NodeId) -> ScanReport {
        let start = Instant::now();
        let nodes: Vec<NodeId> = TextWalker::new(doc, root).collect();
        let mut report = ScanReport::default();

        with_observation_paused(doc, |doc| {
            for node in nodes {
                self.process(doc, node, &mut report);
            }
        });

        report.duration = start.elapsed();
        if report.visited > 0 {
            debug!(
                root = root.raw(),
                visited = report.visited,
                rewritten = report.rewritten,
                skipped = report.skipped,
                failed = report.failed,
                "scan finished"
            );
        }
        report
    }

    /// Treat a single text node as the only candidate.
    pub fn scan_node(&mut self, doc: &mut dyn Document, node: NodeId) -> ScanReport {
        // The walker applies the same exclusions to a lone text node.
        self.scan(doc, node)
    }

    fn process(&mut self, doc: &mut dyn Document, node: NodeId, report: &mut ScanReport) {
        // Earlier splices in this scan may have detached the node.
        if !doc.is_attached(node) {
            return;
        }
        let Some(key) = ProcessingKey::for_node(doc, node) else { return };
        report.visited += 1;

        if !self.tracker.should_process(&key) {
            report.skipped += 1;
            return;
        }

        let protected = self.tracker.protected_spans(node, &key.content);
        let result = self.engine.apply_protected(&key.content, RenderContext::MarkupCapable, &protected);
        if !result.changed {
            self.tracker.record_output(node, key.content.clone(), result.spans);
            self.tracker.mark_processed(key);
            report.unchanged += 1;
            return;
        }

        match self.write(doc, node, &result) {
            Ok(written) => {
                trace!(node = node.raw(), rules = ?result.applied, "rewrote text node");
                for k in written {
                    self.tracker.mark_processed(k);
                }
                report.rewritten += 1;
            }
            Err(error) => {
                warn!(node = node.raw(), %error, "text rewrite failed; keeping original");
                report.failed += 1;
            }
        }
        self.tracker.mark_processed(key);
    }

    /// Commit `result` in place of `node`; returns keys of the written text nodes.
    fn write(&mut self, doc: &mut dyn Document, node: NodeId, result: &Substitution) -> Result<Vec<ProcessingKey>, WriteError> {
        let pieces = split_output(&result.text, &result.spans);
        if pieces.iter().all(|(piece, _)| matches!(piece, FragmentNode::Text(_))) {
            doc.set_text(node, &result.text)?;
            self.tracker.record_output(node, result.text.as_str(), result.spans.clone());
            return Ok(ProcessingKey::for_node(doc, node).into_iter().collect());
        }

        let fragment: Vec<FragmentNode> = pieces.iter().map(|(piece, _)| piece.clone()).collect();
        let added = doc.replace_with_fragment(node, &fragment)?;
        self.tracker.forget_output(node);
        let mut keys = Vec::with_capacity(added.len());
        for (id, (piece, spans)) in added.into_iter().zip(pieces) {
            if let FragmentNode::Text(text) = piece {
                self.tracker.record_output(id, text, spans);
            }
            keys.extend(ProcessingKey::for_node(doc, id));
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;
    use crate::engine::compiled_rules::{CompiledRules, PatternCompiler};
    use crate::engine::substitute::DEFAULT_MAX_TEXT_LEN;
    use crate::rules::{ReplacementRule, RuleSet};
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn engine(pairs: &[(&str, &str)]) -> SubstitutionEngine {
        let rules: RuleSet = pairs.iter().map(|(f, t)| ReplacementRule::new(*f, *t)).collect();
        SubstitutionEngine::new(Rc::new(CompiledRules::new(&rules, &PatternCompiler::default(), 1)), DEFAULT_MAX_TEXT_LEN)
    }

    #[test]
    fn walker_skips_scripts_styles_and_fields() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let p = doc.append_element(root, "p");
        let visible = doc.append_text(p, "visible");
        let script = doc.append_element(root, "script");
        doc.append_text(script, "var hello = 1;");
        let style = doc.append_element(root, "style");
        doc.append_text(style, "p { color: red }");
        let region = doc.append_rich_region(root, "typed");
        doc.append_value_field(root, "input", "value");
        let tail = doc.append_text(root, "tail");

        let found: Vec<NodeId> = TextWalker::new(&doc, root).collect();
        assert_eq!(found, vec![visible, tail]);

        // A walk rooted inside a field yields nothing.
        let inner = doc.children(region)[0];
        assert_eq!(TextWalker::new(&doc, inner).count(), 0);
    }

    #[test]
    fn walker_restarts() {
        let mut doc = MemoryDocument::new();
        doc.append_text(doc.root(), "a");
        doc.append_text(doc.root(), "b");
        let mut walker = TextWalker::new(&doc, doc.root());
        assert_eq!(walker.by_ref().count(), 2);
        walker.restart();
        assert_eq!(walker.count(), 2);
    }

    #[test]
    fn rewrites_plain_text_in_place() {
        let mut doc = MemoryDocument::new();
        let p = doc.append_element(doc.root(), "p");
        let t = doc.append_text(p, "hello world");
        let engine = engine(&[("hello", "hi")]);
        let mut tracker = IdempotencyTracker::default();

        let root = doc.root();
        let report = DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(report.rewritten, 1);
        assert_eq!(doc.text(t), Some("hi world"));
    }

    #[test]
    fn multiline_result_is_spliced_as_fragment() {
        let mut doc = MemoryDocument::new();
        let p = doc.append_element(doc.root(), "p");
        let em = doc.append_element(p, "em");
        doc.append_text(em, "lead");
        doc.append_text(p, "sig");
        doc.append_text(p, "!");
        let engine = engine(&[("sig", "Best,\nName")]);
        let mut tracker = IdempotencyTracker::default();

        let root = doc.root();
        DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(doc.inner_markup(p), "<em>lead</em>Best,<br>Name!");
    }

    #[test]
    fn page_text_that_looks_like_a_break_stays_text() {
        let mut doc = MemoryDocument::new();
        let p = doc.append_element(doc.root(), "p");
        let t = doc.append_text(p, "use <br> for hello");
        let engine = engine(&[("hello", "hi")]);
        let mut tracker = IdempotencyTracker::default();

        let root = doc.root();
        DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(doc.text(t), Some("use <br> for hi"));
        assert_eq!(doc.children(p).len(), 1);
    }

    #[test]
    fn edited_output_is_not_rewritten_again() {
        let mut doc = MemoryDocument::new();
        let p = doc.append_element(doc.root(), "p");
        let t = doc.append_text(p, "Dr");
        let engine = engine(&[("Dr", "Dr.")]);
        let mut tracker = IdempotencyTracker::default();

        let root = doc.root();
        DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(doc.text(t), Some("Dr."));

        doc.edit_text(t, "Dr. Smith and Dr").unwrap();
        DocumentScanner::new(&engine, &mut tracker).scan_node(&mut doc, t);
        assert_eq!(doc.text(t), Some("Dr. Smith and Dr."));
        assert_eq!(tracker.output(t).map(|w| w.spans.clone()), Some(vec![0..3, 14..17]));
    }

    #[test]
    fn second_scan_mutates_nothing() {
        let mut doc = MemoryDocument::new();
        let p = doc.append_element(doc.root(), "p");
        let t = doc.append_text(p, "a");
        doc.append_text(p, "sig here");
        let engine = engine(&[("a", "aa"), ("sig", "x\ny")]);
        let mut tracker = IdempotencyTracker::default();

        let root = doc.root();
        let first = DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(first.rewritten, 2);
        let markup = doc.inner_markup(p);

        let root = doc.root();
        let second = DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(second.rewritten, 0);
        assert_eq!(second.skipped, second.visited);
        assert_eq!(doc.inner_markup(p), markup);
        assert_eq!(doc.text(t), Some("aa"));
    }

    #[test]
    fn failed_write_keeps_original_and_is_not_retried() {
        let mut doc = MemoryDocument::new();
        let p = doc.append_element(doc.root(), "p");
        let t = doc.append_text(p, "hello");
        doc.set_read_only(p, true);
        let engine = engine(&[("hello", "hi")]);
        let mut tracker = IdempotencyTracker::default();

        let root = doc.root();
        let report = DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(report.failed, 1);
        assert_eq!(doc.text(t), Some("hello"));

        doc.set_read_only(p, false);
        let root = doc.root();
        let again = DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert_eq!(again.skipped, 1);
        assert_eq!(doc.text(t), Some("hello"));
    }

    #[test]
    fn scan_writes_are_not_recorded() {
        let mut doc = MemoryDocument::new();
        let p = doc.append_element(doc.root(), "p");
        doc.append_text(p, "sig and hello");
        doc.observe(doc.root(), crate::document::ObserveScope::everything());
        let engine = engine(&[("hello", "hi"), ("sig", "a\nb")]);
        let mut tracker = IdempotencyTracker::default();

        let root = doc.root();
        DocumentScanner::new(&engine, &mut tracker).scan(&mut doc, root);
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn scan_node_respects_exclusions() {
        let mut doc = MemoryDocument::new();
        let script = doc.append_element(doc.root(), "script");
        let code = doc.append_text(script, "hello");
        let engine = engine(&[("hello", "hi")]);
        let mut tracker = IdempotencyTracker::default();

        let report = DocumentScanner::new(&engine, &mut tracker).scan_node(&mut doc, code);
        assert_eq!(report.visited, 0);
        assert_eq!(doc.text(code), Some("hello"));
    }
}
