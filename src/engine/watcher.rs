//! Mutation watching.
//!
//! The watcher turns bursts of mutation records into a small set of scoped
//! scan targets, so the engine only rescans what changed.
//!
//! ```text
//! records ──notify(now)──▶ pending, deadline = now + debounce
//! records ──notify(now')─▶ pending += .., deadline = now' + debounce   (coalesce)
//!                 tick(t >= deadline) ──take_due(doc)──▶ classify ──▶ [ScanTarget]
//! ```
//!
//! Classification:
//!
//! - added element        -> `ScanTarget::Subtree` (full scan logic on it)
//! - added text node      -> `ScanTarget::Node`
//! - character-data change -> `ScanTarget::Node` (the mutated node itself)
//! - removals             -> nothing
//!
//! Targets that were detached again before the scan runs are dropped, as are
//! targets already covered by another subtree target.
//!
//! The engine's own writes never reach the watcher: observation is paused for
//! the synchronous extent of every write (see `scanner.rs` and `fields.rs`).
//!
//! ## Backstop
//!
//! An optional, low-frequency full rescan catches anything the incremental path
//! missed. It is a safety net only; the incremental scan is the primary driver.

use crate::document::{Document, MutationRecord, NodeId};
use std::time::{Duration, Instant};
use tracing::trace;

/// Where a scoped scan should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanTarget {
    Subtree(NodeId),
    Node(NodeId),
}

impl ScanTarget {
    pub fn node(&self) -> NodeId {
        match self {
            ScanTarget::Subtree(n) | ScanTarget::Node(n) => *n,
        }
    }
}

/// Debounces mutation records and schedules the backstop rescan.
#[derive(Debug, Clone)]
pub struct MutationWatcher {
    debounce: Duration,
    deadline: Option<Instant>,
    pending: Vec<MutationRecord>,
    rescan_interval: Option<Duration>,
    last_full_scan: Option<Instant>,
    full_scan_requested: bool,
}

impl MutationWatcher {
    pub fn new(debounce: Duration, rescan_interval: Option<Duration>) -> Self {
        MutationWatcher {
            debounce,
            deadline: None,
            pending: Vec::new(),
            rescan_interval,
            last_full_scan: None,
            full_scan_requested: false,
        }
    }

    /// Queue `records` and restart the debounce window.
    pub fn notify(&mut self, records: Vec<MutationRecord>, now: Instant) {
        if records.is_empty() {
            return;
        }
        trace!(records = records.len(), pending = self.pending.len(), "mutations queued");
        self.pending.extend(records);
        self.deadline = Some(now + self.debounce);
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Classify the queued records once the window has elapsed.
    pub fn take_due(&mut self, doc: &dyn Document, now: Instant) -> Option<Vec<ScanTarget>> {
        if !self.is_due(now) {
            return None;
        }
        self.deadline = None;
        let records = std::mem::take(&mut self.pending);
        Some(classify(doc, &records))
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether the next tick should run a full scan: one was requested, or
    /// the backstop interval has elapsed.
    pub fn backstop_due(&self, now: Instant) -> bool {
        if self.full_scan_requested {
            return true;
        }
        match (self.rescan_interval, self.last_full_scan) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Ask for a full scan on the next tick regardless of the interval.
    pub fn request_full_scan(&mut self) {
        self.full_scan_requested = true;
    }

    pub fn full_scan_requested(&self) -> bool {
        self.full_scan_requested
    }

    /// Record a completed full scan. It covers everything queued so far.
    pub fn note_full_scan(&mut self, now: Instant) {
        self.last_full_scan = Some(now);
        self.full_scan_requested = false;
        self.pending.clear();
        self.deadline = None;
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let backstop = match (self.rescan_interval, self.last_full_scan) {
            (Some(interval), Some(last)) => Some(last + interval),
            _ => None,
        };
        match (self.deadline, backstop) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.deadline = None;
        self.last_full_scan = None;
        self.full_scan_requested = false;
    }
}

/// Turn records into deduplicated scan targets.
pub fn classify(doc: &dyn Document, records: &[MutationRecord]) -> Vec<ScanTarget> {
    let mut targets: Vec<ScanTarget> = Vec::new();
    let mut push = |t: ScanTarget| {
        if !targets.contains(&t) {
            targets.push(t);
        }
    };

    for record in records {
        match record {
            MutationRecord::ChildList { added, .. } => {
                for &node in added {
                    push(if doc.is_text(node) { ScanTarget::Node(node) } else { ScanTarget::Subtree(node) });
                }
            }
            MutationRecord::CharacterData { target } => push(ScanTarget::Node(*target)),
        }
    }

    let subtrees: Vec<NodeId> = targets
        .iter()
        .filter_map(|t| match t {
            ScanTarget::Subtree(n) => Some(*n),
            ScanTarget::Node(_) => None,
        })
        .collect();

    targets.retain(|t| {
        let node = t.node();
        doc.is_attached(node) && !subtrees.iter().any(|&s| s != node && doc.is_within(node, s))
    });
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MemoryDocument, ObserveScope};
    use pretty_assertions::assert_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn coalesces_bursts() {
        let mut doc = MemoryDocument::new();
        let t = doc.append_text(doc.root(), "x");
        let t0 = Instant::now();
        let mut watcher = MutationWatcher::new(ms(100), None);
        let rec = MutationRecord::CharacterData { target: t };

        watcher.notify(vec![rec.clone()], t0);
        watcher.notify(vec![rec.clone()], t0 + ms(80));
        assert_eq!(watcher.pending(), 2);
        assert!(!watcher.is_due(t0 + ms(120)), "second notification restarts the window");
        assert!(watcher.take_due(&doc, t0 + ms(150)).is_none());

        let due = watcher.take_due(&doc, t0 + ms(180)).unwrap();
        assert_eq!(due, vec![ScanTarget::Node(t)]);
        assert!(watcher.take_due(&doc, t0 + ms(500)).is_none());
    }

    #[test]
    fn empty_notification_does_not_arm() {
        let t0 = Instant::now();
        let mut watcher = MutationWatcher::new(ms(0), None);
        watcher.notify(Vec::new(), t0);
        assert!(!watcher.is_due(t0));
    }

    #[test]
    fn classifies_additions_edits_and_removals() {
        let mut doc = MemoryDocument::new();
        let keep = doc.append_text(doc.root(), "kept");
        doc.observe(doc.root(), ObserveScope::everything());

        let div = doc.append_element(doc.root(), "div");
        let inner = doc.append_text(div, "inside");
        let loose = doc.append_text(doc.root(), "loose");
        doc.edit_text(keep, "edited").unwrap();
        let gone = doc.append_element(doc.root(), "span");
        doc.remove(gone);

        let records = doc.take_records();
        let targets = classify(&doc, &records);
        // `inner` is covered by the `div` subtree; `gone` is detached.
        assert_eq!(targets, vec![ScanTarget::Subtree(div), ScanTarget::Node(loose), ScanTarget::Node(keep)]);
        assert!(doc.is_within(inner, div));
    }

    #[test]
    fn removal_only_yields_nothing() {
        let mut doc = MemoryDocument::new();
        let t = doc.append_text(doc.root(), "x");
        doc.observe(doc.root(), ObserveScope::everything());
        doc.remove(t);
        let records = doc.take_records();
        assert!(classify(&doc, &records).is_empty());
    }

    #[test]
    fn backstop_schedule() {
        let t0 = Instant::now();
        let mut watcher = MutationWatcher::new(ms(50), Some(ms(1000)));
        assert!(watcher.backstop_due(t0));
        watcher.note_full_scan(t0);
        assert!(!watcher.backstop_due(t0 + ms(999)));
        assert!(watcher.backstop_due(t0 + ms(1000)));
        assert_eq!(watcher.next_deadline(), Some(t0 + ms(1000)));

        watcher.notify(vec![MutationRecord::CharacterData { target: NodeId::from_raw(0) }], t0);
        assert_eq!(watcher.next_deadline(), Some(t0 + ms(50)));

        let mut off = MutationWatcher::new(ms(50), None);
        assert!(!off.backstop_due(t0));
        off.request_full_scan();
        assert!(off.backstop_due(t0));
        off.note_full_scan(t0);
        assert!(!off.backstop_due(t0 + ms(10_000)));
    }

    #[test]
    fn full_scan_supersedes_queued_records() {
        let mut doc = MemoryDocument::new();
        let t = doc.append_text(doc.root(), "x");
        let t0 = Instant::now();
        let mut watcher = MutationWatcher::new(ms(10), None);
        watcher.notify(vec![MutationRecord::CharacterData { target: t }], t0);
        watcher.note_full_scan(t0);
        assert_eq!(watcher.pending(), 0);
        assert!(watcher.take_due(&doc, t0 + ms(20)).is_none());
    }
}
