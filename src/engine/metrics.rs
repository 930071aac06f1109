//! Engine counters.
//!
//! Two small structs let callers (and tests) observe what the engine did
//! without turning on logging:
//!
//! - [`ScanReport`]: one scan (full, scoped or single-node).
//! - [`EngineStats`]: running totals over the engine's lifetime, including the
//!   echo counter that makes reentrancy bugs visible.
//!
//! Both are plain data and cheap to copy around.

use std::ops::AddAssign;
use std::time::Duration;

/// Outcome of one scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Eligible text nodes considered.
    pub visited: usize,
    /// Nodes skipped because their key was already tracked.
    pub skipped: usize,
    /// Nodes inspected with no rule matching.
    pub unchanged: usize,
    /// Nodes whose content was rewritten.
    pub rewritten: usize,
    /// Rewrites that failed to commit (original content kept).
    pub failed: usize,
    pub duration: Duration,
}

impl ScanReport {
    pub fn mutated(&self) -> bool {
        self.rewritten > 0
    }
}

impl AddAssign<&ScanReport> for ScanReport {
    fn add_assign(&mut self, other: &ScanReport) {
        self.visited += other.visited;
        self.skipped += other.skipped;
        self.unchanged += other.unchanged;
        self.rewritten += other.rewritten;
        self.failed += other.failed;
        self.duration += other.duration;
    }
}

/// Lifetime totals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Times the rule set was replaced.
    pub rule_changes: u64,
    /// Full-document scans (initial, backstop, explicit).
    pub full_scans: u64,
    /// Scoped scans run from mutation notifications.
    pub incremental_scans: u64,
    /// Edit notifications handled as genuine user edits.
    pub edits_handled: u64,
    /// Edits that led to a field rewrite.
    pub fields_rewritten: u64,
    /// Notifications recognised as the engine's own echo and ignored.
    pub echoes_suppressed: u64,
    /// Field writes that failed.
    pub write_failures: u64,
    /// Totals over all scans.
    pub scanned: ScanReport,
}
