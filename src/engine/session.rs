//! The running engine.
//!
//! [`Engine`] ties the pieces together and owns their lifecycle:
//!
//! ```text
//! Engine::new(options)
//!     │ connect(source) / set_rules(rules)   compile, swap Rc<CompiledRules>, reset tracker,
//!     │                                      request a full scan on the next tick
//!     ▼
//! attach(doc, now)      observe(root, everything), add listener, initial full scan
//!     │
//!     ├─ listener(Input | Change) ──▶ handle_input  (fields.rs write path)
//!     ├─ tick(doc, now)           ──▶ take_records ─▶ watcher ─▶ scoped scans
//!     │                                              └▶ backstop / requested full scan
//!     ▼
//! detach(doc)           disconnect, remove listener, clear tracker and queued work
//! ```
//!
//! ## Borrowing across re-entrant dispatch
//!
//! `Engine` is a cheap `Clone` handle: the listener registered on the document
//! holds one. A field write dispatches notifications synchronously, and those
//! come straight back into `handle_input` while the first call is still on the
//! stack. Two rules keep that sound:
//!
//! - the edit-cycle phase (a `Cell`) is checked *before* any `RefCell` borrow;
//! - the state borrow is released before the write starts.
//!
//! ## Keystrokes after a rewrite
//!
//! Every user edit runs the rules over the whole field value, which still
//! holds what the engine wrote on an earlier keystroke. The output spans of
//! each field write are recorded in the tracker, and the next edit passes the
//! ones the user left intact as protected. So `Dr -> Dr.` fires once, not on
//! every following keystroke.

use super::compiled_rules::{CompiledRules, PatternCompiler};
use super::dedup::IdempotencyTracker;
use super::fields::{EditCycle, FieldPhase, FieldWriteAdapter, caret_after_rewrite};
use super::metrics::{EngineStats, ScanReport};
use super::scanner::DocumentScanner;
use super::substitute::{Substitution, SubstitutionEngine};
use super::watcher::{MutationWatcher, ScanTarget};
use crate::RenderContext;
use crate::api::Options;
use crate::document::markup::output_text;
use crate::document::{Document, FieldEvent, FieldKind, ListenerId, NodeId, ObserveScope};
use crate::rules::RuleSet;
use crate::source::{RuleSource, SubscriptionId};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, trace, warn};

struct EngineState {
    options: Options,
    compiler: PatternCompiler,
    rules: RuleSet,
    substitution: SubstitutionEngine,
    tracker: IdempotencyTracker,
    watcher: MutationWatcher,
    adapter: FieldWriteAdapter,
    listener: Option<ListenerId>,
    root: Option<NodeId>,
    stats: EngineStats,
}

impl EngineState {
    fn new(options: Options) -> Self {
        let compiler = options.compiler();
        let substitution = SubstitutionEngine::new(Rc::new(CompiledRules::default()), options.max_text_len);
        EngineState {
            compiler,
            rules: RuleSet::empty(),
            substitution,
            tracker: IdempotencyTracker::new(options.tracker_capacity),
            watcher: MutationWatcher::new(options.debounce, options.full_rescan_interval),
            adapter: FieldWriteAdapter::new(options.dispatch_change),
            listener: None,
            root: None,
            stats: EngineStats::default(),
            options,
        }
    }

    fn install(&mut self, rules: RuleSet) {
        let generation = self.substitution.compiled().generation + 1;
        let compiled = Rc::new(CompiledRules::new(&rules, &self.compiler, generation));
        self.substitution = SubstitutionEngine::new(compiled, self.options.max_text_len);
        self.rules = rules;
        self.tracker.reset();
        self.watcher.request_full_scan();
        self.stats.rule_changes += 1;
    }

    fn full_scan(&mut self, doc: &mut dyn Document, root: NodeId, now: Instant) -> ScanReport {
        self.tracker.retain_outputs(|node| doc.is_attached(node));
        let report = DocumentScanner::new(&self.substitution, &mut self.tracker).scan(doc, root);
        self.watcher.note_full_scan(now);
        self.stats.full_scans += 1;
        self.stats.scanned += &report;
        report
    }

    fn scoped_scan(&mut self, doc: &mut dyn Document, targets: Vec<ScanTarget>) -> ScanReport {
        let mut report = ScanReport::default();
        let mut scanner = DocumentScanner::new(&self.substitution, &mut self.tracker);
        for target in targets {
            // A scan earlier in this batch may have spliced the target away.
            if !doc.is_attached(target.node()) {
                continue;
            }
            let part = match target {
                ScanTarget::Subtree(node) => scanner.scan(doc, node),
                ScanTarget::Node(node) => scanner.scan_node(doc, node),
            };
            report += &part;
        }
        self.stats.incremental_scans += 1;
        self.stats.scanned += &report;
        report
    }
}

/// Handle to a live substitution engine. Clones share state.
#[derive(Clone)]
pub struct Engine {
    state: Rc<RefCell<EngineState>>,
    cycle: Rc<EditCycle>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Engine");
        match self.state.try_borrow() {
            Ok(state) => {
                d.field("rules", &state.rules.len()).field("attached", &state.root.is_some());
            }
            Err(_) => {
                d.field("state", &"<borrowed>");
            }
        }
        d.field("phase", &self.cycle.phase()).finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl Engine {
    /// A detached engine with an empty rule set.
    pub fn new(options: Options) -> Self {
        Engine { state: Rc::new(RefCell::new(EngineState::new(options))), cycle: Rc::new(EditCycle::new()) }
    }

    pub fn with_rules(options: Options, rules: RuleSet) -> Self {
        let engine = Self::new(options);
        engine.set_rules(rules);
        engine
    }

    /// Replace the rule set. Recompiles, clears the tracker and asks for a full
    /// scan on the next [`Engine::tick`].
    pub fn set_rules(&self, rules: RuleSet) {
        let mut state = self.state.borrow_mut();
        let count = rules.len();
        state.install(rules);
        let compiled = state.substitution.compiled();
        debug!(
            generation = compiled.generation,
            rules = count,
            compiled = compiled.len(),
            skipped = compiled.skipped.len(),
            "rule set installed"
        );
    }

    /// Load the current rules from `source` and follow its updates.
    ///
    /// An unavailable or malformed source leaves the engine running with no
    /// rules until the source publishes again.
    pub fn connect(&self, source: &dyn RuleSource) -> SubscriptionId {
        let rules = match source.current_rules() {
            Ok(rules) => rules,
            Err(error) => {
                warn!(%error, "rule source failed; running with an empty rule set");
                RuleSet::empty()
            }
        };
        self.set_rules(rules);

        let engine = self.clone();
        source.subscribe(Rc::new(move |rules: &RuleSet| engine.set_rules(rules.clone())))
    }

    pub fn rules(&self) -> RuleSet {
        self.state.borrow().rules.clone()
    }

    /// The compiled snapshot currently in use.
    pub fn compiled(&self) -> Rc<CompiledRules> {
        Rc::clone(self.state.borrow().substitution.compiled())
    }

    pub fn options(&self) -> Options {
        self.state.borrow().options.clone()
    }

    /// Run the current rules over `text` without touching any document.
    pub fn apply(&self, text: &str, ctx: RenderContext) -> Substitution {
        self.state.borrow().substitution.apply(text, ctx)
    }

    pub fn is_attached(&self) -> bool {
        self.state.borrow().root.is_some()
    }

    /// Start observing `doc`, listen for field edits and scan the whole document.
    ///
    /// Attaching an already attached engine re-attaches it.
    pub fn attach(&self, doc: &mut dyn Document, now: Instant) -> ScanReport {
        if self.is_attached() {
            self.detach(doc);
        }

        let root = doc.root();
        doc.observe(root, ObserveScope::everything());
        let engine = self.clone();
        let listener =
            doc.add_listener(Rc::new(move |doc: &mut dyn Document, event: &FieldEvent| engine.handle_input(doc, event)));

        let mut state = self.state.borrow_mut();
        state.listener = Some(listener);
        state.root = Some(root);
        debug!(root = root.raw(), "attached");
        state.full_scan(doc, root, now)
    }

    /// Stop observing and listening; drop tracked keys and queued work.
    pub fn detach(&self, doc: &mut dyn Document) {
        let mut state = self.state.borrow_mut();
        doc.disconnect();
        if let Some(listener) = state.listener.take() {
            doc.remove_listener(listener);
        }
        state.root = None;
        state.tracker.reset();
        state.watcher.clear();
        debug!("detached");
    }

    /// Full scan of the attached root (or of the document root when detached).
    pub fn scan(&self, doc: &mut dyn Document, now: Instant) -> ScanReport {
        let mut state = self.state.borrow_mut();
        let root = state.root.unwrap_or_else(|| doc.root());
        state.full_scan(doc, root, now)
    }

    /// Drive time-based work: feed new mutation records to the watcher and run
    /// whatever scan is due at `now`.
    pub fn tick(&self, doc: &mut dyn Document, now: Instant) -> ScanReport {
        let mut state = self.state.borrow_mut();
        let Some(root) = state.root else { return ScanReport::default() };

        let records = doc.take_records();
        state.watcher.notify(records, now);

        if state.watcher.backstop_due(now) {
            trace!("full scan due");
            return state.full_scan(doc, root, now);
        }

        match state.watcher.take_due(doc, now) {
            Some(targets) if !targets.is_empty() => {
                trace!(targets = targets.len(), "scoped scan");
                state.scoped_scan(doc, targets)
            }
            _ => ScanReport::default(),
        }
    }

    /// Earliest instant at which [`Engine::tick`] has timed work; `None` when idle.
    /// A requested full scan is not timed; see [`Engine::full_scan_pending`].
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.borrow().watcher.next_deadline()
    }

    pub fn full_scan_pending(&self) -> bool {
        self.state.borrow().watcher.full_scan_requested()
    }

    /// Handle an edit notification for an interactive field.
    ///
    /// Called by the registered listener; callable directly by hosts that
    /// route notifications themselves.
    pub fn handle_input(&self, doc: &mut dyn Document, event: &FieldEvent) {
        if !self.cycle.begin_edit() {
            trace!(field = event.target.raw(), kind = ?event.kind, "echo suppressed");
            return;
        }
        self.rewrite_field(doc, event.target);
    }

    fn rewrite_field(&self, doc: &mut dyn Document, field: NodeId) {
        let (Some(kind), Some(old)) = (doc.field_kind(field), doc.field_text(field)) else {
            self.cycle.finish_edit();
            return;
        };

        let (new_value, spans, adapter) = {
            let mut state = self.state.borrow_mut();
            state.stats.edits_handled += 1;
            let protected = state.tracker.protected_spans(field, &old);
            let (value, spans, changed) = match kind {
                FieldKind::ValueField => {
                    let result = state.substitution.apply_protected(&old, RenderContext::PlainText, &protected);
                    (result.text, result.spans, result.changed)
                }
                FieldKind::RichRegion => {
                    // Existing breaks arrive as "\n", inserted ones as the token.
                    let result = state.substitution.apply_protected(&old, RenderContext::MarkupCapable, &protected);
                    let (plain, spans) = output_text(&result.text, &result.spans);
                    (plain, spans, result.changed)
                }
            };
            if !changed {
                state.tracker.record_output(field, old, spans);
                self.cycle.finish_edit();
                return;
            }
            (value, spans, state.adapter)
        };

        let caret = doc.selection(field).map(|sel| caret_after_rewrite(&old, &new_value, sel.end));
        let written = {
            let _rewriting = self.cycle.rewriting();
            adapter.write(doc, field, kind, &new_value, caret)
        };

        let mut state = self.state.borrow_mut();
        match written {
            Ok(()) => {
                state.tracker.record_output(field, new_value, spans);
                state.stats.fields_rewritten += 1;
                debug!(field = field.raw(), ?kind, "field rewritten");
            }
            Err(error) => {
                state.stats.write_failures += 1;
                warn!(field = field.raw(), %error, "field rewrite failed; keeping user text");
            }
        }
    }

    pub fn phase(&self) -> FieldPhase {
        self.cycle.phase()
    }

    /// Counters so far.
    pub fn stats(&self) -> EngineStats {
        let mut stats = self.state.borrow().stats.clone();
        stats.echoes_suppressed = self.cycle.echoes();
        stats
    }
}
