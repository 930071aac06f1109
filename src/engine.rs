//! Substitution engine.
//!
//! This module is the *internal entry point* of the engine. The work is split
//! into focused submodules under `src/engine/`; this file only wires them
//! together and re-exports the public types.
//!
//! ## How the parts work together
//!
//! ```text
//! RuleSet ──┐
//!           │  CompiledRules::new                 (compiled_rules.rs)
//!           └──────────────┬───────────────
//!                          │ Rc<CompiledRules>, swapped whole on change
//!                          v
//!                 SubstitutionEngine::apply       (substitute.rs)
//!                   ▲                  ▲
//!   passive text    │                  │   interactive fields
//!                   │                  │
//!  DocumentScanner::scan          Engine::handle_input
//!  (scanner.rs)                   (session.rs)
//!    - TextWalker, exclusions       - EditCycle echo guard     (fields.rs)
//!    - IdempotencyTracker (dedup.rs)- FieldWriteAdapter::write (fields.rs)
//!         ▲
//!         │ ScanTarget
//!  MutationWatcher (watcher.rs)
//!    - debounce, classify, backstop
//! ```
//!
//! [`Engine`] (session.rs) owns one instance of each and drives them from
//! three inputs: rule changes, field notifications and `tick`.
//!
//! ## Responsibilities by module
//!
//! - `compiled_rules.rs`: literal-escaped matchers, token-boundary anchoring,
//!   application order, fail-soft compilation.
//! - `substitute.rs`: one deterministic pass of all units over a text, with
//!   earlier engine output protected.
//! - `dedup.rs`: content + location keys, the (optionally bounded) tracker and
//!   the output spans written per node.
//! - `scanner.rs`: which text nodes are content, and how rewrites are written.
//! - `watcher.rs`: turns mutation records into scoped scan targets.
//! - `fields.rs`: value-field and rich-region write paths, caret, echo guard.
//! - `metrics.rs`: counters for scans and the engine lifetime.
//! - `session.rs`: lifecycle (`attach`/`detach`), rule source wiring, `tick`.
//!
//! ## Debugging
//!
//! Everything logs through `tracing`. Install a subscriber with
//! `RUST_LOG=livesub=trace` to see per-rule replacements, echo suppression and
//! scan reports.

#[path = "engine/compiled_rules.rs"]
mod compiled_rules;
#[path = "engine/dedup.rs"]
mod dedup;
#[path = "engine/fields.rs"]
mod fields;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/scanner.rs"]
mod scanner;
#[path = "engine/session.rs"]
mod session;
#[path = "engine/substitute.rs"]
mod substitute;
#[path = "engine/watcher.rs"]
mod watcher;

pub use compiled_rules::{CompiledRules, DEFAULT_REGEX_SIZE_LIMIT, MatchUnit, PatternCompiler, SkippedRule, is_word_only};
pub use dedup::{IdempotencyTracker, ProcessingKey, WrittenOutput};
pub use fields::{EditCycle, FieldPhase, FieldWriteAdapter, RewriteScope, caret_after_rewrite};
pub use metrics::{EngineStats, ScanReport};
pub use scanner::{DocumentScanner, EXCLUDED_CONTAINERS, TextWalker, is_excluded_container};
pub use session::Engine;
pub use substitute::{DEFAULT_MAX_TEXT_LEN, Substitution, SubstitutionEngine};
pub use watcher::{MutationWatcher, ScanTarget, classify};
