//! Live text substitution.
//!
//! `livesub` rewrites matching text inside an interactive document as it
//! changes: static text nodes, value-holding form fields and rich editable
//! regions. Rules are literal `(from, to)` pairs; the engine applies them in a
//! fixed order, remembers what it already inspected, and keeps its own writes
//! from coming back to it as new edits.
//!
//! ```
//! use livesub::document::{Document, MemoryDocument};
//! use livesub::{Engine, Options, RuleSet};
//! use std::time::Instant;
//!
//! let mut doc = MemoryDocument::new();
//! let p = doc.append_element(doc.root(), "p");
//! let text = doc.append_text(p, "hello world");
//! let input = doc.append_value_field(doc.root(), "input", "");
//!
//! let engine = Engine::with_rules(Options::default(), RuleSet::seed());
//! engine.attach(&mut doc, Instant::now());
//! assert_eq!(doc.text(text), Some("hi world"));
//!
//! doc.type_into(input, "hello").unwrap();
//! assert_eq!(doc.field_text(input).as_deref(), Some("hi"));
//! ```
//!
//! The host document is abstracted by [`document::Document`]; rules come from
//! a [`source::RuleSource`]. See `engine.rs` for how the pieces fit together.

#[macro_use]
mod macros;
mod api;
pub mod document;
mod engine;
pub mod error;
pub mod rules;
pub mod source;

pub use api::{ENV_DEBOUNCE_MS, ENV_RESCAN_MS, ENV_TRACKER_CAPACITY, Options, substitute, substitute_with};
pub use engine::{
    CompiledRules, DEFAULT_MAX_TEXT_LEN, DEFAULT_REGEX_SIZE_LIMIT, DocumentScanner, EXCLUDED_CONTAINERS, EditCycle,
    Engine, EngineStats, FieldPhase, FieldWriteAdapter, IdempotencyTracker, MatchUnit, MutationWatcher,
    PatternCompiler, ProcessingKey, RewriteScope, ScanReport, ScanTarget, SkippedRule, Substitution,
    SubstitutionEngine, TextWalker, WrittenOutput, caret_after_rewrite, classify, is_excluded_container, is_word_only,
};
pub use error::{ApplicationError, Error, Result, RuleCompileError, SourceError, WriteError};
pub use rules::{ReplacementRule, RuleSet};
pub use source::{MemoryRuleSource, RuleSource, SubscriptionId};

/// How a replacement is rendered into its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderContext {
    /// Destinations that hold plain text (value fields): `to` verbatim.
    PlainText,
    /// Destinations that accept markup (text nodes, rich regions): line breaks
    /// become the line-break token.
    MarkupCapable,
}
