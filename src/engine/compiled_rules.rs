//! Rule compilation.
//!
//! This module holds the *static* side of the engine: the structures derived
//! from a [`RuleSet`] that every substitution reuses until the rule set changes.
//!
//! The engine works in two phases:
//!
//! 1. **Compile** (this module): turn each rule into a [`MatchUnit`] (escaped
//!    matcher + both render forms of the replacement) and order the units.
//! 2. **Apply** (see `substitute.rs`): run the units over a text.
//!
//! ## Matchers
//!
//! `from` is always a literal. It is escaped with `regex::escape`, so `a.b`
//! matches only `a.b`. Line breaks need no special handling: an escaped
//! pattern matches a line break literally.
//!
//! Token-boundary anchoring is a heuristic: when `from` consists solely of word
//! characters it is wrapped in `\b...\b`, so `cat` does not fire inside
//! `category`. Anything with punctuation, spaces or symbols stays an unanchored
//! substring match. This trades recall (no hits inside longer words) for fewer
//! accidental collisions.
//!
//! ```text
//! from "cat"    -> \bcat\b       anchored
//! from "c.a.t"  -> c\.a\.t       substring
//! from "e-mail" -> e\-mail       substring
//! ```
//!
//! ## Invariants
//!
//! - `CompiledRules::units` is in application order (longest `from` first,
//!   stable for ties). Consumers must not re-sort it.
//! - One bad rule never aborts the batch: it lands in `CompiledRules::skipped`.
//! - A `CompiledRules` is immutable once built; a rule change builds a new one.

use crate::RenderContext;
use crate::document::markup::breaks_to_markup;
use crate::error::RuleCompileError;
use crate::rules::{ReplacementRule, RuleSet};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

/// Default cap on the compiled size of a single matcher.
pub const DEFAULT_REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled, ready-to-apply rule.
#[derive(Debug, Clone)]
pub struct MatchUnit {
    /// Index of the source rule in its [`RuleSet`].
    pub rule_index: usize,
    pub from: String,
    pub matcher: Regex,
    /// Whether the token-boundary heuristic applied.
    pub anchored: bool,
    /// `to` verbatim.
    pub to_plain: String,
    /// `to` with line breaks translated to the line-break token.
    pub to_markup: String,
}

impl MatchUnit {
    /// Replacement text for `ctx`.
    pub fn replacement(&self, ctx: RenderContext) -> &str {
        match ctx {
            RenderContext::PlainText => &self.to_plain,
            RenderContext::MarkupCapable => &self.to_markup,
        }
    }
}

/// Turns rules into [`MatchUnit`]s.
#[derive(Debug, Clone)]
pub struct PatternCompiler {
    pub anchor_whole_words: bool,
    pub size_limit: usize,
}

impl Default for PatternCompiler {
    fn default() -> Self {
        PatternCompiler { anchor_whole_words: true, size_limit: DEFAULT_REGEX_SIZE_LIMIT }
    }
}

/// True when `from` is made only of word characters (letters, digits, `_`).
pub fn is_word_only(from: &str) -> bool {
    regex!(r"^\w+$").is_match(from)
}

impl PatternCompiler {
    pub fn compile(&self, rule_index: usize, rule: &ReplacementRule) -> Result<MatchUnit, RuleCompileError> {
        if !rule.is_valid() {
            return Err(RuleCompileError::EmptyPattern);
        }

        let escaped = regex::escape(&rule.from);
        let anchored = self.anchor_whole_words && is_word_only(&rule.from);
        let pattern = if anchored { format!(r"\b{escaped}\b") } else { escaped };

        let matcher = RegexBuilder::new(&pattern)
            .size_limit(self.size_limit)
            .build()
            .map_err(|source| RuleCompileError::Pattern { from: rule.from.clone(), source })?;

        Ok(MatchUnit {
            rule_index,
            from: rule.from.clone(),
            matcher,
            anchored,
            to_plain: rule.to.clone(),
            to_markup: breaks_to_markup(&rule.to),
        })
    }
}

/// A rule that did not compile, with the reason.
#[derive(Debug)]
pub struct SkippedRule {
    pub rule_index: usize,
    pub error: RuleCompileError,
}

/// All units for one rule set, in application order.
#[derive(Debug, Default)]
pub struct CompiledRules {
    /// Bumped on every rule change; lets consumers tell snapshots apart.
    pub generation: u64,
    pub units: Vec<MatchUnit>,
    pub skipped: Vec<SkippedRule>,
}

impl CompiledRules {
    /// Compile `rules` with `compiler`, skipping (and logging) rules that fail.
    pub fn new(rules: &RuleSet, compiler: &PatternCompiler, generation: u64) -> Self {
        let mut units = Vec::with_capacity(rules.len());
        let mut skipped = Vec::new();

        for idx in rules.application_order() {
            let Some(rule) = rules.get(idx) else { continue };
            match compiler.compile(idx, rule) {
                Ok(unit) => units.push(unit),
                Err(error) => {
                    warn!(rule_index = idx, from = %rule.from, %error, "skipping rule");
                    skipped.push(SkippedRule { rule_index: idx, error });
                }
            }
        }

        debug!(generation, compiled = units.len(), skipped = skipped.len(), "compiled rule set");
        CompiledRules { generation, units, skipped }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}
