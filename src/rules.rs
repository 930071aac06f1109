//! Replacement rules and rule sets.
//!
//! A [`RuleSet`] is plain data: an ordered list of `(from, to)` pairs supplied
//! by an external store and replaced wholesale whenever the store changes.
//! Nothing here compiles or applies anything; see `engine/compiled_rules.rs`.
//!
//! ## Application order
//!
//! Rules are applied longest-`from` first so that a longer pattern containing a
//! shorter one wins:
//!
//! ```text
//! rules:  [ "a" -> "Y", "ab" -> "X" ]
//! order:  [ 1 ("ab"), 0 ("a") ]
//! "ab" ── "ab" -> "X" ──▶ "X" ── "a" finds nothing ──▶ "X"
//! ```
//!
//! Equal lengths keep their original relative order (stable sort). Length is
//! measured in characters, not bytes.
//!
//! ## Wire schema
//!
//! ```text
//! [ { "from": "hello", "to": "hi" }, ... ]
//! { "replacements": [ { "from": "hello", "to": "hi" }, ... ] }
//! ```
//!
//! A missing or `null` `to` is the empty string. A missing, `null` or empty
//! `from` makes that one rule invalid; it is kept (so indices still line up
//! with the store) and skipped at compile time. An entry that is not even an
//! object is dropped with a warning rather than failing the whole document.

use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// One `(from, to)` substitution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplacementRule {
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl ReplacementRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        ReplacementRule { from: from.into(), to: to.into() }
    }

    /// A rule is usable only when `from` is non-empty.
    pub fn is_valid(&self) -> bool {
        !self.from.is_empty()
    }
}

/// Lenient wire form: both fields may be absent or `null`.
#[derive(Debug, Default, Deserialize)]
struct RawRule {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

impl From<RawRule> for ReplacementRule {
    fn from(raw: RawRule) -> Self {
        ReplacementRule { from: raw.from.unwrap_or_default(), to: raw.to.unwrap_or_default() }
    }
}

/// An ordered collection of rules, as supplied by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<ReplacementRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ReplacementRule>) -> Self {
        RuleSet { rules }
    }

    pub fn empty() -> Self {
        RuleSet::default()
    }

    /// The rule set a fresh store is seeded with.
    pub fn seed() -> Self {
        RuleSet::new(vec![ReplacementRule::new("hello", "hi")])
    }

    /// Parse a rule document (bare array or `{ "replacements": [...] }` envelope).
    pub fn from_json(input: &str) -> Result<Self, SourceError> {
        let value: Value = serde_json::from_str(input)?;
        Ok(Self::from_value(value))
    }

    /// Build a rule set from an already-parsed JSON value.
    ///
    /// Anything that is neither an array nor an envelope object yields an
    /// empty set.
    pub fn from_value(value: Value) -> Self {
        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut map) => match map.remove("replacements") {
                Some(Value::Array(entries)) => entries,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        let mut rules = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<RawRule>(entry) {
                Ok(raw) => rules.push(ReplacementRule::from(raw)),
                Err(err) => warn!(index = idx, error = %err, "dropping malformed rule entry"),
            }
        }
        RuleSet { rules }
    }

    /// Serialize in the bare-array form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.rules).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplacementRule> {
        self.rules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ReplacementRule> {
        self.rules.get(index)
    }

    /// First rule whose `from` is exactly `from`.
    pub fn find(&self, from: &str) -> Option<&ReplacementRule> {
        self.rules.iter().find(|r| r.from == from)
    }

    /// Rules with a non-empty `from`, in original order.
    pub fn valid(&self) -> impl Iterator<Item = &ReplacementRule> {
        self.rules.iter().filter(|r| r.is_valid())
    }

    /// Indices of all rules, longest `from` first, ties in original order.
    pub fn application_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.rules.len()).collect();
        // `sort_by` is stable.
        order.sort_by(|&a, &b| self.rules[b].from.chars().count().cmp(&self.rules[a].from.chars().count()));
        order
    }
}

impl From<Vec<ReplacementRule>> for RuleSet {
    fn from(rules: Vec<ReplacementRule>) -> Self {
        RuleSet::new(rules)
    }
}

impl FromIterator<ReplacementRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = ReplacementRule>>(iter: I) -> Self {
        RuleSet::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a ReplacementRule;
    type IntoIter = std::slice::Iter<'a, ReplacementRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
