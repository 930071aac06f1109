//! Applying compiled rules to a text.
//!
//! ```text
//! text ──▶ unit[0] (longest from) ──▶ unit[1] ──▶ ... ──▶ Substitution
//!            │ is_match? no  -> skip (no allocation)
//!            └ is_match? yes -> replace unprotected matches with `to`
//! ```
//!
//! One call is one pass. Each unit runs exactly once against the text as left
//! by the previous units, so later (shorter) rules see earlier replacements
//! but no unit ever re-scans its own output. A rule whose `to` contains its own
//! `from` therefore grows the text once per pass, not without bound.
//!
//! Replacement values are inserted literally (`regex::NoExpand` semantics): a
//! `$1` in `to` stays `$1`.
//!
//! ## Output spans
//!
//! Every result carries the byte ranges that hold replacement output. Callers
//! hand those ranges back on the next pass over the same content as
//! *protected* spans, and a match that overlaps one is left alone. That is what
//! keeps `Dr -> Dr.` from turning `Dr.` into `Dr..` when the user keeps typing
//! after it. Within a single pass later units may still rewrite earlier units'
//! output; the merged range stays engine output.
//!
//! A unit that fails (its output would grow past `max_len`) is logged and
//! skipped; the replacements made by earlier units are kept.

use super::compiled_rules::{CompiledRules, MatchUnit};
use crate::RenderContext;
use crate::error::ApplicationError;
use std::borrow::Cow;
use std::ops::Range;
use std::rc::Rc;
use tracing::{trace, warn};

/// Default cap on the length (bytes) of a substitution result.
pub const DEFAULT_MAX_TEXT_LEN: usize = 1 << 20;

/// Result of [`SubstitutionEngine::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// `false` iff `text` equals the input.
    pub changed: bool,
    /// Rule indices that replaced something, in application order.
    pub applied: Vec<usize>,
    /// Sorted byte ranges of `text` holding engine output, protected input
    /// spans included.
    pub spans: Vec<Range<usize>>,
}

#[derive(Debug, Clone)]
struct OutputSpan {
    range: Range<usize>,
    /// Came in protected; never matched in this pass.
    carried: bool,
}

/// One replaced match: `old` in the unit's input, `new` in its output.
#[derive(Debug, Clone)]
struct Edit {
    old: Range<usize>,
    new: Range<usize>,
}

/// Where `pos` of a unit's input lands in its output. Points strictly inside
/// a replaced match snap to the start (or end) of the replacement.
fn remap(pos: usize, edits: &[Edit], is_end: bool) -> usize {
    let (mut old_anchor, mut new_anchor) = (0, 0);
    for e in edits {
        if pos <= e.old.start {
            break;
        }
        if pos < e.old.end {
            return if is_end { e.new.end } else { e.new.start };
        }
        old_anchor = e.old.end;
        new_anchor = e.new.end;
    }
    new_anchor + (pos - old_anchor)
}

fn remap_spans(spans: &[OutputSpan], edits: &[Edit]) -> Vec<OutputSpan> {
    let mut out: Vec<OutputSpan> = spans
        .iter()
        .map(|s| OutputSpan {
            range: remap(s.range.start, edits, false)..remap(s.range.end, edits, true),
            carried: s.carried,
        })
        .chain(edits.iter().map(|e| OutputSpan { range: e.new.clone(), carried: false }))
        .collect();
    out.sort_by_key(|s| (s.range.start, s.range.end));

    let mut merged: Vec<OutputSpan> = Vec::with_capacity(out.len());
    for span in out {
        match merged.last_mut() {
            Some(prev) if !prev.carried && !span.carried && span.range.start < prev.range.end => {
                prev.range.end = prev.range.end.max(span.range.end);
            }
            _ => merged.push(span),
        }
    }
    merged
}

/// Clamp, sort and merge caller-supplied spans.
fn normalize(protected: &[Range<usize>], text: &str) -> Vec<OutputSpan> {
    let mut ranges: Vec<Range<usize>> = protected
        .iter()
        .filter(|r| r.start < r.end && r.end <= text.len())
        .filter(|r| text.is_char_boundary(r.start) && text.is_char_boundary(r.end))
        .cloned()
        .collect();
    ranges.sort_by_key(|r| (r.start, r.end));

    let mut out: Vec<OutputSpan> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match out.last_mut() {
            Some(prev) if range.start <= prev.range.end => prev.range.end = prev.range.end.max(range.end),
            _ => out.push(OutputSpan { range, carried: true }),
        }
    }
    out
}

/// Applies a [`CompiledRules`] snapshot to strings.
#[derive(Debug, Clone)]
pub struct SubstitutionEngine {
    compiled: Rc<CompiledRules>,
    max_len: usize,
}

impl SubstitutionEngine {
    pub fn new(compiled: Rc<CompiledRules>, max_len: usize) -> Self {
        SubstitutionEngine { compiled, max_len }
    }

    pub fn compiled(&self) -> &Rc<CompiledRules> {
        &self.compiled
    }

    /// Replace every match of `unit` that is not protected. `None` when
    /// nothing was replaced.
    fn apply_unit(
        &self,
        unit: &MatchUnit,
        text: &str,
        ctx: RenderContext,
        spans: &[OutputSpan],
    ) -> Result<Option<(String, Vec<Edit>)>, ApplicationError> {
        let replacement = unit.replacement(ctx);
        let mut out = String::with_capacity(text.len());
        let mut edits = Vec::new();
        let mut last = 0;

        for m in unit.matcher.find_iter(text) {
            let protected = spans.iter().any(|s| s.carried && s.range.start < m.end() && m.start() < s.range.end);
            if protected || m.as_str() == replacement {
                continue;
            }
            out.push_str(&text[last..m.start()]);
            let start = out.len();
            out.push_str(replacement);
            edits.push(Edit { old: m.range(), new: start..out.len() });
            last = m.end();
        }
        if edits.is_empty() {
            return Ok(None);
        }
        out.push_str(&text[last..]);

        // Text already over the cap may still shrink.
        if out.len() > self.max_len && out.len() > text.len() {
            return Err(ApplicationError::OutputTooLarge { rule_index: unit.rule_index, len: out.len(), limit: self.max_len });
        }
        Ok(Some((out, edits)))
    }

    pub fn apply(&self, text: &str, ctx: RenderContext) -> Substitution {
        self.apply_protected(text, ctx, &[])
    }

    /// Like [`SubstitutionEngine::apply`], leaving matches that overlap
    /// `protected` (byte ranges of earlier engine output) untouched.
    pub fn apply_protected(&self, text: &str, ctx: RenderContext, protected: &[Range<usize>]) -> Substitution {
        let mut current: Cow<'_, str> = Cow::Borrowed(text);
        let mut spans = normalize(protected, text);
        let mut applied = Vec::new();

        for unit in &self.compiled.units {
            if !unit.matcher.is_match(&current) {
                continue;
            }
            let (next, edits) = match self.apply_unit(unit, &current, ctx, &spans) {
                Ok(Some(done)) => done,
                Ok(None) => continue,
                Err(err) => {
                    warn!(rule_index = unit.rule_index, error = %err, "skipping rule for this text");
                    continue;
                }
            };
            trace!(rule_index = unit.rule_index, from = %unit.from, matches = edits.len(), "replaced");
            spans = remap_spans(&spans, &edits);
            applied.push(unit.rule_index);
            current = Cow::Owned(next);
        }

        let changed = current.as_ref() != text;
        let spans = spans.into_iter().map(|s| s.range).filter(|r| !r.is_empty()).collect();
        Substitution { text: current.into_owned(), changed, applied, spans }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compiled_rules::PatternCompiler;
    use crate::rules::{ReplacementRule, RuleSet};
    use pretty_assertions::assert_eq;

    fn engine(pairs: &[(&str, &str)]) -> SubstitutionEngine {
        let rules: RuleSet = pairs.iter().map(|(f, t)| ReplacementRule::new(*f, *t)).collect();
        SubstitutionEngine::new(Rc::new(CompiledRules::new(&rules, &PatternCompiler::default(), 1)), DEFAULT_MAX_TEXT_LEN)
    }

    #[test]
    fn longest_match_wins() {
        let e = engine(&[("a", "Y"), ("ab", "X")]);
        let out = e.apply("ab", RenderContext::PlainText);
        assert_eq!(out.text, "X");
        assert!(out.changed);
        assert_eq!(out.applied, vec![1]);
    }

    #[test]
    fn token_boundary_heuristic() {
        let e = engine(&[("cat", "dog")]);
        assert!(!e.apply("category", RenderContext::PlainText).changed);
        assert_eq!(e.apply("the cat sat", RenderContext::PlainText).text, "the dog sat");
    }

    #[test]
    fn multiline_payload_per_context() {
        let e = engine(&[("sig", "Best,\nName")]);
        assert_eq!(e.apply("sig", RenderContext::MarkupCapable).text, "Best,<br>Name");
        assert_eq!(e.apply("sig", RenderContext::PlainText).text, "Best,\nName");
    }

    #[test]
    fn no_cascading_within_a_pass() {
        let e = engine(&[("a", "aa")]);
        let once = e.apply("a", RenderContext::PlainText);
        assert_eq!(once.text, "aa");
        // Applying again is a new pass and grows again; that is the caller's
        // business (the tracker), not the engine's.
        assert_eq!(e.apply(&once.text, RenderContext::PlainText).text, "aaaa");
    }

    #[test]
    fn later_rules_see_earlier_output() {
        let e = engine(&[("hello", "hey"), ("hey", "yo")]);
        // "hello" is longer, runs first; "hey" then sees its output.
        assert_eq!(e.apply("hello", RenderContext::PlainText).text, "yo");
    }

    #[test]
    fn replacement_is_literal() {
        let e = engine(&[("price", "$1 off")]);
        assert_eq!(e.apply("price", RenderContext::PlainText).text, "$1 off");
    }

    #[test]
    fn malformed_rule_is_isolated() {
        let e = engine(&[("", "boom"), ("hello", "hi")]);
        let out = e.apply("hello there", RenderContext::PlainText);
        assert_eq!(out.text, "hi there");
    }

    #[test]
    fn identical_replacement_reports_unchanged() {
        let e = engine(&[("same", "same")]);
        let out = e.apply("same text", RenderContext::PlainText);
        assert!(!out.changed);
        assert!(out.applied.is_empty());
    }

    #[test]
    fn oversize_output_skips_only_that_rule() {
        let rules: RuleSet = vec![ReplacementRule::new("big", "x".repeat(100)), ReplacementRule::new("a", "b")].into();
        let compiled = Rc::new(CompiledRules::new(&rules, &PatternCompiler::default(), 1));
        let e = SubstitutionEngine::new(compiled, 50);
        let out = e.apply("big a", RenderContext::PlainText);
        assert_eq!(out.text, "big b");
        assert_eq!(out.applied, vec![1]);
    }

    #[test]
    fn empty_rule_set_is_identity() {
        let e = engine(&[]);
        let out = e.apply("anything", RenderContext::MarkupCapable);
        assert_eq!(out, Substitution { text: "anything".into(), changed: false, applied: Vec::new(), spans: Vec::new() });
    }

    #[test]
    fn protected_output_is_not_matched_again() {
        let e = engine(&[("Dr", "Dr.")]);
        let first = e.apply("Dr", RenderContext::PlainText);
        assert_eq!((first.text.as_str(), first.spans.clone()), ("Dr.", vec![0..3]));

        let next = e.apply_protected("Dr. Smith", RenderContext::PlainText, &first.spans);
        assert!(!next.changed);
        assert_eq!(next.spans, vec![0..3]);

        // A new occurrence outside the output still fires; old spans shift.
        let more = e.apply_protected("x Dr. Smith, Dr", RenderContext::PlainText, &[2..5]);
        assert_eq!(more.text, "x Dr. Smith, Dr.");
        assert_eq!(more.spans, vec![2..5, 13..16]);
    }

    #[test]
    fn chained_output_stays_one_span() {
        let e = engine(&[("hello", "hey you"), ("hey", "yo")]);
        let out = e.apply("well hello", RenderContext::PlainText);
        assert_eq!(out.text, "well yo you");
        assert_eq!(out.spans, vec![5..11]);
    }

    #[test]
    fn spans_shift_around_earlier_replacements() {
        let e = engine(&[("hello", "hi")]);
        let out = e.apply_protected("hello A.", RenderContext::PlainText, &[6..8]);
        assert_eq!(out.text, "hi A.");
        assert_eq!(out.spans, vec![0..2, 3..5]);
    }

    #[test]
    fn oversize_text_may_still_shrink() {
        let rules: RuleSet = vec![ReplacementRule::new("hello", "hi")].into();
        let compiled = Rc::new(CompiledRules::new(&rules, &PatternCompiler::default(), 1));
        let e = SubstitutionEngine::new(compiled, 4);
        assert_eq!(e.apply("hello hello", RenderContext::PlainText).text, "hi hi");
    }
}
