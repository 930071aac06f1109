//! Line-break markup.
//!
//! Replacement values are opaque text. The only markup the engine produces is
//! the line-break token, so the fragment grammar is deliberately tiny: a
//! fragment is a sequence of text runs and line breaks. Anything that looks
//! like another tag stays literal text.
//!
//! ```text
//! "Best,<br>Name"  ──parse_fragment──▶  [Text("Best,"), LineBreak, Text("Name")]
//! "a < b"          ──parse_fragment──▶  [Text("a < b")]
//! ```
//!
//! Text that merely *reads* like a break token is not one. When the engine
//! writes a substitution result it knows which byte ranges hold replacement
//! output; only tokens inside those ranges become breaks
//! ([`split_output`]). Everything else, including a literal `<br>` the page
//! or the user wrote, stays text.

use std::ops::Range;

/// The markup token a line break renders to in markup-capable contexts.
pub const LINE_BREAK_TOKEN: &str = "<br>";

/// A parsed piece of markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentNode {
    Text(String),
    LineBreak,
}

/// Translate literal line breaks (`\r\n`, `\r`, `\n`) to the line-break token.
pub fn breaks_to_markup(text: &str) -> String {
    regex!(r"\r\n|\r|\n").replace_all(text, LINE_BREAK_TOKEN).into_owned()
}

/// Split `markup` on line-break tokens (`<br>`, `<br/>`, `<br />`, any case).
///
/// Empty text runs are not emitted.
pub fn parse_fragment(markup: &str) -> Vec<FragmentNode> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in regex!(r"(?i)<br\s*/?>").find_iter(markup) {
        if m.start() > last {
            out.push(FragmentNode::Text(markup[last..m.start()].to_string()));
        }
        out.push(FragmentNode::LineBreak);
        last = m.end();
    }
    if last < markup.len() {
        out.push(FragmentNode::Text(markup[last..].to_string()));
    }
    out
}

/// Split plain text on its line breaks (`\r\n`, `\r`, `\n`). Angle brackets
/// are never interpreted.
pub fn plain_fragment(text: &str) -> Vec<FragmentNode> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in regex!(r"\r\n|\r|\n").find_iter(text) {
        if m.start() > last {
            out.push(FragmentNode::Text(text[last..m.start()].to_string()));
        }
        out.push(FragmentNode::LineBreak);
        last = m.end();
    }
    if last < text.len() {
        out.push(FragmentNode::Text(text[last..].to_string()));
    }
    out
}

/// Split a substitution result into fragment nodes. Line-break tokens become
/// breaks only inside `spans` (sorted byte ranges of replacement output).
///
/// Each node comes with the parts of `spans` that fall inside it, relative to
/// its own text. Breaks carry no ranges.
pub fn split_output(text: &str, spans: &[Range<usize>]) -> Vec<(FragmentNode, Vec<Range<usize>>)> {
    let cuts: Vec<Range<usize>> = spans
        .iter()
        .filter(|s| s.end <= text.len())
        .flat_map(|s| {
            regex!(r"(?i)<br\s*/?>").find_iter(&text[s.clone()]).map(move |m| s.start + m.start()..s.start + m.end())
        })
        .collect();

    let mut out = Vec::new();
    let push_run = |out: &mut Vec<(FragmentNode, Vec<Range<usize>>)>, run: Range<usize>| {
        if run.is_empty() {
            return;
        }
        let inner = spans
            .iter()
            .filter(|s| s.start < run.end && run.start < s.end)
            .map(|s| s.start.max(run.start) - run.start..s.end.min(run.end) - run.start)
            .collect();
        out.push((FragmentNode::Text(text[run].to_string()), inner));
    };
    let mut last = 0;
    for cut in cuts {
        push_run(&mut out, last..cut.start);
        out.push((FragmentNode::LineBreak, Vec::new()));
        last = cut.end;
    }
    push_run(&mut out, last..text.len());
    out
}

/// Plain-text reading of a substitution result: tokens inside `spans` read
/// as `\n`, and the spans are carried over to the plain text (a break that
/// came from a span counts as part of it).
pub fn output_text(text: &str, spans: &[Range<usize>]) -> (String, Vec<Range<usize>>) {
    let mut plain = String::with_capacity(text.len());
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let extend = |ranges: &mut Vec<Range<usize>>, r: Range<usize>| match ranges.last_mut() {
        Some(prev) if prev.end >= r.start => prev.end = prev.end.max(r.end),
        _ => ranges.push(r),
    };
    for (node, inner) in split_output(text, spans) {
        let base = plain.len();
        match node {
            FragmentNode::Text(t) => {
                plain.push_str(&t);
                for r in inner {
                    extend(&mut ranges, base + r.start..base + r.end);
                }
            }
            FragmentNode::LineBreak => {
                plain.push('\n');
                extend(&mut ranges, base..base + 1);
            }
        }
    }
    (plain, ranges)
}

/// Serialize a fragment back to markup.
pub fn render_fragment(fragment: &[FragmentNode]) -> String {
    fragment
        .iter()
        .map(|n| match n {
            FragmentNode::Text(t) => t.as_str(),
            FragmentNode::LineBreak => LINE_BREAK_TOKEN,
        })
        .collect()
}

/// Plain text of a fragment; line breaks read as `\n`.
pub fn fragment_text(fragment: &[FragmentNode]) -> String {
    fragment
        .iter()
        .map(|n| match n {
            FragmentNode::Text(t) => t.as_str(),
            FragmentNode::LineBreak => "\n",
        })
        .collect()
}
