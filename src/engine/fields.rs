//! Interactive field writes and echo suppression.
//!
//! Fields are the hard part of live substitution. A value field is usually
//! bound to a reactive state layer that keeps its own copy of the value; a rich
//! region owns a markup subtree and a caret. The engine must:
//!
//! 1. rewrite the field without losing the user's caret;
//! 2. make the reactive layer commit the rewritten value (otherwise the next
//!    render restores the old one);
//! 3. not treat the notifications it dispatches for (2) as new user edits.
//!
//! ## Write paths
//!
//! ```text
//! ValueField:  set_native_value(new)          (base setter, tracker left stale)
//!              set_selection(caret)
//!              dispatch Input [+ Change]      (reactive layer sees a real change)
//!
//! RichRegion:  split on "\n" (plain_fragment)
//!              set_rich_content(fragment)
//!              set_selection(caret)
//!              dispatch Input
//! ```
//!
//! Content writes run with mutation observation paused. The notifications are
//! dispatched after observation resumes: other listeners may legitimately
//! mutate the document in response.
//!
//! ## Edit cycle
//!
//! ```text
//!   Idle ──user Input──▶ UserEdited ──no change──▶ Idle
//!                            │
//!                            └─rewrite──▶ Rewriting ──scope drop──▶ Idle
//!                                            │
//!                                  any notification = echo (counted, ignored)
//! ```
//!
//! The phase lives in `Cell`s so it can be read while the engine's state is
//! mutably borrowed further up the stack: dispatch is synchronous, so the echo
//! arrives *inside* the write.

use crate::document::markup::plain_fragment;
use crate::document::{
    Document, FieldEvent, FieldKind, NodeId, NotificationKind, Selection, with_observation_paused,
};
use crate::error::WriteError;
use std::cell::Cell;
use tracing::{debug, trace};

/// Where a field is in its edit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldPhase {
    #[default]
    Idle,
    /// A genuine user edit is being handled.
    UserEdited,
    /// The engine is writing; notifications are its own echo.
    Rewriting,
}

/// Shared edit-cycle state with an echo counter.
#[derive(Debug, Default)]
pub struct EditCycle {
    phase: Cell<FieldPhase>,
    echoes: Cell<u64>,
}

impl EditCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FieldPhase {
        self.phase.get()
    }

    pub fn is_rewriting(&self) -> bool {
        self.phase.get() == FieldPhase::Rewriting
    }

    /// Classify an incoming notification. Returns `false` (and counts it) when
    /// it is an echo of the engine's own write.
    pub fn begin_edit(&self) -> bool {
        if self.is_rewriting() {
            self.echoes.set(self.echoes.get() + 1);
            return false;
        }
        self.phase.set(FieldPhase::UserEdited);
        true
    }

    /// The edit needed no rewrite.
    pub fn finish_edit(&self) {
        self.phase.set(FieldPhase::Idle);
    }

    /// Enter `Rewriting` until the returned scope is dropped.
    pub fn rewriting(&self) -> RewriteScope<'_> {
        self.phase.set(FieldPhase::Rewriting);
        RewriteScope { cycle: self }
    }

    pub fn echoes(&self) -> u64 {
        self.echoes.get()
    }
}

/// Restores [`FieldPhase::Idle`] on drop, also on early return.
#[must_use]
pub struct RewriteScope<'a> {
    cycle: &'a EditCycle,
}

impl Drop for RewriteScope<'_> {
    fn drop(&mut self) {
        self.cycle.phase.set(FieldPhase::Idle);
    }
}

/// Caret position (in characters) after `old` was rewritten to `new`.
///
/// The changed span is what lies between the common prefix and the common
/// suffix. A caret before the span stays put; a caret inside it moves to the
/// end of the inserted text; a caret after it shifts by the length delta. A
/// pure insertion at the caret counts as inside.
pub fn caret_after_rewrite(old: &str, new: &str, caret: usize) -> usize {
    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();

    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old.iter().rev().zip(new.iter().rev()).take(max_suffix).take_while(|(a, b)| a == b).count();

    let old_end = old.len() - suffix;
    let new_end = new.len() - suffix;

    let at = if caret < prefix || (caret == prefix && prefix < old_end) {
        caret
    } else if caret < old_end {
        new_end
    } else {
        (caret + new_end).saturating_sub(old_end)
    };
    at.min(new.len())
}

/// Commits rewritten values to interactive fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldWriteAdapter {
    /// Also dispatch `Change` after `Input` for value fields.
    pub dispatch_change: bool,
}

impl FieldWriteAdapter {
    pub fn new(dispatch_change: bool) -> Self {
        FieldWriteAdapter { dispatch_change }
    }

    /// Write `new_value` (plain text, `\n` for line breaks) into `field` and
    /// notify the reactive layer. `caret_hint` is the caret to restore.
    pub fn write(
        &self,
        doc: &mut dyn Document,
        field: NodeId,
        kind: FieldKind,
        new_value: &str,
        caret_hint: Option<usize>,
    ) -> Result<(), WriteError> {
        with_observation_paused(doc, |doc| {
            match kind {
                FieldKind::ValueField => doc.set_native_value(field, new_value)?,
                FieldKind::RichRegion => doc.set_rich_content(field, &plain_fragment(new_value))?,
            }
            if let Some(at) = caret_hint {
                // A field that cannot take a selection still holds the new value.
                if let Err(error) = doc.set_selection(field, Selection::caret(at)) {
                    debug!(field = field.raw(), %error, "caret not restored");
                }
            }
            Ok::<(), WriteError>(())
        })?;

        trace!(field = field.raw(), ?kind, "field written; notifying");
        doc.dispatch(FieldEvent::synthetic(field, NotificationKind::Input));
        if self.dispatch_change && kind == FieldKind::ValueField {
            doc.dispatch(FieldEvent::synthetic(field, NotificationKind::Change));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MemoryDocument, ObserveScope};
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    #[test]
    fn caret_at_end_follows_replacement() {
        assert_eq!(caret_after_rewrite("say hello", "say hi", 9), 6);
    }

    #[test]
    fn caret_before_span_stays() {
        assert_eq!(caret_after_rewrite("ab hello", "ab hi", 1), 1);
    }

    #[test]
    fn caret_before_pure_insertion_stays() {
        assert_eq!(caret_after_rewrite("Dr Smith", "Dr. Smith", 0), 0);
        assert_eq!(caret_after_rewrite("Dr Smith", "Dr. Smith", 1), 1);
        // At the insertion point the caret ends up after the inserted text.
        assert_eq!(caret_after_rewrite("Dr Smith", "Dr. Smith", 2), 3);
    }

    #[test]
    fn caret_inside_span_moves_to_insert_end() {
        assert_eq!(caret_after_rewrite("x hello y", "x hi y", 4), 4);
        assert_eq!(caret_after_rewrite("x sig y", "x Best,\nName y", 3), 12);
    }

    #[test]
    fn caret_after_span_shifts() {
        assert_eq!(caret_after_rewrite("hello there", "hi there", 11), 8);
    }

    #[test]
    fn caret_handles_multibyte_text() {
        assert_eq!(caret_after_rewrite("café ok", "café okay", 7), 9);
    }

    #[test]
    fn rewrite_scope_restores_idle() {
        let cycle = EditCycle::new();
        assert!(cycle.begin_edit());
        assert_eq!(cycle.phase(), FieldPhase::UserEdited);
        {
            let _scope = cycle.rewriting();
            assert!(!cycle.begin_edit());
            assert!(!cycle.begin_edit());
        }
        assert_eq!(cycle.phase(), FieldPhase::Idle);
        assert_eq!(cycle.echoes(), 2);
    }

    #[test]
    fn value_write_commits_through_reactive_layer() {
        let mut doc = MemoryDocument::new();
        let input = doc.append_value_field(doc.root(), "input", "hello");
        doc.observe(doc.root(), ObserveScope::everything());

        FieldWriteAdapter::new(true).write(&mut doc, input, FieldKind::ValueField, "hi", Some(2)).unwrap();

        assert_eq!(doc.field_text(input).as_deref(), Some("hi"));
        assert_eq!(doc.selection(input), Some(Selection::caret(2)));
        assert_eq!(doc.reactive_updates(input), vec!["hi"]);
        let kinds: Vec<_> = doc.dispatched().iter().map(|e| (e.kind, e.synthetic)).collect();
        assert_eq!(kinds, vec![(NotificationKind::Input, true), (NotificationKind::Change, true)]);
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn rich_write_renders_line_breaks() {
        let mut doc = MemoryDocument::new();
        let region = doc.append_rich_region(doc.root(), "sig");

        FieldWriteAdapter::default().write(&mut doc, region, FieldKind::RichRegion, "Best,\nName", Some(10)).unwrap();

        assert_eq!(doc.inner_markup(region), "Best,<br>Name");
        assert_eq!(doc.selection(region), Some(Selection::caret(10)));
        // Rich regions never get a change notification.
        assert_eq!(doc.dispatched().len(), 1);
    }

    #[test]
    fn rich_write_keeps_literal_tokens_as_text() {
        let mut doc = MemoryDocument::new();
        let region = doc.append_rich_region(doc.root(), "");

        FieldWriteAdapter::default().write(&mut doc, region, FieldKind::RichRegion, "a <br> b\nc", None).unwrap();
        assert_eq!(doc.field_text(region).as_deref(), Some("a <br> b\nc"));
    }

    #[test]
    fn failed_write_dispatches_nothing() {
        let mut doc = MemoryDocument::new();
        let input = doc.append_value_field(doc.root(), "input", "hello");
        doc.set_read_only(input, true);

        let err = FieldWriteAdapter::default().write(&mut doc, input, FieldKind::ValueField, "hi", None).unwrap_err();
        assert_eq!(err, WriteError::ReadOnly(input));
        assert!(doc.dispatched().is_empty());
    }

    #[test]
    fn echo_is_seen_while_rewriting() {
        let mut doc = MemoryDocument::new();
        let input = doc.append_value_field(doc.root(), "input", "hello");
        let cycle = Rc::new(EditCycle::new());
        let seen = Rc::clone(&cycle);
        doc.add_listener(Rc::new(move |_: &mut dyn Document, _: &FieldEvent| {
            seen.begin_edit();
        }));

        {
            let _scope = cycle.rewriting();
            FieldWriteAdapter::default().write(&mut doc, input, FieldKind::ValueField, "hi", None).unwrap();
        }
        assert_eq!(cycle.echoes(), 1);
        assert_eq!(cycle.phase(), FieldPhase::Idle);
    }
}
