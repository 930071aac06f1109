use livesub::{
    CompiledRules, DEFAULT_MAX_TEXT_LEN, PatternCompiler, RenderContext, ReplacementRule, RuleSet, SubstitutionEngine,
    substitute,
};
use proptest::prelude::*;
use std::rc::Rc;

fn rule_strategy() -> impl Strategy<Value = ReplacementRule> {
    ("[a-c.$*()\\\\ ]{0,4}", "[a-c$1\n<>]{0,6}").prop_map(|(from, to)| ReplacementRule::new(from, to))
}

fn context_strategy() -> impl Strategy<Value = RenderContext> {
    prop_oneof![Just(RenderContext::PlainText), Just(RenderContext::MarkupCapable)]
}

proptest! {
    #[test]
    fn empty_rule_set_is_identity(text in "\\PC{0,40}", ctx in context_strategy()) {
        let out = substitute(&text, &RuleSet::empty(), ctx);
        prop_assert_eq!(&out.text, &text);
        prop_assert!(!out.changed);
    }

    #[test]
    fn changed_flag_matches_output(
        text in "[a-c.$*()\\\\ \n]{0,30}",
        rules in prop::collection::vec(rule_strategy(), 0..6),
        ctx in context_strategy(),
    ) {
        let out = substitute(&text, &RuleSet::new(rules), ctx);
        prop_assert_eq!(out.changed, out.text != text);
        // A later rule may undo an earlier one, so `applied` can be non-empty
        // for an unchanged text; the converse never holds.
        if out.changed {
            prop_assert!(!out.applied.is_empty());
        }
    }

    #[test]
    fn patterns_only_match_literally(
        text in "[a-c.$*()\\\\ ]{0,30}",
        rule in rule_strategy(),
    ) {
        prop_assume!(!rule.from.is_empty() && !text.contains(&rule.from));
        let out = substitute(&text, &RuleSet::new(vec![rule]), RenderContext::PlainText);
        prop_assert!(!out.changed);
    }

    #[test]
    fn plain_text_never_gains_break_tokens(
        text in "[a-c ]{0,30}",
        rules in prop::collection::vec(("[a-c]{1,3}", "[a-c\n]{0,4}"), 0..5),
    ) {
        let rules: RuleSet = rules.into_iter().map(|(f, t)| ReplacementRule::new(f, t)).collect();
        let plain = substitute(&text, &rules, RenderContext::PlainText);
        prop_assert!(!plain.text.contains("<br>"));
        let markup = substitute(&text, &rules, RenderContext::MarkupCapable);
        prop_assert!(!markup.text.contains('\n'));
    }

    #[test]
    fn output_handed_back_is_left_alone(
        text in "[a-c .]{0,30}",
        words in prop::collection::vec("[a-c]{1,3}", 1..4),
    ) {
        // Rules whose `to` contains their own `from`, like `Dr -> Dr.`.
        let rules: RuleSet = words.iter().map(|w| ReplacementRule::new(w.clone(), format!("{w}."))).collect();
        let engine = SubstitutionEngine::new(
            Rc::new(CompiledRules::new(&rules, &PatternCompiler::default(), 1)),
            DEFAULT_MAX_TEXT_LEN,
        );
        let first = engine.apply(&text, RenderContext::PlainText);
        let again = engine.apply_protected(&first.text, RenderContext::PlainText, &first.spans);
        prop_assert_eq!(&again.text, &first.text);
        prop_assert_eq!(again.spans, first.spans);
    }
}
