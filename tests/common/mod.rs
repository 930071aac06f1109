use livesub::document::{Document, MemoryDocument, NodeId};
use livesub::{Engine, Options, ReplacementRule, RuleSet};
use std::time::{Duration, Instant};

/// Route engine logs to the test harness; `RUST_LOG=livesub=trace` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn rules(pairs: &[(&str, &str)]) -> RuleSet {
    pairs.iter().map(|(from, to)| ReplacementRule::new(*from, *to)).collect()
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Options with a 100 ms debounce and the backstop switched off.
pub fn quiet_options() -> Options {
    Options::default().with_debounce(ms(100)).with_full_rescan_interval(None)
}

/// An attached engine over a fresh document holding one `<p>` with `text`.
pub fn attached(pairs: &[(&str, &str)], options: Options, text: &str) -> (Engine, MemoryDocument, NodeId, Instant) {
    init_tracing();
    let mut doc = MemoryDocument::new();
    let p = doc.append_element(doc.root(), "p");
    let node = doc.append_text(p, text);
    let engine = Engine::with_rules(options, rules(pairs));
    let t0 = Instant::now();
    engine.attach(&mut doc, t0);
    (engine, doc, node, t0)
}
