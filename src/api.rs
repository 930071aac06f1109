use crate::RenderContext;
use crate::engine::{
    CompiledRules, DEFAULT_MAX_TEXT_LEN, DEFAULT_REGEX_SIZE_LIMIT, PatternCompiler, Substitution, SubstitutionEngine,
};
use crate::error::{Error, Result};
use crate::rules::RuleSet;
use serde::Deserialize;
use std::rc::Rc;
use std::time::Duration;

/// Environment variable overriding [`Options::debounce`] (milliseconds).
pub const ENV_DEBOUNCE_MS: &str = "LIVESUB_DEBOUNCE_MS";
/// Environment variable overriding [`Options::full_rescan_interval`] (milliseconds, `0` disables).
pub const ENV_RESCAN_MS: &str = "LIVESUB_RESCAN_MS";
/// Environment variable overriding [`Options::tracker_capacity`] (`0` means unbounded).
pub const ENV_TRACKER_CAPACITY: &str = "LIVESUB_TRACKER_CAPACITY";

/// Engine configuration.
///
/// Every field has a working default; use the `with_*` builders to change one
/// thing at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Quiet period after the last mutation before a scoped scan runs.
    pub debounce: Duration,
    /// Interval of the backstop full rescan; `None` disables it.
    pub full_rescan_interval: Option<Duration>,
    /// Wrap word-only patterns in `\b...\b`.
    pub anchor_whole_words: bool,
    /// Bound on the idempotency tracker; `None` is unbounded.
    pub tracker_capacity: Option<usize>,
    /// Dispatch `Change` after `Input` when rewriting a value field.
    pub dispatch_change: bool,
    /// Longest text (bytes) a substitution may produce.
    pub max_text_len: usize,
    /// Compiled size limit for one rule's matcher.
    pub regex_size_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            debounce: Duration::from_millis(100),
            full_rescan_interval: Some(Duration::from_secs(30)),
            anchor_whole_words: true,
            tracker_capacity: None,
            dispatch_change: true,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            regex_size_limit: DEFAULT_REGEX_SIZE_LIMIT,
        }
    }
}

/// On-disk form of [`Options`]: durations in milliseconds, every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OptionsFile {
    debounce_ms: Option<u64>,
    full_rescan_ms: Option<u64>,
    anchor_whole_words: Option<bool>,
    tracker_capacity: Option<usize>,
    dispatch_change: Option<bool>,
    max_text_len: Option<usize>,
    regex_size_limit: Option<usize>,
}

fn rescan_interval(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::Options(format!("{key}: cannot parse {raw:?}")))
}

impl Options {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_full_rescan_interval(mut self, interval: Option<Duration>) -> Self {
        self.full_rescan_interval = interval;
        self
    }

    pub fn with_anchor_whole_words(mut self, anchor: bool) -> Self {
        self.anchor_whole_words = anchor;
        self
    }

    pub fn with_tracker_capacity(mut self, capacity: Option<usize>) -> Self {
        self.tracker_capacity = capacity;
        self
    }

    pub fn with_dispatch_change(mut self, dispatch: bool) -> Self {
        self.dispatch_change = dispatch;
        self
    }

    pub fn with_max_text_len(mut self, len: usize) -> Self {
        self.max_text_len = len;
        self
    }

    pub fn with_regex_size_limit(mut self, limit: usize) -> Self {
        self.regex_size_limit = limit;
        self
    }

    /// The pattern compiler these options describe.
    pub fn compiler(&self) -> PatternCompiler {
        PatternCompiler { anchor_whole_words: self.anchor_whole_words, size_limit: self.regex_size_limit }
    }

    /// Load options from a JSON document; absent keys keep their defaults.
    ///
    /// ```
    /// use livesub::Options;
    ///
    /// let opts = Options::from_json(r#"{ "debounce_ms": 250, "full_rescan_ms": 0 }"#).unwrap();
    /// assert_eq!(opts.debounce.as_millis(), 250);
    /// assert!(opts.full_rescan_interval.is_none());
    /// ```
    pub fn from_json(input: &str) -> Result<Self> {
        let file: OptionsFile = serde_json::from_str(input).map_err(|e| Error::Options(e.to_string()))?;
        let mut opts = Options::default();
        if let Some(ms) = file.debounce_ms {
            opts.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = file.full_rescan_ms {
            opts.full_rescan_interval = rescan_interval(ms);
        }
        if let Some(anchor) = file.anchor_whole_words {
            opts.anchor_whole_words = anchor;
        }
        if let Some(cap) = file.tracker_capacity {
            opts.tracker_capacity = (cap > 0).then_some(cap);
        }
        if let Some(dispatch) = file.dispatch_change {
            opts.dispatch_change = dispatch;
        }
        if let Some(len) = file.max_text_len {
            opts.max_text_len = len;
        }
        if let Some(limit) = file.regex_size_limit {
            opts.regex_size_limit = limit;
        }
        opts.validate()
    }

    /// Defaults overridden by the `LIVESUB_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Options::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup` (an environment, or a map in tests).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
            self.debounce = Duration::from_millis(parse_env(ENV_DEBOUNCE_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_RESCAN_MS) {
            self.full_rescan_interval = rescan_interval(parse_env(ENV_RESCAN_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_TRACKER_CAPACITY) {
            let cap: usize = parse_env(ENV_TRACKER_CAPACITY, &raw)?;
            self.tracker_capacity = (cap > 0).then_some(cap);
        }
        self.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.max_text_len == 0 {
            return Err(Error::Options("max_text_len must be positive".into()));
        }
        if self.regex_size_limit == 0 {
            return Err(Error::Options("regex_size_limit must be positive".into()));
        }
        Ok(self)
    }
}

/// One-shot substitution of `text` under `rules`, without an engine.
///
/// Compiles the rules on every call; keep an [`crate::Engine`] around to reuse
/// the compiled form.
///
/// ```
/// use livesub::{RenderContext, RuleSet, substitute};
///
/// let out = substitute("hello world", &RuleSet::seed(), RenderContext::PlainText);
/// assert_eq!(out.text, "hi world");
/// ```
pub fn substitute(text: &str, rules: &RuleSet, ctx: RenderContext) -> Substitution {
    substitute_with(text, rules, ctx, &Options::default())
}

/// [`substitute`] with explicit options.
pub fn substitute_with(text: &str, rules: &RuleSet, ctx: RenderContext, options: &Options) -> Substitution {
    let compiled = Rc::new(CompiledRules::new(rules, &options.compiler(), 0));
    SubstitutionEngine::new(compiled, options.max_text_len).apply(text, ctx)
}
