//! Rule source boundary.
//!
//! The engine does not store rules. It asks a [`RuleSource`] for the current
//! set once and then follows change notifications; the latest published set
//! always wins.
//!
//! A source that cannot answer (`SourceError`) is not fatal: the engine runs
//! with an empty rule set and picks the rules up on the next notification.

use crate::error::SourceError;
use crate::rules::RuleSet;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// Callback invoked with every newly published rule set.
pub type RulesCallback = Rc<dyn Fn(&RuleSet)>;

/// Handle returned by [`RuleSource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Where rule sets come from.
pub trait RuleSource {
    /// The rule set as currently stored.
    fn current_rules(&self) -> Result<RuleSet, SourceError>;

    fn subscribe(&self, callback: RulesCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

#[derive(Default)]
struct Store {
    rules: Option<RuleSet>,
    unavailable: Option<String>,
    subscribers: Vec<(SubscriptionId, RulesCallback)>,
    next_id: u64,
}

/// In-process [`RuleSource`]. Clones share the same store.
#[derive(Clone, Default)]
pub struct MemoryRuleSource {
    store: Rc<RefCell<Store>>,
}

impl std::fmt::Debug for MemoryRuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.borrow();
        f.debug_struct("MemoryRuleSource")
            .field("rules", &store.rules.as_ref().map(RuleSet::len))
            .field("unavailable", &store.unavailable)
            .field("subscribers", &store.subscribers.len())
            .finish()
    }
}

impl MemoryRuleSource {
    /// A source that has never been written to. Reading it yields the empty set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: RuleSet) -> Self {
        let source = Self::new();
        source.store.borrow_mut().rules = Some(rules);
        source
    }

    /// A source pre-populated with [`RuleSet::seed`], as a fresh install is.
    pub fn with_seed() -> Self {
        Self::with_rules(RuleSet::seed())
    }

    /// Store `rules` and notify every subscriber.
    pub fn publish(&self, rules: RuleSet) {
        let subscribers: Vec<RulesCallback> = {
            let mut store = self.store.borrow_mut();
            store.rules = Some(rules.clone());
            store.subscribers.iter().map(|(_, cb)| Rc::clone(cb)).collect()
        };
        debug!(rules = rules.len(), subscribers = subscribers.len(), "publishing rule set");
        for callback in subscribers {
            (*callback)(&rules);
        }
    }

    /// Parse a stored rule document and publish it.
    pub fn publish_json(&self, input: &str) -> Result<(), SourceError> {
        self.publish(RuleSet::from_json(input)?);
        Ok(())
    }

    /// Make reads fail with `reason` (`Some`) or succeed again (`None`).
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.store.borrow_mut().unavailable = reason.map(str::to_string);
    }

    pub fn subscriber_count(&self) -> usize {
        self.store.borrow().subscribers.len()
    }
}

impl RuleSource for MemoryRuleSource {
    fn current_rules(&self) -> Result<RuleSet, SourceError> {
        let store = self.store.borrow();
        if let Some(reason) = &store.unavailable {
            return Err(SourceError::Unavailable(reason.clone()));
        }
        Ok(store.rules.clone().unwrap_or_default())
    }

    fn subscribe(&self, callback: RulesCallback) -> SubscriptionId {
        let mut store = self.store.borrow_mut();
        let id = SubscriptionId(store.next_id);
        store.next_id += 1;
        store.subscribers.push((id, callback));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut store = self.store.borrow_mut();
        let before = store.subscribers.len();
        store.subscribers.retain(|(sid, _)| *sid != id);
        store.subscribers.len() != before
    }
}
