//! State cell: the current finite-state value and its subscribers.

use crate::definition::TagSet;
use crate::subscription::{Listeners, Subscription};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) type StateListener = dyn Fn(&str) + Send + Sync;

/// Holds the active state name.
///
/// Writes that resolve to the current value are no-ops: subscribers and the
/// transition hook only see value-changing commits.
pub struct StateCell {
    value: RwLock<String>,
    initial: String,
    tags: Arc<BTreeMap<String, TagSet>>,
    listeners: Listeners<StateListener>,
    on_transition: Option<Arc<StateListener>>,
}

impl StateCell {
    pub(crate) fn new(
        initial: String,
        tags: Arc<BTreeMap<String, TagSet>>,
        on_transition: Option<Arc<StateListener>>,
    ) -> Self {
        Self {
            value: RwLock::new(initial.clone()),
            initial,
            tags,
            listeners: Listeners::new(),
            on_transition,
        }
    }

    /// Current state name.
    pub fn value(&self) -> String {
        self.value.read().clone()
    }

    /// Alias of [`StateCell::value`].
    pub fn get(&self) -> String {
        self.value()
    }

    /// State the cell was created with.
    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Commits `next`. Returns true when the value changed.
    pub fn set(&self, next: impl Into<String>) -> bool {
        let next = next.into();
        {
            let mut value = self.value.write();
            if *value == next {
                return false;
            }
            *value = next.clone();
        }

        tracing::debug!(state = %next, "state committed");

        for listener in self.listeners.snapshot() {
            listener(&next);
        }
        if let Some(hook) = &self.on_transition {
            hook(&next);
        }
        true
    }

    /// Commits `f(current)`.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&str) -> String,
    {
        let next = f(&self.value());
        self.set(next)
    }

    /// Commits `next` when it differs from `prev`.
    pub fn invoke(&self, next: &str, prev: &str) -> bool {
        next != prev && self.set(next)
    }

    /// True when the current state is one of `values`.
    pub fn matches(&self, values: &[&str]) -> bool {
        let current = self.value.read();
        values.iter().any(|v| *v == current.as_str())
    }

    /// True when the tag table maps the current state to `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        let current = self.value.read();
        self.tags
            .get(current.as_str())
            .is_some_and(|tags| tags.contains(tag))
    }

    /// Tags of the current state.
    pub fn tags(&self) -> Vec<String> {
        let current = self.value.read();
        self.tags
            .get(current.as_str())
            .map(|tags| tags.iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// JSON serialization of the current value.
    pub fn hash(&self) -> String {
        let value = self.value();
        serde_json::to_string(&value).unwrap_or(value)
    }

    /// Registers a listener invoked on every value-changing commit.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(f))
    }
}

impl std::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell")
            .field("value", &*self.value.read())
            .field("subscribers", &self.listeners.len())
            .finish()
    }
}
