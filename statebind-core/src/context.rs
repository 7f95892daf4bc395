//! Context store: named extended-state values outside the finite states.

use crate::guard::lookup_map;
use crate::subscription::{Listeners, Subscription};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Details of a single context write, passed to change observers.
#[derive(Debug, Clone, Copy)]
pub struct ContextChange<'a> {
    pub key: &'a str,
    pub previous: &'a Value,
    pub current: &'a Value,
}

pub(crate) type ContextListener = dyn Fn(&ContextChange<'_>) + Send + Sync;

/// Mutable context values with a fixed key set.
///
/// Every successful write notifies the change observers, even when the new
/// value equals the old one.
pub struct Context {
    values: RwLock<Map<String, Value>>,
    initial: Map<String, Value>,
    listeners: Listeners<ContextListener>,
}

impl Context {
    pub fn new(initial: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(initial.clone()),
            initial,
            listeners: Listeners::new(),
        }
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Stores `value` under `key` and notifies observers.
    ///
    /// Keys not present at construction are ignored.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        self.update(key, move |_| value);
    }

    /// Stores the result of `f(previous)` under `key` and notifies observers.
    pub fn update<F>(&self, key: &str, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let Some(previous) = self.get(key) else {
            tracing::warn!(key, "ignoring write to undeclared context key");
            return;
        };

        // The updater runs without holding the lock so it may read the context.
        let next = f(&previous);
        if let Some(slot) = self.values.write().get_mut(key) {
            *slot = next.clone();
        }

        tracing::trace!(key, from = %previous, to = %next, "context set");

        let change = ContextChange {
            key,
            previous: &previous,
            current: &next,
        };
        for listener in self.listeners.snapshot() {
            listener(&change);
        }
    }

    /// Value of `key` as supplied at construction, unaffected by writes.
    pub fn initial(&self, key: &str) -> Option<&Value> {
        self.initial.get(key)
    }

    /// Canonical JSON string of the current value (`"null"` when missing).
    pub fn hash(&self, key: &str) -> String {
        let value = self.get(key).unwrap_or(Value::Null);
        serde_json::to_string(&value).unwrap_or_else(|_| value.to_string())
    }

    /// Value at a dotted path such as `order.customer.name`.
    pub(crate) fn field(&self, path: &str) -> Value {
        lookup_map(&self.values.read(), path)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.initial.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.initial.keys().cloned().collect()
    }

    /// All current values as a JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.read().clone())
    }

    /// Registers an observer invoked after every write.
    pub fn on_change<F>(&self, f: F) -> Subscription
    where
        F: Fn(&ContextChange<'_>) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(f))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("values", &*self.values.read())
            .field("observers", &self.listeners.len())
            .finish()
    }
}
