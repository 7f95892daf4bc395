//! Effect runner.
//!
//! Effects are re-run every time a state becomes active. An effect may
//! return a [`Cleanup`]; cleanups from the previous run are invoked (last
//! registered first) before effects run again, and when the service stops.

use crate::definition::EffectRef;
use crate::machine::Machine;
use crate::service::Params;
use parking_lot::Mutex;
use std::sync::Arc;

/// Teardown callback returned by an effect.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Effect implementation.
pub type EffectFn = Arc<dyn Fn(&Params<'_>) -> Option<Cleanup> + Send + Sync>;

/// Tracks cleanups of the effects that are currently active.
#[derive(Default)]
pub(crate) struct EffectRunner {
    active: Mutex<Vec<Cleanup>>,
}

impl EffectRunner {
    /// Cleans up the previous run, then runs machine-level effects followed by
    /// the effects of `state`.
    pub(crate) fn run(&self, machine: &Machine, state: &str, params: &Params<'_>) {
        self.cleanup();

        let mut refs: Vec<EffectRef> = machine.machine_effects(params);
        if let Some(node) = machine.definition().state(state) {
            refs.extend(node.effects.iter().cloned());
        }

        let mut cleanups = Vec::new();
        for effect in &refs {
            let Some(f) = machine.resolve_effect(effect) else {
                tracing::trace!(effect = ?effect, "skipping unresolved effect");
                continue;
            };
            if let Some(cleanup) = f(params) {
                cleanups.push(cleanup);
            }
        }

        tracing::trace!(state, effects = refs.len(), cleanups = cleanups.len(), "effects ran");
        self.active.lock().extend(cleanups);
    }

    /// Invokes and forgets all outstanding cleanups.
    pub(crate) fn cleanup(&self) {
        let pending = std::mem::take(&mut *self.active.lock());
        for cleanup in pending.into_iter().rev() {
            cleanup();
        }
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.active.lock().len()
    }
}
