//! Minimal actor view over a service.

use crate::event::Event;
use crate::service::Service;
use crate::subscription::Subscription;

/// Exposes a service as something that has a value, accepts events and can
/// be observed.
#[derive(Debug, Clone)]
pub struct Actor {
    service: Service,
}

impl Actor {
    pub fn new(service: Service) -> Self {
        Self { service }
    }

    /// Current state name.
    pub fn state_value(&self) -> String {
        self.service.get_snapshot()
    }

    pub fn send(&self, event: impl Into<Event>) {
        self.service.send(event);
    }

    /// Calls `f` with the current state right away, then on every change.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        f(&self.service.get_snapshot());
        self.service.subscribe(f)
    }

    pub fn service(&self) -> &Service {
        &self.service
    }
}

impl From<Service> for Actor {
    fn from(service: Service) -> Self {
        Self::new(service)
    }
}
