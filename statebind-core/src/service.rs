//! The service: a running machine instance.
//!
//! A service owns the context store, the state cell, the one-deep event
//! history and the effect runner. All dispatch is synchronous. An event sent
//! while another one is being processed (from an action, effect, guard or
//! subscriber) is queued and handled, in order, once the current event has
//! been fully processed.

use crate::computed::Computed;
use crate::context::Context;
use crate::definition::{ActionDecl, ActionRef, TransitionConfig, TransitionSpec};
use crate::effect::EffectRunner;
use crate::error::CoreError;
use crate::event::{Event, EventView};
use crate::guard::{is_truthy, lookup_map, FieldSource, Root};
use crate::machine::{Machine, ResolvedAction};
use crate::state::{StateCell, StateListener};
use crate::subscription::Subscription;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Lifecycle of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    #[default]
    NotStarted,
    Started,
    Stopped,
}

/// Mutable references attached to a service (element handles, timers, ...).
#[derive(Debug, Default)]
pub struct Refs {
    values: RwLock<Map<String, Value>>,
}

impl Refs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.write().insert(key.into(), value.into());
    }
}

/// Identifier scope of a service, derived from the `id` and `ids` props.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    id: String,
    ids: Map<String, Value>,
}

impl Scope {
    /// Reads `id` (string) and `ids` (object) from `props`. Without an `id`
    /// prop, `fallback` is used, then a generated id.
    pub fn from_props(props: &Map<String, Value>, fallback: Option<&str>) -> Self {
        let id = props
            .get("id")
            .and_then(Value::as_str)
            .or(fallback)
            .map(str::to_string)
            .unwrap_or_else(|| format!("machine-{}", uuid::Uuid::new_v4()));
        let ids = props
            .get("ids")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self { id, ids }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ids(&self) -> &Map<String, Value> {
        &self.ids
    }

    /// Id of a named part: the `ids` override if present, else `"{id}:{part}"`.
    pub fn part_id(&self, part: &str) -> String {
        self.ids
            .get(part)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", self.id, part))
    }
}

#[derive(Default)]
struct Dispatch {
    queue: VecDeque<Event>,
    /// Thread currently draining the queue.
    owner: Option<ThreadId>,
}

/// Resets the dispatch state if an action panics mid-dispatch.
struct UnwindGuard<'a>(&'a ServiceInner);

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut dispatch = self.0.dispatch.lock();
            dispatch.owner = None;
            dispatch.queue.clear();
            self.0.idle.notify_all();
        }
    }
}

struct ServiceInner {
    machine: Arc<Machine>,
    context: Context,
    state: StateCell,
    props: Map<String, Value>,
    refs: Refs,
    scope: Scope,
    events: RwLock<EventView>,
    status: RwLock<MachineStatus>,
    dispatch: Mutex<Dispatch>,
    /// Signalled whenever the dispatch is released.
    idle: Condvar,
    effects: EffectRunner,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        self.effects.cleanup();
    }
}

/// A candidate chosen by the resolver.
struct Selected<'m> {
    target: Option<&'m str>,
    actions: &'m [ActionRef],
}

impl<'m> From<&'m TransitionConfig> for Selected<'m> {
    fn from(config: &'m TransitionConfig) -> Self {
        Self {
            target: config.target.as_deref(),
            actions: &config.actions,
        }
    }
}

/// A running machine. Cloning yields another handle to the same service.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    /// Creates a service with the machine's default context and props.
    pub fn new(machine: impl Into<Arc<Machine>>) -> Result<Self, CoreError> {
        Self::builder(machine).build()
    }

    pub fn builder(machine: impl Into<Arc<Machine>>) -> ServiceBuilder {
        ServiceBuilder {
            machine: machine.into(),
            context: None,
            props: Map::new(),
            on_transition: None,
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatches an event. Unknown events are ignored.
    pub fn send(&self, event: impl Into<Event>) {
        let event = event.into();
        if self.status() == MachineStatus::Stopped {
            tracing::warn!(event = %event.event_type, "ignoring event sent to stopped service");
            return;
        }

        {
            let mut dispatch = self.inner.dispatch.lock();
            dispatch.queue.push_back(event);
            if dispatch.owner.is_some() {
                tracing::trace!(queued = dispatch.queue.len(), "event queued behind current dispatch");
                return;
            }
            dispatch.owner = Some(thread::current().id());
        }

        let _unwind = UnwindGuard(&self.inner);
        self.drain();
    }

    /// Runs entry actions and effects of the initial state, then takes its
    /// eventless transition if a candidate passes. No-op unless not started.
    pub fn start(&self) {
        {
            let mut status = self.inner.status.write();
            if *status != MachineStatus::NotStarted {
                tracing::debug!(status = ?*status, "start ignored");
                return;
            }
            *status = MachineStatus::Started;
        }

        self.exclusive(|| {
            let machine = &self.inner.machine;
            let state = self.inner.state.value();
            let params = self.params();
            tracing::debug!(machine = ?machine.id(), state = %state, "service started");

            if let Some(node) = machine.definition().state(&state) {
                self.run_actions(&node.entry, &params);
            }
            self.inner.effects.run(machine, &state, &params);

            // A single hop; eventless chains are not followed.
            if let Some(spec) = machine.definition().eventless(&state) {
                if let Some(selected) = self.select(spec, &params) {
                    tracing::debug!(from = %state, to = ?selected.target, "eventless transition");
                    self.take(&state, selected, &params);
                }
            }
        });
    }

    /// Runs outstanding effect cleanups and stops accepting events.
    pub fn stop(&self) {
        {
            let mut status = self.inner.status.write();
            if *status == MachineStatus::Stopped {
                return;
            }
            *status = MachineStatus::Stopped;
        }
        self.inner.dispatch.lock().queue.clear();
        self.inner.effects.cleanup();
        tracing::debug!(state = %self.inner.state.value(), "service stopped");
    }

    pub fn status(&self) -> MachineStatus {
        *self.inner.status.read()
    }

    /// Alias of [`Service::status`].
    pub fn get_status(&self) -> MachineStatus {
        self.status()
    }

    /// Runs `f` as the active dispatch, draining events it queues. Called
    /// from within a dispatch on the same thread, `f` runs inline; a dispatch
    /// owned by another thread is waited out first.
    fn exclusive(&self, f: impl FnOnce()) {
        let me = thread::current().id();
        {
            let mut dispatch = self.inner.dispatch.lock();
            loop {
                let owner = dispatch.owner;
                match owner {
                    None => {
                        dispatch.owner = Some(me);
                        break;
                    }
                    Some(owner) if owner == me => {
                        drop(dispatch);
                        f();
                        return;
                    }
                    Some(_) => self.inner.idle.wait(&mut dispatch),
                }
            }
        }

        let _unwind = UnwindGuard(&self.inner);
        f();
        self.drain();
    }

    /// Processes queued events until the queue is empty, then releases the
    /// dispatch.
    fn drain(&self) {
        loop {
            let next = {
                let mut dispatch = self.inner.dispatch.lock();
                match dispatch.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        dispatch.owner = None;
                        self.inner.idle.notify_all();
                        return;
                    }
                }
            };
            self.process(next);
        }
    }

    fn process(&self, event: Event) {
        if self.status() == MachineStatus::Stopped {
            return;
        }

        let machine = &self.inner.machine;
        let event_type = event.event_type.clone();
        self.inner.events.write().record(event);

        let current = self.inner.state.value();
        let Some(spec) = machine.definition().transition(&current, &event_type) else {
            tracing::debug!(event = %event_type, state = %current, "no transition for event");
            return;
        };

        let params = self.params();
        let Some(selected) = self.select(spec, &params) else {
            tracing::debug!(event = %event_type, state = %current, "no candidate passed its guard");
            return;
        };

        tracing::debug!(
            event = %event_type,
            from = %current,
            to = ?selected.target,
            actions = selected.actions.len(),
            "transition selected"
        );
        self.take(&current, selected, &params);
    }

    /// First candidate with no guard or a passing guard.
    fn select<'m>(&self, spec: &'m TransitionSpec, params: &Params<'_>) -> Option<Selected<'m>> {
        let passes = |config: &TransitionConfig| {
            config
                .guard
                .as_deref()
                .map_or(true, |guard| self.inner.machine.guard_passes(guard, params))
        };

        match spec {
            TransitionSpec::Target(target) => Some(Selected {
                target: Some(target.as_str()),
                actions: &[],
            }),
            TransitionSpec::Single(config) => passes(config).then(|| Selected::from(config)),
            TransitionSpec::List(configs) => configs.iter().find(|c| passes(c)).map(Selected::from),
        }
    }

    /// Exit (when leaving), transition actions, destination entry, commit,
    /// then effects. Targetless candidates only run their actions.
    fn take(&self, source: &str, selected: Selected<'_>, params: &Params<'_>) {
        let machine = &self.inner.machine;
        let definition = machine.definition();

        let Some(target) = selected.target else {
            self.run_actions(selected.actions, params);
            return;
        };

        if target != source {
            if let Some(node) = definition.state(source) {
                self.run_actions(&node.exit, params);
            }
        }
        self.run_actions(selected.actions, params);
        if let Some(node) = definition.state(target) {
            self.run_actions(&node.entry, params);
        }

        self.inner.state.set(target);
        self.inner.effects.run(machine, target, params);
    }

    fn run_actions(&self, actions: &[ActionRef], params: &Params<'_>) {
        for action in actions {
            match self.inner.machine.resolve_action(action) {
                Some(ResolvedAction::Native(f)) => f(params),
                Some(ResolvedAction::Declared(decl)) => self.apply_declared(decl),
                None => tracing::trace!(action = ?action, "skipping unresolved action"),
            }
        }
    }

    fn apply_declared(&self, decl: &ActionDecl) {
        let context = &self.inner.context;
        match decl {
            ActionDecl::Assign(values) => {
                for (key, value) in values {
                    context.set(key, value.clone());
                }
            }
            ActionDecl::MergeEvent(false) => {}
            ActionDecl::MergeEvent(true) => {
                let current = self.inner.events.read().current().cloned();
                for (key, value) in current.map(|e| e.payload).unwrap_or_default() {
                    if context.contains(&key) {
                        context.set(&key, value);
                    }
                }
            }
            ActionDecl::Raise(event_type) => self.send(Event::new(event_type.clone())),
            ActionDecl::Toggle(key) => context.update(key, |value| Value::Bool(!is_truthy(value))),
        }
    }

    fn params(&self) -> Params<'_> {
        Params { service: self }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Registers a listener invoked on every value-changing state commit.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(f)
    }

    /// Current state name.
    pub fn get_snapshot(&self) -> String {
        self.inner.state.value()
    }

    pub fn state(&self) -> &StateCell {
        &self.inner.state
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Computed properties, evaluated against the current context on read.
    pub fn computed(&self) -> Computed<'_> {
        Computed::new(&self.inner.machine, &self.inner.context, &self.inner.props)
    }

    /// Construction-time prop merged over machine defaults.
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.inner.props.get(key)
    }

    pub fn props(&self) -> &Map<String, Value> {
        &self.inner.props
    }

    pub fn refs(&self) -> &Refs {
        &self.inner.refs
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// Current and previous event.
    pub fn event(&self) -> EventView {
        self.inner.events.read().clone()
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.inner.machine
    }

    /// A handle that can dispatch without keeping the service alive.
    pub fn sender(&self) -> Sender {
        Sender {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("machine", &self.inner.machine.id())
            .field("state", &self.inner.state.value())
            .field("status", &self.status())
            .field("context", &self.inner.context)
            .finish()
    }
}

/// Weak dispatch handle.
#[derive(Clone, Debug)]
pub struct Sender {
    inner: Weak<ServiceInner>,
}

impl Sender {
    /// Sends `event` if the service still exists. Returns false otherwise.
    pub fn send(&self, event: impl Into<Event>) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                Service { inner }.send(event);
                true
            }
            None => false,
        }
    }

    /// The service, if it still exists.
    pub fn upgrade(&self) -> Option<Service> {
        self.inner.upgrade().map(|inner| Service { inner })
    }
}

/// Builds a [`Service`].
pub struct ServiceBuilder {
    machine: Arc<Machine>,
    context: Option<Map<String, Value>>,
    props: Map<String, Value>,
    on_transition: Option<Arc<StateListener>>,
}

impl ServiceBuilder {
    /// Initial context, overlaid on the machine's default context.
    pub fn context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    /// Props, overlaid on the machine's default props.
    pub fn props(mut self, props: Map<String, Value>) -> Self {
        self.props = props;
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Callback invoked after subscribers on every value-changing commit.
    pub fn on_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_transition = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Service, CoreError> {
        let machine = self.machine;
        let definition = machine.definition();

        let scope = Scope::from_props(&self.props, definition.id.as_deref());
        let mut props = machine.default_props(&self.props, &scope);
        props.extend(self.props);

        let mut values = definition.context.clone();
        values.extend(self.context.unwrap_or_default());
        let context = Context::new(values);

        let initial = machine.initial_state(&props);
        if !definition.has_state(&initial) {
            return Err(CoreError::UnknownState { state: initial });
        }

        let refs = Refs::new(machine.initial_refs(&props, &context));
        let state = StateCell::new(initial, machine.tags(), self.on_transition);

        tracing::debug!(machine = ?machine.id(), scope = %scope.id(), state = %state.value(), "service created");

        Ok(Service {
            inner: Arc::new(ServiceInner {
                machine,
                context,
                state,
                props,
                refs,
                scope,
                events: RwLock::new(EventView::default()),
                status: RwLock::new(MachineStatus::NotStarted),
                dispatch: Mutex::new(Dispatch::default()),
                idle: Condvar::new(),
                effects: EffectRunner::default(),
            }),
        })
    }
}

/// Parameter bundle passed to guards, actions and effects.
pub struct Params<'a> {
    service: &'a Service,
}

impl<'a> Params<'a> {
    pub fn context(&self) -> &'a Context {
        &self.service.inner.context
    }

    /// Current and previous event.
    pub fn event(&self) -> EventView {
        self.service.event()
    }

    pub fn prop(&self, key: &str) -> Option<&'a Value> {
        self.service.inner.props.get(key)
    }

    pub fn refs(&self) -> &'a Refs {
        &self.service.inner.refs
    }

    pub fn computed(&self) -> Computed<'a> {
        self.service.computed()
    }

    pub fn state(&self) -> &'a StateCell {
        &self.service.inner.state
    }

    pub fn scope(&self) -> &'a Scope {
        &self.service.inner.scope
    }

    /// Queues an event behind the one being processed.
    pub fn send(&self, event: impl Into<Event>) {
        self.service.send(event);
    }

    pub fn sender(&self) -> Sender {
        self.service.sender()
    }

    /// Runs `f` immediately; there is no render batching to flush.
    pub fn flush<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }

    /// Dependency tracking is a view-layer concern; this never calls `f`.
    pub fn track(&self, _deps: &[Value], _f: impl FnOnce()) {}
}

impl FieldSource for Params<'_> {
    fn field(&self, root: Root, path: &str) -> Value {
        match root {
            Root::Ctx => self.context().field(path),
            Root::Prop => lookup_map(&self.service.inner.props, path),
            Root::Event => {
                let events = self.service.inner.events.read();
                match events.current() {
                    Some(event) if path == "type" => Value::String(event.event_type.clone()),
                    Some(event) => lookup_map(&event.payload, path),
                    None => Value::Null,
                }
            }
        }
    }
}
