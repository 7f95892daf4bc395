//! Validated machines: a definition plus the implementations its names
//! resolve to.

use crate::computed::ComputedParams;
use crate::context::Context;
use crate::definition::{ActionDecl, ActionRef, EffectRef, MachineDefinition, TagSet};
use crate::effect::{Cleanup, EffectFn};
use crate::error::CoreError;
use crate::guard::GuardExpr;
use crate::service::{Params, Scope};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Guard implementation.
pub type GuardFn = Arc<dyn Fn(&Params<'_>) -> bool + Send + Sync>;

/// Action implementation.
pub type ActionFn = Arc<dyn Fn(&Params<'_>) + Send + Sync>;

/// Computed property implementation.
pub type ComputedFn = Arc<dyn Fn(&ComputedParams<'_>) -> Value + Send + Sync>;

type InitialStateFn = Arc<dyn Fn(&Map<String, Value>) -> String + Send + Sync>;
type PropsFn = Arc<dyn Fn(&Map<String, Value>, &Scope) -> Map<String, Value> + Send + Sync>;
type RefsFn = Arc<dyn Fn(&Map<String, Value>, &Context) -> Map<String, Value> + Send + Sync>;
type EffectsFn = Arc<dyn Fn(&Params<'_>) -> Vec<EffectRef> + Send + Sync>;

/// Native implementations, looked up by name.
///
/// A native implementation shadows a declarative one of the same name.
#[derive(Clone, Default)]
pub struct Implementations {
    pub guards: HashMap<String, GuardFn>,
    pub actions: HashMap<String, ActionFn>,
    pub effects: HashMap<String, EffectFn>,
    pub computed: BTreeMap<String, ComputedFn>,
}

impl std::fmt::Debug for Implementations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |map: Vec<&String>| {
            let mut names: Vec<_> = map.into_iter().cloned().collect();
            names.sort();
            names
        };
        f.debug_struct("Implementations")
            .field("guards", &names(self.guards.keys().collect()))
            .field("actions", &names(self.actions.keys().collect()))
            .field("effects", &names(self.effects.keys().collect()))
            .field("computed", &names(self.computed.keys().collect()))
            .finish()
    }
}

#[derive(Clone, Default)]
struct Hooks {
    initial_state: Option<InitialStateFn>,
    default_props: Option<PropsFn>,
    refs: Option<RefsFn>,
    effects: Option<EffectsFn>,
}

/// A resolved action, ready to run.
pub(crate) enum ResolvedAction<'m> {
    Native(ActionFn),
    Declared(&'m ActionDecl),
}

/// Validated machine.
pub struct Machine {
    definition: MachineDefinition,
    implementations: Implementations,
    hooks: Hooks,
    guard_exprs: HashMap<String, GuardExpr>,
    computed_exprs: BTreeMap<String, GuardExpr>,
    tags: Arc<BTreeMap<String, TagSet>>,
    checksum: String,
}

impl Machine {
    /// Validates a data-only definition.
    pub fn new(definition: MachineDefinition) -> Result<Self, CoreError> {
        Self::builder(definition).build()
    }

    /// Parses and validates a definition from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        Self::new(MachineDefinition::from_json(json)?)
    }

    pub fn builder(definition: MachineDefinition) -> MachineBuilder {
        MachineBuilder {
            definition,
            implementations: Implementations::default(),
            hooks: Hooks::default(),
        }
    }

    pub fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    pub fn implementations(&self) -> &Implementations {
        &self.implementations
    }

    /// CRC32C of the canonical JSON form of the definition.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn id(&self) -> Option<&str> {
        self.definition.id.as_deref()
    }

    pub(crate) fn tags(&self) -> Arc<BTreeMap<String, TagSet>> {
        self.tags.clone()
    }

    /// Initial state for the given props.
    pub(crate) fn initial_state(&self, props: &Map<String, Value>) -> String {
        match &self.hooks.initial_state {
            Some(f) => f(props),
            None => self.definition.initial.clone(),
        }
    }

    /// Static default props overlaid with the dynamic defaults hook.
    pub(crate) fn default_props(
        &self,
        props: &Map<String, Value>,
        scope: &Scope,
    ) -> Map<String, Value> {
        let mut defaults = self.definition.props.clone();
        if let Some(f) = &self.hooks.default_props {
            defaults.extend(f(props, scope));
        }
        defaults
    }

    pub(crate) fn initial_refs(
        &self,
        props: &Map<String, Value>,
        context: &Context,
    ) -> Map<String, Value> {
        let mut refs = self.definition.refs.clone();
        if let Some(f) = &self.hooks.refs {
            refs.extend(f(props, context));
        }
        refs
    }

    /// Machine-level effect list, static or produced by the effects hook.
    pub(crate) fn machine_effects(&self, params: &Params<'_>) -> Vec<EffectRef> {
        match &self.hooks.effects {
            Some(f) => f(params),
            None => self.definition.effects.clone(),
        }
    }

    pub(crate) fn resolve_effect(&self, effect: &EffectRef) -> Option<EffectFn> {
        match effect {
            EffectRef::Named(name) => self.implementations.effects.get(name).cloned(),
            EffectRef::Inline(f) => Some(f.clone()),
        }
    }

    pub(crate) fn resolve_action<'m>(&'m self, action: &ActionRef) -> Option<ResolvedAction<'m>> {
        match action {
            ActionRef::Inline(f) => Some(ResolvedAction::Native(f.clone())),
            ActionRef::Named(name) => self
                .implementations
                .actions
                .get(name)
                .cloned()
                .map(ResolvedAction::Native)
                .or_else(|| self.definition.actions.get(name).map(ResolvedAction::Declared)),
        }
    }

    /// Evaluates a guard by name or expression. Unresolved guards pass.
    pub(crate) fn guard_passes(&self, guard: &str, params: &Params<'_>) -> bool {
        if let Some(f) = self.implementations.guards.get(guard) {
            return f(params);
        }
        if let Some(expr) = self.guard_exprs.get(guard) {
            return expr.evaluate(params);
        }
        tracing::trace!(guard, "unresolved guard treated as passing");
        true
    }

    /// Computed property value, `None` for undeclared names.
    pub(crate) fn computed_value(&self, name: &str, params: &ComputedParams<'_>) -> Option<Value> {
        if let Some(f) = self.implementations.computed.get(name) {
            return Some(f(params));
        }
        self.computed_exprs
            .get(name)
            .map(|expr| Value::Bool(expr.evaluate(params)))
    }

    /// Declared computed property names, sorted.
    pub fn computed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .implementations
            .computed
            .keys()
            .chain(self.computed_exprs.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.definition.id)
            .field("initial", &self.definition.initial)
            .field("states", &self.definition.states.keys().collect::<Vec<_>>())
            .field("implementations", &self.implementations)
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Attaches native implementations and hooks to a definition.
pub struct MachineBuilder {
    definition: MachineDefinition,
    implementations: Implementations,
    hooks: Hooks,
}

impl MachineBuilder {
    pub fn guard<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Params<'_>) -> bool + Send + Sync + 'static,
    {
        self.implementations.guards.insert(name.into(), Arc::new(f));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Params<'_>) + Send + Sync + 'static,
    {
        self.implementations.actions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn effect<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Params<'_>) -> Option<Cleanup> + Send + Sync + 'static,
    {
        self.implementations.effects.insert(name.into(), Arc::new(f));
        self
    }

    pub fn computed<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ComputedParams<'_>) -> Value + Send + Sync + 'static,
    {
        self.implementations.computed.insert(name.into(), Arc::new(f));
        self
    }

    /// Chooses the initial state from the resolved props.
    pub fn initial_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> String + Send + Sync + 'static,
    {
        self.hooks.initial_state = Some(Arc::new(f));
        self
    }

    /// Produces default props from the caller's props and scope.
    pub fn default_props<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>, &Scope) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.hooks.default_props = Some(Arc::new(f));
        self
    }

    /// Produces initial refs from props and context.
    pub fn refs<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>, &Context) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.hooks.refs = Some(Arc::new(f));
        self
    }

    /// Replaces the static machine-level effect list with a function of the
    /// parameter bundle.
    pub fn effects<F>(mut self, f: F) -> Self
    where
        F: Fn(&Params<'_>) -> Vec<EffectRef> + Send + Sync + 'static,
    {
        self.hooks.effects = Some(Arc::new(f));
        self
    }

    /// Validates the definition and produces the machine.
    pub fn build(self) -> Result<Machine, CoreError> {
        let def = &self.definition;

        if def.states.is_empty() {
            return Err(CoreError::invalid("machine declares no states"));
        }
        if !def.has_state(&def.initial) {
            return Err(CoreError::invalid(format!(
                "initial state '{}' not in states",
                def.initial
            )));
        }

        for (state, event, spec) in def.all_transitions() {
            for target in spec.targets() {
                if !def.has_state(target) {
                    return Err(CoreError::invalid(format!(
                        "transition target '{}' for event '{}' in {} not in states",
                        target,
                        event,
                        state.map_or_else(|| "global table".to_string(), |s| format!("state '{s}'")),
                    )));
                }
            }
        }

        for state in def.tags.keys() {
            if !def.has_state(state) {
                return Err(CoreError::invalid(format!(
                    "tags declared for unknown state '{}'",
                    state
                )));
            }
        }

        let mut guard_exprs = HashMap::new();
        for (name, source) in &def.guards {
            let expr = GuardExpr::parse(source).map_err(|e| CoreError::InvalidGuard {
                reason: format!("guard '{}': {}", name, e),
            })?;
            guard_exprs.insert(name.clone(), expr);
        }

        // Inline expressions on transitions are keyed by their own text.
        for (_, _, spec) in def.all_transitions() {
            for guard in spec.guards() {
                let named = self.implementations.guards.contains_key(guard)
                    || guard_exprs.contains_key(guard);
                if !named && GuardExpr::looks_like_expression(guard) {
                    guard_exprs.insert(guard.to_string(), GuardExpr::parse(guard)?);
                }
            }
        }

        let mut computed_exprs = BTreeMap::new();
        for (name, source) in &def.computed {
            let expr = GuardExpr::parse(source).map_err(|e| CoreError::InvalidGuard {
                reason: format!("computed '{}': {}", name, e),
            })?;
            computed_exprs.insert(name.clone(), expr);
        }

        let checksum = format!("{:08x}", crc32c::crc32c(&serde_json::to_vec(def)?));

        tracing::debug!(
            id = ?def.id,
            states = def.states.len(),
            guards = guard_exprs.len(),
            checksum = %checksum,
            "machine built"
        );

        Ok(Machine {
            tags: Arc::new(def.tags.clone()),
            definition: self.definition,
            implementations: self.implementations,
            hooks: self.hooks,
            guard_exprs,
            computed_exprs,
            checksum,
        })
    }
}
