//! Computed properties: values derived on demand from context and props.

use crate::context::Context;
use crate::guard::{lookup_map, FieldSource, Root};
use crate::machine::Machine;
use serde_json::{Map, Value};

/// Inputs available to a computed property.
#[derive(Clone, Copy)]
pub struct ComputedParams<'a> {
    pub context: &'a Context,
    pub props: &'a Map<String, Value>,
}

impl ComputedParams<'_> {
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

impl FieldSource for ComputedParams<'_> {
    fn field(&self, root: Root, path: &str) -> Value {
        match root {
            Root::Ctx => self.context.field(path),
            Root::Prop => lookup_map(self.props, path),
            Root::Event => Value::Null,
        }
    }
}

/// Property bag over a machine's computed map.
///
/// Every read evaluates the property against the current context; nothing
/// is cached.
pub struct Computed<'a> {
    machine: &'a Machine,
    params: ComputedParams<'a>,
}

impl<'a> Computed<'a> {
    pub(crate) fn new(
        machine: &'a Machine,
        context: &'a Context,
        props: &'a Map<String, Value>,
    ) -> Self {
        Self {
            machine,
            params: ComputedParams { context, props },
        }
    }

    /// Evaluates `name`, `None` if the machine declares no such property.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.machine.computed_value(name, &self.params)
    }

    /// Declared property names, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.machine.computed_keys()
    }

    /// Evaluates every property.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }
}
