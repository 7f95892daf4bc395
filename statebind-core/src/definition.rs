//! Machine definition types.
//!
//! Definitions are plain data and can be written in JSON (or anything serde
//! reads, such as YAML):
//!
//! ```json
//! {
//!   "id": "checkbox",
//!   "initial": "unchecked",
//!   "context": {"checked": false},
//!   "states": {
//!     "unchecked": {"on": {"CHECK": {"target": "checked", "actions": "markChecked"}}},
//!     "checked": {"on": {"UNCHECK": "unchecked"}, "entry": ["notify"]}
//!   },
//!   "on": {"RESET": "unchecked"},
//!   "tags": {"checked": ["active"]},
//!   "actions": {"markChecked": {"assign": {"checked": true}}},
//!   "computed": {"isChecked": "ctx.checked"}
//! }
//! ```
//!
//! Action, effect and guard references are names resolved against the
//! machine's implementations when they run. Actions and effects may also be
//! inline closures when the definition is built in Rust.

use crate::effect::EffectFn;
use crate::machine::ActionFn;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Event type of the eventless ("always") transition inside an `on` table.
pub const EVENTLESS: &str = "";

/// Transition table: event type -> transition spec.
pub type TransitionMap = BTreeMap<String, TransitionSpec>;

/// Complete machine description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineDefinition {
    /// Optional machine identifier, also the default scope id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Initial state name.
    pub initial: String,

    /// Default context values.
    #[serde(default)]
    pub context: Map<String, Value>,

    /// Default props, overridden by construction-time props.
    #[serde(default)]
    pub props: Map<String, Value>,

    /// Initial refs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub refs: Map<String, Value>,

    /// State name -> state definition.
    pub states: BTreeMap<String, StateNode>,

    /// Global transitions, consulted in every state.
    #[serde(default)]
    pub on: TransitionMap,

    /// State name -> tags.
    #[serde(default)]
    pub tags: BTreeMap<String, TagSet>,

    /// Machine-level effects, run whenever any state becomes active.
    #[serde(default, deserialize_with = "one_or_many")]
    pub effects: Vec<EffectRef>,

    /// Named guard expressions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub guards: BTreeMap<String, String>,

    /// Named declarative actions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, ActionDecl>,

    /// Named computed properties written as guard expressions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub computed: BTreeMap<String, String>,
}

impl MachineDefinition {
    /// Parses a definition from a JSON value.
    pub fn from_json(json: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(json)
    }

    /// Returns the state definition, if declared.
    pub fn state(&self, name: &str) -> Option<&StateNode> {
        self.states.get(name)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// Looks up the transition for `event` in `state`: the state-local table
    /// is consulted first, then the global table.
    pub fn transition(&self, state: &str, event: &str) -> Option<&TransitionSpec> {
        self.states
            .get(state)
            .and_then(|node| node.on.get(event))
            .or_else(|| self.on.get(event))
    }

    /// The eventless transition declared on `state`.
    pub fn eventless(&self, state: &str) -> Option<&TransitionSpec> {
        let node = self.states.get(state)?;
        node.always.as_ref().or_else(|| node.on.get(EVENTLESS))
    }

    /// Event types accepted in `state`, local and global, sorted.
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        let local = self.states.get(state).map(|node| node.on.keys());
        let mut events: Vec<&str> = self
            .on
            .keys()
            .chain(local.into_iter().flatten())
            .map(String::as_str)
            .filter(|event| *event != EVENTLESS)
            .collect();
        events.sort_unstable();
        events.dedup();
        events
    }

    /// Every transition spec in the definition, with the owning state
    /// (`None` for the global table).
    pub(crate) fn all_transitions(&self) -> Vec<(Option<&str>, &str, &TransitionSpec)> {
        let global = self.on.iter().map(|(e, t)| (None, e.as_str(), t));
        let local = self.states.iter().flat_map(|(name, node)| {
            let always = node
                .always
                .iter()
                .map(move |t| (Some(name.as_str()), EVENTLESS, t));
            node.on
                .iter()
                .map(move |(e, t)| (Some(name.as_str()), e.as_str(), t))
                .chain(always)
        });
        global.chain(local).collect()
    }
}

/// A single state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateNode {
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<ActionRef>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<ActionRef>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on: TransitionMap,

    /// Eventless transition, equivalent to an `on` entry keyed `""`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always: Option<TransitionSpec>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectRef>,
}

/// Right-hand side of a transition table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionSpec {
    /// Bare target state name.
    Target(String),
    /// Single guarded candidate.
    Single(TransitionConfig),
    /// Candidates tried in order; the first whose guard passes wins.
    List(Vec<TransitionConfig>),
}

impl TransitionSpec {
    /// Target state names mentioned by this spec.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            TransitionSpec::Target(target) => vec![target.as_str()],
            TransitionSpec::Single(config) => config.target.iter().map(String::as_str).collect(),
            TransitionSpec::List(configs) => configs
                .iter()
                .filter_map(|c| c.target.as_deref())
                .collect(),
        }
    }

    /// Guard strings mentioned by this spec.
    pub fn guards(&self) -> Vec<&str> {
        match self {
            TransitionSpec::Target(_) => Vec::new(),
            TransitionSpec::Single(config) => config.guard.iter().map(String::as_str).collect(),
            TransitionSpec::List(configs) => {
                configs.iter().filter_map(|c| c.guard.as_deref()).collect()
            }
        }
    }
}

impl From<&str> for TransitionSpec {
    fn from(target: &str) -> Self {
        TransitionSpec::Target(target.to_string())
    }
}

/// One transition candidate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransitionConfig {
    /// Destination state. Without a target only the actions run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Guard name or guard expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionRef>,
}

/// Wire form of a candidate. Only objects with known fields are accepted.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransitionConfig {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    guard: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    actions: Vec<ActionRef>,
}

impl<'de> Deserialize<'de> for TransitionConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ObjectOnly;

        impl<'de> Visitor<'de> for ObjectOnly {
            type Value = RawTransitionConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a transition object")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                RawTransitionConfig::deserialize(de::value::MapAccessDeserializer::new(map))
            }
        }

        let raw = deserializer.deserialize_map(ObjectOnly)?;
        Ok(TransitionConfig {
            target: raw.target,
            guard: raw.guard,
            actions: raw.actions,
        })
    }
}

impl TransitionConfig {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn action(mut self, action: impl Into<ActionRef>) -> Self {
        self.actions.push(action.into());
        self
    }
}

/// Tags for a state: a single tag or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagSet {
    One(String),
    Many(Vec<String>),
}

impl TagSet {
    pub fn contains(&self, tag: &str) -> bool {
        match self {
            TagSet::One(t) => t == tag,
            TagSet::Many(tags) => tags.iter().any(|t| t == tag),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            TagSet::One(t) => std::slice::from_ref(t),
            TagSet::Many(tags) => tags,
        };
        slice.iter().map(String::as_str)
    }
}

/// Built-in actions usable from data-only definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDecl {
    /// Sets context keys to literal values.
    Assign(Map<String, Value>),
    /// Copies event fields whose names are context keys into the context.
    /// Written `{"merge_event": true}`; `false` disables it.
    MergeEvent(bool),
    /// Sends an event of the given type.
    Raise(String),
    /// Negates a boolean context value.
    Toggle(String),
}

/// Reference to an action: a name or an inline closure.
#[derive(Clone)]
pub enum ActionRef {
    Named(String),
    Inline(ActionFn),
}

impl ActionRef {
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(&crate::service::Params<'_>) + Send + Sync + 'static,
    {
        ActionRef::Inline(Arc::new(f))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ActionRef::Named(name) => Some(name),
            ActionRef::Inline(_) => None,
        }
    }
}

/// Reference to an effect: a name or an inline closure.
#[derive(Clone)]
pub enum EffectRef {
    Named(String),
    Inline(EffectFn),
}

impl EffectRef {
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(&crate::service::Params<'_>) -> Option<crate::effect::Cleanup>
            + Send
            + Sync
            + 'static,
    {
        EffectRef::Inline(Arc::new(f))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            EffectRef::Named(name) => Some(name),
            EffectRef::Inline(_) => None,
        }
    }
}

macro_rules! named_ref_impls {
    ($ty:ident, $expecting:literal) => {
        impl From<&str> for $ty {
            fn from(name: &str) -> Self {
                $ty::Named(name.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(name: String) -> Self {
                $ty::Named(name)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $ty::Named(name) => write!(f, "{:?}", name),
                    $ty::Inline(_) => f.write_str("<inline>"),
                }
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self {
                    $ty::Named(name) => serializer.serialize_str(name),
                    $ty::Inline(_) => serializer.serialize_str("<inline>"),
                }
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct NameVisitor;

                impl<'de> Visitor<'de> for NameVisitor {
                    type Value = $ty;

                    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                        formatter.write_str($expecting)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        Ok($ty::Named(v.to_string()))
                    }
                }

                deserializer.deserialize_str(NameVisitor)
            }
        }
    };
}

named_ref_impls!(ActionRef, "an action name");
named_ref_impls!(EffectRef, "an effect name");

/// Accepts either a single item or a sequence of items.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OneOrMany<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OneOrMany<T> {
        type Value = Vec<T>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a name or an array of names")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            T::deserialize(de::value::StrDeserializer::<E>::new(v)).map(|item| vec![item])
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element()? {
                items.push(item);
            }
            Ok(items)
        }
    }

    deserializer.deserialize_any(OneOrMany(PhantomData))
}
