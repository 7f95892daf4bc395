//! Events and the one-deep event history.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An event dispatched to a service.
///
/// Serializes as a flat object: `{"type": "CHECK", "value": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type discriminator.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Additional event fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Map::new(),
        }
    }

    /// Adds a payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Builds an event from a type and a JSON payload. Non-object payloads are
    /// stored under `value`.
    pub fn with_payload(event_type: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// The `src` field, set by view layers to name the event origin.
    pub fn src(&self) -> Option<&str> {
        self.payload.get("src").and_then(Value::as_str)
    }

    /// Returns the event as a JSON object including `type`.
    pub fn to_value(&self) -> Value {
        let mut map = self.payload.clone();
        map.insert("type".to_string(), Value::String(self.event_type.clone()));
        Value::Object(map)
    }
}

impl From<&str> for Event {
    fn from(event_type: &str) -> Self {
        Event::new(event_type)
    }
}

impl From<String> for Event {
    fn from(event_type: String) -> Self {
        Event::new(event_type)
    }
}

/// The current and immediately previous event. Older events are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventView {
    current: Option<Event>,
    previous: Option<Event>,
}

impl EventView {
    pub(crate) fn record(&mut self, event: Event) {
        self.previous = self.current.replace(event);
    }

    pub fn current(&self) -> Option<&Event> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Event> {
        self.previous.as_ref()
    }

    /// Type of the current event, `"UNKNOWN"` before the first dispatch.
    pub fn event_type(&self) -> &str {
        self.current
            .as_ref()
            .map(|e| e.event_type.as_str())
            .unwrap_or("UNKNOWN")
    }

    pub fn src(&self) -> Option<&str> {
        self.current.as_ref().and_then(Event::src)
    }

    /// Current event as JSON, with the previous event under `previousEvent`.
    pub fn to_value(&self) -> Value {
        let mut value = self
            .current
            .as_ref()
            .map(Event::to_value)
            .unwrap_or_else(|| serde_json::json!({"type": "UNKNOWN"}));
        if let (Value::Object(map), Some(prev)) = (&mut value, &self.previous) {
            map.insert("previousEvent".to_string(), prev.to_value());
        }
        value
    }
}
