//! Implicit call context.
//!
//! A proxy configured with a context sends it ahead of every call's own
//! arguments, wrapped in a [`ContextEnvelope`]:
//!
//! ```text
//! {"$context": true, "payload": <context>}
//! ```
//!
//! Only the exact marker key holding boolean `true` identifies an envelope.
//! A first argument that merely resembles one is left alone.

use crate::value::{Map, Value};

/// Marker key of a context envelope.
pub const CONTEXT_MARKER_KEY: &str = "$context";

/// Key holding the wrapped context.
pub const CONTEXT_PAYLOAD_KEY: &str = "payload";

/// A context value tagged so the receiving side can tell it from data.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEnvelope {
    payload: Value,
}

impl ContextEnvelope {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// An envelope only when a context is configured.
    pub fn wrap(context: Option<Value>) -> Option<Self> {
        context.map(Self::new)
    }

    /// The payload if `candidate` carries the marker, otherwise `None`.
    pub fn unwrap(candidate: &Value) -> Option<Value> {
        let map = candidate.as_object()?;
        if Self::is_marked(map) {
            Some(map.get(CONTEXT_PAYLOAD_KEY).cloned().unwrap_or_default())
        } else {
            None
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Wire form of the envelope.
    pub fn to_value(&self) -> Value {
        Value::object([
            (CONTEXT_MARKER_KEY, Value::Bool(true)),
            (CONTEXT_PAYLOAD_KEY, self.payload.clone()),
        ])
    }

    fn is_marked(map: &Map) -> bool {
        matches!(map.get(CONTEXT_MARKER_KEY), Some(Value::Bool(true)))
    }
}

impl From<ContextEnvelope> for Value {
    fn from(envelope: ContextEnvelope) -> Self {
        envelope.to_value()
    }
}

/// A leading call argument, classified at the decode boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Ordinary positional data.
    Plain(Value),
    /// The unwrapped payload of a context envelope.
    Context(Value),
}

impl Argument {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(mut map) if ContextEnvelope::is_marked(&map) => {
                Argument::Context(map.remove(CONTEXT_PAYLOAD_KEY).unwrap_or_default())
            }
            other => Argument::Plain(other),
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, Argument::Context(_))
    }

    /// The value the target method receives at this position.
    pub fn into_value(self) -> Value {
        match self {
            Argument::Plain(value) | Argument::Context(value) => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_without_context_is_none() {
        assert!(ContextEnvelope::wrap(None).is_none());
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let envelope = ContextEnvelope::wrap(Some(Value::from(json!({"id": 42})))).unwrap();
        let wire = envelope.to_value();
        assert_eq!(wire.get("$context"), Some(&Value::Bool(true)));
        assert_eq!(
            ContextEnvelope::unwrap(&wire),
            Some(Value::from(json!({"id": 42})))
        );
    }

    #[test]
    fn test_falsy_payload_still_unwraps() {
        let wire = ContextEnvelope::new(Value::from(0u64)).to_value();
        assert_eq!(ContextEnvelope::unwrap(&wire), Some(Value::from(0u64)));
    }

    #[test]
    fn test_lookalikes_are_not_unwrapped() {
        let lookalikes = [
            json!({"context": true, "payload": "x"}),
            json!({"$context": "true", "payload": "x"}),
            json!({"$context": 1, "payload": "x"}),
            json!({"$context": false, "payload": "x"}),
            json!({"payload": "x"}),
            json!(["$context", true]),
            json!("$context"),
        ];

        for lookalike in lookalikes {
            let value = Value::from(lookalike);
            assert_eq!(ContextEnvelope::unwrap(&value), None);
            assert_eq!(Argument::classify(value.clone()), Argument::Plain(value));
        }
    }

    #[test]
    fn test_classify_envelope() {
        let wire = ContextEnvelope::new(Value::from("window-3")).to_value();
        let argument = Argument::classify(wire);
        assert!(argument.is_context());
        assert_eq!(argument.into_value(), Value::from("window-3"));
    }

    #[test]
    fn test_marker_without_payload_unwraps_to_null() {
        let value = Value::from(json!({"$context": true}));
        assert_eq!(Argument::classify(value), Argument::Context(Value::Null));
    }
}
