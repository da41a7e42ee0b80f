//! Revival of rich values from their marshalled plain form.
//!
//! A marshalled value is an object carrying a numeric [`MID_KEY`]
//! discriminant. Each discriminant is owned by one [`Reviver`]; the walk
//! itself knows nothing about payload shapes. Revival is additive: unknown
//! discriminants and payloads a reviver rejects stay as plain data, and
//! already-revived values pass through untouched, so reviving twice is the
//! same as reviving once.

use crate::value::{MarshalledId, Map, RegExp, Uri, Value, MID_KEY};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Rebuilds one kind of rich value from its marshalled fields.
pub trait Reviver: Send + Sync {
    /// Discriminant this reviver owns.
    fn mid(&self) -> u64;

    /// Rebuild the value, or `None` if the payload is not understood.
    fn revive(&self, fields: &Map) -> Option<Value>;
}

/// Revives `{"$mid": 1, scheme, authority, path, query, fragment}`.
pub struct UriReviver;

impl Reviver for UriReviver {
    fn mid(&self) -> u64 {
        MarshalledId::Uri.as_u64()
    }

    fn revive(&self, fields: &Map) -> Option<Value> {
        Uri::from_components(fields).map(Value::Uri)
    }
}

/// Revives `{"$mid": 2, source, flags}`.
pub struct RegExpReviver;

impl Reviver for RegExpReviver {
    fn mid(&self) -> u64 {
        MarshalledId::RegExp.as_u64()
    }

    fn revive(&self, fields: &Map) -> Option<Value> {
        let source = fields.get("source").and_then(Value::as_str)?;
        let flags = fields
            .get("flags")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match RegExp::new(source, flags) {
            Ok(re) => Some(Value::RegExp(re)),
            Err(e) => {
                debug!("Leaving regexp /{}/{} unrevived: {}", source, flags, e);
                None
            }
        }
    }
}

/// A set of revivers keyed by discriminant.
#[derive(Clone, Default)]
pub struct Revivers {
    revivers: HashMap<u64, Arc<dyn Reviver>>,
}

static STANDARD: LazyLock<Revivers> = LazyLock::new(|| {
    let mut revivers = Revivers::empty();
    revivers.register(UriReviver).register(RegExpReviver);
    revivers
});

impl Revivers {
    /// No revivers: every value passes through as plain data.
    pub fn empty() -> Self {
        Self::default()
    }

    /// URI and regular-expression revivers.
    pub fn standard() -> &'static Revivers {
        &STANDARD
    }

    /// Register a reviver, replacing any previous owner of its discriminant.
    pub fn register(&mut self, reviver: impl Reviver + 'static) -> &mut Self {
        self.revivers.insert(reviver.mid(), Arc::new(reviver));
        self
    }

    pub fn contains(&self, mid: u64) -> bool {
        self.revivers.contains_key(&mid)
    }

    /// Revive a value, recursing into arrays and objects.
    pub fn revive(&self, value: Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.revive(v)).collect()),
            Value::Object(map) => self.revive_object(map),
            other => other,
        }
    }

    /// Revive every value in place, left to right.
    pub fn revive_all(&self, values: &mut [Value]) {
        for value in values.iter_mut() {
            *value = self.revive(std::mem::take(value));
        }
    }

    fn revive_object(&self, map: Map) -> Value {
        let reviver = map
            .get(MID_KEY)
            .and_then(Value::as_u64)
            .and_then(|mid| self.revivers.get(&mid));

        if let Some(reviver) = reviver {
            if let Some(revived) = reviver.revive(&map) {
                return revived;
            }
        }

        Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, self.revive(value)))
                .collect(),
        )
    }
}

impl fmt::Debug for Revivers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut mids: Vec<_> = self.revivers.keys().collect();
        mids.sort();
        f.debug_struct("Revivers").field("mids", &mids).finish()
    }
}

/// Revive with the standard reviver set.
pub fn revive(value: Value) -> Value {
    Revivers::standard().revive(value)
}

/// Revive a slice in place with the standard reviver set.
pub fn revive_all(values: &mut [Value]) {
    Revivers::standard().revive_all(values)
}
