//! Values that travel over a channel.
//!
//! [`Value`] mirrors JSON, plus two rich variants ([`Uri`] and [`RegExp`])
//! that only exist in memory. Serializing a rich value marshals it into a
//! plain mapping tagged with [`MID_KEY`]; the receiving side gets that
//! mapping back as ordinary data until it is revived (see [`crate::revive`]).
//!
//! ```text
//! Uri    -> {"$mid": 1, "scheme": .., "authority": .., "path": .., "query": .., "fragment": ..}
//! RegExp -> {"$mid": 2, "source": .., "flags": ..}
//! ```

use crate::{ChannelError, Result};
use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::Path;
use url::Url;

/// Key carrying the revival discriminant of a marshalled rich value.
pub const MID_KEY: &str = "$mid";

/// Discriminants of the rich values this crate knows how to revive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarshalledId {
    Uri,
    RegExp,
}

impl MarshalledId {
    pub fn as_u64(self) -> u64 {
        match self {
            MarshalledId::Uri => 1,
            MarshalledId::RegExp => 2,
        }
    }
}

/// String-keyed mapping used for object values.
pub type Map = BTreeMap<String, Value>;

/// A transport-safe datum, or a revived rich value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    Uri(Uri),
    RegExp(RegExp),
}

impl Value {
    /// Build an object value from key/value pairs.
    pub fn object<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Uri(_) => "uri",
            Value::RegExp(_) => "regexp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for values produced by revival rather than decoded from plain data.
    pub fn is_revived(&self) -> bool {
        matches!(self, Value::Uri(_) | Value::RegExp(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_uri(&self) -> Option<&Uri> {
        match self {
            Value::Uri(uri) => Some(uri),
            _ => None,
        }
    }

    pub fn as_regexp(&self) -> Option<&RegExp> {
        match self {
            Value::RegExp(re) => Some(re),
            _ => None,
        }
    }

    /// Look up a key of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }
}

/// Convert any serializable type into a [`Value`].
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(Value::from(serde_json::to_value(value)?))
}

/// Decode a [`Value`] into a concrete type. Rich values are marshalled first,
/// so `Uri` fields decode from either form.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::from(value))?)
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::Uri(uri) => serde_json::Value::from(Value::Object(uri.marshal())),
            Value::RegExp(re) => serde_json::Value::from(Value::Object(re.marshal())),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Object(map)
    }
}

impl From<Uri> for Value {
    fn from(uri: Uri) -> Self {
        Value::Uri(uri)
    }
}

impl From<RegExp> for Value {
    fn from(re: RegExp) -> Self {
        Value::RegExp(re)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => items.serialize(serializer),
            Value::Object(map) => map.serialize(serializer),
            Value::Uri(uri) => uri.marshal().serialize(serializer),
            Value::RegExp(re) => re.marshal().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

// ============================================================================
// Uri
// ============================================================================

/// A URI split into the components that cross the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl Uri {
    /// Parse a URI string.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| ChannelError::Validation {
            field: "uri".to_string(),
            message: format!("{}: {}", input, e),
        })?;
        Ok(Self::from_url(&url))
    }

    /// Build a `file` URI from an absolute path.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let url = Url::from_file_path(path).map_err(|_| ChannelError::Validation {
            field: "uri".to_string(),
            message: format!("not an absolute path: {}", path.display()),
        })?;
        Ok(Self::from_url(&url))
    }

    pub fn from_url(url: &Url) -> Self {
        let mut authority = String::new();
        if !url.username().is_empty() {
            authority.push_str(url.username());
            if let Some(password) = url.password() {
                authority.push(':');
                authority.push_str(password);
            }
            authority.push('@');
        }
        if let Some(host) = url.host_str() {
            authority.push_str(host);
        }
        if let Some(port) = url.port() {
            let _ = write!(authority, ":{}", port);
        }

        Self {
            scheme: url.scheme().to_string(),
            authority,
            path: url.path().to_string(),
            query: url.query().unwrap_or_default().to_string(),
            fragment: url.fragment().unwrap_or_default().to_string(),
        }
    }

    pub fn to_url(&self) -> Result<Url> {
        let text = self.to_string();
        Url::parse(&text).map_err(|e| ChannelError::Validation {
            field: "uri".to_string(),
            message: format!("{}: {}", text, e),
        })
    }

    /// Rebuild a URI from its component mapping. `scheme` is required, every
    /// other component defaults to empty.
    pub fn from_components(map: &Map) -> Option<Self> {
        let scheme = map.get("scheme").and_then(Value::as_str)?;
        if scheme.is_empty() {
            return None;
        }
        let component = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Some(Self {
            scheme: scheme.to_string(),
            authority: component("authority"),
            path: component("path"),
            query: component("query"),
            fragment: component("fragment"),
        })
    }

    /// Accept a revived URI, its component mapping, or a URI string.
    pub fn revive(value: Value) -> Result<Self> {
        match value {
            Value::Uri(uri) => Ok(uri),
            Value::Object(map) => Self::from_components(&map).ok_or_else(|| {
                ChannelError::Validation {
                    field: "uri".to_string(),
                    message: "URI components are missing a scheme".to_string(),
                }
            }),
            Value::String(s) => Self::parse(&s),
            other => Err(ChannelError::Validation {
                field: "uri".to_string(),
                message: format!("expected URI components, got {}", other.kind()),
            }),
        }
    }

    /// Plain-data form of this URI.
    pub fn marshal(&self) -> Map {
        let mut map = Map::new();
        map.insert(MID_KEY.to_string(), Value::from(MarshalledId::Uri.as_u64()));
        map.insert("scheme".to_string(), Value::from(self.scheme.as_str()));
        map.insert("authority".to_string(), Value::from(self.authority.as_str()));
        map.insert("path".to_string(), Value::from(self.path.as_str()));
        map.insert("query".to_string(), Value::from(self.query.as_str()));
        map.insert("fragment".to_string(), Value::from(self.fragment.as_str()));
        map
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if !self.authority.is_empty() || self.scheme == "file" {
            write!(f, "//{}", self.authority)?;
        }
        f.write_str(&self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct UriComponents {
    scheme: String,
    #[serde(default)]
    authority: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    fragment: String,
}

impl Serialize for Uri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.marshal().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let c = UriComponents::deserialize(deserializer)?;
        Ok(Self {
            scheme: c.scheme,
            authority: c.authority,
            path: c.path,
            query: c.query,
            fragment: c.fragment,
        })
    }
}

// ============================================================================
// RegExp
// ============================================================================

/// A regular expression with the source and flags it was written with.
///
/// Supported flags: `i` (case-insensitive), `m` (multi-line), `s` (dot matches
/// newline), `x` (ignore whitespace). `g`, `u`, `y` and `d` only affect how a
/// pattern is iterated by its author and are kept but otherwise ignored.
#[derive(Debug, Clone)]
pub struct RegExp {
    source: String,
    flags: String,
    compiled: Regex,
}

impl RegExp {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let flags = flags.into();

        let mut builder = RegexBuilder::new(&source);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                'g' | 'u' | 'y' | 'd' => {}
                other => {
                    return Err(ChannelError::Validation {
                        field: "regexp".to_string(),
                        message: format!("unsupported flag '{}'", other),
                    });
                }
            }
        }

        let compiled = builder.build().map_err(|e| ChannelError::Validation {
            field: "regexp".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source,
            flags,
            compiled,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn regex(&self) -> &Regex {
        &self.compiled
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.compiled.is_match(haystack)
    }

    /// Plain-data form of this expression.
    pub fn marshal(&self) -> Map {
        let mut map = Map::new();
        map.insert(
            MID_KEY.to_string(),
            Value::from(MarshalledId::RegExp.as_u64()),
        );
        map.insert("source".to_string(), Value::from(self.source.as_str()));
        map.insert("flags".to_string(), Value::from(self.flags.as_str()));
        map
    }
}

impl PartialEq for RegExp {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.flags == other.flags
    }
}

impl fmt::Display for RegExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

#[derive(Deserialize)]
struct RegExpComponents {
    source: String,
    #[serde(default)]
    flags: String,
}

impl Serialize for RegExp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.marshal().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RegExp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let c = RegExpComponents::deserialize(deserializer)?;
        RegExp::new(c.source, c.flags).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uri_parse_components() {
        let uri = Uri::parse("https://user@example.com:8443/docs/a.md?rev=2#intro").unwrap();
        assert_eq!(uri.scheme, "https");
        assert_eq!(uri.authority, "user@example.com:8443");
        assert_eq!(uri.path, "/docs/a.md");
        assert_eq!(uri.query, "rev=2");
        assert_eq!(uri.fragment, "intro");
        assert_eq!(
            uri.to_string(),
            "https://user@example.com:8443/docs/a.md?rev=2#intro"
        );
    }

    #[test]
    fn test_file_uri_display_keeps_empty_authority() {
        let uri = Uri::parse("file:///tmp/notes.txt").unwrap();
        assert_eq!(uri.authority, "");
        assert_eq!(uri.path, "/tmp/notes.txt");
        assert_eq!(uri.to_string(), "file:///tmp/notes.txt");
    }

    #[test]
    fn test_uri_rejects_relative_input() {
        assert!(Uri::parse("not a uri").is_err());
    }

    #[test]
    fn test_uri_marshals_with_discriminant() {
        let uri = Uri::parse("file:///tmp/a").unwrap();
        let json = serde_json::Value::from(Value::Uri(uri));
        assert_eq!(json["$mid"], json!(1));
        assert_eq!(json["scheme"], json!("file"));
        assert_eq!(json["path"], json!("/tmp/a"));
    }

    #[test]
    fn test_uri_revive_accepts_components_without_mid() {
        let plain = Value::from(json!({"scheme": "untitled", "path": "Untitled-1"}));
        let uri = Uri::revive(plain).unwrap();
        assert_eq!(uri.to_string(), "untitled:Untitled-1");
    }

    #[test]
    fn test_uri_revive_rejects_numbers() {
        assert!(Uri::revive(Value::from(3u64)).is_err());
    }

    #[test]
    fn test_regexp_flags() {
        let re = RegExp::new("^hello", "im").unwrap();
        assert!(re.is_match("first\nHELLO world"));
        assert_eq!(re.to_string(), "/^hello/im");
    }

    #[test]
    fn test_regexp_unknown_flag_is_error() {
        assert!(RegExp::new("a", "q").is_err());
    }

    #[test]
    fn test_regexp_equality_ignores_compiled_form() {
        let a = RegExp::new("a+", "g").unwrap();
        let b = RegExp::new("a+", "g").unwrap();
        let c = RegExp::new("a+", "i").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_value_deserializes_as_plain_data() {
        let value: Value =
            serde_json::from_str(r#"{"$mid": 1, "scheme": "file", "path": "/x"}"#).unwrap();
        assert!(matches!(value, Value::Object(_)));
        assert!(!value.is_revived());
    }

    #[test]
    fn test_typed_decode_reads_marshalled_uri() {
        #[derive(Deserialize)]
        struct Opened {
            location: Uri,
        }

        let value = Value::object([("location", Value::Uri(Uri::parse("file:///a").unwrap()))]);
        let opened: Opened = from_value(value).unwrap();
        assert_eq!(opened.location.path, "/a");
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<u64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }
}
