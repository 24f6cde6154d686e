// Track metadata module
// Player-defined key/value pairs read fresh on every poll

use std::collections::HashMap;
use std::fmt;
use zbus::zvariant::{OwnedValue, Value};

/// MPRIS key holding the track length in microseconds
pub const LENGTH_KEY: &str = "mpris:length";

/// Namespace of the standard MPRIS metadata fields
const XESAM_PREFIX: &str = "xesam:";

/// A single metadata value as reported by the player
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
    Integer(i64),
    Float(f64),
}

impl MetadataValue {
    /// Convert a D-Bus variant into a metadata value.
    /// Returns `None` for shapes a status line cannot use (dicts, structs, fds).
    pub fn from_variant(value: &Value<'_>) -> Option<Self> {
        match value {
            Value::Str(s) => Some(Self::Text(s.as_str().to_string())),
            Value::ObjectPath(path) => Some(Self::Text(path.as_str().to_string())),
            Value::Bool(b) => Some(Self::Text(b.to_string())),
            Value::U8(n) => Some(Self::Integer(i64::from(*n))),
            Value::I16(n) => Some(Self::Integer(i64::from(*n))),
            Value::U16(n) => Some(Self::Integer(i64::from(*n))),
            Value::I32(n) => Some(Self::Integer(i64::from(*n))),
            Value::U32(n) => Some(Self::Integer(i64::from(*n))),
            Value::I64(n) => Some(Self::Integer(*n)),
            Value::U64(n) => i64::try_from(*n).ok().map(Self::Integer),
            Value::F64(f) => Some(Self::Float(*f)),
            Value::Array(array) => Some(Self::List(
                array
                    .iter()
                    .filter_map(|item| match item {
                        Value::Str(s) => Some(s.as_str().to_string()),
                        _ => None,
                    })
                    .collect(),
            )),
            Value::Value(inner) => Self::from_variant(inner),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has a finite one
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Integer(n) => *n as f64,
            Self::Float(f) => *f,
            Self::Text(s) => s.trim().parse().ok()?,
            Self::List(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(", ")),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

/// Replace characters the template placeholder syntax cannot hold.
/// `xesam:artist` becomes `xesam-artist`.
pub fn normalize_key(key: &str) -> String {
    key.replace(':', "-")
}

/// Track metadata for the current tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: HashMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from the raw `Metadata` property of an MPRIS player
    pub fn from_dbus(raw: HashMap<String, OwnedValue>) -> Self {
        let mut metadata = Self::new();
        for (key, value) in raw {
            match MetadataValue::from_variant(&value) {
                Some(converted) => metadata.insert(key, converted),
                None => log::debug!("Skipping metadata field {} with unsupported type", key),
            }
        }
        metadata
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.fields.get(key)
    }

    /// Apply `f` to every piece of text, including list items
    pub fn map_text(&self, f: impl Fn(&str) -> String) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    MetadataValue::Text(s) => MetadataValue::Text(f(s)),
                    MetadataValue::List(items) => {
                        MetadataValue::List(items.iter().map(|s| f(s)).collect())
                    }
                    other => other.clone(),
                };
                (key.clone(), value)
            })
            .collect();
        Self { fields }
    }

    /// Track length in seconds. Streams and live media often omit it.
    pub fn length_seconds(&self) -> Option<f64> {
        self.get(LENGTH_KEY)
            .and_then(MetadataValue::as_f64)
            .filter(|micros| *micros > 0.0)
            .map(|micros| micros / 1_000_000.0)
    }

    /// Names a template may reference, with their rendered values.
    ///
    /// Every key is bound under its normalized name. The part after the
    /// namespace (`artist` for `xesam:artist`) is bound too, unless a key
    /// already uses that name. When namespaces share a short name, `xesam:`
    /// wins, then the alphabetically first key.
    pub fn template_bindings(&self) -> HashMap<String, String> {
        let mut bindings: HashMap<String, String> = self
            .fields
            .iter()
            .map(|(key, value)| (normalize_key(key), value.to_string()))
            .collect();

        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort_by(|a, b| {
            (!a.starts_with(XESAM_PREFIX), a).cmp(&(!b.starts_with(XESAM_PREFIX), b))
        });

        for key in keys {
            if let Some((_, short)) = key.rsplit_once(':') {
                if !short.is_empty() && !self.fields.contains_key(short) {
                    bindings
                        .entry(short.to_string())
                        .or_insert_with(|| self.fields[key].to_string());
                }
            }
        }

        bindings
    }
}
