//! Values crossing the boundary to the embedding host.
//!
//! Hosts expose associative arrays whose iteration order is unspecified, so
//! structured output is written through [`ArraySink`] with explicit integer
//! keys. [`HostArray`] is the bundled insertion-ordered implementation.

use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use thiserror::Error;

/// Subscript of a host array element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArrayKey {
    Index(i64),
    Name(String),
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for ArrayKey {
    fn from(index: i64) -> Self {
        Self::Index(index)
    }
}

impl From<usize> for ArrayKey {
    fn from(index: usize) -> Self {
        Self::Index(i64::try_from(index).unwrap_or(i64::MAX))
    }
}

impl From<&str> for ArrayKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ArrayKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Value of a host array element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArrayValue {
    Number(i64),
    Text(String),
    Array(HostArray),
}

impl From<i64> for ArrayValue {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<usize> for ArrayValue {
    fn from(n: usize) -> Self {
        Self::Number(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<&str> for ArrayValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ArrayValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<HostArray> for ArrayValue {
    fn from(array: HostArray) -> Self {
        Self::Array(array)
    }
}

/// The host refused to store an element.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot set element [{key}]: {reason}")]
pub struct SinkError {
    pub key: String,
    pub reason: String,
}

impl SinkError {
    pub fn new(key: &ArrayKey, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Destination for structured output.
pub trait ArraySink {
    /// Removes every element.
    fn clear(&mut self);

    /// Sets one element, replacing any previous value under `key`.
    fn set(&mut self, key: ArrayKey, value: ArrayValue) -> Result<(), SinkError>;
}

/// Insertion-ordered associative array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostArray {
    entries: Vec<(ArrayKey, ArrayValue)>,
}

impl HostArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&ArrayValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn index(&self, index: i64) -> Option<&ArrayValue> {
        self.get(&ArrayKey::Index(index))
    }

    pub fn name(&self, name: &str) -> Option<&ArrayValue> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, ArrayKey::Name(n) if n == name))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &ArrayValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Infallible insert for building arrays by hand.
    pub fn insert(&mut self, key: impl Into<ArrayKey>, value: impl Into<ArrayValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

impl ArraySink for HostArray {
    fn clear(&mut self) {
        self.entries.clear();
    }

    fn set(&mut self, key: ArrayKey, value: ArrayValue) -> Result<(), SinkError> {
        self.insert(key, value);
        Ok(())
    }
}

impl Serialize for HostArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(&key.to_string(), value)?;
        }
        map.end()
    }
}
