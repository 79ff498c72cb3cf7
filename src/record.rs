//! Record payloads and the provenance-tagged wrapper stored in each tier

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::CacheError;

/// A content record: required `id` and `table` plus an open attribute bag.
///
/// Attributes are flattened on the wire, so `{"id":"1","table":"posts","title":"A"}`
/// round-trips with `title` in [`RecordPayload::attributes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Unique identifier, generated at insert when empty
    #[serde(default)]
    pub id: String,
    /// Table the record lives in
    pub table: String,
    /// Free-form attributes
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl RecordPayload {
    /// Create an empty record for a table with no id yet
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            table: table.into(),
            attributes: Map::new(),
        }
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get an attribute value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Get an attribute as a string reference (for String values only)
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Embedded `total` attribute, as written by paged durable queries
    pub fn total(&self) -> Option<u64> {
        self.attributes.get("total").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse::<u64>().ok(),
            _ => None,
        })
    }
}

/// Result shape produced by the durable store or a custom producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordData {
    /// A listing
    Many(Vec<RecordPayload>),
    /// A single record
    Single(RecordPayload),
    /// Nothing found
    Empty,
}

impl RecordData {
    /// Derive the result-set total.
    ///
    /// A listing uses the `total` embedded in its first row, falling back to the
    /// row count. A single record counts as one; an empty result as zero.
    pub fn derive_total(&self) -> u64 {
        match self {
            RecordData::Many(rows) => match rows.first() {
                Some(first) => first.total().unwrap_or(rows.len() as u64),
                None => 0,
            },
            RecordData::Single(_) => 1,
            RecordData::Empty => 0,
        }
    }

    /// True when no record is present
    pub fn is_empty(&self) -> bool {
        match self {
            RecordData::Many(rows) => rows.is_empty(),
            RecordData::Single(_) => false,
            RecordData::Empty => true,
        }
    }

    /// The records as a slice-like vector of references
    pub fn records(&self) -> Vec<&RecordPayload> {
        match self {
            RecordData::Many(rows) => rows.iter().collect(),
            RecordData::Single(record) => vec![record],
            RecordData::Empty => Vec::new(),
        }
    }
}

impl From<Option<RecordPayload>> for RecordData {
    fn from(record: Option<RecordPayload>) -> Self {
        record.map_or(RecordData::Empty, RecordData::Single)
    }
}

impl From<Vec<RecordPayload>> for RecordData {
    fn from(rows: Vec<RecordPayload>) -> Self {
        RecordData::Many(rows)
    }
}

/// Tier that produced a [`WrappedRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Process-local memory cache
    Cache,
    /// Distributed key-value cache
    Kv,
    /// Durable store
    D1,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Cache => "cache",
            Source::Kv => "kv",
            Source::D1 => "d1",
        })
    }
}

/// Data plus provenance and total, the value stored in both cache tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedRecord {
    pub data: RecordData,
    pub source: Source,
    pub total: u64,
}

impl WrappedRecord {
    /// Wrap data, deriving its total
    pub fn new(data: RecordData, source: Source) -> Self {
        let total = data.derive_total();
        Self {
            data,
            source,
            total,
        }
    }

    /// Same record retagged with another source
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }
}

/// Which tiers a read may be answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcePreference {
    /// Memory, then fast cache, then durable store
    #[default]
    Fastest,
    /// Skip memory; fast cache, then durable store
    Kv,
    /// Durable store only
    D1,
}

impl SourcePreference {
    pub(crate) fn allows_memory(self) -> bool {
        matches!(self, SourcePreference::Fastest)
    }

    pub(crate) fn allows_fast_cache(self) -> bool {
        matches!(self, SourcePreference::Fastest | SourcePreference::Kv)
    }
}

impl FromStr for SourcePreference {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fastest" => Ok(SourcePreference::Fastest),
            "kv" => Ok(SourcePreference::Kv),
            "d1" => Ok(SourcePreference::D1),
            other => Err(CacheError::Validation(format!(
                "unknown source preference '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SourcePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourcePreference::Fastest => "fastest",
            SourcePreference::Kv => "kv",
            SourcePreference::D1 => "d1",
        })
    }
}
