// houndb - record.rs
// Record identity, property values, blob references.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::DataType;
use crate::{HoundError, Result};

/// Opaque record identifier, assigned by the collection at insert.
///
/// Ids are totally ordered; search results break distance ties by smaller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    pub(crate) fn generate() -> Self {
        RecordId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        RecordId(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = HoundError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(RecordId)
            .map_err(|e| HoundError::Serialization(format!("invalid record id {s:?}: {e}")))
    }
}

/// Reference to a payload held in a collection's blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub key: String,
    pub len: u64,
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Number(f64),
    Blob(BlobRef),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Text(_) => DataType::Text,
            Value::Number(_) => DataType::Number,
            Value::Blob(_) => DataType::Blob,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<BlobRef> for Value {
    fn from(b: BlobRef) -> Self {
        Value::Blob(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Blob(b) => write!(f, "<blob {} ({} bytes)>", b.key, b.len),
        }
    }
}

pub type Properties = BTreeMap<String, Value>;

/// A stored record. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub properties: Properties,
    pub vector: Vec<f32>,
    pub blob: Option<BlobRef>,
}

impl Record {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Insert payload: everything but the id, plus the raw blob bytes.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub properties: Properties,
    pub vector: Vec<f32>,
    pub blob: Option<Vec<u8>>,
}

impl NewRecord {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            ..Default::default()
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_blob(mut self, bytes: Vec<u8>) -> Self {
        self.blob = Some(bytes);
        self
    }
}
