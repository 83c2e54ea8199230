// houndb - lib.rs
// Public API, error types, configuration, re-exports.

pub mod collection;
pub mod embedding;
pub mod filter;
pub mod index;
pub mod manager;
pub mod planner;
pub mod record;
pub mod schema;
pub mod store;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use crate::collection::{
    BatchFailure, BatchResult, Collection, CollectionStats, CollectionStatus,
};
pub use crate::embedding::{Embedder, HashingEmbedder, Metric, ParsedEmbedder};
pub use crate::filter::{Filter, Predicate};
pub use crate::index::{HnswIndex, HnswParams};
pub use crate::manager::{CollectionManager, CollectionSpec};
pub use crate::planner::{QueryHit, QueryRequest};
pub use crate::record::{BlobRef, NewRecord, Record, RecordId, Value};
pub use crate::schema::{Attribute, DataType, Schema};
pub use crate::store::CompactReport;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HoundError {
    #[error("Schema violation on '{field}': {reason}")]
    SchemaViolation { field: String, reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Collection already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Unknown attribute in predicate: {name}")]
    UnknownAttribute { name: String },

    #[error("Busy: could not lock {resource} within {waited_ms}ms")]
    Busy { resource: String, waited_ms: u64 },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl HoundError {
    pub(crate) fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HoundError::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn collection_not_found(name: &str) -> Self {
        HoundError::NotFound {
            kind: "Collection",
            id: name.to_string(),
        }
    }

    pub(crate) fn busy(resource: impl Into<String>, waited: Duration) -> Self {
        HoundError::Busy {
            resource: resource.into(),
            waited_ms: waited.as_millis() as u64,
        }
    }
}

impl From<bincode::Error> for HoundError {
    fn from(e: bincode::Error) -> Self {
        HoundError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for HoundError {
    fn from(e: serde_json::Error) -> Self {
        HoundError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HoundError>;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HoundConfig {
    /// Root directory holding one sub-directory per collection
    pub storage_path: PathBuf,
    /// Metric used when a collection spec does not name one
    pub metric: Metric,
    /// Index parameters used when a collection spec does not set them
    pub hnsw: HnswParams,
    /// Upper bound on any lock wait before `Busy` is returned
    pub lock_timeout: Duration,
    /// Default candidate over-fetch for filtered queries
    pub overfetch_factor: usize,
    /// Default number of widening retries for filtered queries
    pub max_retries: usize,
}

impl Default for HoundConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./data"),
            metric: Metric::Cosine,
            hnsw: HnswParams::default(),
            lock_timeout: Duration::from_millis(2_000),
            overfetch_factor: 4,
            max_retries: 3,
        }
    }
}

impl HoundConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// # Errors
    /// Returns `HoundError::ConfigError` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("HOUNDB_STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }
        if let Ok(metric) = std::env::var("HOUNDB_METRIC") {
            config.metric = metric.parse()?;
        }
        if let Some(m) = env_number("HOUNDB_M")? {
            config.hnsw = HnswParams::with_m(m);
        }
        if let Some(ef) = env_number("HOUNDB_EF_CONSTRUCTION")? {
            config.hnsw.ef_construction = ef;
        }
        if let Some(ef) = env_number("HOUNDB_EF_SEARCH")? {
            config.hnsw.ef_search = ef;
        }
        if let Some(ms) = env_number("HOUNDB_LOCK_TIMEOUT_MS")? {
            config.lock_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(factor) = env_number("HOUNDB_OVERFETCH")? {
            config.overfetch_factor = factor.max(1);
        }

        config.hnsw.validate()?;
        Ok(config)
    }
}

fn env_number(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HoundError::ConfigError(format!("{key}={raw:?} is not a number"))),
        Err(_) => Ok(None),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let cfg = HoundConfig::default();
        assert_eq!(cfg.metric, Metric::Cosine);
        assert_eq!(cfg.hnsw.m, 16);
        assert_eq!(cfg.hnsw.m0, 32);
        assert_eq!(cfg.overfetch_factor, 4);
    }

    #[test]
    fn test_error_messages_carry_offender() {
        let err = HoundError::schema("weight", "expected NUMBER, got TEXT");
        assert_eq!(
            err.to_string(),
            "Schema violation on 'weight': expected NUMBER, got TEXT"
        );

        let err = HoundError::collection_not_found("Dog");
        assert_eq!(err.to_string(), "Collection not found: Dog");
    }

    #[test]
    fn test_env_number_rejects_garbage() {
        std::env::set_var("HOUNDB_TEST_GARBAGE", "many");
        let err = env_number("HOUNDB_TEST_GARBAGE").unwrap_err();
        assert!(matches!(err, HoundError::ConfigError(_)));
        assert_eq!(env_number("HOUNDB_TEST_UNSET_VAR").unwrap(), None);
    }
}
