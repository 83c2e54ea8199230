// houndb - manager.rs
// Owns every collection under one storage root.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::collection::{Collection, Manifest, MANIFEST_FILE};
use crate::embedding::Metric;
use crate::index::HnswParams;
use crate::planner::PlannerDefaults;
use crate::schema::{Attribute, Schema};
use crate::{HoundConfig, HoundError, Result};

/// Everything needed to create a collection.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub vector_dim: usize,
    /// Manager default if unset
    pub metric: Option<Metric>,
    /// Manager default if unset
    pub index: Option<HnswParams>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, vector_dim: usize) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            vector_dim,
            metric: None,
            index: None,
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn index(mut self, params: HnswParams) -> Self {
        self.index = Some(params);
        self
    }
}

/// Registry of named collections.
///
/// Explicitly owned; pass it (or an `Arc` of it) to whatever needs it.
pub struct CollectionManager {
    config: HoundConfig,
    /// `None` for the in-memory mode
    root: Option<PathBuf>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl CollectionManager {
    /// Open the storage root and reload every collection found under it.
    pub fn open(config: HoundConfig) -> Result<Self> {
        let root = config.storage_path.clone();
        fs::create_dir_all(&root)?;

        let defaults = planner_defaults(&config);
        let mut collections = HashMap::new();
        for entry in fs::read_dir(&root)? {
            let dir = entry?.path();
            if !dir.join(MANIFEST_FILE).is_file() {
                continue;
            }
            let collection = Collection::open(dir, config.lock_timeout, defaults)?;
            collections.insert(collection.name().to_string(), Arc::new(collection));
        }

        log::info!("opened {:?} with {} collections", root, collections.len());
        Ok(Self {
            config,
            root: Some(root),
            collections: RwLock::new(collections),
        })
    }

    /// A manager that never touches disk.
    pub fn in_memory(config: HoundConfig) -> Self {
        Self {
            config,
            root: None,
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HoundConfig {
        &self.config
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Arc<Collection>>>> {
        self.collections
            .try_read_for(self.config.lock_timeout)
            .ok_or_else(|| HoundError::busy("collection registry", self.config.lock_timeout))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Arc<Collection>>>> {
        self.collections
            .try_write_for(self.config.lock_timeout)
            .ok_or_else(|| HoundError::busy("collection registry", self.config.lock_timeout))
    }

    /// # Errors
    /// `AlreadyExists` if the name is taken; `SchemaViolation` for a bad
    /// name, a zero dimension or an invalid schema; `ConfigError` for bad
    /// index parameters.
    pub fn create(&self, spec: CollectionSpec) -> Result<Arc<Collection>> {
        check_name(&spec.name)?;
        if spec.vector_dim == 0 {
            return Err(HoundError::schema("vector_dim", "must be greater than zero"));
        }
        let schema = Schema::new(spec.attributes)?;
        let hnsw = spec.index.unwrap_or(self.config.hnsw);
        hnsw.validate()?;

        let mut collections = self.write()?;
        if collections.contains_key(&spec.name) {
            return Err(HoundError::AlreadyExists { name: spec.name });
        }

        let dir = match &self.root {
            Some(root) => {
                let dir = root.join(&spec.name);
                if dir.exists() {
                    log::warn!("removing leftover directory {:?} before create", dir);
                    fs::remove_dir_all(&dir)?;
                }
                Some(dir)
            }
            None => None,
        };

        let manifest = Manifest {
            name: spec.name.clone(),
            vector_dim: spec.vector_dim,
            metric: spec.metric.unwrap_or(self.config.metric),
            schema,
            hnsw,
        };
        let collection = Arc::new(Collection::create(
            manifest,
            dir,
            self.config.lock_timeout,
            planner_defaults(&self.config),
        )?);
        collections.insert(spec.name.clone(), Arc::clone(&collection));

        log::info!(
            "created collection '{}' (dim {}, {})",
            spec.name,
            collection.vector_dim(),
            collection.metric()
        );
        Ok(collection)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Collection>> {
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| HoundError::collection_not_found(name))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    /// Collection names, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Remove a collection with all its records, index state and files.
    pub fn drop(&self, name: &str) -> Result<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get(name)
            .cloned()
            .ok_or_else(|| HoundError::collection_not_found(name))?;

        collection.mark_dropped()?;
        collections.remove(name);

        if let Some(root) = &self.root {
            let dir = root.join(name);
            if let Err(e) = fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        log::info!("dropped collection '{}'", name);
        Ok(())
    }

    /// Drop `name` if present; returns whether it existed.
    pub fn drop_if_exists(&self, name: &str) -> Result<bool> {
        match self.drop(name) {
            Ok(()) => Ok(true),
            Err(HoundError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Snapshot every collection's index.
    pub fn checkpoint(&self) -> Result<()> {
        let collections: Vec<Arc<Collection>> = self.read()?.values().cloned().collect();
        for collection in collections {
            collection.checkpoint()?;
        }
        Ok(())
    }
}

fn planner_defaults(config: &HoundConfig) -> PlannerDefaults {
    PlannerDefaults {
        overfetch_factor: config.overfetch_factor,
        max_retries: config.max_retries,
    }
}

/// Names double as directory names.
fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(HoundError::schema(
            "name",
            format!("invalid collection name {name:?}: use ASCII letters, digits, '_' or '-'"),
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
