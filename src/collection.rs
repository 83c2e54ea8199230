// houndb - collection.rs
// One named collection: schema + record store + HNSW index behind one lock.
//
// Every mutation holds the write lock for the whole store-and-index update of
// a record, so readers see a record in both or in neither. Lock waits are
// bounded: a timeout surfaces as `HoundError::Busy`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::embedding::{Embedder, Metric};
use crate::filter::{Filter, Predicate};
use crate::index::{HnswIndex, HnswParams, IndexStats};
use crate::planner::{self, PlannerDefaults, QueryHit, QueryRequest};
use crate::record::{BlobRef, NewRecord, Record, RecordId};
use crate::schema::{Attribute, Schema};
use crate::store::{sync_dir, CompactReport, RecordStore};
use crate::{HoundError, Result};

pub const MANIFEST_FILE: &str = "collection.json";
pub const SNAPSHOT_FILE: &str = "index.snap";

// ── Types ─────────────────────────────────────────────────────────────────────

/// Lifecycle: `Created → Populated → (Populated | Emptied) → Dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CollectionStatus {
    Created,
    Populated,
    Emptied,
    Dropped,
}

/// Persisted, immutable-after-create description of a collection
/// (only `schema` may grow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub name: String,
    pub vector_dim: usize,
    pub metric: Metric,
    pub schema: Schema,
    pub hnsw: HnswParams,
}

impl Manifest {
    fn load(dir: &Path) -> Result<Self> {
        let bytes = fs::read(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(self)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir)?;
        Ok(())
    }
}

/// Per-record failure inside [`Collection::insert_many`].
#[derive(Debug)]
pub struct BatchFailure {
    /// Position of the record in the submitted batch
    pub index: usize,
    pub error: HoundError,
}

/// Result of a batch insert. Records not listed in `failed` are committed.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub inserted: Vec<RecordId>,
    pub failed: Vec<BatchFailure>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub name: String,
    pub status: CollectionStatus,
    pub records: usize,
    pub blobs: usize,
    pub vector_dim: usize,
    pub metric: Metric,
    pub attributes: usize,
    pub index: IndexStats,
}

// ── State ─────────────────────────────────────────────────────────────────────

struct CollectionState {
    schema: Schema,
    store: RecordStore,
    index: HnswIndex,
    status: CollectionStatus,
    /// Mutated since the last index snapshot
    dirty: bool,
}

impl CollectionState {
    fn insert_one(&mut self, vector_dim: usize, new: NewRecord) -> Result<RecordId> {
        if new.vector.len() != vector_dim {
            return Err(HoundError::DimensionMismatch {
                expected: vector_dim,
                got: new.vector.len(),
            });
        }
        if new.vector.iter().any(|x| !x.is_finite()) {
            return Err(HoundError::schema("vector", "components must be finite"));
        }
        let blobs = self.store.blobs();
        self.schema
            .validate(&new.properties, |b| blobs.contains(b))?;

        let blob = new
            .blob
            .as_deref()
            .map(|bytes| self.store.put_blob(bytes))
            .transpose()?;
        let record = Record {
            id: RecordId::generate(),
            properties: new.properties,
            vector: new.vector,
            blob: blob.clone(),
        };
        let id = record.id;

        if let Err(e) = self.store.put(&self.schema, record) {
            if let Some(blob) = &blob {
                self.store.discard_blob(blob);
            }
            return Err(e);
        }
        let vector = &self.store.get(&id)?.vector;
        if let Err(e) = self.index.insert(id, vector) {
            // Keep store and index in step.
            self.store.delete(&id)?;
            return Err(e);
        }

        self.status = CollectionStatus::Populated;
        self.dirty = true;
        Ok(id)
    }

    fn delete_one(&mut self, id: &RecordId) -> Result<bool> {
        if !self.store.delete(id)? {
            return Ok(false);
        }
        self.index.remove(id);
        if self.store.is_empty() {
            self.status = CollectionStatus::Emptied;
        }
        self.dirty = true;
        Ok(true)
    }

    fn save_snapshot(&mut self, dir: &Path) -> Result<()> {
        self.index
            .save_snapshot(&dir.join(SNAPSHOT_FILE), self.store.seq())?;
        self.dirty = false;
        Ok(())
    }
}

// ── Collection ────────────────────────────────────────────────────────────────

pub struct Collection {
    name: String,
    vector_dim: usize,
    metric: Metric,
    dir: Option<PathBuf>,
    lock_timeout: Duration,
    defaults: PlannerDefaults,
    state: RwLock<CollectionState>,
}

impl Collection {
    /// Create a brand-new collection, persisting its manifest under `dir`.
    pub(crate) fn create(
        manifest: Manifest,
        dir: Option<PathBuf>,
        lock_timeout: Duration,
        defaults: PlannerDefaults,
    ) -> Result<Self> {
        let store = match &dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                manifest.save(dir)?;
                RecordStore::open(dir)?
            }
            None => RecordStore::in_memory(),
        };
        let index = HnswIndex::new(manifest.vector_dim, manifest.metric, manifest.hnsw);

        Ok(Self::assemble(
            manifest,
            dir,
            lock_timeout,
            defaults,
            store,
            index,
            CollectionStatus::Created,
        ))
    }

    /// Reopen a persisted collection. The index comes from its snapshot when
    /// that is intact and current, otherwise it is rebuilt from the record log.
    pub(crate) fn open(dir: PathBuf, lock_timeout: Duration, defaults: PlannerDefaults) -> Result<Self> {
        let manifest = Manifest::load(&dir)?;
        let store = RecordStore::open(&dir)?;

        let index = match HnswIndex::load_snapshot(
            &dir.join(SNAPSHOT_FILE),
            manifest.vector_dim,
            manifest.metric,
            manifest.hnsw,
            store.seq(),
            store.scan(),
        ) {
            Some(index) => index,
            None => {
                log::info!(
                    "collection '{}': rebuilding index from {} records",
                    manifest.name,
                    store.len()
                );
                HnswIndex::rebuild(manifest.vector_dim, manifest.metric, manifest.hnsw, store.scan())?
            }
        };

        let status = if store.seq() == 0 {
            CollectionStatus::Created
        } else if store.is_empty() {
            CollectionStatus::Emptied
        } else {
            CollectionStatus::Populated
        };

        let collection = Self::assemble(manifest, Some(dir), lock_timeout, defaults, store, index, status);
        log::info!(
            "collection '{}' opened ({} records)",
            collection.name,
            collection.state.read().store.len()
        );
        Ok(collection)
    }

    fn assemble(
        manifest: Manifest,
        dir: Option<PathBuf>,
        lock_timeout: Duration,
        defaults: PlannerDefaults,
        store: RecordStore,
        index: HnswIndex,
        status: CollectionStatus,
    ) -> Self {
        Self {
            name: manifest.name,
            vector_dim: manifest.vector_dim,
            metric: manifest.metric,
            dir,
            lock_timeout,
            defaults,
            state: RwLock::new(CollectionState {
                schema: manifest.schema,
                store,
                index,
                status,
                dirty: false,
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, CollectionState>> {
        let guard = self
            .state
            .try_read_for(self.lock_timeout)
            .ok_or_else(|| HoundError::busy(format!("collection '{}'", self.name), self.lock_timeout))?;
        if guard.status == CollectionStatus::Dropped {
            return Err(HoundError::collection_not_found(&self.name));
        }
        Ok(guard)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, CollectionState>> {
        let guard = self
            .state
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| HoundError::busy(format!("collection '{}'", self.name), self.lock_timeout))?;
        if guard.status == CollectionStatus::Dropped {
            return Err(HoundError::collection_not_found(&self.name));
        }
        Ok(guard)
    }

    fn manifest(&self, state: &CollectionState) -> Manifest {
        Manifest {
            name: self.name.clone(),
            vector_dim: self.vector_dim,
            metric: self.metric,
            schema: state.schema.clone(),
            hnsw: *state.index.params(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vector_dim(&self) -> usize {
        self.vector_dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn schema(&self) -> Result<Schema> {
        Ok(self.read()?.schema.clone())
    }

    pub fn status(&self) -> Result<CollectionStatus> {
        match self.state.try_read_for(self.lock_timeout) {
            Some(state) => Ok(state.status),
            None => Err(HoundError::busy(format!("collection '{}'", self.name), self.lock_timeout)),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.store.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    /// Validate, store and index one record.
    ///
    /// # Errors
    /// `DimensionMismatch`, `SchemaViolation`, `Busy`, or an I/O error; in
    /// every case nothing was committed.
    pub fn insert(&self, record: NewRecord) -> Result<RecordId> {
        let id = self.write()?.insert_one(self.vector_dim, record)?;
        log::debug!("collection '{}': inserted {}", self.name, id);
        Ok(id)
    }

    /// Insert records one atomic unit at a time.
    ///
    /// A failing record does not roll back the ones before it; failures are
    /// reported by position.
    pub fn insert_many(&self, records: Vec<NewRecord>) -> BatchResult {
        let mut result = BatchResult::default();
        for (index, record) in records.into_iter().enumerate() {
            match self.insert(record) {
                Ok(id) => result.inserted.push(id),
                Err(error) => {
                    log::debug!("collection '{}': batch item {} failed: {}", self.name, index, error);
                    result.failed.push(BatchFailure { index, error });
                }
            }
        }
        log::info!(
            "collection '{}': batch inserted {}, failed {}",
            self.name,
            result.inserted.len(),
            result.failed.len()
        );
        result
    }

    /// Delete one record. Deleting a missing id returns `false`.
    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        self.write()?.delete_one(id)
    }

    /// Delete every record matching `predicate`; returns how many went.
    pub fn delete_by_predicate(&self, predicate: Predicate) -> Result<usize> {
        let mut state = self.write()?;
        let filter = Filter::compile(&state.schema, predicate)?;
        let doomed: Vec<RecordId> = state
            .store
            .scan()
            .filter(|r| filter.matches(r))
            .map(|r| r.id)
            .collect();

        let mut deleted = 0;
        for id in &doomed {
            if state.delete_one(id)? {
                deleted += 1;
            }
        }
        log::info!("collection '{}': deleted {} records by predicate", self.name, deleted);
        Ok(deleted)
    }

    /// Add an optional attribute to the schema.
    pub fn add_attribute(&self, attribute: Attribute) -> Result<()> {
        let mut state = self.write()?;
        let mut schema = state.schema.clone();
        schema.add_attribute(attribute)?;

        if let Some(dir) = &self.dir {
            let mut manifest = self.manifest(&state);
            manifest.schema = schema.clone();
            manifest.save(dir)?;
        }
        state.schema = schema;
        log::info!("collection '{}': schema now has {} attributes", self.name, state.schema.len());
        Ok(())
    }

    /// Store a payload for use as a `Value::Blob` property.
    ///
    /// Blobs no live record references are removed by [`compact`](Self::compact).
    pub fn put_blob(&self, bytes: &[u8]) -> Result<BlobRef> {
        self.write()?.store.put_blob(bytes)
    }

    /// Compact the record log, drop unreferenced blobs, refresh the snapshot.
    pub fn compact(&self) -> Result<CompactReport> {
        let mut state = self.write()?;
        let report = state.store.compact()?;
        if let Some(dir) = &self.dir {
            state.save_snapshot(dir)?;
        }
        log::info!(
            "collection '{}': compacted log {} → {} bytes, {} blobs removed",
            self.name,
            report.bytes_before,
            report.bytes_after,
            report.blobs_removed
        );
        Ok(report)
    }

    /// Persist the index snapshot so the next open skips the rebuild.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let mut state = self.write()?;
        if state.dirty || !dir.join(SNAPSHOT_FILE).exists() {
            state.save_snapshot(dir)?;
        }
        Ok(())
    }

    /// Mark dropped and release memory. Later calls on any handle fail with
    /// `NotFound`.
    pub(crate) fn mark_dropped(&self) -> Result<()> {
        let mut state = self.write()?;
        let params = *state.index.params();
        state.status = CollectionStatus::Dropped;
        state.store = RecordStore::in_memory();
        state.index = HnswIndex::new(self.vector_dim, self.metric, params);
        state.dirty = false;
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &RecordId) -> Result<Record> {
        Ok(self.read()?.store.get(id)?.clone())
    }

    pub fn read_blob(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        self.read()?.store.blobs().read(blob)
    }

    /// Approximate k-NN query with optional filter; see [`QueryRequest`].
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<QueryHit>> {
        let state = self.read()?;
        planner::plan(&state.schema, &state.store, &state.index, self.defaults, request)
    }

    /// Embed `input` with `embedder` and query with the resulting vector.
    pub fn query_near(
        &self,
        embedder: &dyn Embedder,
        input: &[u8],
        k: usize,
        predicate: Option<Predicate>,
    ) -> Result<Vec<QueryHit>> {
        if embedder.dim() != self.vector_dim {
            return Err(HoundError::DimensionMismatch {
                expected: self.vector_dim,
                got: embedder.dim(),
            });
        }
        let mut request = QueryRequest::new(embedder.embed(input)?, k);
        request.predicate = predicate;
        self.query(&request)
    }

    /// Records matching `predicate` (all if `None`), in id order.
    pub fn fetch(&self, predicate: Option<Predicate>, limit: Option<usize>) -> Result<Vec<Record>> {
        let state = self.read()?;
        planner::scan(&state.schema, &state.store, predicate, limit)
    }

    /// Every record, in id order.
    pub fn records(&self) -> Result<Vec<Record>> {
        self.fetch(None, None)
    }

    pub fn stats(&self) -> Result<CollectionStats> {
        let state = self.read()?;
        Ok(CollectionStats {
            name: self.name.clone(),
            status: state.status,
            records: state.store.len(),
            blobs: state.store.blobs().len(),
            vector_dim: self.vector_dim,
            metric: self.metric,
            attributes: state.schema.len(),
            index: state.index.stats(),
        })
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        let Some(dir) = &self.dir else {
            return;
        };
        let state = self.state.get_mut();
        if state.status == CollectionStatus::Dropped || !state.dirty {
            return;
        }
        if let Err(e) = state.save_snapshot(dir) {
            log::warn!("collection '{}': could not save index snapshot: {}", self.name, e);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::schema::DataType;

    fn dog_manifest(dim: usize) -> Manifest {
        Manifest {
            name: "Dog".into(),
            vector_dim: dim,
            metric: Metric::Cosine,
            schema: Schema::new(vec![
                Attribute::new("breed", DataType::Text).required(),
                Attribute::new("weight", DataType::Number),
                Attribute::new("image", DataType::Blob),
            ])
            .unwrap(),
            hnsw: HnswParams::default().seeded(42),
        }
    }

    fn dogs(dim: usize) -> Collection {
        let manifest = dog_manifest(dim);
        let defaults = PlannerDefaults {
            overfetch_factor: 4,
            max_retries: 3,
        };
        Collection::create(manifest, None, Duration::from_millis(50), defaults).unwrap()
    }

    fn dog(breed: &str, weight: f64, vector: Vec<f32>) -> NewRecord {
        NewRecord::new(vector).with("breed", breed).with("weight", weight)
    }

    #[test]
    fn test_insert_then_get_is_exact() {
        let c = dogs(3);
        let id = c
            .insert(dog("Corgi", 26.0, vec![0.3, 0.4, 0.5]).with_blob(b"img".to_vec()))
            .unwrap();
        let rec = c.get(&id).unwrap();
        assert_eq!(rec.vector, vec![0.3, 0.4, 0.5]);
        assert_eq!(rec.properties["breed"], Value::Text("Corgi".into()));
        assert_eq!(c.read_blob(rec.blob.as_ref().unwrap()).unwrap(), b"img");
        assert_eq!(c.status().unwrap(), CollectionStatus::Populated);
    }

    #[test]
    fn test_status_lifecycle() {
        let c = dogs(2);
        assert_eq!(c.status().unwrap(), CollectionStatus::Created);
        let id = c.insert(dog("Corgi", 26.0, vec![1.0, 0.0])).unwrap();
        assert_eq!(c.status().unwrap(), CollectionStatus::Populated);
        assert!(c.delete(&id).unwrap());
        assert_eq!(c.status().unwrap(), CollectionStatus::Emptied);
        c.mark_dropped().unwrap();
        assert_eq!(c.status().unwrap(), CollectionStatus::Dropped);
        assert!(matches!(c.len(), Err(HoundError::NotFound { .. })));
    }

    #[test]
    fn test_failed_insert_leaves_no_trace() {
        let c = dogs(3);
        let bad = NewRecord::new(vec![1.0, 0.0, 0.0])
            .with("breed", "Corgi")
            .with("weight", "heavy")
            .with_blob(b"img".to_vec());
        let err = c.insert(bad).unwrap_err();
        assert!(matches!(err, HoundError::SchemaViolation { ref field, .. } if field == "weight"));

        let state = c.state.read();
        assert!(state.store.is_empty());
        assert!(state.index.is_empty());
        assert!(state.store.blobs().is_empty());
    }

    #[test]
    fn test_insert_many_reports_failures_by_position() {
        let c = dogs(2);
        let result = c.insert_many(vec![
            dog("Corgi", 26.0, vec![1.0, 0.0]),
            dog("Husky", 47.0, vec![1.0, 0.0, 0.0]),
            NewRecord::new(vec![0.0, 1.0]).with("weight", 10.0),
            dog("Rottweiler", 103.0, vec![0.0, 1.0]),
        ]);
        assert_eq!(result.inserted.len(), 2);
        let positions: Vec<usize> = result.failed.iter().map(|f| f.index).collect();
        assert_eq!(positions, vec![1, 2]);
        assert!(matches!(result.failed[0].error, HoundError::DimensionMismatch { .. }));
        assert!(matches!(result.failed[1].error, HoundError::SchemaViolation { .. }));
        assert_eq!(c.len().unwrap(), 2);
        assert!(!result.is_complete());
    }

    #[test]
    fn test_busy_instead_of_blocking() {
        let c = dogs(2);
        let _writer = c.state.write();
        assert!(matches!(
            c.insert(dog("Corgi", 26.0, vec![1.0, 0.0])),
            Err(HoundError::Busy { .. })
        ));
        assert!(matches!(
            c.query(&QueryRequest::new(vec![1.0, 0.0], 1)),
            Err(HoundError::Busy { .. })
        ));
    }

    #[test]
    fn test_delete_by_predicate_keeps_store_and_index_in_step() {
        let c = dogs(2);
        for (breed, w) in [("Corgi", 26.0), ("Husky", 47.0), ("Rottweiler", 103.0)] {
            c.insert(dog(breed, w, vec![w as f32, 1.0])).unwrap();
        }
        let gone = c
            .delete_by_predicate(Predicate::field("weight").greater_than(40.0))
            .unwrap();
        assert_eq!(gone, 2);
        let state = c.state.read();
        assert_eq!(state.store.len(), 1);
        assert_eq!(state.index.len(), 1);
        drop(state);

        assert!(matches!(
            c.delete_by_predicate(Predicate::field("color").equals("red")),
            Err(HoundError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_add_attribute_then_filter_on_it() {
        let c = dogs(2);
        c.add_attribute(Attribute::new("filepath", DataType::Text)).unwrap();
        c.insert(dog("Corgi", 26.0, vec![1.0, 0.0]).with("filepath", "Corgi.jpg"))
            .unwrap();
        let found = c
            .fetch(Some(Predicate::field("filepath").contains(".jpg")), None)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(c
            .add_attribute(Attribute::new("weight", DataType::Text))
            .is_err());
    }

    #[test]
    fn test_manifest_save_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = dog_manifest(2);
        manifest.save(dir.path()).unwrap();
        manifest.vector_dim = 7;
        manifest.save(dir.path()).unwrap();

        assert_eq!(Manifest::load(dir.path()).unwrap().vector_dim, 7);
        assert!(!dir.path().join(format!("{MANIFEST_FILE}.tmp")).exists());
    }

    struct ByteSum;

    impl Embedder for ByteSum {
        fn dim(&self) -> usize {
            2
        }

        fn embed(&self, input: &[u8]) -> Result<Vec<f32>> {
            let sum: u32 = input.iter().map(|b| *b as u32).sum();
            Ok(vec![sum as f32, 1.0])
        }
    }

    #[test]
    fn test_query_near_uses_embedder() {
        let c = dogs(2);
        let id = c.insert(dog("Corgi", 26.0, vec![3.0, 1.0])).unwrap();
        c.insert(dog("Husky", 47.0, vec![-1.0, 5.0])).unwrap();
        let hits = c.query_near(&ByteSum, &[1, 2], 1, None).unwrap();
        assert_eq!(hits[0].id, id);
    }
}
