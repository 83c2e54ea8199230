// houndb - planner.rs
// Query planning: ANN candidates → record lookup → filter → top-k.

use serde::Serialize;

use crate::filter::{Filter, Predicate};
use crate::index::HnswIndex;
use crate::record::{Properties, Record, RecordId};
use crate::schema::Schema;
use crate::store::RecordStore;
use crate::{HoundError, Result};

/// A k-NN query with an optional attribute filter.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub k: usize,
    pub predicate: Option<Predicate>,
    /// Candidates fetched per wanted hit when filtering (collection default if unset)
    pub overfetch_factor: Option<usize>,
    /// Level-0 beam width (index `ef_search` if unset)
    pub ef: Option<usize>,
    /// Widening retries when the filter leaves fewer than `k` (collection default if unset)
    pub max_retries: Option<usize>,
    /// Only return these properties
    pub return_properties: Option<Vec<String>>,
}

impl QueryRequest {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            ..Default::default()
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn overfetch(mut self, factor: usize) -> Self {
        self.overfetch_factor = Some(factor);
        self
    }

    pub fn ef(mut self, ef: usize) -> Self {
        self.ef = Some(ef);
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn return_properties<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.return_properties = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub id: RecordId,
    pub properties: Properties,
    /// Metric distance to the query (lower = closer)
    pub distance: f32,
    /// Similarity derived from `distance` (higher = better)
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PlannerDefaults {
    pub overfetch_factor: usize,
    pub max_retries: usize,
}

/// Run `request` against one consistent view of a collection.
///
/// Filtered queries over-fetch `k · overfetch` candidates and, if the filter
/// leaves fewer than `k`, double the fetch (and `ef`) up to `max_retries`
/// times. The result may then still be short; that is not an error, since
/// an approximate index gives no guarantee of surfacing every match.
pub(crate) fn plan(
    schema: &Schema,
    store: &RecordStore,
    index: &HnswIndex,
    defaults: PlannerDefaults,
    request: &QueryRequest,
) -> Result<Vec<QueryHit>> {
    if request.vector.len() != index.dim() {
        return Err(HoundError::DimensionMismatch {
            expected: index.dim(),
            got: request.vector.len(),
        });
    }
    let filter = request
        .predicate
        .clone()
        .map(|p| Filter::compile(schema, p))
        .transpose()?;

    let k = request.k;
    if k == 0 || index.is_empty() {
        return Ok(Vec::new());
    }

    let overfetch = match &filter {
        Some(_) => request
            .overfetch_factor
            .unwrap_or(defaults.overfetch_factor)
            .max(1),
        None => 1,
    };
    let max_retries = request.max_retries.unwrap_or(defaults.max_retries);
    let base_ef = request.ef.unwrap_or(index.params().ef_search);
    let metric = index.metric();

    let mut fetch = k.saturating_mul(overfetch).min(index.len());
    let mut attempt = 0;
    loop {
        let candidates = index.search(&request.vector, fetch, base_ef.max(fetch))?;

        let mut hits = Vec::with_capacity(k);
        for (id, distance) in candidates {
            let record = match store.get(&id) {
                Ok(record) => record,
                Err(_) => {
                    log::debug!("planner: index returned {id} with no stored record");
                    continue;
                }
            };
            if filter.as_ref().map(|f| f.matches(record)).unwrap_or(true) {
                hits.push(QueryHit {
                    id,
                    properties: project(record, request.return_properties.as_deref()),
                    distance,
                    score: metric.similarity(distance),
                });
                if hits.len() == k {
                    break;
                }
            }
        }

        if hits.len() >= k || fetch >= index.len() || attempt >= max_retries {
            log::debug!(
                "planner: {} hits for k={} after {} retries (fetch {})",
                hits.len(),
                k,
                attempt,
                fetch
            );
            return Ok(hits);
        }
        attempt += 1;
        fetch = fetch.saturating_mul(2).min(index.len());
    }
}

fn project(record: &Record, names: Option<&[String]>) -> Properties {
    match names {
        None => record.properties.clone(),
        Some(names) => record
            .properties
            .iter()
            .filter(|(name, _)| names.iter().any(|n| n == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}

/// Filtered scan without a query vector, in id order.
pub(crate) fn scan(
    schema: &Schema,
    store: &RecordStore,
    predicate: Option<Predicate>,
    limit: Option<usize>,
) -> Result<Vec<Record>> {
    let filter = predicate.map(|p| Filter::compile(schema, p)).transpose()?;
    let mut matched: Vec<&Record> = store
        .scan()
        .filter(|r| filter.as_ref().map(|f| f.matches(r)).unwrap_or(true))
        .collect();
    matched.sort_by_key(|r| r.id);
    Ok(matched
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
