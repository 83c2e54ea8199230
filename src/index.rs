// houndb - index.rs
// In-memory HNSW index: layered proximity graph, snapshot persistence.
//
// Insert: draw a level L, descend greedily from the entry point to L + 1,
// then on every level L..=0 run a beam search of width ef_construction,
// pick up to M neighbors with the diversity heuristic and link both ways.
//
// Search: greedy descent to level 1, beam search of width max(ef, k) on level
// 0. Results are APPROXIMATE. Recall grows with ef, ef_construction and M;
// callers pick ef for their recall/latency tradeoff. `exact_search` gives the
// brute-force answer for measuring recall.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::embedding::Metric;
use crate::record::{Record, RecordId};
use crate::{HoundError, Result};

/// (distance, id): orders by distance, then by id.
type Scored = (OrderedFloat<f32>, RecordId);

const SNAPSHOT_MAGIC: &[u8; 8] = b"HOUNDIDX";
const SNAPSHOT_VERSION: u32 = 1;
const MAX_LEVEL_CAP: usize = 32;

// ── Parameters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max neighbors per node on levels ≥ 1
    pub m: usize,
    /// Max neighbors per node on level 0
    pub m0: usize,
    /// Beam width while building
    pub ef_construction: usize,
    /// Default beam width while searching
    pub ef_search: usize,
    /// Level multiplier for random level assignment (1/ln(M))
    pub level_multiplier: f64,
    /// Fixed RNG seed for reproducible graphs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::with_m(16)
    }
}

impl HnswParams {
    pub fn with_m(m: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m0: m * 2,
            ef_construction: 200,
            ef_search: 64,
            level_multiplier: 1.0 / (m as f64).ln(),
            seed: None,
        }
    }

    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.m < 2 || self.m0 < self.m {
            return Err(HoundError::ConfigError(format!(
                "invalid HNSW degree: m={}, m0={}",
                self.m, self.m0
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(HoundError::ConfigError("ef values must be positive".into()));
        }
        if !(self.level_multiplier.is_finite() && self.level_multiplier > 0.0) {
            return Err(HoundError::ConfigError(format!(
                "invalid level multiplier {}",
                self.level_multiplier
            )));
        }
        Ok(())
    }

    /// Same graph shape; the seed is irrelevant once a graph exists.
    fn same_shape(&self, other: &HnswParams) -> bool {
        self.m == other.m
            && self.m0 == other.m0
            && self.ef_construction == other.ef_construction
            && self.level_multiplier == other.level_multiplier
    }
}

// ── Graph ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Node {
    /// Metric-prepared vector
    vector: Vec<f32>,
    /// Neighbor lists per level (level 0 = densest)
    layers: Vec<Vec<RecordId>>,
}

impl Node {
    fn level(&self) -> usize {
        self.layers.len() - 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub nodes: usize,
    pub max_level: usize,
    pub entry_point: Option<RecordId>,
    pub edges: usize,
}

pub struct HnswIndex {
    dim: usize,
    metric: Metric,
    params: HnswParams,
    nodes: HashMap<RecordId, Node>,
    entry_point: Option<RecordId>,
    max_level: usize,
    /// Number of nodes whose top level is `l`
    level_counts: Vec<usize>,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(dim: usize, metric: Metric, params: HnswParams) -> Self {
        let seed = params.seed.unwrap_or_else(rand::random);
        Self {
            dim,
            metric,
            params,
            nodes: HashMap::new(),
            entry_point: None,
            max_level: 0,
            level_counts: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Build a fresh index over `records`, in id order.
    pub fn rebuild<'a>(
        dim: usize,
        metric: Metric,
        params: HnswParams,
        records: impl Iterator<Item = &'a Record>,
    ) -> Result<Self> {
        let mut sorted: Vec<&Record> = records.collect();
        sorted.sort_by_key(|r| r.id);

        let mut index = Self::new(dim, metric, params);
        for record in sorted {
            index.insert(record.id, &record.vector)?;
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            nodes: self.nodes.len(),
            max_level: self.max_level,
            entry_point: self.entry_point,
            edges: self
                .nodes
                .values()
                .flat_map(|n| n.layers.iter())
                .map(Vec::len)
                .sum(),
        }
    }

    fn check_dim(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim {
            return Err(HoundError::DimensionMismatch {
                expected: self.dim,
                got: v.len(),
            });
        }
        Ok(())
    }

    fn capacity(&self, level: usize) -> usize {
        if level == 0 {
            self.params.m0
        } else {
            self.params.m
        }
    }

    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        let level = (-(1.0 - r).ln() * self.params.level_multiplier).floor() as usize;
        level.min(MAX_LEVEL_CAP)
    }

    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.metric.distance(a, b)
    }

    // ── Insert ────────────────────────────────────────────────────────────────

    /// Insert a vector under `id`. An existing node with the same id is replaced.
    ///
    /// # Errors
    /// `DimensionMismatch` if `vector.len()` differs from the index dimension.
    pub fn insert(&mut self, id: RecordId, vector: &[f32]) -> Result<()> {
        self.check_dim(vector)?;
        if self.nodes.contains_key(&id) {
            self.remove(&id);
        }

        let query = self.metric.prepare(vector);
        let level = self.random_level();
        if self.level_counts.len() <= level {
            self.level_counts.resize(level + 1, 0);
        }

        let entry = match self.entry_point {
            Some(entry) => entry,
            None => {
                self.nodes.insert(
                    id,
                    Node {
                        vector: query,
                        layers: vec![Vec::new(); level + 1],
                    },
                );
                self.level_counts[level] += 1;
                self.entry_point = Some(id);
                self.max_level = level;
                return Ok(());
            }
        };

        // Zoom in from the top level down to level + 1.
        let mut current = entry;
        for l in (level + 1..=self.max_level).rev() {
            current = self.greedy_closest(&query, current, l);
        }

        let mut layers = vec![Vec::new(); level + 1];
        let mut entry_points = vec![current];
        for l in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(&query, &entry_points, self.params.ef_construction, l);
            layers[l] = self.select_neighbors(&candidates, self.capacity(l));
            entry_points = candidates.iter().map(|&(_, c)| c).collect();
        }

        let links: Vec<(usize, RecordId)> = layers
            .iter()
            .enumerate()
            .flat_map(|(l, list)| list.iter().map(move |&n| (l, n)))
            .collect();
        self.nodes.insert(id, Node { vector: query, layers });
        self.level_counts[level] += 1;

        for (l, neighbor) in links {
            self.link(neighbor, id, l);
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
        Ok(())
    }

    /// Add edge `owner → target` on `level`, pruning `owner` if it overflows.
    fn link(&mut self, owner: RecordId, target: RecordId, level: usize) {
        let cap = self.capacity(level);
        let overflow = match self
            .nodes
            .get_mut(&owner)
            .and_then(|n| n.layers.get_mut(level))
        {
            Some(list) => {
                if !list.contains(&target) {
                    list.push(target);
                }
                list.len() > cap
            }
            None => false,
        };
        if overflow {
            self.prune(owner, level);
        }
    }

    /// Shrink `owner`'s list on `level` back to capacity with the heuristic.
    /// Stale ids are dropped along the way.
    fn prune(&mut self, owner: RecordId, level: usize) {
        let Some(node) = self.nodes.get(&owner) else {
            return;
        };
        let Some(list) = node.layers.get(level) else {
            return;
        };
        let mut scored: Vec<Scored> = list
            .iter()
            .filter_map(|n| {
                self.nodes
                    .get(n)
                    .map(|nn| (OrderedFloat(self.distance(&node.vector, &nn.vector)), *n))
            })
            .collect();
        scored.sort();

        let kept = self.select_neighbors(&scored, self.capacity(level));
        if let Some(list) = self
            .nodes
            .get_mut(&owner)
            .and_then(|n| n.layers.get_mut(level))
        {
            *list = kept;
        }
    }

    /// Diversity heuristic over candidates sorted by distance to the base.
    ///
    /// A candidate is kept only if it is not closer to an already kept
    /// neighbor than to the base; remaining slots are backfilled by distance.
    fn select_neighbors(&self, candidates: &[Scored], m: usize) -> Vec<RecordId> {
        let mut kept: Vec<RecordId> = Vec::with_capacity(m);

        for &(dist, cand) in candidates {
            if kept.len() >= m {
                break;
            }
            let Some(cand_node) = self.nodes.get(&cand) else {
                continue;
            };
            let diverse = kept.iter().all(|k| {
                self.nodes
                    .get(k)
                    .map(|kn| self.distance(&cand_node.vector, &kn.vector) >= dist.0)
                    .unwrap_or(true)
            });
            if diverse {
                kept.push(cand);
            }
        }

        if kept.len() < m {
            for &(_, cand) in candidates {
                if kept.len() >= m {
                    break;
                }
                if self.nodes.contains_key(&cand) && !kept.contains(&cand) {
                    kept.push(cand);
                }
            }
        }

        kept
    }

    // ── Search ────────────────────────────────────────────────────────────────

    fn greedy_closest(&self, query: &[f32], from: RecordId, level: usize) -> RecordId {
        self.search_layer(query, &[from], 1, level)
            .first()
            .map(|&(_, id)| id)
            .unwrap_or(from)
    }

    /// Beam search on one level. Returns up to `ef` hits sorted ascending.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[RecordId],
        ef: usize,
        level: usize,
    ) -> Vec<Scored> {
        let ef = ef.max(1);
        let mut visited: HashSet<RecordId> = HashSet::new();
        // Frontier: closest first
        let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();
        // Best ef so far: worst on top
        let mut results: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef + 1);

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            if let Some(node) = self.nodes.get(&ep) {
                let scored = (OrderedFloat(self.distance(query, &node.vector)), ep);
                candidates.push(Reverse(scored));
                results.push(scored);
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if let Some(worst) = results.peek() {
                if results.len() >= ef && current > *worst {
                    break;
                }
            }

            let Some(neighbors) = self.nodes.get(&current.1).and_then(|n| n.layers.get(level))
            else {
                continue;
            };

            for &nid in neighbors {
                if !visited.insert(nid) {
                    continue;
                }
                // Stale edge to a removed node
                let Some(node) = self.nodes.get(&nid) else {
                    continue;
                };
                let scored = (OrderedFloat(self.distance(query, &node.vector)), nid);
                let dominated = results.len() >= ef
                    && results.peek().map(|worst| scored >= *worst).unwrap_or(false);
                if dominated {
                    continue;
                }
                candidates.push(Reverse(scored));
                results.push(scored);
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Approximate k nearest neighbors of `query`.
    ///
    /// Returns up to `k` `(id, distance)` pairs, closest first, ties broken by
    /// smaller id. `ef` is the level-0 beam width (raised to `k` if smaller).
    /// The answer is approximate; use a larger `ef` for higher recall.
    ///
    /// # Errors
    /// `DimensionMismatch` if `query.len()` differs from the index dimension.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<(RecordId, f32)>> {
        self.check_dim(query)?;
        let entry = match self.entry_point {
            Some(entry) if k > 0 => entry,
            _ => return Ok(Vec::new()),
        };

        let q = self.metric.prepare(query);
        let mut current = entry;
        for l in (1..=self.max_level).rev() {
            current = self.greedy_closest(&q, current, l);
        }

        Ok(self
            .search_layer(&q, &[current], ef.max(k), 0)
            .into_iter()
            .take(k)
            .map(|(d, id)| (id, d.into_inner()))
            .collect())
    }

    /// Brute-force k nearest neighbors; the ground truth for recall checks.
    pub fn exact_search(&self, query: &[f32], k: usize) -> Result<Vec<(RecordId, f32)>> {
        self.check_dim(query)?;
        let q = self.metric.prepare(query);
        let mut scored: Vec<Scored> = self
            .nodes
            .iter()
            .map(|(id, node)| (OrderedFloat(self.distance(&q, &node.vector)), *id))
            .collect();
        scored.sort();
        scored.truncate(k);
        Ok(scored.into_iter().map(|(d, id)| (id, d.into_inner())).collect())
    }

    // ── Remove ────────────────────────────────────────────────────────────────

    /// Remove a node and repair its neighborhood. Returns `false` if absent.
    ///
    /// Work is bounded by the removed node's degree: each former neighbor
    /// drops the edge and, if left under half capacity, is reconnected from
    /// the removed node's other neighbors.
    pub fn remove(&mut self, id: &RecordId) -> bool {
        let Some(removed) = self.nodes.remove(id) else {
            return false;
        };
        self.level_counts[removed.level()] -= 1;

        for (level, former) in removed.layers.iter().enumerate() {
            for &neighbor in former {
                self.repair(neighbor, level, former);
            }
        }

        if self.entry_point == Some(*id) {
            self.demote_entry_point(&removed);
        }

        log::trace!("hnsw: removed {} (level {})", id, removed.level());
        true
    }

    fn repair(&mut self, owner: RecordId, level: usize, orphaned: &[RecordId]) {
        let Some(list) = self
            .nodes
            .get_mut(&owner)
            .and_then(|n| n.layers.get_mut(level))
        else {
            return;
        };
        let mut live = std::mem::take(list);
        live.retain(|n| self.nodes.contains_key(n));

        let min_degree = self.capacity(level) / 2;
        if live.len() >= min_degree {
            if let Some(list) = self
                .nodes
                .get_mut(&owner)
                .and_then(|n| n.layers.get_mut(level))
            {
                *list = live;
            }
            return;
        }

        let Some(owner_vec) = self.nodes.get(&owner).map(|n| n.vector.clone()) else {
            return;
        };
        let mut pool: Vec<RecordId> = live.clone();
        for &cand in orphaned {
            if cand != owner && !pool.contains(&cand) {
                pool.push(cand);
            }
        }
        let mut scored: Vec<Scored> = pool
            .iter()
            .filter_map(|c| {
                self.nodes
                    .get(c)
                    .filter(|n| n.level() >= level)
                    .map(|n| (OrderedFloat(self.distance(&owner_vec, &n.vector)), *c))
            })
            .collect();
        scored.sort();

        let kept = self.select_neighbors(&scored, self.capacity(level));
        let added: Vec<RecordId> = kept.iter().filter(|c| !live.contains(c)).copied().collect();
        if let Some(list) = self
            .nodes
            .get_mut(&owner)
            .and_then(|n| n.layers.get_mut(level))
        {
            *list = kept;
        }
        for target in added {
            self.link(target, owner, level);
        }
    }

    fn demote_entry_point(&mut self, removed: &Node) {
        while self.max_level > 0 && self.level_counts.get(self.max_level) == Some(&0) {
            self.max_level -= 1;
        }
        self.level_counts.truncate(self.max_level + 1);

        if self.nodes.is_empty() {
            self.entry_point = None;
            self.max_level = 0;
            self.level_counts.clear();
            return;
        }

        let top = self.max_level;
        let from_neighbors = removed
            .layers
            .get(top)
            .into_iter()
            .flatten()
            .filter(|n| self.nodes.get(*n).map(|nn| nn.level() == top).unwrap_or(false))
            .min()
            .copied();

        self.entry_point = from_neighbors.or_else(|| {
            self.nodes
                .iter()
                .filter(|(_, n)| n.level() == top)
                .map(|(id, _)| *id)
                .min()
        });
    }

    // ── Snapshot ──────────────────────────────────────────────────────────────

    /// Persist the graph (not the vectors) to `path` via temp file + rename.
    /// `log_seq` names the record-log position the graph reflects.
    pub fn save_snapshot(&self, path: &Path, log_seq: u64) -> Result<()> {
        let mut nodes: Vec<(RecordId, Vec<Vec<RecordId>>)> = self
            .nodes
            .iter()
            .map(|(id, n)| (*id, n.layers.clone()))
            .collect();
        nodes.sort_by_key(|(id, _)| *id);

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            dim: self.dim,
            metric: self.metric,
            params: self.params,
            log_seq,
            entry_point: self.entry_point,
            max_level: self.max_level,
            nodes,
        };
        let payload = bincode::serialize(&snapshot)?;

        let tmp = path.with_extension("snap.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a snapshot written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// Returns `None` (never an error) when the file is missing, corrupt,
    /// built with other parameters, or out of step with `records`; the
    /// caller then rebuilds from the record log.
    pub fn load_snapshot<'a>(
        path: &Path,
        dim: usize,
        metric: Metric,
        params: HnswParams,
        log_seq: u64,
        records: impl Iterator<Item = &'a Record>,
    ) -> Option<Self> {
        let mut bytes = Vec::new();
        File::open(path).ok()?.read_to_end(&mut bytes).ok()?;

        let snapshot = match decode_snapshot(&bytes) {
            Some(s) => s,
            None => {
                log::warn!("index snapshot {:?} is corrupt", path);
                return None;
            }
        };
        if snapshot.dim != dim || snapshot.metric != metric || !snapshot.params.same_shape(&params)
        {
            log::warn!("index snapshot {:?} was built with other settings", path);
            return None;
        }
        if snapshot.log_seq != log_seq {
            log::warn!(
                "index snapshot {:?} is stale (seq {} vs log {})",
                path,
                snapshot.log_seq,
                log_seq
            );
            return None;
        }

        let vectors: HashMap<RecordId, &Record> = records.map(|r| (r.id, r)).collect();
        if vectors.len() != snapshot.nodes.len() {
            log::warn!("index snapshot {:?} node count disagrees with store", path);
            return None;
        }

        let mut index = Self::new(dim, metric, params);
        for (id, layers) in snapshot.nodes {
            let record = vectors.get(&id)?;
            if layers.is_empty() || record.vector.len() != dim {
                return None;
            }
            let level = layers.len() - 1;
            if index.level_counts.len() <= level {
                index.level_counts.resize(level + 1, 0);
            }
            index.level_counts[level] += 1;
            index.nodes.insert(
                id,
                Node {
                    vector: metric.prepare(&record.vector),
                    layers,
                },
            );
        }

        match snapshot.entry_point {
            Some(ep) if index.nodes.get(&ep).map(|n| n.level()) == Some(snapshot.max_level) => {}
            None if index.nodes.is_empty() => {}
            _ => {
                log::warn!("index snapshot {:?} has an invalid entry point", path);
                return None;
            }
        }
        index.entry_point = snapshot.entry_point;
        index.max_level = snapshot.max_level;
        Some(index)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dim: usize,
    metric: Metric,
    params: HnswParams,
    log_seq: u64,
    entry_point: Option<RecordId>,
    max_level: usize,
    nodes: Vec<(RecordId, Vec<Vec<RecordId>>)>,
}

fn decode_snapshot(bytes: &[u8]) -> Option<Snapshot> {
    if bytes.len() < 12 || &bytes[..8] != SNAPSHOT_MAGIC {
        return None;
    }
    let crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload = &bytes[12..];
    if crc32fast::hash(payload) != crc {
        return None;
    }
    let snapshot: Snapshot = bincode::deserialize(payload).ok()?;
    (snapshot.version == SNAPSHOT_VERSION).then_some(snapshot)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Properties;

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect()
    }

    fn build(vectors: &[Vec<f32>], metric: Metric) -> (HnswIndex, Vec<RecordId>) {
        let dim = vectors[0].len();
        let mut idx = HnswIndex::new(dim, metric, HnswParams::with_m(8).seeded(7));
        let ids: Vec<RecordId> = vectors
            .iter()
            .map(|v| {
                let id = RecordId::generate();
                idx.insert(id, v).unwrap();
                id
            })
            .collect();
        (idx, ids)
    }

    fn recall(idx: &HnswIndex, queries: &[Vec<f32>], k: usize, ef: usize) -> f64 {
        let mut hits = 0usize;
        for q in queries {
            let truth: HashSet<RecordId> =
                idx.exact_search(q, k).unwrap().into_iter().map(|(id, _)| id).collect();
            hits += idx
                .search(q, k, ef)
                .unwrap()
                .into_iter()
                .filter(|(id, _)| truth.contains(id))
                .count();
        }
        hits as f64 / (queries.len() * k) as f64
    }

    #[test]
    fn test_hnsw_insert_search() {
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.9, 0.1, 0.0]];
        for metric in [Metric::Cosine, Metric::Euclidean] {
            let (idx, ids) = build(&vectors, metric);
            let top1 = idx.search(&[1.0, 0.0, 0.0], 1, 16).unwrap();
            assert_eq!(top1.len(), 1);
            assert_eq!(top1[0].0, ids[0]);

            let top2 = idx.search(&[1.0, 0.0, 0.0], 2, 16).unwrap();
            let got: Vec<RecordId> = top2.iter().map(|(id, _)| *id).collect();
            assert_eq!(got, vec![ids[0], ids[2]]);
        }
    }

    #[test]
    fn test_hnsw_empty_search() {
        let idx = HnswIndex::new(4, Metric::Cosine, HnswParams::default());
        let results = idx.search(&[1.0, 0.0, 0.0, 0.0], 5, 64).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut idx = HnswIndex::new(3, Metric::Cosine, HnswParams::default());
        let err = idx.insert(RecordId::generate(), &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, HoundError::DimensionMismatch { expected: 3, got: 2 }));
        let err = idx.search(&[1.0], 1, 10).unwrap_err();
        assert!(matches!(err, HoundError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let vectors = random_vectors(7, 4, 1);
        let (idx, _) = build(&vectors, Metric::Euclidean);
        assert_eq!(idx.search(&vectors[0], 50, 10).unwrap().len(), 7);
        assert!(idx.search(&vectors[0], 0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_results_sorted_and_ties_broken_by_id() {
        let mut idx = HnswIndex::new(2, Metric::Euclidean, HnswParams::default().seeded(3));
        let mut ids: Vec<RecordId> = (0..5).map(|_| RecordId::generate()).collect();
        for id in &ids {
            idx.insert(*id, &[1.0, 1.0]).unwrap();
        }
        ids.sort();
        let got: Vec<RecordId> = idx
            .search(&[1.0, 1.0], 5, 16)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(got, ids);

        let vectors = random_vectors(300, 8, 2);
        let (idx, _) = build(&vectors, Metric::Euclidean);
        let res = idx.search(&vectors[17], 25, 64).unwrap();
        assert!(res.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_recall_is_high() {
        let vectors = random_vectors(1_000, 16, 11);
        let (idx, _) = build(&vectors, Metric::Euclidean);
        let queries = random_vectors(30, 16, 99);
        let r = recall(&idx, &queries, 10, 100);
        assert!(r >= 0.9, "recall {r} below 0.9");
    }

    #[test]
    fn test_hnsw_remove() {
        let mut idx = HnswIndex::new(2, Metric::Cosine, HnswParams::default());
        let id = RecordId::generate();
        idx.insert(id, &[1.0, 0.0]).unwrap();
        assert!(idx.remove(&id));
        assert!(!idx.remove(&id));
        assert_eq!(idx.len(), 0);
        assert_eq!(idx.stats().entry_point, None);
        assert!(idx.search(&[1.0, 0.0], 3, 10).unwrap().is_empty());
    }

    #[test]
    fn test_remove_keeps_graph_searchable() {
        let vectors = random_vectors(600, 12, 5);
        let (mut idx, ids) = build(&vectors, Metric::Euclidean);

        // Remove every other node, including whichever holds the entry point.
        let entry = idx.stats().entry_point.unwrap();
        assert!(idx.remove(&entry));
        for id in ids.iter().step_by(2) {
            idx.remove(id);
        }

        let stats = idx.stats();
        let ep = stats.entry_point.unwrap();
        assert!(idx.contains(&ep));
        assert!(!idx.contains(&entry));

        let queries = random_vectors(20, 12, 77);
        let r = recall(&idx, &queries, 10, 100);
        assert!(r >= 0.85, "recall after removals {r}");
        for q in &queries {
            for (id, _) in idx.search(q, 10, 50).unwrap() {
                assert!(idx.contains(&id), "search returned a removed node");
            }
        }
    }

    #[test]
    fn test_remove_everything_then_reinsert() {
        let vectors = random_vectors(50, 4, 8);
        let (mut idx, ids) = build(&vectors, Metric::Cosine);
        for id in &ids {
            assert!(idx.remove(id));
        }
        assert!(idx.is_empty());
        assert_eq!(idx.stats().max_level, 0);

        let id = RecordId::generate();
        idx.insert(id, &vectors[0]).unwrap();
        assert_eq!(idx.search(&vectors[0], 1, 10).unwrap()[0].0, id);
    }

    fn as_records(ids: &[RecordId], vectors: &[Vec<f32>]) -> Vec<Record> {
        ids.iter()
            .zip(vectors)
            .map(|(id, v)| Record {
                id: *id,
                properties: Properties::new(),
                vector: v.clone(),
                blob: None,
            })
            .collect()
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snap");
        let vectors = random_vectors(200, 6, 21);
        let (idx, ids) = build(&vectors, Metric::Cosine);
        idx.save_snapshot(&path, 200).unwrap();

        let records = as_records(&ids, &vectors);
        let params = *idx.params();
        let loaded =
            HnswIndex::load_snapshot(&path, 6, Metric::Cosine, params, 200, records.iter()).unwrap();
        assert_eq!(loaded.stats(), idx.stats());
        for q in vectors.iter().take(10) {
            assert_eq!(loaded.search(q, 5, 32).unwrap(), idx.search(q, 5, 32).unwrap());
        }

        // Stale sequence or different settings are refused.
        assert!(HnswIndex::load_snapshot(&path, 6, Metric::Cosine, params, 201, records.iter())
            .is_none());
        assert!(
            HnswIndex::load_snapshot(&path, 6, Metric::Euclidean, params, 200, records.iter())
                .is_none()
        );
        assert!(HnswIndex::load_snapshot(&path, 6, Metric::Cosine, params, 200, records[1..].iter())
            .is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snap");
        let vectors = random_vectors(20, 3, 4);
        let (idx, ids) = build(&vectors, Metric::Euclidean);
        idx.save_snapshot(&path, 20).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x5A;
        fs::write(&path, bytes).unwrap();

        let records = as_records(&ids, &vectors);
        assert!(HnswIndex::load_snapshot(
            &path,
            3,
            Metric::Euclidean,
            *idx.params(),
            20,
            records.iter()
        )
        .is_none());
    }

    #[test]
    fn test_params_validate() {
        assert!(HnswParams::default().validate().is_ok());
        let mut p = HnswParams::default();
        p.ef_search = 0;
        assert!(p.validate().is_err());
        let mut p = HnswParams::default();
        p.m0 = 1;
        assert!(p.validate().is_err());
    }
}
