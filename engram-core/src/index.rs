//! In-memory vector index — cosine similarity search over live embeddings.
//!
//! The index is keyed by [`MemoryId`] and is never persisted: it is fully
//! derivable from the `Present` rows of the durable store and is rebuilt
//! or reconciled at startup rather than saved.
//!
//! Small indexes are searched with an exact linear scan. Past the
//! configured threshold, an HNSW graph (via `instant-distance`) is built
//! lazily and reused until the next mutation invalidates it. The graph is
//! seeded deterministically so repeated searches over the same contents
//! return identical results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use instant_distance::{Builder, HnswMap, Point, Search};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::config::IndexConfig;
use crate::error::{EngramError, Result};
use crate::types::{Embedding, MemoryId};

// ---------------------------------------------------------------------------
// Point adapter
// ---------------------------------------------------------------------------

/// A unit-normalized vector, adapted to the `instant-distance` Point trait.
#[derive(Clone, Debug)]
struct IndexPoint {
    normalized: Vec<f32>,
}

impl IndexPoint {
    fn from_embedding(embedding: &Embedding) -> Self {
        let norm = embedding
            .0
            .iter()
            .map(|x| x * x)
            .sum::<f32>()
            .sqrt()
            .max(f32::EPSILON);
        Self {
            normalized: embedding.0.iter().map(|x| x / norm).collect(),
        }
    }
}

impl Point for IndexPoint {
    /// Cosine distance = 1 − cosine similarity. Vectors are pre-normalized
    /// so similarity is the plain dot product.
    fn distance(&self, other: &Self) -> f32 {
        if self.normalized.len() != other.normalized.len() {
            return 1.0;
        }
        let dot: f32 = self
            .normalized
            .iter()
            .zip(other.normalized.iter())
            .map(|(a, b)| a * b)
            .sum();
        (1.0 - dot).max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// A single search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matching entry's identifier.
    pub id: MemoryId,
    /// Cosine distance (0.0 = identical direction).
    pub distance: f32,
    /// Cosine similarity (`1.0 - distance`).
    pub similarity: f32,
}

struct IndexEntry {
    point: IndexPoint,
    created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// VectorIndex
// ---------------------------------------------------------------------------

/// Nearest-neighbor index over the embeddings of live `Present` entries.
pub struct VectorIndex {
    entries: HashMap<MemoryId, IndexEntry>,
    graph: Option<HnswMap<IndexPoint, MemoryId>>,
    config: IndexConfig,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("entries", &self.entries.len())
            .field("built", &self.graph.is_some())
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new(config: IndexConfig) -> Self {
        Self {
            entries: HashMap::new(),
            graph: None,
            config,
        }
    }

    /// Insert or replace the vector for `id`. Any previous vector for the
    /// same id is discarded, so an id can never hold two index entries.
    pub fn upsert(&mut self, id: MemoryId, vector: &Embedding, created_at: DateTime<Utc>) {
        self.entries.insert(
            id,
            IndexEntry {
                point: IndexPoint::from_embedding(vector),
                created_at,
            },
        );
        self.graph = None;
    }

    /// Remove the vector for `id`. No-op if absent. Returns whether an
    /// entry was removed.
    pub fn remove(&mut self, id: MemoryId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            self.graph = None;
        }
        removed
    }

    /// Whether the index holds a vector for `id`.
    #[must_use]
    pub fn contains(&self, id: MemoryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Every id currently indexed. Used by the recoverer for orphan
    /// detection, not by the search path.
    #[must_use]
    pub fn all_ids(&self) -> Vec<MemoryId> {
        self.entries.keys().copied().collect()
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a search at the current size would want the HNSW graph and
    /// it has not been built since the last mutation.
    #[must_use]
    pub fn needs_build(&self) -> bool {
        self.entries.len() > self.config.brute_force_threshold && self.graph.is_none()
    }

    /// Build the HNSW graph from the current entries. O(N log N); a no-op
    /// when the graph is already current or the index is small enough for
    /// exact scans.
    pub fn build(&mut self) {
        if !self.needs_build() {
            return;
        }
        let mut ids: Vec<MemoryId> = self.entries.keys().copied().collect();
        // Fixed insertion order + fixed seed → identical graphs for
        // identical contents.
        ids.sort();
        let points: Vec<IndexPoint> = ids.iter().map(|id| self.entries[id].point.clone()).collect();

        let builder = Builder::default()
            .ef_construction(self.config.ef_construction)
            .ef_search(self.config.ef_search)
            .seed(42);
        self.graph = Some(builder.build(points, ids));
        debug!(entries = self.entries.len(), "Built HNSW graph");
    }

    /// Search for the `k` nearest entries by cosine distance, ascending.
    /// Ties are broken by more-recent `created_at` first.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::InvalidArgument`] if `k` is zero.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(EngramError::InvalidArgument {
                reason: "search k must be positive".to_string(),
            });
        }

        let query_point = IndexPoint::from_embedding(query);
        let mut hits: Vec<SearchHit> = if let Some(graph) = &self.graph {
            let mut search = Search::default();
            graph
                .search(&query_point, &mut search)
                .take(k)
                .map(|item| SearchHit {
                    id: *item.value,
                    distance: item.distance,
                    similarity: 1.0 - item.distance,
                })
                .collect()
        } else {
            // Exact scan. Candidates are everything; ordering below trims.
            self.entries
                .iter()
                .map(|(id, entry)| {
                    let distance = query_point.distance(&entry.point);
                    SearchHit {
                        id: *id,
                        distance,
                        similarity: 1.0 - distance,
                    }
                })
                .collect()
        };

        hits.sort_by_key(|hit| {
            let created_at = self
                .entries
                .get(&hit.id)
                .map_or(DateTime::<Utc>::UNIX_EPOCH, |e| e.created_at);
            (
                OrderedFloat(hit.distance),
                std::cmp::Reverse(created_at),
                std::cmp::Reverse(hit.id),
            )
        });
        hits.truncate(k);
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> VectorIndex {
        VectorIndex::new(IndexConfig::default())
    }

    fn embedding(values: &[f32]) -> Embedding {
        Embedding(values.to_vec())
    }

    #[test]
    fn empty_index_returns_no_results() {
        let idx = index();
        let hits = idx.search(&embedding(&[1.0, 0.0, 0.0]), 5).expect("search");
        assert!(hits.is_empty());
    }

    #[test]
    fn zero_k_is_invalid() {
        let idx = index();
        let err = idx.search(&embedding(&[1.0, 0.0]), 0).expect_err("must fail");
        assert!(matches!(err, EngramError::InvalidArgument { .. }));
    }

    #[test]
    fn nearest_neighbor_ordering() {
        let mut idx = index();
        let near = MemoryId::new();
        let far = MemoryId::new();
        let orthogonal = MemoryId::new();
        let now = Utc::now();

        idx.upsert(near, &embedding(&[0.95, 0.05, 0.0]), now);
        idx.upsert(far, &embedding(&[-1.0, 0.0, 0.0]), now);
        idx.upsert(orthogonal, &embedding(&[0.0, 1.0, 0.0]), now);

        let hits = idx.search(&embedding(&[1.0, 0.0, 0.0]), 3).expect("search");
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, near);
        assert_eq!(hits[1].id, orthogonal);
        assert_eq!(hits[2].id, far);
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[1].distance <= hits[2].distance);
    }

    #[test]
    fn equal_distance_ties_break_to_most_recent() {
        let mut idx = index();
        let older = MemoryId::new();
        let newer = MemoryId::new();
        let base = Utc::now();

        // Identical vectors → identical distances.
        idx.upsert(older, &embedding(&[1.0, 0.0]), base);
        idx.upsert(
            newer,
            &embedding(&[1.0, 0.0]),
            base + chrono::Duration::seconds(10),
        );

        let hits = idx.search(&embedding(&[1.0, 0.0]), 2).expect("search");
        assert_eq!(hits[0].id, newer, "more recent entry wins the tie");
        assert_eq!(hits[1].id, older);
    }

    #[test]
    fn upsert_replaces_existing_vector() {
        let mut idx = index();
        let id = MemoryId::new();
        let now = Utc::now();

        idx.upsert(id, &embedding(&[1.0, 0.0]), now);
        idx.upsert(id, &embedding(&[0.0, 1.0]), now);
        assert_eq!(idx.len(), 1, "upsert must never duplicate an id");

        let hits = idx.search(&embedding(&[0.0, 1.0]), 1).expect("search");
        assert!(hits[0].distance < 0.001, "replaced vector should match");
    }

    #[test]
    fn remove_is_a_noop_when_absent() {
        let mut idx = index();
        let id = MemoryId::new();
        assert!(!idx.remove(id));

        idx.upsert(id, &embedding(&[1.0, 0.0]), Utc::now());
        assert!(idx.remove(id));
        assert!(!idx.contains(id));
        assert!(idx.is_empty());
    }

    #[test]
    fn search_is_deterministic_without_writes() {
        let mut idx = index();
        for i in 0..20u32 {
            let angle = (f64::from(i) / 20.0 * std::f64::consts::TAU) as f32;
            idx.upsert(
                MemoryId::new(),
                &embedding(&[angle.cos(), angle.sin(), 0.0]),
                Utc::now(),
            );
        }

        let query = embedding(&[0.7, 0.7, 0.0]);
        let first = idx.search(&query, 2).expect("search");
        let second = idx.search(&query, 2).expect("search");
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[1].id, second[1].id);
    }

    #[test]
    fn large_index_uses_graph_and_stays_sorted() {
        let mut idx = VectorIndex::new(IndexConfig {
            brute_force_threshold: 50,
            ..IndexConfig::default()
        });
        for i in 0..500u32 {
            let v1 = (f64::from(i) * 0.017).sin() as f32;
            let v2 = (f64::from(i) * 0.031).cos() as f32;
            let v3 = (f64::from(i) * 0.053).sin() as f32;
            idx.upsert(MemoryId::new(), &embedding(&[v1, v2, v3]), Utc::now());
        }

        assert!(idx.needs_build());
        idx.build();
        assert!(!idx.needs_build());

        let hits = idx.search(&embedding(&[0.5, 0.5, 0.5]), 10).expect("search");
        assert_eq!(hits.len(), 10);
        for window in hits.windows(2) {
            assert!(
                window[0].distance <= window[1].distance + 0.001,
                "results must be sorted by distance"
            );
        }
    }

    #[test]
    fn mutation_invalidates_graph() {
        let mut idx = VectorIndex::new(IndexConfig {
            brute_force_threshold: 5,
            ..IndexConfig::default()
        });
        for _ in 0..10 {
            idx.upsert(MemoryId::new(), &embedding(&[1.0, 0.0]), Utc::now());
        }
        idx.build();
        assert!(!idx.needs_build());

        idx.upsert(MemoryId::new(), &embedding(&[0.0, 1.0]), Utc::now());
        assert!(idx.needs_build(), "upsert must invalidate the built graph");
    }
}
