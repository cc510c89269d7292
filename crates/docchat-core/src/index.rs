//! In-memory vector index with cosine k-NN search and MMR re-ranking.
//!
//! Stores `(vector, chunk)` records behind a `std::sync::RwLock`: batch
//! insertion takes the write lock and commits all-or-nothing, so a
//! concurrent search never observes a partially inserted batch. Search is
//! brute-force cosine similarity over all records, optionally restricted by
//! an exact-match metadata filter and optionally diversified with
//! maximal-marginal-relevance re-ranking.
//!
//! The first inserted batch establishes the index's dimension; every later
//! vector (including query vectors) must match it.
//!
//! The full record set can be exported with [`VectorIndex::snapshot`] and
//! rebuilt with [`VectorIndex::from_records`], which is all a persistence
//! layer needs to reconstruct the index without re-embedding.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::CoreError;
use crate::models::{Metadata, RetrievalResult, ScoredChunk};

/// Relevance/novelty trade-off for MMR re-ranking:
/// `λ·sim(query) − (1−λ)·max sim(selected)`.
const MMR_LAMBDA: f32 = 0.5;

/// Minimum MMR candidate pool size (the pool is `max(k × 4, 20)`).
const MMR_MIN_POOL: usize = 20;

/// One indexed embedding with the chunk it came from.
///
/// The chunk carries the text and metadata, so a serialized record sequence
/// preserves everything needed to rebuild the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub chunk: crate::models::Chunk,
}

/// Exact-match metadata predicate: a chunk matches when every key/value
/// pair in the filter equals the chunk's metadata entry.
pub type MetadataFilter = Metadata;

fn matches_filter(metadata: &Metadata, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

struct IndexInner {
    /// Established by the first insertion; `None` while empty.
    dims: Option<usize>,
    records: Vec<VectorRecord>,
}

/// Shared, thread-safe vector index.
pub struct VectorIndex {
    inner: RwLock<IndexInner>,
}

impl VectorIndex {
    pub fn new() -> Self {
        VectorIndex {
            inner: RwLock::new(IndexInner {
                dims: None,
                records: Vec::new(),
            }),
        }
    }

    /// Rebuild an index from a previously snapshotted record sequence.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the records do not share one dimensionality.
    pub fn from_records(records: Vec<VectorRecord>) -> Result<Self, CoreError> {
        let index = VectorIndex::new();
        index.insert(records)?;
        Ok(index)
    }

    /// Append a batch of records. Does not deduplicate.
    ///
    /// The whole batch is validated against the established dimension (or,
    /// for the first insertion, against the first record's dimension) before
    /// any record is stored: an error leaves the index unchanged.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if any vector's length differs from the index's
    /// dimension.
    pub fn insert(&self, records: Vec<VectorRecord>) -> Result<(), CoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().expect("index lock poisoned");
        let dims = inner.dims.unwrap_or(records[0].vector.len());
        for record in &records {
            if record.vector.len() != dims {
                return Err(CoreError::DimensionMismatch {
                    expected: dims,
                    actual: record.vector.len(),
                });
            }
        }

        inner.dims = Some(dims);
        inner.records.extend(records);
        Ok(())
    }

    /// Return the `k` records most similar to `query_vector` (cosine),
    /// highest first, ties broken by insertion order (earlier wins).
    ///
    /// With `filter`, only records whose chunk metadata matches every
    /// filter entry are considered. With `diversify`, the top candidates
    /// are re-ranked by maximal-marginal-relevance to trade relevance
    /// against novelty.
    ///
    /// An empty index (or one with no matching records) returns an empty
    /// result, never an error.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the query vector's length differs from the
    /// established index dimension.
    pub fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        diversify: bool,
    ) -> Result<RetrievalResult, CoreError> {
        let inner = self.inner.read().expect("index lock poisoned");

        let dims = match inner.dims {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        if query_vector.len() != dims {
            return Err(CoreError::DimensionMismatch {
                expected: dims,
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        // Candidate list keeps insertion order; the stable sort below then
        // guarantees earlier-inserted records win ties.
        let mut candidates: Vec<(usize, f32)> = inner
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                filter
                    .map(|f| matches_filter(&r.chunk.metadata, f))
                    .unwrap_or(true)
            })
            .map(|(i, r)| (i, cosine_similarity(query_vector, &r.vector)))
            .collect();

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let picked: Vec<(usize, f32)> = if diversify {
            mmr_select(&inner.records, candidates, k)
        } else {
            candidates.into_iter().take(k).collect()
        };

        Ok(picked
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: inner.records[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Number of records in the index.
    pub fn len(&self) -> usize {
        self.inner.read().expect("index lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The established dimension, if any record has been inserted.
    pub fn dims(&self) -> Option<usize> {
        self.inner.read().expect("index lock poisoned").dims
    }

    /// Clone out the full ordered record set for persistence.
    pub fn snapshot(&self) -> Vec<VectorRecord> {
        self.inner.read().expect("index lock poisoned").records.clone()
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Greedy MMR selection over score-sorted candidates.
///
/// Iteratively picks the candidate maximizing
/// `λ·sim(query) − (1−λ)·max_sim(already selected)`. Strict comparison
/// keeps the earlier candidate on ties, preserving the
/// relevance-then-insertion ordering of the input.
fn mmr_select(
    records: &[VectorRecord],
    candidates: Vec<(usize, f32)>,
    k: usize,
) -> Vec<(usize, f32)> {
    let pool_size = (k * 4).max(MMR_MIN_POOL).min(candidates.len());
    let mut pool: Vec<(usize, f32)> = candidates.into_iter().take(pool_size).collect();
    let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k.min(pool.len()));

    while selected.len() < k && !pool.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &(idx, query_sim)) in pool.iter().enumerate() {
            let max_selected_sim = selected
                .iter()
                .map(|&(sel_idx, _)| {
                    cosine_similarity(&records[idx].vector, &records[sel_idx].vector)
                })
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() {
                0.0
            } else {
                max_selected_sim
            };
            let mmr = MMR_LAMBDA * query_sim - (1.0 - MMR_LAMBDA) * redundancy;
            if mmr > best_score {
                best_score = mmr;
                best_pos = pos;
            }
        }
        selected.push(pool.remove(best_pos));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn record(text: &str, vector: Vec<f32>) -> VectorRecord {
        record_with_meta(text, vector, Metadata::new())
    }

    fn record_with_meta(text: &str, vector: Vec<f32>, metadata: Metadata) -> VectorRecord {
        VectorRecord {
            vector,
            chunk: Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: "d1".into(),
                chunk_index: 0,
                text: text.into(),
                hash: String::new(),
                metadata,
            },
        }
    }

    #[test]
    fn test_empty_index_returns_empty_result() {
        let index = VectorIndex::new();
        let result = index.search(&[1.0, 0.0], 5, None, false).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_first_insert_establishes_dimension() {
        let index = VectorIndex::new();
        assert_eq!(index.dims(), None);
        index.insert(vec![record("a", vec![1.0, 0.0, 0.0])]).unwrap();
        assert_eq!(index.dims(), Some(3));

        let err = index.insert(vec![record("b", vec![1.0, 0.0])]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_bad_batch_commits_nothing() {
        let index = VectorIndex::new();
        index.insert(vec![record("a", vec![1.0, 0.0])]).unwrap();
        let err = index
            .insert(vec![
                record("b", vec![0.0, 1.0]),
                record("c", vec![0.0, 1.0, 2.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_malformed_query_rejected() {
        let index = VectorIndex::new();
        index.insert(vec![record("a", vec![1.0, 0.0, 0.0])]).unwrap();
        let err = index.search(&[1.0, 0.0], 1, None, false).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_ranked_by_descending_similarity() {
        let index = VectorIndex::new();
        index
            .insert(vec![
                record("orthogonal", vec![0.0, 1.0]),
                record("exact", vec![1.0, 0.0]),
                record("diagonal", vec![1.0, 1.0]),
            ])
            .unwrap();

        let result = index.search(&[1.0, 0.0], 10, None, false).unwrap();
        let texts: Vec<&str> = result.iter().map(|s| s.chunk.text.as_str()).collect();
        assert_eq!(texts, ["exact", "diagonal", "orthogonal"]);
        assert!((result[0].score - 1.0).abs() < 1e-6);
        assert!(result.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_self_similarity_sits_first() {
        let index = VectorIndex::new();
        index
            .insert(vec![
                record("noise", vec![0.3, -0.2, 0.9]),
                record("target", vec![0.5, 0.5, 0.5]),
            ])
            .unwrap();
        let result = index.search(&[0.5, 0.5, 0.5], 2, None, false).unwrap();
        assert_eq!(result[0].chunk.text, "target");
        assert!((result[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_broken_by_insertion_order() {
        let index = VectorIndex::new();
        index
            .insert(vec![
                record("a", vec![1.0, 0.0, 0.0]),
                record("b", vec![1.0, 0.0, 0.0]),
            ])
            .unwrap();
        let result = index.search(&[1.0, 0.0, 0.0], 1, None, false).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk.text, "a");
        assert!((result[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let index = VectorIndex::new();
        index
            .insert(vec![
                record("a", vec![1.0, 0.0]),
                record("b", vec![0.0, 1.0]),
                record("c", vec![1.0, 1.0]),
            ])
            .unwrap();
        let result = index.search(&[1.0, 0.0], 50, None, false).unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_metadata_filter() {
        let index = VectorIndex::new();
        let mut page1 = Metadata::new();
        page1.insert("page".into(), serde_json::json!(1));
        let mut page2 = Metadata::new();
        page2.insert("page".into(), serde_json::json!(2));

        index
            .insert(vec![
                record_with_meta("on page one", vec![1.0, 0.0], page1.clone()),
                record_with_meta("on page two", vec![1.0, 0.0], page2),
            ])
            .unwrap();

        let result = index.search(&[1.0, 0.0], 10, Some(&page1), false).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk.text, "on page one");

        let mut nothing = Metadata::new();
        nothing.insert("page".into(), serde_json::json!(9));
        let result = index.search(&[1.0, 0.0], 10, Some(&nothing), false).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_mmr_prefers_novelty_over_near_duplicates() {
        let index = VectorIndex::new();
        index
            .insert(vec![
                record("dup-1", vec![1.0, 0.9]),
                record("dup-2", vec![1.0, 0.89]),
                record("novel", vec![-0.5, 1.0]),
            ])
            .unwrap();

        let plain = index.search(&[1.0, 1.0], 2, None, false).unwrap();
        let plain_texts: Vec<&str> = plain.iter().map(|s| s.chunk.text.as_str()).collect();
        assert_eq!(plain_texts, ["dup-1", "dup-2"]);

        let diverse = index.search(&[1.0, 1.0], 2, None, true).unwrap();
        let diverse_texts: Vec<&str> = diverse.iter().map(|s| s.chunk.text.as_str()).collect();
        assert_eq!(diverse_texts, ["dup-1", "novel"]);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let index = VectorIndex::new();
        index
            .insert(vec![
                record("a", vec![1.0, 0.0]),
                record("b", vec![0.0, 1.0]),
            ])
            .unwrap();

        let records = index.snapshot();
        let restored = VectorIndex::from_records(records).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.dims(), Some(2));
        let result = restored.search(&[0.0, 1.0], 1, None, false).unwrap();
        assert_eq!(result[0].chunk.text, "b");
    }
}
