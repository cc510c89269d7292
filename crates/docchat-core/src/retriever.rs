//! Fixed-policy retrieval wrapper over a shared [`VectorIndex`].
//!
//! The retriever pins k, the metadata filter, and the diversification mode
//! at construction time; callers then only supply a query vector. It holds
//! no state beyond its configuration and is safe to share across
//! concurrent requests.

use std::sync::Arc;

use crate::error::CoreError;
use crate::index::{MetadataFilter, VectorIndex};
use crate::models::RetrievalResult;

/// Retrieval tuning fixed at construction.
#[derive(Debug, Clone)]
pub struct RetrievalPolicy {
    /// Number of chunks to return.
    pub k: usize,
    /// Optional exact-match metadata restriction.
    pub filter: Option<MetadataFilter>,
    /// Apply maximal-marginal-relevance re-ranking.
    pub diversify: bool,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        RetrievalPolicy {
            k: 4,
            filter: None,
            diversify: false,
        }
    }
}

/// Thin policy wrapper: `retrieve(question_vector)` with everything else
/// pre-configured.
pub struct Retriever {
    index: Arc<VectorIndex>,
    policy: RetrievalPolicy,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, policy: RetrievalPolicy) -> Self {
        Retriever { index, policy }
    }

    pub fn policy(&self) -> &RetrievalPolicy {
        &self.policy
    }

    /// Run the configured search against the shared index.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the query vector does not match the index.
    pub fn retrieve(&self, question_vector: &[f32]) -> Result<RetrievalResult, CoreError> {
        self.retrieve_with(question_vector, None, None)
    }

    /// Like [`Retriever::retrieve`], with per-request overrides for `k` and
    /// the metadata filter. `None` falls back to the policy.
    pub fn retrieve_with(
        &self,
        question_vector: &[f32],
        k: Option<usize>,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult, CoreError> {
        self.index.search(
            question_vector,
            k.unwrap_or(self.policy.k),
            filter.or(self.policy.filter.as_ref()),
            self.policy.diversify,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorRecord;
    use crate::models::{Chunk, Metadata};

    fn record(text: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            vector,
            chunk: Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: "d1".into(),
                chunk_index: 0,
                text: text.into(),
                hash: String::new(),
                metadata: Metadata::new(),
            },
        }
    }

    #[test]
    fn test_retriever_applies_fixed_k() {
        let index = Arc::new(VectorIndex::new());
        index
            .insert(vec![
                record("a", vec![1.0, 0.0]),
                record("b", vec![0.9, 0.1]),
                record("c", vec![0.0, 1.0]),
            ])
            .unwrap();

        let retriever = Retriever::new(
            index,
            RetrievalPolicy {
                k: 2,
                filter: None,
                diversify: false,
            },
        );
        let result = retriever.retrieve(&[1.0, 0.0]).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].chunk.text, "a");
    }

    #[test]
    fn test_retrieve_with_overrides_fall_back_to_policy() {
        let index = Arc::new(VectorIndex::new());
        index
            .insert(vec![
                record("a", vec![1.0, 0.0]),
                record("b", vec![0.9, 0.1]),
                record("c", vec![0.8, 0.2]),
            ])
            .unwrap();
        let retriever = Retriever::new(
            index,
            RetrievalPolicy {
                k: 1,
                filter: None,
                diversify: false,
            },
        );

        // No overrides: the policy's k applies.
        let result = retriever.retrieve_with(&[1.0, 0.0], None, None).unwrap();
        assert_eq!(result.len(), 1);

        // A per-request k wins over the policy.
        let result = retriever.retrieve_with(&[1.0, 0.0], Some(3), None).unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_retriever_shares_index() {
        let index = Arc::new(VectorIndex::new());
        let retriever = Retriever::new(Arc::clone(&index), RetrievalPolicy::default());

        // Records inserted after construction are visible.
        index.insert(vec![record("late", vec![1.0, 0.0])]).unwrap();
        let result = retriever.retrieve(&[1.0, 0.0]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk.text, "late");
    }
}
