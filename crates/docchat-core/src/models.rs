//! Core data models for the retrieval-and-answer pipeline.
//!
//! These types flow between the chunker, the vector index, the conversation
//! store, and the orchestrator. They are plain serde-able values; ownership
//! of the mutable collections (index records, sessions, document registry)
//! lives with the components that manage them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to chunks (page numbers, filenames, tags).
pub type Metadata = Map<String, Value>;

/// A bounded text segment derived from a document, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier (UUID v4).
    pub id: String,
    /// Identifier of the owning document.
    pub document_id: String,
    /// Sequence index within the document, contiguous from 0.
    pub chunk_index: usize,
    /// The text content. Non-empty after cleaning.
    pub text: String,
    /// SHA-256 of the text content, for staleness detection.
    pub hash: String,
    /// Caller-supplied metadata, copied onto every chunk of the document.
    pub metadata: Metadata,
}

/// Registry entry for an ingested document.
///
/// Documents are immutable once created; the identifier stays stable for
/// the document's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    /// Original filename, when the caller supplied one in metadata.
    pub filename: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// One question/answer exchange within a conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Similarity in `[-1.0, 1.0]`, higher is closer.
    pub score: f32,
}

/// Ordered retrieval output, highest similarity first, length ≤ requested k.
pub type RetrievalResult = Vec<ScoredChunk>;

/// Provenance for a generated answer, derived from the chunks used.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCitation {
    pub document_id: String,
    pub chunk_index: usize,
    /// Leading excerpt of the chunk text.
    pub snippet: String,
    pub metadata: Metadata,
}

/// A generated answer plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    /// Citations in retrieval order.
    pub sources: Vec<SourceCitation>,
    /// Set for conversational answers, `None` for stateless Q&A.
    pub session_id: Option<String>,
    /// True when retrieval returned zero chunks and the answer was
    /// generated without supporting context.
    pub no_context: bool,
}

/// Engine-level counters exposed to the serving layer.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub session_count: usize,
}

impl SourceCitation {
    /// Build a citation from a retrieved chunk, truncating the snippet to
    /// `max_chars` characters.
    pub fn from_chunk(chunk: &Chunk, max_chars: usize) -> Self {
        SourceCitation {
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            snippet: chunk.text.chars().take(max_chars).collect(),
            metadata: chunk.metadata.clone(),
        }
    }
}
