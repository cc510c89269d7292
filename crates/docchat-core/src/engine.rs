//! RAG orchestration: ingest, retrieve, prompt, generate.
//!
//! [`RagEngine`] owns the vector index, the conversation store, and the
//! document registry, and composes them with the embedding and generation
//! capabilities. It is an explicit pipeline (retrieve, then prompt, then
//! generate) rather than a prebuilt chain abstraction, and it is
//! constructed once at startup and shared by the serving layer.
//!
//! Two answer paths exist:
//!
//! - **Stateless Q&A** ([`RagEngine::answer_question`]): embed the question,
//!   retrieve top-k chunks, build a prompt, generate once.
//! - **Conversational** ([`RagEngine::converse`]): same, plus bounded
//!   session history in the prompt; the exchange is appended to the session
//!   only after generation succeeds.
//!
//! Prompts keep retrieved context and conversation history in separately
//! labeled sections so the model does not conflate sourced facts with prior
//! conversational claims. A request that fails at any point mutates
//! nothing: a failed `converse` never appends a turn, a failed ingest never
//! registers a document.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::chunk::{self, chunk_text};
use crate::conversation::ConversationStore;
use crate::embedding::Embedder;
use crate::error::CoreError;
use crate::generation::Generator;
use crate::index::{MetadataFilter, VectorIndex, VectorRecord};
use crate::models::{
    AnswerResponse, DocumentInfo, EngineStats, Metadata, RetrievalResult, SourceCitation, Turn,
};
use crate::retriever::{RetrievalPolicy, Retriever};

/// Instruction prefixed to every prompt.
const INSTRUCTION: &str = "You are an assistant answering questions about uploaded documents. \
Answer using only the retrieved context below. If the context does not contain the answer, \
say you do not know instead of inventing one. Cite sources by their markers when relevant.";

/// Engine-level tuning, fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum chunk size in characters.
    pub chunk_max_chars: usize,
    /// Overlap between adjacent chunks, in characters.
    pub chunk_overlap_chars: usize,
    /// Default retrieval policy; `k` can be overridden per request.
    pub retrieval: RetrievalPolicy,
    /// Per-session conversation retention bound.
    pub max_history_turns: usize,
    /// Citation snippet length in characters.
    pub snippet_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chunk_max_chars: 1000,
            chunk_overlap_chars: 200,
            retrieval: RetrievalPolicy::default(),
            max_history_turns: 8,
            snippet_chars: 240,
        }
    }
}

/// The retrieval-and-answer pipeline, shared by the serving layer.
pub struct RagEngine {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    index: Arc<VectorIndex>,
    retriever: Retriever,
    conversations: ConversationStore,
    documents: RwLock<Vec<DocumentInfo>>,
    /// Document ids with an ingestion in progress. Reserving an id here
    /// before embedding keeps two concurrent ingests of the same id from
    /// both passing the duplicate check across the await point.
    in_flight: Mutex<HashSet<String>>,
}

impl RagEngine {
    /// Build an engine around the given capabilities.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if the chunking parameters are out of range.
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, CoreError> {
        chunk::validate_params(config.chunk_max_chars, config.chunk_overlap_chars)?;
        let max_history_turns = config.max_history_turns;
        let index = Arc::new(VectorIndex::new());
        let retriever = Retriever::new(Arc::clone(&index), config.retrieval.clone());
        Ok(RagEngine {
            config,
            embedder,
            generator,
            index,
            retriever,
            conversations: ConversationStore::new(max_history_turns),
            documents: RwLock::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// The shared index, e.g. for snapshotting.
    pub fn index(&self) -> Arc<VectorIndex> {
        Arc::clone(&self.index)
    }

    /// Registry of ingested documents, in ingestion order.
    pub fn documents(&self) -> Vec<DocumentInfo> {
        self.documents.read().expect("registry lock poisoned").clone()
    }

    /// Chunk, embed, and index one document's text. Returns the number of
    /// chunks stored.
    ///
    /// The document is registered only after every chunk is embedded and
    /// the whole batch is committed to the index; a failure along the way
    /// leaves no trace.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` if `document_id` was already ingested
    ///   (documents are immutable once created).
    /// - `Provider` if embedding any chunk fails.
    /// - `DimensionMismatch` if the embedder's output conflicts with the
    ///   index.
    pub async fn ingest_document(
        &self,
        document_id: &str,
        raw_text: &str,
        metadata: &Metadata,
    ) -> Result<usize, CoreError> {
        // Held across the embedding await; released on every exit path so a
        // failed ingest can be retried under the same id.
        let _reservation = self.reserve_document(document_id)?;

        let chunks = chunk_text(
            document_id,
            raw_text,
            self.config.chunk_max_chars,
            self.config.chunk_overlap_chars,
            metadata,
        )?;

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.embedder.embed(&chunk.text).await?;
            records.push(VectorRecord { vector, chunk });
        }

        let stored = records.len();
        self.index.insert(records)?;

        let filename = metadata
            .get("filename")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        self.documents
            .write()
            .expect("registry lock poisoned")
            .push(DocumentInfo {
                id: document_id.to_string(),
                filename,
                uploaded_at: Utc::now(),
                chunk_count: stored,
            });

        info!(document_id, chunks = stored, "document ingested");
        Ok(stored)
    }

    /// Claim `document_id` for the duration of one ingestion.
    ///
    /// The id is rejected if it is already registered or currently being
    /// ingested by another task. The registry check happens while the
    /// in-flight lock is held, and a winning ingest releases its claim only
    /// after pushing to the registry, so no interleaving lets two calls
    /// commit the same id.
    fn reserve_document(&self, document_id: &str) -> Result<IngestClaim<'_>, CoreError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        let registered = self
            .documents
            .read()
            .expect("registry lock poisoned")
            .iter()
            .any(|d| d.id == document_id);
        if registered || !in_flight.insert(document_id.to_string()) {
            return Err(CoreError::InvalidConfiguration(format!(
                "document '{}' already ingested",
                document_id
            )));
        }
        Ok(IngestClaim {
            in_flight: &self.in_flight,
            id: document_id.to_string(),
        })
    }

    /// Embed a question and retrieve relevant chunks without generating an
    /// answer. `k` falls back to the configured policy when `None`.
    pub async fn retrieve(
        &self,
        question: &str,
        k: Option<usize>,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult, CoreError> {
        let query_vector = self.embedder.embed(question).await?;
        let hits = self.retriever.retrieve_with(&query_vector, k, filter)?;
        debug!(hits = hits.len(), "retrieval complete");
        Ok(hits)
    }

    /// Stateless Q&A: retrieve, prompt, generate, cite.
    ///
    /// When retrieval returns zero chunks the model is still invoked and
    /// the response is flagged `no_context`; the caller decides whether
    /// that is an error.
    ///
    /// # Errors
    ///
    /// `Provider` if embedding the question fails; `GenerationFailed` if
    /// the generative call fails. Neither leaves any state modified.
    pub async fn answer_question(
        &self,
        question: &str,
        k: Option<usize>,
        filter: Option<&MetadataFilter>,
    ) -> Result<AnswerResponse, CoreError> {
        let hits = self.retrieve(question, k, filter).await?;
        let prompt = self.build_prompt(question, &hits, &[]);
        let answer = self.generate(&prompt).await?;

        Ok(self.package(answer, hits, None))
    }

    /// Conversational answer for `session_id`.
    ///
    /// The session's bounded history is folded into the prompt; the new
    /// exchange is appended only after generation succeeds, so a failed
    /// call leaves the session's turn count unchanged.
    pub async fn converse(
        &self,
        session_id: &str,
        message: &str,
        k: Option<usize>,
    ) -> Result<AnswerResponse, CoreError> {
        let hits = self.retrieve(message, k, None).await?;
        let history = self.conversations.history(session_id);
        let prompt = self.build_prompt(message, &hits, &history);
        let answer = self.generate(&prompt).await?;

        self.conversations.append(session_id, message, &answer);
        Ok(self.package(answer, hits, Some(session_id.to_string())))
    }

    /// Ordered history for a session; empty for unknown sessions.
    pub fn session_history(&self, session_id: &str) -> Vec<Turn> {
        self.conversations.history(session_id)
    }

    /// Drop one session's history. Absent sessions are a no-op.
    pub fn clear_session(&self, session_id: &str) {
        self.conversations.clear(session_id);
    }

    /// Reset every session.
    pub fn clear_all_sessions(&self) {
        self.conversations.clear_all();
    }

    /// Engine-wide counters for the serving layer.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            document_count: self.documents.read().expect("registry lock poisoned").len(),
            chunk_count: self.index.len(),
            session_count: self.conversations.session_count(),
        }
    }

    /// Load a previously snapshotted record set and document registry,
    /// e.g. at startup. Intended for an empty engine.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the records are not of one dimensionality.
    pub fn import_snapshot(
        &self,
        records: Vec<VectorRecord>,
        documents: Vec<DocumentInfo>,
    ) -> Result<(), CoreError> {
        self.index.insert(records)?;
        self.documents
            .write()
            .expect("registry lock poisoned")
            .extend(documents);
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        match self.generator.generate(prompt).await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                warn!(error = %err, "generation failed");
                Err(CoreError::GenerationFailed(Box::new(err)))
            }
        }
    }

    fn package(
        &self,
        answer: String,
        hits: RetrievalResult,
        session_id: Option<String>,
    ) -> AnswerResponse {
        let no_context = hits.is_empty();
        let sources = hits
            .iter()
            .map(|hit| SourceCitation::from_chunk(&hit.chunk, self.config.snippet_chars))
            .collect();
        AnswerResponse {
            answer,
            sources,
            session_id,
            no_context,
        }
    }

    /// Assemble the prompt with labeled, clearly delimited sections.
    fn build_prompt(&self, question: &str, hits: &RetrievalResult, history: &[Turn]) -> String {
        let mut prompt = String::from(INSTRUCTION);
        prompt.push_str("\n\n## Retrieved context\n");
        if hits.is_empty() {
            prompt.push_str("(no supporting context found)\n");
        } else {
            for hit in hits {
                prompt.push_str(&format!(
                    "[source {} chunk {}]\n{}\n\n",
                    hit.chunk.document_id, hit.chunk.chunk_index, hit.chunk.text
                ));
            }
        }

        if !history.is_empty() {
            prompt.push_str("\n## Conversation so far\n");
            for turn in history {
                prompt.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
            }
        }

        prompt.push_str("\n## Question\n");
        prompt.push_str(question);
        prompt.push_str("\n\nAnswer:");
        prompt
    }
}

/// Exclusive claim on a document id while its ingestion runs. Dropping the
/// claim releases the id.
struct IngestClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for IngestClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder: counts topic keywords so related texts get
    /// similar directions.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword-test"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
            let lower = text.to_lowercase();
            let rust = lower.matches("rust").count() as f32;
            let python = lower.matches("python").count() as f32;
            Ok(vec![rust, python, 0.1])
        }
    }

    /// Embedder that yields to the scheduler before returning, so two
    /// in-flight ingests interleave across the embedding await point.
    struct YieldingEmbedder;

    #[async_trait]
    impl Embedder for YieldingEmbedder {
        fn model_name(&self) -> &str {
            "yielding-test"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            tokio::task::yield_now().await;
            Ok(vec![1.0, 0.0])
        }
    }

    /// Embedder that always fails, for atomicity tests.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            Err(CoreError::provider(
                crate::error::Capability::Embedding,
                "connection refused",
                true,
            ))
        }
    }

    /// Generator that echoes a canned answer and counts invocations.
    struct CannedGenerator {
        calls: AtomicUsize,
    }

    impl CannedGenerator {
        fn new() -> Self {
            CannedGenerator {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for CannedGenerator {
        fn model_name(&self) -> &str {
            "canned-test"
        }
        async fn generate(&self, _prompt: &str) -> Result<String, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("canned answer".to_string())
        }
    }

    /// Generator that always fails.
    struct BrokenGenerator;

    #[async_trait]
    impl Generator for BrokenGenerator {
        fn model_name(&self) -> &str {
            "broken"
        }
        async fn generate(&self, _prompt: &str) -> Result<String, CoreError> {
            Err(CoreError::provider(
                crate::error::Capability::Generation,
                "quota exceeded",
                true,
            ))
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            chunk_max_chars: 80,
            chunk_overlap_chars: 16,
            ..EngineConfig::default()
        }
    }

    fn engine_with(generator: Arc<dyn Generator>) -> RagEngine {
        RagEngine::new(small_config(), Arc::new(KeywordEmbedder), generator).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_then_answer_with_citations() {
        let engine = engine_with(Arc::new(CannedGenerator::new()));
        let stored = engine
            .ingest_document(
                "doc-1",
                "Rust is a systems language focused on safety. \
                 Python is a dynamic language popular for scripting.",
                &Metadata::new(),
            )
            .await
            .unwrap();
        assert!(stored >= 1);

        let response = engine
            .answer_question("tell me about rust", None, None)
            .await
            .unwrap();
        assert_eq!(response.answer, "canned answer");
        assert!(!response.no_context);
        assert!(!response.sources.is_empty());
        assert_eq!(response.sources[0].document_id, "doc-1");
        assert!(response.session_id.is_none());
    }

    #[tokio::test]
    async fn test_empty_index_flags_no_context_but_still_generates() {
        let generator = Arc::new(CannedGenerator::new());
        let engine = engine_with(generator.clone());

        let response = engine.answer_question("anything", None, None).await.unwrap();
        assert!(response.no_context);
        assert!(response.sources.is_empty());
        assert_eq!(response.answer, "canned answer");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_converse_appends_history_and_tags_session() {
        let engine = engine_with(Arc::new(CannedGenerator::new()));
        engine
            .ingest_document("doc-1", "Rust has ownership and borrowing.", &Metadata::new())
            .await
            .unwrap();

        let response = engine.converse("s-1", "what is rust", None).await.unwrap();
        assert_eq!(response.session_id.as_deref(), Some("s-1"));

        let history = engine.session_history("s-1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "what is rust");
        assert_eq!(history[0].answer, "canned answer");

        engine.converse("s-1", "and ownership?", None).await.unwrap();
        assert_eq!(engine.session_history("s-1").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_generation_appends_nothing() {
        let engine = engine_with(Arc::new(BrokenGenerator));
        engine
            .ingest_document("doc-1", "Rust text for retrieval.", &Metadata::new())
            .await
            .unwrap();
        engine.conversations.append("s-1", "earlier q", "earlier a");

        let err = engine.converse("s-1", "boom", None).await.unwrap_err();
        assert!(matches!(err, CoreError::GenerationFailed(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.session_history("s-1").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_no_document() {
        let engine = RagEngine::new(
            small_config(),
            Arc::new(BrokenEmbedder),
            Arc::new(CannedGenerator::new()),
        )
        .unwrap();

        let err = engine
            .ingest_document("doc-1", "some text", &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));

        let stats = engine.stats();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.chunk_count, 0);

        // The failed ingest released its claim on the id: a retry fails on
        // the embedder again, not on a phantom duplicate.
        let err = engine
            .ingest_document("doc-1", "some text", &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_document_id_rejected() {
        let engine = engine_with(Arc::new(CannedGenerator::new()));
        engine
            .ingest_document("doc-1", "first rust text", &Metadata::new())
            .await
            .unwrap();
        let err = engine
            .ingest_document("doc-1", "second text", &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_ingest_commits_once() {
        let engine = Arc::new(
            RagEngine::new(
                small_config(),
                Arc::new(YieldingEmbedder),
                Arc::new(CannedGenerator::new()),
            )
            .unwrap(),
        );

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .ingest_document("doc-1", "text from the first caller", &Metadata::new())
                    .await
            }
        });
        let second = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .ingest_document("doc-1", "text from the second caller", &Metadata::new())
                    .await
            }
        });

        let first = first.await.unwrap();
        let second = second.await.unwrap();

        // Exactly one caller wins; the other sees the duplicate rejection.
        assert!(first.is_ok() != second.is_ok());
        let err = first.and(second).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));

        let stats = engine.stats();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(engine.documents().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let engine = engine_with(Arc::new(CannedGenerator::new()));
        engine
            .ingest_document("doc-1", "Rust rust rust, quite a lot of rust.", &Metadata::new())
            .await
            .unwrap();
        engine.converse("s-1", "rust?", None).await.unwrap();
        engine.converse("s-2", "python?", None).await.unwrap();

        let stats = engine.stats();
        assert_eq!(stats.document_count, 1);
        assert!(stats.chunk_count >= 1);
        assert_eq!(stats.session_count, 2);

        engine.clear_all_sessions();
        assert_eq!(engine.stats().session_count, 0);
    }

    #[tokio::test]
    async fn test_prompt_sections_are_labeled() {
        let engine = engine_with(Arc::new(CannedGenerator::new()));
        engine
            .ingest_document("doc-1", "Rust is fast.", &Metadata::new())
            .await
            .unwrap();

        let hits = engine.retrieve("rust", None, None).await.unwrap();
        let history = vec![Turn {
            question: "earlier?".into(),
            answer: "yes".into(),
            timestamp: Utc::now(),
        }];
        let prompt = engine.build_prompt("now?", &hits, &history);

        assert!(prompt.contains("## Retrieved context"));
        assert!(prompt.contains("## Conversation so far"));
        assert!(prompt.contains("## Question"));
        assert!(prompt.contains("[source doc-1 chunk 0]"));
        let ctx = prompt.find("## Retrieved context").unwrap();
        let hist = prompt.find("## Conversation so far").unwrap();
        let q = prompt.find("## Question").unwrap();
        assert!(ctx < hist && hist < q);
    }
}
