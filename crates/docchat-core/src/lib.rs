//! # docchat-core
//!
//! The retrieval-and-answer pipeline behind docchat: chunking, vector
//! indexing with similarity search, retrieval policy, conversation memory,
//! and RAG orchestration.
//!
//! This crate contains no tokio, network, or filesystem dependencies. The
//! two external capabilities it needs, embedding and generation, are
//! consumed through traits; concrete providers live in the `docchat`
//! application crate.
//!
//! ## Data flow
//!
//! ```text
//! write path: raw text ─▶ chunk ─▶ embed ─▶ VectorIndex
//! read path:  question ─▶ embed ─▶ Retriever ─▶ RagEngine ─▶ generate
//!                                        ▲             │
//!                                        │             ▼
//!                                 ConversationStore  answer + citations
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`chunk`] | Cleaning and overlapping chunking |
//! | [`embedding`] | Embedding capability trait + vector utilities |
//! | [`generation`] | Generation capability trait |
//! | [`index`] | In-memory vector index (cosine k-NN, MMR) |
//! | [`retriever`] | Fixed-policy retrieval wrapper |
//! | [`conversation`] | Bounded per-session history |
//! | [`engine`] | RAG orchestrator |

pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod retriever;

pub use conversation::ConversationStore;
pub use embedding::Embedder;
pub use engine::{EngineConfig, RagEngine};
pub use error::{Capability, CoreError};
pub use generation::Generator;
pub use index::{MetadataFilter, VectorIndex, VectorRecord};
pub use models::{
    AnswerResponse, Chunk, DocumentInfo, EngineStats, Metadata, RetrievalResult, ScoredChunk,
    SourceCitation, Turn,
};
pub use retriever::{RetrievalPolicy, Retriever};
