//! Generation capability trait.
//!
//! The generative model is an opaque capability: the core hands it a fully
//! constructed prompt and receives answer text. Concrete backends live in
//! the application crate. Like embedding, this is a legitimate suspension
//! point, the only other place the pipeline may block on the network.

use async_trait::async_trait;

use crate::error::CoreError;

/// Capability interface for generative language models.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Generate answer text for a prompt.
    ///
    /// # Errors
    ///
    /// `CoreError::Provider` with `capability = Generation` on timeout,
    /// quota, or malformed-response failures. The orchestrator wraps this
    /// in `GenerationFailed` and guarantees no partial mutation occurred.
    async fn generate(&self, prompt: &str) -> Result<String, CoreError>;
}
