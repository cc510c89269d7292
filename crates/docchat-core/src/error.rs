//! Error taxonomy for the retrieval-and-answer pipeline.
//!
//! Every exposed operation returns either a well-formed result or one of
//! these typed errors. No operation mutates state and then reports failure:
//! a batch insert either fully commits or leaves the index untouched, and a
//! failed `converse` never appends a turn to the session. Because of that
//! atomicity guarantee, a caller that sees an error may retry without first
//! repairing any state; [`CoreError::is_retryable`] additionally signals
//! whether the underlying cause is transient.
//!
//! An unknown session identifier is deliberately *not* an error: history
//! lookups on unknown sessions return an empty sequence and `clear` is a
//! no-op.

use thiserror::Error;

/// Which external capability an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Embedding,
    Generation,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Embedding => write!(f, "embedding"),
            Capability::Generation => write!(f, "generation"),
        }
    }
}

/// Errors produced by the core pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad chunking or engine parameters (e.g. `overlap >= max_size`).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A vector's length does not match the index's established dimension.
    #[error("dimension mismatch: index dimension is {expected}, vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An embedding or generation capability call failed (network, quota,
    /// malformed output). `retryable` reflects whether the transport
    /// considered the failure transient.
    #[error("{capability} provider error: {message}")]
    Provider {
        capability: Capability,
        message: String,
        retryable: bool,
    },

    /// The generative-model call failed while producing an answer. The
    /// request performed no mutation: no turn was appended, no record
    /// inserted.
    #[error("generation failed: {0}")]
    GenerationFailed(#[source] Box<CoreError>),
}

impl CoreError {
    /// Shorthand for a provider failure.
    pub fn provider(capability: Capability, message: impl Into<String>, retryable: bool) -> Self {
        CoreError::Provider {
            capability,
            message: message.into(),
            retryable,
        }
    }

    /// Whether retrying the failed operation might succeed.
    ///
    /// Configuration and dimension errors are deterministic and will fail
    /// again unchanged; provider failures carry the transport's judgement.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::InvalidConfiguration(_) => false,
            CoreError::DimensionMismatch { .. } => false,
            CoreError::Provider { retryable, .. } => *retryable,
            CoreError::GenerationFailed(inner) => inner.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_propagates_through_generation_failed() {
        let transient = CoreError::provider(Capability::Generation, "503", true);
        let wrapped = CoreError::GenerationFailed(Box::new(transient));
        assert!(wrapped.is_retryable());

        let permanent = CoreError::provider(Capability::Generation, "401", false);
        let wrapped = CoreError::GenerationFailed(Box::new(permanent));
        assert!(!wrapped.is_retryable());
    }

    #[test]
    fn test_config_errors_not_retryable() {
        assert!(!CoreError::InvalidConfiguration("overlap".into()).is_retryable());
        assert!(!CoreError::DimensionMismatch {
            expected: 3,
            actual: 4
        }
        .is_retryable());
    }

    #[test]
    fn test_display_includes_capability() {
        let err = CoreError::provider(Capability::Embedding, "timeout", true);
        assert!(err.to_string().contains("embedding"));
    }
}
