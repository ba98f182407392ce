//! Typed errors for the query engine.
//!
//! Retrieval-path failures (one search channel going dark) are handled by
//! degradation inside [`crate::retrieve`] and never surface here. An empty
//! retrieval result is likewise a state, not an error: callers check
//! [`crate::context::ContextBundle::is_empty`] instead of matching a variant.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the ingestion and query pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// A vector's length disagrees with the store's configured dimension.
    /// Fatal for that item only; other items in a batch are unaffected.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding input exceeds the model's input limit. Callers must chunk
    /// the text and retry.
    #[error("content too large to embed: {len} chars (max {max})")]
    ContentTooLarge { len: usize, max: usize },

    /// Item text was empty or whitespace-only.
    #[error("text must not be empty")]
    EmptyText,

    /// A batch call exceeded the provider's batch limit.
    #[error("batch of {len} items exceeds the maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },

    /// An external backend stayed unavailable after retries were exhausted.
    #[error("{service} unavailable after {attempts} attempts: {reason}")]
    ServiceUnavailable {
        service: &'static str,
        attempts: u32,
        reason: String,
    },

    /// A network call exceeded its deadline. No partial answer is fabricated.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Answer synthesis failed with a non-retryable error. Terminal for the
    /// request.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Invalid configuration or request parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Storage backend error.
    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    /// Outbound HTTP error.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ServiceUnavailable { .. }
                | EngineError::Timeout(_)
                | EngineError::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::Timeout("embedding").is_retryable());
        assert!(EngineError::ServiceUnavailable {
            service: "embedding",
            attempts: 5,
            reason: "429".into()
        }
        .is_retryable());
        assert!(!EngineError::EmptyText.is_retryable());
        assert!(!EngineError::DimensionMismatch {
            expected: 1536,
            actual: 384
        }
        .is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let e = EngineError::DimensionMismatch {
            expected: 1536,
            actual: 3,
        };
        assert!(e.to_string().contains("1536"));
        let e = EngineError::ContentTooLarge {
            len: 9000,
            max: 8000,
        };
        assert!(e.to_string().contains("9000"));
    }
}
