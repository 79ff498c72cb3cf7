//! Error types for the tiered store

use redis::RedisError;

/// Boxed error returned by tier adapters
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the read path and by `rehydrate`.
///
/// Write operations report failures through `WriteOutcome` instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A fast cache or durable store adapter failed, or a custom producer did.
    #[error("Backend error: {0}")]
    Backend(#[from] BoxError),

    /// The request could not be mapped to a table query: a URL with no table
    /// segment, a malformed query string, or an unknown source preference.
    #[error("Invalid request: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_errors_convert_to_backend() {
        let err: CacheError = BoxError::from("connection reset").into();
        assert!(matches!(err, CacheError::Backend(_)));
        assert_eq!(err.to_string(), "Backend error: connection reset");
    }
}
