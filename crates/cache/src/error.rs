use cache_store::CacheStoreError;
use thiserror::Error;

/// Boxed error produced by a caller-supplied backing fetch.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the cache-side utilities.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The underlying cache store failed.
    #[error("cache store error: {0}")]
    Store(#[from] CacheStoreError),

    /// A cached value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing fetch supplied by the caller failed.
    #[error("backing fetch failed: {0}")]
    Backing(#[source] BoxError),
}

/// Result type for cache-side operations.
pub type Result<T> = std::result::Result<T, CacheError>;
