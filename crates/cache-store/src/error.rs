use thiserror::Error;

/// Errors that can occur when interacting with the cache store.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    /// The Redis backend failed or is unreachable.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// A stored value could not be interpreted as an integer.
    #[error("value at {key} is not an integer: {value:?}")]
    NotAnInteger { key: String, value: String },

    /// The reservation script returned a code outside its contract.
    #[error("unexpected reservation script result: {0}")]
    UnexpectedScriptResult(i64),
}

/// Result type for cache store operations.
pub type Result<T> = std::result::Result<T, CacheStoreError>;
