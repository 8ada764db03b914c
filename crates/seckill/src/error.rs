use cache::CacheError;
use cache_store::CacheStoreError;
use common::{UserId, VoucherId};
use thiserror::Error;

/// Errors that can occur in the flash-sale pipeline.
#[derive(Debug, Error)]
pub enum SeckillError {
    /// No voucher metadata exists for the requested id.
    #[error("unknown voucher: {0}")]
    UnknownVoucher(VoucherId),

    /// A durable order already exists for this user and voucher.
    ///
    /// During fulfillment this is defense-in-depth behind the admission
    /// gate's duplicate check, not a normal business outcome.
    #[error("user {user_id} already holds an order for voucher {voucher_id}")]
    DuplicateOrder {
        user_id: UserId,
        voucher_id: VoucherId,
    },

    /// The durable stock guard (`stock > 0`) failed after admission had
    /// already accepted the reservation — the cache-side and durable
    /// counters diverged.
    #[error("durable stock for voucher {0} exhausted after admission")]
    StockDepleted(VoucherId),

    /// The order queue was closed while publishing.
    #[error("order queue is closed")]
    QueueClosed,

    /// The cache store failed or is unreachable.
    #[error("cache store error: {0}")]
    CacheStore(#[from] CacheStoreError),

    /// A cache-side utility failed.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The durable store failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A queue message or cached value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable storage failed for a reason other than a database error
    /// (used by non-SQL store implementations and failure injection).
    #[error("storage error: {0}")]
    Storage(String),
}

impl SeckillError {
    /// Whether a fulfillment attempt that hit this error is worth
    /// retrying. Business invariants and poison messages are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SeckillError::CacheStore(_)
                | SeckillError::Cache(_)
                | SeckillError::Database(_)
                | SeckillError::Storage(_)
        )
    }
}

/// Result type for flash-sale operations.
pub type Result<T> = std::result::Result<T, SeckillError>;
