use std::time::Duration;

use async_trait::async_trait;
use common::{UserId, VoucherId};

use crate::Result;

/// Outcome of the atomic reservation step.
///
/// Mirrors the result codes of the server-side reservation script:
/// 0 accepted, 1 out of stock, 2 duplicate purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationDecision {
    /// Stock was decremented and the buyer recorded.
    Accepted,
    /// Remaining stock is zero or the voucher was never seeded.
    OutOfStock,
    /// The buyer already holds a reservation for this voucher.
    Duplicate,
}

/// Core trait for cache store implementations.
///
/// The cache store is the single source of truth for admission decisions,
/// so every implementation must make `compare_and_delete` and `try_reserve`
/// indivisible with respect to concurrent callers. All implementations must
/// be thread-safe (Send + Sync).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the raw value stored at `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` at `key`. A `ttl` of `None` means the entry never
    /// physically expires (the logical-expiration policy relies on this).
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Writes `value` at `key` only when the key is absent, with expiry.
    ///
    /// Returns true when the write happened. This is the lock-acquisition
    /// primitive: atomic set-if-absent-with-expiry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Removes `key`. Returns true when a value was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes `key` only when its current value equals `expected`, as a
    /// single indivisible step. Returns true when the delete happened.
    ///
    /// This is the lock-release primitive; splitting the comparison and the
    /// delete would let a holder whose lease expired delete a lock that has
    /// since been re-acquired by someone else.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Atomically increments the integer at `key`, creating it at zero
    /// first when absent. Returns the incremented value.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Seeds the purchasable stock counter for a voucher.
    ///
    /// Called by the warming step when a voucher goes on sale.
    async fn seed_stock(&self, voucher_id: VoucherId, stock: u32) -> Result<()>;

    /// Runs the reservation gate for `(voucher_id, user_id)` as one
    /// indivisible step: stock check, duplicate check, decrement, record.
    async fn try_reserve(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<ReservationDecision>;
}
