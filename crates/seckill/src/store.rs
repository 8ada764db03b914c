use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId, VoucherId, VoucherReservation};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A voucher enrolled in a flash sale: a strictly limited stock sold
/// inside a fixed time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub voucher_id: VoucherId,
    pub stock: i32,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// A durably persisted order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub voucher_id: VoucherId,
    pub created_at: DateTime<Utc>,
}

/// Durable voucher lookups and registration.
#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Registers a voucher for sale, replacing any existing row with the
    /// same id (re-publishing updates stock and window).
    async fn insert_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()>;

    /// Loads a voucher by id.
    async fn find_seckill_voucher(&self, voucher_id: VoucherId) -> Result<Option<SeckillVoucher>>;
}

/// Durable order persistence.
///
/// The durable store is the single source of truth for fulfillment; it is
/// only ever written by the fulfillment pipeline.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists an accepted reservation inside one transaction:
    /// re-verifies no order exists for `(user_id, voucher_id)`, decrements
    /// stock under a `stock > 0` guard, and inserts the order row. Any
    /// failure rolls the whole step back.
    ///
    /// Failure modes: [`SeckillError::DuplicateOrder`] when the dedupe
    /// re-check trips, [`SeckillError::StockDepleted`] when the guard
    /// fails after admission already accepted the buyer.
    ///
    /// [`SeckillError::DuplicateOrder`]: crate::SeckillError::DuplicateOrder
    /// [`SeckillError::StockDepleted`]: crate::SeckillError::StockDepleted
    async fn fulfill(&self, reservation: &VoucherReservation) -> Result<()>;

    /// Looks up the durable order for a buyer and voucher.
    async fn find_order(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<Option<OrderRecord>>;

    /// Looks up a durable order by its id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>>;
}
