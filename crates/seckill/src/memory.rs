use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, UserId, VoucherId, VoucherReservation};

use crate::error::{Result, SeckillError};
use crate::store::{OrderRecord, OrderStore, SeckillVoucher, VoucherStore};

#[derive(Debug, Default)]
struct MemoryDb {
    vouchers: HashMap<VoucherId, SeckillVoucher>,
    orders: Vec<OrderRecord>,
    fail_next_fulfillments: u32,
}

/// In-memory durable store for tests and single-process runs.
///
/// Implements both store traits over one table set, the way the SQL
/// implementation shares one database. `fulfill` runs under a single
/// write guard, which stands in for the transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemorySeckillStore {
    db: Arc<RwLock<MemoryDb>>,
}

impl InMemorySeckillStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` fulfill calls fail with a storage error.
    pub fn inject_failures(&self, count: u32) {
        self.db.write().unwrap().fail_next_fulfillments = count;
    }

    /// Returns the number of persisted orders.
    pub fn order_count(&self) -> usize {
        self.db.read().unwrap().orders.len()
    }

    /// Returns the remaining durable stock for a voucher.
    pub fn remaining_stock(&self, voucher_id: VoucherId) -> Option<i32> {
        self.db
            .read()
            .unwrap()
            .vouchers
            .get(&voucher_id)
            .map(|voucher| voucher.stock)
    }
}

#[async_trait]
impl VoucherStore for InMemorySeckillStore {
    async fn insert_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        self.db
            .write()
            .unwrap()
            .vouchers
            .insert(voucher.voucher_id, voucher.clone());
        Ok(())
    }

    async fn find_seckill_voucher(&self, voucher_id: VoucherId) -> Result<Option<SeckillVoucher>> {
        Ok(self.db.read().unwrap().vouchers.get(&voucher_id).cloned())
    }
}

#[async_trait]
impl OrderStore for InMemorySeckillStore {
    async fn fulfill(&self, reservation: &VoucherReservation) -> Result<()> {
        let mut db = self.db.write().unwrap();

        if db.fail_next_fulfillments > 0 {
            db.fail_next_fulfillments -= 1;
            return Err(SeckillError::Storage(
                "injected transient failure".to_string(),
            ));
        }

        if db
            .orders
            .iter()
            .any(|order| order.user_id == reservation.user_id && order.voucher_id == reservation.voucher_id)
        {
            return Err(SeckillError::DuplicateOrder {
                user_id: reservation.user_id,
                voucher_id: reservation.voucher_id,
            });
        }

        let voucher = db
            .vouchers
            .get_mut(&reservation.voucher_id)
            .ok_or(SeckillError::UnknownVoucher(reservation.voucher_id))?;
        if voucher.stock <= 0 {
            return Err(SeckillError::StockDepleted(reservation.voucher_id));
        }
        voucher.stock -= 1;

        db.orders.push(OrderRecord {
            order_id: reservation.order_id,
            user_id: reservation.user_id,
            voucher_id: reservation.voucher_id,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn find_order(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<Option<OrderRecord>> {
        Ok(self
            .db
            .read()
            .unwrap()
            .orders
            .iter()
            .find(|order| order.user_id == user_id && order.voucher_id == voucher_id)
            .cloned())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        Ok(self
            .db
            .read()
            .unwrap()
            .orders
            .iter()
            .find(|order| order.order_id == order_id)
            .cloned())
    }
}
