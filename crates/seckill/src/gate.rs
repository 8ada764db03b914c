use std::sync::Arc;
use std::time::Duration;

use cache::{BoxError, CacheClient, IdGenerator};
use cache_store::{CacheStore, keys};
use chrono::Utc;
use common::{OrderId, UserId, VoucherId, VoucherReservation};

use crate::error::{Result, SeckillError};
use crate::queue::OrderQueue;
use crate::store::{SeckillVoucher, VoucherStore};

/// Namespace for order IDs in the ID generator.
const ORDER_ID_NAMESPACE: &str = "order";

/// How long warmed voucher metadata stays logically fresh.
const VOUCHER_REFRESH_AFTER: Duration = Duration::from_secs(20);

/// Why a purchase attempt was turned away.
///
/// These are expected outcomes of contention, surfaced directly to the
/// caller and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The sale window has not opened yet.
    NotStarted,
    /// The sale window has closed.
    Ended,
    /// Remaining stock is zero.
    OutOfStock,
    /// The buyer already holds a reservation or order for this voucher.
    Duplicate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotStarted => "not_started",
            RejectReason::Ended => "ended",
            RejectReason::OutOfStock => "out_of_stock",
            RejectReason::Duplicate => "duplicate",
        }
    }
}

/// Result of a purchase attempt.
///
/// `Accepted` is returned before durable persistence completes; callers
/// needing durable confirmation query order status separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Accepted { order_id: OrderId },
    Rejected(RejectReason),
}

/// The admission side of the flash sale.
///
/// Everything on this path is cache-resident: voucher metadata comes from
/// the logically-expiring cache, the reservation gate is one atomic store
/// operation, and the accepted reservation is handed to the queue. The
/// durable store is never touched synchronously.
pub struct SeckillService<S, Q, V> {
    store: Arc<S>,
    cache: CacheClient<S>,
    ids: IdGenerator<S>,
    queue: Arc<Q>,
    vouchers: Arc<V>,
}

impl<S, Q, V> Clone for SeckillService<S, Q, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            ids: self.ids.clone(),
            queue: self.queue.clone(),
            vouchers: self.vouchers.clone(),
        }
    }
}

impl<S, Q, V> SeckillService<S, Q, V>
where
    S: CacheStore + 'static,
    Q: OrderQueue,
    V: VoucherStore + 'static,
{
    /// Creates the admission service.
    pub fn new(store: Arc<S>, queue: Arc<Q>, vouchers: Arc<V>) -> Self {
        Self {
            cache: CacheClient::new(store.clone()),
            ids: IdGenerator::new(store.clone()),
            store,
            queue,
            vouchers,
        }
    }

    /// Puts a voucher on sale: persists it durably, seeds the cache-side
    /// stock counter and warms the logically-expiring metadata entry.
    ///
    /// The warm-up is what lets `attempt_purchase` run without ever
    /// reading the durable store.
    #[tracing::instrument(skip(self, voucher), fields(voucher_id = %voucher.voucher_id))]
    pub async fn publish_voucher(&self, voucher: SeckillVoucher) -> Result<()> {
        self.vouchers.insert_seckill_voucher(&voucher).await?;
        self.store
            .seed_stock(voucher.voucher_id, voucher.stock.max(0) as u32)
            .await?;

        let key = format!("{}{}", keys::SECKILL_VOUCHER_KEY, voucher.voucher_id);
        self.cache
            .set_with_logical_expire(&key, &voucher, VOUCHER_REFRESH_AFTER)
            .await?;

        metrics::counter!("vouchers_published_total").increment(1);
        tracing::info!(stock = voucher.stock, "voucher published and warmed");
        Ok(())
    }

    /// Attempts to buy one unit of `voucher_id` for `user_id`.
    ///
    /// Returns as soon as the reservation is accepted and queued; durable
    /// persistence happens asynchronously in the fulfillment pipeline.
    #[tracing::instrument(skip(self))]
    pub async fn attempt_purchase(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<PurchaseOutcome> {
        metrics::counter!("purchase_attempts_total").increment(1);
        let started = std::time::Instant::now();

        let vouchers = self.vouchers.clone();
        let voucher: SeckillVoucher = self
            .cache
            .read_logical(
                keys::SECKILL_VOUCHER_KEY,
                voucher_id,
                move |id: VoucherId| async move {
                    vouchers
                        .find_seckill_voucher(id)
                        .await
                        .map_err(|e| Box::new(e) as BoxError)
                },
                VOUCHER_REFRESH_AFTER,
            )
            .await?
            .ok_or(SeckillError::UnknownVoucher(voucher_id))?;

        let now = Utc::now();
        if now < voucher.begin_time {
            return Ok(self.reject(RejectReason::NotStarted));
        }
        if now > voucher.end_time {
            return Ok(self.reject(RejectReason::Ended));
        }

        let decision = self.store.try_reserve(voucher_id, user_id).await?;
        let outcome = match decision {
            cache_store::ReservationDecision::OutOfStock => self.reject(RejectReason::OutOfStock),
            cache_store::ReservationDecision::Duplicate => self.reject(RejectReason::Duplicate),
            cache_store::ReservationDecision::Accepted => {
                let order_id = OrderId::new(self.ids.next_id(ORDER_ID_NAMESPACE).await?);
                self.queue
                    .publish(VoucherReservation {
                        order_id,
                        user_id,
                        voucher_id,
                    })
                    .await?;

                metrics::counter!("purchases_accepted_total").increment(1);
                tracing::info!(%order_id, "reservation accepted and queued");
                PurchaseOutcome::Accepted { order_id }
            }
        };

        metrics::histogram!("purchase_admission_seconds").record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    fn reject(&self, reason: RejectReason) -> PurchaseOutcome {
        metrics::counter!("purchases_rejected_total").increment(1);
        tracing::debug!(reason = reason.as_str(), "purchase rejected");
        PurchaseOutcome::Rejected(reason)
    }
}
