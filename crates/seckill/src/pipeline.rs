use std::sync::Arc;
use std::time::Duration;

use cache::DistributedLock;
use cache_store::CacheStore;

use crate::error::{Result, SeckillError};
use crate::queue::{Delivery, OrderQueue};
use crate::store::OrderStore;

/// Lease on the per-user fulfillment lock. Long enough for a transaction,
/// short enough that a crashed worker frees the user quickly.
const ORDER_LOCK_LEASE: Duration = Duration::from_secs(10);

/// Bounds on redelivery of failed fulfillment attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total delivery attempts before a reservation is dead-lettered.
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n * backoff` before requeueing.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Consumes accepted reservations and persists them durably.
///
/// One worker (or a small fixed pool over the same queue) pulls
/// deliveries, serializes per-user work through the distributed lock and
/// hands the transactional write to the order store. Contention and
/// transient failures requeue the delivery; business invariant failures do
/// not — the admission gate already decided those orders, so a durable
/// disagreement is a reconciliation case, not a retry case.
pub struct FulfillmentWorker<S, Q, R> {
    lock: DistributedLock<S>,
    queue: Arc<Q>,
    orders: Arc<R>,
    policy: RetryPolicy,
}

impl<S, Q, R> Clone for FulfillmentWorker<S, Q, R> {
    fn clone(&self) -> Self {
        Self {
            lock: self.lock.clone(),
            queue: self.queue.clone(),
            orders: self.orders.clone(),
            policy: self.policy,
        }
    }
}

impl<S, Q, R> FulfillmentWorker<S, Q, R>
where
    S: CacheStore,
    Q: OrderQueue,
    R: OrderStore,
{
    /// Creates a worker with the default retry policy.
    pub fn new(store: Arc<S>, queue: Arc<Q>, orders: Arc<R>) -> Self {
        Self {
            lock: DistributedLock::new(store),
            queue,
            orders,
            policy: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Drains the queue until it is closed.
    ///
    /// Dequeueing is the only suspension point besides lock acquisition
    /// and the transactional write itself.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("fulfillment worker started");
        while let Some(delivery) = self.queue.consume().await? {
            self.process(delivery).await;
        }
        tracing::info!("order queue closed, fulfillment worker stopping");
        Ok(())
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(
            order_id = %delivery.reservation.order_id,
            user_id = %delivery.reservation.user_id,
            attempt = delivery.attempt,
        )
    )]
    async fn process(&self, delivery: Delivery) {
        let started = std::time::Instant::now();
        let reservation = delivery.reservation;

        let resource = format!("order:{}", reservation.user_id);
        let handle = match self.lock.try_acquire(&resource, ORDER_LOCK_LEASE).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                // Another fulfillment holds this user; not an error, the
                // delivery just goes around again.
                tracing::warn!("user lock contended, requeueing");
                self.retry_or_dead_letter(delivery, "user lock contended").await;
                return;
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!(%error, "lock acquisition failed");
                self.retry_or_dead_letter(delivery, &reason).await;
                return;
            }
        };

        let result = self.orders.fulfill(&reservation).await;

        // The release runs on every path, success or failure; the lease is
        // only the fallback for a crashed worker.
        if let Err(error) = self.lock.release(&handle).await {
            tracing::warn!(%error, "failed to release user lock");
        }

        match result {
            Ok(()) => {
                metrics::counter!("orders_fulfilled_total").increment(1);
                metrics::histogram!("fulfillment_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!("order durably persisted");
            }
            Err(SeckillError::DuplicateOrder { .. }) => {
                // The gate should have caught this; the durable row wins.
                tracing::warn!("order already durably persisted, dropping delivery");
            }
            Err(error @ SeckillError::StockDepleted(_)) => {
                metrics::counter!("reconciliation_alerts_total").increment(1);
                tracing::error!(
                    %error,
                    "durable stock guard failed after admission accepted; manual reconciliation required"
                );
            }
            Err(error) if error.is_transient() => {
                let reason = error.to_string();
                tracing::warn!(%error, "transient fulfillment failure");
                self.retry_or_dead_letter(delivery, &reason).await;
            }
            Err(error) => {
                // Deterministic failure (poison message): retrying cannot help.
                let reason = error.to_string();
                tracing::error!(%error, "unprocessable reservation");
                if let Err(error) = self.queue.dead_letter(delivery, reason).await {
                    tracing::error!(%error, "failed to dead-letter reservation");
                }
            }
        }
    }

    async fn retry_or_dead_letter(&self, delivery: Delivery, reason: &str) {
        if delivery.attempt >= self.policy.max_attempts {
            metrics::counter!("reservations_dead_lettered_total").increment(1);
            if let Err(error) = self.queue.dead_letter(delivery, reason.to_string()).await {
                tracing::error!(%error, "failed to dead-letter reservation");
            }
            return;
        }

        metrics::counter!("fulfillment_retries_total").increment(1);
        tokio::time::sleep(self.policy.backoff * delivery.attempt).await;
        if let Err(error) = self.queue.requeue(delivery).await {
            tracing::error!(%error, "failed to requeue reservation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySeckillStore;
    use crate::queue::InMemoryOrderQueue;
    use crate::store::{SeckillVoucher, VoucherStore};
    use cache_store::InMemoryCacheStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use common::{OrderId, UserId, VoucherId, VoucherReservation};

    type TestWorker =
        FulfillmentWorker<InMemoryCacheStore, InMemoryOrderQueue, InMemorySeckillStore>;

    struct Harness {
        store: Arc<InMemoryCacheStore>,
        queue: Arc<InMemoryOrderQueue>,
        orders: Arc<InMemorySeckillStore>,
        worker: TestWorker,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryCacheStore::new());
        let queue = Arc::new(InMemoryOrderQueue::new());
        let orders = Arc::new(InMemorySeckillStore::new());
        let worker = FulfillmentWorker::new(store.clone(), queue.clone(), orders.clone())
            .with_policy(RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(10),
            });
        Harness {
            store,
            queue,
            orders,
            worker,
        }
    }

    async fn seed_voucher(orders: &InMemorySeckillStore, voucher_id: i64, stock: i32) {
        let now = Utc::now();
        orders
            .insert_seckill_voucher(&SeckillVoucher {
                voucher_id: VoucherId::new(voucher_id),
                stock,
                begin_time: now - ChronoDuration::hours(1),
                end_time: now + ChronoDuration::hours(1),
            })
            .await
            .unwrap();
    }

    fn reservation(order_id: i64, user_id: UserId, voucher_id: i64) -> VoucherReservation {
        VoucherReservation {
            order_id: OrderId::new(order_id),
            user_id,
            voucher_id: VoucherId::new(voucher_id),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 2s");
    }

    #[tokio::test]
    async fn fulfills_queued_reservation() {
        let h = harness();
        seed_voucher(&h.orders, 1, 5).await;
        h.queue
            .publish(reservation(100, UserId::new(), 1))
            .await
            .unwrap();
        h.queue.close();

        h.worker.run().await.unwrap();

        assert_eq!(h.orders.order_count(), 1);
        assert_eq!(h.orders.remaining_stock(VoucherId::new(1)), Some(4));
        assert!(h.queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_dropped_without_retry() {
        let h = harness();
        seed_voucher(&h.orders, 1, 5).await;
        let user = UserId::new();

        // Already durably fulfilled once.
        h.orders.fulfill(&reservation(100, user, 1)).await.unwrap();

        h.queue.publish(reservation(101, user, 1)).await.unwrap();
        h.queue.close();
        h.worker.run().await.unwrap();

        assert_eq!(h.orders.order_count(), 1);
        assert!(h.queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn stock_guard_failure_is_reconciliation_not_retry() {
        let h = harness();
        seed_voucher(&h.orders, 1, 0).await;
        h.queue
            .publish(reservation(100, UserId::new(), 1))
            .await
            .unwrap();
        h.queue.close();

        h.worker.run().await.unwrap();

        assert_eq!(h.orders.order_count(), 0);
        assert!(h.queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let h = harness();
        seed_voucher(&h.orders, 1, 5).await;
        h.orders.inject_failures(2);

        h.queue
            .publish(reservation(100, UserId::new(), 1))
            .await
            .unwrap();

        let runner = {
            let worker = h.worker.clone();
            tokio::spawn(async move { worker.run().await })
        };

        let orders = h.orders.clone();
        wait_until(move || orders.order_count() == 1).await;
        assert!(h.queue.dead_letters().is_empty());

        h.queue.close();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_the_reservation() {
        let h = harness();
        seed_voucher(&h.orders, 1, 5).await;
        h.orders.inject_failures(10);

        h.queue
            .publish(reservation(100, UserId::new(), 1))
            .await
            .unwrap();

        let runner = {
            let worker = h.worker.clone();
            tokio::spawn(async move { worker.run().await })
        };

        let queue = h.queue.clone();
        wait_until(move || !queue.dead_letters().is_empty()).await;

        assert_eq!(h.orders.order_count(), 0);
        let dead = h.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reservation.order_id, OrderId::new(100));

        h.queue.close();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn held_user_lock_defers_fulfillment_until_lease_expires() {
        let h = harness();
        seed_voucher(&h.orders, 1, 5).await;
        let user = UserId::new();

        // Simulate a crashed holder: the lock is taken and never released,
        // so only its lease expiry frees the user.
        let foreign = DistributedLock::new(h.store.clone());
        let _stale = foreign
            .try_acquire(&format!("order:{user}"), Duration::from_millis(60))
            .await
            .unwrap()
            .unwrap();

        let worker = h.worker.clone().with_policy(RetryPolicy {
            max_attempts: 10,
            backoff: Duration::from_millis(20),
        });
        h.queue.publish(reservation(100, user, 1)).await.unwrap();

        let runner = tokio::spawn(async move { worker.run().await });

        let orders = h.orders.clone();
        wait_until(move || orders.order_count() == 1).await;
        assert!(h.queue.dead_letters().is_empty());

        h.queue.close();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn two_workers_share_one_queue() {
        let h = harness();
        seed_voucher(&h.orders, 1, 50).await;

        for i in 0..20 {
            h.queue
                .publish(reservation(100 + i, UserId::new(), 1))
                .await
                .unwrap();
        }
        h.queue.close();

        let first = {
            let worker = h.worker.clone();
            tokio::spawn(async move { worker.run().await })
        };
        let second = {
            let worker = h.worker.clone();
            tokio::spawn(async move { worker.run().await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(h.orders.order_count(), 20);
        assert_eq!(h.orders.remaining_stock(VoucherId::new(1)), Some(30));
    }
}
