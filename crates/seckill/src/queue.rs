use std::sync::Mutex;

use async_trait::async_trait;
use common::VoucherReservation;
use tokio::sync::mpsc;

use crate::error::{Result, SeckillError};

/// One queued reservation together with its delivery attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub reservation: VoucherReservation,
    pub attempt: u32,
}

/// A reservation parked for manual reconciliation after exhausting its
/// delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub reservation: VoucherReservation,
    pub reason: String,
}

/// Durable-queue contract between admission and fulfillment.
///
/// Delivery is at-least-once: a consumed delivery that cannot be processed
/// is either requeued (attempt count bumped) or dead-lettered. The
/// concrete transport is pluggable; a networked broker implements the same
/// contract as the in-process channel shipped here.
#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// Enqueues a freshly accepted reservation (attempt 1).
    async fn publish(&self, reservation: VoucherReservation) -> Result<()>;

    /// Takes the next delivery, waiting while the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    async fn consume(&self) -> Result<Option<Delivery>>;

    /// Puts a delivery back with its attempt count incremented.
    async fn requeue(&self, delivery: Delivery) -> Result<()>;

    /// Parks a poison delivery for manual reconciliation.
    async fn dead_letter(&self, delivery: Delivery, reason: String) -> Result<()>;
}

/// In-process order queue over an unbounded channel.
pub struct InMemoryOrderQueue {
    // Consumers hold the receiver guard across `recv`, so closing must not
    // go through the receiver: dropping the sender is what ends the queue.
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    dead: Mutex<Vec<DeadLetter>>,
}

impl InMemoryOrderQueue {
    /// Creates a new open queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            dead: Mutex::new(Vec::new()),
        }
    }

    /// Closes the queue: pending deliveries still drain, further publishes
    /// fail, and consumers see `None` once empty.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    /// Snapshot of the dead-letter list.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().unwrap().clone()
    }

    fn send(&self, delivery: Delivery) -> Result<()> {
        self.tx
            .lock()
            .unwrap()
            .as_ref()
            .ok_or(SeckillError::QueueClosed)?
            .send(delivery)
            .map_err(|_| SeckillError::QueueClosed)
    }
}

impl Default for InMemoryOrderQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderQueue for InMemoryOrderQueue {
    async fn publish(&self, reservation: VoucherReservation) -> Result<()> {
        self.send(Delivery {
            reservation,
            attempt: 1,
        })
    }

    async fn consume(&self) -> Result<Option<Delivery>> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn requeue(&self, delivery: Delivery) -> Result<()> {
        self.send(Delivery {
            reservation: delivery.reservation,
            attempt: delivery.attempt + 1,
        })
    }

    async fn dead_letter(&self, delivery: Delivery, reason: String) -> Result<()> {
        tracing::error!(
            order_id = %delivery.reservation.order_id,
            attempt = delivery.attempt,
            reason,
            "reservation dead-lettered"
        );
        self.dead.lock().unwrap().push(DeadLetter {
            reservation: delivery.reservation,
            reason,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, UserId, VoucherId};

    fn reservation(order_id: i64) -> VoucherReservation {
        VoucherReservation {
            order_id: OrderId::new(order_id),
            user_id: UserId::new(),
            voucher_id: VoucherId::new(1),
        }
    }

    #[tokio::test]
    async fn publish_consume_preserves_fifo() {
        let queue = InMemoryOrderQueue::new();
        queue.publish(reservation(1)).await.unwrap();
        queue.publish(reservation(2)).await.unwrap();

        let first = queue.consume().await.unwrap().unwrap();
        let second = queue.consume().await.unwrap().unwrap();
        assert_eq!(first.reservation.order_id, OrderId::new(1));
        assert_eq!(second.reservation.order_id, OrderId::new(2));
        assert_eq!(first.attempt, 1);
    }

    #[tokio::test]
    async fn requeue_bumps_attempt() {
        let queue = InMemoryOrderQueue::new();
        queue.publish(reservation(1)).await.unwrap();

        let delivery = queue.consume().await.unwrap().unwrap();
        queue.requeue(delivery).await.unwrap();

        let redelivered = queue.consume().await.unwrap().unwrap();
        assert_eq!(redelivered.attempt, 2);
        assert_eq!(redelivered.reservation.order_id, OrderId::new(1));
    }

    #[tokio::test]
    async fn consume_blocks_until_publish() {
        let queue = std::sync::Arc::new(InMemoryOrderQueue::new());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume().await.unwrap() })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.publish(reservation(9)).await.unwrap();
        let delivery = consumer.await.unwrap().unwrap();
        assert_eq!(delivery.reservation.order_id, OrderId::new(9));
    }

    #[tokio::test]
    async fn close_wakes_a_parked_consumer() {
        let queue = std::sync::Arc::new(InMemoryOrderQueue::new());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume().await.unwrap() })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = InMemoryOrderQueue::new();
        queue.publish(reservation(1)).await.unwrap();
        queue.close();

        assert!(queue.consume().await.unwrap().is_some());
        assert!(queue.consume().await.unwrap().is_none());
        assert!(matches!(
            queue.publish(reservation(2)).await,
            Err(SeckillError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn dead_letters_are_recorded() {
        let queue = InMemoryOrderQueue::new();
        queue.publish(reservation(1)).await.unwrap();
        let delivery = queue.consume().await.unwrap().unwrap();

        queue
            .dead_letter(delivery, "storage down".to_string())
            .await
            .unwrap();

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reservation.order_id, OrderId::new(1));
        assert_eq!(dead[0].reason, "storage down");
    }
}
