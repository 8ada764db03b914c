use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{UserId, VoucherId};

use crate::{
    CacheStoreError, Result, keys,
    store::{CacheStore, ReservationDecision},
};

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Default)]
struct Tables {
    strings: HashMap<String, StringEntry>,
    sets: HashMap<String, HashSet<String>>,
}

impl Tables {
    /// Reads a string entry, evicting it first when its TTL has passed.
    fn live_value(&mut self, key: &str) -> Option<&str> {
        if self.strings.get(key).is_some_and(StringEntry::is_expired) {
            self.strings.remove(key);
        }
        self.strings.get(key).map(|entry| entry.value.as_str())
    }

    fn parse_integer(&mut self, key: &str) -> Result<Option<i64>> {
        match self.live_value(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| CacheStoreError::NotAnInteger {
                    key: key.to_string(),
                    value: raw.to_string(),
                }),
        }
    }
}

/// In-memory cache store implementation for tests and single-process runs.
///
/// All tables live behind one mutex, which is what makes the multi-step
/// reservation and compare-and-delete operations indivisible here.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryCacheStore {
    /// Creates a new empty in-memory cache store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // Poisoning only happens when a writer panicked; the tables hold no
        // half-applied state because every mutation completes under one guard.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of members recorded in the buyer set for a voucher.
    pub fn buyer_count(&self, voucher_id: VoucherId) -> usize {
        self.lock()
            .sets
            .get(&keys::order_set_key(voucher_id))
            .map_or(0, HashSet::len)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().live_value(key).map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut tables = self.lock();
        if tables.live_value(key).is_some() {
            return Ok(false);
        }
        tables.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut tables = self.lock();
        let was_live = tables.live_value(key).is_some();
        tables.strings.remove(key);
        Ok(was_live)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut tables = self.lock();
        if tables.live_value(key) == Some(expected) {
            tables.strings.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut tables = self.lock();
        let next = tables.parse_integer(key)?.unwrap_or(0) + 1;
        tables.strings.insert(
            key.to_string(),
            StringEntry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn seed_stock(&self, voucher_id: VoucherId, stock: u32) -> Result<()> {
        self.lock().strings.insert(
            keys::stock_key(voucher_id),
            StringEntry {
                value: stock.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn try_reserve(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<ReservationDecision> {
        let stock_key = keys::stock_key(voucher_id);
        let order_key = keys::order_set_key(voucher_id);

        // One guard across check, dedupe, decrement and record: the whole
        // gate is a single indivisible step.
        let mut tables = self.lock();

        let stock = tables.parse_integer(&stock_key)?;
        if stock.is_none_or(|remaining| remaining <= 0) {
            return Ok(ReservationDecision::OutOfStock);
        }

        let buyers = tables.sets.entry(order_key).or_default();
        if !buyers.insert(user_id.to_string()) {
            return Ok(ReservationDecision::Duplicate);
        }

        let remaining = stock.unwrap_or(0) - 1;
        tables.strings.insert(
            stock_key,
            StringEntry {
                value: remaining.to_string(),
                expires_at: None,
            },
        );
        Ok(ReservationDecision::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let store = InMemoryCacheStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = InMemoryCacheStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = InMemoryCacheStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_if_absent_respects_existing_value() {
        let store = InMemoryCacheStore::new();
        assert!(
            store
                .set_if_absent("lock", "a", Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_if_absent("lock", "b", Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn set_if_absent_succeeds_after_expiry() {
        let store = InMemoryCacheStore::new();
        store
            .set_if_absent("lock", "a", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(
            store
                .set_if_absent("lock", "b", Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_reports_whether_key_was_live() {
        let store = InMemoryCacheStore::new();
        store.set("k", "v", None).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_only_on_match() {
        let store = InMemoryCacheStore::new();
        store.set("lock", "token-a", None).await.unwrap();

        assert!(!store.compare_and_delete("lock", "token-b").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_some());

        assert!(store.compare_and_delete("lock", "token-a").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn increment_starts_at_one_and_counts_up() {
        let store = InMemoryCacheStore::new();
        assert_eq!(store.increment("seq").await.unwrap(), 1);
        assert_eq!(store.increment("seq").await.unwrap(), 2);
        assert_eq!(store.increment("seq").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn increment_rejects_non_integer_value() {
        let store = InMemoryCacheStore::new();
        store.set("seq", "not-a-number", None).await.unwrap();
        assert!(matches!(
            store.increment("seq").await,
            Err(CacheStoreError::NotAnInteger { .. })
        ));
    }

    #[tokio::test]
    async fn reserve_without_seeded_stock_is_out_of_stock() {
        let store = InMemoryCacheStore::new();
        let decision = store
            .try_reserve(VoucherId::new(1), UserId::new())
            .await
            .unwrap();
        assert_eq!(decision, ReservationDecision::OutOfStock);
    }

    #[tokio::test]
    async fn reserve_decrements_stock_and_records_buyer() {
        let store = InMemoryCacheStore::new();
        let voucher = VoucherId::new(1);
        store.seed_stock(voucher, 2).await.unwrap();

        let user = UserId::new();
        let decision = store.try_reserve(voucher, user).await.unwrap();
        assert_eq!(decision, ReservationDecision::Accepted);
        assert_eq!(
            store.get(&keys::stock_key(voucher)).await.unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(store.buyer_count(voucher), 1);
    }

    #[tokio::test]
    async fn reserve_rejects_duplicate_buyer() {
        let store = InMemoryCacheStore::new();
        let voucher = VoucherId::new(1);
        store.seed_stock(voucher, 5).await.unwrap();

        let user = UserId::new();
        store.try_reserve(voucher, user).await.unwrap();
        let second = store.try_reserve(voucher, user).await.unwrap();
        assert_eq!(second, ReservationDecision::Duplicate);
        assert_eq!(
            store.get(&keys::stock_key(voucher)).await.unwrap().as_deref(),
            Some("4")
        );
    }

    #[tokio::test]
    async fn reserve_exhausts_stock_exactly() {
        let store = InMemoryCacheStore::new();
        let voucher = VoucherId::new(9);
        store.seed_stock(voucher, 1).await.unwrap();

        let first = store.try_reserve(voucher, UserId::new()).await.unwrap();
        let second = store.try_reserve(voucher, UserId::new()).await.unwrap();
        assert_eq!(first, ReservationDecision::Accepted);
        assert_eq!(second, ReservationDecision::OutOfStock);
    }

    #[tokio::test]
    async fn concurrent_reserves_never_oversell() {
        let store = InMemoryCacheStore::new();
        let voucher = VoucherId::new(3);
        store.seed_stock(voucher, 10).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_reserve(voucher, UserId::new()).await.unwrap()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() == ReservationDecision::Accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(
            store.get(&keys::stock_key(voucher)).await.unwrap().as_deref(),
            Some("0")
        );
    }
}
