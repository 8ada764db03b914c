//! Key space shared by every component that touches the cache store.

use std::time::Duration;

use common::VoucherId;

/// Prefix for cached voucher detail entries (pass-through policy).
pub const CACHE_VOUCHER_KEY: &str = "cache:voucher:";

/// Prefix for logically-expiring flash-sale voucher metadata.
pub const SECKILL_VOUCHER_KEY: &str = "seckill:voucher:";

/// Prefix for per-voucher stock counters.
pub const SECKILL_STOCK_KEY: &str = "seckill:stock:";

/// Prefix for per-voucher buyer sets.
pub const SECKILL_ORDER_KEY: &str = "seckill:order:";

/// Prefix every distributed-lock resource name is stored under.
pub const LOCK_KEY: &str = "lock:";

/// Prefix for ID-generator sequence counters.
pub const ID_COUNTER_KEY: &str = "icr:";

/// TTL for null markers written on a backing-store miss.
pub const CACHE_NULL_TTL: Duration = Duration::from_secs(120);

/// TTL for cached voucher detail entries.
pub const CACHE_VOUCHER_TTL: Duration = Duration::from_secs(30 * 60);

/// Stock counter key for a voucher.
pub fn stock_key(voucher_id: VoucherId) -> String {
    format!("{SECKILL_STOCK_KEY}{voucher_id}")
}

/// Buyer set key for a voucher.
pub fn order_set_key(voucher_id: VoucherId) -> String {
    format!("{SECKILL_ORDER_KEY}{voucher_id}")
}
