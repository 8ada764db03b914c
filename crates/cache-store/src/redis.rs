use std::time::Duration;

use ::redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use async_trait::async_trait;
use common::{UserId, VoucherId};

use crate::{
    CacheStoreError, Result, keys,
    store::{CacheStore, ReservationDecision},
};

/// Releases a lock only when it still holds the caller's token.
///
/// The comparison and the delete run inside the server, so a holder whose
/// lease expired can never delete a lock re-acquired by someone else.
const UNLOCK_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
end
return 0
"#;

/// The reservation gate: stock check, duplicate check, decrement and record
/// in one indivisible execution. Key layout must match `keys.rs`.
///
/// Returns 0 accepted, 1 out of stock, 2 duplicate.
const RESERVE_SCRIPT: &str = r#"
local voucher_id = ARGV[1]
local user_id = ARGV[2]
local stock_key = 'seckill:stock:' .. voucher_id
local order_key = 'seckill:order:' .. voucher_id
local stock = redis.call('get', stock_key)
if (stock == false or tonumber(stock) <= 0) then
    return 1
end
if (redis.call('sismember', order_key, user_id) == 1) then
    return 2
end
redis.call('incrby', stock_key, -1)
redis.call('sadd', order_key, user_id)
return 0
"#;

/// Redis-backed cache store.
///
/// Uses one multiplexed connection shared by all callers; the atomic
/// multi-step operations are Lua scripts executed server-side.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: MultiplexedConnection,
    unlock: Script,
    reserve: Script,
}

impl RedisCacheStore {
    /// Connects to the Redis server at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            unlock: Script::new(UNLOCK_SCRIPT),
            reserve: Script::new(RESERVE_SCRIPT),
        })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

/// Expiry is second-granular on the wire; never round a short TTL to zero.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection();
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl_seconds(ttl)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.connection();
        let deleted: i64 = self
            .unlock
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn seed_stock(&self, voucher_id: VoucherId, stock: u32) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.set(keys::stock_key(voucher_id), stock).await?;
        Ok(())
    }

    async fn try_reserve(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<ReservationDecision> {
        let mut conn = self.connection();
        let code: i64 = self
            .reserve
            .arg(voucher_id.to_string())
            .arg(user_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        match code {
            0 => Ok(ReservationDecision::Accepted),
            1 => Ok(ReservationDecision::OutOfStock),
            2 => Ok(ReservationDecision::Duplicate),
            other => Err(CacheStoreError::UnexpectedScriptResult(other)),
        }
    }
}
