//! Cache store abstraction for the flash-sale platform.
//!
//! The [`CacheStore`] trait captures every capability the admission path
//! needs from the shared cache: plain reads and TTL writes, the
//! set-if-absent and compare-and-delete primitives the distributed lock is
//! built from, an atomic counter for ID sequences, and the indivisible
//! reservation step. Two implementations are provided: an in-memory store
//! for tests and single-process runs, and a Redis store for deployments.

pub mod error;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod store;

pub use crate::redis::RedisCacheStore;
pub use error::{CacheStoreError, Result};
pub use memory::InMemoryCacheStore;
pub use store::{CacheStore, ReservationDecision};
