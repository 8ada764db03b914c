//! Cache-side utilities for the flash-sale platform.
//!
//! Built entirely on the [`cache_store::CacheStore`] primitives:
//!
//! - [`DistributedLock`] — cooperative mutual exclusion across process
//!   instances, with owner tokens and lease-bound expiry.
//! - [`CacheClient`] — generic cache-aside reads with penetration and
//!   breakdown defenses.
//! - [`IdGenerator`] — collision-free, roughly time-ordered order IDs.

pub mod client;
pub mod error;
pub mod id;
pub mod lock;

pub use client::{CacheClient, CacheEntry};
pub use error::{BoxError, CacheError, Result};
pub use id::IdGenerator;
pub use lock::{DistributedLock, LockHandle};
