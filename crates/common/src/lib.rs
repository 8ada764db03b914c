//! Shared types used across the flash-sale platform crates.

mod types;

pub use types::{OrderId, UserId, VoucherId, VoucherReservation};
