//! Order status endpoint.
//!
//! Admission already returned the order id; this is the separate query a
//! caller uses to learn whether the order has been durably persisted yet.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use cache_store::CacheStore;
use chrono::{DateTime, Utc};
use common::OrderId;
use seckill::{OrderQueue, OrderStore, VoucherStore};
use serde::Serialize;

use super::vouchers::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub user_id: String,
    pub voucher_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: &'static str,
}

/// GET /orders/:id — durable order status.
///
/// 404 covers both "never accepted" and "accepted but not yet fulfilled";
/// the durable store cannot tell them apart, and only it is authoritative
/// here.
#[tracing::instrument(skip(state))]
pub async fn get<S, Q, D>(
    State(state): State<Arc<AppState<S, Q, D>>>,
    Path(id): Path<i64>,
) -> Result<Json<OrderStatusResponse>, ApiError>
where
    S: CacheStore + 'static,
    Q: OrderQueue,
    D: VoucherStore + OrderStore + 'static,
{
    let order = state
        .durable
        .get_order(OrderId::new(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not fulfilled or unknown")))?;

    Ok(Json(OrderStatusResponse {
        order_id: order.order_id.to_string(),
        user_id: order.user_id.to_string(),
        voucher_id: order.voucher_id.as_i64(),
        created_at: order.created_at,
        status: "fulfilled",
    }))
}
