//! Voucher publishing, cached detail reads and the purchase endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use cache::{BoxError, CacheClient};
use cache_store::{CacheStore, keys};
use chrono::{DateTime, Utc};
use common::{UserId, VoucherId};
use seckill::{
    OrderQueue, OrderStore, PurchaseOutcome, SeckillService, SeckillVoucher, VoucherStore,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
///
/// `D` is the durable store, serving both voucher lookups (cache-aside
/// backing fetch) and order-status queries.
pub struct AppState<S: CacheStore, Q, D> {
    pub seckill: SeckillService<S, Q, D>,
    pub cache: CacheClient<S>,
    pub durable: Arc<D>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct PublishVoucherRequest {
    pub voucher_id: i64,
    pub stock: i32,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

// -- Response types --

#[derive(Serialize)]
pub struct VoucherPublishedResponse {
    pub voucher_id: i64,
}

#[derive(Serialize)]
pub struct VoucherResponse {
    pub voucher_id: i64,
    pub stock: i32,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Order IDs exceed 2^53, so they go over the wire as strings.
#[derive(Serialize)]
pub struct PurchaseAcceptedResponse {
    pub order_id: String,
}

#[derive(Serialize)]
pub struct PurchaseRejectedResponse {
    pub rejected: &'static str,
}

/// Reads the explicit authenticated-user id from the `x-user-id` header.
///
/// Authentication itself lives upstream; handlers only ever see the
/// resolved user value, never ambient request state.
pub fn user_from_headers(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get("x-user-id")
        .ok_or_else(|| ApiError::BadRequest("missing x-user-id header".to_string()))?
        .to_str()
        .map_err(|_| ApiError::BadRequest("invalid x-user-id header".to_string()))?;
    let uuid = uuid::Uuid::parse_str(raw)
        .map_err(|e| ApiError::BadRequest(format!("invalid x-user-id header: {e}")))?;
    Ok(UserId::from_uuid(uuid))
}

// -- Handlers --

/// POST /vouchers — put a voucher on sale and warm the cache.
#[tracing::instrument(skip(state, req), fields(voucher_id = req.voucher_id))]
pub async fn publish<S, Q, D>(
    State(state): State<Arc<AppState<S, Q, D>>>,
    Json(req): Json<PublishVoucherRequest>,
) -> Result<(StatusCode, Json<VoucherPublishedResponse>), ApiError>
where
    S: CacheStore + 'static,
    Q: OrderQueue,
    D: VoucherStore + OrderStore + 'static,
{
    if req.stock < 0 {
        return Err(ApiError::BadRequest("stock must not be negative".to_string()));
    }
    if req.end_time <= req.begin_time {
        return Err(ApiError::BadRequest(
            "end_time must be after begin_time".to_string(),
        ));
    }

    let voucher = SeckillVoucher {
        voucher_id: VoucherId::new(req.voucher_id),
        stock: req.stock,
        begin_time: req.begin_time,
        end_time: req.end_time,
    };
    state.seckill.publish_voucher(voucher).await?;

    Ok((
        StatusCode::CREATED,
        Json(VoucherPublishedResponse {
            voucher_id: req.voucher_id,
        }),
    ))
}

/// GET /vouchers/:id — voucher detail through the pass-through cache.
#[tracing::instrument(skip(state))]
pub async fn get<S, Q, D>(
    State(state): State<Arc<AppState<S, Q, D>>>,
    Path(id): Path<i64>,
) -> Result<Json<VoucherResponse>, ApiError>
where
    S: CacheStore + 'static,
    Q: OrderQueue,
    D: VoucherStore + OrderStore + 'static,
{
    let durable = state.durable.clone();
    let voucher: Option<SeckillVoucher> = state
        .cache
        .read_through(
            keys::CACHE_VOUCHER_KEY,
            VoucherId::new(id),
            move |voucher_id: VoucherId| async move {
                durable
                    .find_seckill_voucher(voucher_id)
                    .await
                    .map_err(|e| Box::new(e) as BoxError)
            },
            keys::CACHE_VOUCHER_TTL,
        )
        .await
        .map_err(cache_error_to_api)?;

    let voucher = voucher.ok_or_else(|| ApiError::NotFound(format!("Voucher {id} not found")))?;
    Ok(Json(VoucherResponse {
        voucher_id: voucher.voucher_id.as_i64(),
        stock: voucher.stock,
        begin_time: voucher.begin_time,
        end_time: voucher.end_time,
    }))
}

fn cache_error_to_api(err: cache::CacheError) -> ApiError {
    ApiError::Seckill(seckill::SeckillError::Cache(err))
}

/// POST /vouchers/:id/orders — attempt a flash-sale purchase.
///
/// Returns 201 with the order id the moment the reservation is accepted;
/// durable persistence completes asynchronously. Rejections come back as
/// 409 with the reason.
#[tracing::instrument(skip(state, headers))]
pub async fn purchase<S, Q, D>(
    State(state): State<Arc<AppState<S, Q, D>>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<axum::response::Response, ApiError>
where
    S: CacheStore + 'static,
    Q: OrderQueue,
    D: VoucherStore + OrderStore + 'static,
{
    use axum::response::IntoResponse;

    let user_id = user_from_headers(&headers)?;
    let outcome = state
        .seckill
        .attempt_purchase(VoucherId::new(id), user_id)
        .await?;

    let response = match outcome {
        PurchaseOutcome::Accepted { order_id } => (
            StatusCode::CREATED,
            Json(PurchaseAcceptedResponse {
                order_id: order_id.to_string(),
            }),
        )
            .into_response(),
        PurchaseOutcome::Rejected(reason) => (
            StatusCode::CONFLICT,
            Json(PurchaseRejectedResponse {
                rejected: reason.as_str(),
            }),
        )
            .into_response(),
    };
    Ok(response)
}
