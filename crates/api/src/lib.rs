//! HTTP API server with observability for the flash-sale platform.
//!
//! Provides REST endpoints for voucher publishing, cached voucher reads,
//! flash-sale purchases and order status, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use cache::CacheClient;
use cache_store::{CacheStore, InMemoryCacheStore, RedisCacheStore};
use metrics_exporter_prometheus::PrometheusHandle;
use seckill::{
    FulfillmentWorker, InMemoryOrderQueue, InMemorySeckillStore, OrderQueue, OrderStore,
    PostgresSeckillStore, SeckillError, SeckillService, VoucherStore,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::vouchers::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, Q, D>(
    state: Arc<AppState<S, Q, D>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    S: CacheStore + 'static,
    Q: OrderQueue + 'static,
    D: VoucherStore + OrderStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/vouchers", post(routes::vouchers::publish::<S, Q, D>))
        .route("/vouchers/{id}", get(routes::vouchers::get::<S, Q, D>))
        .route(
            "/vouchers/{id}/orders",
            post(routes::vouchers::purchase::<S, Q, D>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S, Q, D>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Default in-process wiring: in-memory cache store, channel queue and
/// in-memory durable store.
///
/// Returns the shared state plus the fulfillment worker; the caller
/// decides where the worker runs (`main` spawns it, tests drive it).
pub fn create_default_state() -> (
    Arc<AppState<InMemoryCacheStore, InMemoryOrderQueue, InMemorySeckillStore>>,
    FulfillmentWorker<InMemoryCacheStore, InMemoryOrderQueue, InMemorySeckillStore>,
) {
    let store = Arc::new(InMemoryCacheStore::new());
    let queue = Arc::new(InMemoryOrderQueue::new());
    let durable = Arc::new(InMemorySeckillStore::new());

    let seckill = SeckillService::new(store.clone(), queue.clone(), durable.clone());
    let worker = FulfillmentWorker::new(store.clone(), queue, durable.clone());

    let state = Arc::new(AppState {
        seckill,
        cache: CacheClient::new(store),
        durable,
    });

    (state, worker)
}

/// Deployment wiring: Redis cache store and PostgreSQL durable store,
/// with the in-process queue between them. Runs pending migrations before
/// returning.
pub async fn create_backed_state(
    redis_url: &str,
    database_url: &str,
) -> Result<
    (
        Arc<AppState<RedisCacheStore, InMemoryOrderQueue, PostgresSeckillStore>>,
        FulfillmentWorker<RedisCacheStore, InMemoryOrderQueue, PostgresSeckillStore>,
    ),
    SeckillError,
> {
    let store = Arc::new(RedisCacheStore::connect(redis_url).await?);
    let durable = Arc::new(PostgresSeckillStore::connect(database_url).await?);
    durable
        .run_migrations()
        .await
        .map_err(|e| SeckillError::Storage(e.to_string()))?;
    let queue = Arc::new(InMemoryOrderQueue::new());

    let seckill = SeckillService::new(store.clone(), queue.clone(), durable.clone());
    let worker = FulfillmentWorker::new(store.clone(), queue, durable.clone());

    let state = Arc::new(AppState {
        seckill,
        cache: CacheClient::new(store),
        durable,
    });

    Ok((state, worker))
}
