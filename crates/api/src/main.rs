//! API server entry point.

use api::config::Config;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire the pipeline against the configured backends and start the
    // fulfillment worker
    let backends = config.backends().expect("invalid backend configuration");
    let (app, worker_handle) = match backends {
        Some((redis_url, database_url)) => {
            tracing::info!("using Redis cache store and PostgreSQL durable store");
            let (state, worker) = api::create_backed_state(redis_url, database_url)
                .await
                .expect("failed to connect to backing stores");
            let worker_handle = tokio::spawn(async move {
                if let Err(error) = worker.run().await {
                    tracing::error!(%error, "fulfillment worker exited with error");
                }
            });
            (api::create_app(state, metrics_handle), worker_handle)
        }
        None => {
            tracing::info!("no backends configured, running in memory");
            let (state, worker) = api::create_default_state();
            let worker_handle = tokio::spawn(async move {
                if let Err(error) = worker.run().await {
                    tracing::error!(%error, "fulfillment worker exited with error");
                }
            });
            (api::create_app(state, metrics_handle), worker_handle)
        }
    };

    // 4. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    worker_handle.abort();
    tracing::info!("server shut down gracefully");
}
