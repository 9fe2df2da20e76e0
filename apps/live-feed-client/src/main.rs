//! Live Feed Client Binary
//!
//! Streams one subscription and logs every change of its state surface.
//!
//! # Usage
//!
//! ```bash
//! FEED_KIND=live-price FEED_SYMBOL=ETH cargo run --bin live-feed-client
//! ```
//!
//! # Environment Variables
//!
//! - `FEED_WS_BASE_URL`: Streaming base URL (default: ws://localhost:8000/ws)
//! - `FEED_HTTP_BASE_URL`: Fallback base URL (default: derived from the stream URL)
//! - `FEED_KIND`: `live-price`, `data`, `raw-data` or any feed name (default: data)
//! - `FEED_SYMBOL`: Symbol to stream (default: BTC)
//! - `FEED_DAYS`: Days of history for batch feeds (default: 90)
//! - `FEED_QUOTE_ASSET`: Quote asset appended to the symbol (default: USDT)
//! - `FEED_RECONNECT_DELAY_MS`: Delay before reconnecting (default: 1000)
//! - `FEED_DATA_TIMEOUT_MS`: Wait for first payload before falling back (default: 5000)
//! - `FEED_MAX_ATTEMPTS`: Failed attempts before errors trigger a fallback (default: 3)
//! - `FEED_HTTP_TIMEOUT_SECS`: Fallback request timeout (default: 10)
//! - `FEED_METRICS_PORT`: Prometheus metrics port, 0 to disable (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use live_feed_client::infrastructure::telemetry;
use live_feed_client::{
    ClientConfig, FeedManager, FeedSnapshot, HttpFallbackClient, Payload, WsTransport,
    init_metrics,
};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let env_file = dotenvy::dotenv().ok();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        env_file = ?env_file,
        span_export = telemetry_guard.is_exporting(),
        "Starting live feed client"
    );

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        match init_metrics(addr) {
            Ok(addr) => tracing::info!(%addr, "Metrics listener started"),
            Err(e) => tracing::warn!(error = %e, "Metrics disabled"),
        }
    }

    let http = Arc::new(HttpFallbackClient::new(config.http)?);
    check_symbol(&http, &config).await;

    let shutdown_token = CancellationToken::new();
    let (manager, handle) = FeedManager::new(
        config.endpoints.clone(),
        config.reconnect,
        Arc::new(WsTransport::new()),
        http,
    );
    let manager_task = manager.with_cancellation(shutdown_token.clone()).spawn();
    let logger_task = tokio::spawn(log_snapshots(handle.watch()));

    handle.subscribe(config.subscription.clone()).await?;

    await_shutdown().await;

    if let Err(e) = handle.disconnect().await {
        tracing::warn!(error = %e, "Disconnect failed");
    }
    shutdown_token.cancel();
    manager_task.await?;
    logger_task.abort();

    tracing::info!("Live feed client stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        feed = %config.endpoints.kind(),
        subscription = %config.subscription,
        quote_asset = config.endpoints.quote_asset(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.endpoints.stream_url(&config.subscription),
        fallback_url = %config.endpoints.fallback_url(&config.subscription),
        reconnect_delay_ms = config.reconnect.reconnect_delay.as_millis(),
        data_timeout_ms = config.reconnect.data_timeout.as_millis(),
        max_attempts = config.reconnect.max_attempts,
        "Feed endpoints"
    );
}

/// Warn when the configured symbol is missing from the backend's catalog.
async fn check_symbol(http: &HttpFallbackClient, config: &ClientConfig) {
    match http.fetch_symbols(&config.endpoints.symbols_url()).await {
        Ok(catalog) if catalog.contains(config.subscription.symbol()) => {
            tracing::info!(symbols = catalog.symbols.len(), "Symbol catalog loaded");
        }
        Ok(catalog) => {
            tracing::warn!(
                symbol = config.subscription.symbol(),
                available = ?catalog.symbols.iter().map(|s| s.symbol.as_str()).collect::<Vec<_>>(),
                "Symbol not listed by backend"
            );
        }
        Err(e) => {
            tracing::debug!(error = %e, "Symbol catalog unavailable");
        }
    }
}

/// Log every change of the state surface.
async fn log_snapshots(mut rx: watch::Receiver<FeedSnapshot>) {
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        let payload = snapshot.payload.as_ref().map(|payload| match payload {
            Payload::Price(tick) => format!("price {}", tick.price),
            Payload::Batch(records) => format!("{} records", records.len()),
        });

        tracing::info!(
            state = snapshot.state.as_str(),
            connected = snapshot.is_connected,
            loading = snapshot.is_loading,
            attempts = snapshot.attempts,
            source = ?snapshot.source,
            payload = payload.as_deref().unwrap_or("none"),
            error = snapshot.error.as_ref().map(ToString::to_string).as_deref().unwrap_or("none"),
            "Feed state changed"
        );
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
            tracing::info!("Received Ctrl+C, disconnecting");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, disconnecting");
        }
    }
}
