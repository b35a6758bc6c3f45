//! Market Stream Binary
//!
//! Starts the MT5 market data poller and its WebSocket fan-out.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required (unless `MARKET_SOURCE=simulated`)
//! - `MT5_LOGIN`: Numeric trading account
//! - `MT5_PASSWORD`: Account password
//! - `MT5_SERVER`: Trade server name
//!
//! ## Optional
//! - `MARKET_SOURCE`: mt5 | simulated (default: mt5)
//! - `MT5_BRIDGE_URL`: Terminal bridge base URL (default: <http://127.0.0.1:5000>)
//! - `MT5_REQUEST_TIMEOUT_MS`: Per-request bridge timeout (default: 5000)
//! - `STREAM_SYMBOLS`: Comma-separated symbols (default: BTCUSD,ETHUSD)
//! - `STREAM_WARMUP_MS`: Delay before the first poll (default: 2000)
//! - `STREAM_QUOTES_INTERVAL_MS`: Quote cadence (default: 500)
//! - `STREAM_TRADES_INTERVAL_MS`: Open position cadence (default: 3000)
//! - `STREAM_HISTORY_INTERVAL_MS`: Deal history cadence (default: 10000)
//! - `STREAM_HISTORY_WINDOW_HOURS`: Deal lookback (default: 24)
//! - `STREAM_DEGRADED_AFTER`: Consecutive failures before a loop is degraded (default: 5)
//! - `STREAM_BIND_ADDR`: Listen address for both servers (default: 0.0.0.0)
//! - `STREAM_PORT`: WebSocket port (default: 8081)
//! - `STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use market_stream::infrastructure::health::{HealthServer, HealthServerState};
use market_stream::infrastructure::telemetry;
use market_stream::infrastructure::transport::{StreamServer, StreamServerState};
use market_stream::{
    MarketDataSource, Mt5BridgeSource, SimulatedSource, SourceKind, StreamConfig,
    StreamingOrchestrator, SubscriberRegistry, init_metrics,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long servers get to drain after the shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Market Stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));
    let registry = Arc::new(SubscriberRegistry::new());

    let source = build_source(&config)?;
    let orchestrator = Arc::new(StreamingOrchestrator::new(
        source,
        Arc::clone(&broadcast_hub) as _,
        config.credentials.clone(),
        config.polling.clone(),
    ));

    // A platform that cannot be reached or logged into is fatal at startup
    orchestrator
        .start()
        .await
        .context("streaming orchestrator failed to start")?;

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&orchestrator),
        Arc::clone(&broadcast_hub),
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(health_state, shutdown_token.clone());
    let health_addr = config.server.health_addr();
    let health_shutdown = shutdown_token.clone();
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run(health_addr).await {
            tracing::error!(error = %e, "Health server error");
            health_shutdown.cancel();
        }
    });

    let stream_state = Arc::new(StreamServerState::new(
        Arc::clone(&broadcast_hub),
        Arc::clone(&registry),
        shutdown_token.clone(),
    ));
    let stream_server = StreamServer::new(stream_state);
    let stream_addr = config.server.stream_addr();
    let stream_shutdown = shutdown_token.clone();
    let stream_task = tokio::spawn(async move {
        if let Err(e) = stream_server.run(stream_addr).await {
            tracing::error!(error = %e, "Stream server error");
            stream_shutdown.cancel();
        }
    });

    tracing::info!("Market stream ready");

    await_shutdown(&shutdown_token).await;

    if let Err(e) = orchestrator.stop().await {
        tracing::warn!(error = %e, "Orchestrator stop failed");
    }
    join_server("stream", stream_task).await;
    join_server("health", health_task).await;

    tracing::info!("Market stream stopped");
    Ok(())
}

/// Build the configured data source.
fn build_source(config: &StreamConfig) -> anyhow::Result<Arc<dyn MarketDataSource>> {
    let source: Arc<dyn MarketDataSource> = match config.source {
        SourceKind::Mt5 => Arc::new(
            Mt5BridgeSource::new(&config.mt5).context("failed to build MT5 bridge client")?,
        ),
        SourceKind::Simulated => Arc::new(SimulatedSource::new(rand::random())),
    };
    Ok(source)
}

/// Wait for a server task to drain, aborting it past the timeout.
async fn join_server(name: &'static str, mut task: JoinHandle<()>) {
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
        tracing::warn!(server = name, "Server did not drain in time, aborting");
        task.abort();
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        source = config.source.as_str(),
        symbols = ?config.polling.symbols,
        stream_addr = %config.server.stream_addr(),
        health_addr = %config.server.health_addr(),
        "Configuration loaded"
    );
    tracing::debug!(
        bridge_url = %config.mt5.bridge_url,
        quotes_interval_ms = config.polling.quotes_interval.as_millis(),
        trades_interval_ms = config.polling.trades_interval.as_millis(),
        history_interval_ms = config.polling.history_interval.as_millis(),
        history_window_secs = config.polling.history_window.as_secs(),
        "Polling settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM, SIGINT or an internal shutdown request.
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Server failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
