//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting orchestrator state, per-loop health, subscriber
//! counts and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while the orchestrator runs)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{LoopHealthSnapshot, OrchestratorState, SharedOrchestrator};
use crate::domain::subscriber::SubscriberRegistry;
use crate::infrastructure::broadcast::{BroadcastStats, SharedBroadcastHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Orchestrator lifecycle state.
    pub state: OrchestratorState,
    /// Per-loop health.
    pub loops: Vec<LoopHealthSnapshot>,
    /// Subscriber counters.
    pub subscribers: SubscriberStatus,
    /// Broadcast receivers per event.
    pub broadcast: BroadcastStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Running with every loop healthy.
    Healthy,
    /// Running, but at least one loop keeps failing.
    Degraded,
    /// Not running.
    Unhealthy,
}

/// Subscriber counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriberStatus {
    /// Currently connected.
    pub connected: usize,
    /// Connected since start.
    pub total_connected: u64,
    /// Disconnected since start.
    pub total_disconnected: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    orchestrator: SharedOrchestrator,
    broadcast_hub: SharedBroadcastHub,
    registry: Arc<SubscriberRegistry>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        orchestrator: SharedOrchestrator,
        broadcast_hub: SharedBroadcastHub,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            orchestrator,
            broadcast_hub,
            registry,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Build the router.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Bind `addr` and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self, addr: SocketAddr) -> Result<(), HealthServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(addr, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HealthServerError> {
        tracing::info!(addr = ?listener.local_addr().ok(), "Health server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.orchestrator.is_running() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let orchestrator_state = state.orchestrator.state();
    let stats = state.registry.stats();

    HealthResponse {
        status: determine_health_status(orchestrator_state, state.orchestrator.is_degraded()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        state: orchestrator_state,
        loops: state.orchestrator.loop_health(),
        subscribers: SubscriberStatus {
            connected: stats.connected,
            total_connected: stats.total_connected,
            total_disconnected: stats.total_disconnected,
        },
        broadcast: state.broadcast_hub.stats(),
    }
}

fn determine_health_status(state: OrchestratorState, any_loop_degraded: bool) -> HealthStatus {
    match (state, any_loop_degraded) {
        (OrchestratorState::Running, false) => HealthStatus::Healthy,
        (OrchestratorState::Running, true) => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::application::ports::Credentials;
    use crate::application::services::{PollingSettings, StreamingOrchestrator};
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::simulated::SimulatedSource;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(OrchestratorState::Running, false, HealthStatus::Healthy ; "running")]
    #[test_case(OrchestratorState::Running, true, HealthStatus::Degraded ; "running with degraded loop")]
    #[test_case(OrchestratorState::Starting, false, HealthStatus::Unhealthy ; "starting")]
    #[test_case(OrchestratorState::Stopping, false, HealthStatus::Unhealthy ; "stopping")]
    #[test_case(OrchestratorState::Stopped, true, HealthStatus::Unhealthy ; "stopped")]
    fn status_from_state(state: OrchestratorState, degraded: bool, expected: HealthStatus) {
        assert_eq!(determine_health_status(state, degraded), expected);
    }

    async fn serve_health() -> (SharedOrchestrator, SocketAddr, CancellationToken) {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let registry = Arc::new(SubscriberRegistry::new());
        let orchestrator = Arc::new(StreamingOrchestrator::new(
            Arc::new(SimulatedSource::new(7)),
            hub.clone(),
            Credentials::new("1".to_string(), "secret".to_string(), "Demo".to_string()),
            PollingSettings::default(),
        ));
        let state = Arc::new(HealthServerState::new(
            "test".to_string(),
            orchestrator.clone(),
            hub,
            Arc::clone(&registry),
        ));
        registry.connect(None);

        let cancel = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HealthServer::new(state, cancel.clone());
        tokio::spawn(server.serve(listener));

        (orchestrator, addr, cancel)
    }

    #[tokio::test]
    async fn readiness_follows_orchestrator_state() {
        let (orchestrator, addr, cancel) = serve_health().await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/readyz");

        let before = client.get(&url).send().await.unwrap();
        assert_eq!(before.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        orchestrator.start().await.unwrap();
        let running = client.get(&url).send().await.unwrap();
        assert_eq!(running.status(), reqwest::StatusCode::OK);

        orchestrator.stop().await.unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn health_reports_loops_and_subscribers() {
        let (orchestrator, addr, cancel) = serve_health().await;
        orchestrator.start().await.unwrap();

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["state"], "running");
        assert_eq!(body["version"], "test");
        assert_eq!(body["loops"].as_array().unwrap().len(), 3);
        assert_eq!(body["loops"][0]["loop"], "quotes");
        assert_eq!(body["subscribers"]["connected"], 1);

        orchestrator.stop().await.unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn stopped_orchestrator_is_unavailable() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let hub = Arc::new(BroadcastHub::with_defaults());
        let orchestrator = Arc::new(StreamingOrchestrator::new(
            Arc::new(SimulatedSource::new(7)),
            hub.clone(),
            Credentials::new("1".to_string(), "secret".to_string(), "Demo".to_string()),
            PollingSettings::default(),
        ));
        let state = Arc::new(HealthServerState::new(
            "test".to_string(),
            orchestrator,
            hub,
            Arc::new(SubscriberRegistry::new()),
        ));
        let router = HealthServer::new(state, CancellationToken::new()).router();

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["state"], "stopped");

        let liveness = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(liveness.status(), StatusCode::OK);
    }
}
