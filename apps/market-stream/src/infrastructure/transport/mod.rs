//! WebSocket Transport
//!
//! Accepts subscriber connections on `GET /ws` and relays every hub event
//! to them as a JSON text frame:
//!
//! ```json
//! {"event": "market-data-update", "data": {"symbol": "BTCUSD", ...}}
//! ```
//!
//! The stream is read-only. Inbound text and binary frames are ignored;
//! a close frame, a failed send or server shutdown ends the session.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::subscriber::SubscriberRegistry;
use crate::infrastructure::broadcast::{SharedBroadcastHub, SubscriptionError};
use crate::infrastructure::metrics;

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the stream server.
#[derive(Debug)]
pub struct StreamServerState {
    hub: SharedBroadcastHub,
    registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
}

impl StreamServerState {
    /// Create new stream server state.
    #[must_use]
    pub const fn new(
        hub: SharedBroadcastHub,
        registry: Arc<SubscriberRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hub,
            registry,
            cancel,
        }
    }
}

// =============================================================================
// Stream Server
// =============================================================================

/// WebSocket fan-out server.
#[derive(Debug)]
pub struct StreamServer {
    state: Arc<StreamServerState>,
}

impl StreamServer {
    /// Create a new stream server.
    #[must_use]
    pub const fn new(state: Arc<StreamServerState>) -> Self {
        Self { state }
    }

    /// Build the router.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Bind `addr` and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self, addr: SocketAddr) -> Result<(), TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(addr, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ServerFailed` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), TransportError> {
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = ?local_addr, "Stream server listening");

        let cancel = self.state.cancel.clone();
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| TransportError::ServerFailed(e.to_string()))?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<StreamServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay(socket, state, Some(remote_addr)))
}

async fn relay(socket: WebSocket, state: Arc<StreamServerState>, remote_addr: Option<SocketAddr>) {
    // Subscribe before registering so nothing published after the
    // connect log line is missed.
    let mut subscription = state.hub.subscribe();
    let info = state.registry.connect(remote_addr);
    metrics::set_subscribers(state.registry.connected_count());
    tracing::info!(subscriber_id = info.id, remote_addr = ?remote_addr, "Subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    let reason = loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break "server shutdown";
            }

            result = subscription.recv() => match result {
                Ok(event) => {
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(event = %event.name(), error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break "send failed";
                    }
                }
                Err(SubscriptionError::Lagged { event, skipped }) => {
                    tracing::warn!(subscriber_id = info.id, %event, skipped, "Subscriber lagging, events dropped");
                }
                Err(SubscriptionError::Closed) => break "hub closed",
            },

            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Err(e)) => {
                    tracing::debug!(subscriber_id = info.id, error = %e, "Receive error");
                    break "receive error";
                }
                // Read-only stream. Pongs are queued by the websocket layer.
                Some(Ok(_)) => {}
            },
        }
    };

    drop(subscription);
    state.registry.disconnect(info.id);
    metrics::set_subscribers(state.registry.connected_count());
    tracing::info!(subscriber_id = info.id, reason, "Subscriber disconnected");
}

// =============================================================================
// Errors
// =============================================================================

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
