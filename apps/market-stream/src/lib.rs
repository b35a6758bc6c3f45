#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream - MT5 Market Data Fan-out
//!
//! Holds the single session with the MT5 trading platform, polls it at
//! three independent cadences and broadcasts the results to any number of
//! WebSocket subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Value types with no I/O
//!   - `market`: Quotes, open positions, closed deals
//!   - `streaming`: Named events sent to subscribers
//!   - `subscriber`: Connected subscriber bookkeeping
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Data source and event publisher interfaces
//!   - `services`: Streaming orchestrator and loop health
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `mt5`: HTTP client for the MT5 terminal bridge
//!   - `simulated`: Random-walk data source
//!   - `broadcast`: Channel-based event distribution
//!   - `transport`: WebSocket server
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐
//!                    │ quotes  500ms│──┐
//! MT5 bridge ◄──────►│ trades  3s   │──┼──► Broadcast ──► WebSocket ──► Subscriber 1
//!  (one session)     │ history 10s  │──┘      hub          server  ──► Subscriber N
//!                    └──────────────┘
//!                      orchestrator
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data records and streaming events.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{ActiveTrade, DayBar, HistoricalDeal, Quote, Symbol, TradeSide};
pub use domain::streaming::{EventName, StreamEvent};
pub use domain::subscriber::{SubscriberId, SubscriberInfo, SubscriberRegistry};

// Ports and services
pub use application::ports::{Credentials, EventPublisher, MarketDataSource, SourceError};
pub use application::services::{
    LoopHealthSnapshot, LoopName, OrchestratorError, OrchestratorState, PollingSettings,
    SharedOrchestrator, StreamingOrchestrator,
};

// Data sources
pub use infrastructure::mt5::Mt5BridgeSource;
pub use infrastructure::simulated::{FaultPlan, SimulatedSource};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, Mt5Settings, ServerSettings, SourceKind, StreamConfig,
};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub, Subscription,
    SubscriptionError,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::transport::{StreamServer, StreamServerState, TransportError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
