//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers that expose them.

/// MT5 terminal bridge data source.
pub mod mt5;

/// In-process data source for demos and tests.
pub mod simulated;

/// Broadcast channels for event fan-out.
pub mod broadcast;

/// WebSocket transport for subscribers.
pub mod transport;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
