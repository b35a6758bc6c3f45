//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the streaming orchestrator and the port interfaces
//! that define how it reaches the data source and the subscribers.

/// Port interfaces for the data source and the event fan-out.
pub mod ports;

/// Streaming orchestrator and polling loop health.
pub mod services;
