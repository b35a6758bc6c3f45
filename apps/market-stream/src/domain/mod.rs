//! Domain Layer - Market data records and streaming events.
//!
//! This layer contains the value types that flow from the data source to
//! subscribers. Nothing here performs I/O.

/// Quotes, open positions and closed deals.
pub mod market;

/// Named events published to subscribers.
pub mod streaming;

/// Connected subscriber bookkeeping.
pub mod subscriber;
