//! Port Interfaces
//!
//! Defines the capability the streaming core needs from a trading platform.
//! The orchestrator depends only on [`MarketDataSource`]; concrete adapters
//! live in the infrastructure layer.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataSource`: connect, authenticate, and read-style queries for
//!   quotes, open positions and recent deals
//! - `EventPublisher`: fan-out of named events to subscribers

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::market::{ActiveTrade, HistoricalDeal, Quote, Symbol};
use crate::domain::streaming::StreamEvent;

// =============================================================================
// Credentials
// =============================================================================

/// Trading account credential triple, supplied once at start.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    account: String,
    secret: String,
    server: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(account: String, secret: String, server: String) -> Self {
        Self {
            account,
            secret,
            server,
        }
    }

    /// Get the account identifier.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Get the account secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Get the trade server / region identifier.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .field("server", &self.server)
            .finish()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by a market data source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The platform connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The platform rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A query was made before a successful initialize + authenticate.
    #[error("not connected: initialize and authenticate first")]
    NotConnected,

    /// Transport-level failure talking to the platform.
    #[error("request failed: {0}")]
    Request(String),

    /// The platform answered with an error status.
    #[error("platform error ({status}): {message}")]
    Api {
        /// Status code.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// The platform answered with data that could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

// =============================================================================
// Market Data Source
// =============================================================================

/// Capability set of a trading-platform data source.
///
/// Implementations must be safe to call from several polling loops at once.
/// If the underlying connection does not tolerate concurrent use, the
/// implementation serializes access internally; callers never coordinate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Open the platform connection.
    async fn initialize(&self) -> Result<(), SourceError>;

    /// Log in with the given credentials.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SourceError>;

    /// Fetch one quote per requested symbol.
    ///
    /// Best effort per symbol: a symbol that fails or has no data is logged
    /// and left out. The result never holds more quotes than symbols, and
    /// every quote's symbol is one of the requested ones.
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, SourceError>;

    /// Fetch every currently open position.
    async fn fetch_active_trades(&self) -> Result<Vec<ActiveTrade>, SourceError>;

    /// Fetch the deals closed within `window` before now.
    async fn fetch_recent_deals(&self, window: Duration)
    -> Result<Vec<HistoricalDeal>, SourceError>;

    /// Close the platform connection. Never fails; problems are logged.
    async fn shutdown(&self);
}

// =============================================================================
// Event Publisher
// =============================================================================

/// Publish side of the subscriber fan-out.
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    /// Deliver `event` to every subscriber registered at call time.
    ///
    /// Returns the number of subscribers reached; zero is not an error.
    fn publish(&self, event: StreamEvent) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new(
            "5012345".to_string(),
            "hunter2".to_string(),
            "Broker-Demo".to_string(),
        );
        let debug = format!("{creds:?}");
        assert!(!debug.contains("5012345"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("Broker-Demo"));
    }

    #[test]
    fn credentials_accessors() {
        let creds = Credentials::new("a".to_string(), "s".to_string(), "srv".to_string());
        assert_eq!(creds.account(), "a");
        assert_eq!(creds.secret(), "s");
        assert_eq!(creds.server(), "srv");
    }

    #[test]
    fn source_error_display() {
        let err = SourceError::Api {
            status: 503,
            message: "terminal busy".to_string(),
        };
        assert_eq!(err.to_string(), "platform error (503): terminal busy");
    }
}
