//! Stream Configuration Settings
//!
//! Configuration types for the streaming service, loaded from environment
//! variables. Every variable except the MT5 credentials has a default.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::application::ports::Credentials;
use crate::application::services::PollingSettings;
use crate::domain::market::Symbol;

/// Which data source backs the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// MT5 terminal bridge over HTTP.
    #[default]
    Mt5,
    /// In-process random-walk source for demos and tests.
    Simulated,
}

impl SourceKind {
    /// Parse source kind from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mt5" => Some(Self::Mt5),
            "simulated" | "sim" => Some(Self::Simulated),
            _ => None,
        }
    }

    /// Get the source name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mt5 => "mt5",
            Self::Simulated => "simulated",
        }
    }
}

/// MT5 bridge connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mt5Settings {
    /// Bridge base URL.
    pub bridge_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for Mt5Settings {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:5000".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Capacity of the quote channel.
    pub quotes_capacity: usize,
    /// Capacity of the trades channel.
    pub trades_capacity: usize,
    /// Capacity of the history channel.
    pub history_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            quotes_capacity: 1024,
            trades_capacity: 64,
            history_capacity: 16,
        }
    }
}

/// Server bind settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address both servers bind to.
    pub bind_addr: IpAddr,
    /// WebSocket transport port.
    pub stream_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            stream_port: 8081,
            health_port: 8082,
        }
    }
}

impl ServerSettings {
    /// WebSocket transport listen address.
    #[must_use]
    pub const fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.stream_port)
    }

    /// Health server listen address.
    #[must_use]
    pub const fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.health_port)
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Data source backend.
    pub source: SourceKind,
    /// Account credentials handed to the data source at start.
    pub credentials: Credentials,
    /// MT5 bridge settings.
    pub mt5: Mt5Settings,
    /// Polling loop settings.
    pub polling: PollingSettings,
    /// Server bind settings.
    pub server: ServerSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`StreamConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let source = match lookup("MARKET_SOURCE") {
            Some(raw) => SourceKind::from_str_case_insensitive(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "MARKET_SOURCE".to_string(),
                    value: raw.clone(),
                    reason: "expected mt5 or simulated".to_string(),
                }
            })?,
            None => SourceKind::default(),
        };

        let credentials = match source {
            SourceKind::Mt5 => Credentials::new(
                required(&lookup, "MT5_LOGIN")?,
                required(&lookup, "MT5_PASSWORD")?,
                required(&lookup, "MT5_SERVER")?,
            ),
            SourceKind::Simulated => Credentials::new(
                lookup("MT5_LOGIN").unwrap_or_else(|| "0".to_string()),
                lookup("MT5_PASSWORD").unwrap_or_default(),
                lookup("MT5_SERVER").unwrap_or_else(|| "Simulated".to_string()),
            ),
        };

        let mt5_defaults = Mt5Settings::default();
        let mt5 = Mt5Settings {
            bridge_url: lookup("MT5_BRIDGE_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(mt5_defaults.bridge_url),
            request_timeout: parse_nonzero_millis(
                &lookup,
                "MT5_REQUEST_TIMEOUT_MS",
                mt5_defaults.request_timeout,
            )?,
        };

        let polling_defaults = PollingSettings::default();
        let symbols = match lookup("STREAM_SYMBOLS") {
            Some(raw) => parse_symbols(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "STREAM_SYMBOLS".to_string(),
                value: raw.clone(),
                reason: "at least one symbol is required".to_string(),
            })?,
            None => polling_defaults.symbols,
        };

        let polling = PollingSettings {
            symbols,
            warmup: parse_millis(&lookup, "STREAM_WARMUP_MS", polling_defaults.warmup),
            quotes_interval: parse_nonzero_millis(
                &lookup,
                "STREAM_QUOTES_INTERVAL_MS",
                polling_defaults.quotes_interval,
            )?,
            trades_interval: parse_nonzero_millis(
                &lookup,
                "STREAM_TRADES_INTERVAL_MS",
                polling_defaults.trades_interval,
            )?,
            history_interval: parse_nonzero_millis(
                &lookup,
                "STREAM_HISTORY_INTERVAL_MS",
                polling_defaults.history_interval,
            )?,
            history_window: Duration::from_secs(
                parse_or(
                    &lookup,
                    "STREAM_HISTORY_WINDOW_HOURS",
                    polling_defaults.history_window.as_secs() / 3600,
                )
                .saturating_mul(3600),
            ),
            degraded_after: parse_or(
                &lookup,
                "STREAM_DEGRADED_AFTER",
                polling_defaults.degraded_after,
            ),
            shutdown_grace: parse_millis(
                &lookup,
                "STREAM_SHUTDOWN_GRACE_MS",
                polling_defaults.shutdown_grace,
            ),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            bind_addr: parse_or(&lookup, "STREAM_BIND_ADDR", server_defaults.bind_addr),
            stream_port: parse_or(&lookup, "STREAM_PORT", server_defaults.stream_port),
            health_port: parse_or(&lookup, "STREAM_HEALTH_PORT", server_defaults.health_port),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            quotes_capacity: parse_or(
                &lookup,
                "STREAM_QUOTES_CAPACITY",
                broadcast_defaults.quotes_capacity,
            ),
            trades_capacity: parse_or(
                &lookup,
                "STREAM_TRADES_CAPACITY",
                broadcast_defaults.trades_capacity,
            ),
            history_capacity: parse_or(
                &lookup,
                "STREAM_HISTORY_CAPACITY",
                broadcast_defaults.history_capacity,
            ),
        };

        Ok(Self {
            source,
            credentials,
            mt5,
            polling,
            server,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Split a comma-separated symbol list: trimmed, upper-cased, de-duplicated
/// in first-seen order. Returns `None` when no symbol remains.
fn parse_symbols(raw: &str) -> Option<Vec<Symbol>> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for symbol in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let symbol = symbol.to_uppercase();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    (!symbols.is_empty()).then_some(symbols)
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_nonzero_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let duration = parse_millis(lookup, key, default);
    if duration.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}
