//! Market Data Records
//!
//! Plain value records produced by a market data source on every poll:
//! quotes with a day-bar snapshot, open positions, and closed deals.
//!
//! None of these carry identity beyond a single poll cycle. Each fetch
//! produces a fresh snapshot; nothing here is merged with earlier data.
//!
//! Field names on the serialized form are the subscriber wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// An instrument identifier such as `BTCUSD` or `EURUSD`.
pub type Symbol = String;

/// Broker-assigned ticket number (unique per broker).
pub type Ticket = u64;

/// Convert platform epoch seconds to a UTC timestamp.
///
/// Returns `None` when the value is outside chrono's representable range.
#[must_use]
pub fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Percent move from the open price to the current price, relative to the
/// current price: `(current - open) / current * 100`.
///
/// Returns exactly `0.0` when `current` is zero.
#[must_use]
pub fn percent_change(open: f64, current: f64) -> f64 {
    if current == 0.0 {
        return 0.0;
    }
    (current - open) / current * 100.0
}

// =============================================================================
// Trade Side
// =============================================================================

/// Direction of a position or deal.
///
/// Serialized as the platform's numeric code: `0` for buy, `1` for sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TradeSide {
    /// Long.
    Buy,
    /// Short.
    Sell,
}

impl TradeSide {
    /// Get the side name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Map a platform type code to a side.
    ///
    /// Returns `None` for non-trading codes (balance, credit, charges, ...).
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Buy),
            1 => Some(Self::Sell),
            _ => None,
        }
    }
}

impl From<TradeSide> for u8 {
    fn from(side: TradeSide) -> Self {
        match side {
            TradeSide::Buy => 0,
            TradeSide::Sell => 1,
        }
    }
}

impl TryFrom<u8> for TradeSide {
    type Error = UnknownTradeSide;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownTradeSide(code))
    }
}

/// A platform type code that is not a buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown trade side code: {0}")]
pub struct UnknownTradeSide(pub u8);

// =============================================================================
// Quote
// =============================================================================

/// Current-day bar for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DayBar {
    /// Day open.
    pub open: f64,
    /// Day high.
    pub high: f64,
    /// Day low.
    pub low: f64,
    /// Latest close (current price within the day).
    pub close: f64,
    /// Real traded volume.
    pub volume: f64,
    /// Number of ticks in the bar.
    pub tick_volume: u64,
    /// Spread in points.
    pub spread: i64,
}

/// A price observation for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument identifier.
    pub symbol: Symbol,
    /// Platform observation time, normalized to UTC.
    pub time: DateTime<Utc>,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Last traded price (0 for quote-only instruments).
    pub last: f64,
    /// Day-bar snapshot, flattened on the wire.
    #[serde(flatten)]
    pub day_bar: DayBar,
}

impl Quote {
    /// Mid price between bid and ask.
    #[must_use]
    pub fn mid(&self) -> f64 {
        f64::midpoint(self.bid, self.ask)
    }
}

// =============================================================================
// Active Trade
// =============================================================================

/// An open position, as reported live by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrade {
    /// Instrument identifier.
    pub symbol: Symbol,
    /// Position ticket.
    pub ticket: Ticket,
    /// Open time.
    pub time: DateTime<Utc>,
    /// Position side.
    #[serde(rename = "type")]
    pub side: TradeSide,
    /// Volume in lots.
    pub volume: f64,
    /// Open price.
    #[serde(rename = "tradePrice")]
    pub open_price: f64,
    /// Current price.
    #[serde(rename = "price")]
    pub current_price: f64,
    /// Stop-loss level (0 when unset).
    #[serde(rename = "stopLoss")]
    pub stop_loss: f64,
    /// Take-profit level (0 when unset).
    #[serde(rename = "takeProfit")]
    pub take_profit: f64,
    /// Floating profit in account currency.
    pub profit: f64,
    /// Percent change, see [`percent_change`].
    pub change: f64,
    /// Free-text identity tag (the position comment).
    pub identity: String,
}

impl ActiveTrade {
    /// Recompute `change` from the open and current prices.
    #[must_use]
    pub fn with_computed_change(mut self) -> Self {
        self.change = percent_change(self.open_price, self.current_price);
        self
    }
}

// =============================================================================
// Historical Deal
// =============================================================================

/// A closed transaction from the trailing reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDeal {
    /// Instrument identifier.
    pub symbol: Symbol,
    /// Deal ticket.
    pub ticket: Ticket,
    /// Execution time.
    pub time: DateTime<Utc>,
    /// Deal side.
    #[serde(rename = "type")]
    pub side: TradeSide,
    /// Volume in lots.
    pub volume: f64,
    /// Execution price.
    pub price: f64,
    /// Commission charged.
    pub commission: f64,
    /// Accumulated swap.
    pub swap: f64,
    /// Realized profit.
    pub profit: f64,
    /// Free-text comment.
    pub comment: String,
    /// Platform reason code (e.g. 4 = stop loss, 5 = take profit).
    pub reason: i32,
}

// =============================================================================
// Tests
// =============================================================================
