//! MT5 Bridge Message Types
//!
//! JSON shapes exchanged with the terminal bridge. Field names mirror the
//! MT5 terminal's own record fields (`price_open`, `sl`, `tp`, ...).
//!
//! Conversion into domain records is fallible per record: an unknown side
//! code or an out-of-range timestamp rejects that record only.

use serde::{Deserialize, Serialize};

use crate::domain::market::{
    ActiveTrade, DayBar, HistoricalDeal, Quote, Symbol, TradeSide, epoch_to_utc, percent_change,
};

// =============================================================================
// Session
// =============================================================================

/// Response to `POST /initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResponse {
    /// Whether the terminal connection is up.
    pub ok: bool,
    /// Terminal error description.
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    /// Numeric trading account.
    pub login: u64,
    /// Account password.
    pub password: &'a str,
    /// Trade server name.
    pub server: &'a str,
}

/// Response to `POST /login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// Whether the account is authorized.
    pub authorized: bool,
    /// Terminal error description.
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Market Data
// =============================================================================

/// Latest tick for a symbol (`GET /symbols/{symbol}/tick`).
#[derive(Debug, Clone, Deserialize)]
pub struct TickMessage {
    /// Epoch seconds.
    pub time: i64,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Last deal price.
    #[serde(default)]
    pub last: f64,
}

/// One OHLC bar (`GET /symbols/{symbol}/rates`).
#[derive(Debug, Clone, Deserialize)]
pub struct RateBarMessage {
    /// Bar open, epoch seconds.
    pub time: i64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Tick count.
    #[serde(default)]
    pub tick_volume: u64,
    /// Spread in points.
    #[serde(default)]
    pub spread: i64,
    /// Exchange volume.
    #[serde(default)]
    pub real_volume: f64,
}

impl From<&RateBarMessage> for DayBar {
    fn from(bar: &RateBarMessage) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.real_volume,
            tick_volume: bar.tick_volume,
            spread: bar.spread,
        }
    }
}

/// Combine a tick and the current day bar into a quote.
///
/// # Errors
///
/// Returns an error if the tick timestamp is out of range.
pub fn build_quote(
    symbol: &Symbol,
    tick: &TickMessage,
    day_bar: &RateBarMessage,
) -> Result<Quote, ConversionError> {
    Ok(Quote {
        symbol: symbol.clone(),
        time: epoch_to_utc(tick.time).ok_or(ConversionError::Timestamp(tick.time))?,
        bid: tick.bid,
        ask: tick.ask,
        last: tick.last,
        day_bar: DayBar::from(day_bar),
    })
}

// =============================================================================
// Positions and Deals
// =============================================================================

/// Open position (`GET /positions`).
#[derive(Debug, Clone, Deserialize)]
pub struct PositionMessage {
    /// Position ticket.
    pub ticket: u64,
    /// Open time, epoch seconds.
    pub time: i64,
    /// Platform position type code.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Volume in lots.
    pub volume: f64,
    /// Open price.
    pub price_open: f64,
    /// Stop loss.
    #[serde(default)]
    pub sl: f64,
    /// Take profit.
    #[serde(default)]
    pub tp: f64,
    /// Current price.
    pub price_current: f64,
    /// Floating profit.
    #[serde(default)]
    pub profit: f64,
    /// Instrument.
    pub symbol: Symbol,
    /// Free-text comment.
    #[serde(default)]
    pub comment: String,
}

impl TryFrom<PositionMessage> for ActiveTrade {
    type Error = ConversionError;

    fn try_from(msg: PositionMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            side: TradeSide::from_code(msg.kind).ok_or(ConversionError::Side(msg.kind))?,
            time: epoch_to_utc(msg.time).ok_or(ConversionError::Timestamp(msg.time))?,
            change: percent_change(msg.price_open, msg.price_current),
            symbol: msg.symbol,
            ticket: msg.ticket,
            volume: msg.volume,
            open_price: msg.price_open,
            current_price: msg.price_current,
            stop_loss: msg.sl,
            take_profit: msg.tp,
            profit: msg.profit,
            identity: msg.comment,
        })
    }
}

/// Executed deal (`GET /history/deals`).
#[derive(Debug, Clone, Deserialize)]
pub struct DealMessage {
    /// Deal ticket.
    pub ticket: u64,
    /// Execution time, epoch seconds.
    pub time: i64,
    /// Platform deal type code (0 buy, 1 sell, 2+ balance and charges).
    #[serde(rename = "type")]
    pub kind: u8,
    /// Volume in lots.
    #[serde(default)]
    pub volume: f64,
    /// Execution price.
    #[serde(default)]
    pub price: f64,
    /// Commission.
    #[serde(default)]
    pub commission: f64,
    /// Swap.
    #[serde(default)]
    pub swap: f64,
    /// Realized profit.
    #[serde(default)]
    pub profit: f64,
    /// Instrument (empty for balance operations).
    #[serde(default)]
    pub symbol: Symbol,
    /// Free-text comment.
    #[serde(default)]
    pub comment: String,
    /// Platform reason code.
    #[serde(default)]
    pub reason: i32,
}

impl TryFrom<DealMessage> for HistoricalDeal {
    type Error = ConversionError;

    fn try_from(msg: DealMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            side: TradeSide::from_code(msg.kind).ok_or(ConversionError::Side(msg.kind))?,
            time: epoch_to_utc(msg.time).ok_or(ConversionError::Timestamp(msg.time))?,
            symbol: msg.symbol,
            ticket: msg.ticket,
            volume: msg.volume,
            price: msg.price,
            commission: msg.commission,
            swap: msg.swap,
            profit: msg.profit,
            comment: msg.comment,
            reason: msg.reason,
        })
    }
}

/// A bridge record that cannot become a domain record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// Not a buy or sell (balance, credit, charge, ...).
    #[error("non-trading type code {0}")]
    Side(u8),
    /// Epoch seconds outside the representable range.
    #[error("timestamp out of range: {0}")]
    Timestamp(i64),
}
