//! Streaming Events
//!
//! The three named events published to subscribers. Each event carries a
//! snapshot: one quote per symbol per quote cycle, or the full list of open
//! positions / recent deals (possibly empty).
//!
//! On the wire an event is a JSON object with the event name and payload:
//!
//! ```json
//! {"event": "trades-update", "data": [ ... ]}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::market::{ActiveTrade, HistoricalDeal, Quote};

/// Name of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// One quote.
    MarketDataUpdate,
    /// Open positions snapshot.
    TradesUpdate,
    /// Recent deals snapshot.
    HistoryUpdate,
}

impl EventName {
    /// Get all event names.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::MarketDataUpdate, Self::TradesUpdate, Self::HistoryUpdate]
    }

    /// Get the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MarketDataUpdate => "market-data-update",
            Self::TradesUpdate => "trades-update",
            Self::HistoryUpdate => "history-update",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event published through the broadcast hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// A single quote, emitted once per symbol per quote cycle.
    MarketDataUpdate(Quote),
    /// Every open position at poll time.
    TradesUpdate(Vec<ActiveTrade>),
    /// Every deal in the trailing reporting window at poll time.
    HistoryUpdate(Vec<HistoricalDeal>),
}

impl StreamEvent {
    /// Get the event name.
    #[must_use]
    pub const fn name(&self) -> EventName {
        match self {
            Self::MarketDataUpdate(_) => EventName::MarketDataUpdate,
            Self::TradesUpdate(_) => EventName::TradesUpdate,
            Self::HistoryUpdate(_) => EventName::HistoryUpdate,
        }
    }

    /// Serialize to the wire envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
