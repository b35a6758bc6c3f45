//! Broadcast Channel Adapters
//!
//! Implements event distribution using tokio broadcast channels
//! for efficient fan-out to multiple subscribers.
//!
//! # Architecture
//!
//! The `BroadcastHub` provides a separate channel for each event name:
//! - `market-data-update`: one quote per message, highest volume
//! - `trades-update`: open position snapshots
//! - `history-update`: recent deal snapshots
//!
//! A subscriber owns one receiver per channel through a [`Subscription`].
//! Events published before the subscription existed are never seen, and a
//! subscriber that falls more than `capacity` events behind on a channel
//! skips the overwritten events. Publishers never block.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::application::ports::EventPublisher;
use crate::domain::streaming::{EventName, StreamEvent};
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Capacity for the quote channel.
    pub quotes_capacity: usize,
    /// Capacity for the trades channel.
    pub trades_capacity: usize,
    /// Capacity for the history channel.
    pub history_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            quotes_capacity: 1024,
            trades_capacity: 64,
            history_capacity: 16,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            quotes_capacity: settings.quotes_capacity,
            trades_capacity: settings.trades_capacity,
            history_capacity: settings.history_capacity,
        }
    }
}

/// Central hub for all broadcast channels.
///
/// # Example
///
/// ```rust
/// use market_stream::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
/// use market_stream::domain::streaming::StreamEvent;
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let _subscription = hub.subscribe();
///
/// assert_eq!(hub.publish(StreamEvent::TradesUpdate(vec![])), 1);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    quotes_tx: broadcast::Sender<StreamEvent>,
    trades_tx: broadcast::Sender<StreamEvent>,
    history_tx: broadcast::Sender<StreamEvent>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    ///
    /// Zero capacities are raised to one.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            quotes_tx: broadcast::channel(config.quotes_capacity.max(1)).0,
            trades_tx: broadcast::channel(config.trades_capacity.max(1)).0,
            history_tx: broadcast::channel(config.history_capacity.max(1)).0,
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    const fn sender(&self, name: EventName) -> &broadcast::Sender<StreamEvent> {
        match name {
            EventName::MarketDataUpdate => &self.quotes_tx,
            EventName::TradesUpdate => &self.trades_tx,
            EventName::HistoryUpdate => &self.history_tx,
        }
    }

    /// Send an event to every current subscriber.
    ///
    /// Returns the number of subscribers that will receive it. Publishing
    /// with no subscribers is not an error and returns zero.
    pub fn publish(&self, event: StreamEvent) -> usize {
        let name = event.name();
        let receivers = self.sender(name).send(event).unwrap_or(0);
        metrics::record_event_published(name, receivers);
        receivers
    }

    /// Register a new subscriber on every channel.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            quotes: self.quotes_tx.subscribe(),
            trades: self.trades_tx.subscribe(),
            history: self.history_tx.subscribe(),
        }
    }

    /// Get the number of active receivers for one event name.
    #[must_use]
    pub fn receiver_count(&self, name: EventName) -> usize {
        self.sender(name).receiver_count()
    }

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            quotes_receivers: self.receiver_count(EventName::MarketDataUpdate),
            trades_receivers: self.receiver_count(EventName::TradesUpdate),
            history_receivers: self.receiver_count(EventName::HistoryUpdate),
        }
    }
}

impl EventPublisher for BroadcastHub {
    fn publish(&self, event: StreamEvent) -> usize {
        Self::publish(self, event)
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastStats {
    /// Number of quote receivers.
    pub quotes_receivers: usize,
    /// Number of trades receivers.
    pub trades_receivers: usize,
    /// Number of history receivers.
    pub history_receivers: usize,
}

impl BroadcastStats {
    /// Get total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.quotes_receivers + self.trades_receivers + self.history_receivers
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Receive-side error of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `skipped` events were overwritten.
    #[error("lagged behind on {event}, skipped {skipped} events")]
    Lagged {
        /// Channel that overflowed.
        event: EventName,
        /// Number of events skipped.
        skipped: u64,
    },

    /// The hub was dropped.
    #[error("broadcast hub closed")]
    Closed,
}

/// One subscriber's receivers on every channel.
///
/// Dropping it unregisters the subscriber.
#[derive(Debug)]
pub struct Subscription {
    quotes: broadcast::Receiver<StreamEvent>,
    trades: broadcast::Receiver<StreamEvent>,
    history: broadcast::Receiver<StreamEvent>,
}

impl Subscription {
    /// Wait for the next event on any channel.
    ///
    /// Events of one name arrive in publish order; no order holds across
    /// names. A `Lagged` error is recoverable: the next call continues with
    /// the oldest event still buffered.
    ///
    /// # Errors
    ///
    /// Returns `Lagged` when events were skipped, `Closed` when the hub is gone.
    pub async fn recv(&mut self) -> Result<StreamEvent, SubscriptionError> {
        let (name, result) = tokio::select! {
            r = self.quotes.recv() => (EventName::MarketDataUpdate, r),
            r = self.trades.recv() => (EventName::TradesUpdate, r),
            r = self.history.recv() => (EventName::HistoryUpdate, r),
        };

        match result {
            Ok(event) => Ok(event),
            Err(RecvError::Lagged(skipped)) => {
                metrics::record_events_dropped(name, skipped);
                Err(SubscriptionError::Lagged {
                    event: name,
                    skipped,
                })
            }
            Err(RecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::market::{DayBar, Quote, epoch_to_utc};

    fn quote(symbol: &str, bid: f64) -> StreamEvent {
        StreamEvent::MarketDataUpdate(Quote {
            symbol: symbol.to_string(),
            time: epoch_to_utc(1_700_000_000).unwrap(),
            bid,
            ask: bid + 1.0,
            last: bid,
            day_bar: DayBar::default(),
        })
    }

    #[test]
    fn broadcast_hub_creation() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.stats(), BroadcastStats::default());
    }

    #[test]
    fn subscribe_registers_on_every_channel() {
        let hub = BroadcastHub::with_defaults();

        let _sub1 = hub.subscribe();
        let _sub2 = hub.subscribe();

        let stats = hub.stats();
        assert_eq!(stats.quotes_receivers, 2);
        assert_eq!(stats.trades_receivers, 2);
        assert_eq!(stats.history_receivers, 2);
        assert_eq!(stats.total_receivers(), 6);
    }

    #[test]
    fn receiver_count_decreases_on_drop() {
        let hub = BroadcastHub::with_defaults();

        {
            let _sub = hub.subscribe();
            assert_eq!(hub.receiver_count(EventName::TradesUpdate), 1);
        }

        // sub dropped
        assert_eq!(hub.stats().total_receivers(), 0);
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let hub = BroadcastHub::with_defaults();
        let mut sub = hub.subscribe();

        assert_eq!(hub.publish(quote("BTCUSD", 100.0)), 1);

        let received = sub.recv().await.unwrap();
        assert_eq!(received, quote("BTCUSD", 100.0));
    }

    #[tokio::test]
    async fn multiple_subscribers_get_same_event() {
        let hub = BroadcastHub::with_defaults();
        let mut sub1 = hub.subscribe();
        let mut sub2 = hub.subscribe();

        assert_eq!(hub.publish(StreamEvent::HistoryUpdate(vec![])), 2);

        assert_eq!(sub1.recv().await.unwrap(), StreamEvent::HistoryUpdate(vec![]));
        assert_eq!(sub2.recv().await.unwrap(), StreamEvent::HistoryUpdate(vec![]));
    }

    #[test]
    fn publish_with_no_subscribers_returns_zero() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.publish(quote("BTCUSD", 1.0)), 0);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let hub = BroadcastHub::with_defaults();
        let _early = hub.subscribe();
        hub.publish(quote("BTCUSD", 1.0));

        let mut late = hub.subscribe();
        hub.publish(quote("BTCUSD", 2.0));

        assert_eq!(late.recv().await.unwrap(), quote("BTCUSD", 2.0));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), late.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn same_event_name_preserves_order() {
        let hub = BroadcastHub::with_defaults();
        let mut sub = hub.subscribe();

        for i in 0..50 {
            hub.publish(quote("ETHUSD", f64::from(i)));
        }
        for i in 0..50 {
            assert_eq!(sub.recv().await.unwrap(), quote("ETHUSD", f64::from(i)));
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_publisher() {
        let hub = BroadcastHub::new(BroadcastConfig {
            quotes_capacity: 2,
            trades_capacity: 2,
            history_capacity: 2,
        });
        let mut sub = hub.subscribe();

        for i in 0..5 {
            assert_eq!(hub.publish(quote("BTCUSD", f64::from(i))), 1);
        }

        assert_eq!(
            sub.recv().await.unwrap_err(),
            SubscriptionError::Lagged {
                event: EventName::MarketDataUpdate,
                skipped: 3
            }
        );
        assert_eq!(sub.recv().await.unwrap(), quote("BTCUSD", 3.0));
        assert_eq!(sub.recv().await.unwrap(), quote("BTCUSD", 4.0));
    }

    #[tokio::test]
    async fn dropped_hub_closes_subscription() {
        let hub = BroadcastHub::with_defaults();
        let mut sub = hub.subscribe();
        drop(hub);
        assert_eq!(sub.recv().await.unwrap_err(), SubscriptionError::Closed);
    }

    #[tokio::test]
    async fn concurrent_publish_and_churn() {
        let hub = Arc::new(BroadcastHub::with_defaults());

        let publishers: Vec<_> = EventName::all()
            .iter()
            .map(|name| {
                let hub = Arc::clone(&hub);
                let name = *name;
                tokio::spawn(async move {
                    for i in 0..200 {
                        let event = match name {
                            EventName::MarketDataUpdate => quote("BTCUSD", f64::from(i)),
                            EventName::TradesUpdate => StreamEvent::TradesUpdate(vec![]),
                            EventName::HistoryUpdate => StreamEvent::HistoryUpdate(vec![]),
                        };
                        hub.publish(event);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let churn = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let sub = hub.subscribe();
                    tokio::task::yield_now().await;
                    drop(sub);
                }
            })
        };

        for handle in publishers {
            handle.await.unwrap();
        }
        churn.await.unwrap();
        assert_eq!(hub.stats().total_receivers(), 0);
    }

    #[test]
    fn zero_capacity_is_raised() {
        let hub = BroadcastHub::new(BroadcastConfig {
            quotes_capacity: 0,
            trades_capacity: 0,
            history_capacity: 0,
        });
        let _sub = hub.subscribe();
        assert_eq!(hub.publish(StreamEvent::TradesUpdate(vec![])), 1);
    }
}
