//! Subscriber Registry
//!
//! Tracks which transport-level subscribers are currently connected.
//! Connections are informational only: the registry never changes what is
//! published, it exists so that connects and disconnects can be logged and
//! counted for health reporting.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscriber connection.
pub type SubscriberId = u64;

/// A connected subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    /// Connection identifier.
    pub id: SubscriberId,
    /// Remote peer address, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
    /// When the subscriber connected.
    pub connected_at: DateTime<Utc>,
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Subscribers currently connected.
    pub connected: usize,
    /// Subscribers connected since start.
    pub total_connected: u64,
    /// Subscribers disconnected since start.
    pub total_disconnected: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    subscribers: HashMap<SubscriberId, SubscriberInfo>,
    total_connected: u64,
    total_disconnected: u64,
}

// =============================================================================
// Subscriber Registry
// =============================================================================

/// Thread-safe registry of connected subscribers.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::subscriber::SubscriberRegistry;
///
/// let registry = SubscriberRegistry::new();
/// let info = registry.connect(None);
/// assert_eq!(registry.connected_count(), 1);
///
/// assert!(registry.disconnect(info.id).is_some());
/// assert_eq!(registry.connected_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its record.
    pub fn connect(&self, remote_addr: Option<SocketAddr>) -> SubscriberInfo {
        let mut state = self.state.write();

        // uuid v4 halves are random; retry on the (unlikely) collision
        let mut id = uuid::Uuid::new_v4().as_u64_pair().0;
        while state.subscribers.contains_key(&id) {
            id = uuid::Uuid::new_v4().as_u64_pair().0;
        }

        let info = SubscriberInfo {
            id,
            remote_addr,
            connected_at: Utc::now(),
        };
        state.subscribers.insert(id, info.clone());
        state.total_connected += 1;
        info
    }

    /// Remove a subscriber.
    ///
    /// Returns the removed record, or `None` if it was not registered.
    pub fn disconnect(&self, id: SubscriberId) -> Option<SubscriberInfo> {
        let mut state = self.state.write();
        let removed = state.subscribers.remove(&id);
        if removed.is_some() {
            state.total_disconnected += 1;
        }
        removed
    }

    /// Check whether a subscriber is connected.
    #[must_use]
    pub fn is_connected(&self, id: SubscriberId) -> bool {
        self.state.read().subscribers.contains_key(&id)
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.state.read().subscribers.len()
    }

    /// Snapshot of connected subscribers.
    #[must_use]
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.state.read().subscribers.values().cloned().collect()
    }

    /// Registry counters.
    #[must_use]
    pub fn stats(&self) -> SubscriberStats {
        let state = self.state.read();
        SubscriberStats {
            connected: state.subscribers.len(),
            total_connected: state.total_connected,
            total_disconnected: state.total_disconnected,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn connect_assigns_unique_ids() {
        let registry = SubscriberRegistry::new();
        let a = registry.connect(None);
        let b = registry.connect(None);

        assert_ne!(a.id, b.id);
        assert_eq!(registry.connected_count(), 2);
        assert!(registry.is_connected(a.id));
    }

    #[test]
    fn connect_records_remote_addr() {
        let registry = SubscriberRegistry::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let info = registry.connect(Some(addr));

        assert_eq!(info.remote_addr, Some(addr));
        assert_eq!(registry.subscribers(), vec![info]);
    }

    #[test]
    fn disconnect_unknown_is_none() {
        let registry = SubscriberRegistry::new();
        assert!(registry.disconnect(12345).is_none());
        assert_eq!(registry.stats().total_disconnected, 0);
    }

    #[test]
    fn stats_track_totals() {
        let registry = SubscriberRegistry::new();
        let a = registry.connect(None);
        let _b = registry.connect(None);
        registry.disconnect(a.id);

        let stats = registry.stats();
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.total_connected, 2);
        assert_eq!(stats.total_disconnected, 1);
    }

    #[test]
    fn concurrent_connect_disconnect() {
        let registry = Arc::new(SubscriberRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let info = registry.connect(None);
                        assert!(registry.disconnect(info.id).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.connected, 0);
        assert_eq!(stats.total_connected, 800);
        assert_eq!(stats.total_disconnected, 800);
    }
}
