//! Polling Loop Health
//!
//! Tracks consecutive fetch failures per polling loop. A loop that keeps
//! failing is flagged degraded after a threshold; the flag is operator-facing
//! only (logs, metrics, health endpoint) and never reaches subscribers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::infrastructure::metrics;

/// Identity of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopName {
    /// Per-symbol quote polling.
    Quotes,
    /// Open-position polling.
    Trades,
    /// Recent-deal polling.
    History,
}

impl LoopName {
    /// Get all loop names in spawn order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Quotes, Self::Trades, Self::History]
    }

    /// Get the loop name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::Trades => "trades",
            Self::History => "history",
        }
    }
}

impl std::fmt::Display for LoopName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one loop's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopHealthSnapshot {
    /// Loop identity.
    #[serde(rename = "loop")]
    pub name: LoopName,
    /// Whether the loop is currently degraded.
    pub degraded: bool,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successful cycles since start.
    pub total_successes: u64,
    /// Failed cycles since start.
    pub total_failures: u64,
    /// Time of the last successful cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    consecutive_failures: u32,
    total_successes: u64,
    total_failures: u64,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    degraded: bool,
}

/// Failure tracker for one polling loop.
#[derive(Debug)]
pub struct LoopHealth {
    name: LoopName,
    degraded_after: u32,
    state: Mutex<HealthState>,
}

impl LoopHealth {
    /// Create a tracker that flags the loop degraded after `degraded_after`
    /// consecutive failures. A threshold of zero is treated as one.
    #[must_use]
    pub fn new(name: LoopName, degraded_after: u32) -> Self {
        Self {
            name,
            degraded_after: degraded_after.max(1),
            state: Mutex::new(HealthState::default()),
        }
    }

    /// Get the loop identity.
    #[must_use]
    pub const fn name(&self) -> LoopName {
        self.name
    }

    /// Record a successful cycle.
    ///
    /// Returns `true` if this success recovered a degraded loop.
    pub fn record_success(&self) -> bool {
        let recovered = {
            let mut state = self.state.lock();
            state.consecutive_failures = 0;
            state.total_successes += 1;
            state.last_success = Some(Utc::now());
            std::mem::replace(&mut state.degraded, false)
        };

        if recovered {
            tracing::info!(loop_name = %self.name, "Polling loop recovered");
            metrics::set_loop_degraded(self.name, false);
        }
        recovered
    }

    /// Record a failed cycle.
    ///
    /// Returns `true` if this failure moved the loop into the degraded state.
    pub fn record_failure(&self, error: &str) -> bool {
        let (became_degraded, failures) = {
            let mut state = self.state.lock();
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.total_failures += 1;
            state.last_error = Some(error.to_string());

            let became = !state.degraded && state.consecutive_failures >= self.degraded_after;
            if became {
                state.degraded = true;
            }
            (became, state.consecutive_failures)
        };

        if became_degraded {
            tracing::warn!(
                loop_name = %self.name,
                consecutive_failures = failures,
                error,
                "Polling loop degraded"
            );
            metrics::set_loop_degraded(self.name, true);
        }
        became_degraded
    }

    /// Whether the loop is currently degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.state.lock().degraded
    }

    /// Clear all counters, used when the orchestrator restarts.
    pub fn reset(&self) {
        *self.state.lock() = HealthState::default();
        metrics::set_loop_degraded(self.name, false);
    }

    /// Take a snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> LoopHealthSnapshot {
        let state = self.state.lock();
        LoopHealthSnapshot {
            name: self.name,
            degraded: state.degraded,
            consecutive_failures: state.consecutive_failures,
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            last_success: state.last_success,
            last_error: state.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_after_threshold_once() {
        let health = LoopHealth::new(LoopName::Trades, 3);

        assert!(!health.record_failure("boom"));
        assert!(!health.record_failure("boom"));
        assert!(health.record_failure("boom"));
        // Already degraded: no second transition.
        assert!(!health.record_failure("boom"));

        let snap = health.snapshot();
        assert!(snap.degraded);
        assert_eq!(snap.consecutive_failures, 4);
        assert_eq!(snap.total_failures, 4);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn success_recovers_and_resets_streak() {
        let health = LoopHealth::new(LoopName::Quotes, 1);
        assert!(health.record_failure("down"));
        assert!(health.is_degraded());

        assert!(health.record_success());
        assert!(!health.is_degraded());
        assert!(!health.record_success());

        let snap = health.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.total_successes, 2);
        assert!(snap.last_success.is_some());
    }

    #[test]
    fn intermittent_failures_never_degrade() {
        let health = LoopHealth::new(LoopName::History, 2);
        for _ in 0..10 {
            assert!(!health.record_failure("flaky"));
            health.record_success();
        }
        assert!(!health.is_degraded());
    }

    #[test]
    fn zero_threshold_treated_as_one() {
        let health = LoopHealth::new(LoopName::Trades, 0);
        assert!(health.record_failure("x"));
    }

    #[test]
    fn reset_clears_state() {
        let health = LoopHealth::new(LoopName::Trades, 1);
        health.record_failure("x");
        health.reset();
        assert_eq!(
            health.snapshot(),
            LoopHealthSnapshot {
                name: LoopName::Trades,
                degraded: false,
                consecutive_failures: 0,
                total_successes: 0,
                total_failures: 0,
                last_success: None,
                last_error: None,
            }
        );
    }

    #[test]
    fn snapshot_serializes_loop_name() {
        let value = serde_json::to_value(LoopHealth::new(LoopName::History, 5).snapshot()).unwrap();
        assert_eq!(value["loop"], "history");
        assert!(value.get("last_error").is_none());
    }
}
