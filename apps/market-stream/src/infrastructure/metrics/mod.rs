//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Counts of events published and dropped per event name
//! - **Polling**: Fetch failures, fetch latency and degraded flag per loop
//! - **Subscribers**: Connected subscriber count
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are cheap no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::services::LoopName;
use crate::domain::streaming::EventName;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns the existing handle on repeated calls. Returns `None` if the
/// recorder could not be installed (for example because another global
/// recorder is already set); metrics are then silently discarded.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metrics();
            Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Event counters
    describe_counter!(
        "market_stream_events_published_total",
        "Total events published to the broadcast hub"
    );
    describe_gauge!(
        "market_stream_event_receivers",
        "Subscribers reached by the latest publish of an event"
    );
    describe_counter!(
        "market_stream_events_dropped_total",
        "Total events skipped by lagging subscribers"
    );

    // Polling
    describe_counter!(
        "market_stream_fetch_failures_total",
        "Total failed data source fetches by polling loop"
    );
    describe_histogram!(
        "market_stream_fetch_duration_seconds",
        "Time spent in one fetch-and-publish cycle"
    );
    describe_gauge!(
        "market_stream_loop_degraded",
        "1 when a polling loop has failed repeatedly, else 0"
    );
    describe_counter!(
        "market_stream_symbols_skipped_total",
        "Total symbols left out of a quote batch"
    );

    // Subscribers
    describe_gauge!(
        "market_stream_subscribers",
        "Number of connected transport subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an event delivered to `receivers` subscribers.
#[allow(clippy::cast_precision_loss)]
pub fn record_event_published(event: EventName, receivers: usize) {
    counter!(
        "market_stream_events_published_total",
        "event" => event.as_str()
    )
    .increment(1);
    gauge!(
        "market_stream_event_receivers",
        "event" => event.as_str()
    )
    .set(receivers as f64);
}

/// Record events skipped by a lagging subscriber.
pub fn record_events_dropped(event: EventName, count: u64) {
    counter!(
        "market_stream_events_dropped_total",
        "event" => event.as_str()
    )
    .increment(count);
}

/// Record a failed fetch in a polling loop.
pub fn record_fetch_failure(loop_name: LoopName) {
    counter!(
        "market_stream_fetch_failures_total",
        "loop" => loop_name.as_str()
    )
    .increment(1);
}

/// Record the duration of one polling cycle.
pub fn record_fetch_duration(loop_name: LoopName, duration: Duration) {
    histogram!(
        "market_stream_fetch_duration_seconds",
        "loop" => loop_name.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Update the degraded flag for a polling loop.
pub fn set_loop_degraded(loop_name: LoopName, degraded: bool) {
    gauge!(
        "market_stream_loop_degraded",
        "loop" => loop_name.as_str()
    )
    .set(if degraded { 1.0 } else { 0.0 });
}

/// Record a symbol skipped from a quote batch.
pub fn record_symbol_skipped(symbol: &str) {
    counter!(
        "market_stream_symbols_skipped_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Update the connected subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("market_stream_subscribers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
