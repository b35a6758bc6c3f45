//! Streaming Orchestrator
//!
//! Owns the data source session lifecycle and the three polling loops.
//!
//! # State Machine
//!
//! ```text
//! Stopped ──start()──► Starting ──ok──► Running ──stop()──► Stopping ──► Stopped
//!                          │
//!                          └──initialize/authenticate failed──► Stopped
//! ```
//!
//! # Loops
//!
//! | Loop    | Publishes            | Payload                         |
//! |---------|----------------------|---------------------------------|
//! | quotes  | `market-data-update` | one quote, once per symbol      |
//! | trades  | `trades-update`      | every open position             |
//! | history | `history-update`     | deals in the trailing window    |
//!
//! Each loop waits out the warm-up delay, then runs fetch, publish, sleep in
//! strict sequence. A fetch error is logged and counted; the loop carries on
//! at its next tick and the other loops never notice.
//!
//! Cancellation is cooperative. Loops watch the cancellation token during
//! warm-up and every cadence sleep, so they exit promptly; an adapter call
//! already in flight is allowed to finish first, up to one shared grace
//! deadline for all loops.
//!
//! A `start()` future dropped before it completes leaves the orchestrator
//! `Stopped`, never stuck in `Starting`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_health::{LoopHealth, LoopHealthSnapshot, LoopName};
use crate::application::ports::{Credentials, EventPublisher, MarketDataSource, SourceError};
use crate::domain::market::Symbol;
use crate::domain::streaming::StreamEvent;
use crate::infrastructure::metrics;

// =============================================================================
// Settings
// =============================================================================

/// Polling cadences and symbol set for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    /// Symbols polled by the quote loop.
    pub symbols: Vec<Symbol>,
    /// Delay before the first cycle of every loop.
    pub warmup: Duration,
    /// Quote loop cadence.
    pub quotes_interval: Duration,
    /// Trade loop cadence.
    pub trades_interval: Duration,
    /// Deal-history loop cadence.
    pub history_interval: Duration,
    /// Trailing reporting window for deal history.
    pub history_window: Duration,
    /// Consecutive failures before a loop is flagged degraded.
    pub degraded_after: u32,
    /// How long `stop()` waits for the loops, in total, before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSD".to_string(), "ETHUSD".to_string()],
            warmup: Duration::from_secs(2),
            quotes_interval: Duration::from_millis(500),
            trades_interval: Duration::from_secs(3),
            history_interval: Duration::from_secs(10),
            history_window: Duration::from_secs(24 * 60 * 60),
            degraded_after: 5,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// State and Errors
// =============================================================================

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    /// No session, no loops.
    Stopped,
    /// Connecting and authenticating.
    Starting,
    /// Loops are polling.
    Running,
    /// Loops are being cancelled.
    Stopping,
}

impl OrchestratorState {
    /// Get the state as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from orchestrator lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the attempt.
        state: OrchestratorState,
    },

    /// Connecting or authenticating failed; the orchestrator is `Stopped`.
    #[error("start failed during {phase}: {source}")]
    StartFailed {
        /// `initialize` or `authenticate`.
        phase: &'static str,
        /// Underlying data source error.
        source: SourceError,
    },
}

// =============================================================================
// Orchestrator
// =============================================================================

struct RunningLoops {
    cancel: CancellationToken,
    tasks: Vec<(LoopName, JoinHandle<()>)>,
}

/// Resets `Starting` back to `Stopped` unless disarmed.
struct StartGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    const fn new(state: &'a Mutex<OrchestratorState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = OrchestratorState::Stopped;
            tracing::warn!("Streaming orchestrator start abandoned before completion");
        }
    }
}

/// Drives the data source and publishes snapshots to subscribers.
pub struct StreamingOrchestrator {
    source: Arc<dyn MarketDataSource>,
    publisher: Arc<dyn EventPublisher>,
    credentials: Credentials,
    settings: PollingSettings,
    state: Mutex<OrchestratorState>,
    health: [Arc<LoopHealth>; 3],
    loops: Mutex<Option<RunningLoops>>,
}

/// Shared orchestrator reference.
pub type SharedOrchestrator = Arc<StreamingOrchestrator>;

impl StreamingOrchestrator {
    /// Create a stopped orchestrator.
    #[must_use]
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        publisher: Arc<dyn EventPublisher>,
        credentials: Credentials,
        settings: PollingSettings,
    ) -> Self {
        let health = LoopName::all()
            .map(|name| Arc::new(LoopHealth::new(name, settings.degraded_after)));
        Self {
            source,
            publisher,
            credentials,
            settings,
            state: Mutex::new(OrchestratorState::Stopped),
            health,
            loops: Mutex::new(None),
        }
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        *self.state.lock()
    }

    /// Check whether the loops are polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == OrchestratorState::Running
    }

    /// Get the polling settings.
    #[must_use]
    pub const fn settings(&self) -> &PollingSettings {
        &self.settings
    }

    /// Snapshot the health of every loop.
    #[must_use]
    pub fn loop_health(&self) -> Vec<LoopHealthSnapshot> {
        self.health.iter().map(|h| h.snapshot()).collect()
    }

    /// Check whether any loop is degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.health.iter().any(|h| h.is_degraded())
    }

    /// Connect, authenticate and spawn the polling loops.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the orchestrator is `Stopped`, and
    /// `StartFailed` if the data source cannot be initialized or
    /// authenticated. After `StartFailed` the orchestrator is `Stopped` and
    /// may be started again.
    ///
    /// Dropping the returned future before it resolves also leaves the
    /// orchestrator `Stopped`.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        {
            let mut state = self.state.lock();
            if *state != OrchestratorState::Stopped {
                return Err(OrchestratorError::InvalidState {
                    operation: "start",
                    state: *state,
                });
            }
            *state = OrchestratorState::Starting;
        }
        let guard = StartGuard::new(&self.state);

        tracing::info!(symbols = ?self.settings.symbols, "Starting streaming orchestrator");

        if let Err(e) = self.connect().await {
            tracing::error!(error = %e, "Streaming orchestrator failed to start");
            self.source.shutdown().await;
            *self.state.lock() = OrchestratorState::Stopped;
            guard.disarm();
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let tasks = self
            .health
            .iter()
            .map(|health| {
                health.reset();
                let polling_loop = self.polling_loop(Arc::clone(health));
                let name = polling_loop.name;
                (name, tokio::spawn(polling_loop.run(cancel.clone())))
            })
            .collect();

        *self.loops.lock() = Some(RunningLoops { cancel, tasks });
        *self.state.lock() = OrchestratorState::Running;
        guard.disarm();

        tracing::info!("Streaming orchestrator running");
        Ok(())
    }

    /// Cancel the polling loops and close the data source session.
    ///
    /// A no-op when already `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while `Starting` or `Stopping`.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        {
            let mut state = self.state.lock();
            match *state {
                OrchestratorState::Stopped => return Ok(()),
                OrchestratorState::Running => *state = OrchestratorState::Stopping,
                other => {
                    return Err(OrchestratorError::InvalidState {
                        operation: "stop",
                        state: other,
                    });
                }
            }
        }

        tracing::info!("Stopping streaming orchestrator");

        let loops = self.loops.lock().take();
        if let Some(RunningLoops { cancel, tasks }) = loops {
            cancel.cancel();
            let deadline = tokio::time::Instant::now() + self.settings.shutdown_grace;
            for (name, mut handle) in tasks {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(loop_name = %name, error = %e, "Polling loop ended abnormally");
                    }
                    Err(_) => {
                        tracing::warn!(
                            loop_name = %name,
                            grace_ms = self.settings.shutdown_grace.as_millis(),
                            "Polling loop did not stop in time, aborting"
                        );
                        handle.abort();
                    }
                }
            }
        }

        self.source.shutdown().await;
        *self.state.lock() = OrchestratorState::Stopped;

        tracing::info!("Streaming orchestrator stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<(), OrchestratorError> {
        self.source
            .initialize()
            .await
            .map_err(|source| OrchestratorError::StartFailed {
                phase: "initialize",
                source,
            })?;

        self.source
            .authenticate(&self.credentials)
            .await
            .map_err(|source| OrchestratorError::StartFailed {
                phase: "authenticate",
                source,
            })?;

        tracing::info!(server = self.credentials.server(), "Data source session established");
        Ok(())
    }

    fn polling_loop(&self, health: Arc<LoopHealth>) -> PollingLoop {
        let name = health.name();
        let (cadence, job) = match name {
            LoopName::Quotes => (
                self.settings.quotes_interval,
                Job::Quotes(self.settings.symbols.clone()),
            ),
            LoopName::Trades => (self.settings.trades_interval, Job::Trades),
            LoopName::History => (
                self.settings.history_interval,
                Job::History(self.settings.history_window),
            ),
        };

        PollingLoop {
            name,
            warmup: self.settings.warmup,
            cadence,
            job,
            source: Arc::clone(&self.source),
            publisher: Arc::clone(&self.publisher),
            health,
        }
    }
}

impl Drop for StreamingOrchestrator {
    fn drop(&mut self) {
        if let Some(loops) = self.loops.get_mut().take() {
            loops.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for StreamingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingOrchestrator")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Polling Loop
// =============================================================================

enum Job {
    Quotes(Vec<Symbol>),
    Trades,
    History(Duration),
}

struct PollingLoop {
    name: LoopName,
    warmup: Duration,
    cadence: Duration,
    job: Job,
    source: Arc<dyn MarketDataSource>,
    publisher: Arc<dyn EventPublisher>,
    health: Arc<LoopHealth>,
}

impl PollingLoop {
    async fn run(self, cancel: CancellationToken) {
        tracing::debug!(
            loop_name = %self.name,
            cadence_ms = self.cadence.as_millis(),
            "Polling loop started"
        );

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(loop_name = %self.name, "Polling loop cancelled during warm-up");
                return;
            }
            () = tokio::time::sleep(self.warmup) => {}
        }

        while !cancel.is_cancelled() {
            let started = tokio::time::Instant::now();
            match self.poll_once().await {
                Ok(published) => {
                    tracing::trace!(loop_name = %self.name, published, "Polling cycle complete");
                    self.health.record_success();
                }
                Err(e) => {
                    tracing::warn!(loop_name = %self.name, error = %e, "Polling cycle failed");
                    metrics::record_fetch_failure(self.name);
                    self.health.record_failure(&e.to_string());
                }
            }
            metrics::record_fetch_duration(self.name, started.elapsed());

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.cadence) => {}
            }
        }

        tracing::debug!(loop_name = %self.name, "Polling loop stopped");
    }

    /// Fetch one snapshot and publish it. Returns the number of events published.
    async fn poll_once(&self) -> Result<usize, SourceError> {
        match &self.job {
            Job::Quotes(symbols) => {
                let quotes = self.source.fetch_quotes(symbols).await?;
                let count = quotes.len();
                for quote in quotes {
                    self.publisher.publish(StreamEvent::MarketDataUpdate(quote));
                }
                Ok(count)
            }
            Job::Trades => {
                let trades = self.source.fetch_active_trades().await?;
                self.publisher.publish(StreamEvent::TradesUpdate(trades));
                Ok(1)
            }
            Job::History(window) => {
                let deals = self.source.fetch_recent_deals(*window).await?;
                self.publisher.publish(StreamEvent::HistoryUpdate(deals));
                Ok(1)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
