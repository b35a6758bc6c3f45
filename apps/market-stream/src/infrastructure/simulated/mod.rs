//! Simulated Market Data Source
//!
//! In-process [`MarketDataSource`] that needs no terminal. Quotes follow a
//! seeded random walk per symbol, open positions track the walk, and deals
//! are served from a fixed list filtered by the requested window.
//!
//! Faults can be switched on per operation at any time, which is how the
//! orchestrator's isolation guarantees are exercised end to end. Every call
//! is counted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::application::ports::{Credentials, MarketDataSource, SourceError};
use crate::domain::market::{
    ActiveTrade, DayBar, HistoricalDeal, Quote, Symbol, percent_change,
};
use crate::infrastructure::metrics;

/// Per-operation fault switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// `initialize` fails with `ConnectionFailed`.
    pub fail_initialize: bool,
    /// `authenticate` fails with `AuthenticationFailed`.
    pub fail_authenticate: bool,
    /// `fetch_quotes` fails outright.
    pub fail_quotes: bool,
    /// `fetch_active_trades` fails.
    pub fail_trades: bool,
    /// `fetch_recent_deals` fails.
    pub fail_history: bool,
    /// Symbols skipped as if the platform had no data for them.
    pub omit_symbols: HashSet<Symbol>,
    /// `fetch_quotes` succeeds with no quotes.
    pub empty_quotes: bool,
}

/// Number of calls per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `initialize` calls.
    pub initialize: u64,
    /// `authenticate` calls.
    pub authenticate: u64,
    /// `fetch_quotes` calls.
    pub quotes: u64,
    /// `fetch_active_trades` calls.
    pub trades: u64,
    /// `fetch_recent_deals` calls.
    pub history: u64,
    /// `shutdown` calls.
    pub shutdown: u64,
}

#[derive(Debug, Default)]
struct Counters {
    initialize: AtomicU64,
    authenticate: AtomicU64,
    quotes: AtomicU64,
    trades: AtomicU64,
    history: AtomicU64,
    shutdown: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CallCounts {
        CallCounts {
            initialize: self.initialize.load(Ordering::Relaxed),
            authenticate: self.authenticate.load(Ordering::Relaxed),
            quotes: self.quotes.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            history: self.history.load(Ordering::Relaxed),
            shutdown: self.shutdown.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Walk {
    price: f64,
    day_bar: DayBar,
}

impl Walk {
    fn new(price: f64) -> Self {
        Self {
            price,
            day_bar: DayBar {
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
                tick_volume: 0,
                spread: 0,
            },
        }
    }

    fn step(&mut self, rng: &mut StdRng) {
        self.price *= 1.0 + rng.random_range(-0.0005..0.0005);
        self.day_bar.close = self.price;
        self.day_bar.high = self.day_bar.high.max(self.price);
        self.day_bar.low = self.day_bar.low.min(self.price);
        self.day_bar.tick_volume += 1;
    }
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    walks: HashMap<Symbol, Walk>,
    positions: Vec<ActiveTrade>,
    deals: Vec<HistoricalDeal>,
    initialized: bool,
    authenticated: bool,
}

impl SimState {
    fn ensure_ready(&self) -> Result<(), SourceError> {
        if self.initialized && self.authenticated {
            Ok(())
        } else {
            Err(SourceError::NotConnected)
        }
    }

    fn walk(&mut self, symbol: &Symbol) -> &mut Walk {
        self.walks
            .entry(symbol.clone())
            .or_insert_with(|| Walk::new(starting_price(symbol)))
    }
}

/// Seed price for well-known symbols, 100 for anything else.
fn starting_price(symbol: &str) -> f64 {
    match symbol {
        "BTCUSD" => 65_000.0,
        "ETHUSD" => 3_200.0,
        "XAUUSD" => 2_350.0,
        "EURUSD" => 1.085,
        "GBPUSD" => 1.27,
        _ => 100.0,
    }
}

/// Random-walk data source with fault injection.
#[derive(Debug)]
pub struct SimulatedSource {
    state: Mutex<SimState>,
    faults: RwLock<FaultPlan>,
    counters: Counters,
}

impl SimulatedSource {
    /// Create a source whose random walk is fully determined by `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(SimState {
                rng: StdRng::seed_from_u64(seed),
                walks: HashMap::new(),
                positions: Vec::new(),
                deals: Vec::new(),
                initialized: false,
                authenticated: false,
            }),
            faults: RwLock::new(FaultPlan::default()),
            counters: Counters::default(),
        }
    }

    /// Serve these open positions; their current price follows the walk.
    #[must_use]
    pub fn with_positions(self, positions: Vec<ActiveTrade>) -> Self {
        self.state.lock().positions = positions;
        self
    }

    /// Serve these deals, filtered by the requested window.
    #[must_use]
    pub fn with_deals(self, deals: Vec<HistoricalDeal>) -> Self {
        self.state.lock().deals = deals;
        self
    }

    /// Replace the fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        *self.faults.write() = faults;
    }

    /// Modify the fault plan in place.
    pub fn update_faults(&self, update: impl FnOnce(&mut FaultPlan)) {
        update(&mut self.faults.write());
    }

    /// Get the call counters.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.counters.snapshot()
    }

    fn faults(&self) -> FaultPlan {
        self.faults.read().clone()
    }
}

#[async_trait]
impl MarketDataSource for SimulatedSource {
    async fn initialize(&self) -> Result<(), SourceError> {
        Counters::bump(&self.counters.initialize);
        if self.faults.read().fail_initialize {
            return Err(SourceError::ConnectionFailed(
                "simulated terminal unavailable".to_string(),
            ));
        }

        let mut state = self.state.lock();
        state.initialized = true;
        state.authenticated = false;
        tracing::info!("Simulated source initialized");
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SourceError> {
        Counters::bump(&self.counters.authenticate);
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(SourceError::NotConnected);
        }
        if self.faults.read().fail_authenticate {
            return Err(SourceError::AuthenticationFailed(
                "simulated login rejected".to_string(),
            ));
        }

        state.authenticated = true;
        tracing::info!(server = credentials.server(), "Simulated account authorized");
        Ok(())
    }

    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, SourceError> {
        Counters::bump(&self.counters.quotes);
        let faults = self.faults();
        let mut state = self.state.lock();
        state.ensure_ready()?;

        if faults.fail_quotes {
            return Err(SourceError::Request("simulated quote failure".to_string()));
        }
        if faults.empty_quotes {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if faults.omit_symbols.contains(symbol) {
                tracing::warn!(symbol = %symbol, "Skipping symbol");
                metrics::record_symbol_skipped(symbol);
                continue;
            }

            let SimState { rng, walks, .. } = &mut *state;
            let walk = walks
                .entry(symbol.clone())
                .or_insert_with(|| Walk::new(starting_price(symbol)));
            walk.step(rng);

            let half_spread = walk.price * 0.000_05;
            quotes.push(Quote {
                symbol: symbol.clone(),
                time: now,
                bid: walk.price - half_spread,
                ask: walk.price + half_spread,
                last: walk.price,
                day_bar: walk.day_bar,
            });
        }

        Ok(quotes)
    }

    async fn fetch_active_trades(&self) -> Result<Vec<ActiveTrade>, SourceError> {
        Counters::bump(&self.counters.trades);
        let fail = self.faults.read().fail_trades;
        let mut state = self.state.lock();
        state.ensure_ready()?;

        if fail {
            return Err(SourceError::Request("simulated positions failure".to_string()));
        }

        let mut positions = std::mem::take(&mut state.positions);
        for position in &mut positions {
            position.current_price = state.walk(&position.symbol).price;
            position.change = percent_change(position.open_price, position.current_price);
        }
        state.positions.clone_from(&positions);

        Ok(positions)
    }

    async fn fetch_recent_deals(
        &self,
        window: Duration,
    ) -> Result<Vec<HistoricalDeal>, SourceError> {
        Counters::bump(&self.counters.history);
        let fail = self.faults.read().fail_history;
        let state = self.state.lock();
        state.ensure_ready()?;

        if fail {
            return Err(SourceError::Request("simulated history failure".to_string()));
        }

        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w));
        Ok(state
            .deals
            .iter()
            .filter(|deal| cutoff.is_none_or(|cutoff| deal.time >= cutoff))
            .cloned()
            .collect())
    }

    async fn shutdown(&self) {
        Counters::bump(&self.counters.shutdown);
        let mut state = self.state.lock();
        state.initialized = false;
        state.authenticated = false;
        tracing::info!("Simulated source shut down");
    }
}
