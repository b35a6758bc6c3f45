//! MT5 Terminal Bridge Client
//!
//! [`MarketDataSource`] implementation backed by an HTTP bridge running next
//! to a MetaTrader 5 terminal.
//!
//! The terminal holds a single session that does not tolerate concurrent
//! use, so every call takes the session lock for its whole duration. The
//! three polling loops therefore queue up here instead of coordinating
//! among themselves.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::messages::{
    DealMessage, InitializeResponse, LoginRequest, LoginResponse, PositionMessage, RateBarMessage,
    TickMessage, build_quote,
};
use crate::application::ports::{Credentials, MarketDataSource, SourceError};
use crate::domain::market::{ActiveTrade, HistoricalDeal, Quote, Symbol};
use crate::infrastructure::config::Mt5Settings;
use crate::infrastructure::metrics;

#[derive(Debug, Default)]
struct Session {
    initialized: bool,
    authenticated: bool,
}

impl Session {
    const fn ensure_ready(&self) -> Result<(), SourceError> {
        if self.initialized && self.authenticated {
            Ok(())
        } else {
            Err(SourceError::NotConnected)
        }
    }
}

/// HTTP client for the MT5 terminal bridge.
#[derive(Debug)]
pub struct Mt5BridgeSource {
    client: Client,
    base_url: String,
    session: Mutex<Session>,
}

impl Mt5BridgeSource {
    /// Create a client for the bridge described by `settings`.
    ///
    /// No request is made until [`MarketDataSource::initialize`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &Mt5Settings) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| SourceError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.bridge_url.trim_end_matches('/').to_string(),
            session: Mutex::new(Session::default()),
        })
    }

    /// Get the bridge base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(request_error)?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(request_error)?;
        decode(response).await
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, SourceError> {
        let tick: TickMessage = self.get(&format!("/symbols/{symbol}/tick"), &[]).await?;
        let bars: Vec<RateBarMessage> = self
            .get(
                &format!("/symbols/{symbol}/rates"),
                &[("timeframe", "D1".to_string()), ("count", "1".to_string())],
            )
            .await?;
        let day_bar = bars
            .last()
            .ok_or_else(|| SourceError::Decode("no daily bar".to_string()))?;

        build_quote(symbol, &tick, day_bar).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MarketDataSource for Mt5BridgeSource {
    async fn initialize(&self) -> Result<(), SourceError> {
        let mut session = self.session.lock().await;

        let response: InitializeResponse = self
            .post("/initialize", &serde_json::json!({}))
            .await
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

        if !response.ok {
            return Err(SourceError::ConnectionFailed(
                response
                    .error
                    .unwrap_or_else(|| "terminal refused initialization".to_string()),
            ));
        }

        session.initialized = true;
        session.authenticated = false;
        tracing::info!(bridge = %self.base_url, "MT5 terminal initialized");
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SourceError> {
        let mut session = self.session.lock().await;
        if !session.initialized {
            return Err(SourceError::NotConnected);
        }

        let login = credentials.account().trim().parse::<u64>().map_err(|_| {
            SourceError::AuthenticationFailed("account must be a numeric login".to_string())
        })?;
        let request = LoginRequest {
            login,
            password: credentials.secret(),
            server: credentials.server(),
        };

        let response: LoginResponse = self
            .post("/login", &request)
            .await
            .map_err(|e| SourceError::AuthenticationFailed(e.to_string()))?;

        if !response.authorized {
            return Err(SourceError::AuthenticationFailed(
                response
                    .error
                    .unwrap_or_else(|| "login rejected".to_string()),
            ));
        }

        session.authenticated = true;
        tracing::info!(server = credentials.server(), "MT5 account authorized");
        Ok(())
    }

    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, SourceError> {
        let session = self.session.lock().await;
        session.ensure_ready()?;

        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.fetch_quote(symbol).await {
                Ok(quote) => quotes.push(quote),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Skipping symbol");
                    metrics::record_symbol_skipped(symbol);
                }
            }
        }
        drop(session);

        Ok(quotes)
    }

    async fn fetch_active_trades(&self) -> Result<Vec<ActiveTrade>, SourceError> {
        let session = self.session.lock().await;
        session.ensure_ready()?;

        let positions: Vec<serde_json::Value> = self.get("/positions", &[]).await?;
        drop(session);

        Ok(convert_records::<PositionMessage, ActiveTrade>(positions, "position"))
    }

    async fn fetch_recent_deals(
        &self,
        window: Duration,
    ) -> Result<Vec<HistoricalDeal>, SourceError> {
        let session = self.session.lock().await;
        session.ensure_ready()?;

        let to = Utc::now();
        let from = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| to.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let deals: Vec<serde_json::Value> = self
            .get(
                "/history/deals",
                &[
                    ("from", from.timestamp().to_string()),
                    ("to", to.timestamp().to_string()),
                ],
            )
            .await?;
        drop(session);

        Ok(convert_records::<DealMessage, HistoricalDeal>(deals, "deal"))
    }

    async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if !session.initialized {
            return;
        }

        match self
            .post::<serde_json::Value, _>("/shutdown", &serde_json::json!({}))
            .await
        {
            Ok(_) => tracing::info!("MT5 terminal session closed"),
            Err(e) => tracing::warn!(error = %e, "MT5 shutdown failed"),
        }
        *session = Session::default();
    }
}

/// Decode and convert each record on its own; a bad record is skipped.
fn convert_records<M, T>(records: Vec<serde_json::Value>, kind: &'static str) -> Vec<T>
where
    M: DeserializeOwned,
    T: TryFrom<M>,
    T::Error: std::fmt::Display,
{
    records
        .into_iter()
        .filter_map(|raw| {
            let ticket = raw.get("ticket").and_then(serde_json::Value::as_u64);
            serde_json::from_value::<M>(raw)
                .map_err(|e| e.to_string())
                .and_then(|msg| T::try_from(msg).map_err(|e| e.to_string()))
                .inspect_err(|error| {
                    tracing::debug!(kind, ticket = ?ticket, error = %error, "Skipping record");
                })
                .ok()
        })
        .collect()
}

fn request_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Request(format!("bridge request timed out: {e}"))
    } else {
        SourceError::Request(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let status = response.status();
    let body = response.text().await.map_err(request_error)?;

    if !status.is_success() {
        return Err(SourceError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let body = if body.trim().is_empty() { "null" } else { &body };
    serde_json::from_str(body).map_err(|e| SourceError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::market::TradeSide;

    fn credentials() -> Credentials {
        Credentials::new(
            "5012345".to_string(),
            "secret".to_string(),
            "Broker-Demo".to_string(),
        )
    }

    fn source_for(server: &MockServer) -> Mt5BridgeSource {
        Mt5BridgeSource::new(&Mt5Settings {
            bridge_url: server.uri(),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/initialize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"authorized": true})))
            .mount(server)
            .await;
    }

    async fn connected(server: &MockServer) -> Mt5BridgeSource {
        mount_session(server).await;
        let source = source_for(server);
        source.initialize().await.unwrap();
        source.authenticate(&credentials()).await.unwrap();
        source
    }

    async fn mount_symbol(server: &MockServer, symbol: &str, bid: f64) {
        Mock::given(method("GET"))
            .and(path(format!("/symbols/{symbol}/tick")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "time": 1_700_000_000, "bid": bid, "ask": bid + 1.0, "last": bid
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/symbols/{symbol}/rates")))
            .and(query_param("timeframe", "D1"))
            .and(query_param("count", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "time": 1_699_920_000, "open": bid, "high": bid + 5.0, "low": bid - 5.0,
                "close": bid, "tick_volume": 100, "spread": 12, "real_volume": 0.0
            }])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn login_sends_credential_triple() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initialize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_json(json!({
                "login": 5_012_345, "password": "secret", "server": "Broker-Demo"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"authorized": true})))
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server);
        source.initialize().await.unwrap();
        source.authenticate(&credentials()).await.unwrap();
    }

    #[tokio::test]
    async fn initialize_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initialize"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "IPC timeout"})),
            )
            .mount(&server)
            .await;

        let err = source_for(&server).initialize().await.unwrap_err();
        assert_eq!(err, SourceError::ConnectionFailed("IPC timeout".to_string()));
    }

    #[tokio::test]
    async fn unreachable_bridge_fails_to_connect() {
        let source = Mt5BridgeSource::new(&Mt5Settings {
            bridge_url: "http://127.0.0.1:1".to_string(),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap();
        assert!(matches!(
            source.initialize().await,
            Err(SourceError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initialize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"authorized": false, "error": "invalid account"})),
            )
            .mount(&server)
            .await;

        let source = source_for(&server);
        source.initialize().await.unwrap();
        let err = source.authenticate(&credentials()).await.unwrap_err();
        assert_eq!(
            err,
            SourceError::AuthenticationFailed("invalid account".to_string())
        );
        assert_eq!(
            source.fetch_active_trades().await.unwrap_err(),
            SourceError::NotConnected
        );
    }

    #[tokio::test]
    async fn non_numeric_login_rejected_locally() {
        let server = MockServer::start().await;
        mount_session(&server).await;
        let source = source_for(&server);
        source.initialize().await.unwrap();

        let creds = Credentials::new("abc".to_string(), "pw".to_string(), "S".to_string());
        assert!(matches!(
            source.authenticate(&creds).await,
            Err(SourceError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn queries_before_connect_fail() {
        let server = MockServer::start().await;
        let source = source_for(&server);

        assert_eq!(
            source.authenticate(&credentials()).await.unwrap_err(),
            SourceError::NotConnected
        );
        assert_eq!(
            source.fetch_quotes(&["BTCUSD".to_string()]).await.unwrap_err(),
            SourceError::NotConnected
        );
        assert_eq!(
            source
                .fetch_recent_deals(Duration::from_secs(3600))
                .await
                .unwrap_err(),
            SourceError::NotConnected
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_quotes_skips_failing_symbol() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        mount_symbol(&server, "BTCUSD", 50_000.0).await;
        mount_symbol(&server, "ETHUSD", 3_000.0).await;
        Mock::given(method("GET"))
            .and(path("/symbols/NOPE/tick"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown symbol"))
            .mount(&server)
            .await;

        let symbols = ["BTCUSD", "NOPE", "ETHUSD"].map(String::from);
        let quotes = source.fetch_quotes(&symbols).await.unwrap();

        let got: Vec<_> = quotes.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(got, ["BTCUSD", "ETHUSD"]);
        assert_eq!(quotes[0].bid, 50_000.0);
        assert_eq!(quotes[0].day_bar.spread, 12);
    }

    #[tokio::test]
    async fn fetch_quotes_skips_symbol_without_bar() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/symbols/XAUUSD/tick"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"time": 1_700_000_000, "bid": 1.0, "ask": 2.0})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/symbols/XAUUSD/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let quotes = source.fetch_quotes(&["XAUUSD".to_string()]).await.unwrap();
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn positions_map_and_skip_unknown_types() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "ticket": 11, "time": 1_700_000_000, "type": 0, "volume": 0.1,
                    "price_open": 100.0, "sl": 0.0, "tp": 0.0, "price_current": 0.0,
                    "profit": -3.0, "symbol": "BTCUSD", "comment": "manual"
                },
                {
                    "ticket": 12, "time": 1_700_000_000, "type": 9, "volume": 0.1,
                    "price_open": 1.0, "price_current": 1.0, "symbol": "BTCUSD"
                }
            ])))
            .mount(&server)
            .await;

        let trades = source.fetch_active_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].ticket, 11);
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(trades[0].change, 0.0);
        assert_eq!(trades[0].identity, "manual");
    }

    #[tokio::test]
    async fn recent_deals_query_trailing_window() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/history/deals"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "ticket": 21, "time": 1_700_000_000, "type": 1, "volume": 0.2,
                    "price": 2000.0, "commission": -0.5, "swap": 0.0, "profit": 15.0,
                    "symbol": "ETHUSD", "comment": "[tp 2000]", "reason": 5
                },
                { "ticket": 22, "time": 1_700_000_000, "type": 2, "profit": 100.0 }
            ])))
            .mount(&server)
            .await;

        let deals = source
            .fetch_recent_deals(Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].reason, 5);
        assert_eq!(deals[0].side, TradeSide::Sell);

        let requests = server.received_requests().await.unwrap();
        let deals_request = requests
            .iter()
            .find(|r| r.url.path() == "/history/deals")
            .unwrap();
        let params: std::collections::HashMap<_, _> =
            deals_request.url.query_pairs().into_owned().collect();
        let from: i64 = params["from"].parse().unwrap();
        let to: i64 = params["to"].parse().unwrap();
        assert_eq!(to - from, 24 * 3600);
    }

    #[tokio::test]
    async fn malformed_records_skipped_individually() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "ticket": 31, "time": 1_700_000_000, "type": 300, "volume": 0.1,
                    "price_open": 1.0, "price_current": 1.0, "symbol": "BTCUSD"
                },
                {
                    "ticket": 32, "time": 1_700_000_000, "type": 0, "volume": 0.1,
                    "price_open": 1.0, "symbol": "BTCUSD"
                },
                {
                    "ticket": 33, "time": 1_700_000_000, "type": 1, "volume": 0.1,
                    "price_open": 10.0, "price_current": 8.0, "symbol": "ETHUSD"
                }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/deals"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "ticket": 41, "time": 1.5e9, "type": 0, "symbol": "BTCUSD" },
                { "ticket": 42, "time": 1e30, "type": 0, "symbol": "BTCUSD" },
                { "ticket": 43, "time": 1_700_000_000, "type": 0, "symbol": "BTCUSD" }
            ])))
            .mount(&server)
            .await;

        let trades = source.fetch_active_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].ticket, 33);

        let deals = source
            .fetch_recent_deals(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].ticket, 43);
    }

    #[tokio::test]
    async fn error_status_is_api_error() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("terminal busy"))
            .mount(&server)
            .await;

        assert_eq!(
            source.fetch_active_trades().await.unwrap_err(),
            SourceError::Api {
                status: 503,
                message: "terminal busy".to_string()
            }
        );
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            source.fetch_active_trades().await,
            Err(SourceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_closes_session() {
        let server = MockServer::start().await;
        let source = connected(&server).await;
        Mock::given(method("POST"))
            .and(path("/shutdown"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        source.shutdown().await;
        assert_eq!(
            source.fetch_active_trades().await.unwrap_err(),
            SourceError::NotConnected
        );
        // Second shutdown is a no-op.
        source.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_calls_are_serialized() {
        let server = MockServer::start().await;
        let source = Arc::new(connected(&server).await);
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let a = tokio::spawn({
            let source = Arc::clone(&source);
            async move { source.fetch_active_trades().await }
        });
        let b = tokio::spawn({
            let source = Arc::clone(&source);
            async move { source.fetch_active_trades().await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
