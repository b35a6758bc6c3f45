//! MT5 Terminal Adapter
//!
//! Production [`MarketDataSource`](crate::application::ports::MarketDataSource)
//! talking to a MetaTrader 5 terminal through its HTTP bridge.
//!
//! # Endpoints
//!
//! | Operation            | Bridge call                                        |
//! |----------------------|----------------------------------------------------|
//! | initialize           | `POST /initialize`                                 |
//! | authenticate         | `POST /login`                                      |
//! | fetch_quotes         | `GET /symbols/{symbol}/tick`, `GET .../rates`      |
//! | fetch_active_trades  | `GET /positions`                                   |
//! | fetch_recent_deals   | `GET /history/deals?from=&to=`                     |
//! | shutdown             | `POST /shutdown`                                   |

mod bridge;
pub mod messages;

pub use bridge::Mt5BridgeSource;
