//! External-world adapters for the Courtside paper-trading engine.
//!
//! Two independent data sources feed the aggregator:
//!
//! - `stream`: a resilient WebSocket subscription to the exchange,
//!   producing orderbook snapshots and sequenced deltas per market
//!   ticker (`book` holds the per-ticker reconciliation logic).
//! - `sports`: a request/response client for the live scoreboard and
//!   sportsbook odds endpoints, with bounded retries.
//!
//! `ticker` implements the event/market ticker grammar used to match
//! exchange events to scoreboard games.

pub mod book;
pub mod sports;
pub mod stream;
pub mod ticker;

pub use book::{BookState, BookTop};
pub use sports::{
    BoxScore, GameSummary, SportsError, SportsFeed, SportsFeedConfig, VendorOdds,
};
pub use stream::{
    ExchangeStream, ExchangeStreamConfig, NoopSigner, RequestSigner, StreamError, StreamEvent,
    StreamHandle,
};
pub use ticker::{
    normalize_team_abbreviation, parse_event_ticker, parse_market_ticker, EventTickerInfo,
    MarketTickerInfo, TickerError,
};
