//! Courtside: paper-trading engine for NBA prediction markets.
//!
//! For each tracked game the engine ingests the exchange orderbook
//! stream, polls the live scoreboard and sportsbook odds, fuses them
//! into a single per-game view, runs the strategy set over that view at
//! a fixed cadence, and routes emitted signals through a risk gate into
//! a deterministic simulated fill and position ledger.
//!
//! ## Modules
//!
//! - `config`: configuration loading and validation
//! - `storage`: relational write-through store
//! - `state`: the fused per-game view strategies consume
//! - `aggregator`: game lifecycles, pollers, event fan-out
//! - `strategy` / `engine`: the strategy kinds and their evaluation loop
//! - `risk`: stateful pre-trade validation and accounting
//! - `executor` / `pnl`: simulated fills and the position book

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod executor;
pub mod pnl;
pub mod risk;
pub mod state;
pub mod storage;
pub mod strategy;

pub use aggregator::{Aggregator, AggregatorEvent, EventKind, Subscriber};
pub use config::{BotConfig, RiskLimitsConfig};
pub use engine::{SignalHandler, StrategyEngine};
pub use executor::{ExecutionEngine, ExecutionError, Position, SimulatedOrder, StrategyStats};
pub use risk::{RiskCheck, RiskGate, RiskLimitKind};
pub use state::{ConsensusOdds, GameState, MarketState, NbaLiveState, OddsQuote};
pub use storage::{Store, StorageError};
pub use strategy::{Strategy, StrategyInstance, TradeSignal};
