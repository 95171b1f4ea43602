//! Shared types for the Courtside NBA paper-trading engine.
//!
//! CRITICAL: All prices and probabilities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math. Contract prices are integer cents
//! on [0, 100]; probabilities are decimals on [0, 1].

pub mod odds;
pub mod types;

pub use odds::{
    american_to_probability, consensus_probability, edge_percent, expected_value, kelly_fraction,
    price_to_probability, probability_to_american, probability_to_price, remove_vig,
    ConsensusMethod, OddsError,
};
pub use types::{GamePhase, MarketKind, Side, StrategyKind};
