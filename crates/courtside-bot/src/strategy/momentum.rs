//! Momentum scalping.
//!
//! Tracks a bounded mid-price history per market and follows
//! short-horizon moves: a move of at least `min_price_change_cents`
//! over the lookback window trades in the direction of the move,
//! provided the spread is tight enough to take.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::{debug, info};

use courtside_common::{Side, StrategyKind};

use crate::state::{GameState, MarketState};
use crate::strategy::{clamp_confidence, Strategy, StrategyCore, TradeSignal};

/// Observations kept per market.
const MAX_HISTORY_POINTS: usize = 100;

/// Configuration for [`Momentum`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    /// Lookback window in seconds.
    pub lookback_seconds: i64,
    /// Minimum move over the window, in cents.
    pub min_price_change_cents: Decimal,
    pub position_size: u32,
    pub cooldown_minutes: i64,
    /// Maximum acceptable YES spread, in cents.
    pub max_spread_cents: Decimal,
    pub market_types: Vec<String>,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback_seconds: 120,
            min_price_change_cents: dec!(5),
            position_size: 10,
            cooldown_minutes: 3,
            max_spread_cents: dec!(3),
            market_types: vec![
                "moneyline".to_string(),
                "spread".to_string(),
                "total".to_string(),
            ],
        }
    }
}

/// One mid-price observation.
#[derive(Debug, Clone, Copy)]
struct PricePoint {
    price: Decimal,
    at: DateTime<Utc>,
}

/// Momentum strategy.
pub struct Momentum {
    config: MomentumConfig,
    core: StrategyCore,
    /// Ticker -> bounded price history.
    history: HashMap<String, VecDeque<PricePoint>>,
}

impl Momentum {
    pub fn new(strategy_id: String, config: MomentumConfig) -> Self {
        let core = StrategyCore::new(strategy_id, config.cooldown_minutes);
        Self {
            config,
            core,
            history: HashMap::new(),
        }
    }

    pub(crate) fn evaluate_at(&mut self, state: &GameState, now: DateTime<Utc>) -> Vec<TradeSignal> {
        let mut signals = Vec::new();
        let tickers: Vec<String> = state.markets.keys().cloned().collect();
        for ticker in tickers {
            let market = &state.markets[&ticker];
            self.observe(market, now);
            if let Some(signal) = self.evaluate_market(state, market, now) {
                self.core.record_trade(&signal.market_ticker, now);
                self.core.record_signal(signal.clone());
                signals.push(signal);
            }
        }
        signals
    }

    /// Append the current mid to the history; undefined mids are skipped.
    fn observe(&mut self, market: &MarketState, now: DateTime<Utc>) {
        let Some(mid) = market.mid() else {
            return;
        };
        if mid <= Decimal::ZERO {
            return;
        }
        let history = self
            .history
            .entry(market.ticker.clone())
            .or_insert_with(|| VecDeque::with_capacity(MAX_HISTORY_POINTS));
        if history.len() == MAX_HISTORY_POINTS {
            history.pop_front();
        }
        history.push_back(PricePoint { price: mid, at: now });
    }

    /// Observation closest to `now - lookback`, accepted only when it
    /// falls within half the lookback window of the target.
    fn historical_price(&self, ticker: &str, now: DateTime<Utc>) -> Option<Decimal> {
        let history = self.history.get(ticker)?;
        if history.len() < 2 {
            return None;
        }
        let target = now - ChronoDuration::seconds(self.config.lookback_seconds);

        let mut best: Option<(i64, Decimal)> = None;
        for point in history {
            let distance = (point.at - target).num_seconds().abs();
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, point.price));
            }
        }

        let (distance, price) = best?;
        if distance * 2 <= self.config.lookback_seconds {
            Some(price)
        } else {
            None
        }
    }

    fn evaluate_market(
        &self,
        state: &GameState,
        market: &MarketState,
        now: DateTime<Utc>,
    ) -> Option<TradeSignal> {
        if !self.config.market_types.iter().any(|t| t == market.kind.family()) {
            return None;
        }
        if !self.core.can_trade(&market.ticker, now) {
            return None;
        }

        let book = market.orderbook.as_ref()?;
        let current = market.mid()?;
        if current <= Decimal::ZERO {
            return None;
        }

        let historical = self.historical_price(&market.ticker, now)?;
        let change = current - historical;
        if change.abs() < self.config.min_price_change_cents {
            return None;
        }

        // Wide books are not worth taking momentum into.
        if let Some(spread) = book.spread() {
            if spread > self.config.max_spread_cents {
                debug!(ticker = %market.ticker, %spread, "spread too wide");
                return None;
            }
        }

        let side = if change > Decimal::ZERO { Side::Yes } else { Side::No };
        let entry = book.ask_for(side)?;
        if entry <= Decimal::ZERO {
            return None;
        }

        let direction = if change > Decimal::ZERO { "up" } else { "down" };
        let reason = format!(
            "Price moved {} {:.1}c in {}s, following momentum",
            direction,
            change.abs(),
            self.config.lookback_seconds,
        );

        info!(
            ticker = %market.ticker,
            %side,
            change = %change,
            "momentum signal"
        );

        Some(TradeSignal {
            strategy_id: self.core.strategy_id.clone(),
            strategy_kind: StrategyKind::Momentum,
            game_id: state.game_id.clone(),
            market_ticker: market.ticker.clone(),
            side,
            quantity: self.config.position_size,
            // A 10c move is full confidence.
            confidence: clamp_confidence(change.abs() / dec!(10)),
            reason,
            metadata: serde_json::json!({
                "current_mid_cents": current.to_string(),
                "historical_mid_cents": historical.to_string(),
                "change_cents": change.to_string(),
                "lookback_seconds": self.config.lookback_seconds,
                "entry_price_cents": entry.to_string(),
            }),
            limit_price: None,
            emitted_at: now,
        })
    }

    /// Drop all history (used when a game unloads).
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl Strategy for Momentum {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }

    fn evaluate(&mut self, state: &GameState) -> Vec<TradeSignal> {
        self.evaluate_at(state, Utc::now())
    }

    fn recent_signals(&self) -> Vec<TradeSignal> {
        self.core.recent_signals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_common::MarketKind;
    use courtside_market::BookTop;

    fn book(yes_bid: Decimal, yes_ask: Decimal) -> BookTop {
        BookTop {
            yes_bid: Some(yes_bid),
            yes_ask: Some(yes_ask),
            no_bid: Some(dec!(100) - yes_ask),
            no_ask: Some(dec!(100) - yes_bid),
            ..Default::default()
        }
    }

    fn state_with_book(yes_bid: Decimal, yes_ask: Decimal) -> GameState {
        let mut state = GameState::new(
            "game-1".to_string(),
            "KXNBAGAME-26JAN06DALSAC".to_string(),
            "SAC".to_string(),
            "DAL".to_string(),
            Utc::now(),
        );
        state.add_market(MarketState {
            id: None,
            ticker: "M".to_string(),
            kind: MarketKind::MoneylineHome,
            strike: None,
            team: None,
            side: None,
            orderbook: Some(book(yes_bid, yes_ask)),
        });
        state
    }

    #[test]
    fn test_upward_momentum_emits_yes() {
        // 40c two minutes ago, 46c now, spread 2c.
        let mut strategy = Momentum::new("s".to_string(), MomentumConfig::default());
        let t0 = Utc::now();

        // Seed history: mid 40 at t0 and shortly after (two points are
        // required before a lookback can resolve).
        let old = state_with_book(dec!(39), dec!(41));
        strategy.evaluate_at(&old, t0);
        strategy.evaluate_at(&old, t0 + ChronoDuration::seconds(2));

        // 118 seconds later the mid is 46.
        let fresh = state_with_book(dec!(45), dec!(47));
        let signals = strategy.evaluate_at(&fresh, t0 + ChronoDuration::seconds(118));

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.side, Side::Yes);
        assert_eq!(signal.quantity, 10);
        assert_eq!(signal.metadata["change_cents"], "6");
        // 6c move over a 10c scale.
        assert_eq!(signal.confidence, dec!(0.6));
    }

    #[test]
    fn test_downward_momentum_emits_no() {
        let mut strategy = Momentum::new("s".to_string(), MomentumConfig::default());
        let t0 = Utc::now();

        let old = state_with_book(dec!(45), dec!(47));
        strategy.evaluate_at(&old, t0);
        strategy.evaluate_at(&old, t0 + ChronoDuration::seconds(2));

        let fresh = state_with_book(dec!(39), dec!(41));
        let signals = strategy.evaluate_at(&fresh, t0 + ChronoDuration::seconds(118));

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::No);
        // NO entry = no_ask = 100 - yes_bid.
        assert_eq!(signals[0].metadata["entry_price_cents"], "61");
    }

    #[test]
    fn test_small_move_skipped() {
        let mut strategy = Momentum::new("s".to_string(), MomentumConfig::default());
        let t0 = Utc::now();

        let old = state_with_book(dec!(41), dec!(43));
        strategy.evaluate_at(&old, t0);
        strategy.evaluate_at(&old, t0 + ChronoDuration::seconds(2));

        // 4c move, under the 5c floor.
        let fresh = state_with_book(dec!(45), dec!(47));
        assert!(strategy
            .evaluate_at(&fresh, t0 + ChronoDuration::seconds(118))
            .is_empty());
    }

    #[test]
    fn test_wide_spread_skipped() {
        let mut config = MomentumConfig::default();
        config.max_spread_cents = dec!(3);
        let mut strategy = Momentum::new("s".to_string(), config);
        let t0 = Utc::now();

        let old = state_with_book(dec!(39), dec!(41));
        strategy.evaluate_at(&old, t0);
        strategy.evaluate_at(&old, t0 + ChronoDuration::seconds(2));

        // Big move but a 6c spread.
        let fresh = state_with_book(dec!(43), dec!(49));
        assert!(strategy
            .evaluate_at(&fresh, t0 + ChronoDuration::seconds(118))
            .is_empty());
    }

    #[test]
    fn test_stale_history_outside_half_window_skipped() {
        let mut strategy = Momentum::new("s".to_string(), MomentumConfig::default());
        let t0 = Utc::now();

        let old = state_with_book(dec!(39), dec!(41));
        strategy.evaluate_at(&old, t0);
        strategy.evaluate_at(&old, t0 + ChronoDuration::seconds(2));

        // 250s later the closest observation is ~130s from the lookback
        // target, beyond half the 120s window.
        let fresh = state_with_book(dec!(45), dec!(47));
        assert!(strategy
            .evaluate_at(&fresh, t0 + ChronoDuration::seconds(250))
            .is_empty());
    }

    #[test]
    fn test_no_signal_without_history() {
        let mut strategy = Momentum::new("s".to_string(), MomentumConfig::default());
        let fresh = state_with_book(dec!(45), dec!(47));
        assert!(strategy.evaluate_at(&fresh, Utc::now()).is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut strategy = Momentum::new("s".to_string(), MomentumConfig::default());
        let t0 = Utc::now();
        let state = state_with_book(dec!(39), dec!(41));
        for i in 0..200 {
            strategy.evaluate_at(&state, t0 + ChronoDuration::seconds(i));
        }
        assert_eq!(strategy.history.get("M").unwrap().len(), MAX_HISTORY_POINTS);
    }

    #[test]
    fn test_cooldown_suppresses_repeat() {
        let mut strategy = Momentum::new("s".to_string(), MomentumConfig::default());
        let t0 = Utc::now();

        let old = state_with_book(dec!(39), dec!(41));
        strategy.evaluate_at(&old, t0);
        strategy.evaluate_at(&old, t0 + ChronoDuration::seconds(2));

        let fresh = state_with_book(dec!(45), dec!(47));
        let first = strategy.evaluate_at(&fresh, t0 + ChronoDuration::seconds(118));
        assert_eq!(first.len(), 1);

        // Still moving, but inside the 3-minute cooldown.
        let repeat = strategy.evaluate_at(&fresh, t0 + ChronoDuration::seconds(150));
        assert!(repeat.is_empty());
    }
}
