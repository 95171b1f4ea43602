//! Sharp line detection.
//!
//! Compares the exchange mid against the per-vendor sportsbook median
//! for moneyline markets and trades persistent divergence: exchange
//! underpriced buys YES at the ask, overpriced buys NO.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::{debug, info};

use courtside_common::{
    consensus_probability, expected_value, kelly_fraction, ConsensusMethod, MarketKind, Side,
    StrategyKind,
};

use crate::state::{GameState, MarketState};
use crate::strategy::{clamp_confidence, Strategy, StrategyCore, TradeSignal};

/// Configuration for [`SharpLine`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SharpLineConfig {
    /// Minimum divergence, in percentage points, to trigger a signal.
    pub threshold_percent: Decimal,
    /// Minimum vendors required for a valid consensus.
    pub min_sample_sportsbooks: usize,
    /// Contracts per trade.
    pub position_size: u32,
    pub cooldown_minutes: i64,
    /// Minimum expected value, percent of cost.
    pub min_ev_percent: Decimal,
    /// Market families this strategy trades.
    pub market_types: Vec<String>,
    pub use_kelly_sizing: bool,
    /// Fraction of full Kelly (quarter Kelly by default).
    pub kelly_fraction: Decimal,
    /// Bankroll expressed in contracts; Kelly sizing allocates a
    /// fraction of this.
    pub bankroll_units: u32,
}

impl Default for SharpLineConfig {
    fn default() -> Self {
        Self {
            threshold_percent: dec!(5.0),
            min_sample_sportsbooks: 3,
            position_size: 10,
            cooldown_minutes: 5,
            min_ev_percent: dec!(2.0),
            market_types: vec!["moneyline".to_string()],
            use_kelly_sizing: false,
            kelly_fraction: dec!(0.25),
            bankroll_units: 100,
        }
    }
}

/// Sharp line divergence strategy.
pub struct SharpLine {
    config: SharpLineConfig,
    core: StrategyCore,
}

impl SharpLine {
    pub fn new(strategy_id: String, config: SharpLineConfig) -> Self {
        let core = StrategyCore::new(strategy_id, config.cooldown_minutes);
        Self { config, core }
    }

    pub(crate) fn evaluate_at(&mut self, state: &GameState, now: DateTime<Utc>) -> Vec<TradeSignal> {
        let mut signals = Vec::new();
        let tickers: Vec<String> = state.markets.keys().cloned().collect();
        for ticker in tickers {
            let market = &state.markets[&ticker];
            if let Some(signal) = self.evaluate_market(state, market, now) {
                self.core.record_trade(&signal.market_ticker, now);
                self.core.record_signal(signal.clone());
                signals.push(signal);
            }
        }
        signals
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
        if !market.kind.is_moneyline() {
            // Spread/total vendor medians need per-line matching this
            // strategy does not attempt.
            return None;
        }
        if !self.core.can_trade(&market.ticker, now) {
            return None;
        }

        let book = market.orderbook.as_ref()?;
        let (yes_bid, yes_ask) = (book.yes_bid?, book.yes_ask?);
        let mid = (yes_bid + yes_ask) / dec!(2);
        if mid <= Decimal::ZERO {
            return None;
        }
        let p_exch = mid / dec!(100);

        // Per-vendor probabilities for this market's side.
        let vendor_odds: Vec<i32> = state
            .odds
            .values()
            .filter_map(|quote| match market.kind {
                MarketKind::MoneylineHome => quote.moneyline_home,
                MarketKind::MoneylineAway => quote.moneyline_away,
                _ => None,
            })
            .collect();
        if vendor_odds.len() < self.config.min_sample_sportsbooks {
            debug!(
                ticker = %market.ticker,
                vendors = vendor_odds.len(),
                "insufficient sportsbook sample"
            );
            return None;
        }
        let p_cons = consensus_probability(&vendor_odds, ConsensusMethod::Median)?;

        let divergence = p_cons - p_exch;
        let divergence_percent = (divergence * dec!(100)).abs();
        if divergence_percent < self.config.threshold_percent {
            return None;
        }

        let (side, entry) = if divergence > Decimal::ZERO {
            (Side::Yes, book.yes_ask?)
        } else {
            (Side::No, book.ask_for(Side::No)?)
        };
        if entry <= Decimal::ZERO {
            return None;
        }

        let ev_percent = expected_value(entry, p_cons, side) * dec!(100);
        if ev_percent < self.config.min_ev_percent {
            debug!(ticker = %market.ticker, %ev_percent, "EV below minimum");
            return None;
        }

        let quantity = self.position_size(entry, p_cons, side);
        if quantity == 0 {
            return None;
        }

        let direction = if side == Side::Yes { "underpriced" } else { "overpriced" };
        let reason = format!(
            "Exchange {} by {:.1}pp: mid {:.1}%, consensus {:.1}%. EV +{:.1}%",
            direction,
            divergence_percent,
            p_exch * dec!(100),
            p_cons * dec!(100),
            ev_percent,
        );

        info!(
            ticker = %market.ticker,
            %side,
            quantity,
            divergence = %divergence_percent,
            ev = %ev_percent,
            "sharp line signal"
        );

        Some(TradeSignal {
            strategy_id: self.core.strategy_id.clone(),
            strategy_kind: StrategyKind::SharpLine,
            game_id: state.game_id.clone(),
            market_ticker: market.ticker.clone(),
            side,
            quantity,
            confidence: clamp_confidence(divergence_percent / dec!(10)),
            reason,
            metadata: serde_json::json!({
                "exchange_prob": p_exch.to_string(),
                "consensus_prob": p_cons.to_string(),
                "divergence_percent": divergence_percent.to_string(),
                "ev_percent": ev_percent.to_string(),
                "entry_price_cents": entry.to_string(),
                "vendor_count": vendor_odds.len(),
            }),
            limit_price: None,
            emitted_at: now,
        })
    }

    /// Fixed sizing, or a fraction of the configured bankroll under
    /// Kelly. Never negative, never above `position_size`.
    fn position_size(&self, entry: Decimal, p_cons: Decimal, side: Side) -> u32 {
        if !self.config.use_kelly_sizing {
            return self.config.position_size;
        }
        let fraction = kelly_fraction(entry, p_cons, side, self.config.kelly_fraction);
        let units = (fraction * Decimal::from(self.config.bankroll_units))
            .floor()
            .to_u32()
            .unwrap_or(0);
        units.min(self.config.position_size)
    }
}

impl Strategy for SharpLine {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SharpLine
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
    use courtside_market::{BookTop, VendorOdds};

    fn book(yes_bid: Decimal, yes_ask: Decimal) -> BookTop {
        BookTop {
            yes_bid: Some(yes_bid),
            yes_ask: Some(yes_ask),
            no_bid: Some(dec!(100) - yes_ask),
            no_ask: Some(dec!(100) - yes_bid),
            ..Default::default()
        }
    }

    fn vendor(name: &str, home: i32, away: i32) -> VendorOdds {
        VendorOdds {
            nba_game_id: 1,
            vendor: name.to_string(),
            moneyline_home: Some(home),
            moneyline_away: Some(away),
            spread_home_value: None,
            spread_home_odds: None,
            spread_away_value: None,
            spread_away_odds: None,
            total_value: None,
            total_over_odds: None,
            total_under_odds: None,
        }
    }

    /// Game with one home moneyline market at 42/44 and three vendors
    /// whose median implies 60%.
    fn divergent_state() -> GameState {
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
            team: Some("SAC".to_string()),
            side: Some(Side::Yes),
            orderbook: Some(book(dec!(42), dec!(44))),
        });
        state.apply_odds(&[
            vendor("a", -150, 130),
            vendor("b", -140, 120),
            vendor("c", -160, 140),
        ]);
        state
    }

    #[test]
    fn test_divergence_yes_signal() {
        // Mid 43 -> exchange prob 0.43; vendor median 0.60;
        // divergence 17pp; entry 44; EV ~36.4% >= 2%.
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        let signals = strategy.evaluate_at(&divergent_state(), Utc::now());

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.side, Side::Yes);
        assert_eq!(signal.quantity, 10);
        assert_eq!(signal.market_ticker, "M");
        assert_eq!(signal.confidence, dec!(1));
        let meta = &signal.metadata;
        assert_eq!(meta["consensus_prob"], "0.6");
        assert_eq!(meta["entry_price_cents"], "44");
    }

    #[test]
    fn test_overpriced_emits_no() {
        let mut state = divergent_state();
        // Exchange mid far above the 0.60 consensus.
        state
            .markets
            .get_mut("M")
            .unwrap()
            .orderbook = Some(book(dec!(78), dec!(80)));
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        let signals = strategy.evaluate_at(&state, Utc::now());

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::No);
        // NO entry = no_ask = 100 - yes_bid = 22.
        assert_eq!(signals[0].metadata["entry_price_cents"], "22");
    }

    #[test]
    fn test_insufficient_sportsbooks_skips() {
        let mut state = divergent_state();
        state.odds.remove("c");
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        assert!(strategy.evaluate_at(&state, Utc::now()).is_empty());
    }

    #[test]
    fn test_divergence_below_threshold_skips() {
        let mut state = divergent_state();
        // Mid 58 against consensus 60: 2pp < 5pp threshold.
        state.markets.get_mut("M").unwrap().orderbook = Some(book(dec!(57), dec!(59)));
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        assert!(strategy.evaluate_at(&state, Utc::now()).is_empty());
    }

    #[test]
    fn test_one_sided_book_skips() {
        let mut state = divergent_state();
        state.markets.get_mut("M").unwrap().orderbook = Some(BookTop {
            yes_bid: Some(dec!(42)),
            ..Default::default()
        });
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        assert!(strategy.evaluate_at(&state, Utc::now()).is_empty());
    }

    #[test]
    fn test_min_ev_filter() {
        let mut config = SharpLineConfig::default();
        config.min_ev_percent = dec!(50.0);
        let mut strategy = SharpLine::new("s".to_string(), config);
        // The divergence EV is ~36.4%, under the raised floor.
        assert!(strategy.evaluate_at(&divergent_state(), Utc::now()).is_empty());
    }

    #[test]
    fn test_cooldown_suppresses_repeat() {
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        let state = divergent_state();
        let t0 = Utc::now();

        assert_eq!(strategy.evaluate_at(&state, t0).len(), 1);
        assert!(strategy
            .evaluate_at(&state, t0 + chrono::Duration::minutes(4))
            .is_empty());
        assert_eq!(
            strategy
                .evaluate_at(&state, t0 + chrono::Duration::minutes(5))
                .len(),
            1
        );
    }

    #[test]
    fn test_kelly_sizing_caps_at_position_size() {
        let mut config = SharpLineConfig::default();
        config.use_kelly_sizing = true;
        let mut strategy = SharpLine::new("s".to_string(), config);
        let signals = strategy.evaluate_at(&divergent_state(), Utc::now());

        assert_eq!(signals.len(), 1);
        // Quarter Kelly at p=0.60, entry 44c: f ~= 0.0714, times a
        // 100-contract bankroll, floored to 7.
        assert_eq!(signals[0].quantity, 7);
    }

    #[test]
    fn test_away_market_uses_away_odds() {
        let mut state = divergent_state();
        state.markets.clear();
        state.implied.clear();
        state.add_market(MarketState {
            id: None,
            ticker: "A".to_string(),
            kind: MarketKind::MoneylineAway,
            strike: None,
            team: Some("DAL".to_string()),
            side: Some(Side::Yes),
            // Away median ~0.4348 vs cheap exchange mid.
            orderbook: Some(book(dec!(27), dec!(29))),
        });
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        let signals = strategy.evaluate_at(&state, Utc::now());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Yes);
    }

    #[test]
    fn test_spread_market_not_traded_by_default() {
        let mut state = divergent_state();
        state.add_market(MarketState {
            id: None,
            ticker: "SP".to_string(),
            kind: MarketKind::Spread,
            strike: Some(dec!(7.5)),
            team: Some("SAC".to_string()),
            side: None,
            orderbook: Some(book(dec!(30), dec!(32))),
        });
        let mut strategy = SharpLine::new("s".to_string(), SharpLineConfig::default());
        let signals = strategy.evaluate_at(&state, Utc::now());
        assert!(signals.iter().all(|s| s.market_ticker != "SP"));
    }
}
