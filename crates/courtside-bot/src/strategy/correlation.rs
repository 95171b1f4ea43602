//! Cross-market correlation.
//!
//! Exploits arithmetic inconsistencies between related markets of the
//! same game: complementary moneylines whose YES prices sum past 100,
//! and spread markets priced out of line with what the moneyline
//! implies. The moneyline-to-spread mapping is a deliberate linear
//! approximation, so those signals carry reduced confidence downstream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::{debug, info};

use courtside_common::{MarketKind, Side, StrategyKind};

use crate::state::{GameState, MarketState};
use crate::strategy::{clamp_confidence, Strategy, StrategyCore, TradeSignal};

/// Configuration for [`Correlation`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Minimum moneyline/spread discrepancy, percentage points.
    pub min_discrepancy_percent: Decimal,
    /// Complementary sum above this is overvalued.
    pub complementary_max_sum: Decimal,
    /// Complementary sum below this is undervalued (not traded).
    pub complementary_min_sum: Decimal,
    pub position_size: u32,
    pub cooldown_minutes: i64,
    pub check_complementary: bool,
    pub check_moneyline_spread: bool,
    /// Buy NO on the richer side when the pair is overvalued.
    pub prefer_no_on_overvalued: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_discrepancy_percent: dec!(5.0),
            complementary_max_sum: dec!(105.0),
            complementary_min_sum: dec!(95.0),
            position_size: 10,
            cooldown_minutes: 5,
            check_complementary: true,
            check_moneyline_spread: true,
            prefer_no_on_overvalued: true,
        }
    }
}

/// Cross-market correlation strategy.
pub struct Correlation {
    config: CorrelationConfig,
    core: StrategyCore,
}

impl Correlation {
    pub fn new(strategy_id: String, config: CorrelationConfig) -> Self {
        let core = StrategyCore::new(strategy_id, config.cooldown_minutes);
        Self { config, core }
    }

    pub(crate) fn evaluate_at(&mut self, state: &GameState, now: DateTime<Utc>) -> Vec<TradeSignal> {
        let mut signals = Vec::new();

        if self.config.check_complementary {
            if let Some(signal) = self.check_complementary(state, now) {
                self.core.record_trade(&signal.market_ticker, now);
                self.core.record_signal(signal.clone());
                signals.push(signal);
            }
        }

        if self.config.check_moneyline_spread {
            for signal in self.check_moneyline_spread(state, now) {
                self.core.record_trade(&signal.market_ticker, now);
                self.core.record_signal(signal.clone());
                signals.push(signal);
            }
        }

        signals
    }

    /// Check A: home + away YES mids should sum to ~100.
    fn check_complementary(&self, state: &GameState, now: DateTime<Utc>) -> Option<TradeSignal> {
        let home = state.moneyline_home()?;
        let away = state.moneyline_away()?;
        let home_yes = home.mid()?;
        let away_yes = away.mid()?;

        let sum = home_yes + away_yes;
        if sum < self.config.complementary_min_sum {
            // Both sides underpriced is not a safe arbitrage in paper
            // terms; observe and move on.
            debug!(%sum, "complementary pair underpriced, not traded");
            return None;
        }
        if sum <= self.config.complementary_max_sum {
            return None;
        }
        if !self.config.prefer_no_on_overvalued {
            return None;
        }

        // Fade the richer side.
        let target = if home_yes > away_yes { home } else { away };
        if !self.core.can_trade(&target.ticker, now) {
            return None;
        }
        let entry = target.orderbook.as_ref()?.ask_for(Side::No)?;
        let excess = sum - dec!(100);

        let reason = format!(
            "Complementary moneylines sum to {:.1}% (home {:.1}% + away {:.1}%), fading the richer side",
            sum, home_yes, away_yes,
        );

        info!(
            ticker = %target.ticker,
            %sum,
            "complementary overvaluation signal"
        );

        Some(TradeSignal {
            strategy_id: self.core.strategy_id.clone(),
            strategy_kind: StrategyKind::Correlation,
            game_id: state.game_id.clone(),
            market_ticker: target.ticker.clone(),
            side: Side::No,
            quantity: self.config.position_size,
            confidence: clamp_confidence(excess / dec!(10)),
            reason,
            metadata: serde_json::json!({
                "signal_type": "complementary_overvalued",
                "home_yes_cents": home_yes.to_string(),
                "away_yes_cents": away_yes.to_string(),
                "sum_cents": sum.to_string(),
                "excess_cents": excess.to_string(),
                "entry_price_cents": entry.to_string(),
            }),
            limit_price: None,
            emitted_at: now,
        })
    }

    /// Check B: spread pricing implied by the favorite's moneyline.
    ///
    /// expected = 50 + (ml - 50) * 0.5 is a linear placeholder for the
    /// real spread/moneyline relationship; treat these signals as
    /// lower-confidence.
    fn check_moneyline_spread(&self, state: &GameState, now: DateTime<Utc>) -> Vec<TradeSignal> {
        let mut signals = Vec::new();

        let Some((favorite_team, favorite_prob)) = self.favorite(state) else {
            return signals;
        };

        for market in state.markets_of_family("spread") {
            let Some(team) = market.team.as_deref() else {
                continue;
            };
            if team != favorite_team {
                continue;
            }
            if !self.core.can_trade(&market.ticker, now) {
                continue;
            }
            let Some(book) = market.orderbook.as_ref() else {
                continue;
            };
            let Some(spread_prob) = market.mid() else {
                continue;
            };

            let expected = dec!(50) + (favorite_prob - dec!(50)) * dec!(0.5);
            let discrepancy = spread_prob - expected;
            if discrepancy.abs() < self.config.min_discrepancy_percent {
                continue;
            }

            // Trade toward closing the gap.
            let side = if discrepancy > Decimal::ZERO { Side::No } else { Side::Yes };
            let Some(entry) = book.ask_for(side) else {
                continue;
            };

            let direction = if discrepancy > Decimal::ZERO { "overvalued" } else { "undervalued" };
            let reason = format!(
                "Spread {} at {:.1}%: moneyline ({} {:.1}%) implies {:.1}%",
                direction, spread_prob, favorite_team, favorite_prob, expected,
            );

            info!(
                ticker = %market.ticker,
                %side,
                %discrepancy,
                "moneyline/spread correlation signal"
            );

            signals.push(TradeSignal {
                strategy_id: self.core.strategy_id.clone(),
                strategy_kind: StrategyKind::Correlation,
                game_id: state.game_id.clone(),
                market_ticker: market.ticker.clone(),
                side,
                quantity: self.config.position_size,
                confidence: clamp_confidence(discrepancy.abs() / dec!(10)),
                reason,
                metadata: serde_json::json!({
                    "signal_type": "ml_spread_correlation",
                    "spread_prob_cents": spread_prob.to_string(),
                    "expected_prob_cents": expected.to_string(),
                    "moneyline_prob_cents": favorite_prob.to_string(),
                    "favorite_team": favorite_team,
                    "discrepancy_cents": discrepancy.to_string(),
                    "strike": market.strike.map(|s| s.to_string()),
                    "entry_price_cents": entry.to_string(),
                }),
                limit_price: None,
                emitted_at: now,
            });
        }

        signals
    }

    /// The favored team and its moneyline mid, from whichever side is
    /// priced higher.
    fn favorite(&self, state: &GameState) -> Option<(String, Decimal)> {
        let home = state.moneyline_home()?.mid()?;
        let away = state.moneyline_away()?.mid()?;
        if home >= away {
            Some((state.home_team.clone(), home))
        } else {
            Some((state.away_team.clone(), away))
        }
    }
}

impl Strategy for Correlation {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Correlation
    }

    fn evaluate(&mut self, state: &GameState) -> Vec<TradeSignal> {
        self.evaluate_at(state, Utc::now())
    }

    fn recent_signals(&self) -> Vec<TradeSignal> {
        self.core.recent_signals()
    }
}
