//! Live-game mean reversion.
//!
//! Anchors each market's mid at the moment the game first goes live and
//! fades large intragame swings away from that anchor, expecting prices
//! to revert. Swings beyond `max_reversion_percent` are treated as real
//! information shifts and left alone, as are blowouts.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::{debug, info};

use courtside_common::{Side, StrategyKind};

use crate::state::{GameState, MarketState};
use crate::strategy::{clamp_confidence, Strategy, StrategyCore, TradeSignal};

/// Configuration for [`MeanReversion`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    /// Minimum swing from the anchor, in cents.
    pub min_reversion_percent: Decimal,
    /// Maximum swing; beyond this the move is presumed real.
    pub max_reversion_percent: Decimal,
    /// Minimum percent of the game remaining.
    pub min_time_remaining_pct: Decimal,
    pub position_size: u32,
    pub cooldown_minutes: i64,
    /// Restrict to the first half.
    pub only_first_half: bool,
    pub market_types: Vec<String>,
    /// Skip games with a score margin beyond this.
    pub max_score_deficit: i32,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            min_reversion_percent: dec!(15.0),
            max_reversion_percent: dec!(40.0),
            min_time_remaining_pct: dec!(25.0),
            position_size: 10,
            cooldown_minutes: 10,
            only_first_half: true,
            market_types: vec!["moneyline".to_string()],
            max_score_deficit: 20,
        }
    }
}

/// Mean reversion strategy.
pub struct MeanReversion {
    config: MeanReversionConfig,
    core: StrategyCore,
    /// Game -> ticker -> anchored pregame mid.
    anchors: HashMap<String, HashMap<String, Decimal>>,
    /// Games whose live transition has been observed.
    seen_live: HashSet<String>,
}

impl MeanReversion {
    pub fn new(strategy_id: String, config: MeanReversionConfig) -> Self {
        let core = StrategyCore::new(strategy_id, config.cooldown_minutes);
        Self {
            config,
            core,
            anchors: HashMap::new(),
            seen_live: HashSet::new(),
        }
    }

    pub(crate) fn evaluate_at(&mut self, state: &GameState, now: DateTime<Utc>) -> Vec<TradeSignal> {
        if !state.phase.is_live() {
            return Vec::new();
        }

        // First live sighting: record anchors, emit nothing. If a game
        // is loaded mid-live the anchor is simply the first observed mid
        // and makes no claim to being the true pregame price.
        let first_sighting = self.seen_live.insert(state.game_id.clone());
        let anchors = self.anchors.entry(state.game_id.clone()).or_default();
        for (ticker, market) in &state.markets {
            if let Some(mid) = market.mid() {
                anchors.entry(ticker.clone()).or_insert(mid);
            }
        }
        if first_sighting {
            debug!(
                game_id = %state.game_id,
                markets = anchors.len(),
                "pregame anchors captured"
            );
            return Vec::new();
        }

        if !self.time_remaining_ok(state) {
            return Vec::new();
        }
        if self.config.only_first_half && !Self::in_first_half(state) {
            return Vec::new();
        }
        if !self.score_margin_ok(state) {
            return Vec::new();
        }

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

    fn time_remaining_ok(&self, state: &GameState) -> bool {
        match &state.nba {
            Some(nba) => nba.percent_remaining() >= self.config.min_time_remaining_pct,
            None => true,
        }
    }

    fn in_first_half(state: &GameState) -> bool {
        match &state.nba {
            Some(nba) if nba.period > 0 => nba.period <= 2,
            _ => true,
        }
    }

    fn score_margin_ok(&self, state: &GameState) -> bool {
        match &state.nba {
            Some(nba) => nba.score_margin() <= self.config.max_score_deficit,
            None => true,
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
        let anchor = *self.anchors.get(&state.game_id)?.get(&market.ticker)?;

        // Prices are cents, so the swing is already percentage points.
        let swing = current - anchor;
        let magnitude = swing.abs();
        if magnitude < self.config.min_reversion_percent {
            return None;
        }
        if magnitude > self.config.max_reversion_percent {
            debug!(
                ticker = %market.ticker,
                %swing,
                "swing beyond reversion band, presumed real"
            );
            return None;
        }

        let side = if swing < Decimal::ZERO { Side::Yes } else { Side::No };
        let entry = book.ask_for(side)?;
        if entry <= Decimal::ZERO {
            return None;
        }

        let direction = if swing < Decimal::ZERO { "dropped" } else { "rose" };
        let reason = format!(
            "Price {} {:.1}pp from pregame anchor ({:.1}c -> {:.1}c), expecting reversion",
            direction, magnitude, anchor, current,
        );

        info!(
            ticker = %market.ticker,
            %side,
            %swing,
            anchor = %anchor,
            "mean reversion signal"
        );

        let nba = state.nba.as_ref();
        Some(TradeSignal {
            strategy_id: self.core.strategy_id.clone(),
            strategy_kind: StrategyKind::MeanReversion,
            game_id: state.game_id.clone(),
            market_ticker: market.ticker.clone(),
            side,
            quantity: self.config.position_size,
            // Larger swings within the band mean a stronger overreaction.
            confidence: clamp_confidence(magnitude / self.config.max_reversion_percent),
            reason,
            metadata: serde_json::json!({
                "pregame_mid_cents": anchor.to_string(),
                "current_mid_cents": current.to_string(),
                "swing_cents": swing.to_string(),
                "entry_price_cents": entry.to_string(),
                "period": nba.map(|n| n.period),
                "home_score": nba.map(|n| n.home_score),
                "away_score": nba.map(|n| n.away_score),
            }),
            limit_price: None,
            emitted_at: now,
        })
    }

    /// Drop anchors for an unloaded game.
    pub fn clear_game(&mut self, game_id: &str) {
        self.anchors.remove(game_id);
        self.seen_live.remove(game_id);
    }
}

impl Strategy for MeanReversion {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn evaluate(&mut self, state: &GameState) -> Vec<TradeSignal> {
        self.evaluate_at(state, Utc::now())
    }

    fn recent_signals(&self) -> Vec<TradeSignal> {
        self.core.recent_signals()
    }
}
