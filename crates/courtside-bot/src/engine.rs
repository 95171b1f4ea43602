//! Strategy evaluation loop.
//!
//! Holds the live strategy instances and walks every enabled strategy
//! over every non-finished game at a fixed cadence. The cadence is a
//! rate ceiling: a tick that arrives while the previous sweep is still
//! running is skipped, not queued. Evaluation failures are isolated per
//! (strategy, game) pair, and each evaluation runs under a soft time
//! budget that logs overruns without aborting.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use courtside_common::StrategyKind;

use crate::aggregator::Aggregator;
use crate::state::GameState;
use crate::strategy::{build_strategy, StrategyInstance, TradeSignal};

/// Soft budget per strategy evaluation.
const EVALUATION_SOFT_BUDGET: Duration = Duration::from_millis(500);

/// Receives every emitted signal (the execution engine, loggers, ...).
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle(&self, signal: &TradeSignal);
}

/// Registry and evaluation loop for strategy instances.
pub struct StrategyEngine {
    strategies: HashMap<String, StrategyInstance>,
    handlers: Vec<Arc<dyn SignalHandler>>,
    aggregator: Arc<Aggregator>,
    interval: Duration,
}

impl StrategyEngine {
    pub fn new(aggregator: Arc<Aggregator>, interval: Duration) -> Self {
        Self {
            strategies: HashMap::new(),
            handlers: Vec::new(),
            aggregator,
            interval,
        }
    }

    /// Register a strategy instance of the given kind. At most one
    /// instance per kind: loading a kind again replaces the old one so
    /// duplicate signals cannot arise.
    pub fn load_strategy(
        &mut self,
        kind: StrategyKind,
        strategy_id: Option<String>,
        config: Option<&serde_json::Value>,
        enable: bool,
    ) -> Result<String, String> {
        let existing: Vec<String> = self
            .strategies
            .values()
            .filter(|s| s.kind == kind)
            .map(|s| s.id.clone())
            .collect();
        for id in existing {
            info!(kind = %kind, id = %id, "replacing existing strategy instance");
            self.strategies.remove(&id);
        }

        let id = strategy_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let inner = build_strategy(kind, id.clone(), config)?;
        let mut instance = StrategyInstance::new(id.clone(), kind, inner);
        instance.enabled = enable;
        self.strategies.insert(id.clone(), instance);
        info!(kind = %kind, id = %id, enabled = enable, "strategy loaded");
        Ok(id)
    }

    pub fn unload_strategy(&mut self, strategy_id: &str) -> bool {
        self.strategies.remove(strategy_id).is_some()
    }

    pub fn set_enabled(&mut self, strategy_id: &str, enabled: bool) -> bool {
        match self.strategies.get_mut(strategy_id) {
            Some(strategy) => {
                strategy.enabled = enabled;
                info!(id = %strategy_id, enabled, "strategy toggled");
                true
            }
            None => false,
        }
    }

    pub fn add_signal_handler(&mut self, handler: Arc<dyn SignalHandler>) {
        self.handlers.push(handler);
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    /// Evaluate every enabled strategy against every non-finished game,
    /// fanning emitted signals out to the handlers.
    pub async fn evaluate_all(&mut self) -> Vec<TradeSignal> {
        let states: Vec<GameState> = self
            .aggregator
            .list_states()
            .into_iter()
            .filter(|s| !s.phase.is_terminal())
            .collect();
        if states.is_empty() {
            return Vec::new();
        }

        let mut all_signals = Vec::new();
        for strategy in self.strategies.values_mut() {
            if !strategy.enabled {
                continue;
            }
            for state in &states {
                let started = Instant::now();
                // One failing (strategy, game) pair must not stop the
                // rest of the sweep.
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| strategy.evaluate(state)));
                let elapsed = started.elapsed();
                if elapsed > EVALUATION_SOFT_BUDGET {
                    warn!(
                        strategy = %strategy.id,
                        game_id = %state.game_id,
                        ?elapsed,
                        "strategy evaluation exceeded soft budget"
                    );
                }
                match result {
                    Ok(signals) => all_signals.extend(signals),
                    Err(panic) => {
                        error!(
                            strategy = %strategy.id,
                            game_id = %state.game_id,
                            ?panic,
                            "strategy evaluation panicked, isolating"
                        );
                    }
                }
            }
        }

        if !all_signals.is_empty() {
            info!(count = all_signals.len(), "strategy sweep emitted signals");
        }
        for signal in &all_signals {
            for handler in &self.handlers {
                handler.handle(signal).await;
            }
        }
        all_signals
    }

    /// Run the fixed-cadence loop until shutdown. Skipped ticks are not
    /// made up.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "strategy engine started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.evaluate_all().await;
                }
                _ = shutdown.recv() => {
                    debug!("strategy engine shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_common::{MarketKind, Side};
    use courtside_market::{
        BookTop, ExchangeStreamConfig, NoopSigner, SportsFeed, SportsFeedConfig,
    };
    use crate::config::IntervalsConfig;
    use crate::state::MarketState;
    use crate::storage::{GameRow, Store};
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    /// Aggregator with a loaded game whose home moneyline sits at 42/44
    /// against a heavy vendor consensus, so SharpLine will fire.
    async fn aggregator_with_game() -> Arc<Aggregator> {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();
        store
            .upsert_game(&GameRow {
                id: "game-1".to_string(),
                event_ticker: "KXNBAGAME-26JAN06DALSAC".to_string(),
                nba_game_id: Some(1),
                home_team: "SAC".to_string(),
                away_team: "DAL".to_string(),
                home_team_id: Some(26),
                away_team_id: Some(7),
                game_date: Utc::now(),
                status: "scheduled".to_string(),
                is_active: true,
            })
            .await
            .unwrap();

        let sports = Arc::new(
            SportsFeed::new(SportsFeedConfig {
                // Unroutable: worker polls fail fast and are swallowed.
                base_url: "http://127.0.0.1:1".to_string(),
                api_key: "test".to_string(),
                max_attempts: 1,
                ..Default::default()
            })
            .unwrap(),
        );
        let stream = courtside_market::ExchangeStream::connect(
            ExchangeStreamConfig {
                // Unroutable address: the stream stays disconnected and
                // retries in the background, which is fine for the test.
                ws_url: "ws://127.0.0.1:1".to_string(),
                ..Default::default()
            },
            Arc::new(NoopSigner),
        );
        let aggregator = Aggregator::new(
            store,
            sports,
            stream.handle(),
            IntervalsConfig::default(),
        );
        aggregator.load("game-1").await.unwrap();
        aggregator
    }

    fn seeded_state() -> GameState {
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
            orderbook: Some(BookTop {
                yes_bid: Some(dec!(42)),
                yes_ask: Some(dec!(44)),
                no_bid: Some(dec!(56)),
                no_ask: Some(dec!(58)),
                ..Default::default()
            }),
        });
        state.apply_odds(&[
            courtside_market::VendorOdds {
                nba_game_id: 1,
                vendor: "a".to_string(),
                moneyline_home: Some(-150),
                moneyline_away: Some(130),
                spread_home_value: None,
                spread_home_odds: None,
                spread_away_value: None,
                spread_away_odds: None,
                total_value: None,
                total_over_odds: None,
                total_under_odds: None,
            },
            courtside_market::VendorOdds {
                nba_game_id: 1,
                vendor: "b".to_string(),
                moneyline_home: Some(-140),
                moneyline_away: Some(120),
                spread_home_value: None,
                spread_home_odds: None,
                spread_away_value: None,
                spread_away_odds: None,
                total_value: None,
                total_over_odds: None,
                total_under_odds: None,
            },
            courtside_market::VendorOdds {
                nba_game_id: 1,
                vendor: "c".to_string(),
                moneyline_home: Some(-160),
                moneyline_away: Some(140),
                spread_home_value: None,
                spread_home_odds: None,
                spread_away_value: None,
                spread_away_odds: None,
                total_value: None,
                total_over_odds: None,
                total_under_odds: None,
            },
        ]);
        state
    }

    struct CollectingHandler {
        signals: Mutex<Vec<TradeSignal>>,
    }

    #[async_trait]
    impl SignalHandler for CollectingHandler {
        async fn handle(&self, signal: &TradeSignal) {
            self.signals.lock().push(signal.clone());
        }
    }

    #[tokio::test]
    async fn test_load_strategy_replaces_same_kind() {
        let aggregator = aggregator_with_game().await;
        let mut engine = StrategyEngine::new(aggregator, Duration::from_secs(2));

        let first = engine
            .load_strategy(StrategyKind::Momentum, None, None, true)
            .unwrap();
        let second = engine
            .load_strategy(StrategyKind::Momentum, None, None, true)
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(engine.strategy_ids(), vec![second]);
    }

    #[tokio::test]
    async fn test_disabled_strategy_not_evaluated() {
        let aggregator = aggregator_with_game().await;
        let mut engine = StrategyEngine::new(aggregator, Duration::from_secs(2));
        engine
            .load_strategy(StrategyKind::SharpLine, None, None, false)
            .unwrap();

        assert!(engine.evaluate_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_enabled_unknown_id() {
        let aggregator = aggregator_with_game().await;
        let mut engine = StrategyEngine::new(aggregator, Duration::from_secs(2));
        assert!(!engine.set_enabled("missing", true));
    }

    #[tokio::test]
    async fn test_signals_fan_out_to_handlers() {
        // Drive the engine's sweep path directly with a seeded state by
        // evaluating the strategy against it through the instance API.
        let aggregator = aggregator_with_game().await;
        let mut engine = StrategyEngine::new(aggregator, Duration::from_secs(2));
        let id = engine
            .load_strategy(StrategyKind::SharpLine, None, None, true)
            .unwrap();

        let handler = Arc::new(CollectingHandler {
            signals: Mutex::new(Vec::new()),
        });
        engine.add_signal_handler(handler.clone());

        // The loaded game has no orderbook or odds yet, so a sweep is
        // quiet.
        assert!(engine.evaluate_all().await.is_empty());

        // Seed the instance with a state that crosses the threshold.
        let state = seeded_state();
        let strategy = engine.strategies.get_mut(&id).unwrap();
        let signals = strategy.evaluate(&state);
        assert_eq!(signals.len(), 1);
        for signal in &signals {
            for h in &engine.handlers {
                h.handle(signal).await;
            }
        }
        assert_eq!(handler.signals.lock().len(), 1);
        assert_eq!(handler.signals.lock()[0].side, Side::Yes);
    }
}
