//! Signal-generating strategies.
//!
//! A fixed set of strategy kinds behind one capability trait. Each
//! instance owns its typed configuration and any kind-specific state
//! (price histories, pregame anchors), plus the shared
//! [`StrategyCore`]: a per-market cooldown map and a bounded ring of
//! recent signals. Cooldowns are enforced inside the strategies so
//! emission stays deterministic relative to their own history.

pub mod correlation;
pub mod ev_multibook;
pub mod mean_reversion;
pub mod momentum;
pub mod sharp_line;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::debug;

use courtside_common::{Side, StrategyKind};

use crate::state::GameState;

pub use correlation::{Correlation, CorrelationConfig};
pub use ev_multibook::{EvMultiBook, EvMultiBookConfig};
pub use mean_reversion::{MeanReversion, MeanReversionConfig};
pub use momentum::{Momentum, MomentumConfig};
pub use sharp_line::{SharpLine, SharpLineConfig};

/// Maximum signals retained in the per-strategy ring.
const SIGNAL_RING_CAPACITY: usize = 100;

/// A trade signal emitted by a strategy evaluation.
#[derive(Debug, Clone)]
pub struct TradeSignal {
    pub strategy_id: String,
    pub strategy_kind: StrategyKind,
    pub game_id: String,
    pub market_ticker: String,
    pub side: Side,
    pub quantity: u32,
    /// Confidence on [0, 1].
    pub confidence: Decimal,
    pub reason: String,
    pub metadata: serde_json::Value,
    /// Present only when the signal wants a limit order.
    pub limit_price: Option<Decimal>,
    pub emitted_at: DateTime<Utc>,
}

/// The capability every strategy kind exposes.
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Evaluate one game state, returning zero or more signals.
    fn evaluate(&mut self, state: &GameState) -> Vec<TradeSignal>;

    /// Recent signal history (most recent last).
    fn recent_signals(&self) -> Vec<TradeSignal>;
}

/// Shared per-strategy state: identity, cooldown map, signal ring.
#[derive(Debug)]
pub struct StrategyCore {
    pub strategy_id: String,
    cooldown: ChronoDuration,
    last_trade: HashMap<String, DateTime<Utc>>,
    recent: VecDeque<TradeSignal>,
}

impl StrategyCore {
    pub fn new(strategy_id: String, cooldown_minutes: i64) -> Self {
        Self {
            strategy_id,
            cooldown: ChronoDuration::minutes(cooldown_minutes),
            last_trade: HashMap::new(),
            recent: VecDeque::with_capacity(SIGNAL_RING_CAPACITY),
        }
    }

    /// Whether the per-market cooldown has elapsed.
    pub fn can_trade(&self, market_ticker: &str, now: DateTime<Utc>) -> bool {
        match self.last_trade.get(market_ticker) {
            Some(last) => now - *last >= self.cooldown,
            None => true,
        }
    }

    /// Start the cooldown clock for a market.
    pub fn record_trade(&mut self, market_ticker: &str, now: DateTime<Utc>) {
        self.last_trade.insert(market_ticker.to_string(), now);
        debug!(strategy = %self.strategy_id, ticker = market_ticker, "cooldown started");
    }

    /// Push onto the bounded signal ring.
    pub fn record_signal(&mut self, signal: TradeSignal) {
        if self.recent.len() == SIGNAL_RING_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(signal);
    }

    pub fn recent_signals(&self) -> Vec<TradeSignal> {
        self.recent.iter().cloned().collect()
    }

    pub fn reset_cooldowns(&mut self) {
        self.last_trade.clear();
    }
}

/// Clamp a raw confidence value onto [0, 1].
pub(crate) fn clamp_confidence(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE)
}

/// Build a strategy instance of the given kind from an optional stored
/// JSON config blob. The blob is deserialized once, here; unknown kinds
/// cannot occur because the kind set is closed.
pub fn build_strategy(
    kind: StrategyKind,
    strategy_id: String,
    config: Option<&serde_json::Value>,
) -> Result<Box<dyn Strategy>, String> {
    fn parse<C: DeserializeOwned + Default>(blob: Option<&serde_json::Value>) -> Result<C, String> {
        match blob {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("invalid strategy config: {}", e)),
            None => Ok(C::default()),
        }
    }

    Ok(match kind {
        StrategyKind::SharpLine => Box::new(SharpLine::new(strategy_id, parse(config)?)),
        StrategyKind::Momentum => Box::new(Momentum::new(strategy_id, parse(config)?)),
        StrategyKind::EvMultiBook => Box::new(EvMultiBook::new(strategy_id, parse(config)?)),
        StrategyKind::MeanReversion => Box::new(MeanReversion::new(strategy_id, parse(config)?)),
        StrategyKind::Correlation => Box::new(Correlation::new(strategy_id, parse(config)?)),
    })
}

/// A registered strategy: identity, enable flag, and the instance.
pub struct StrategyInstance {
    pub id: String,
    pub kind: StrategyKind,
    pub enabled: bool,
    inner: Box<dyn Strategy>,
}

impl StrategyInstance {
    pub fn new(id: String, kind: StrategyKind, inner: Box<dyn Strategy>) -> Self {
        Self {
            id,
            kind,
            enabled: false,
            inner,
        }
    }

    pub fn evaluate(&mut self, state: &GameState) -> Vec<TradeSignal> {
        if !self.enabled {
            return Vec::new();
        }
        self.inner.evaluate(state)
    }

    pub fn recent_signals(&self) -> Vec<TradeSignal> {
        self.inner.recent_signals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn dummy_signal(id: &str) -> TradeSignal {
        TradeSignal {
            strategy_id: id.to_string(),
            strategy_kind: StrategyKind::Momentum,
            game_id: "g".to_string(),
            market_ticker: "M".to_string(),
            side: Side::Yes,
            quantity: 10,
            confidence: dec!(0.5),
            reason: String::new(),
            metadata: serde_json::Value::Null,
            limit_price: None,
            emitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_cooldown_blocks_until_elapsed() {
        let mut core = StrategyCore::new("s".to_string(), 5);
        let t0 = Utc::now();
        assert!(core.can_trade("M", t0));

        core.record_trade("M", t0);
        assert!(!core.can_trade("M", t0 + ChronoDuration::minutes(4)));
        assert!(core.can_trade("M", t0 + ChronoDuration::minutes(5)));
        // Other markets are unaffected.
        assert!(core.can_trade("OTHER", t0));
    }

    #[test]
    fn test_signal_ring_is_bounded() {
        let mut core = StrategyCore::new("s".to_string(), 5);
        for i in 0..150 {
            let mut signal = dummy_signal("s");
            signal.quantity = i;
            core.record_signal(signal);
        }
        let recent = core.recent_signals();
        assert_eq!(recent.len(), 100);
        // The oldest 50 were evicted.
        assert_eq!(recent[0].quantity, 50);
        assert_eq!(recent[99].quantity, 149);
    }

    #[test]
    fn test_reset_cooldowns() {
        let mut core = StrategyCore::new("s".to_string(), 5);
        let t0 = Utc::now();
        core.record_trade("M", t0);
        core.reset_cooldowns();
        assert!(core.can_trade("M", t0));
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(dec!(1.7)), dec!(1));
        assert_eq!(clamp_confidence(dec!(-0.2)), dec!(0));
        assert_eq!(clamp_confidence(dec!(0.35)), dec!(0.35));
    }

    #[test]
    fn test_build_strategy_each_kind() {
        for kind in StrategyKind::ALL {
            let strategy = build_strategy(kind, "id".to_string(), None).unwrap();
            assert_eq!(strategy.kind(), kind);
        }
    }

    #[test]
    fn test_build_strategy_with_config_blob() {
        let blob = serde_json::json!({"position_size": 25, "threshold_percent": "7.5"});
        let strategy =
            build_strategy(StrategyKind::SharpLine, "id".to_string(), Some(&blob)).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::SharpLine);
    }

    #[test]
    fn test_build_strategy_rejects_bad_blob() {
        let blob = serde_json::json!({"position_size": "lots"});
        assert!(build_strategy(StrategyKind::SharpLine, "id".to_string(), Some(&blob)).is_err());
    }

    #[test]
    fn test_disabled_instance_emits_nothing() {
        let inner = build_strategy(StrategyKind::Momentum, "id".to_string(), None).unwrap();
        let mut instance = StrategyInstance::new("id".to_string(), StrategyKind::Momentum, inner);
        let state = GameState::new(
            "g".to_string(),
            "KXNBAGAME-26JAN06DALSAC".to_string(),
            "SAC".to_string(),
            "DAL".to_string(),
            Utc::now(),
        );
        assert!(instance.evaluate(&state).is_empty());
    }
}
