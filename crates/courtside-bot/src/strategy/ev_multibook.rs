//! Multi-book expected value.
//!
//! Requires independent agreement among sportsbooks that a side is +EV
//! against the exchange: each vendor's implied probability is compared
//! to the taker price, and a signal fires only when enough books agree
//! on the same side.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::info;

use courtside_common::{american_to_probability, expected_value, MarketKind, Side, StrategyKind};

use crate::state::{GameState, MarketState, OddsQuote};
use crate::strategy::{clamp_confidence, Strategy, StrategyCore, TradeSignal};

/// Configuration for [`EvMultiBook`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvMultiBookConfig {
    /// Minimum EV, percent of cost, for a book to count as agreeing.
    pub min_ev_percent: Decimal,
    /// Books that must agree before a signal fires.
    pub min_sportsbooks_agreeing: usize,
    pub position_size: u32,
    pub cooldown_minutes: i64,
    /// When non-empty, only these vendors are consulted.
    pub preferred_books: Vec<String>,
    /// Vendors ignored entirely.
    pub exclude_books: Vec<String>,
    pub market_types: Vec<String>,
}

impl Default for EvMultiBookConfig {
    fn default() -> Self {
        Self {
            min_ev_percent: dec!(3.0),
            min_sportsbooks_agreeing: 2,
            position_size: 10,
            cooldown_minutes: 5,
            preferred_books: Vec::new(),
            exclude_books: Vec::new(),
            market_types: vec!["moneyline".to_string()],
        }
    }
}

/// A book showing +EV on one side.
#[derive(Debug, Clone)]
struct AgreeingBook {
    vendor: String,
    ev_percent: Decimal,
}

/// Multi-book EV strategy.
pub struct EvMultiBook {
    config: EvMultiBookConfig,
    core: StrategyCore,
}

impl EvMultiBook {
    pub fn new(strategy_id: String, config: EvMultiBookConfig) -> Self {
        let core = StrategyCore::new(strategy_id, config.cooldown_minutes);
        Self { config, core }
    }

    pub(crate) fn evaluate_at(&mut self, state: &GameState, now: DateTime<Utc>) -> Vec<TradeSignal> {
        if state.odds.is_empty() {
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

    fn book_filter(&self, vendor: &str) -> bool {
        if self.config.exclude_books.iter().any(|b| b == vendor) {
            return false;
        }
        if !self.config.preferred_books.is_empty()
            && !self.config.preferred_books.iter().any(|b| b == vendor)
        {
            return false;
        }
        true
    }

    /// The vendor's probability for the outcome this market pays on.
    fn vendor_probability(quote: &OddsQuote, kind: MarketKind) -> Option<Decimal> {
        let odds = match kind {
            MarketKind::MoneylineHome => quote.moneyline_home,
            MarketKind::MoneylineAway => quote.moneyline_away,
            MarketKind::Spread => quote.spread_home_odds,
            MarketKind::Total => quote.total_over_odds,
        }?;
        Some(american_to_probability(odds))
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
        let yes_ask = book.yes_ask?;
        let no_ask = book.ask_for(Side::No)?;
        if yes_ask <= Decimal::ZERO || no_ask <= Decimal::ZERO {
            return None;
        }

        let mut yes_books: Vec<AgreeingBook> = Vec::new();
        let mut no_books: Vec<AgreeingBook> = Vec::new();

        for quote in state.odds.values() {
            if !self.book_filter(&quote.vendor) {
                continue;
            }
            let Some(p_vendor) = Self::vendor_probability(quote, market.kind) else {
                continue;
            };

            let ev_yes = expected_value(yes_ask, p_vendor, Side::Yes) * dec!(100);
            let ev_no = expected_value(no_ask, p_vendor, Side::No) * dec!(100);

            if ev_yes >= self.config.min_ev_percent {
                yes_books.push(AgreeingBook {
                    vendor: quote.vendor.clone(),
                    ev_percent: ev_yes,
                });
            }
            if ev_no >= self.config.min_ev_percent {
                no_books.push(AgreeingBook {
                    vendor: quote.vendor.clone(),
                    ev_percent: ev_no,
                });
            }
        }

        let min_books = self.config.min_sportsbooks_agreeing;
        let best_ev = |books: &[AgreeingBook]| {
            books
                .iter()
                .map(|b| b.ev_percent)
                .max()
                .unwrap_or(Decimal::MIN)
        };

        // The side with more agreeing books wins; a tie goes to the side
        // with the larger best-book EV.
        let (side, mut books, entry) = if yes_books.len() >= min_books
            && (yes_books.len() > no_books.len()
                || (yes_books.len() == no_books.len() && best_ev(&yes_books) >= best_ev(&no_books)))
        {
            (Side::Yes, yes_books, yes_ask)
        } else if no_books.len() >= min_books {
            (Side::No, no_books, no_ask)
        } else {
            return None;
        };

        books.sort_by(|a, b| b.ev_percent.cmp(&a.ev_percent));
        let best = books.first()?.clone();

        let reason = format!(
            "{} sportsbooks show +EV for {}; best {} at +{:.1}%",
            books.len(),
            side,
            best.vendor,
            best.ev_percent,
        );

        info!(
            ticker = %market.ticker,
            %side,
            agreeing = books.len(),
            best_book = %best.vendor,
            best_ev = %best.ev_percent,
            "multi-book EV signal"
        );

        Some(TradeSignal {
            strategy_id: self.core.strategy_id.clone(),
            strategy_kind: StrategyKind::EvMultiBook,
            game_id: state.game_id.clone(),
            market_ticker: market.ticker.clone(),
            side,
            quantity: self.config.position_size,
            // More agreeing books, more confidence; five is full.
            confidence: clamp_confidence(Decimal::from(books.len()) / dec!(5)),
            reason,
            metadata: serde_json::json!({
                "best_book": best.vendor,
                "best_ev_percent": best.ev_percent.to_string(),
                "agreeing_books": books.len(),
                "books": books
                    .iter()
                    .map(|b| serde_json::json!({
                        "vendor": b.vendor,
                        "ev_percent": b.ev_percent.to_string(),
                    }))
                    .collect::<Vec<_>>(),
                "entry_price_cents": entry.to_string(),
            }),
            limit_price: None,
            emitted_at: now,
        })
    }
}

impl Strategy for EvMultiBook {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EvMultiBook
    }

    fn evaluate(&mut self, state: &GameState) -> Vec<TradeSignal> {
        self.evaluate_at(state, Utc::now())
    }

    fn recent_signals(&self) -> Vec<TradeSignal> {
        self.core.recent_signals()
    }
}
