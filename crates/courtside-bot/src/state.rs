//! The fused per-game view consumed by strategies.
//!
//! One `GameState` per loaded game, owned exclusively by its aggregator
//! worker. All mutation goes through the `apply_*` methods, which
//! update `last_updated`, recompute affected implied probabilities, and
//! return the tickers they touched so event emission can be scoped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use courtside_common::{
    consensus_probability, price_to_probability, ConsensusMethod, GamePhase, MarketKind, Side,
};
use courtside_market::{BookTop, BoxScore, VendorOdds};

/// Regulation length of a game in minutes (four 12-minute quarters).
const REGULATION_MINUTES: Decimal = dec!(48);
const QUARTER_MINUTES: Decimal = dec!(12);

/// A single exchange market tracked within a game.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketState {
    /// Storage row id, when hydrated from the store.
    pub id: Option<i64>,
    pub ticker: String,
    pub kind: MarketKind,
    /// Strike for spread/total markets.
    pub strike: Option<Decimal>,
    /// Team a moneyline/spread market refers to.
    pub team: Option<String>,
    /// Listed side, where applicable.
    pub side: Option<Side>,
    /// Latest consolidated top of book; absent until the first snapshot.
    pub orderbook: Option<BookTop>,
}

impl MarketState {
    /// Mid price in cents per the one-sided fallback rule.
    pub fn mid(&self) -> Option<Decimal> {
        self.orderbook.as_ref().and_then(|b| b.mid())
    }

    /// YES bid/ask spread in cents.
    pub fn spread(&self) -> Option<Decimal> {
        self.orderbook.as_ref().and_then(|b| b.spread())
    }
}

/// Live scoreboard state for the underlying game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NbaLiveState {
    pub nba_game_id: i64,
    pub status: String,
    pub period: i32,
    pub time_remaining: String,
    pub home_score: i32,
    pub away_score: i32,
    pub last_update: DateTime<Utc>,
}

impl NbaLiveState {
    pub fn score_margin(&self) -> i32 {
        (self.home_score - self.away_score).abs()
    }

    /// Minutes elapsed, estimated from period and the "MM:SS" clock.
    ///
    /// An unparseable clock counts as the start of the period.
    pub fn minutes_elapsed(&self) -> Decimal {
        if self.period <= 0 {
            return Decimal::ZERO;
        }
        let left_in_period = parse_clock_minutes(&self.time_remaining).unwrap_or(QUARTER_MINUTES);
        let completed = Decimal::from(self.period - 1) * QUARTER_MINUTES;
        completed + (QUARTER_MINUTES - left_in_period).max(Decimal::ZERO)
    }

    /// Estimated percent of regulation remaining, on [0, 100].
    pub fn percent_remaining(&self) -> Decimal {
        let elapsed = self.minutes_elapsed().min(REGULATION_MINUTES);
        (REGULATION_MINUTES - elapsed) / REGULATION_MINUTES * dec!(100)
    }
}

/// Parse an "MM:SS" game clock into minutes.
fn parse_clock_minutes(clock: &str) -> Option<Decimal> {
    let (minutes, seconds) = clock.split_once(':')?;
    let minutes: Decimal = minutes.trim().parse().ok()?;
    let seconds: Decimal = seconds.trim().parse().ok()?;
    Some(minutes + seconds / dec!(60))
}

/// One vendor's odds for this game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OddsQuote {
    pub vendor: String,
    pub moneyline_home: Option<i32>,
    pub moneyline_away: Option<i32>,
    pub spread_home_value: Option<Decimal>,
    pub spread_home_odds: Option<i32>,
    pub spread_away_value: Option<Decimal>,
    pub spread_away_odds: Option<i32>,
    pub total_value: Option<Decimal>,
    pub total_over_odds: Option<i32>,
    pub total_under_odds: Option<i32>,
    pub last_update: DateTime<Utc>,
}

/// Vig-removed consensus across vendors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusOdds {
    pub num_sportsbooks: usize,
    pub home_win_probability: Option<Decimal>,
    pub away_win_probability: Option<Decimal>,
    pub spread_line: Option<Decimal>,
    pub total_line: Option<Decimal>,
    pub last_update: DateTime<Utc>,
}

/// The fused view: game identity + phase + markets + scoreboard + odds
/// + derived implied probabilities.
#[derive(Debug, Clone)]
pub struct GameState {
    pub game_id: String,
    pub event_ticker: String,
    pub home_team: String,
    pub away_team: String,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub nba_game_id: Option<i64>,
    pub game_date: DateTime<Utc>,
    pub phase: GamePhase,
    /// Ticker -> market.
    pub markets: HashMap<String, MarketState>,
    pub nba: Option<NbaLiveState>,
    /// Vendor -> latest quote.
    pub odds: HashMap<String, OddsQuote>,
    pub consensus: Option<ConsensusOdds>,
    /// Ticker -> implied probability from the exchange mid.
    pub implied: HashMap<String, Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl GameState {
    pub fn new(
        game_id: String,
        event_ticker: String,
        home_team: String,
        away_team: String,
        game_date: DateTime<Utc>,
    ) -> Self {
        Self {
            game_id,
            event_ticker,
            home_team,
            away_team,
            home_team_id: None,
            away_team_id: None,
            nba_game_id: None,
            game_date,
            phase: GamePhase::Scheduled,
            markets: HashMap::new(),
            nba: None,
            odds: HashMap::new(),
            consensus: None,
            implied: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn add_market(&mut self, market: MarketState) {
        self.markets.insert(market.ticker.clone(), market);
    }

    /// Replace a market's orderbook atomically and recompute its implied
    /// probability. Returns the affected ticker, or nothing if the
    /// ticker is unknown to this game.
    pub fn apply_orderbook(&mut self, ticker: &str, top: BookTop) -> Vec<String> {
        let Some(market) = self.markets.get_mut(ticker) else {
            return Vec::new();
        };
        market.orderbook = Some(top);

        match market.mid() {
            Some(mid) => {
                self.implied.insert(ticker.to_string(), price_to_probability(mid));
            }
            None => {
                self.implied.remove(ticker);
            }
        }
        self.last_updated = Utc::now();
        vec![ticker.to_string()]
    }

    /// Apply a scoreboard update. The phase follows the reported status.
    pub fn apply_nba(&mut self, score: &BoxScore) -> Vec<String> {
        let phase = GamePhase::from_status(&score.status);
        self.nba = Some(NbaLiveState {
            nba_game_id: score.nba_game_id,
            status: score.status.clone(),
            period: score.period,
            time_remaining: score.time_remaining.clone(),
            home_score: score.home_score,
            away_score: score.away_score,
            last_update: Utc::now(),
        });
        self.set_phase(phase);
        self.last_updated = Utc::now();
        Vec::new()
    }

    /// Replace per-vendor odds and rebuild the consensus.
    pub fn apply_odds(&mut self, quotes: &[VendorOdds]) -> Vec<String> {
        let now = Utc::now();
        for quote in quotes {
            self.odds.insert(
                quote.vendor.clone(),
                OddsQuote {
                    vendor: quote.vendor.clone(),
                    moneyline_home: quote.moneyline_home,
                    moneyline_away: quote.moneyline_away,
                    spread_home_value: quote.spread_home_value,
                    spread_home_odds: quote.spread_home_odds,
                    spread_away_value: quote.spread_away_value,
                    spread_away_odds: quote.spread_away_odds,
                    total_value: quote.total_value,
                    total_over_odds: quote.total_over_odds,
                    total_under_odds: quote.total_under_odds,
                    last_update: now,
                },
            );
        }
        self.rebuild_consensus();
        self.last_updated = now;
        Vec::new()
    }

    pub fn set_phase(&mut self, phase: GamePhase) {
        if self.phase != phase {
            self.phase = phase;
            self.last_updated = Utc::now();
        }
    }

    /// Median-based, vig-removed consensus over the vendor set.
    fn rebuild_consensus(&mut self) {
        let home_ml: Vec<i32> = self.odds.values().filter_map(|o| o.moneyline_home).collect();
        let away_ml: Vec<i32> = self.odds.values().filter_map(|o| o.moneyline_away).collect();

        if home_ml.is_empty() || away_ml.is_empty() {
            return;
        }

        let home = consensus_probability(&home_ml, ConsensusMethod::Median);
        let away = consensus_probability(&away_ml, ConsensusMethod::Median);

        let (home_prob, away_prob) = match (home, away) {
            (Some(h), Some(a)) if h + a > Decimal::ZERO => {
                let total = h + a;
                (Some(h / total), Some(a / total))
            }
            _ => (None, None),
        };

        let spread_line = median(self.odds.values().filter_map(|o| o.spread_home_value));
        let total_line = median(self.odds.values().filter_map(|o| o.total_value));

        self.consensus = Some(ConsensusOdds {
            num_sportsbooks: home_ml.len(),
            home_win_probability: home_prob,
            away_win_probability: away_prob,
            spread_line,
            total_line,
            last_update: Utc::now(),
        });
    }

    /// Markets of the given strategy-facing family ("moneyline" etc.).
    pub fn markets_of_family<'a, 'b>(
        &'a self,
        family: &'b str,
    ) -> impl Iterator<Item = &'a MarketState> + 'b
    where
        'a: 'b,
    {
        self.markets.values().filter(move |m| m.kind.family() == family)
    }

    pub fn moneyline_home(&self) -> Option<&MarketState> {
        self.markets
            .values()
            .find(|m| m.kind == MarketKind::MoneylineHome)
    }

    pub fn moneyline_away(&self) -> Option<&MarketState> {
        self.markets
            .values()
            .find(|m| m.kind == MarketKind::MoneylineAway)
    }

    /// Consensus win probability for the side a moneyline market pays on.
    pub fn consensus_for(&self, market: &MarketState) -> Option<Decimal> {
        let consensus = self.consensus.as_ref()?;
        match market.kind {
            MarketKind::MoneylineHome => consensus.home_win_probability,
            MarketKind::MoneylineAway => consensus.away_win_probability,
            _ => None,
        }
    }
}

/// Median of a decimal iterator; lower-middle for even counts, matching
/// the line-consensus convention.
fn median(values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    let mut values: Vec<Decimal> = values.collect();
    if values.is_empty() {
        return None;
    }
    values.sort();
    Some(values[values.len() / 2])
}
