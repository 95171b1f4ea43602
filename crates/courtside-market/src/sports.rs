//! Sports-data client: live scoreboard and sportsbook odds.
//!
//! Pure request/response adapter over HTTPS with a bearer-style key.
//! Every operation runs under a 10 s timeout with up to three retries
//! (1 s, 2 s, 4 s) on transport errors and rate limits; `Retry-After`
//! is honored when present. The fourth failure surfaces as a typed
//! error — nothing here ever panics through the polling loop.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ticker::{parse_event_ticker, EventTickerInfo};

/// Typed errors from the sports-data feed.
#[derive(Debug, Error)]
pub enum SportsError {
    #[error("transport failure after retries: {0}")]
    Transport(String),
    #[error("invalid API key")]
    Auth,
    #[error("rate limited after retries")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("bad ticker: {0}")]
    Ticker(String),
}

/// Configuration for the sports feed.
#[derive(Debug, Clone)]
pub struct SportsFeedConfig {
    /// Base URL, e.g. "https://api.sportsdata.example".
    pub base_url: String,
    /// Bearer-style API key placed in the Authorization header.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per operation (first try + retries).
    pub max_attempts: u32,
}

impl Default for SportsFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.balldontlie.io".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
            max_attempts: 4,
        }
    }
}

/// A scheduled or live game as reported by the scoreboard feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSummary {
    pub nba_game_id: i64,
    pub date: Option<NaiveDate>,
    pub status: String,
    pub home_abbr: String,
    pub away_abbr: String,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub period: i32,
    pub time_remaining: String,
}

/// A live box score entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxScore {
    pub nba_game_id: i64,
    pub status: String,
    pub period: i32,
    pub time_remaining: String,
    pub home_score: i32,
    pub away_score: i32,
}

/// One vendor's odds for one game. American odds are integers; lines
/// are decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorOdds {
    pub nba_game_id: i64,
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
}

/// Sports-data client.
pub struct SportsFeed {
    config: SportsFeedConfig,
    client: reqwest::Client,
}

impl SportsFeed {
    pub fn new(config: SportsFeedConfig) -> Result<Self, SportsError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| SportsError::Auth)?;
        headers.insert(AUTHORIZATION, key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SportsError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// All games scheduled for a date.
    pub async fn games_for_date(&self, date: NaiveDate) -> Result<Vec<GameSummary>, SportsError> {
        let url = format!(
            "{}/v1/games?dates[]={}&per_page=100",
            self.config.base_url, date
        );
        let body: Envelope<GameWire> = self.get_with_retries(&url).await?;
        Ok(body.data.into_iter().map(GameSummary::from).collect())
    }

    /// Box scores for currently live games.
    pub async fn live_box_scores(&self) -> Result<Vec<BoxScore>, SportsError> {
        let url = format!("{}/v1/box_scores/live", self.config.base_url);
        let body: Envelope<BoxScoreWire> = self.get_with_retries(&url).await?;
        Ok(body.data.into_iter().map(|b| BoxScore::from(b.game)).collect())
    }

    /// Per-vendor odds for the given game ids.
    pub async fn odds_for_games(&self, game_ids: &[i64]) -> Result<Vec<VendorOdds>, SportsError> {
        let params: Vec<String> = game_ids.iter().map(|id| format!("game_ids[]={}", id)).collect();
        let url = format!("{}/nba/v2/odds?{}", self.config.base_url, params.join("&"));
        let body: Envelope<OddsWire> = self.get_with_retries(&url).await?;
        Ok(body.data.into_iter().map(VendorOdds::from).collect())
    }

    /// Per-vendor odds for every game on a date.
    pub async fn odds_for_date(&self, date: NaiveDate) -> Result<Vec<VendorOdds>, SportsError> {
        let url = format!("{}/nba/v2/odds?dates[]={}", self.config.base_url, date);
        let body: Envelope<OddsWire> = self.get_with_retries(&url).await?;
        Ok(body.data.into_iter().map(VendorOdds::from).collect())
    }

    /// Find the game matching an event ticker's date and teams.
    pub async fn match_event_ticker(&self, ticker: &str) -> Result<GameSummary, SportsError> {
        let info: EventTickerInfo =
            parse_event_ticker(ticker).map_err(|e| SportsError::Ticker(e.to_string()))?;
        let games = self.games_for_date(info.date).await?;
        match_game(&games, &info.away_abbr, &info.home_abbr)
    }

    async fn get_with_retries<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, SportsError> {
        let mut last_error = SportsError::Transport("no attempts made".to_string());
        let mut server_retry_after: Option<u64> = None;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let delay = retry_delay(attempt, server_retry_after.take());
                debug!(attempt, ?delay, "retrying sports request");
                tokio::time::sleep(delay).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| SportsError::Decode(e.to_string()));
                    }
                    match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            // Fatal for the adapter; retrying cannot help.
                            return Err(SportsError::Auth);
                        }
                        StatusCode::NOT_FOUND => {
                            return Err(SportsError::NotFound(url.to_string()));
                        }
                        StatusCode::TOO_MANY_REQUESTS => {
                            server_retry_after = response
                                .headers()
                                .get(RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.parse::<u64>().ok());
                            warn!(retry_after = ?server_retry_after, "rate limited, backing off");
                            last_error = SportsError::RateLimited;
                        }
                        other => {
                            let body = response.text().await.unwrap_or_default();
                            return Err(SportsError::Api {
                                status: other.as_u16(),
                                body,
                            });
                        }
                    }
                }
                Err(e) => {
                    last_error = SportsError::Transport(e.to_string());
                }
            }
        }

        Err(last_error)
    }
}

/// Backoff schedule: 1 s, 2 s, 4 s — overridden by Retry-After when the
/// server provides one.
fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs.min(30));
    }
    Duration::from_secs(1u64 << (attempt.saturating_sub(1)).min(4))
}

/// Match a game by team abbreviations, case-folded. Zero or multiple
/// matches fail with NotFound rather than guessing.
pub fn match_game(
    games: &[GameSummary],
    away_abbr: &str,
    home_abbr: &str,
) -> Result<GameSummary, SportsError> {
    let away = away_abbr.to_uppercase();
    let home = home_abbr.to_uppercase();
    let mut matches = games.iter().filter(|g| {
        g.away_abbr.to_uppercase() == away && g.home_abbr.to_uppercase() == home
    });

    match (matches.next(), matches.next()) {
        (Some(game), None) => Ok(game.clone()),
        (None, _) => Err(SportsError::NotFound(format!(
            "no game found for {} @ {}",
            away, home
        ))),
        (Some(_), Some(_)) => Err(SportsError::NotFound(format!(
            "ambiguous match for {} @ {}",
            away, home
        ))),
    }
}

// ============================================================================
// Wire structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TeamWire {
    id: i64,
    abbreviation: String,
}

#[derive(Debug, Deserialize)]
struct GameWire {
    id: i64,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    period: i32,
    #[serde(default)]
    time: Option<String>,
    home_team: TeamWire,
    visitor_team: TeamWire,
    #[serde(default)]
    home_team_score: i32,
    #[serde(default)]
    visitor_team_score: i32,
}

#[derive(Debug, Deserialize)]
struct BoxScoreWire {
    game: GameWire,
}

#[derive(Debug, Deserialize)]
struct OddsWire {
    game_id: i64,
    #[serde(default)]
    vendor: String,
    #[serde(default)]
    moneyline_home_odds: Option<i32>,
    #[serde(default)]
    moneyline_away_odds: Option<i32>,
    #[serde(default)]
    spread_home_value: Option<Decimal>,
    #[serde(default)]
    spread_home_odds: Option<i32>,
    #[serde(default)]
    spread_away_value: Option<Decimal>,
    #[serde(default)]
    spread_away_odds: Option<i32>,
    #[serde(default)]
    total_value: Option<Decimal>,
    #[serde(default)]
    total_over_odds: Option<i32>,
    #[serde(default)]
    total_under_odds: Option<i32>,
}

impl From<GameWire> for GameSummary {
    fn from(wire: GameWire) -> Self {
        let date = wire
            .date
            .as_deref()
            .and_then(|d| d.get(..10))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        Self {
            nba_game_id: wire.id,
            date,
            status: wire.status,
            home_abbr: wire.home_team.abbreviation.to_uppercase(),
            away_abbr: wire.visitor_team.abbreviation.to_uppercase(),
            home_team_id: wire.home_team.id,
            away_team_id: wire.visitor_team.id,
            home_score: wire.home_team_score,
            away_score: wire.visitor_team_score,
            period: wire.period,
            time_remaining: wire.time.unwrap_or_default(),
        }
    }
}

impl From<GameWire> for BoxScore {
    fn from(wire: GameWire) -> Self {
        Self {
            nba_game_id: wire.id,
            status: wire.status,
            period: wire.period,
            time_remaining: wire.time.unwrap_or_default(),
            home_score: wire.home_team_score,
            away_score: wire.visitor_team_score,
        }
    }
}

impl From<OddsWire> for VendorOdds {
    fn from(wire: OddsWire) -> Self {
        Self {
            nba_game_id: wire.game_id,
            vendor: wire.vendor,
            moneyline_home: wire.moneyline_home_odds,
            moneyline_away: wire.moneyline_away_odds,
            spread_home_value: wire.spread_home_value,
            spread_home_odds: wire.spread_home_odds,
            spread_away_value: wire.spread_away_value,
            spread_away_odds: wire.spread_away_odds,
            total_value: wire.total_value,
            total_over_odds: wire.total_over_odds,
            total_under_odds: wire.total_under_odds,
        }
    }
}
