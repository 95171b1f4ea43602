//! Relational write-through store.
//!
//! Thin adapter over a SQLite pool; the schema is embedded and applied
//! at startup. Decimals travel as TEXT so price math stays exact across
//! the persistence boundary. Writes that must be observed together
//! (order insert + position upsert) use idempotent upsert semantics so
//! a crash between them is recoverable by replay.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info, warn};

use courtside_common::{MarketKind, Side};
use courtside_market::{BookTop, BoxScore, VendorOdds};

use crate::config::RiskLimitsConfig;
use crate::executor::{OrderStatus, OrderType, Position, SimulatedOrder};
use crate::state::{GameState, MarketState};

/// Errors from the storage adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("game not found: {0}")]
    GameNotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Hydration record for a game row.
#[derive(Debug, Clone)]
pub struct GameRow {
    pub id: String,
    pub event_ticker: String,
    pub nba_game_id: Option<i64>,
    pub home_team: String,
    pub away_team: String,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub game_date: DateTime<Utc>,
    pub status: String,
    pub is_active: bool,
}

/// The storage adapter.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the database, creating the file if needed.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&self.pool)
            .await?;
        info!("storage schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Games and markets
    // ========================================================================

    pub async fn upsert_game(&self, game: &GameRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO games (id, event_ticker, nba_game_id, home_team, away_team,
                               home_team_id, away_team_id, game_date, status, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                nba_game_id = excluded.nba_game_id,
                status = excluded.status,
                is_active = excluded.is_active
            "#,
        )
        .bind(&game.id)
        .bind(&game.event_ticker)
        .bind(game.nba_game_id)
        .bind(&game.home_team)
        .bind(&game.away_team)
        .bind(game.home_team_id)
        .bind(game.away_team_id)
        .bind(game.game_date.to_rfc3339())
        .bind(&game.status)
        .bind(game.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_game(&self, game_id: &str) -> Result<GameRow, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, event_ticker, nba_game_id, home_team, away_team,
                   home_team_id, away_team_id, game_date, status, is_active
            FROM games WHERE id = ?1
            "#,
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::GameNotFound(game_id.to_string()))?;

        Ok(GameRow {
            id: row.get("id"),
            event_ticker: row.get("event_ticker"),
            nba_game_id: row.get("nba_game_id"),
            home_team: row.get("home_team"),
            away_team: row.get("away_team"),
            home_team_id: row.get("home_team_id"),
            away_team_id: row.get("away_team_id"),
            game_date: parse_ts(&row.get::<String, _>("game_date"))?,
            status: row.get("status"),
            is_active: row.get("is_active"),
        })
    }

    pub async fn insert_market(
        &self,
        game_id: &str,
        ticker: &str,
        kind: MarketKind,
        strike: Option<Decimal>,
        side: Option<Side>,
    ) -> Result<i64, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kalshi_markets (game_id, ticker, market_type, strike_value, side)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(ticker) DO UPDATE SET status = 'active'
            "#,
        )
        .bind(game_id)
        .bind(ticker)
        .bind(kind.as_str())
        .bind(strike.map(|s| s.to_string()))
        .bind(side.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM kalshi_markets WHERE ticker = ?1")
            .bind(ticker)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("id"))
    }

    pub async fn markets_for_game(&self, game_id: &str) -> Result<Vec<MarketState>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, ticker, market_type, strike_value, side FROM kalshi_markets WHERE game_id = ?1",
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.get("market_type");
                let kind = kind
                    .parse::<MarketKind>()
                    .map_err(StorageError::Corrupt)?;
                let strike: Option<String> = row.get("strike_value");
                let strike = strike
                    .map(|s| s.parse::<Decimal>().map_err(|e| StorageError::Corrupt(e.to_string())))
                    .transpose()?;
                let side: Option<String> = row.get("side");
                let side = side
                    .map(|s| s.parse::<Side>().map_err(StorageError::Corrupt))
                    .transpose()?;
                Ok(MarketState {
                    id: Some(row.get("id")),
                    ticker: row.get("ticker"),
                    kind,
                    strike,
                    team: None,
                    side,
                    orderbook: None,
                })
            })
            .collect()
    }

    // ========================================================================
    // Time-series writes
    // ========================================================================

    pub async fn insert_orderbook_snapshot(
        &self,
        market_id: i64,
        top: &BookTop,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO orderbook_snapshots
                (market_id, timestamp, yes_bid, yes_ask, no_bid, no_ask,
                 yes_bid_size, yes_ask_size, no_bid_size, no_ask_size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(market_id)
        .bind(Utc::now().to_rfc3339())
        .bind(top.yes_bid.map(|d| d.to_string()))
        .bind(top.yes_ask.map(|d| d.to_string()))
        .bind(top.no_bid.map(|d| d.to_string()))
        .bind(top.no_ask.map(|d| d.to_string()))
        .bind(top.yes_bid_size.and_then(decimal_to_i64))
        .bind(top.yes_ask_size.and_then(decimal_to_i64))
        .bind(top.no_bid_size.and_then(decimal_to_i64))
        .bind(top.no_ask_size.and_then(decimal_to_i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_nba_live(
        &self,
        game_id: &str,
        score: &BoxScore,
    ) -> Result<(), StorageError> {
        let raw = serde_json::json!({
            "nba_game_id": score.nba_game_id,
            "status": score.status,
            "period": score.period,
            "time": score.time_remaining,
            "home_score": score.home_score,
            "away_score": score.away_score,
        });
        sqlx::query(
            r#"
            INSERT INTO nba_live_data
                (game_id, timestamp, period, time_remaining, home_score, away_score, game_status, raw_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(game_id)
        .bind(Utc::now().to_rfc3339())
        .bind(score.period)
        .bind(&score.time_remaining)
        .bind(score.home_score)
        .bind(score.away_score)
        .bind(&score.status)
        .bind(raw.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_betting_odds(
        &self,
        game_id: &str,
        odds: &VendorOdds,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO betting_odds
                (game_id, nba_game_id, timestamp, vendor, moneyline_home, moneyline_away,
                 spread_home_value, spread_home_odds, spread_away_value, spread_away_odds,
                 total_value, total_over_odds, total_under_odds)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(game_id)
        .bind(odds.nba_game_id)
        .bind(Utc::now().to_rfc3339())
        .bind(&odds.vendor)
        .bind(odds.moneyline_home)
        .bind(odds.moneyline_away)
        .bind(odds.spread_home_value.map(|d| d.to_string()))
        .bind(odds.spread_home_odds)
        .bind(odds.spread_away_value.map(|d| d.to_string()))
        .bind(odds.spread_away_odds)
        .bind(odds.total_value.map(|d| d.to_string()))
        .bind(odds.total_over_odds)
        .bind(odds.total_under_odds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    pub async fn upsert_strategy(
        &self,
        id: &str,
        name: &str,
        kind: &str,
        enabled: bool,
        config: &serde_json::Value,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO strategies (id, name, type, is_enabled, config)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                is_enabled = excluded.is_enabled,
                config = excluded.config
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(kind)
        .bind(enabled)
        .bind(config.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Orders and positions
    // ========================================================================

    pub async fn insert_order(&self, order: &SimulatedOrder) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO simulated_orders
                (id, game_id, strategy_id, market_id, market_ticker, order_type, side,
                 quantity, limit_price, filled_price, status, placed_at, filled_at, signal_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                filled_price = excluded.filled_price,
                status = excluded.status,
                filled_at = excluded.filled_at
            "#,
        )
        .bind(&order.id)
        .bind(&order.game_id)
        .bind(&order.strategy_id)
        .bind(order.market_id)
        .bind(&order.market_ticker)
        .bind(order.order_type.as_str())
        .bind(order.side.as_str())
        .bind(order.quantity as i64)
        .bind(order.limit_price.map(|d| d.to_string()))
        .bind(order.fill_price.map(|d| d.to_string()))
        .bind(order.status.as_str())
        .bind(order.placed_at.to_rfc3339())
        .bind(order.filled_at.map(|t| t.to_rfc3339()))
        .bind(order.signal_data.to_string())
        .execute(&self.pool)
        .await?;
        debug!(order_id = %order.id, status = %order.status, "order stored");
        Ok(())
    }

    pub async fn upsert_position(&self, position: &Position) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO positions
                (id, game_id, strategy_id, market_id, market_ticker, side, quantity,
                 avg_price, current_price, unrealized_pnl, realized_pnl, is_open,
                 opened_at, closed_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                quantity = excluded.quantity,
                avg_price = excluded.avg_price,
                current_price = excluded.current_price,
                unrealized_pnl = excluded.unrealized_pnl,
                realized_pnl = excluded.realized_pnl,
                is_open = excluded.is_open,
                closed_at = excluded.closed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.id)
        .bind(&position.game_id)
        .bind(&position.strategy_id)
        .bind(position.market_id)
        .bind(&position.market_ticker)
        .bind(position.side.as_str())
        .bind(position.quantity as i64)
        .bind(position.avg_price.to_string())
        .bind(position.current_price.map(|d| d.to_string()))
        .bind(position.unrealized_pnl.to_string())
        .bind(position.realized_pnl.to_string())
        .bind(position.is_open)
        .bind(position.opened_at.to_rfc3339())
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Filled orders in placement order, for position-book replay.
    pub async fn orders_for_replay(&self) -> Result<Vec<SimulatedOrder>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, game_id, strategy_id, market_id, market_ticker, order_type, side,
                   quantity, limit_price, filled_price, status, placed_at, filled_at, signal_data
            FROM simulated_orders
            WHERE status = 'filled'
            ORDER BY placed_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| order_from_row(&row)).collect()
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, game_id, strategy_id, market_id, market_ticker, side, quantity,
                   avg_price, current_price, unrealized_pnl, realized_pnl, is_open,
                   opened_at, closed_at
            FROM positions WHERE is_open = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| position_from_row(&row)).collect()
    }

    // ========================================================================
    // Operational tables
    // ========================================================================

    pub async fn insert_system_log(
        &self,
        level: &str,
        component: &str,
        message: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO system_logs (timestamp, level, component, message) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(level)
        .bind(component)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_strategy_performance(
        &self,
        strategy_id: &str,
        total_orders: i64,
        filled_orders: i64,
        rejected_orders: i64,
        winning_trades: i64,
        losing_trades: i64,
        realized_pnl: Decimal,
        unrealized_pnl: Decimal,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO strategy_performance
                (strategy_id, timestamp, total_orders, filled_orders, rejected_orders,
                 winning_trades, losing_trades, realized_pnl, unrealized_pnl)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(strategy_id)
        .bind(Utc::now().to_rfc3339())
        .bind(total_orders)
        .bind(filled_orders)
        .bind(rejected_orders)
        .bind(winning_trades)
        .bind(losing_trades)
        .bind(realized_pnl.to_string())
        .bind(unrealized_pnl.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the active risk policy, one row per limit. Idempotent.
    pub async fn save_risk_limits(&self, limits: &RiskLimitsConfig) -> Result<(), StorageError> {
        for (limit_type, value) in risk_limit_rows(limits) {
            sqlx::query(
                r#"
                INSERT INTO risk_limits (limit_type, limit_value, is_enabled, updated_at)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(limit_type) DO UPDATE SET
                    limit_value = excluded.limit_value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(limit_type)
            .bind(value.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Load the stored risk policy, overlaying enabled rows onto the
    /// defaults. Returns `None` when the table has never been seeded;
    /// unknown limit types are skipped with a warning.
    pub async fn load_risk_limits(&self) -> Result<Option<RiskLimitsConfig>, StorageError> {
        let rows =
            sqlx::query("SELECT limit_type, limit_value FROM risk_limits WHERE is_enabled = 1")
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut limits = RiskLimitsConfig::default();
        for row in rows {
            let limit_type: String = row.get("limit_type");
            let raw: String = row.get("limit_value");
            let value: i64 = raw.parse().map_err(|_| {
                StorageError::Corrupt(format!("bad value for {}: {}", limit_type, raw))
            })?;
            match limit_type.as_str() {
                "max_contracts_per_market" => limits.max_contracts_per_market = value as u32,
                "max_contracts_per_game" => limits.max_contracts_per_game = value as u32,
                "max_total_contracts" => limits.max_total_contracts = value as u32,
                "max_daily_loss" => limits.max_daily_loss = value,
                "max_weekly_loss" => limits.max_weekly_loss = value,
                "max_per_trade_risk" => limits.max_per_trade_risk = value,
                "max_total_exposure" => limits.max_total_exposure = value,
                "max_exposure_per_game" => limits.max_exposure_per_game = value,
                "max_exposure_per_strategy" => limits.max_exposure_per_strategy = value,
                "max_orders_per_day" => limits.max_orders_per_day = value as u32,
                "max_orders_per_hour" => limits.max_orders_per_hour = value as u32,
                "loss_streak_cooldown" => limits.loss_streak_cooldown = value as u32,
                other => warn!(limit_type = other, "unknown risk limit type, skipping"),
            }
        }
        Ok(Some(limits))
    }

    /// Persist a game's hydrated shape (game row + markets). Used by the
    /// aggregator on load so a fresh process can rehydrate.
    pub async fn persist_game_shape(&self, state: &GameState) -> Result<(), StorageError> {
        self.upsert_game(&GameRow {
            id: state.game_id.clone(),
            event_ticker: state.event_ticker.clone(),
            nba_game_id: state.nba_game_id,
            home_team: state.home_team.clone(),
            away_team: state.away_team.clone(),
            home_team_id: state.home_team_id,
            away_team_id: state.away_team_id,
            game_date: state.game_date,
            status: state.phase.as_str().to_string(),
            is_active: !state.phase.is_terminal(),
        })
        .await?;
        for market in state.markets.values() {
            self.insert_market(
                &state.game_id,
                &market.ticker,
                market.kind,
                market.strike,
                market.side,
            )
            .await?;
        }
        Ok(())
    }
}

/// The risk policy as (limit_type, value) rows, matching the column
/// values `load_risk_limits` reads back.
fn risk_limit_rows(limits: &RiskLimitsConfig) -> [(&'static str, i64); 12] {
    [
        ("max_contracts_per_market", i64::from(limits.max_contracts_per_market)),
        ("max_contracts_per_game", i64::from(limits.max_contracts_per_game)),
        ("max_total_contracts", i64::from(limits.max_total_contracts)),
        ("max_daily_loss", limits.max_daily_loss),
        ("max_weekly_loss", limits.max_weekly_loss),
        ("max_per_trade_risk", limits.max_per_trade_risk),
        ("max_total_exposure", limits.max_total_exposure),
        ("max_exposure_per_game", limits.max_exposure_per_game),
        ("max_exposure_per_strategy", limits.max_exposure_per_strategy),
        ("max_orders_per_day", i64::from(limits.max_orders_per_day)),
        ("max_orders_per_hour", i64::from(limits.max_orders_per_hour)),
        ("loss_streak_cooldown", i64::from(limits.loss_streak_cooldown)),
    ]
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {}: {}", text, e)))
}

fn parse_decimal(text: &str) -> Result<Decimal, StorageError> {
    text.parse()
        .map_err(|e| StorageError::Corrupt(format!("bad decimal {}: {}", text, e)))
}

fn decimal_to_i64(d: Decimal) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    d.to_i64()
}

fn order_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SimulatedOrder, StorageError> {
    let side: String = row.get("side");
    let order_type: String = row.get("order_type");
    let status: String = row.get("status");
    let limit_price: Option<String> = row.get("limit_price");
    let filled_price: Option<String> = row.get("filled_price");
    let filled_at: Option<String> = row.get("filled_at");
    let signal_data: Option<String> = row.get("signal_data");

    Ok(SimulatedOrder {
        id: row.get("id"),
        game_id: row.get("game_id"),
        strategy_id: row.get("strategy_id"),
        market_id: row.get("market_id"),
        market_ticker: row.get("market_ticker"),
        order_type: order_type.parse::<OrderType>().map_err(StorageError::Corrupt)?,
        side: side.parse::<Side>().map_err(StorageError::Corrupt)?,
        quantity: row.get::<i64, _>("quantity") as u32,
        limit_price: limit_price.as_deref().map(parse_decimal).transpose()?,
        fill_price: filled_price.as_deref().map(parse_decimal).transpose()?,
        status: status.parse::<OrderStatus>().map_err(StorageError::Corrupt)?,
        placed_at: parse_ts(&row.get::<String, _>("placed_at"))?,
        filled_at: filled_at.as_deref().map(parse_ts).transpose()?,
        signal_data: signal_data
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        reject_reason: None,
    })
}

fn position_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Position, StorageError> {
    let side: String = row.get("side");
    let current_price: Option<String> = row.get("current_price");
    let unrealized: Option<String> = row.get("unrealized_pnl");
    let closed_at: Option<String> = row.get("closed_at");

    Ok(Position {
        id: row.get("id"),
        game_id: row.get("game_id"),
        strategy_id: row.get("strategy_id"),
        market_id: row.get("market_id"),
        market_ticker: row.get("market_ticker"),
        side: side.parse::<Side>().map_err(StorageError::Corrupt)?,
        quantity: row.get::<i64, _>("quantity") as u32,
        avg_price: parse_decimal(&row.get::<String, _>("avg_price"))?,
        current_price: current_price.as_deref().map(parse_decimal).transpose()?,
        unrealized_pnl: unrealized
            .as_deref()
            .map(parse_decimal)
            .transpose()?
            .unwrap_or(Decimal::ZERO),
        realized_pnl: parse_decimal(&row.get::<String, _>("realized_pnl"))?,
        is_open: row.get("is_open"),
        opened_at: parse_ts(&row.get::<String, _>("opened_at"))?,
        closed_at: closed_at.as_deref().map(parse_ts).transpose()?,
    })
}
