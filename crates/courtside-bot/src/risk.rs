//! Stateful pre-trade risk gate and post-trade accounting.
//!
//! `check` validates an order against the limit table in a fixed order,
//! short-circuiting on the first failure. Position-derived checks read
//! the caller's position snapshot; order counters, loss accumulators
//! and the loss-streak cooldown are the gate's own single-writer state.
//! Daily accumulators reset at 00:00 UTC, weekly at Monday 00:00 UTC;
//! the hourly order window is rolling.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RiskLimitsConfig;
use crate::executor::{Position, SimulatedOrder};

/// Worst-case loss per contract, in cents.
const WORST_CASE_PER_CONTRACT: i64 = 100;

/// Cooldown applied after a loss streak.
const LOSS_STREAK_PAUSE_MINUTES: i64 = 5;

/// The limit that rejected an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLimitKind {
    MaxContractsPerMarket,
    MaxContractsPerGame,
    MaxTotalContracts,
    MaxDailyLoss,
    MaxWeeklyLoss,
    MaxPerTradeRisk,
    MaxTotalExposure,
    MaxExposurePerGame,
    MaxExposurePerStrategy,
    MaxOrdersPerDay,
    MaxOrdersPerHour,
    LossStreakCooldown,
}

impl RiskLimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLimitKind::MaxContractsPerMarket => "max_contracts_per_market",
            RiskLimitKind::MaxContractsPerGame => "max_contracts_per_game",
            RiskLimitKind::MaxTotalContracts => "max_total_contracts",
            RiskLimitKind::MaxDailyLoss => "max_daily_loss",
            RiskLimitKind::MaxWeeklyLoss => "max_weekly_loss",
            RiskLimitKind::MaxPerTradeRisk => "max_per_trade_risk",
            RiskLimitKind::MaxTotalExposure => "max_total_exposure",
            RiskLimitKind::MaxExposurePerGame => "max_exposure_per_game",
            RiskLimitKind::MaxExposurePerStrategy => "max_exposure_per_strategy",
            RiskLimitKind::MaxOrdersPerDay => "max_orders_per_day",
            RiskLimitKind::MaxOrdersPerHour => "max_orders_per_hour",
            RiskLimitKind::LossStreakCooldown => "loss_streak_cooldown",
        }
    }
}

impl std::fmt::Display for RiskLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a pre-trade check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskCheck {
    Approved,
    Rejected {
        limit_type: RiskLimitKind,
        current: Decimal,
        limit: Decimal,
        reason: String,
    },
}

impl RiskCheck {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskCheck::Approved)
    }

    fn rejected(limit_type: RiskLimitKind, current: impl Into<Decimal>, limit: i64, reason: String) -> Self {
        RiskCheck::Rejected {
            limit_type,
            current: current.into(),
            limit: Decimal::from(limit),
            reason,
        }
    }
}

/// Snapshot of the gate's accumulators.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub enabled: bool,
    pub daily_loss: Decimal,
    pub weekly_loss: Decimal,
    pub orders_today: usize,
    pub orders_this_hour: usize,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// The risk gate. Single-writer: owned by the execution path.
pub struct RiskGate {
    limits: RiskLimitsConfig,
    enabled: bool,
    daily_loss: Decimal,
    weekly_loss: Decimal,
    hourly_orders: Vec<DateTime<Utc>>,
    daily_orders: Vec<DateTime<Utc>>,
    consecutive_losses: u32,
    cooldown_until: Option<DateTime<Utc>>,
    last_daily_reset: NaiveDate,
    last_weekly_reset: NaiveDate,
}

impl RiskGate {
    pub fn new(limits: RiskLimitsConfig) -> Self {
        Self {
            limits,
            enabled: true,
            daily_loss: Decimal::ZERO,
            weekly_loss: Decimal::ZERO,
            hourly_orders: Vec::new(),
            daily_orders: Vec::new(),
            consecutive_losses: 0,
            cooldown_until: None,
            // Anchored on the first check/record so the gate carries no
            // assumptions about when the process started.
            last_daily_reset: NaiveDate::MIN,
            last_weekly_reset: NaiveDate::MIN,
        }
    }

    pub fn limits(&self) -> &RiskLimitsConfig {
        &self.limits
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        info!("risk gate enabled");
    }

    /// Disabling is allowed but loud: checks pass unconditionally while
    /// record() keeps accruing.
    pub fn disable(&mut self) {
        self.enabled = false;
        warn!("risk gate DISABLED, all orders will be approved");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run all checks against an order and the current position book.
    pub fn check(&mut self, order: &SimulatedOrder, positions: &[Position]) -> RiskCheck {
        self.check_at(order, positions, Utc::now())
    }

    /// Clock-injected variant of [`check`], used by tests and replay.
    pub fn check_at(
        &mut self,
        order: &SimulatedOrder,
        positions: &[Position],
        now: DateTime<Utc>,
    ) -> RiskCheck {
        if !self.enabled {
            return RiskCheck::Approved;
        }

        self.run_resets(now);

        let result = self.evaluate(order, positions, now);
        if let RiskCheck::Rejected { ref reason, .. } = result {
            warn!(order_id = %order.id, reason = %reason, "risk check rejected order");
        }
        result
    }

    fn evaluate(
        &mut self,
        order: &SimulatedOrder,
        positions: &[Position],
        now: DateTime<Utc>,
    ) -> RiskCheck {
        let quantity = i64::from(order.quantity);
        let open: Vec<&Position> = positions.iter().filter(|p| p.is_open).collect();

        // 1. Loss-streak cooldown.
        if self.consecutive_losses >= self.limits.loss_streak_cooldown {
            if let Some(until) = self.cooldown_until {
                if now < until {
                    let remaining = (until - now).num_seconds();
                    return RiskCheck::rejected(
                        RiskLimitKind::LossStreakCooldown,
                        Decimal::from(self.consecutive_losses),
                        i64::from(self.limits.loss_streak_cooldown),
                        format!(
                            "in cooldown after {} consecutive losses, {}s remaining",
                            self.consecutive_losses, remaining
                        ),
                    );
                }
            }
        }

        // 2. Contracts per market.
        let market_contracts: i64 = open
            .iter()
            .filter(|p| p.market_ticker == order.market_ticker)
            .map(|p| i64::from(p.quantity))
            .sum();
        let limit = i64::from(self.limits.max_contracts_per_market);
        if market_contracts + quantity > limit {
            return RiskCheck::rejected(
                RiskLimitKind::MaxContractsPerMarket,
                Decimal::from(market_contracts),
                limit,
                format!(
                    "would exceed max contracts per market ({} > {})",
                    market_contracts + quantity,
                    limit
                ),
            );
        }

        // 3. Contracts per game.
        let game_contracts: i64 = open
            .iter()
            .filter(|p| p.game_id == order.game_id)
            .map(|p| i64::from(p.quantity))
            .sum();
        let limit = i64::from(self.limits.max_contracts_per_game);
        if game_contracts + quantity > limit {
            return RiskCheck::rejected(
                RiskLimitKind::MaxContractsPerGame,
                Decimal::from(game_contracts),
                limit,
                format!(
                    "would exceed max contracts per game ({} > {})",
                    game_contracts + quantity,
                    limit
                ),
            );
        }

        // 4. Total contracts.
        let total_contracts: i64 = open.iter().map(|p| i64::from(p.quantity)).sum();
        let limit = i64::from(self.limits.max_total_contracts);
        if total_contracts + quantity > limit {
            return RiskCheck::rejected(
                RiskLimitKind::MaxTotalContracts,
                Decimal::from(total_contracts),
                limit,
                format!(
                    "would exceed max total contracts ({} > {})",
                    total_contracts + quantity,
                    limit
                ),
            );
        }

        // 5. Per-trade risk at worst case (100c per contract).
        let worst_case = quantity * WORST_CASE_PER_CONTRACT;
        if worst_case > self.limits.max_per_trade_risk {
            return RiskCheck::rejected(
                RiskLimitKind::MaxPerTradeRisk,
                Decimal::from(worst_case),
                self.limits.max_per_trade_risk,
                format!(
                    "per-trade risk too high ({}c > {}c)",
                    worst_case, self.limits.max_per_trade_risk
                ),
            );
        }

        // 6. Exposure limits: open cost basis plus this order's worst case.
        let cost = |p: &&Position| p.avg_price * Decimal::from(p.quantity);
        let order_cost = Decimal::from(worst_case);

        let game_exposure: Decimal = open
            .iter()
            .filter(|p| p.game_id == order.game_id)
            .map(cost)
            .sum();
        if game_exposure + order_cost > Decimal::from(self.limits.max_exposure_per_game) {
            return RiskCheck::rejected(
                RiskLimitKind::MaxExposurePerGame,
                game_exposure,
                self.limits.max_exposure_per_game,
                format!(
                    "would exceed max exposure per game ({}c > {}c)",
                    game_exposure + order_cost,
                    self.limits.max_exposure_per_game
                ),
            );
        }

        if let Some(strategy_id) = &order.strategy_id {
            let strategy_exposure: Decimal = open
                .iter()
                .filter(|p| p.strategy_id.as_deref() == Some(strategy_id))
                .map(cost)
                .sum();
            if strategy_exposure + order_cost > Decimal::from(self.limits.max_exposure_per_strategy)
            {
                return RiskCheck::rejected(
                    RiskLimitKind::MaxExposurePerStrategy,
                    strategy_exposure,
                    self.limits.max_exposure_per_strategy,
                    format!(
                        "would exceed max exposure per strategy ({}c > {}c)",
                        strategy_exposure + order_cost,
                        self.limits.max_exposure_per_strategy
                    ),
                );
            }
        }

        let total_exposure: Decimal = open.iter().map(cost).sum();
        if total_exposure + order_cost > Decimal::from(self.limits.max_total_exposure) {
            return RiskCheck::rejected(
                RiskLimitKind::MaxTotalExposure,
                total_exposure,
                self.limits.max_total_exposure,
                format!(
                    "would exceed max total exposure ({}c > {}c)",
                    total_exposure + order_cost,
                    self.limits.max_total_exposure
                ),
            );
        }

        // 7. Order-rate limits. The hourly window is rolling.
        let hour_ago = now - ChronoDuration::hours(1);
        self.hourly_orders.retain(|t| *t > hour_ago);
        let hourly = self.hourly_orders.len();
        if hourly >= self.limits.max_orders_per_hour as usize {
            return RiskCheck::rejected(
                RiskLimitKind::MaxOrdersPerHour,
                Decimal::from(hourly as i64),
                i64::from(self.limits.max_orders_per_hour),
                format!(
                    "hourly order limit reached ({} >= {})",
                    hourly, self.limits.max_orders_per_hour
                ),
            );
        }
        let daily = self.daily_orders.len();
        if daily >= self.limits.max_orders_per_day as usize {
            return RiskCheck::rejected(
                RiskLimitKind::MaxOrdersPerDay,
                Decimal::from(daily as i64),
                i64::from(self.limits.max_orders_per_day),
                format!(
                    "daily order limit reached ({} >= {})",
                    daily, self.limits.max_orders_per_day
                ),
            );
        }

        // 8. Loss limits: reject when this order's worst case would push
        // the accumulated loss past the cap.
        if self.daily_loss + order_cost > Decimal::from(self.limits.max_daily_loss) {
            return RiskCheck::rejected(
                RiskLimitKind::MaxDailyLoss,
                self.daily_loss,
                self.limits.max_daily_loss,
                format!(
                    "daily loss limit ({}c + {}c worst case > {}c)",
                    self.daily_loss, order_cost, self.limits.max_daily_loss
                ),
            );
        }
        if self.weekly_loss + order_cost > Decimal::from(self.limits.max_weekly_loss) {
            return RiskCheck::rejected(
                RiskLimitKind::MaxWeeklyLoss,
                self.weekly_loss,
                self.limits.max_weekly_loss,
                format!(
                    "weekly loss limit ({}c + {}c worst case > {}c)",
                    self.weekly_loss, order_cost, self.limits.max_weekly_loss
                ),
            );
        }

        RiskCheck::Approved
    }

    /// Record a filled opening order. `realized_delta` is zero on opens;
    /// closes and settlements report through [`record_realized`].
    pub fn record(&mut self, order: &SimulatedOrder, fill_price: Decimal, realized_delta: Decimal) {
        self.record_at(order, fill_price, realized_delta, Utc::now());
    }

    /// Clock-injected variant of [`record`].
    pub fn record_at(
        &mut self,
        order: &SimulatedOrder,
        fill_price: Decimal,
        realized_delta: Decimal,
        now: DateTime<Utc>,
    ) {
        self.run_resets(now);
        self.hourly_orders.push(now);
        self.daily_orders.push(now);
        info!(
            order_id = %order.id,
            fill_price = %fill_price,
            orders_today = self.daily_orders.len(),
            "order recorded"
        );
        if realized_delta != Decimal::ZERO {
            self.record_realized_at(realized_delta, now);
        }
    }

    /// Record realized P&L from a close or settlement.
    pub fn record_realized(&mut self, realized_delta: Decimal) {
        self.record_realized_at(realized_delta, Utc::now());
    }

    pub fn record_realized_at(&mut self, realized_delta: Decimal, now: DateTime<Utc>) {
        self.run_resets(now);
        if realized_delta < Decimal::ZERO {
            let loss = realized_delta.abs();
            self.daily_loss += loss;
            self.weekly_loss += loss;
            self.consecutive_losses += 1;
            if self.consecutive_losses >= self.limits.loss_streak_cooldown {
                let until = now + ChronoDuration::minutes(LOSS_STREAK_PAUSE_MINUTES);
                self.cooldown_until = Some(until);
                warn!(
                    consecutive = self.consecutive_losses,
                    until = %until,
                    "loss streak cooldown triggered"
                );
            }
        } else if realized_delta > Decimal::ZERO {
            self.consecutive_losses = 0;
        }
        info!(
            delta = %realized_delta,
            daily_loss = %self.daily_loss,
            streak = self.consecutive_losses,
            "realized P&L recorded"
        );
    }

    pub fn status(&mut self) -> RiskStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&mut self, now: DateTime<Utc>) -> RiskStatus {
        self.run_resets(now);
        let hour_ago = now - ChronoDuration::hours(1);
        RiskStatus {
            enabled: self.enabled,
            daily_loss: self.daily_loss,
            weekly_loss: self.weekly_loss,
            orders_today: self.daily_orders.len(),
            orders_this_hour: self.hourly_orders.iter().filter(|t| **t > hour_ago).count(),
            consecutive_losses: self.consecutive_losses,
            cooldown_until: self.cooldown_until.filter(|u| *u > now),
        }
    }

    /// Daily reset at 00:00 UTC, weekly at Monday 00:00 UTC.
    fn run_resets(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today > self.last_daily_reset {
            self.daily_loss = Decimal::ZERO;
            self.daily_orders.clear();
            self.last_daily_reset = today;
            info!("daily risk counters reset");
        }
        let this_week = week_start(today);
        if this_week > self.last_weekly_reset {
            self.weekly_loss = Decimal::ZERO;
            self.last_weekly_reset = this_week;
            info!("weekly risk counters reset");
        }
    }

    /// Test hook: seed the loss accumulators as of today.
    #[cfg(test)]
    fn seed_losses(&mut self, daily: Decimal, weekly: Decimal) {
        let today = Utc::now().date_naive();
        self.daily_loss = daily;
        self.weekly_loss = weekly;
        self.last_daily_reset = today;
        self.last_weekly_reset = week_start(today);
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - ChronoDuration::days(i64::from(date.weekday().num_days_from_monday()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_common::Side;
    use rust_decimal_macros::dec;

    fn gate() -> RiskGate {
        RiskGate::new(RiskLimitsConfig::default())
    }

    fn order(quantity: u32) -> SimulatedOrder {
        SimulatedOrder::market(
            "game-1".to_string(),
            Some("strat-1".to_string()),
            "MKT-Y".to_string(),
            Side::Yes,
            quantity,
            serde_json::Value::Null,
        )
    }

    fn open_position(ticker: &str, game: &str, quantity: u32, avg: Decimal) -> Position {
        Position::open(
            game.to_string(),
            Some("strat-1".to_string()),
            None,
            ticker.to_string(),
            Side::Yes,
            quantity,
            avg,
        )
    }

    #[test]
    fn test_clean_order_approved() {
        let mut gate = gate();
        assert!(gate.check(&order(5), &[]).is_approved());
    }

    #[test]
    fn test_contracts_per_market_limit() {
        let mut gate = gate();
        let positions = vec![open_position("MKT-Y", "game-1", 95, dec!(40))];
        let result = gate.check(&order(10), &positions);
        match result {
            RiskCheck::Rejected { limit_type, current, limit, .. } => {
                assert_eq!(limit_type, RiskLimitKind::MaxContractsPerMarket);
                assert_eq!(current, dec!(95));
                assert_eq!(limit, dec!(100));
            }
            RiskCheck::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_contracts_per_game_limit() {
        let mut gate = gate();
        // Three markets in the same game, each under the per-market cap,
        // but 210 contracts game-wide.
        let positions = vec![
            open_position("MKT-Y", "game-1", 70, dec!(10)),
            open_position("MKT-N", "game-1", 70, dec!(10)),
            open_position("MKT-S", "game-1", 70, dec!(10)),
        ];
        let result = gate.check(&order(5), &positions);
        assert!(matches!(
            result,
            RiskCheck::Rejected { limit_type: RiskLimitKind::MaxContractsPerGame, .. }
        ));
    }

    #[test]
    fn test_closed_positions_do_not_count() {
        let mut gate = gate();
        let mut position = open_position("MKT-Y", "game-1", 95, dec!(40));
        position.is_open = false;
        position.quantity = 0;
        assert!(gate.check(&order(10), &[position]).is_approved());
    }

    #[test]
    fn test_per_trade_risk_limit() {
        let mut gate = gate();
        // 6 contracts * 100c worst case = 600c > 500c.
        let result = gate.check(&order(6), &[]);
        assert!(matches!(
            result,
            RiskCheck::Rejected { limit_type: RiskLimitKind::MaxPerTradeRisk, .. }
        ));
    }

    #[test]
    fn test_daily_loss_projection_rejects() {
        // Accumulator at 600c, order worst case 500c:
        // 600 + 500 = 1100 > 1000.
        let mut gate = gate();
        gate.seed_losses(dec!(600), dec!(600));
        let result = gate.check(&order(5), &[]);
        match result {
            RiskCheck::Rejected { limit_type, current, limit, .. } => {
                assert_eq!(limit_type, RiskLimitKind::MaxDailyLoss);
                assert_eq!(current, dec!(600));
                assert_eq!(limit, dec!(1000));
            }
            RiskCheck::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_daily_loss_within_budget_passes() {
        let mut gate = gate();
        gate.seed_losses(dec!(400), dec!(400));
        // 400 + 500 = 900 <= 1000.
        assert!(gate.check(&order(5), &[]).is_approved());
    }

    #[test]
    fn test_weekly_loss_limit() {
        let mut gate = gate();
        gate.seed_losses(dec!(0), dec!(4800));
        let result = gate.check(&order(5), &[]);
        assert!(matches!(
            result,
            RiskCheck::Rejected { limit_type: RiskLimitKind::MaxWeeklyLoss, .. }
        ));
    }

    #[test]
    fn test_hourly_order_limit_is_rolling() {
        let mut gate = gate();
        let base = Utc::now();
        for i in 0..20 {
            gate.record_at(
                &order(1),
                dec!(44),
                Decimal::ZERO,
                base - ChronoDuration::minutes(50) + ChronoDuration::seconds(i),
            );
        }
        let result = gate.check_at(&order(1), &[], base);
        assert!(matches!(
            result,
            RiskCheck::Rejected { limit_type: RiskLimitKind::MaxOrdersPerHour, .. }
        ));

        // Eleven minutes later the 50-minute-old orders have aged out.
        let later = base + ChronoDuration::minutes(11);
        assert!(gate.check_at(&order(1), &[], later).is_approved());
    }

    #[test]
    fn test_loss_streak_cooldown() {
        let mut gate = gate();
        let now = Utc::now();
        for _ in 0..3 {
            gate.record_realized_at(dec!(-50), now);
        }
        let result = gate.check_at(&order(1), &[], now + ChronoDuration::minutes(1));
        assert!(matches!(
            result,
            RiskCheck::Rejected { limit_type: RiskLimitKind::LossStreakCooldown, .. }
        ));

        // The pause expires after five minutes.
        assert!(gate
            .check_at(&order(1), &[], now + ChronoDuration::minutes(6))
            .is_approved());
    }

    #[test]
    fn test_win_resets_streak() {
        let mut gate = gate();
        let now = Utc::now();
        gate.record_realized_at(dec!(-50), now);
        gate.record_realized_at(dec!(-50), now);
        gate.record_realized_at(dec!(120), now);
        gate.record_realized_at(dec!(-50), now);
        // Streak is 1, not 3: no cooldown.
        assert!(gate.check_at(&order(1), &[], now).is_approved());
    }

    #[test]
    fn test_open_fill_does_not_touch_streak() {
        let mut gate = gate();
        let now = Utc::now();
        gate.record_realized_at(dec!(-50), now);
        gate.record_at(&order(1), dec!(44), Decimal::ZERO, now);
        assert_eq!(gate.status_at(now).consecutive_losses, 1);
    }

    fn tuesday_noon() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-06T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_daily_reset_clears_loss_and_orders() {
        let mut gate = gate();
        let day_one = tuesday_noon();
        gate.record_at(&order(1), dec!(44), dec!(-300), day_one);
        assert_eq!(gate.status_at(day_one).daily_loss, dec!(300));

        let next_day = day_one + ChronoDuration::days(1);
        let status = gate.status_at(next_day);
        assert_eq!(status.daily_loss, Decimal::ZERO);
        assert_eq!(status.orders_today, 0);
        // Weekly loss persists across the daily reset.
        assert_eq!(status.weekly_loss, dec!(300));
    }

    #[test]
    fn test_weekly_reset_clears_weekly_loss() {
        let mut gate = gate();
        let now = tuesday_noon();
        gate.record_realized_at(dec!(-300), now);
        // Still the same week on Sunday.
        assert_eq!(
            gate.status_at(now + ChronoDuration::days(5)).weekly_loss,
            dec!(300)
        );
        // Cleared after the following Monday 00:00 UTC.
        let status = gate.status_at(now + ChronoDuration::days(8));
        assert_eq!(status.weekly_loss, Decimal::ZERO);
    }

    #[test]
    fn test_disabled_gate_approves_but_still_accrues() {
        let mut gate = gate();
        gate.disable();
        gate.seed_losses(dec!(5000), dec!(5000));
        assert!(gate.check(&order(5), &[]).is_approved());

        gate.record_realized(dec!(-100));
        gate.enable();
        assert_eq!(gate.status().daily_loss, dec!(5100));
    }

    #[test]
    fn test_exposure_per_game_limit() {
        let mut gate = gate();
        // 48 contracts at 40c = 1920c open; order worst case 100c pushes
        // the game over 2000c.
        let positions = vec![open_position("MKT-Y", "game-1", 48, dec!(40))];
        let result = gate.check(&order(1), &positions);
        assert!(matches!(
            result,
            RiskCheck::Rejected { limit_type: RiskLimitKind::MaxExposurePerGame, .. }
        ));
    }

    #[test]
    fn test_exposure_other_game_not_counted() {
        let mut gate = gate();
        let positions = vec![open_position("OTHER-Y", "game-2", 48, dec!(40))];
        assert!(gate.check(&order(1), &positions).is_approved());
    }

    #[test]
    fn test_week_start() {
        // 2026-01-06 is a Tuesday; the week starts Monday the 5th.
        let date = NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();
        assert_eq!(week_start(date), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        // A Monday is its own week start.
        let monday = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert_eq!(week_start(monday), monday);
    }
}
