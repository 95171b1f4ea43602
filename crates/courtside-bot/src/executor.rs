//! Simulated execution and the position ledger.
//!
//! Converts approved signals into simulated fills at the taker price,
//! maintains the position book keyed by (strategy, market, side), and
//! computes realized and unrealized P&L. The engine is the single
//! writer of the book; every mutation persists the order row first and
//! the position upsert second, so a crash between the two is
//! recoverable by replaying the order log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use courtside_common::Side;
use courtside_market::BookTop;

use crate::pnl;
use crate::risk::{RiskCheck, RiskGate};
use crate::storage::{StorageError, Store};
use crate::strategy::TradeSignal;

/// Key used by the position book when no strategy is attached.
const MANUAL_STRATEGY: &str = "manual";

/// Errors from the execution engine.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution halted pending operator intervention")]
    Halted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            _ => Err(format!("Unknown order type: {}", s)),
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "filled" => Ok(OrderStatus::Filled),
            "rejected" => Ok(OrderStatus::Rejected),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// A simulated order, persisted for every signal that reaches execution.
#[derive(Debug, Clone)]
pub struct SimulatedOrder {
    pub id: String,
    pub game_id: String,
    pub strategy_id: Option<String>,
    pub market_id: Option<i64>,
    pub market_ticker: String,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: u32,
    pub limit_price: Option<Decimal>,
    pub fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    /// Snapshot of the originating signal.
    pub signal_data: serde_json::Value,
    pub reject_reason: Option<String>,
}

impl SimulatedOrder {
    pub fn market(
        game_id: String,
        strategy_id: Option<String>,
        market_ticker: String,
        side: Side,
        quantity: u32,
        signal_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            game_id,
            strategy_id,
            market_id: None,
            market_ticker,
            order_type: OrderType::Market,
            side,
            quantity,
            limit_price: None,
            fill_price: None,
            status: OrderStatus::Pending,
            placed_at: Utc::now(),
            filled_at: None,
            signal_data,
            reject_reason: None,
        }
    }

    fn from_signal(signal: &TradeSignal) -> Self {
        let mut order = Self::market(
            signal.game_id.clone(),
            Some(signal.strategy_id.clone()),
            signal.market_ticker.clone(),
            signal.side,
            signal.quantity,
            json!({
                "strategy_kind": signal.strategy_kind.as_str(),
                "reason": signal.reason,
                "confidence": signal.confidence.to_string(),
                "metadata": signal.metadata,
            }),
        );
        if let Some(limit) = signal.limit_price {
            order.order_type = OrderType::Limit;
            order.limit_price = Some(limit);
        }
        order
    }
}

/// An entry in the position book.
///
/// Invariants: an open position has quantity >= 1 and avg_price on
/// [0, 100]; a closed position has quantity zero and final realized
/// P&L.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    pub game_id: String,
    pub strategy_id: Option<String>,
    pub market_id: Option<i64>,
    pub market_ticker: String,
    pub side: Side,
    pub quantity: u32,
    pub avg_price: Decimal,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub is_open: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn open(
        game_id: String,
        strategy_id: Option<String>,
        market_id: Option<i64>,
        market_ticker: String,
        side: Side,
        quantity: u32,
        avg_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            game_id,
            strategy_id,
            market_id,
            market_ticker,
            side,
            quantity,
            avg_price,
            current_price: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            is_open: true,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn cost_basis(&self) -> Decimal {
        self.avg_price * Decimal::from(self.quantity)
    }
}

/// Book key: (strategy, market, side).
type PositionKey = (String, String, Side);

fn key_for(strategy_id: Option<&str>, ticker: &str, side: Side) -> PositionKey {
    (
        strategy_id.unwrap_or(MANUAL_STRATEGY).to_string(),
        ticker.to_string(),
        side,
    )
}

/// Source of current orderbooks, implemented by the aggregator.
pub trait BookSource: Send + Sync {
    fn book(&self, ticker: &str) -> Option<BookTop>;
}

/// Post-persistence execution hooks. Failures are logged, never rolled
/// back.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
    async fn on_fill(&self, order: &SimulatedOrder, position: &Position);
    async fn on_position_update(&self, position: &Position);
}

/// Portfolio rollup across the book.
#[derive(Debug, Clone, Default)]
pub struct PortfolioSummary {
    pub open_positions: usize,
    pub total_cost: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
}

/// Session counters accumulated per strategy as orders and closes flow
/// through the engine.
#[derive(Debug, Clone, Copy, Default)]
struct StrategyCounters {
    total_orders: u64,
    filled_orders: u64,
    rejected_orders: u64,
    winning_trades: u64,
    losing_trades: u64,
    gross_profit: Decimal,
    gross_loss: Decimal,
}

/// Per-strategy performance rollup.
#[derive(Debug, Clone, Default)]
pub struct StrategyStats {
    pub strategy_id: String,
    pub total_orders: u64,
    pub filled_orders: u64,
    pub rejected_orders: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

impl StrategyStats {
    fn new(strategy_id: String) -> Self {
        Self {
            strategy_id,
            ..Default::default()
        }
    }

    /// Filled orders as a percent of all orders.
    pub fn fill_rate(&self) -> Decimal {
        if self.total_orders == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.filled_orders) / Decimal::from(self.total_orders) * dec!(100))
            .round_dp(2)
    }

    /// Winning trades as a percent of decided (won or lost) trades.
    pub fn win_rate(&self) -> Decimal {
        let decided = self.winning_trades + self.losing_trades;
        if decided == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.winning_trades) / Decimal::from(decided) * dec!(100)).round_dp(2)
    }

    /// Gross profit over gross loss; `None` while no losses exist.
    pub fn profit_factor(&self) -> Option<Decimal> {
        if self.gross_loss <= Decimal::ZERO {
            return None;
        }
        Some((self.gross_profit / self.gross_loss).round_dp(4))
    }

    fn has_activity(&self) -> bool {
        self.total_orders > 0
            || self.winning_trades > 0
            || self.losing_trades > 0
            || !self.realized_pnl.is_zero()
            || !self.unrealized_pnl.is_zero()
    }
}

/// The execution engine: signal -> simulated order -> fill -> ledger.
pub struct ExecutionEngine {
    store: Store,
    risk: RiskGate,
    books: Arc<dyn BookSource>,
    positions: HashMap<PositionKey, Position>,
    stats: HashMap<String, StrategyCounters>,
    callbacks: Vec<Arc<dyn ExecutionCallback>>,
    halted: bool,
}

impl ExecutionEngine {
    pub fn new(store: Store, risk: RiskGate, books: Arc<dyn BookSource>) -> Self {
        Self {
            store,
            risk,
            books,
            positions: HashMap::new(),
            stats: HashMap::new(),
            callbacks: Vec::new(),
            halted: false,
        }
    }

    fn counters_mut(&mut self, strategy_id: Option<&str>) -> &mut StrategyCounters {
        self.stats
            .entry(strategy_id.unwrap_or(MANUAL_STRATEGY).to_string())
            .or_default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ExecutionCallback>) {
        self.callbacks.push(callback);
    }

    pub fn risk(&mut self) -> &mut RiskGate {
        &mut self.risk
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Rehydrate the in-memory book from storage at startup.
    pub async fn load_positions(&mut self) -> Result<(), ExecutionError> {
        for position in self.store.open_positions().await? {
            let key = key_for(
                position.strategy_id.as_deref(),
                &position.market_ticker,
                position.side,
            );
            self.positions.insert(key, position);
        }
        info!(count = self.positions.len(), "position book loaded");
        Ok(())
    }

    /// Execute one trade signal end to end.
    ///
    /// Business rejections (no market data, risk, unfillable limit) come
    /// back as the order with a terminal status; `Err` is reserved for
    /// the halted state and storage faults.
    pub async fn execute_signal(
        &mut self,
        signal: &TradeSignal,
    ) -> Result<SimulatedOrder, ExecutionError> {
        if self.halted {
            return Err(ExecutionError::Halted);
        }

        let mut order = SimulatedOrder::from_signal(signal);
        info!(
            order_id = %order.id,
            ticker = %order.market_ticker,
            side = %order.side,
            quantity = order.quantity,
            "executing signal"
        );

        // Market data first: without a book there is nothing to fill
        // against.
        let Some(book) = self.books.book(&order.market_ticker) else {
            return self.reject(order, "NoMarketData: no orderbook for market").await;
        };
        let Some(ask) = book.ask_for(order.side) else {
            return self.reject(order, "NoMarketData: no ask on the signal side").await;
        };

        // A limit order only fills when the ask is at or under the
        // limit; otherwise it parks as pending and is never retried.
        if order.order_type == OrderType::Limit {
            let limit = order.limit_price.unwrap_or(Decimal::ZERO);
            if ask > limit {
                order.status = OrderStatus::Pending;
                self.store.insert_order(&order).await?;
                self.counters_mut(order.strategy_id.as_deref()).total_orders += 1;
                info!(order_id = %order.id, %ask, %limit, "limit order parked unfilled");
                return Ok(order);
            }
        }

        // Risk gate sees the order with its would-be fill context.
        let open: Vec<Position> = self.positions.values().cloned().collect();
        if let RiskCheck::Rejected { reason, limit_type, .. } = self.risk.check(&order, &open) {
            let reason = format!("risk check failed ({}): {}", limit_type, reason);
            return self.reject(order, &reason).await;
        }

        // Fill at the taker price.
        order.status = OrderStatus::Filled;
        order.fill_price = Some(ask);
        order.filled_at = Some(Utc::now());
        self.risk.record(&order, ask, Decimal::ZERO);
        let counters = self.counters_mut(order.strategy_id.as_deref());
        counters.total_orders += 1;
        counters.filled_orders += 1;

        // Compute the post-fill position, persist order then position,
        // and only then commit the book.
        let key = key_for(order.strategy_id.as_deref(), &order.market_ticker, order.side);
        let updated = match self.positions.get(&key) {
            Some(existing) if existing.is_open && existing.quantity > 0 => {
                let mut position = existing.clone();
                position.avg_price =
                    pnl::blended_avg(position.quantity, position.avg_price, order.quantity, ask);
                position.quantity += order.quantity;
                position
            }
            Some(closed) => {
                // Re-open on the same ledger row: cumulative realized
                // P&L is preserved, everything else starts fresh.
                let mut position = closed.clone();
                position.quantity = order.quantity;
                position.avg_price = ask;
                position.current_price = None;
                position.unrealized_pnl = Decimal::ZERO;
                position.is_open = true;
                position.opened_at = Utc::now();
                position.closed_at = None;
                position
            }
            None => Position::open(
                order.game_id.clone(),
                order.strategy_id.clone(),
                order.market_id,
                order.market_ticker.clone(),
                order.side,
                order.quantity,
                ask,
            ),
        };

        if let Err(e) = self.persist_fill(&order, &updated).await {
            // The in-memory book was not touched; halt until an operator
            // reconciles storage against the order log.
            error!(order_id = %order.id, error = %e, "persistence failed after fill, halting executions");
            self.halted = true;
            return Err(e);
        }
        self.positions.insert(key, updated.clone());

        info!(
            order_id = %order.id,
            fill_price = %ask,
            position_qty = updated.quantity,
            "order filled"
        );

        for callback in &self.callbacks {
            callback.on_fill(&order, &updated).await;
        }

        Ok(order)
    }

    async fn persist_fill(
        &self,
        order: &SimulatedOrder,
        position: &Position,
    ) -> Result<(), ExecutionError> {
        self.store.insert_order(order).await?;
        self.store.upsert_position(position).await?;
        Ok(())
    }

    async fn reject(
        &mut self,
        mut order: SimulatedOrder,
        reason: &str,
    ) -> Result<SimulatedOrder, ExecutionError> {
        order.status = OrderStatus::Rejected;
        order.reject_reason = Some(reason.to_string());
        warn!(order_id = %order.id, reason, "order rejected");
        let counters = self.counters_mut(order.strategy_id.as_deref());
        counters.total_orders += 1;
        counters.rejected_orders += 1;
        self.store.insert_order(&order).await?;
        let _ = self
            .store
            .insert_system_log("warn", "execution", &format!("order {} rejected: {}", order.id, reason))
            .await;
        Ok(order)
    }

    /// Close every open position on a market at `exit_price`, or at the
    /// current bid on the held side when no price is given. The only
    /// source of realized P&L from active closes.
    pub async fn close_position(
        &mut self,
        market_ticker: &str,
        exit_price: Option<Decimal>,
    ) -> Result<Vec<Position>, ExecutionError> {
        if self.halted {
            return Err(ExecutionError::Halted);
        }

        let book = self.books.book(market_ticker);
        let keys: Vec<PositionKey> = self
            .positions
            .iter()
            .filter(|(_, p)| p.market_ticker == market_ticker && p.is_open && p.quantity > 0)
            .map(|(k, _)| k.clone())
            .collect();

        let mut closed = Vec::new();
        for key in keys {
            let Some(position) = self.positions.get(&key) else {
                continue;
            };
            let exit = match exit_price.or_else(|| {
                book.as_ref().and_then(|b| b.bid_for(position.side))
            }) {
                Some(price) => price,
                None => {
                    warn!(ticker = market_ticker, "no exit price available, skipping close");
                    continue;
                }
            };

            let mut position = position.clone();
            let delta = pnl::realized(position.avg_price, exit, position.quantity);
            position.realized_pnl += delta;
            position.quantity = 0;
            position.unrealized_pnl = Decimal::ZERO;
            position.current_price = Some(exit);
            position.is_open = false;
            position.closed_at = Some(Utc::now());

            self.store.upsert_position(&position).await?;
            self.risk.record_realized(delta);
            self.record_trade_outcome(position.strategy_id.as_deref(), delta);

            info!(
                ticker = %position.market_ticker,
                side = %position.side,
                %exit,
                %delta,
                "position closed"
            );

            for callback in &self.callbacks {
                callback.on_position_update(&position).await;
            }

            self.positions.insert(key, position.clone());
            closed.push(position);
        }

        Ok(closed)
    }

    /// Settle every open position on a market against the final outcome.
    pub async fn settle_position(
        &mut self,
        market_ticker: &str,
        outcome: Side,
    ) -> Result<Vec<Position>, ExecutionError> {
        if self.halted {
            return Err(ExecutionError::Halted);
        }

        let keys: Vec<PositionKey> = self
            .positions
            .iter()
            .filter(|(_, p)| p.market_ticker == market_ticker && p.is_open && p.quantity > 0)
            .map(|(k, _)| k.clone())
            .collect();

        let mut settled = Vec::new();
        for key in keys {
            let Some(position) = self.positions.get(&key) else {
                continue;
            };
            let mut position = position.clone();
            let delta =
                pnl::settlement(position.avg_price, position.side, outcome, position.quantity);
            position.realized_pnl += delta;
            position.quantity = 0;
            position.unrealized_pnl = Decimal::ZERO;
            position.current_price =
                Some(if position.side == outcome { dec!(100) } else { Decimal::ZERO });
            position.is_open = false;
            position.closed_at = Some(Utc::now());

            self.store.upsert_position(&position).await?;
            self.risk.record_realized(delta);
            self.record_trade_outcome(position.strategy_id.as_deref(), delta);

            info!(
                ticker = %position.market_ticker,
                side = %position.side,
                outcome = %outcome,
                %delta,
                "position settled"
            );

            for callback in &self.callbacks {
                callback.on_position_update(&position).await;
            }

            self.positions.insert(key, position.clone());
            settled.push(position);
        }

        Ok(settled)
    }

    /// Mark every open position to the current bid on its held side.
    pub async fn update_unrealized(&mut self) -> Result<PortfolioSummary, ExecutionError> {
        let mut marked: Vec<(PositionKey, Position)> = Vec::new();
        for (key, position) in &self.positions {
            if !position.is_open || position.quantity == 0 {
                continue;
            }
            let Some(mark) = self
                .books
                .book(&position.market_ticker)
                .and_then(|b| b.bid_for(position.side))
            else {
                continue;
            };
            let mut position = position.clone();
            position.current_price = Some(mark);
            position.unrealized_pnl = pnl::unrealized(position.avg_price, mark, position.quantity);
            marked.push((key.clone(), position));
        }

        for (key, position) in marked {
            self.store.upsert_position(&position).await?;
            self.positions.insert(key, position);
        }

        Ok(self.portfolio_summary())
    }

    pub fn portfolio_summary(&self) -> PortfolioSummary {
        let mut summary = PortfolioSummary::default();
        for position in self.positions.values() {
            summary.total_realized_pnl += position.realized_pnl;
            if position.is_open && position.quantity > 0 {
                summary.open_positions += 1;
                summary.total_cost += position.cost_basis();
                summary.total_unrealized_pnl += position.unrealized_pnl;
            }
        }
        summary
    }

    /// Record a decided trade into the per-strategy counters. A zero
    /// delta counts as neither a win nor a loss.
    fn record_trade_outcome(&mut self, strategy_id: Option<&str>, delta: Decimal) {
        let counters = self.counters_mut(strategy_id);
        if delta > Decimal::ZERO {
            counters.winning_trades += 1;
            counters.gross_profit += delta;
        } else if delta < Decimal::ZERO {
            counters.losing_trades += 1;
            counters.gross_loss += delta.abs();
        }
    }

    /// Per-strategy performance rollup: session order counters merged
    /// with the P&L sitting on the book, sorted by strategy id.
    pub fn strategy_stats(&self) -> Vec<StrategyStats> {
        let mut by_id: HashMap<String, StrategyStats> = HashMap::new();

        for (id, counters) in &self.stats {
            let entry = by_id
                .entry(id.clone())
                .or_insert_with(|| StrategyStats::new(id.clone()));
            entry.total_orders = counters.total_orders;
            entry.filled_orders = counters.filled_orders;
            entry.rejected_orders = counters.rejected_orders;
            entry.winning_trades = counters.winning_trades;
            entry.losing_trades = counters.losing_trades;
            entry.gross_profit = counters.gross_profit;
            entry.gross_loss = counters.gross_loss;
        }

        for position in self.positions.values() {
            let id = position
                .strategy_id
                .clone()
                .unwrap_or_else(|| MANUAL_STRATEGY.to_string());
            let entry = by_id
                .entry(id.clone())
                .or_insert_with(|| StrategyStats::new(id));
            entry.realized_pnl += position.realized_pnl;
            if position.is_open && position.quantity > 0 {
                entry.unrealized_pnl += position.unrealized_pnl;
            }
        }

        let mut stats: Vec<StrategyStats> = by_id.into_values().collect();
        stats.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        stats
    }

    /// Persist one `strategy_performance` row per strategy with any
    /// activity. Driven on the mark-to-market cadence.
    pub async fn persist_strategy_performance(&self) -> Result<(), ExecutionError> {
        for stats in self.strategy_stats() {
            if !stats.has_activity() {
                continue;
            }
            self.store
                .insert_strategy_performance(
                    &stats.strategy_id,
                    stats.total_orders as i64,
                    stats.filled_orders as i64,
                    stats.rejected_orders as i64,
                    stats.winning_trades as i64,
                    stats.losing_trades as i64,
                    stats.realized_pnl,
                    stats.unrealized_pnl,
                )
                .await?;
        }
        Ok(())
    }

    pub fn position(&self, strategy_id: Option<&str>, ticker: &str, side: Side) -> Option<&Position> {
        self.positions.get(&key_for(strategy_id, ticker, side))
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.is_open && p.quantity > 0)
            .cloned()
            .collect()
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    /// Rebuild a position book from a filled-order log.
    ///
    /// Replaying the persisted log through this function reconstructs
    /// the open book exactly; it is the crash-recovery path for a fill
    /// persisted without its position upsert.
    pub fn replay(orders: &[SimulatedOrder]) -> HashMap<(String, String, Side), Position> {
        let mut book: HashMap<PositionKey, Position> = HashMap::new();
        for order in orders {
            if order.status != OrderStatus::Filled {
                continue;
            }
            let Some(fill) = order.fill_price else {
                continue;
            };
            let key = key_for(order.strategy_id.as_deref(), &order.market_ticker, order.side);
            match book.get_mut(&key) {
                Some(position) => {
                    position.avg_price = pnl::blended_avg(
                        position.quantity,
                        position.avg_price,
                        order.quantity,
                        fill,
                    );
                    position.quantity += order.quantity;
                }
                None => {
                    book.insert(
                        key,
                        Position::open(
                            order.game_id.clone(),
                            order.strategy_id.clone(),
                            order.market_id,
                            order.market_ticker.clone(),
                            order.side,
                            order.quantity,
                            fill,
                        ),
                    );
                }
            }
        }
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskLimitsConfig;
    use crate::strategy::TradeSignal;
    use courtside_common::StrategyKind;
    use parking_lot::RwLock;

    /// Book source backed by a mutable map.
    struct FakeBooks {
        books: RwLock<HashMap<String, BookTop>>,
    }

    impl FakeBooks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                books: RwLock::new(HashMap::new()),
            })
        }

        fn set(&self, ticker: &str, yes_bid: Decimal, yes_ask: Decimal) {
            self.books.write().insert(
                ticker.to_string(),
                BookTop {
                    yes_bid: Some(yes_bid),
                    yes_ask: Some(yes_ask),
                    no_bid: Some(dec!(100) - yes_ask),
                    no_ask: Some(dec!(100) - yes_bid),
                    ..Default::default()
                },
            );
        }
    }

    impl BookSource for FakeBooks {
        fn book(&self, ticker: &str) -> Option<BookTop> {
            self.books.read().get(ticker).cloned()
        }
    }

    async fn engine_with(books: Arc<FakeBooks>) -> ExecutionEngine {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();
        ExecutionEngine::new(store, RiskGate::new(RiskLimitsConfig::default()), books)
    }

    fn signal(ticker: &str, side: Side, quantity: u32) -> TradeSignal {
        TradeSignal {
            strategy_id: "strat-1".to_string(),
            strategy_kind: StrategyKind::SharpLine,
            game_id: "game-1".to_string(),
            market_ticker: ticker.to_string(),
            side,
            quantity,
            confidence: dec!(0.8),
            reason: "test".to_string(),
            metadata: serde_json::Value::Null,
            limit_price: None,
            emitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_at_ask() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;

        let order = engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fill_price, Some(dec!(44)));
        assert!(order.filled_at.unwrap() >= order.placed_at);

        let position = engine.position(Some("strat-1"), "M", Side::Yes).unwrap();
        assert_eq!(position.quantity, 5);
        assert_eq!(position.avg_price, dec!(44));
        assert!(position.is_open);
    }

    #[tokio::test]
    async fn test_no_side_fills_at_no_ask() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;

        let order = engine.execute_signal(&signal("M", Side::No, 5)).await.unwrap();
        // no_ask = 100 - yes_bid = 58.
        assert_eq!(order.fill_price, Some(dec!(58)));
    }

    #[tokio::test]
    async fn test_no_market_data_rejects() {
        let books = FakeBooks::new();
        let mut engine = engine_with(Arc::clone(&books)).await;

        let order = engine.execute_signal(&signal("MISSING", Side::Yes, 5)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.reject_reason.unwrap().contains("NoMarketData"));
    }

    #[tokio::test]
    async fn test_adding_blends_average() {
        let books = FakeBooks::new();
        books.set("M", dec!(38), dec!(40));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();

        books.set("M", dec!(48), dec!(50));
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();

        let position = engine.position(Some("strat-1"), "M", Side::Yes).unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(position.avg_price, dec!(45));
    }

    #[tokio::test]
    async fn test_risk_rejection_is_recorded() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;

        // 6 contracts breaches the 500c per-trade worst case.
        let order = engine.execute_signal(&signal("M", Side::Yes, 6)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.reject_reason.unwrap().contains("max_per_trade_risk"));
        assert!(engine.position(Some("strat-1"), "M", Side::Yes).is_none());
    }

    #[tokio::test]
    async fn test_limit_order_parks_when_unfillable() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;

        let mut sig = signal("M", Side::Yes, 5);
        sig.limit_price = Some(dec!(40));
        let order = engine.execute_signal(&sig).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.order_type, OrderType::Limit);
        assert!(engine.position(Some("strat-1"), "M", Side::Yes).is_none());
    }

    #[tokio::test]
    async fn test_limit_order_fills_when_marketable() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;

        let mut sig = signal("M", Side::Yes, 5);
        sig.limit_price = Some(dec!(45));
        let order = engine.execute_signal(&sig).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fill_price, Some(dec!(44)));
    }

    #[tokio::test]
    async fn test_close_position_at_bid() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();

        books.set("M", dec!(52), dec!(54));
        let closed = engine.close_position("M", None).await.unwrap();
        assert_eq!(closed.len(), 1);
        // Exit at the YES bid (52), entry 44: +8c x 5.
        assert_eq!(closed[0].realized_pnl, dec!(40));
        assert_eq!(closed[0].quantity, 0);
        assert!(!closed[0].is_open);
        assert!(closed[0].closed_at.is_some());
    }

    #[tokio::test]
    async fn test_close_position_with_explicit_price() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();

        let closed = engine.close_position("M", Some(dec!(60))).await.unwrap();
        assert_eq!(closed[0].realized_pnl, dec!(80));
    }

    #[tokio::test]
    async fn test_settlement_yes_winner() {
        // 10 YES at 45c, settle YES, realized +550c.
        let books = FakeBooks::new();
        books.set("M", dec!(44), dec!(45));
        let mut engine = engine_with(Arc::clone(&books)).await;
        // Two orders of 5 keep per-trade risk under the cap.
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();

        let settled = engine.settle_position("M", Side::Yes).await.unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].realized_pnl, dec!(550));
        assert_eq!(settled[0].quantity, 0);
        assert!(!settled[0].is_open);
    }

    #[tokio::test]
    async fn test_settlement_loser_pays_nothing() {
        let books = FakeBooks::new();
        books.set("M", dec!(44), dec!(45));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();

        let settled = engine.settle_position("M", Side::No).await.unwrap();
        assert_eq!(settled[0].realized_pnl, dec!(-225));
    }

    #[tokio::test]
    async fn test_mark_to_market() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();

        books.set("M", dec!(50), dec!(52));
        let summary = engine.update_unrealized().await.unwrap();
        let position = engine.position(Some("strat-1"), "M", Side::Yes).unwrap();
        // Marked at the YES bid: (50 - 44) x 5 = 30.
        assert_eq!(position.current_price, Some(dec!(50)));
        assert_eq!(position.unrealized_pnl, dec!(30));
        assert_eq!(summary.total_unrealized_pnl, dec!(30));
        assert_eq!(summary.open_positions, 1);
    }

    #[tokio::test]
    async fn test_replay_reconstructs_book() {
        let books = FakeBooks::new();
        books.set("M", dec!(38), dec!(40));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        books.set("M", dec!(48), dec!(50));
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        engine.execute_signal(&signal("M", Side::No, 3)).await.unwrap();

        // Rebuild from the persisted order log and compare.
        let log = engine.store.orders_for_replay().await.unwrap();
        let rebuilt = ExecutionEngine::replay(&log);

        for position in engine.open_positions() {
            let key = (
                position.strategy_id.clone().unwrap(),
                position.market_ticker.clone(),
                position.side,
            );
            let replayed = rebuilt.get(&key).expect("missing replayed position");
            assert_eq!(replayed.quantity, position.quantity);
            assert_eq!(replayed.avg_price, position.avg_price);
        }
        assert_eq!(rebuilt.len(), engine.open_positions().len());
    }

    #[tokio::test]
    async fn test_strategy_stats_rollup() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        books.set("M2", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;

        // Two fills, one per-trade-risk rejection.
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        engine.execute_signal(&signal("M2", Side::Yes, 5)).await.unwrap();
        let rejected = engine.execute_signal(&signal("M", Side::Yes, 6)).await.unwrap();
        assert_eq!(rejected.status, OrderStatus::Rejected);

        // One winner (+30), one loser (-20).
        engine.close_position("M", Some(dec!(50))).await.unwrap();
        engine.close_position("M2", Some(dec!(40))).await.unwrap();

        let stats = engine.strategy_stats();
        assert_eq!(stats.len(), 1);
        let stats = &stats[0];
        assert_eq!(stats.strategy_id, "strat-1");
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.filled_orders, 2);
        assert_eq!(stats.rejected_orders, 1);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.fill_rate(), dec!(66.67));
        assert_eq!(stats.win_rate(), dec!(50.00));
        // 30 gross profit over 20 gross loss.
        assert_eq!(stats.profit_factor(), Some(dec!(1.5)));
        assert_eq!(stats.realized_pnl, dec!(10));
    }

    #[tokio::test]
    async fn test_strategy_stats_no_losses_has_no_profit_factor() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        engine.close_position("M", Some(dec!(50))).await.unwrap();

        let stats = engine.strategy_stats();
        assert_eq!(stats[0].winning_trades, 1);
        assert_eq!(stats[0].profit_factor(), None);
        assert_eq!(stats[0].win_rate(), dec!(100.00));
    }

    #[tokio::test]
    async fn test_persist_strategy_performance_writes_rows() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        engine.close_position("M", Some(dec!(50))).await.unwrap();

        engine.persist_strategy_performance().await.unwrap();
        engine.persist_strategy_performance().await.unwrap();

        // One time-series row per rollup pass, for the one active
        // strategy.
        let row = sqlx::query("SELECT COUNT(*) AS n FROM strategy_performance")
            .fetch_one(engine.store.pool())
            .await
            .unwrap();
        use sqlx::Row;
        assert_eq!(row.get::<i64, _>("n"), 2);

        let row = sqlx::query(
            "SELECT strategy_id, filled_orders, winning_trades, realized_pnl FROM strategy_performance LIMIT 1",
        )
        .fetch_one(engine.store.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<String, _>("strategy_id"), "strat-1");
        assert_eq!(row.get::<i64, _>("filled_orders"), 1);
        assert_eq!(row.get::<i64, _>("winning_trades"), 1);
        assert_eq!(row.get::<String, _>("realized_pnl"), "30");
    }

    #[tokio::test]
    async fn test_closed_position_invariants() {
        let books = FakeBooks::new();
        books.set("M", dec!(42), dec!(44));
        let mut engine = engine_with(Arc::clone(&books)).await;
        engine.execute_signal(&signal("M", Side::Yes, 5)).await.unwrap();
        engine.close_position("M", Some(dec!(50))).await.unwrap();

        for position in engine.all_positions() {
            if !position.is_open {
                assert_eq!(position.quantity, 0);
            } else {
                assert!(position.quantity >= 1);
                assert!(position.avg_price >= Decimal::ZERO && position.avg_price <= dec!(100));
            }
        }
    }
}
