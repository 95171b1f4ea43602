//! Game lifecycle owner.
//!
//! Each loaded game gets its own worker task that exclusively owns the
//! game's `GameState`: it hosts the scoreboard and odds pollers and
//! serializes orderbook updates routed from the exchange stream. The
//! router feeds each worker through a small bounded queue; under
//! back-pressure the oldest non-snapshot delta is dropped and a resync
//! requested rather than blocking the stream reader. Snapshots are
//! never dropped.
//!
//! Readers never touch the worker's state directly: after every
//! mutation the worker publishes a cloned snapshot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use courtside_common::GamePhase;
use courtside_market::{
    parse_market_ticker, BookTop, SportsFeed, StreamEvent, StreamHandle,
};

use crate::config::IntervalsConfig;
use crate::executor::BookSource;
use crate::state::{GameState, MarketState};
use crate::storage::Store;

/// Depth of each game worker's inbound queue.
const GAME_QUEUE_DEPTH: usize = 32;

/// Bound on worker teardown during unload.
const UNLOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Event kinds published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OrderbookUpdate,
    NbaUpdate,
    OddsUpdate,
    StateChange,
    GameLoaded,
    GameUnloaded,
}

/// A published aggregator event with a consistent state snapshot.
#[derive(Debug, Clone)]
pub struct AggregatorEvent {
    pub game_id: String,
    pub kind: EventKind,
    /// Tickers touched by the update; empty for game-level events.
    pub tickers: Vec<String>,
    pub state: GameState,
}

/// Async subscriber callback. Subscribers are invoked sequentially per
/// event; a panicking subscriber is isolated and logged.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_event(&self, event: &AggregatorEvent);
}

/// Inbound work for a game worker.
#[derive(Debug)]
enum GameMessage {
    Book {
        ticker: String,
        top: BookTop,
        is_snapshot: bool,
    },
}

impl GameMessage {
    fn is_snapshot(&self) -> bool {
        match self {
            GameMessage::Book { is_snapshot, .. } => *is_snapshot,
        }
    }

    fn ticker(&self) -> &str {
        match self {
            GameMessage::Book { ticker, .. } => ticker,
        }
    }
}

/// Bounded queue between the stream router and one game worker.
///
/// `push` never blocks: at capacity the oldest non-snapshot entry is
/// evicted and its ticker returned so the caller can request a resync.
/// Snapshots are always admitted.
struct GameQueue {
    inner: Mutex<VecDeque<GameMessage>>,
    notify: Notify,
    capacity: usize,
}

impl GameQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Returns the ticker of a dropped delta, if eviction was needed.
    fn push(&self, message: GameMessage) -> Option<String> {
        let mut queue = self.inner.lock();
        let mut dropped = None;
        if queue.len() >= self.capacity {
            if let Some(index) = queue.iter().position(|m| !m.is_snapshot()) {
                dropped = queue.remove(index).map(|m| m.ticker().to_string());
            } else if !message.is_snapshot() {
                // Queue full of snapshots: shed the incoming delta.
                return Some(message.ticker().to_string());
            }
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
        dropped
    }

    fn drain(&self) -> Vec<GameMessage> {
        let mut queue = self.inner.lock();
        queue.drain(..).collect()
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Per-game bookkeeping held by the aggregator.
struct GameHandle {
    queue: Arc<GameQueue>,
    cancel: broadcast::Sender<()>,
    snapshot: Arc<RwLock<GameState>>,
    tickers: Vec<String>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The aggregator: owns the set of active games and their workers.
pub struct Aggregator {
    store: Store,
    sports: Arc<SportsFeed>,
    stream: StreamHandle,
    intervals: IntervalsConfig,
    games: Arc<DashMap<String, Arc<GameHandle>>>,
    ticker_index: Arc<DashMap<String, String>>,
    subscribers: Arc<RwLock<Vec<Arc<dyn Subscriber>>>>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    pub fn new(
        store: Store,
        sports: Arc<SportsFeed>,
        stream: StreamHandle,
        intervals: IntervalsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sports,
            stream,
            intervals,
            games: Arc::new(DashMap::new()),
            ticker_index: Arc::new(DashMap::new()),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            router: Mutex::new(None),
        })
    }

    /// Start the router task that fans stream events out to game
    /// workers. Call once, with the stream's event receiver.
    pub fn start_router(self: &Arc<Self>, mut stream: courtside_market::ExchangeStream) {
        let games = Arc::clone(&self.games);
        let ticker_index = Arc::clone(&self.ticker_index);
        let handle = self.stream.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = stream.next_event().await {
                let (ticker, top, is_snapshot) = match event {
                    StreamEvent::OrderbookSnapshot { ticker, top } => (ticker, top, true),
                    StreamEvent::OrderbookDelta { ticker, top } => (ticker, top, false),
                    StreamEvent::TickerPrint { .. } => continue,
                    StreamEvent::Disconnected => {
                        warn!("exchange stream disconnected");
                        continue;
                    }
                    StreamEvent::Reconnected => {
                        info!("exchange stream reconnected, snapshots inbound");
                        continue;
                    }
                };

                let Some(game_id) = ticker_index.get(&ticker).map(|e| e.value().clone()) else {
                    continue;
                };
                let Some(game) = games.get(&game_id).map(|e| Arc::clone(e.value())) else {
                    continue;
                };
                let message = GameMessage::Book {
                    ticker,
                    top,
                    is_snapshot,
                };
                if let Some(dropped) = game.queue.push(message) {
                    debug!(ticker = %dropped, "game worker back-pressure, requesting resync");
                    handle.request_resync(&dropped).await;
                }
            }
            debug!("stream router exited");
        });
        *self.router.lock() = Some(task);
    }

    pub fn subscribe_events(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Load a game: hydrate from storage, register stream subscriptions
    /// for its markets, and start its worker. Returns once the worker is
    /// running.
    pub async fn load(self: &Arc<Self>, game_id: &str) -> Result<GameState, crate::storage::StorageError> {
        if self.games.contains_key(game_id) {
            debug!(game_id, "game already loaded");
            if let Some(state) = self.get_state(game_id) {
                return Ok(state);
            }
        }

        let row = self.store.get_game(game_id).await?;
        let mut state = GameState::new(
            row.id.clone(),
            row.event_ticker.clone(),
            row.home_team.clone(),
            row.away_team.clone(),
            row.game_date,
        );
        state.home_team_id = row.home_team_id;
        state.away_team_id = row.away_team_id;
        state.nba_game_id = row.nba_game_id;
        state.phase = GamePhase::from_status(&row.status);

        for mut market in self.store.markets_for_game(game_id).await? {
            // The team a market refers to comes from its ticker.
            if market.team.is_none() {
                if let Ok(parsed) = parse_market_ticker(&market.ticker) {
                    market.team = parsed.team;
                }
            }
            state.add_market(market);
        }

        // Match the scoreboard game when the stored row has no id yet.
        if state.nba_game_id.is_none() {
            match self.sports.match_event_ticker(&state.event_ticker).await {
                Ok(game) => {
                    info!(game_id, nba_game_id = game.nba_game_id, "matched scoreboard game");
                    state.nba_game_id = Some(game.nba_game_id);
                    state.home_team_id = Some(game.home_team_id);
                    state.away_team_id = Some(game.away_team_id);
                }
                Err(e) => {
                    warn!(game_id, error = %e, "scoreboard match failed, polling without NBA data");
                }
            }
        }
        self.store.persist_game_shape(&state).await?;

        let tickers: Vec<String> = state.markets.keys().cloned().collect();
        for ticker in &tickers {
            self.ticker_index.insert(ticker.clone(), game_id.to_string());
        }
        self.stream.subscribe(&tickers).await;

        let queue = Arc::new(GameQueue::new(GAME_QUEUE_DEPTH));
        let (cancel, cancel_rx) = broadcast::channel(4);
        let snapshot = Arc::new(RwLock::new(state.clone()));

        let worker = GameWorker {
            store: self.store.clone(),
            sports: Arc::clone(&self.sports),
            intervals: self.intervals.clone(),
            subscribers: Arc::clone(&self.subscribers),
            queue: Arc::clone(&queue),
            snapshot: Arc::clone(&snapshot),
            state,
        };
        let task = tokio::spawn(worker.run(cancel_rx));

        let handle = Arc::new(GameHandle {
            queue,
            cancel,
            snapshot,
            tickers,
            task: Mutex::new(Some(task)),
        });
        self.games.insert(game_id.to_string(), Arc::clone(&handle));

        let loaded = handle.snapshot.read().clone();
        self.emit(AggregatorEvent {
            game_id: game_id.to_string(),
            kind: EventKind::GameLoaded,
            tickers: Vec::new(),
            state: loaded.clone(),
        })
        .await;

        info!(
            game_id,
            markets = loaded.markets.len(),
            "game loaded ({} @ {})",
            loaded.away_team,
            loaded.home_team
        );
        Ok(loaded)
    }

    /// Unload a game: cancel its worker (bounded wait), drop its state,
    /// and unsubscribe tickers no other game still needs.
    pub async fn unload(&self, game_id: &str) -> bool {
        let Some((_, handle)) = self.games.remove(game_id) else {
            warn!(game_id, "game not loaded");
            return false;
        };

        let _ = handle.cancel.send(());
        if let Some(task) = handle.task.lock().take() {
            if tokio::time::timeout(UNLOAD_TIMEOUT, task).await.is_err() {
                warn!(game_id, "game worker did not stop within bound, detaching");
            }
        }

        for ticker in &handle.tickers {
            self.ticker_index.remove(ticker);
        }
        // A ticker may be shared if two games list the same market;
        // only drop subscriptions nobody else holds.
        let orphaned: Vec<String> = handle
            .tickers
            .iter()
            .filter(|t| !self.ticker_index.contains_key(*t))
            .cloned()
            .collect();
        self.stream.unsubscribe(&orphaned).await;

        let state = handle.snapshot.read().clone();
        self.emit(AggregatorEvent {
            game_id: game_id.to_string(),
            kind: EventKind::GameUnloaded,
            tickers: Vec::new(),
            state,
        })
        .await;

        info!(game_id, "game unloaded");
        true
    }

    pub fn get_state(&self, game_id: &str) -> Option<GameState> {
        self.games.get(game_id).map(|g| g.snapshot.read().clone())
    }

    pub fn list_states(&self) -> Vec<GameState> {
        self.games
            .iter()
            .map(|entry| entry.value().snapshot.read().clone())
            .collect()
    }

    pub fn game_ids(&self) -> Vec<String> {
        self.games.iter().map(|e| e.key().clone()).collect()
    }

    /// Tear down every worker and the router.
    pub async fn shutdown(&self) {
        let ids = self.game_ids();
        for id in ids {
            self.unload(&id).await;
        }
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        self.stream.shutdown();
    }

    async fn emit(&self, event: AggregatorEvent) {
        let subscribers: Vec<Arc<dyn Subscriber>> = self.subscribers.read().clone();
        for subscriber in subscribers {
            let fut = async { subscriber.on_event(&event).await };
            if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                error!(?panic, "subscriber panicked, isolating");
            }
        }
    }
}

impl BookSource for Aggregator {
    fn book(&self, ticker: &str) -> Option<BookTop> {
        self.stream.orderbook(ticker)
    }
}

// ============================================================================
// Game worker
// ============================================================================

/// Exclusive owner of one game's state.
struct GameWorker {
    store: Store,
    sports: Arc<SportsFeed>,
    intervals: IntervalsConfig,
    subscribers: Arc<RwLock<Vec<Arc<dyn Subscriber>>>>,
    queue: Arc<GameQueue>,
    snapshot: Arc<RwLock<GameState>>,
    state: GameState,
}

impl GameWorker {
    async fn run(mut self, mut cancel: broadcast::Receiver<()>) {
        let mut nba_timer = tokio::time::interval(self.intervals.nba_poll());
        nba_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut odds_timer = tokio::time::interval(self.intervals.odds_poll());
        odds_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(game_id = %self.state.game_id, "game worker started");
        let queue = Arc::clone(&self.queue);

        loop {
            tokio::select! {
                _ = cancel.recv() => {
                    debug!(game_id = %self.state.game_id, "game worker cancelled");
                    break;
                }
                _ = queue.wait() => {
                    self.drain_book_events().await;
                }
                _ = nba_timer.tick() => {
                    if self.state.phase.is_pollable() {
                        self.poll_nba().await;
                    }
                }
                _ = odds_timer.tick() => {
                    if self.state.phase.is_pollable() {
                        self.poll_odds().await;
                    }
                }
            }
        }

        info!(game_id = %self.state.game_id, "game worker stopped");
    }

    async fn drain_book_events(&mut self) {
        for message in self.queue.drain() {
            match message {
                GameMessage::Book { ticker, top, .. } => {
                    let affected = self.state.apply_orderbook(&ticker, top.clone());
                    if affected.is_empty() {
                        continue;
                    }
                    if let Some(market_id) =
                        self.state.markets.get(&ticker).and_then(|m: &MarketState| m.id)
                    {
                        if let Err(e) = self.store.insert_orderbook_snapshot(market_id, &top).await
                        {
                            warn!(ticker = %ticker, error = %e, "snapshot persist failed");
                        }
                    }
                    self.publish(EventKind::OrderbookUpdate, affected).await;
                }
            }
        }
    }

    /// One scoreboard refresh. Errors never escape the worker.
    async fn poll_nba(&mut self) {
        let Some(nba_game_id) = self.state.nba_game_id else {
            return;
        };

        let scores = match self.sports.live_box_scores().await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(game_id = %self.state.game_id, error = %e, "scoreboard poll failed");
                return;
            }
        };

        let Some(score) = scores.into_iter().find(|s| s.nba_game_id == nba_game_id) else {
            return;
        };

        let before = self.state.phase;
        self.state.apply_nba(&score);
        if let Err(e) = self.store.insert_nba_live(&self.state.game_id, &score).await {
            warn!(game_id = %self.state.game_id, error = %e, "nba persist failed");
        }

        self.publish(EventKind::NbaUpdate, Vec::new()).await;
        if self.state.phase != before {
            info!(
                game_id = %self.state.game_id,
                from = %before,
                to = %self.state.phase,
                "game phase changed"
            );
            self.publish(EventKind::StateChange, Vec::new()).await;
            if self.state.phase.is_terminal() {
                // The refresh that discovered the terminal phase doubles
                // as the final one; pollers idle from here on.
                let _ = self
                    .store
                    .insert_system_log(
                        "info",
                        "aggregator",
                        &format!("game {} reached {}", self.state.game_id, self.state.phase),
                    )
                    .await;
            }
        }
    }

    /// One odds refresh across vendors.
    async fn poll_odds(&mut self) {
        let Some(nba_game_id) = self.state.nba_game_id else {
            return;
        };

        let quotes = match self.sports.odds_for_games(&[nba_game_id]).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!(game_id = %self.state.game_id, error = %e, "odds poll failed");
                return;
            }
        };

        let relevant: Vec<_> = quotes
            .into_iter()
            .filter(|q| q.nba_game_id == nba_game_id)
            .collect();
        if relevant.is_empty() {
            return;
        }

        self.state.apply_odds(&relevant);
        for quote in &relevant {
            if let Err(e) = self.store.insert_betting_odds(&self.state.game_id, quote).await {
                warn!(game_id = %self.state.game_id, error = %e, "odds persist failed");
            }
        }
        self.publish(EventKind::OddsUpdate, Vec::new()).await;
    }

    /// Publish the current state snapshot and notify subscribers.
    async fn publish(&self, kind: EventKind, tickers: Vec<String>) {
        *self.snapshot.write() = self.state.clone();

        let event = AggregatorEvent {
            game_id: self.state.game_id.clone(),
            kind,
            tickers,
            state: self.state.clone(),
        };
        let subscribers: Vec<Arc<dyn Subscriber>> = self.subscribers.read().clone();
        for subscriber in subscribers {
            let fut = async { subscriber.on_event(&event).await };
            if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                error!(?panic, "subscriber panicked, isolating");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn message(ticker: &str, is_snapshot: bool) -> GameMessage {
        GameMessage::Book {
            ticker: ticker.to_string(),
            top: BookTop {
                yes_bid: Some(dec!(42)),
                ..Default::default()
            },
            is_snapshot,
        }
    }

    #[test]
    fn test_queue_fifo_under_capacity() {
        let queue = GameQueue::new(4);
        assert!(queue.push(message("A", false)).is_none());
        assert!(queue.push(message("B", false)).is_none());
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].ticker(), "A");
    }

    #[test]
    fn test_queue_drops_oldest_delta_when_full() {
        let queue = GameQueue::new(3);
        queue.push(message("A", false));
        queue.push(message("B", true));
        queue.push(message("C", false));

        // Full: the oldest delta (A) is evicted, not the snapshot.
        let dropped = queue.push(message("D", false));
        assert_eq!(dropped.as_deref(), Some("A"));

        let drained = queue.drain();
        let tickers: Vec<&str> = drained.iter().map(|m| m.ticker()).collect();
        assert_eq!(tickers, vec!["B", "C", "D"]);
    }

    #[test]
    fn test_queue_snapshot_never_dropped() {
        let queue = GameQueue::new(2);
        queue.push(message("A", true));
        queue.push(message("B", true));

        // Incoming snapshot is admitted past capacity.
        let dropped = queue.push(message("C", true));
        assert!(dropped.is_none());
        assert_eq!(queue.drain().len(), 3);
    }

    #[test]
    fn test_queue_sheds_incoming_delta_when_full_of_snapshots() {
        let queue = GameQueue::new(2);
        queue.push(message("A", true));
        queue.push(message("B", true));

        let dropped = queue.push(message("C", false));
        assert_eq!(dropped.as_deref(), Some("C"));
        assert_eq!(queue.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_queue_wakes_waiter() {
        let queue = Arc::new(GameQueue::new(4));
        let waiter = Arc::clone(&queue);
        let task = tokio::spawn(async move {
            waiter.wait().await;
            waiter.drain().len()
        });
        // Give the waiter a moment to park.
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(message("A", false));
        let drained = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drained, 1);
    }
}
