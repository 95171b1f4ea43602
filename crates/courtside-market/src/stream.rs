//! Resilient streaming subscription to the exchange.
//!
//! One logical connection serves every subscribed market ticker. The
//! reader task owns the socket: it reconciles snapshots and deltas into
//! per-ticker [`BookState`]s, surfaces typed [`StreamEvent`]s, and
//! reconnects with jittered exponential backoff, re-subscribing the
//! full ticker set before events resume. A sequence gap on one ticker
//! triggers a scoped re-subscribe for that ticker only.
//!
//! Transport auth is a signed-message scheme over timestamp + method +
//! path; the signer is pluggable and opaque to this module.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use courtside_common::Side;

use crate::book::{BookState, BookTop};

/// Errors surfaced by the exchange stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("connect timed out")]
    Timeout,
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("stream ended")]
    StreamEnded,
    #[error("signer failed: {0}")]
    Signer(String),
}

/// Pluggable request signer for the exchange's signed-message auth.
///
/// Implementations produce the auth headers for a connection attempt;
/// the scheme itself (key management, signature algorithm) is outside
/// this crate.
pub trait RequestSigner: Send + Sync {
    fn sign(
        &self,
        timestamp_ms: i64,
        method: &str,
        path: &str,
    ) -> Result<Vec<(String, String)>, String>;
}

/// Signer that attaches no auth headers. Public demo feeds and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSigner;

impl RequestSigner for NoopSigner {
    fn sign(&self, _: i64, _: &str, _: &str) -> Result<Vec<(String, String)>, String> {
        Ok(Vec::new())
    }
}

/// Configuration for the exchange stream.
#[derive(Debug, Clone)]
pub struct ExchangeStreamConfig {
    /// WebSocket URL of the exchange trade feed.
    pub ws_url: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Base reconnect delay (doubles per failure).
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_cap: Duration,
    /// Event channel buffer size.
    pub event_buffer_size: usize,
}

impl Default for ExchangeStreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://trading-api.example.com/trade-api/ws/v2".to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            event_buffer_size: 10_000,
        }
    }
}

/// Typed events produced by the stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Full book replace for a ticker.
    OrderbookSnapshot { ticker: String, top: BookTop },
    /// Incremental book update for a ticker.
    OrderbookDelta { ticker: String, top: BookTop },
    /// Last-trade print.
    TickerPrint {
        ticker: String,
        price: Decimal,
        ts: DateTime<Utc>,
    },
    /// Transport lost; emitted once per outage.
    Disconnected,
    /// Transport restored and the full ticker set re-subscribed; fresh
    /// snapshots follow.
    Reconnected,
}

/// Commands from the handle to the connection task.
#[derive(Debug)]
enum StreamCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Resync(String),
}

/// Cloneable control handle to the stream: subscriptions, resyncs, and
/// book reads, without the event receiver.
#[derive(Clone)]
pub struct StreamHandle {
    command_tx: mpsc::Sender<StreamCommand>,
    shutdown_tx: broadcast::Sender<()>,
    books: Arc<DashMap<String, BookState>>,
    subscribed: Arc<DashMap<String, ()>>,
}

impl StreamHandle {
    /// Subscribe to market tickers. Idempotent: already-subscribed
    /// tickers are filtered out before the incremental frame is sent.
    pub async fn subscribe(&self, tickers: &[String]) {
        let fresh: Vec<String> = tickers
            .iter()
            .filter(|t| !self.subscribed.contains_key(*t))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return;
        }
        for t in &fresh {
            self.subscribed.insert(t.clone(), ());
        }
        let _ = self.command_tx.send(StreamCommand::Subscribe(fresh)).await;
    }

    /// Unsubscribe from market tickers and drop their book state.
    pub async fn unsubscribe(&self, tickers: &[String]) {
        let present: Vec<String> = tickers
            .iter()
            .filter(|t| self.subscribed.remove(*t).is_some())
            .cloned()
            .collect();
        for t in &present {
            self.books.remove(t);
        }
        if !present.is_empty() {
            let _ = self
                .command_tx
                .send(StreamCommand::Unsubscribe(present))
                .await;
        }
    }

    /// Request a fresh snapshot for one ticker (after local state was
    /// dropped under back-pressure).
    pub async fn request_resync(&self, ticker: &str) {
        let _ = self
            .command_tx
            .send(StreamCommand::Resync(ticker.to_string()))
            .await;
    }

    /// Current consolidated book for a ticker; flagged stale while the
    /// transport is down or the ticker awaits resync.
    pub fn orderbook(&self, ticker: &str) -> Option<BookTop> {
        self.books.get(ticker).map(|b| b.top())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Handle to the process-wide exchange stream.
pub struct ExchangeStream {
    command_tx: mpsc::Sender<StreamCommand>,
    event_rx: mpsc::Receiver<StreamEvent>,
    shutdown_tx: broadcast::Sender<()>,
    books: Arc<DashMap<String, BookState>>,
    subscribed: Arc<DashMap<String, ()>>,
}

impl ExchangeStream {
    /// Spawn the connection task and return the handle.
    pub fn connect(config: ExchangeStreamConfig, signer: Arc<dyn RequestSigner>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer_size);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let books: Arc<DashMap<String, BookState>> = Arc::new(DashMap::new());
        let subscribed: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());

        let task_books = Arc::clone(&books);
        let task_subscribed = Arc::clone(&subscribed);
        tokio::spawn(async move {
            if let Err(e) = run_connection(
                config,
                signer,
                command_rx,
                event_tx,
                task_books,
                task_subscribed,
                shutdown_rx,
            )
            .await
            {
                error!("exchange stream terminated: {}", e);
            }
        });

        Self {
            command_tx,
            event_rx,
            shutdown_tx,
            books,
            subscribed,
        }
    }

    /// Cloneable control handle (subscriptions, resync, book reads).
    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            command_tx: self.command_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            books: Arc::clone(&self.books),
            subscribed: Arc::clone(&self.subscribed),
        }
    }

    /// Subscribe to market tickers. Idempotent.
    pub async fn subscribe(&self, tickers: &[String]) {
        self.handle().subscribe(tickers).await;
    }

    /// Unsubscribe from market tickers and drop their book state.
    pub async fn unsubscribe(&self, tickers: &[String]) {
        self.handle().unsubscribe(tickers).await;
    }

    /// Request a fresh snapshot for one ticker.
    pub async fn request_resync(&self, ticker: &str) {
        self.handle().request_resync(ticker).await;
    }

    /// Next typed event. `None` after shutdown.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.event_rx.recv().await
    }

    /// Current consolidated book for a ticker; flagged stale while the
    /// transport is down or the ticker awaits resync.
    pub fn orderbook(&self, ticker: &str) -> Option<BookTop> {
        self.books.get(ticker).map(|b| b.top())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

// ============================================================================
// Wire frames
// ============================================================================

#[derive(Debug, Serialize)]
struct CommandFrame<'a> {
    id: u64,
    cmd: &'a str,
    params: CommandParams,
}

#[derive(Debug, Serialize)]
struct CommandParams {
    channels: Vec<&'static str>,
    market_tickers: Vec<String>,
}

const CHANNELS: [&str; 2] = ["ticker", "orderbook_delta"];

#[derive(Debug, Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    msg_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotFrame {
    market_ticker: String,
    seq: u64,
    ts: i64,
    #[serde(default)]
    yes: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    no: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct DeltaFrame {
    market_ticker: String,
    seq: u64,
    ts: i64,
    side: String,
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerFrame {
    market_ticker: String,
    price: Decimal,
    ts: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorFrame {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    msg: Option<String>,
}

fn parse_ts_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

// ============================================================================
// Connection task
// ============================================================================

async fn run_connection(
    config: ExchangeStreamConfig,
    signer: Arc<dyn RequestSigner>,
    mut command_rx: mpsc::Receiver<StreamCommand>,
    event_tx: mpsc::Sender<StreamEvent>,
    books: Arc<DashMap<String, BookState>>,
    subscribed: Arc<DashMap<String, ()>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), StreamError> {
    let mut failures: u32 = 0;
    // True while the last session reached the connected state; used to
    // emit exactly one Disconnected marker per outage and a Reconnected
    // marker only after one.
    let mut was_connected = false;

    loop {
        if shutdown.try_recv().is_ok() {
            info!("exchange stream: shutdown signal received");
            return Ok(());
        }

        let mut connected = false;
        let result = run_session(
            &config,
            signer.as_ref(),
            &mut command_rx,
            &event_tx,
            &books,
            &subscribed,
            &mut shutdown,
            was_connected,
            &mut connected,
        )
        .await;

        match result {
            Ok(()) => {
                info!("exchange stream: clean shutdown");
                return Ok(());
            }
            Err(StreamError::Auth(msg)) => {
                // Unrecoverable without reconfiguration; stop retrying.
                error!("exchange stream auth failure, entering degraded state: {}", msg);
                if connected || was_connected {
                    let _ = event_tx.send(StreamEvent::Disconnected).await;
                }
                return Err(StreamError::Auth(msg));
            }
            Err(e) => {
                if connected {
                    failures = 0;
                    was_connected = true;
                    for mut book in books.iter_mut() {
                        book.mark_stale();
                    }
                    let _ = event_tx.send(StreamEvent::Disconnected).await;
                }

                let delay = backoff_delay(&config, failures);
                failures = failures.saturating_add(1);
                warn!("exchange stream error: {}, reconnecting in {:?}", e, delay);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => {
                        info!("exchange stream: shutdown during reconnect");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Exponential backoff with +/-20% jitter: base 1s, factor 2, cap 30s.
fn backoff_delay(config: &ExchangeStreamConfig, failures: u32) -> Duration {
    let exp = failures.min(16);
    let raw = config
        .reconnect_base
        .saturating_mul(2u32.saturating_pow(exp))
        .min(config.reconnect_cap);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    raw.mul_f64(jitter).min(config.reconnect_cap.mul_f64(1.2))
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    config: &ExchangeStreamConfig,
    signer: &dyn RequestSigner,
    command_rx: &mut mpsc::Receiver<StreamCommand>,
    event_tx: &mpsc::Sender<StreamEvent>,
    books: &DashMap<String, BookState>,
    subscribed: &DashMap<String, ()>,
    shutdown: &mut broadcast::Receiver<()>,
    is_reconnect: bool,
    connected: &mut bool,
) -> Result<(), StreamError> {
    info!(url = %config.ws_url, "connecting to exchange stream");

    let mut request = config
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| StreamError::Connection(e.to_string()))?;
    let headers = signer
        .sign(Utc::now().timestamp_millis(), "GET", request.uri().path())
        .map_err(StreamError::Signer)?;
    for (name, value) in headers {
        let name: tokio_tungstenite::tungstenite::http::HeaderName = name
            .parse()
            .map_err(|_| StreamError::Signer(format!("bad header name: {}", name)))?;
        let value = value
            .parse()
            .map_err(|_| StreamError::Signer("bad header value".to_string()))?;
        request.headers_mut().insert(name, value);
    }

    let connect_result = timeout(config.connect_timeout, connect_async(request)).await;
    let (ws_stream, _) = match connect_result {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => return Err(StreamError::Connection(e.to_string())),
        Err(_) => return Err(StreamError::Timeout),
    };

    info!("connected to exchange stream");
    *connected = true;
    let (mut write, mut read) = ws_stream.split();
    let mut frame_id: u64 = 0;

    // Every (re)connect re-subscribes the full current ticker set before
    // events are surfaced.
    let tickers: Vec<String> = subscribed.iter().map(|e| e.key().clone()).collect();
    if !tickers.is_empty() {
        send_command(&mut write, &mut frame_id, "subscribe", tickers.clone()).await?;
        info!(count = tickers.len(), "re-subscribed ticker set");
    }
    if is_reconnect {
        let _ = event_tx.send(StreamEvent::Reconnected).await;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, books, event_tx, &mut write, &mut frame_id).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| StreamError::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(StreamError::StreamEnded);
                    }
                    Some(Err(e)) => {
                        return Err(StreamError::WebSocket(e.to_string()));
                    }
                    _ => {}
                }
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(StreamCommand::Subscribe(tickers)) => {
                        send_command(&mut write, &mut frame_id, "subscribe", tickers).await?;
                    }
                    Some(StreamCommand::Unsubscribe(tickers)) => {
                        send_command(&mut write, &mut frame_id, "unsubscribe", tickers).await?;
                    }
                    Some(StreamCommand::Resync(ticker)) => {
                        if let Some(mut book) = books.get_mut(&ticker) {
                            book.invalidate();
                        }
                        send_command(&mut write, &mut frame_id, "subscribe", vec![ticker]).await?;
                    }
                    None => return Ok(()),
                }
            }
            _ = shutdown.recv() => {
                info!("exchange stream session: shutdown signal received");
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

async fn send_command<S>(
    write: &mut S,
    frame_id: &mut u64,
    cmd: &str,
    tickers: Vec<String>,
) -> Result<(), StreamError>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    *frame_id += 1;
    let frame = CommandFrame {
        id: *frame_id,
        cmd,
        params: CommandParams {
            channels: CHANNELS.to_vec(),
            market_tickers: tickers,
        },
    };
    let text = serde_json::to_string(&frame)
        .map_err(|e| StreamError::WebSocket(e.to_string()))?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| StreamError::WebSocket(e.to_string()))
}

/// Dispatch a single inbound frame. Malformed frames are logged and
/// dropped; sequence gaps and crossed books trigger a scoped resync.
async fn handle_frame<S>(
    text: &str,
    books: &DashMap<String, BookState>,
    event_tx: &mpsc::Sender<StreamEvent>,
    write: &mut S,
    frame_id: &mut u64,
) -> Result<(), StreamError>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let header: FrameHeader = match serde_json::from_str(text) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "malformed frame dropped");
            return Ok(());
        }
    };

    match header.msg_type.as_deref() {
        Some("orderbook_snapshot") => {
            let frame: SnapshotFrame = match serde_json::from_str(text) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "malformed snapshot dropped");
                    return Ok(());
                }
            };
            let ts = parse_ts_millis(frame.ts);
            let mut book = books.entry(frame.market_ticker.clone()).or_default();
            book.apply_snapshot(&frame.yes, &frame.no, frame.seq, ts);
            let top = book.top();
            drop(book);
            let _ = event_tx
                .send(StreamEvent::OrderbookSnapshot {
                    ticker: frame.market_ticker,
                    top,
                })
                .await;
        }
        Some("orderbook_delta") => {
            let frame: DeltaFrame = match serde_json::from_str(text) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "malformed delta dropped");
                    return Ok(());
                }
            };
            let side = match frame.side.to_lowercase().as_str() {
                "yes" => Side::Yes,
                "no" => Side::No,
                other => {
                    warn!(side = other, "delta with unknown side dropped");
                    return Ok(());
                }
            };
            let ts = parse_ts_millis(frame.ts);
            let mut book = books.entry(frame.market_ticker.clone()).or_default();
            match book.apply_delta(side, frame.price, frame.size, frame.seq, ts) {
                Ok(()) => {
                    let top = book.top();
                    drop(book);
                    let _ = event_tx
                        .send(StreamEvent::OrderbookDelta {
                            ticker: frame.market_ticker,
                            top,
                        })
                        .await;
                }
                Err(e) => {
                    drop(book);
                    warn!(ticker = %frame.market_ticker, error = %e, "book invalidated, requesting resync");
                    send_command(write, frame_id, "subscribe", vec![frame.market_ticker]).await?;
                }
            }
        }
        Some("ticker") => {
            let frame: TickerFrame = match serde_json::from_str(text) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "malformed ticker frame dropped");
                    return Ok(());
                }
            };
            let _ = event_tx
                .send(StreamEvent::TickerPrint {
                    ticker: frame.market_ticker,
                    price: frame.price,
                    ts: parse_ts_millis(frame.ts),
                })
                .await;
        }
        Some("error") => {
            let frame: ErrorFrame = serde_json::from_str(text).unwrap_or(ErrorFrame {
                code: None,
                msg: None,
            });
            let msg = frame.msg.unwrap_or_default();
            if frame.code == Some(401) || frame.code == Some(403) || msg.to_lowercase().contains("auth") {
                return Err(StreamError::Auth(msg));
            }
            warn!(code = ?frame.code, msg = %msg, "exchange error frame");
        }
        Some("subscribed") | Some("unsubscribed") => {
            debug!("subscription ack");
        }
        other => {
            debug!(msg_type = ?other, "ignoring frame");
        }
    }

    Ok(())
}

/// Dedup helper used by callers assembling subscription sets.
pub fn dedup_tickers(tickers: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_snapshot_frame() {
        let text = r#"{
            "type": "orderbook_snapshot",
            "market_ticker": "KXNBAGAME-26JAN06DALSAC-Y",
            "seq": 7,
            "ts": 1767726000000,
            "yes": [[42, 100], [41, 50]],
            "no": [[56, 200]]
        }"#;
        let frame: SnapshotFrame = serde_json::from_str(text).unwrap();
        assert_eq!(frame.market_ticker, "KXNBAGAME-26JAN06DALSAC-Y");
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.yes.len(), 2);
        assert_eq!(frame.yes[0], (dec!(42), dec!(100)));
        assert_eq!(frame.no[0], (dec!(56), dec!(200)));
    }

    #[test]
    fn test_parse_delta_frame() {
        let text = r#"{
            "type": "orderbook_delta",
            "market_ticker": "KXNBAGAME-26JAN06DALSAC-Y",
            "seq": 8,
            "ts": 1767726001000,
            "side": "yes",
            "price": 43,
            "size": 25
        }"#;
        let frame: DeltaFrame = serde_json::from_str(text).unwrap();
        assert_eq!(frame.side, "yes");
        assert_eq!(frame.price, dec!(43));
        assert_eq!(frame.size, dec!(25));
    }

    #[test]
    fn test_parse_ticker_frame() {
        let text = r#"{"type":"ticker","market_ticker":"T","price":44,"ts":1767726000000}"#;
        let frame: TickerFrame = serde_json::from_str(text).unwrap();
        assert_eq!(frame.price, dec!(44));
    }

    #[test]
    fn test_command_frame_shape() {
        let frame = CommandFrame {
            id: 1,
            cmd: "subscribe",
            params: CommandParams {
                channels: CHANNELS.to_vec(),
                market_tickers: vec!["A".to_string(), "B".to_string()],
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"cmd\":\"subscribe\""));
        assert!(json.contains("\"orderbook_delta\""));
        assert!(json.contains("\"market_tickers\":[\"A\",\"B\"]"));
    }

    #[test]
    fn test_backoff_caps_at_thirty_seconds() {
        let config = ExchangeStreamConfig::default();
        for failures in 0..20 {
            let d = backoff_delay(&config, failures);
            assert!(d <= Duration::from_secs(36), "delay {:?} over cap+jitter", d);
        }
        // First retry stays near the 1s base.
        let first = backoff_delay(&config, 0);
        assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1200));
    }

    #[test]
    fn test_dedup_tickers() {
        let out = dedup_tickers(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(out, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_handle_frame_malformed_is_dropped() {
        let books = DashMap::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = futures_util::sink::drain::<Message>();
        let mut id = 0;

        let result = handle_frame("{not json", &books, &tx, &mut sink, &mut id).await;
        assert!(result.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_frame_snapshot_then_gap_requests_resync() {
        let books = DashMap::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = futures_util::sink::drain::<Message>();
        let mut id = 0;

        let snapshot = r#"{"type":"orderbook_snapshot","market_ticker":"T","seq":1,"ts":1767726000000,"yes":[[42,100]],"no":[[56,10]]}"#;
        handle_frame(snapshot, &books, &tx, &mut sink, &mut id).await.unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            StreamEvent::OrderbookSnapshot { .. }
        ));

        // Gap: seq jumps from 1 to 5. The book is invalidated and a
        // scoped subscribe (resync) goes out; no delta event surfaces.
        let delta = r#"{"type":"orderbook_delta","market_ticker":"T","seq":5,"ts":1767726001000,"side":"yes","price":43,"size":25}"#;
        handle_frame(delta, &books, &tx, &mut sink, &mut id).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!books.get("T").unwrap().is_synced());
        assert_eq!(id, 1); // one resync frame sent
    }

    #[tokio::test]
    async fn test_handle_frame_auth_error_is_fatal() {
        let books = DashMap::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut sink = futures_util::sink::drain::<Message>();
        let mut id = 0;

        let err = r#"{"type":"error","code":401,"msg":"invalid signature"}"#;
        let result = handle_frame(err, &books, &tx, &mut sink, &mut id).await;
        assert!(matches!(result, Err(StreamError::Auth(_))));
    }
}
