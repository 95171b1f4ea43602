//! Courtside: paper-trading engine for NBA prediction markets.
//!
//! Usage:
//!   courtside-bot [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Config file path (default: config/courtside.toml)
//!   -g, --games <IDS>        Comma-separated game ids to load at startup
//!   --database-url <URL>     Storage URL (overrides config)
//!   --log-level <LEVEL>      trace|debug|info|warn|error

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use courtside_bot::aggregator::Aggregator;
use courtside_bot::config::BotConfig;
use courtside_bot::engine::{SignalHandler, StrategyEngine};
use courtside_bot::executor::ExecutionEngine;
use courtside_bot::risk::RiskGate;
use courtside_bot::storage::Store;
use courtside_bot::strategy::TradeSignal;
use courtside_common::StrategyKind;
use courtside_market::{
    ExchangeStream, ExchangeStreamConfig, RequestSigner, SportsFeed, SportsFeedConfig,
};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "courtside-bot")]
#[command(about = "Paper-trading engine for NBA prediction markets")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/courtside.toml")]
    config: PathBuf,

    /// Comma-separated game ids to load at startup
    #[arg(short, long, value_delimiter = ',')]
    games: Option<Vec<String>>,

    /// Storage URL (overrides config file)
    #[arg(long)]
    database_url: Option<String>,

    /// Log level (overrides config file)
    #[arg(long)]
    log_level: Option<String>,
}

/// Signer that presents the exchange key id. The signature scheme
/// itself lives behind the `RequestSigner` seam; swapping in a real
/// signer is a configuration concern, not an engine one.
struct ApiKeySigner {
    key_id: String,
}

impl RequestSigner for ApiKeySigner {
    fn sign(
        &self,
        timestamp_ms: i64,
        _method: &str,
        _path: &str,
    ) -> Result<Vec<(String, String)>, String> {
        Ok(vec![
            ("EXCHANGE-ACCESS-KEY".to_string(), self.key_id.clone()),
            ("EXCHANGE-ACCESS-TIMESTAMP".to_string(), timestamp_ms.to_string()),
        ])
    }
}

/// Routes emitted signals into the execution engine.
struct SignalExecutor {
    engine: Arc<Mutex<ExecutionEngine>>,
}

#[async_trait]
impl SignalHandler for SignalExecutor {
    async fn handle(&self, signal: &TradeSignal) {
        let mut engine = self.engine.lock().await;
        match engine.execute_signal(signal).await {
            Ok(order) => {
                info!(order_id = %order.id, status = %order.status, "signal executed");
            }
            Err(e) => {
                error!(ticker = %signal.market_ticker, error = %e, "signal execution failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        BotConfig::default()
    };
    config.apply_env_overrides();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!("starting courtside paper-trading engine");
    config.validate().context("Configuration validation failed")?;

    // Storage first: everything downstream writes through it.
    let store = Store::connect(&config.database_url)
        .await
        .context("Failed to connect to storage")?;
    store.init_schema().await.context("Failed to apply schema")?;

    let sports = Arc::new(
        SportsFeed::new(SportsFeedConfig {
            base_url: config.sports_api_url.clone(),
            api_key: config.sports_api_key.clone().unwrap_or_default(),
            ..Default::default()
        })
        .context("Failed to build sports feed")?,
    );

    let signer = Arc::new(ApiKeySigner {
        key_id: config.exchange_api_key.clone().unwrap_or_default(),
    });
    let stream = ExchangeStream::connect(
        ExchangeStreamConfig {
            ws_url: config.exchange_ws_url.clone(),
            ..Default::default()
        },
        signer,
    );
    let stream_handle = stream.handle();

    // Composition root: risk -> execution -> strategies -> aggregator.
    let aggregator = Aggregator::new(
        store.clone(),
        Arc::clone(&sports),
        stream_handle.clone(),
        config.intervals.clone(),
    );
    aggregator.start_router(stream);

    // The stored policy wins when present (it is operator-editable);
    // otherwise the table is seeded from the config so the two mirror
    // each other from first run.
    let risk_limits = match store
        .load_risk_limits()
        .await
        .context("Failed to load risk limits")?
    {
        Some(limits) => {
            info!("risk limits loaded from storage");
            limits
        }
        None => {
            store
                .save_risk_limits(&config.risk)
                .await
                .context("Failed to seed risk limits")?;
            config.risk.clone()
        }
    };

    let risk = RiskGate::new(risk_limits);
    let mut execution = ExecutionEngine::new(
        store.clone(),
        risk,
        Arc::clone(&aggregator) as Arc<dyn courtside_bot::executor::BookSource>,
    );
    execution
        .load_positions()
        .await
        .context("Failed to load positions")?;
    let execution = Arc::new(Mutex::new(execution));

    let mut strategy_engine =
        StrategyEngine::new(Arc::clone(&aggregator), config.intervals.evaluation());
    let empty_config = serde_json::Value::Object(Default::default());
    for kind_name in &config.strategies.enabled {
        let kind: StrategyKind = kind_name
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let blob = config.strategies.config.get(kind_name);
        let id = strategy_engine
            .load_strategy(kind, None, blob, true)
            .map_err(|e| anyhow::anyhow!(e))?;
        store
            .upsert_strategy(
                &id,
                kind.display_name(),
                kind.as_str(),
                true,
                blob.unwrap_or(&empty_config),
            )
            .await?;
    }
    strategy_engine.add_signal_handler(Arc::new(SignalExecutor {
        engine: Arc::clone(&execution),
    }));

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let engine_task = tokio::spawn(strategy_engine.run(shutdown_tx.subscribe()));

    // Periodic mark-to-market over the open book, followed by the
    // per-strategy performance rollup.
    let pnl_engine = Arc::clone(&execution);
    let pnl_interval = config.intervals.pnl();
    let mut pnl_shutdown = shutdown_tx.subscribe();
    let pnl_task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(pnl_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let mut engine = pnl_engine.lock().await;
                    if let Err(e) = engine.update_unrealized().await {
                        warn!(error = %e, "mark-to-market failed");
                    }
                    if let Err(e) = engine.persist_strategy_performance().await {
                        warn!(error = %e, "strategy performance rollup failed");
                    }
                }
                _ = pnl_shutdown.recv() => break,
            }
        }
    });

    if let Some(games) = &args.games {
        for game_id in games {
            if let Err(e) = aggregator.load(game_id).await {
                warn!(game_id = %game_id, error = %e, "failed to load game");
            }
        }
    }

    info!("engine running; ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutting down");

    // Reverse of startup: stop evaluation, stop marking, unload games
    // and the stream, then flush the ledger.
    let _ = shutdown_tx.send(());
    let _ = engine_task.await;
    let _ = pnl_task.await;
    aggregator.shutdown().await;

    let mut engine = execution.lock().await;
    match engine.update_unrealized().await {
        Ok(summary) => {
            info!(
                open_positions = summary.open_positions,
                realized = %summary.total_realized_pnl,
                unrealized = %summary.total_unrealized_pnl,
                "final ledger flushed"
            );
        }
        Err(e) => warn!(error = %e, "final ledger flush failed"),
    }
    if let Err(e) = engine.persist_strategy_performance().await {
        warn!(error = %e, "final performance rollup failed");
    }

    Ok(())
}
