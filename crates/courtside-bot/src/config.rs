//! Configuration for the Courtside engine.
//!
//! Three layers, later ones winning: TOML file, environment variables
//! for credentials and endpoints, CLI overrides. Sensitive values never
//! live in the config file.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Logging level.
    pub log_level: String,
    /// Exchange REST base URL.
    pub exchange_api_url: String,
    /// Exchange stream URL.
    pub exchange_ws_url: String,
    /// Exchange API key id (paired with the signing key).
    pub exchange_api_key: Option<String>,
    /// Path to the exchange signing key.
    pub exchange_key_path: Option<String>,
    /// Sports-data base URL.
    pub sports_api_url: String,
    /// Sports-data API key.
    pub sports_api_key: Option<String>,
    /// Storage connection URL.
    pub database_url: String,
    /// Polling and evaluation cadences.
    pub intervals: IntervalsConfig,
    /// Risk policy limits.
    pub risk: RiskLimitsConfig,
    /// Strategies enabled at startup.
    pub strategies: StrategiesConfig,
}

/// Polling and evaluation cadences, in seconds.
#[derive(Debug, Clone)]
pub struct IntervalsConfig {
    pub evaluation_secs: u64,
    pub nba_poll_secs: u64,
    pub odds_poll_secs: u64,
    pub pnl_secs: u64,
}

impl IntervalsConfig {
    pub fn evaluation(&self) -> Duration {
        Duration::from_secs(self.evaluation_secs)
    }

    pub fn nba_poll(&self) -> Duration {
        Duration::from_secs(self.nba_poll_secs)
    }

    pub fn odds_poll(&self) -> Duration {
        Duration::from_secs(self.odds_poll_secs)
    }

    pub fn pnl(&self) -> Duration {
        Duration::from_secs(self.pnl_secs)
    }
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            evaluation_secs: 2,
            nba_poll_secs: 5,
            odds_poll_secs: 10,
            pnl_secs: 5,
        }
    }
}

/// Risk policy limits. Monetary values are cents.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskLimitsConfig {
    pub max_contracts_per_market: u32,
    pub max_contracts_per_game: u32,
    pub max_total_contracts: u32,
    pub max_daily_loss: i64,
    pub max_weekly_loss: i64,
    pub max_per_trade_risk: i64,
    pub max_total_exposure: i64,
    pub max_exposure_per_game: i64,
    pub max_exposure_per_strategy: i64,
    pub max_orders_per_day: u32,
    pub max_orders_per_hour: u32,
    /// Consecutive losses before the 5-minute pause.
    pub loss_streak_cooldown: u32,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_contracts_per_market: 100,
            max_contracts_per_game: 200,
            max_total_contracts: 500,
            max_daily_loss: 1000,
            max_weekly_loss: 5000,
            max_per_trade_risk: 500,
            max_total_exposure: 10_000,
            max_exposure_per_game: 2000,
            max_exposure_per_strategy: 3000,
            max_orders_per_day: 50,
            max_orders_per_hour: 20,
            loss_streak_cooldown: 3,
        }
    }
}

/// Which strategy kinds start enabled, with optional config blobs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub enabled: Vec<String>,
    /// Per-kind JSON config overrides, keyed by kind name.
    pub config: std::collections::HashMap<String, serde_json::Value>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            exchange_api_url: "https://trading-api.example.com/trade-api/v2".to_string(),
            exchange_ws_url: "wss://trading-api.example.com/trade-api/ws/v2".to_string(),
            exchange_api_key: None,
            exchange_key_path: None,
            sports_api_url: "https://api.balldontlie.io".to_string(),
            sports_api_key: None,
            database_url: "sqlite://courtside.db".to_string(),
            intervals: IntervalsConfig::default(),
            risk: RiskLimitsConfig::default(),
            strategies: StrategiesConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment overrides for endpoints and credentials.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("EXCHANGE_API_URL") {
            self.exchange_api_url = url;
        }
        if let Ok(url) = std::env::var("EXCHANGE_WS_URL") {
            self.exchange_ws_url = url;
        }
        if let Ok(key) = std::env::var("EXCHANGE_API_KEY") {
            self.exchange_api_key = Some(key);
        }
        if let Ok(path) = std::env::var("EXCHANGE_KEY_PATH") {
            self.exchange_key_path = Some(path);
        }
        if let Ok(url) = std::env::var("SPORTS_API_URL") {
            self.sports_api_url = url;
        }
        if let Ok(key) = std::env::var("SPORTS_API_KEY") {
            self.sports_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validate configuration; called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.sports_api_key.as_deref().unwrap_or("").is_empty() {
            bail!("SPORTS_API_KEY is required");
        }
        if self.database_url.is_empty() {
            bail!("database_url must not be empty");
        }
        if self.intervals.evaluation_secs == 0 {
            bail!("evaluation interval must be at least 1 second");
        }
        if self.intervals.nba_poll_secs == 0 || self.intervals.odds_poll_secs == 0 {
            bail!("poll intervals must be at least 1 second");
        }
        if self.risk.loss_streak_cooldown == 0 {
            bail!("loss_streak_cooldown must be at least 1");
        }
        if self.risk.max_contracts_per_market > self.risk.max_contracts_per_game {
            bail!("max_contracts_per_market cannot exceed max_contracts_per_game");
        }
        for kind in &self.strategies.enabled {
            kind.parse::<courtside_common::StrategyKind>()
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    general: GeneralToml,
    intervals: IntervalsToml,
    risk: RiskLimitsConfig,
    strategies: StrategiesConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
    exchange_api_url: String,
    exchange_ws_url: String,
    sports_api_url: String,
    database_url: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        let d = BotConfig::default();
        Self {
            log_level: d.log_level,
            exchange_api_url: d.exchange_api_url,
            exchange_ws_url: d.exchange_ws_url,
            sports_api_url: d.sports_api_url,
            database_url: d.database_url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct IntervalsToml {
    evaluation_secs: u64,
    nba_poll_secs: u64,
    odds_poll_secs: u64,
    pnl_secs: u64,
}

impl Default for IntervalsToml {
    fn default() -> Self {
        let d = IntervalsConfig::default();
        Self {
            evaluation_secs: d.evaluation_secs,
            nba_poll_secs: d.nba_poll_secs,
            odds_poll_secs: d.odds_poll_secs,
            pnl_secs: d.pnl_secs,
        }
    }
}

impl From<TomlConfig> for BotConfig {
    fn from(toml: TomlConfig) -> Self {
        Self {
            log_level: toml.general.log_level,
            exchange_api_url: toml.general.exchange_api_url,
            exchange_ws_url: toml.general.exchange_ws_url,
            exchange_api_key: None, // env only
            exchange_key_path: None,
            sports_api_url: toml.general.sports_api_url,
            sports_api_key: None, // env only
            database_url: toml.general.database_url,
            intervals: IntervalsConfig {
                evaluation_secs: toml.intervals.evaluation_secs,
                nba_poll_secs: toml.intervals.nba_poll_secs,
                odds_poll_secs: toml.intervals.odds_poll_secs,
                pnl_secs: toml.intervals.pnl_secs,
            },
            risk: toml.risk,
            strategies: toml.strategies,
        }
    }
}
