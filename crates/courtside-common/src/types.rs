//! Core domain enums shared across the workspace.

use serde::{Deserialize, Serialize};

/// Tradable side of a binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    /// Column value used by the persisted schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" | "y" => Ok(Side::Yes),
            "no" | "n" => Ok(Side::No),
            _ => Err(format!("Unknown side: {}", s)),
        }
    }
}

/// Kind of exchange market attached to a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    MoneylineHome,
    MoneylineAway,
    Spread,
    Total,
}

impl MarketKind {
    /// Column value used by the persisted schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::MoneylineHome => "moneyline_home",
            MarketKind::MoneylineAway => "moneyline_away",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
        }
    }

    /// Both moneyline variants share one strategy-facing family name.
    pub fn family(&self) -> &'static str {
        match self {
            MarketKind::MoneylineHome | MarketKind::MoneylineAway => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
        }
    }

    pub fn is_moneyline(&self) -> bool {
        matches!(self, MarketKind::MoneylineHome | MarketKind::MoneylineAway)
    }
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MarketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "moneyline_home" => Ok(MarketKind::MoneylineHome),
            "moneyline_away" => Ok(MarketKind::MoneylineAway),
            "spread" => Ok(MarketKind::Spread),
            "total" => Ok(MarketKind::Total),
            _ => Err(format!("Unknown market kind: {}", s)),
        }
    }
}

/// Lifecycle phase of a tracked game.
///
/// Halftime counts as live for polling purposes; Cancelled is terminal
/// like Finished but carries no settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    #[default]
    Scheduled,
    Live,
    Halftime,
    Finished,
    Cancelled,
}

impl GamePhase {
    /// Whether pollers should keep running for this phase.
    pub fn is_pollable(&self) -> bool {
        matches!(self, GamePhase::Scheduled | GamePhase::Live | GamePhase::Halftime)
    }

    /// Whether strategies treat the game as in progress.
    pub fn is_live(&self) -> bool {
        matches!(self, GamePhase::Live | GamePhase::Halftime)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GamePhase::Finished | GamePhase::Cancelled)
    }

    /// Map a scoreboard status string onto a phase.
    ///
    /// The feed reports free-form statuses like "1st Qtr" or "Final";
    /// anything unrecognized is treated as scheduled.
    pub fn from_status(status: &str) -> Self {
        let status = status.to_lowercase();
        match status.as_str() {
            "" | "scheduled" | "pregame" => GamePhase::Scheduled,
            "halftime" => GamePhase::Halftime,
            "final" | "finished" => GamePhase::Finished,
            "cancelled" | "canceled" | "postponed" => GamePhase::Cancelled,
            s if s.contains("qtr") || s.contains("in_progress") || s.contains("live") || s.contains("ot") => {
                GamePhase::Live
            }
            _ => GamePhase::Scheduled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Scheduled => "scheduled",
            GamePhase::Live => "live",
            GamePhase::Halftime => "halftime",
            GamePhase::Finished => "finished",
            GamePhase::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed set of signal-generating strategy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SharpLine,
    Momentum,
    EvMultiBook,
    MeanReversion,
    Correlation,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::SharpLine,
        StrategyKind::Momentum,
        StrategyKind::EvMultiBook,
        StrategyKind::MeanReversion,
        StrategyKind::Correlation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SharpLine => "sharp_line",
            StrategyKind::Momentum => "momentum",
            StrategyKind::EvMultiBook => "ev_multibook",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::Correlation => "correlation",
        }
    }

    /// Human-readable strategy name.
    pub fn display_name(&self) -> &'static str {
        match self {
            StrategyKind::SharpLine => "Sharp Line Detection",
            StrategyKind::Momentum => "Momentum Scalping",
            StrategyKind::EvMultiBook => "EV Multi-Book",
            StrategyKind::MeanReversion => "Live Mean Reversion",
            StrategyKind::Correlation => "Cross-Market Correlation",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sharp_line" | "sharpline" => Ok(StrategyKind::SharpLine),
            "momentum" => Ok(StrategyKind::Momentum),
            "ev_multibook" | "evmultibook" => Ok(StrategyKind::EvMultiBook),
            "mean_reversion" | "meanreversion" => Ok(StrategyKind::MeanReversion),
            "correlation" => Ok(StrategyKind::Correlation),
            _ => Err(format!("Unknown strategy kind: {}", s)),
        }
    }
}
