//! Market model: the bettable representation of a scheduled match.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market lifecycle status.
///
/// Transitions only move forward: upcoming -> live (display only),
/// upcoming/live -> finished or cancelled. Finished and cancelled are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    #[default]
    Upcoming,
    Live,
    Finished,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Upcoming => "upcoming",
            MarketStatus::Live => "live",
            MarketStatus::Finished => "finished",
            MarketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(MarketStatus::Upcoming),
            "live" => Some(MarketStatus::Live),
            "finished" => Some(MarketStatus::Finished),
            "cancelled" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further finish/cancel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Finished | MarketStatus::Cancelled)
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A two-outcome betting market over one scheduled match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Ledger-assigned market id
    pub id: i64,

    /// External schedule entry this market was opened for
    pub schedule_id: i64,

    pub player1_name: String,
    pub player2_name: String,

    /// Current lifecycle status
    pub status: MarketStatus,

    /// Whether new bets are accepted (only meaningful while upcoming)
    pub betting_enabled: bool,

    /// Winning player, set only when the market is finished
    pub winner_name: Option<String>,

    /// Final score recorded at settlement
    pub score: Option<String>,

    /// Amount distributed to winners at settlement (pool minus house cut)
    pub total_winnings: Option<Decimal>,

    pub created_at: DateTime<Utc>,

    /// When the market was finished or cancelled
    pub settled_at: Option<DateTime<Utc>>,
}

impl Market {
    /// Both player names, in declaration order.
    pub fn players(&self) -> [&str; 2] {
        [&self.player1_name, &self.player2_name]
    }

    /// Whether `name` is one of the two match players.
    pub fn has_player(&self, name: &str) -> bool {
        name == self.player1_name || name == self.player2_name
    }

    /// Whether the market currently accepts new bets.
    pub fn accepts_bets(&self) -> bool {
        self.status == MarketStatus::Upcoming && self.betting_enabled
    }
}
