//! Bet model: one user's wager on one side of a market.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bet settlement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    #[default]
    Active,
    Won,
    Lost,
    Refunded,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Active => "active",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BetStatus::Active),
            "won" => Some(BetStatus::Won),
            "lost" => Some(BetStatus::Lost),
            "refunded" => Some(BetStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Progress of the money-movement side of a refund.
///
/// Only meaningful once the bet itself is `refunded`; the wagering
/// relationship is severed immediately, the money confirmation is
/// tracked separately and retried out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefundState {
    #[default]
    None,
    Pending,
    Succeeded,
    Failed,
}

impl RefundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundState::None => "none",
            RefundState::Pending => "pending",
            RefundState::Succeeded => "succeeded",
            RefundState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(RefundState::None),
            "pending" => Some(RefundState::Pending),
            "succeeded" => Some(RefundState::Succeeded),
            "failed" => Some(RefundState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RefundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single wager, linked one-to-one with a confirmed payment capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    /// Ledger-assigned bet id
    pub id: i64,

    pub market_id: i64,

    pub user_id: i64,

    /// The backed player
    pub player_name: String,

    /// Stake in currency units, always positive
    pub amount: Decimal,

    /// Opaque gateway capture id; unique, used for idempotent replay
    pub payment_reference: String,

    pub status: BetStatus,

    /// Estimated return while active, final return once won, zero when lost
    pub potential_return: Decimal,

    pub refund_status: RefundState,

    pub created_at: DateTime<Utc>,
}

impl Bet {
    /// Refunded bets leave the pool; active and settled bets count.
    pub fn counts_toward_pool(&self) -> bool {
        matches!(
            self.status,
            BetStatus::Active | BetStatus::Won | BetStatus::Lost
        )
    }

    /// Whether a refund has been recorded but not yet confirmed moved.
    pub fn refund_outstanding(&self) -> bool {
        self.status == BetStatus::Refunded && self.refund_status == RefundState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            BetStatus::Active,
            BetStatus::Won,
            BetStatus::Lost,
            BetStatus::Refunded,
        ] {
            assert_eq!(BetStatus::parse(status.as_str()), Some(status));
        }
        for state in [
            RefundState::None,
            RefundState::Pending,
            RefundState::Succeeded,
            RefundState::Failed,
        ] {
            assert_eq!(RefundState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_pool_membership() {
        let mut bet = Bet {
            id: 1,
            market_id: 1,
            user_id: 1,
            player_name: "Ana".to_string(),
            amount: Decimal::new(10000, 2),
            payment_reference: "mock_pi_1".to_string(),
            status: BetStatus::Active,
            potential_return: Decimal::ZERO,
            refund_status: RefundState::None,
            created_at: Utc::now(),
        };
        assert!(bet.counts_toward_pool());

        bet.status = BetStatus::Won;
        assert!(bet.counts_toward_pool());

        bet.status = BetStatus::Refunded;
        bet.refund_status = RefundState::Pending;
        assert!(!bet.counts_toward_pool());
        assert!(bet.refund_outstanding());
    }
}
