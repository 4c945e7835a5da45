//! Calculator for pool snapshots, parimutuel odds and settlement payouts.
//!
//! All of this is pure Decimal arithmetic over bet rows fetched by the
//! caller, so the same functions serve live odds quotes and the settlement
//! transaction.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Bet, BetStatus};

/// Per-player aggregate over one side of a market's pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideTotals {
    pub total_amount: Decimal,
    pub bet_count: u32,
}

/// A market's pool at one instant, derived from its bets on read.
///
/// Refunded bets are excluded; active and settled (won/lost) bets count,
/// so a finished market still reports the pool it settled over.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    sides: HashMap<String, SideTotals>,
    total_pool: Decimal,
}

impl PoolSnapshot {
    /// Build a snapshot for the given players over a market's bets.
    ///
    /// Both sides are present in the result even when empty, so odds
    /// checks can distinguish "no money yet" from "unknown player".
    pub fn from_bets<'a>(players: [&str; 2], bets: impl IntoIterator<Item = &'a Bet>) -> Self {
        let mut sides: HashMap<String, SideTotals> = players
            .iter()
            .map(|p| (p.to_string(), SideTotals::default()))
            .collect();
        let mut total_pool = Decimal::ZERO;

        for bet in bets {
            if !bet.counts_toward_pool() {
                continue;
            }
            if let Some(side) = sides.get_mut(&bet.player_name) {
                side.total_amount += bet.amount;
                side.bet_count += 1;
                total_pool += bet.amount;
            }
        }

        Self { sides, total_pool }
    }

    pub fn total_pool(&self) -> Decimal {
        self.total_pool
    }

    /// Amount available to winners after the house cut.
    pub fn payout_pool(&self, house_cut: Decimal) -> Decimal {
        self.total_pool * (Decimal::ONE - house_cut)
    }

    pub fn side(&self, player: &str) -> SideTotals {
        self.sides.get(player).copied().unwrap_or_default()
    }

    /// Per-player totals, for embedding in market listings.
    pub fn sides(&self) -> &HashMap<String, SideTotals> {
        &self.sides
    }

    /// Parimutuel odds for one side.
    ///
    /// Undefined until both sides carry money: a one-sided pool has no
    /// counterparty, so no price can be quoted.
    pub fn odds(&self, player: &str, house_cut: Decimal) -> Option<Decimal> {
        if !self.sides.contains_key(player) {
            return None;
        }
        if self
            .sides
            .values()
            .any(|side| side.total_amount <= Decimal::ZERO)
        {
            return None;
        }

        let backed = self.side(player).total_amount;
        Some((self.payout_pool(house_cut) / backed).round_dp(2))
    }

    /// Advisory return estimate for a new stake at current odds.
    ///
    /// Zero while odds are undefined; the estimate floats with the pool
    /// until settlement fixes the real number.
    pub fn potential_return(&self, player: &str, amount: Decimal, house_cut: Decimal) -> Decimal {
        match self.odds(player, house_cut) {
            Some(odds) => (amount * odds).round_dp(2),
            None => Decimal::ZERO,
        }
    }

    /// All defined odds, keyed by player.
    pub fn all_odds(&self, house_cut: Decimal) -> HashMap<String, Decimal> {
        self.sides
            .keys()
            .filter_map(|player| {
                self.odds(player, house_cut)
                    .map(|odds| (player.clone(), odds))
            })
            .collect()
    }
}

/// Planned transition for a single bet at settlement.
#[derive(Debug, Clone, Serialize)]
pub struct BetOutcome {
    pub bet_id: i64,
    pub status: BetStatus,
    pub final_return: Decimal,
}

/// Result of planning a win settlement over a market's active bets.
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub outcomes: Vec<BetOutcome>,
    pub total_pool: Decimal,
    pub payout_pool: Decimal,
    pub winner_pool: Decimal,
    pub winners: u32,
    pub losers: u32,
    /// Money entered the market but nobody backed the winner; the
    /// settlement pays nothing and must be reviewed by an operator.
    pub flagged_for_review: bool,
}

/// Plan the payout for every active bet on a finished market.
///
/// Winners split `total_pool * (1 - house_cut)` proportionally to their
/// stake's share of the winning side; losers get zero. An empty winner
/// pool never divides: the plan marks everyone lost and raises the review
/// flag instead.
pub fn plan_payouts(bets: &[Bet], winner_name: &str, house_cut: Decimal) -> SettlementPlan {
    let total_pool: Decimal = bets.iter().map(|b| b.amount).sum();
    let winner_pool: Decimal = bets
        .iter()
        .filter(|b| b.player_name == winner_name)
        .map(|b| b.amount)
        .sum();
    let payout_pool = total_pool * (Decimal::ONE - house_cut);

    let mut outcomes = Vec::with_capacity(bets.len());
    let mut winners = 0u32;
    let mut losers = 0u32;

    for bet in bets {
        if bet.player_name == winner_name && winner_pool > Decimal::ZERO {
            let final_return = (bet.amount / winner_pool * payout_pool).round_dp(2);
            outcomes.push(BetOutcome {
                bet_id: bet.id,
                status: BetStatus::Won,
                final_return,
            });
            winners += 1;
        } else {
            outcomes.push(BetOutcome {
                bet_id: bet.id,
                status: BetStatus::Lost,
                final_return: Decimal::ZERO,
            });
            losers += 1;
        }
    }

    SettlementPlan {
        outcomes,
        total_pool,
        payout_pool,
        winner_pool,
        winners,
        losers,
        flagged_for_review: winner_pool == Decimal::ZERO && total_pool > Decimal::ZERO,
    }
}
