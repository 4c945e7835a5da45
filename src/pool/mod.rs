//! Pool calculator: live odds and settlement payouts derived from bets.

mod calculator;

pub use calculator::{plan_payouts, BetOutcome, PoolSnapshot, SettlementPlan, SideTotals};
