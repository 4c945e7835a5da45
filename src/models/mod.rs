//! Data models for markets and bets.

mod bet;
mod market;

pub use bet::{Bet, BetStatus, RefundState};
pub use market::{Market, MarketStatus};
