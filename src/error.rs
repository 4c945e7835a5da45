//! Engine error taxonomy.
//!
//! Every mutating operation returns one of these synchronously; nothing is
//! retried automatically except refund issuance, which the sweeper drives
//! with `refund_status` as its progress marker.

use thiserror::Error;

use crate::models::MarketStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad player name, non-positive amount, empty reference.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation illegal for the market's current status.
    #[error("operation not allowed while market is {0}")]
    InvalidState(MarketStatus),

    /// Second non-refunded bet by the same user on the same market.
    #[error("user already has a bet on this market")]
    DuplicateBet,

    /// Betting disabled or market no longer upcoming.
    #[error("market is closed for betting")]
    MarketClosed,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// The gateway does not recognize the reference as a captured payment.
    #[error("payment not confirmed for reference {0}")]
    PaymentNotConfirmed(String),

    /// Defensive: settlement state that should be unreachable.
    #[error("settlement inconsistency: {0}")]
    SettlementInconsistency(String),

    /// A persisted row that no longer parses (money, status, timestamp).
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("payment gateway error: {0}")]
    Gateway(anyhow::Error),
}
