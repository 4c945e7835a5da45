//! Engine configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for the betting engine and refund machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fraction of the total pool the house keeps before payouts
    pub house_cut_rate: Decimal,

    /// Upper bound on one gateway refund attempt (seconds)
    pub refund_timeout_secs: u64,

    /// Total backoff window before a refund attempt gives up (seconds)
    pub refund_retry_window_secs: u64,

    /// Refund sweeper poll cadence (seconds)
    pub sweep_interval_secs: u64,

    /// Pending refunds fetched per sweep
    pub sweep_batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            house_cut_rate: dec!(0.20),   // 20% house cut
            refund_timeout_secs: 30,      // one gateway call
            refund_retry_window_secs: 120, // then leave it to the sweeper
            sweep_interval_secs: 60,
            sweep_batch_size: 100,
        }
    }
}
