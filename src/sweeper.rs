//! Refund sweeper: out-of-band retry loop for pending refunds.
//!
//! Cancellation severs every bet immediately but the gateway call can
//! fail or the process can die before issuance; those bets sit in
//! refund_status pending. The sweeper polls for them and re-issues,
//! leaving terminal failures for operators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::db::Database;
use crate::engine::{EngineConfig, SettlementService};
use crate::error::EngineError;

pub struct Sweeper {
    ledger: Arc<Database>,
    settlement: Arc<SettlementService>,
    config: EngineConfig,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new(
        ledger: Arc<Database>,
        settlement: Arc<SettlementService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            settlement,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main run loop.
    pub async fn run(&self) -> Result<()> {
        info!(
            interval = self.config.sweep_interval_secs,
            batch = self.config.sweep_batch_size,
            "Starting refund sweeper"
        );

        let mut tick = interval(Duration::from_secs(self.config.sweep_interval_secs));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            tick.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Error in refund sweep");
            }
        }

        info!("Refund sweeper stopped");
        Ok(())
    }

    /// Single pass: re-issue every pending refund, oldest first.
    ///
    /// Returns how many refunds reached a terminal outcome this pass.
    pub async fn sweep_once(&self) -> Result<u32, EngineError> {
        let pending = self
            .ledger
            .pending_refunds(self.config.sweep_batch_size)
            .await?;

        if pending.is_empty() {
            debug!("No pending refunds");
            return Ok(0);
        }

        info!(count = pending.len(), "Retrying pending refunds");
        let (succeeded, failed, still_pending) = self.settlement.issue_refunds(&pending).await;

        info!(succeeded, failed, still_pending, "Sweep complete");
        Ok(succeeded + failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::models::RefundState;
    use rust_decimal_macros::dec;

    async fn seeded_cancellation(gateway: MockGateway) -> (Arc<Database>, Sweeper) {
        let ledger = Arc::new(Database::in_memory().await.unwrap());
        let config = EngineConfig::default();
        let cut = config.house_cut_rate;

        let (market, _) = ledger.create_market(1, "Ana", "Bia", true).await.unwrap();
        ledger
            .place_bet(1, market.id, "Ana", dec!(20), "mock_pi_a", cut)
            .await
            .unwrap();
        ledger
            .place_bet(2, market.id, "Bia", dec!(30), "mock_pi_b", cut)
            .await
            .unwrap();
        // Cancel at the ledger only: bets go pending with no issuance,
        // as if the process died between commit and the gateway calls.
        ledger.cancel_market(market.id).await.unwrap();

        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            Arc::new(gateway),
            config.clone(),
        ));
        let sweeper = Sweeper::new(ledger.clone(), settlement, config);
        (ledger, sweeper)
    }

    #[tokio::test]
    async fn test_sweep_drains_pending_refunds() {
        let (ledger, sweeper) = seeded_cancellation(MockGateway::new()).await;

        assert_eq!(ledger.pending_refunds(100).await.unwrap().len(), 2);

        let settled = sweeper.sweep_once().await.unwrap();
        assert_eq!(settled, 2);
        assert!(ledger.pending_refunds(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_marks_declined_refunds_failed() {
        let (ledger, sweeper) = seeded_cancellation(MockGateway::failing_refunds()).await;

        sweeper.sweep_once().await.unwrap();

        // Declined refunds leave the pending queue for the operator one.
        assert!(ledger.pending_refunds(100).await.unwrap().is_empty());
        for bet in ledger.bets_by_user(1).await.unwrap() {
            assert_eq!(bet.refund_status, RefundState::Failed);
        }
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_pending() {
        let ledger = Arc::new(Database::in_memory().await.unwrap());
        let config = EngineConfig::default();
        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            Arc::new(MockGateway::new()),
            config.clone(),
        ));
        let sweeper = Sweeper::new(ledger, settlement, config);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }
}
