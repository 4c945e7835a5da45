//! Settlement service: payouts on finish, refunds on cancellation.
//!
//! Ledger writes are all-or-nothing per market; gateway refund calls only
//! ever happen after the ledger commit, with bounded timeout and backoff,
//! and their failures surface through `refund_status`, never by blocking
//! or unwinding the cancellation itself.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::gateway::{PaymentGateway, RefundOutcome};
use crate::models::{Bet, Market, MarketStatus, RefundState};
use crate::pool::BetOutcome;

/// Result of settling a finished market.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementSummary {
    pub market: Market,
    pub total_pool: Decimal,
    pub payout_pool: Decimal,
    pub winning_bets: u32,
    pub losing_bets: u32,
    /// Final status and return for every bet the settlement touched
    pub outcomes: Vec<BetOutcome>,
    /// Money was in the pool but nobody backed the winner; settled with
    /// no payouts, needs operator review.
    pub flagged_for_review: bool,
}

/// Result of a cancellation refund sweep.
#[derive(Debug, Clone, Serialize)]
pub struct RefundSweepSummary {
    pub market: Market,
    /// Bets whose wagering relationship was severed by this call
    pub refunded_bets: u32,
    /// Gateway refunds confirmed moved
    pub succeeded: u32,
    /// Gateway refunds terminally declined, queued for operators
    pub failed: u32,
    /// Still awaiting the gateway; the sweeper keeps retrying these
    pub still_pending: u32,
}

pub struct SettlementService {
    ledger: Arc<Database>,
    gateway: Arc<dyn PaymentGateway>,
    config: EngineConfig,
}

impl SettlementService {
    pub fn new(
        ledger: Arc<Database>,
        gateway: Arc<dyn PaymentGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            config,
        }
    }

    /// Settle every active bet on a finishing market, atomically.
    pub async fn settle_win(
        &self,
        market_id: i64,
        winner_name: &str,
        score: Option<&str>,
    ) -> Result<SettlementSummary, EngineError> {
        let (market, plan) = self
            .ledger
            .finish_market(market_id, winner_name, score, self.config.house_cut_rate)
            .await?;

        if plan.flagged_for_review {
            error!(
                market_id,
                winner = winner_name,
                total_pool = %plan.total_pool,
                "no bets backed the winner; settled with no payouts, review required"
            );
        } else {
            info!(
                market_id,
                winner = winner_name,
                total_pool = %plan.total_pool,
                payout_pool = %plan.payout_pool,
                winners = plan.winners,
                losers = plan.losers,
                "market settled"
            );
        }

        Ok(SettlementSummary {
            market,
            total_pool: plan.total_pool,
            payout_pool: plan.payout_pool,
            winning_bets: plan.winners,
            losing_bets: plan.losers,
            outcomes: plan.outcomes,
            flagged_for_review: plan.flagged_for_review,
        })
    }

    /// Refund every bet on a cancelling (or already cancelled) market.
    ///
    /// Re-entry on a cancelled market skips already-refunded bets and only
    /// re-issues the ones still awaiting the gateway, so a partially
    /// failed sweep can be retried without duplicate issuance.
    pub async fn refund_all(&self, market_id: i64) -> Result<RefundSweepSummary, EngineError> {
        let market = self.ledger.get_market(market_id).await?;

        let (market, pending, newly_refunded) = match market.status {
            MarketStatus::Upcoming | MarketStatus::Live => {
                let (market, pending) = self.ledger.cancel_market(market_id).await?;
                let count = pending.len() as u32;
                info!(market_id, refunded = count, "market cancelled, bets refunded");
                (market, pending, count)
            }
            MarketStatus::Cancelled => {
                let pending = self.ledger.pending_refunds_for_market(market_id).await?;
                info!(
                    market_id,
                    pending = pending.len(),
                    "re-entering refund sweep on cancelled market"
                );
                (market, pending, 0)
            }
            MarketStatus::Finished => {
                return Err(EngineError::InvalidState(MarketStatus::Finished))
            }
        };

        let (succeeded, failed, still_pending) = self.issue_refunds(&pending).await;

        Ok(RefundSweepSummary {
            market,
            refunded_bets: newly_refunded,
            succeeded,
            failed,
            still_pending,
        })
    }

    /// Refund one user's bet while its match is still upcoming.
    pub async fn refund_bet(&self, user_id: i64, bet_id: i64) -> Result<Bet, EngineError> {
        let bet = self.ledger.refund_single_bet(bet_id, user_id).await?;
        info!(bet_id, user_id, amount = %bet.amount, "bet refunded");

        self.issue_refunds(std::slice::from_ref(&bet)).await;
        self.ledger.get_bet(bet_id).await
    }

    /// Issue gateway refunds for refunded bets and record the outcomes.
    ///
    /// Returns `(succeeded, failed, still_pending)`. Transport errors and
    /// gateway-pending answers leave the row pending for the next sweep.
    pub async fn issue_refunds(&self, bets: &[Bet]) -> (u32, u32, u32) {
        let bets: Vec<&Bet> = bets.iter().filter(|b| b.refund_outstanding()).collect();
        let results =
            futures::future::join_all(bets.iter().map(|bet| self.issue_one(bet))).await;

        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut still_pending = 0u32;

        for (bet, result) in bets.iter().zip(results) {
            match result {
                Ok(RefundOutcome::Succeeded) => {
                    if let Err(e) = self
                        .ledger
                        .mark_refund_outcome(bet.id, RefundState::Succeeded)
                        .await
                    {
                        warn!(bet_id = bet.id, error = %e, "failed to record refund success");
                        continue;
                    }
                    succeeded += 1;
                }
                Ok(RefundOutcome::Failed) => {
                    warn!(
                        bet_id = bet.id,
                        reference = %bet.payment_reference,
                        "gateway declined refund; queued for manual remediation"
                    );
                    if let Err(e) = self
                        .ledger
                        .mark_refund_outcome(bet.id, RefundState::Failed)
                        .await
                    {
                        warn!(bet_id = bet.id, error = %e, "failed to record refund failure");
                        continue;
                    }
                    failed += 1;
                }
                Ok(RefundOutcome::Pending) => {
                    still_pending += 1;
                }
                Err(e) => {
                    warn!(
                        bet_id = bet.id,
                        reference = %bet.payment_reference,
                        error = %e,
                        "refund issuance did not reach the gateway; left pending"
                    );
                    still_pending += 1;
                }
            }
        }

        (succeeded, failed, still_pending)
    }

    /// One refund attempt: bounded per-call timeout, exponential backoff
    /// on transport errors within the retry window.
    async fn issue_one(&self, bet: &Bet) -> anyhow::Result<RefundOutcome> {
        let call_timeout = Duration::from_secs(self.config.refund_timeout_secs);
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(self.config.refund_retry_window_secs)),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async {
            match tokio::time::timeout(call_timeout, self.gateway.refund(&bet.payment_reference))
                .await
            {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(e)) => Err(backoff::Error::transient(e)),
                Err(_) => Err(backoff::Error::transient(anyhow::anyhow!(
                    "refund call timed out after {}s",
                    self.config.refund_timeout_secs
                ))),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::models::BetStatus;
    use rust_decimal_macros::dec;

    async fn service_with(gateway: MockGateway) -> (Arc<Database>, SettlementService, Market) {
        let ledger = Arc::new(Database::in_memory().await.unwrap());
        let (market, _) = ledger.create_market(10, "Ana", "Bia", true).await.unwrap();
        let service = SettlementService::new(
            ledger.clone(),
            Arc::new(gateway),
            EngineConfig::default(),
        );
        (ledger, service, market)
    }

    async fn seed_bets(ledger: &Database, market_id: i64) {
        let cut = EngineConfig::default().house_cut_rate;
        ledger
            .place_bet(1, market_id, "Ana", dec!(100), "mock_pi_a", cut)
            .await
            .unwrap();
        ledger
            .place_bet(2, market_id, "Bia", dec!(100), "mock_pi_b", cut)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_settle_win_summary() {
        let (ledger, service, market) = service_with(MockGateway::new()).await;
        seed_bets(&ledger, market.id).await;

        let summary = service.settle_win(market.id, "Ana", None).await.unwrap();
        assert_eq!(summary.total_pool, dec!(200));
        assert_eq!(summary.payout_pool, dec!(160));
        assert_eq!(summary.winning_bets, 1);
        assert_eq!(summary.losing_bets, 1);
        assert!(!summary.flagged_for_review);
    }

    #[tokio::test]
    async fn test_settle_win_flags_empty_winner_pool() {
        let (ledger, service, market) = service_with(MockGateway::new()).await;
        let cut = EngineConfig::default().house_cut_rate;
        ledger
            .place_bet(1, market.id, "Bia", dec!(100), "mock_pi_a", cut)
            .await
            .unwrap();

        let summary = service.settle_win(market.id, "Ana", None).await.unwrap();
        assert!(summary.flagged_for_review);
        assert_eq!(summary.winning_bets, 0);
        assert_eq!(summary.market.status, MarketStatus::Finished);
    }

    #[tokio::test]
    async fn test_refund_all_settles_gateway_outcomes() {
        let (ledger, service, market) = service_with(MockGateway::new()).await;
        seed_bets(&ledger, market.id).await;

        let summary = service.refund_all(market.id).await.unwrap();
        assert_eq!(summary.refunded_bets, 2);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 0);

        let bets = ledger.bets_by_market(market.id).await.unwrap();
        assert!(bets
            .iter()
            .all(|b| b.status == BetStatus::Refunded
                && b.refund_status == RefundState::Succeeded));
    }

    #[tokio::test]
    async fn test_refund_all_reentry_is_idempotent() {
        let (ledger, service, market) = service_with(MockGateway::new()).await;
        seed_bets(&ledger, market.id).await;

        let first = service.refund_all(market.id).await.unwrap();
        assert_eq!(first.refunded_bets, 2);

        // Everything already succeeded; re-entry issues nothing.
        let second = service.refund_all(market.id).await.unwrap();
        assert_eq!(second.refunded_bets, 0);
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.still_pending, 0);

        let bets = ledger.bets_by_market(market.id).await.unwrap();
        assert_eq!(bets.len(), 2);
    }

    #[tokio::test]
    async fn test_declined_refunds_surface_as_failed() {
        let (ledger, service, market) = service_with(MockGateway::failing_refunds()).await;
        seed_bets(&ledger, market.id).await;

        let summary = service.refund_all(market.id).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 0);

        // The wagering relationship is severed regardless of the money.
        let bets = ledger.bets_by_market(market.id).await.unwrap();
        assert!(bets
            .iter()
            .all(|b| b.status == BetStatus::Refunded && b.refund_status == RefundState::Failed));
    }

    #[tokio::test]
    async fn test_refund_all_rejects_finished_market() {
        let (ledger, service, market) = service_with(MockGateway::new()).await;
        seed_bets(&ledger, market.id).await;
        service.settle_win(market.id, "Ana", None).await.unwrap();

        let err = service.refund_all(market.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState(MarketStatus::Finished)
        ));
    }

    #[tokio::test]
    async fn test_single_bet_refund() {
        let (ledger, service, market) = service_with(MockGateway::new()).await;
        seed_bets(&ledger, market.id).await;

        let bets = ledger.bets_by_market(market.id).await.unwrap();
        let bet = bets.iter().find(|b| b.user_id == 1).unwrap();

        let refunded = service.refund_bet(1, bet.id).await.unwrap();
        assert_eq!(refunded.status, BetStatus::Refunded);
        assert_eq!(refunded.refund_status, RefundState::Succeeded);

        // The other bet is untouched.
        let other = ledger.get_bet(bets.iter().find(|b| b.user_id == 2).unwrap().id);
        assert_eq!(other.await.unwrap().status, BetStatus::Active);
    }
}
