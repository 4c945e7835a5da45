//! Market lifecycle controller: the state machine over a market's life.
//!
//! upcoming -> live (display only) -> finished | cancelled, with finished
//! and cancelled terminal. Finish and cancel run their settlement paths
//! before returning; single admission is enforced by the ledger's
//! compare-and-swap status flip.

use std::sync::Arc;

use tracing::info;

use crate::db::Database;
use crate::engine::settlement::{RefundSweepSummary, SettlementService, SettlementSummary};
use crate::error::EngineError;
use crate::models::Market;

/// Identity of the administrator driving a finish or cancel.
///
/// Always passed in by the caller; the engine never trusts ambient
/// session state for admin operations.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub admin_id: String,
}

impl AdminContext {
    pub fn new(admin_id: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
        }
    }
}

pub struct MarketLifecycle {
    ledger: Arc<Database>,
    settlement: Arc<SettlementService>,
}

impl MarketLifecycle {
    pub fn new(ledger: Arc<Database>, settlement: Arc<SettlementService>) -> Self {
        Self { ledger, settlement }
    }

    /// Open a market for a schedule entry, in state upcoming.
    ///
    /// Re-opening the same schedule entry returns its existing market.
    pub async fn open(
        &self,
        schedule_id: i64,
        player1: &str,
        player2: &str,
        betting_enabled: bool,
    ) -> Result<Market, EngineError> {
        let player1 = player1.trim();
        let player2 = player2.trim();

        if player1.is_empty() || player2.is_empty() {
            return Err(EngineError::InvalidArgument(
                "player names must not be empty".to_string(),
            ));
        }
        if player1 == player2 {
            return Err(EngineError::InvalidArgument(
                "players must be distinct".to_string(),
            ));
        }

        let (market, created) = self
            .ledger
            .create_market(schedule_id, player1, player2, betting_enabled)
            .await?;

        if created {
            info!(
                market_id = market.id,
                schedule_id,
                player1,
                player2,
                betting_enabled,
                "market opened"
            );
        }

        Ok(market)
    }

    /// Finish a match: record the winner and settle every bet.
    pub async fn finish(
        &self,
        admin: &AdminContext,
        market_id: i64,
        winner_name: &str,
        score: Option<&str>,
    ) -> Result<SettlementSummary, EngineError> {
        let market = self.ledger.get_market(market_id).await?;
        if market.status.is_terminal() {
            return Err(EngineError::InvalidState(market.status));
        }
        if !market.has_player(winner_name) {
            return Err(EngineError::InvalidArgument(format!(
                "{winner_name:?} is not playing this match"
            )));
        }

        info!(
            admin = %admin.admin_id,
            market_id,
            winner = winner_name,
            "finishing market"
        );

        self.settlement
            .settle_win(market_id, winner_name, score)
            .await
    }

    /// Cancel a match: void every bet and start the refund sweep.
    pub async fn cancel(
        &self,
        admin: &AdminContext,
        market_id: i64,
    ) -> Result<RefundSweepSummary, EngineError> {
        let market = self.ledger.get_market(market_id).await?;
        if market.status.is_terminal() {
            return Err(EngineError::InvalidState(market.status));
        }

        info!(admin = %admin.admin_id, market_id, "cancelling market");

        self.settlement.refund_all(market_id).await
    }

    /// Toggle betting on an upcoming market.
    pub async fn set_betting_enabled(
        &self,
        market_id: i64,
        enabled: bool,
    ) -> Result<Market, EngineError> {
        let market = self.ledger.set_betting_enabled(market_id, enabled).await?;
        info!(market_id, enabled, "betting toggled");
        Ok(market)
    }

    /// Advisory upcoming -> live transition; closes betting by status.
    pub async fn mark_live(&self, market_id: i64) -> Result<Market, EngineError> {
        let market = self.ledger.mark_live(market_id).await?;
        info!(market_id, "market is live");
        Ok(market)
    }
}
