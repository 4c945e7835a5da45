//! Betting engine services: lifecycle, placement, settlement.

mod config;
mod lifecycle;
mod placement;
mod settlement;

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

pub use config::EngineConfig;
pub use lifecycle::{AdminContext, MarketLifecycle};
pub use placement::{PlacedBet, PlacementService};
pub use settlement::{RefundSweepSummary, SettlementService, SettlementSummary};

use crate::db::Database;
use crate::error::EngineError;
use crate::gateway::PaymentGateway;
use crate::models::Market;
use crate::pool::{PoolSnapshot, SideTotals};

/// A market with its derived pool snapshot, the shape market listings
/// embed per entry.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStats {
    pub market: Market,
    /// Per-player totals over active and settled bets
    pub betting_stats: HashMap<String, SideTotals>,
    /// Odds per player; a side missing here has no quotable price yet
    pub odds: HashMap<String, Decimal>,
    pub total_pool: Decimal,
    pub payout_pool: Decimal,
}

/// The engine's services wired over one ledger and one gateway.
pub struct Engine {
    pub lifecycle: MarketLifecycle,
    pub placement: PlacementService,
    pub settlement: Arc<SettlementService>,
    ledger: Arc<Database>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        ledger: Arc<Database>,
        gateway: Arc<dyn PaymentGateway>,
        config: EngineConfig,
    ) -> Self {
        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            gateway.clone(),
            config.clone(),
        ));
        let lifecycle = MarketLifecycle::new(ledger.clone(), settlement.clone());
        let placement = PlacementService::new(ledger.clone(), gateway, config.clone());

        Self {
            lifecycle,
            placement,
            settlement,
            ledger,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<Database> {
        &self.ledger
    }

    /// One market with its live pool snapshot and odds.
    pub async fn market_stats(&self, market_id: i64) -> Result<MarketStats, EngineError> {
        let market = self.ledger.get_market(market_id).await?;
        let bets = self.ledger.bets_by_market(market_id).await?;
        let snapshot = PoolSnapshot::from_bets(market.players(), &bets);

        Ok(MarketStats {
            betting_stats: snapshot.sides().clone(),
            odds: snapshot.all_odds(self.config.house_cut_rate),
            total_pool: snapshot.total_pool(),
            payout_pool: snapshot.payout_pool(self.config.house_cut_rate),
            market,
        })
    }

    /// All markets, each with its pool snapshot embedded.
    pub async fn list_markets(&self) -> Result<Vec<MarketStats>, EngineError> {
        let markets = self.ledger.list_markets().await?;
        let mut out = Vec::with_capacity(markets.len());
        for market in markets {
            out.push(self.market_stats(market.id).await?);
        }
        Ok(out)
    }
}
