//! Read-only rollups for admin dashboards.
//!
//! Both rollup queries run inside one ledger transaction, so the numbers
//! presented together were true together: a settlement committing halfway
//! through can never produce a won-count without its matching returns.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::{Bet, BetStatus, Market, MarketStatus};

/// Per-status market aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketRollup {
    pub count: i64,
    pub total_pool: Decimal,
    pub avg_pool: Decimal,
}

/// Per-status bet aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BetRollup {
    pub count: i64,
    pub total_amount: Decimal,
    pub total_returns: Decimal,
}

/// The admin dashboard's aggregate view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Rollups {
    pub market_statistics: HashMap<MarketStatus, MarketRollup>,
    pub bet_statistics: HashMap<BetStatus, BetRollup>,
}

/// Full betting report for one match.
#[derive(Debug, Clone, Serialize)]
pub struct MarketReport {
    pub market: Market,
    pub bets: Vec<Bet>,
    pub total_pool: Decimal,
    pub total_bettors: usize,
}

pub struct ReportingService {
    ledger: Arc<Database>,
}

impl ReportingService {
    pub fn new(ledger: Arc<Database>) -> Self {
        Self { ledger }
    }

    /// Count and sum markets and bets grouped by status, from a single
    /// consistent read.
    pub async fn rollups(&self) -> Result<Rollups, EngineError> {
        let mut tx = self.ledger.pool().begin().await?;

        let market_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM markets GROUP BY status")
                .fetch_all(&mut *tx)
                .await?;

        let bet_rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT m.status, b.status, b.amount, b.potential_return
            FROM bets b
            JOIN markets m ON m.id = b.market_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut rollups = Rollups::default();

        for (status, count) in market_rows {
            let status = MarketStatus::parse(&status)
                .ok_or_else(|| EngineError::Corrupt(format!("market status {status:?}")))?;
            rollups.market_statistics.entry(status).or_default().count = count;
        }

        for (market_status, bet_status, amount, potential_return) in bet_rows {
            let market_status = MarketStatus::parse(&market_status)
                .ok_or_else(|| EngineError::Corrupt(format!("market status {market_status:?}")))?;
            let bet_status = BetStatus::parse(&bet_status)
                .ok_or_else(|| EngineError::Corrupt(format!("bet status {bet_status:?}")))?;
            let amount: Decimal = amount
                .parse()
                .map_err(|e| EngineError::Corrupt(format!("bet amount {amount:?}: {e}")))?;
            let potential_return: Decimal = potential_return.parse().map_err(|e| {
                EngineError::Corrupt(format!("potential_return {potential_return:?}: {e}"))
            })?;

            let bets = rollups.bet_statistics.entry(bet_status).or_default();
            bets.count += 1;
            bets.total_amount += amount;
            bets.total_returns += potential_return;

            // Refunded money has left the market's pool.
            if bet_status != BetStatus::Refunded {
                rollups
                    .market_statistics
                    .entry(market_status)
                    .or_default()
                    .total_pool += amount;
            }
        }

        for rollup in rollups.market_statistics.values_mut() {
            if rollup.count > 0 {
                rollup.avg_pool = (rollup.total_pool / Decimal::from(rollup.count)).round_dp(2);
            }
        }

        Ok(rollups)
    }

    /// Every bet on one market plus its settlement summary.
    pub async fn market_report(&self, market_id: i64) -> Result<MarketReport, EngineError> {
        let market = self.ledger.get_market(market_id).await?;
        let bets = self.ledger.bets_by_market(market_id).await?;

        let total_pool = bets
            .iter()
            .filter(|b| b.counts_toward_pool())
            .map(|b| b.amount)
            .sum();

        Ok(MarketReport {
            total_bettors: bets.len(),
            total_pool,
            market,
            bets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AdminContext, Engine, EngineConfig};
    use crate::gateway::MockGateway;
    use rust_decimal_macros::dec;

    async fn engine() -> (Engine, ReportingService) {
        let ledger = Arc::new(Database::in_memory().await.unwrap());
        let reporting = ReportingService::new(ledger.clone());
        let engine = Engine::new(
            ledger,
            Arc::new(MockGateway::new()),
            EngineConfig::default(),
        );
        (engine, reporting)
    }

    #[tokio::test]
    async fn test_rollups_reconcile_after_settlement() {
        let (engine, reporting) = engine().await;
        let admin = AdminContext::new("admin");

        let finished = engine.lifecycle.open(1, "Ana", "Bia", true).await.unwrap();
        engine
            .placement
            .place_bet(1, finished.id, "Ana", dec!(100), "mock_pi_a")
            .await
            .unwrap();
        engine
            .placement
            .place_bet(2, finished.id, "Bia", dec!(100), "mock_pi_b")
            .await
            .unwrap();
        engine
            .lifecycle
            .finish(&admin, finished.id, "Ana", None)
            .await
            .unwrap();

        let cancelled = engine.lifecycle.open(2, "Carol", "Dani", true).await.unwrap();
        engine
            .placement
            .place_bet(3, cancelled.id, "Carol", dec!(40), "mock_pi_c")
            .await
            .unwrap();
        engine.lifecycle.cancel(&admin, cancelled.id).await.unwrap();

        let open = engine.lifecycle.open(3, "Eva", "Fay", true).await.unwrap();
        engine
            .placement
            .place_bet(4, open.id, "Eva", dec!(10), "mock_pi_d")
            .await
            .unwrap();

        let rollups = reporting.rollups().await.unwrap();

        let finished_markets = &rollups.market_statistics[&MarketStatus::Finished];
        assert_eq!(finished_markets.count, 1);
        assert_eq!(finished_markets.total_pool, dec!(200));
        assert_eq!(finished_markets.avg_pool, dec!(200.00));

        let cancelled_markets = &rollups.market_statistics[&MarketStatus::Cancelled];
        assert_eq!(cancelled_markets.count, 1);
        // Refunded money has left the pool.
        assert_eq!(cancelled_markets.total_pool, Decimal::ZERO);

        let won = &rollups.bet_statistics[&BetStatus::Won];
        assert_eq!(won.count, 1);
        assert_eq!(won.total_amount, dec!(100));
        assert_eq!(won.total_returns, dec!(160.00));

        let lost = &rollups.bet_statistics[&BetStatus::Lost];
        assert_eq!(lost.count, 1);
        assert_eq!(lost.total_returns, Decimal::ZERO);

        let refunded = &rollups.bet_statistics[&BetStatus::Refunded];
        assert_eq!(refunded.count, 1);
        assert_eq!(refunded.total_amount, dec!(40));

        let active = &rollups.bet_statistics[&BetStatus::Active];
        assert_eq!(active.count, 1);
    }

    #[tokio::test]
    async fn test_market_report() {
        let (engine, reporting) = engine().await;
        let market = engine.lifecycle.open(1, "Ana", "Bia", true).await.unwrap();

        engine
            .placement
            .place_bet(1, market.id, "Ana", dec!(30), "mock_pi_a")
            .await
            .unwrap();
        engine
            .placement
            .place_bet(2, market.id, "Ana", dec!(70), "mock_pi_b")
            .await
            .unwrap();
        engine
            .placement
            .place_bet(3, market.id, "Bia", dec!(100), "mock_pi_c")
            .await
            .unwrap();

        engine
            .lifecycle
            .finish(&AdminContext::new("admin"), market.id, "Ana", Some("7-5 6-3"))
            .await
            .unwrap();

        let report = reporting.market_report(market.id).await.unwrap();
        assert_eq!(report.total_bettors, 3);
        assert_eq!(report.total_pool, dec!(200));
        assert_eq!(report.market.winner_name.as_deref(), Some("Ana"));
        assert_eq!(report.market.score.as_deref(), Some("7-5 6-3"));
        assert_eq!(report.market.total_winnings, Some(dec!(160.00)));

        // Scenario B splits: 48 and 112.
        let returns: Vec<Decimal> = report
            .bets
            .iter()
            .filter(|b| b.status == BetStatus::Won)
            .map(|b| b.potential_return)
            .collect();
        assert_eq!(returns, vec![dec!(48.00), dec!(112.00)]);
    }
}
