//! Ledger store: durable markets and bets, source of truth for all money.
//!
//! Every mutation of a market's bet set runs as one transaction whose
//! guards re-check market status inside the transaction, so placement,
//! settlement and refund sweeps serialize per market: two concurrent
//! finish calls cannot both settle, and a bet racing a finish either
//! commits before the settlement snapshot or sees the closed market.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::EngineError;
use crate::models::{Bet, BetStatus, Market, MarketStatus, RefundState};
use crate::pool::{plan_payouts, PoolSnapshot, SettlementPlan};

/// Database connection pool over the betting ledger.
pub struct Database {
    pool: SqlitePool,
}

/// Raw market row; money and timestamps stay TEXT until converted.
#[derive(Debug, Clone, sqlx::FromRow)]
struct MarketRow {
    pub id: i64,
    pub schedule_id: i64,
    pub player1_name: String,
    pub player2_name: String,
    pub status: String,
    pub betting_enabled: bool,
    pub winner_name: Option<String>,
    pub score: Option<String>,
    pub total_winnings: Option<String>,
    pub created_at: String,
    pub settled_at: Option<String>,
}

/// Raw bet row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct BetRow {
    pub id: i64,
    pub market_id: i64,
    pub user_id: i64,
    pub player_name: String,
    pub amount: String,
    pub payment_reference: String,
    pub status: String,
    pub potential_return: String,
    pub refund_status: String,
    pub created_at: String,
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal, EngineError> {
    value
        .parse::<Decimal>()
        .map_err(|e| EngineError::Corrupt(format!("{field} {value:?}: {e}")))
}

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Corrupt(format!("{field} {value:?}: {e}")))
}

impl TryFrom<MarketRow> for Market {
    type Error = EngineError;

    fn try_from(row: MarketRow) -> Result<Self, EngineError> {
        Ok(Market {
            id: row.id,
            schedule_id: row.schedule_id,
            status: MarketStatus::parse(&row.status)
                .ok_or_else(|| EngineError::Corrupt(format!("market status {:?}", row.status)))?,
            betting_enabled: row.betting_enabled,
            winner_name: row.winner_name,
            score: row.score,
            total_winnings: row
                .total_winnings
                .as_deref()
                .map(|v| parse_decimal(v, "total_winnings"))
                .transpose()?,
            created_at: parse_timestamp(&row.created_at, "market created_at")?,
            settled_at: row
                .settled_at
                .as_deref()
                .map(|v| parse_timestamp(v, "market settled_at"))
                .transpose()?,
            player1_name: row.player1_name,
            player2_name: row.player2_name,
        })
    }
}

impl TryFrom<BetRow> for Bet {
    type Error = EngineError;

    fn try_from(row: BetRow) -> Result<Self, EngineError> {
        Ok(Bet {
            id: row.id,
            market_id: row.market_id,
            user_id: row.user_id,
            amount: parse_decimal(&row.amount, "bet amount")?,
            status: BetStatus::parse(&row.status)
                .ok_or_else(|| EngineError::Corrupt(format!("bet status {:?}", row.status)))?,
            potential_return: parse_decimal(&row.potential_return, "potential_return")?,
            refund_status: RefundState::parse(&row.refund_status).ok_or_else(|| {
                EngineError::Corrupt(format!("refund_status {:?}", row.refund_status))
            })?,
            created_at: parse_timestamp(&row.created_at, "bet created_at")?,
            player_name: row.player_name,
            payment_reference: row.payment_reference,
        })
    }
}

fn rows_to_bets(rows: Vec<BetRow>) -> Result<Vec<Bet>, EngineError> {
    rows.into_iter().map(Bet::try_from).collect()
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// In-memory ledger with a single connection so every query sees it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schedule_id INTEGER NOT NULL UNIQUE,
                player1_name TEXT NOT NULL,
                player2_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'upcoming',
                betting_enabled INTEGER NOT NULL DEFAULT 1,
                winner_name TEXT,
                score TEXT,
                total_winnings TEXT,
                created_at TEXT NOT NULL,
                settled_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                player_name TEXT NOT NULL,
                amount TEXT NOT NULL,
                payment_reference TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'active',
                potential_return TEXT NOT NULL DEFAULT '0',
                refund_status TEXT NOT NULL DEFAULT 'none',
                created_at TEXT NOT NULL,
                FOREIGN KEY (market_id) REFERENCES markets(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bets_market ON bets(market_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bets_user ON bets(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bets_refund ON bets(status, refund_status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Markets ====================

    /// Create a market for a schedule entry, or return the existing one.
    ///
    /// Returns `(market, created)`; at most one market exists per
    /// schedule_id.
    pub async fn create_market(
        &self,
        schedule_id: i64,
        player1_name: &str,
        player2_name: &str,
        betting_enabled: bool,
    ) -> Result<(Market, bool), EngineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO markets (schedule_id, player1_name, player2_name, status, betting_enabled, created_at)
            VALUES (?, ?, ?, 'upcoming', ?, ?)
            ON CONFLICT(schedule_id) DO NOTHING
            "#,
        )
        .bind(schedule_id)
        .bind(player1_name)
        .bind(player2_name)
        .bind(betting_enabled)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;

        let row: MarketRow = sqlx::query_as("SELECT * FROM markets WHERE schedule_id = ?")
            .bind(schedule_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((Market::try_from(row)?, created))
    }

    pub async fn get_market(&self, market_id: i64) -> Result<Market, EngineError> {
        let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Market::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("market"))
    }

    pub async fn list_markets(&self) -> Result<Vec<Market>, EngineError> {
        let rows: Vec<MarketRow> = sqlx::query_as("SELECT * FROM markets ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Market::try_from).collect()
    }

    /// Toggle betting; legal only while the market is upcoming.
    pub async fn set_betting_enabled(
        &self,
        market_id: i64,
        enabled: bool,
    ) -> Result<Market, EngineError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&mut *tx)
            .await?;
        let market = row
            .map(Market::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("market"))?;

        if market.status != MarketStatus::Upcoming {
            return Err(EngineError::InvalidState(market.status));
        }

        sqlx::query("UPDATE markets SET betting_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(market_id)
            .execute(&mut *tx)
            .await?;

        let row: MarketRow = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Market::try_from(row)
    }

    /// Advisory upcoming -> live transition; no bets are mutated.
    pub async fn mark_live(&self, market_id: i64) -> Result<Market, EngineError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&mut *tx)
            .await?;
        let market = row
            .map(Market::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("market"))?;

        if market.status != MarketStatus::Upcoming {
            return Err(EngineError::InvalidState(market.status));
        }

        sqlx::query("UPDATE markets SET status = 'live' WHERE id = ? AND status = 'upcoming'")
            .bind(market_id)
            .execute(&mut *tx)
            .await?;

        let row: MarketRow = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Market::try_from(row)
    }

    // ==================== Bets ====================

    pub async fn get_bet(&self, bet_id: i64) -> Result<Bet, EngineError> {
        let row: Option<BetRow> = sqlx::query_as("SELECT * FROM bets WHERE id = ?")
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Bet::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("bet"))
    }

    pub async fn find_bet_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<Bet>, EngineError> {
        let row: Option<BetRow> = sqlx::query_as("SELECT * FROM bets WHERE payment_reference = ?")
            .bind(payment_reference)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Bet::try_from).transpose()
    }

    pub async fn bets_by_user(&self, user_id: i64) -> Result<Vec<Bet>, EngineError> {
        let rows: Vec<BetRow> =
            sqlx::query_as("SELECT * FROM bets WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows_to_bets(rows)
    }

    pub async fn bets_by_market(&self, market_id: i64) -> Result<Vec<Bet>, EngineError> {
        let rows: Vec<BetRow> =
            sqlx::query_as("SELECT * FROM bets WHERE market_id = ? ORDER BY player_name, id")
                .bind(market_id)
                .fetch_all(&self.pool)
                .await?;

        rows_to_bets(rows)
    }

    /// Record a new wager inside one guarded transaction.
    ///
    /// Re-checks everything the placement preconditions demand against the
    /// transaction's own view: market upcoming with betting enabled, valid
    /// player, positive amount, no non-refunded bet by this user, and no
    /// prior bet with this payment reference (which returns the existing
    /// row unchanged). The advisory `potential_return` estimate is taken
    /// from the pool as of this same transaction.
    ///
    /// Returns `(bet, created)`.
    pub async fn place_bet(
        &self,
        user_id: i64,
        market_id: i64,
        player_name: &str,
        amount: Decimal,
        payment_reference: &str,
        house_cut: Decimal,
    ) -> Result<(Bet, bool), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidArgument(
                "bet amount must be greater than zero".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        // Replay of a confirmed payment returns the bet it already bought.
        let existing: Option<BetRow> =
            sqlx::query_as("SELECT * FROM bets WHERE payment_reference = ?")
                .bind(payment_reference)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(row) = existing {
            return Ok((Bet::try_from(row)?, false));
        }

        let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&mut *tx)
            .await?;
        let market = row
            .map(Market::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("market"))?;

        if !market.accepts_bets() {
            return Err(EngineError::MarketClosed);
        }
        if !market.has_player(player_name) {
            return Err(EngineError::InvalidArgument(format!(
                "{player_name:?} is not playing this match"
            )));
        }

        let duplicate: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM bets WHERE user_id = ? AND market_id = ? AND status != 'refunded'",
        )
        .bind(user_id)
        .bind(market_id)
        .fetch_optional(&mut *tx)
        .await?;
        if duplicate.is_some() {
            return Err(EngineError::DuplicateBet);
        }

        let active: Vec<BetRow> =
            sqlx::query_as("SELECT * FROM bets WHERE market_id = ? AND status = 'active'")
                .bind(market_id)
                .fetch_all(&mut *tx)
                .await?;
        let active = rows_to_bets(active)?;
        let snapshot = PoolSnapshot::from_bets(market.players(), &active);
        let estimate = snapshot.potential_return(player_name, amount, house_cut);

        let result = sqlx::query(
            r#"
            INSERT INTO bets (market_id, user_id, player_name, amount, payment_reference,
                              status, potential_return, refund_status, created_at)
            VALUES (?, ?, ?, ?, ?, 'active', ?, 'none', ?)
            "#,
        )
        .bind(market_id)
        .bind(user_id)
        .bind(player_name)
        .bind(amount.to_string())
        .bind(payment_reference)
        .bind(estimate.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let bet_id = result.last_insert_rowid();
        let row: BetRow = sqlx::query_as("SELECT * FROM bets WHERE id = ?")
            .bind(bet_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((Bet::try_from(row)?, true))
    }

    // ==================== Settlement ====================

    /// Finish a market and settle every active bet, atomically.
    ///
    /// The status flip is a compare-and-swap over upcoming/live, so only
    /// one finish (or cancel) ever mutates the bet set; the payout plan is
    /// computed and applied against the same transaction's snapshot.
    pub async fn finish_market(
        &self,
        market_id: i64,
        winner_name: &str,
        score: Option<&str>,
        house_cut: Decimal,
    ) -> Result<(Market, SettlementPlan), EngineError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&mut *tx)
            .await?;
        let market = row
            .map(Market::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("market"))?;

        if market.status.is_terminal() {
            return Err(EngineError::InvalidState(market.status));
        }
        if !market.has_player(winner_name) {
            return Err(EngineError::InvalidArgument(format!(
                "{winner_name:?} is not playing this match"
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE markets SET status = 'finished', winner_name = ?, score = ?, settled_at = ?
            WHERE id = ? AND status IN ('upcoming', 'live')
            "#,
        )
        .bind(winner_name)
        .bind(score)
        .bind(Utc::now().to_rfc3339())
        .bind(market_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::InvalidState(market.status));
        }

        let active: Vec<BetRow> =
            sqlx::query_as("SELECT * FROM bets WHERE market_id = ? AND status = 'active'")
                .bind(market_id)
                .fetch_all(&mut *tx)
                .await?;
        let active = rows_to_bets(active)?;

        let plan = plan_payouts(&active, winner_name, house_cut);

        for outcome in &plan.outcomes {
            let result = sqlx::query(
                "UPDATE bets SET status = ?, potential_return = ? WHERE id = ? AND status = 'active'",
            )
            .bind(outcome.status.as_str())
            .bind(outcome.final_return.to_string())
            .bind(outcome.bet_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() != 1 {
                return Err(EngineError::SettlementInconsistency(format!(
                    "bet {} changed under settlement",
                    outcome.bet_id
                )));
            }
        }

        sqlx::query("UPDATE markets SET total_winnings = ? WHERE id = ?")
            .bind(plan.payout_pool.to_string())
            .bind(market_id)
            .execute(&mut *tx)
            .await?;

        let row: MarketRow = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((Market::try_from(row)?, plan))
    }

    /// Cancel a market and mark every active bet refunded, atomically.
    ///
    /// Returns the market and the bets now awaiting gateway refunds
    /// (refund_status pending). Gateway calls happen after commit, never
    /// inside the transaction.
    pub async fn cancel_market(&self, market_id: i64) -> Result<(Market, Vec<Bet>), EngineError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&mut *tx)
            .await?;
        let market = row
            .map(Market::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("market"))?;

        if market.status.is_terminal() {
            return Err(EngineError::InvalidState(market.status));
        }

        let result = sqlx::query(
            r#"
            UPDATE markets SET status = 'cancelled', settled_at = ?
            WHERE id = ? AND status IN ('upcoming', 'live')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(market_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::InvalidState(market.status));
        }

        sqlx::query(
            r#"
            UPDATE bets SET status = 'refunded', refund_status = 'pending'
            WHERE market_id = ? AND status = 'active'
            "#,
        )
        .bind(market_id)
        .execute(&mut *tx)
        .await?;

        let pending: Vec<BetRow> = sqlx::query_as(
            r#"
            SELECT * FROM bets
            WHERE market_id = ? AND status = 'refunded' AND refund_status = 'pending'
            ORDER BY id
            "#,
        )
        .bind(market_id)
        .fetch_all(&mut *tx)
        .await?;

        let row: MarketRow = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((Market::try_from(row)?, rows_to_bets(pending)?))
    }

    /// Refund one user's active bet while its match is still upcoming.
    pub async fn refund_single_bet(
        &self,
        bet_id: i64,
        user_id: i64,
    ) -> Result<Bet, EngineError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<BetRow> =
            sqlx::query_as("SELECT * FROM bets WHERE id = ? AND user_id = ? AND status = 'active'")
                .bind(bet_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let bet = row
            .map(Bet::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("active bet"))?;

        let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(bet.market_id)
            .fetch_optional(&mut *tx)
            .await?;
        let market = row
            .map(Market::try_from)
            .transpose()?
            .ok_or(EngineError::NotFound("market"))?;

        if market.status != MarketStatus::Upcoming {
            return Err(EngineError::InvalidState(market.status));
        }

        sqlx::query(
            "UPDATE bets SET status = 'refunded', refund_status = 'pending' WHERE id = ?",
        )
        .bind(bet_id)
        .execute(&mut *tx)
        .await?;

        let row: BetRow = sqlx::query_as("SELECT * FROM bets WHERE id = ?")
            .bind(bet_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Bet::try_from(row)
    }

    // ==================== Refund tracking ====================

    /// Record the gateway's terminal answer for one refunded bet.
    ///
    /// A bet already marked succeeded is left alone, so repeated sweeps
    /// and late gateway callbacks are harmless.
    pub async fn mark_refund_outcome(
        &self,
        bet_id: i64,
        outcome: RefundState,
    ) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE bets SET refund_status = ?
            WHERE id = ? AND status = 'refunded' AND refund_status IN ('pending', 'failed')
            "#,
        )
        .bind(outcome.as_str())
        .bind(bet_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let bet = self.get_bet(bet_id).await?;
            if bet.status != BetStatus::Refunded {
                return Err(EngineError::NotFound("refunded bet"));
            }
        }

        Ok(())
    }

    /// Refunded bets still awaiting a terminal gateway outcome.
    pub async fn pending_refunds(&self, limit: i64) -> Result<Vec<Bet>, EngineError> {
        let rows: Vec<BetRow> = sqlx::query_as(
            r#"
            SELECT * FROM bets
            WHERE status = 'refunded' AND refund_status = 'pending'
            ORDER BY created_at LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows_to_bets(rows)
    }

    pub async fn pending_refunds_for_market(
        &self,
        market_id: i64,
    ) -> Result<Vec<Bet>, EngineError> {
        let rows: Vec<BetRow> = sqlx::query_as(
            r#"
            SELECT * FROM bets
            WHERE market_id = ? AND status = 'refunded' AND refund_status = 'pending'
            ORDER BY id
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_bets(rows)
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HOUSE_CUT: Decimal = dec!(0.20);

    async fn ledger_with_market() -> (Database, Market) {
        let db = Database::in_memory().await.unwrap();
        let (market, created) = db.create_market(10, "Ana", "Bia", true).await.unwrap();
        assert!(created);
        (db, market)
    }

    #[tokio::test]
    async fn test_create_market_is_idempotent_per_schedule() {
        let (db, market) = ledger_with_market().await;

        let (again, created) = db.create_market(10, "Ana", "Bia", true).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, market.id);
        assert_eq!(again.status, MarketStatus::Upcoming);
    }

    #[tokio::test]
    async fn test_place_bet_and_duplicate_rejection() {
        let (db, market) = ledger_with_market().await;

        let (bet, created) = db
            .place_bet(1, market.id, "Ana", dec!(100), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap();
        assert!(created);
        assert_eq!(bet.status, BetStatus::Active);
        // First bet on an empty pool has no quotable odds.
        assert_eq!(bet.potential_return, Decimal::ZERO);

        let err = db
            .place_bet(1, market.id, "Bia", dec!(50), "mock_pi_b", HOUSE_CUT)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateBet));
    }

    #[tokio::test]
    async fn test_payment_reference_replay_returns_existing_bet() {
        let (db, market) = ledger_with_market().await;

        let (first, created) = db
            .place_bet(1, market.id, "Ana", dec!(100), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap();
        assert!(created);

        let (replay, created) = db
            .place_bet(1, market.id, "Ana", dec!(100), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(replay.id, first.id);

        let bets = db.bets_by_market(market.id).await.unwrap();
        assert_eq!(bets.len(), 1);
    }

    #[tokio::test]
    async fn test_estimate_tracks_pool_at_insertion() {
        let (db, market) = ledger_with_market().await;

        db.place_bet(1, market.id, "Ana", dec!(100), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap();
        let (bet, _) = db
            .place_bet(2, market.id, "Bia", dec!(100), "mock_pi_b", HOUSE_CUT)
            .await
            .unwrap();

        // Snapshot is pre-insert: Ana 100 vs Bia 0, so still no quote.
        assert_eq!(bet.potential_return, Decimal::ZERO);

        let (third, _) = db
            .place_bet(3, market.id, "Bia", dec!(50), "mock_pi_c", HOUSE_CUT)
            .await
            .unwrap();
        // Pre-insert pool: Ana 100, Bia 100 -> odds(Bia) 1.6 -> 50 * 1.6.
        assert_eq!(third.potential_return, dec!(80.00));
    }

    #[tokio::test]
    async fn test_finish_settles_even_pool() {
        let (db, market) = ledger_with_market().await;

        db.place_bet(1, market.id, "Ana", dec!(100), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap();
        db.place_bet(2, market.id, "Bia", dec!(100), "mock_pi_b", HOUSE_CUT)
            .await
            .unwrap();

        let (finished, plan) = db
            .finish_market(market.id, "Ana", Some("6-4 6-2"), HOUSE_CUT)
            .await
            .unwrap();

        assert_eq!(finished.status, MarketStatus::Finished);
        assert_eq!(finished.winner_name.as_deref(), Some("Ana"));
        assert_eq!(finished.total_winnings, Some(dec!(160.00)));
        assert_eq!(plan.winners, 1);

        let bets = db.bets_by_market(market.id).await.unwrap();
        let won = bets.iter().find(|b| b.user_id == 1).unwrap();
        assert_eq!(won.status, BetStatus::Won);
        assert_eq!(won.potential_return, dec!(160.00));
        let lost = bets.iter().find(|b| b.user_id == 2).unwrap();
        assert_eq!(lost.status, BetStatus::Lost);
        assert_eq!(lost.potential_return, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_finish_is_single_admission() {
        let (db, market) = ledger_with_market().await;

        db.finish_market(market.id, "Ana", None, HOUSE_CUT)
            .await
            .unwrap();

        let err = db
            .finish_market(market.id, "Bia", None, HOUSE_CUT)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState(MarketStatus::Finished)
        ));

        let err = db.cancel_market(market.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState(MarketStatus::Finished)
        ));
    }

    #[tokio::test]
    async fn test_betting_closes_once_market_leaves_upcoming() {
        let (db, market) = ledger_with_market().await;

        db.mark_live(market.id).await.unwrap();
        let err = db
            .place_bet(1, market.id, "Ana", dec!(10), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketClosed));

        // Live markets can still be finished.
        let (finished, _) = db.finish_market(market.id, "Bia", None, HOUSE_CUT).await.unwrap();
        assert_eq!(finished.status, MarketStatus::Finished);
    }

    #[tokio::test]
    async fn test_cancel_refunds_every_active_bet() {
        let (db, market) = ledger_with_market().await;

        for (user, reference) in [(1, "mock_pi_a"), (2, "mock_pi_b"), (3, "mock_pi_c")] {
            db.place_bet(user, market.id, "Ana", dec!(25), reference, HOUSE_CUT)
                .await
                .unwrap();
        }

        let (cancelled, pending) = db.cancel_market(market.id).await.unwrap();
        assert_eq!(cancelled.status, MarketStatus::Cancelled);
        assert_eq!(pending.len(), 3);

        let bets = db.bets_by_market(market.id).await.unwrap();
        assert!(bets
            .iter()
            .all(|b| b.status == BetStatus::Refunded && b.refund_status == RefundState::Pending));
    }

    #[tokio::test]
    async fn test_refund_outcome_transitions() {
        let (db, market) = ledger_with_market().await;

        let (bet, _) = db
            .place_bet(1, market.id, "Ana", dec!(25), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap();
        db.cancel_market(market.id).await.unwrap();

        db.mark_refund_outcome(bet.id, RefundState::Failed)
            .await
            .unwrap();
        assert_eq!(
            db.get_bet(bet.id).await.unwrap().refund_status,
            RefundState::Failed
        );

        // Manual remediation can still land the money.
        db.mark_refund_outcome(bet.id, RefundState::Succeeded)
            .await
            .unwrap();
        assert_eq!(
            db.get_bet(bet.id).await.unwrap().refund_status,
            RefundState::Succeeded
        );

        // Terminal success never regresses.
        db.mark_refund_outcome(bet.id, RefundState::Failed)
            .await
            .unwrap();
        assert_eq!(
            db.get_bet(bet.id).await.unwrap().refund_status,
            RefundState::Succeeded
        );
    }

    #[tokio::test]
    async fn test_refund_single_bet_requires_upcoming_market() {
        let (db, market) = ledger_with_market().await;

        let (bet, _) = db
            .place_bet(1, market.id, "Ana", dec!(25), "mock_pi_a", HOUSE_CUT)
            .await
            .unwrap();

        let refunded = db.refund_single_bet(bet.id, 1).await.unwrap();
        assert_eq!(refunded.status, BetStatus::Refunded);
        assert_eq!(refunded.refund_status, RefundState::Pending);

        // Another user cannot touch it, and it is no longer active.
        let err = db.refund_single_bet(bet.id, 2).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound("active bet")));

        // Once the match is live the stake is committed.
        let (second, _) = db
            .place_bet(2, market.id, "Bia", dec!(25), "mock_pi_b", HOUSE_CUT)
            .await
            .unwrap();
        db.mark_live(market.id).await.unwrap();
        let err = db.refund_single_bet(second.id, 2).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(MarketStatus::Live)));
    }
}
