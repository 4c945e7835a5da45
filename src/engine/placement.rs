//! Bet placement service.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::db::Database;
use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::gateway::PaymentGateway;
use crate::models::Bet;

/// A placement result; `created` is false when the payment reference had
/// already bought a bet and the call was an idempotent replay.
#[derive(Debug, Clone)]
pub struct PlacedBet {
    pub bet: Bet,
    pub created: bool,
}

pub struct PlacementService {
    ledger: Arc<Database>,
    gateway: Arc<dyn PaymentGateway>,
    config: EngineConfig,
}

impl PlacementService {
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

    /// Validate and record a wager backed by a confirmed payment capture.
    ///
    /// The capture reference is checked with the gateway before the ledger
    /// is touched; replays of an already-recorded reference short-circuit
    /// to the existing bet so a client retrying after a timeout never pays
    /// twice. Market/player/duplicate preconditions are enforced again
    /// inside the ledger transaction.
    pub async fn place_bet(
        &self,
        user_id: i64,
        market_id: i64,
        player_name: &str,
        amount: Decimal,
        payment_reference: &str,
    ) -> Result<PlacedBet, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidArgument(
                "bet amount must be greater than zero".to_string(),
            ));
        }
        if payment_reference.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "payment reference must not be empty".to_string(),
            ));
        }

        // Replay fast-path: never re-verify a reference that already
        // bought a bet, the gateway may have expired it since.
        if let Some(existing) = self
            .ledger
            .find_bet_by_payment_reference(payment_reference)
            .await?
        {
            debug!(
                bet_id = existing.id,
                reference = %payment_reference,
                "payment reference replay, returning existing bet"
            );
            return Ok(PlacedBet {
                bet: existing,
                created: false,
            });
        }

        let confirmed = self
            .gateway
            .verify_capture(payment_reference)
            .await
            .map_err(EngineError::Gateway)?;
        if !confirmed {
            return Err(EngineError::PaymentNotConfirmed(
                payment_reference.to_string(),
            ));
        }

        let (bet, created) = self
            .ledger
            .place_bet(
                user_id,
                market_id,
                player_name,
                amount,
                payment_reference,
                self.config.house_cut_rate,
            )
            .await?;

        info!(
            bet_id = bet.id,
            market_id,
            user_id,
            player = player_name,
            amount = %amount,
            estimate = %bet.potential_return,
            "bet placed"
        );

        Ok(PlacedBet { bet, created })
    }
}
