//! Payment gateway boundary: capture verification and refunds.
//!
//! The engine never processes cards or PIX itself; it consumes an opaque
//! capture reference produced upstream and a refund primitive. The trait
//! keeps the gateway pluggable so the mock satisfies the same contract as
//! the production adapter without weakening the ledger's invariants.

mod http_client;
mod mock;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use http_client::HttpGateway;
pub use mock::MockGateway;

/// Answer from a refund request.
///
/// `Pending` means the gateway accepted the request but the money has not
/// confirmed moved; the ledger keeps its own pending marker and the
/// sweeper polls again. Transport failures are not outcomes at all; they
/// also leave the refund pending for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Succeeded,
    Pending,
    Failed,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Whether the gateway captured funds for this reference.
    async fn verify_capture(&self, payment_reference: &str) -> Result<bool>;

    /// Ask the gateway to return the captured funds.
    async fn refund(&self, payment_reference: &str) -> Result<RefundOutcome>;
}

/// Select a gateway from the environment.
///
/// `PAYMENT_MOCK_ACTIVE=true` swaps in the mock, mirroring the deploy's
/// test bypass; otherwise the HTTP adapter is configured from
/// `PAYMENT_GATEWAY_URL` / `PAYMENT_GATEWAY_TOKEN`. An unconfigured
/// gateway degrades to the mock with a warning rather than refusing to
/// start.
pub fn from_env() -> Result<Arc<dyn PaymentGateway>> {
    let mock_active = std::env::var("PAYMENT_MOCK_ACTIVE")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if mock_active {
        return Ok(Arc::new(MockGateway::new()));
    }

    match HttpGateway::from_env() {
        Ok(gateway) => Ok(Arc::new(gateway)),
        Err(e) => {
            tracing::warn!(error = %e, "payment gateway not configured; using mock");
            Ok(Arc::new(MockGateway::new()))
        }
    }
}
