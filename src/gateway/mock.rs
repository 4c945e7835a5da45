//! Mock payment gateway for development and tests.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{PaymentGateway, RefundOutcome};

const MOCK_PREFIX: &str = "mock_pi_";

/// Accepts any `mock_pi_`-prefixed reference as a captured payment.
///
/// Refunds succeed unless the gateway was built failing, which tests use
/// to drive the `refund_status = failed` operator path.
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    fail_refunds: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            fail_refunds: false,
        }
    }

    /// A gateway whose refunds are always declined.
    pub fn failing_refunds() -> Self {
        Self { fail_refunds: true }
    }

    /// Mint a reference the mock will recognize as captured.
    pub fn issue_reference() -> String {
        format!("{MOCK_PREFIX}{}", Uuid::new_v4().simple())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn verify_capture(&self, payment_reference: &str) -> Result<bool> {
        Ok(payment_reference.starts_with(MOCK_PREFIX))
    }

    async fn refund(&self, payment_reference: &str) -> Result<RefundOutcome> {
        info!(reference = %payment_reference, "mock refund issued");
        if self.fail_refunds {
            Ok(RefundOutcome::Failed)
        } else {
            Ok(RefundOutcome::Succeeded)
        }
    }
}
