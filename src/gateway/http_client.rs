//! HTTP adapter for the real payment gateway.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{PaymentGateway, RefundOutcome};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway payment record, as much of it as the engine reads.
#[derive(Debug, Deserialize)]
struct PaymentResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    status: String,
}

/// Client for the payment gateway's REST API.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    access_token: String,
}

impl HttpGateway {
    pub fn new(base_url: String, access_token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    /// Configure from `PAYMENT_GATEWAY_URL` and `PAYMENT_GATEWAY_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PAYMENT_GATEWAY_URL")
            .context("PAYMENT_GATEWAY_URL not configured")?;
        let access_token = std::env::var("PAYMENT_GATEWAY_TOKEN")
            .context("PAYMENT_GATEWAY_TOKEN not configured")?;

        Self::new(base_url, access_token)
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn verify_capture(&self, payment_reference: &str) -> Result<bool> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_reference);
        debug!(url = %url, "Verifying payment capture");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Failed to query payment")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Payment lookup failed: {} - {}", status, body);
        }

        let payment: PaymentResponse = response
            .json()
            .await
            .context("Failed to parse payment response")?;

        Ok(matches!(payment.status.as_str(), "succeeded" | "approved"))
    }

    async fn refund(&self, payment_reference: &str) -> Result<RefundOutcome> {
        let url = format!(
            "{}/v1/payments/{}/refunds",
            self.base_url, payment_reference
        );
        debug!(url = %url, "Issuing refund");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Failed to issue refund")?;

        // A rejected refund is a terminal outcome for the operator queue;
        // transport and server errors bubble up for retry instead.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(RefundOutcome::Failed);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Refund request failed: {} - {}", status, body);
        }

        let refund: RefundResponse = response
            .json()
            .await
            .context("Failed to parse refund response")?;

        match refund.status.as_str() {
            "succeeded" | "approved" => Ok(RefundOutcome::Succeeded),
            "pending" | "in_process" => Ok(RefundOutcome::Pending),
            _ => Ok(RefundOutcome::Failed),
        }
    }
}
