use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// What the platform needs to know about a confirmed payment.
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub reference: String,
    pub amount: i64, // pence
    pub currency: String,
    pub succeeded: bool,
}

/// Seam over the payment provider so business flows can be tested against a
/// fake. The client is constructed once and injected; there is no shared
/// global instance.
#[allow(async_fn_in_trait)]
pub trait PaymentProvider {
    /// Look up a payment by its provider reference.
    async fn verify(&self, payment_ref: &str) -> Result<PaymentDetails>;

    /// Refund the full amount of a previously captured payment.
    async fn refund(&self, payment_ref: &str) -> Result<()>;
}

// --- Stripe API response types ---

#[derive(Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    amount: i64,
    currency: String,
}

#[derive(Deserialize)]
struct Refund {
    id: String,
    status: String,
}

impl From<PaymentIntent> for PaymentDetails {
    fn from(pi: PaymentIntent) -> Self {
        PaymentDetails {
            succeeded: pi.status == "succeeded",
            reference: pi.id,
            amount: pi.amount,
            currency: pi.currency,
        }
    }
}

// --- Client ---

#[derive(Debug, Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl PaymentProvider for StripeClient {
    async fn verify(&self, payment_ref: &str) -> Result<PaymentDetails> {
        let url = format!("{}/v1/payment_intents/{payment_ref}", self.api_base);
        let intent: PaymentIntent = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("payment lookup request failed")?
            .error_for_status()
            .context("payment lookup rejected")?
            .json()
            .await
            .context("malformed payment intent response")?;

        info!("Payment {payment_ref}: status={} amount={}", intent.status, intent.amount);
        Ok(intent.into())
    }

    async fn refund(&self, payment_ref: &str) -> Result<()> {
        let url = format!("{}/v1/refunds", self.api_base);
        let refund: Refund = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&[("payment_intent", payment_ref)])
            .send()
            .await
            .context("refund request failed")?
            .error_for_status()
            .context("refund rejected")?
            .json()
            .await
            .context("malformed refund response")?;

        info!("Refund {} for payment {payment_ref}: {}", refund.id, refund.status);
        Ok(())
    }
}
