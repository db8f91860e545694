use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
}

/// Processor-side identifier of a completed charge (a payment intent id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChargeRef(pub String);

impl fmt::Display for ChargeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChargeRef {
    fn from(value: &str) -> Self {
        ChargeRef(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String, // Provider's ID (e.g., pi_123)
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct IntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub product_name: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Payment declined: {0}")]
    Declined(String),

    #[error("Payment gateway timed out")]
    Timeout,

    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),

    #[error("Payment gateway error: {0}")]
    Upstream(String),
}

/// The two processor calls the waitlist core relies on (`charge`, `refund`)
/// plus the client-driven checkout entry points used by the billing handlers.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent confirmed client-side with the returned secret
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, PaymentError>;

    /// Create a hosted checkout page
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Charge a stored payment method off-session.
    ///
    /// Anything short of a settled charge is an error; a timeout must never
    /// be read as success.
    async fn charge(
        &self,
        payment_method_ref: &str,
        amount_cents: i64,
    ) -> Result<ChargeRef, PaymentError>;

    async fn refund(&self, charge_ref: &ChargeRef) -> Result<(), PaymentError>;
}
