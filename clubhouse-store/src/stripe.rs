use async_trait::async_trait;
use clubhouse_core::payment::{
    CheckoutRequest, CheckoutSession, IntentRequest, PaymentIntent, PaymentStatus,
};
use clubhouse_core::{ChargeRef, PaymentError, PaymentGateway};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::PaymentsConfig;

/// Stripe-compatible REST client (form-encoded requests, bearer auth)
#[derive(Clone)]
pub struct StripeGateway {
    http: Client,
    api_base: String,
    secret_key: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    amount: i64,
    currency: String,
    status: PaymentStatus,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
}

impl StripeGateway {
    pub fn new(config: &PaymentsConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            currency: config.currency.to_lowercase(),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, PaymentError> {
        let response = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| PaymentError::Upstream(format!("malformed response: {}", e)))
    }
}

fn metadata_fields(metadata: &BTreeMap<String, String>) -> impl Iterator<Item = (String, String)> + '_ {
    metadata
        .iter()
        .map(|(k, v)| (format!("metadata[{}]", k), v.clone()))
}

fn transport_error(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::Timeout
    } else {
        PaymentError::Upstream(e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> PaymentError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    match status {
        StatusCode::PAYMENT_REQUIRED => {
            let reason = detail
                .and_then(|d| d.decline_code.or(d.code))
                .unwrap_or(message);
            PaymentError::Declined(reason)
        }
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => PaymentError::InvalidRequest(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => PaymentError::Timeout,
        _ => PaymentError::Upstream(message),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, PaymentError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_cents.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        if let Some(description) = &request.description {
            form.push(("description".to_string(), description.clone()));
        }
        form.extend(metadata_fields(&request.metadata));

        let body: IntentBody = self.post("/v1/payment_intents", &form).await?;
        Ok(PaymentIntent {
            id: body.id,
            amount_cents: body.amount,
            currency: body.currency,
            status: body.status,
            client_secret: body.client_secret,
        })
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), request.currency.clone()),
            ("line_items[0][price_data][unit_amount]".to_string(), request.amount_cents.to_string()),
            ("line_items[0][price_data][product_data][name]".to_string(), request.product_name.clone()),
        ];
        form.extend(metadata_fields(&request.metadata));

        let body: SessionBody = self.post("/v1/checkout/sessions", &form).await?;
        let url = body
            .url
            .ok_or_else(|| PaymentError::Upstream("checkout session has no url".to_string()))?;
        Ok(CheckoutSession { id: body.id, url })
    }

    /// Off-session charge of a saved card, confirmed immediately
    async fn charge(&self, payment_method_ref: &str, amount_cents: i64) -> Result<ChargeRef, PaymentError> {
        let form = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), self.currency.clone()),
            ("payment_method".to_string(), payment_method_ref.to_string()),
            ("confirm".to_string(), "true".to_string()),
            ("off_session".to_string(), "true".to_string()),
        ];

        let body: IntentBody = self.post("/v1/payment_intents", &form).await?;
        match body.status {
            PaymentStatus::Succeeded | PaymentStatus::Processing | PaymentStatus::RequiresCapture => {
                info!(intent_id = %body.id, amount_cents, "Saved payment method charged");
                Ok(ChargeRef(body.id))
            }
            other => {
                warn!(intent_id = %body.id, status = ?other, "Off-session charge needs customer action");
                Err(PaymentError::Declined(format!("intent ended in {:?}", other)))
            }
        }
    }

    async fn refund(&self, charge_ref: &ChargeRef) -> Result<(), PaymentError> {
        let form = vec![("payment_intent".to_string(), charge_ref.0.clone())];
        let _: serde_json::Value = self.post("/v1/refunds", &form).await?;
        info!(%charge_ref, "Refund issued");
        Ok(())
    }
}
