use async_trait::async_trait;
use chrono::Utc;
use clubhouse_core::payment::{
    CheckoutRequest, CheckoutSession, IntentRequest, PaymentIntent, PaymentStatus,
};
use clubhouse_core::{ChargeRef, PaymentError, PaymentGateway};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ledger::PaymentLedger;
use crate::models::{CheckoutMode, CheckoutResult, CreatePayment, PaymentRecord, PaymentRecordStatus};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Payment {0} was already refunded")]
    AlreadyRefunded(Uuid),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Starts checkouts and issues refunds, keeping the local ledger in step
/// with what was asked of the processor.
pub struct CheckoutOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn PaymentLedger>,
    default_currency: String,
}

impl CheckoutOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>, ledger: Arc<dyn PaymentLedger>, default_currency: &str) -> Self {
        Self {
            gateway,
            ledger,
            default_currency: default_currency.to_lowercase(),
        }
    }

    pub async fn create_payment(&self, request: CreatePayment) -> Result<CheckoutResult, BillingError> {
        if request.amount_cents <= 0 {
            return Err(BillingError::Validation("amount_cents must be positive".to_string()));
        }
        let currency = request
            .currency
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| self.default_currency.clone());
        if currency.len() != 3 {
            return Err(BillingError::Validation(format!("unsupported currency '{}'", currency)));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(format!("{}_id", request.subject.kind()), request.subject.id().to_string());

        let (result, record) = match request.mode {
            CheckoutMode::Intent => {
                let intent = self
                    .gateway
                    .create_intent(&IntentRequest {
                        amount_cents: request.amount_cents,
                        currency: currency.clone(),
                        description: request.description.clone(),
                        metadata,
                    })
                    .await?;
                let client_secret = intent.client_secret.clone().ok_or_else(|| {
                    BillingError::Payment(PaymentError::Upstream("intent has no client secret".to_string()))
                })?;

                let record = PaymentRecord::new(
                    request.subject,
                    CheckoutMode::Intent,
                    intent.id.clone(),
                    Some(ChargeRef(intent.id.clone())),
                    request.amount_cents,
                    currency,
                );
                (
                    CheckoutResult::Intent {
                        client_secret,
                        payment_intent_id: intent.id,
                    },
                    record,
                )
            }
            CheckoutMode::Hosted => {
                let (Some(success_url), Some(cancel_url)) = (request.success_url, request.cancel_url) else {
                    return Err(BillingError::Validation(
                        "success_url and cancel_url are required for hosted checkout".to_string(),
                    ));
                };
                let session = self
                    .gateway
                    .create_checkout_session(&CheckoutRequest {
                        amount_cents: request.amount_cents,
                        currency: currency.clone(),
                        product_name: request
                            .description
                            .unwrap_or_else(|| format!("Clubhouse {}", request.subject.kind())),
                        success_url,
                        cancel_url,
                        metadata,
                    })
                    .await?;

                let record = PaymentRecord::new(
                    request.subject,
                    CheckoutMode::Hosted,
                    session.id.clone(),
                    None,
                    request.amount_cents,
                    currency,
                );
                (
                    CheckoutResult::Hosted {
                        url: session.url,
                        session_id: session.id,
                    },
                    record,
                )
            }
        };

        self.ledger
            .record(&record)
            .await
            .map_err(|e| BillingError::Storage(e.to_string()))?;
        info!(subject = %record.subject, external_id = %record.external_id, amount_cents = record.amount_cents, "Checkout started");

        Ok(result)
    }

    /// Refund the member's most recent refundable payment
    pub async fn refund_member(&self, member_id: Uuid) -> Result<PaymentRecord, BillingError> {
        let mut record = self
            .ledger
            .latest_refundable_for_member(member_id)
            .await
            .map_err(|e| BillingError::Storage(e.to_string()))?
            .ok_or_else(|| BillingError::NotFound(format!("No refundable payment for member {}", member_id)))?;

        let charge_ref = record
            .charge_ref
            .clone()
            .ok_or_else(|| BillingError::NotFound(format!("Payment {} has no refundable charge", record.id)))?;

        let claimed = self
            .ledger
            .claim_refund(record.id)
            .await
            .map_err(|e| BillingError::Storage(e.to_string()))?;
        if !claimed {
            return Err(BillingError::AlreadyRefunded(record.id));
        }

        if let Err(err) = self.gateway.refund(&charge_ref).await {
            if let Err(release_err) = self.ledger.release_refund(record.id).await {
                error!(payment_id = %record.id, error = %release_err, "Could not release refund claim");
            }
            return Err(err.into());
        }

        let now = Utc::now();
        // The processor already refunded, so a failed write leaves the record
        // claimed rather than refundable again.
        let completed = self
            .ledger
            .complete_refund(record.id, now)
            .await
            .map_err(|e| {
                error!(payment_id = %record.id, %charge_ref, error = %e, "Refund issued but not recorded");
                BillingError::Storage(e.to_string())
            })?;
        if !completed {
            warn!(payment_id = %record.id, %charge_ref, "Refund claim vanished before completion");
        }

        record.status = PaymentRecordStatus::Refunded;
        record.refunded_at = Some(now);
        info!(%member_id, %charge_ref, "Member payment refunded");
        Ok(record)
    }
}

/// Gateway for local development and tests. Charges succeed unless the
/// payment method reference contains `declined`.
#[derive(Default)]
pub struct MockPaymentGateway {
    refunds: Mutex<Vec<ChargeRef>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refunds(&self) -> Vec<ChargeRef> {
        self.refunds.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, PaymentError> {
        let id = format!("mock_pi_{}", Uuid::new_v4().simple());
        Ok(PaymentIntent {
            client_secret: Some(format!("{}_secret_mock", id)),
            id,
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
            status: PaymentStatus::RequiresPaymentMethod,
        })
    }

    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let id = format!("mock_cs_{}", Uuid::new_v4().simple());
        Ok(CheckoutSession {
            url: format!("https://checkout.mock.local/pay/{}", id),
            id,
        })
    }

    async fn charge(&self, payment_method_ref: &str, _amount_cents: i64) -> Result<ChargeRef, PaymentError> {
        if payment_method_ref.contains("declined") {
            return Err(PaymentError::Declined("card_declined".to_string()));
        }
        Ok(ChargeRef(format!("mock_pi_{}", Uuid::new_v4().simple())))
    }

    async fn refund(&self, charge_ref: &ChargeRef) -> Result<(), PaymentError> {
        self.refunds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(charge_ref.clone());
        Ok(())
    }
}
