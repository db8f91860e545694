use axum::{extract::State, routing::post, Json, Router};
use clubhouse_billing::{CheckoutMode, CheckoutResult, CreatePayment, PaymentSubject};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiJson, AppError};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub reservation_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub checkout_mode: CheckoutMode,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

impl CreatePaymentRequest {
    fn into_command(self) -> Result<CreatePayment, AppError> {
        let subject = match (self.member_id, self.reservation_id) {
            (Some(member_id), None) => PaymentSubject::Member(member_id),
            (None, Some(reservation_id)) => PaymentSubject::Reservation(reservation_id),
            (None, None) => {
                return Err(AppError::ValidationError(
                    "member_id or reservation_id is required".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(AppError::ValidationError(
                    "provide only one of member_id or reservation_id".to_string(),
                ))
            }
        };
        let amount_cents = self
            .amount_cents
            .ok_or_else(|| AppError::ValidationError("amount_cents is required".to_string()))?;

        Ok(CreatePayment {
            subject,
            amount_cents,
            currency: self.currency,
            description: self.description,
            mode: self.checkout_mode,
            success_url: self.success_url,
            cancel_url: self.cancel_url,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub member_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefundResponse {
    pub success: bool,
    pub payment_id: Uuid,
    pub amount_cents: i64,
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create-payment", post(create_payment))
        .route("/refund-payment", post(refund_payment))
}

pub async fn create_payment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreatePaymentRequest>,
) -> Result<Json<CheckoutResult>, AppError> {
    let command = req.into_command()?;
    let result = state.billing.create_payment(command).await?;
    Ok(Json(result))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefundRequest>,
) -> Result<Json<RefundResponse>, AppError> {
    let record = state.billing.refund_member(req.member_id).await?;
    Ok(Json(RefundResponse {
        success: true,
        payment_id: record.id,
        amount_cents: record.amount_cents,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(member_id: Option<Uuid>, reservation_id: Option<Uuid>) -> CreatePaymentRequest {
        CreatePaymentRequest {
            reservation_id,
            member_id,
            amount_cents: Some(5000),
            currency: None,
            description: None,
            checkout_mode: CheckoutMode::Intent,
            success_url: None,
            cancel_url: None,
        }
    }

    #[test]
    fn test_subject_must_be_unambiguous() {
        assert!(request(None, None).into_command().is_err());
        assert!(request(Some(Uuid::new_v4()), Some(Uuid::new_v4())).into_command().is_err());

        let reservation_id = Uuid::new_v4();
        let command = request(None, Some(reservation_id)).into_command().unwrap();
        assert_eq!(command.subject, PaymentSubject::Reservation(reservation_id));
    }
}
