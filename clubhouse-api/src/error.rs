use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clubhouse_billing::BillingError;
use clubhouse_core::PaymentError;
use clubhouse_waitlist::WaitlistError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    /// A collaborator (payment processor, push service) failed
    UpstreamError { message: String, details: String },
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::UpstreamError { message, details } => {
                tracing::error!("Upstream failure: {}: {}", message, details);
                (StatusCode::INTERNAL_SERVER_ERROR, message, Some(details))
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), None)
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), None)
            }
        };

        let body = match details {
            Some(details) => json!({ "error": error_message, "details": details }),
            None => json!({ "error": error_message }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::ValidationError(rejection.body_text())
    }
}

impl From<WaitlistError> for AppError {
    fn from(err: WaitlistError) -> Self {
        match err {
            WaitlistError::EventNotFound(_) | WaitlistError::EntryNotFound(_) => Self::NotFoundError(err.to_string()),
            WaitlistError::Validation(msg) => Self::ValidationError(msg),
            WaitlistError::InvalidTransition { .. } => Self::ConflictError(err.to_string()),
            WaitlistError::Storage(msg) => Self::InternalServerError(msg),
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => Self::ValidationError(msg),
            BillingError::NotFound(msg) => Self::NotFoundError(msg),
            BillingError::AlreadyRefunded(_) => Self::ConflictError(err.to_string()),
            BillingError::Payment(PaymentError::InvalidRequest(msg)) => Self::ValidationError(msg),
            BillingError::Payment(payment) => Self::UpstreamError {
                message: "Payment processor request failed".to_string(),
                details: payment.to_string(),
            },
            BillingError::Storage(msg) => Self::InternalServerError(msg),
        }
    }
}

/// `Json` extractor whose rejections use the `{error}` envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_waitlist_errors_map_to_statuses() {
        let missing: AppError = WaitlistError::EntryNotFound(Uuid::new_v4()).into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let invalid: AppError = WaitlistError::Validation("bad contact".to_string()).into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_declines_are_upstream_failures() {
        let err: AppError = BillingError::Payment(PaymentError::Declined("card_declined".to_string())).into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
