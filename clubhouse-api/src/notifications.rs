use axum::{extract::State, routing::post, Json, Router};
use clubhouse_core::{NotifyError, PushMessage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiJson, AppError};
use crate::metrics;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub recipient_id: Uuid,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub push_type: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SendNotificationResponse {
    Sent { success: bool, ticket_id: Option<String> },
    Skipped { skipped: bool, reason: String },
}

impl SendNotificationResponse {
    fn skipped(reason: &str) -> Self {
        Self::Skipped {
            skipped: true,
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new().route("/send-notification", post(send_notification))
}

pub async fn send_notification(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendNotificationRequest>,
) -> Result<Json<SendNotificationResponse>, AppError> {
    if req.title.trim().is_empty() || req.push_type.trim().is_empty() {
        return Err(AppError::ValidationError("title and push_type are required".to_string()));
    }

    let recipient = state
        .recipients
        .find_recipient(req.recipient_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("Recipient not found: {}", req.recipient_id)))?;

    let Some(token) = recipient.push_token.clone() else {
        metrics::record_notification(&req.push_type, "skipped");
        return Ok(Json(SendNotificationResponse::skipped("no_push_token")));
    };
    if !recipient.accepts(&req.push_type) {
        metrics::record_notification(&req.push_type, "skipped");
        return Ok(Json(SendNotificationResponse::skipped("push_type_disabled")));
    }

    let mut data = match req.data {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        _ => return Err(AppError::ValidationError("data must be an object".to_string())),
    };
    data.insert("type".to_string(), serde_json::Value::String(req.push_type.clone()));

    let message = PushMessage {
        to: token,
        title: req.title,
        body: req.body,
        data: serde_json::Value::Object(data),
    };

    match state.push.send_push(&message).await {
        Ok(receipt) => {
            metrics::record_notification(&req.push_type, "sent");
            Ok(Json(SendNotificationResponse::Sent {
                success: true,
                ticket_id: receipt.ticket_id,
            }))
        }
        // A dead token is the recipient's state, not a server failure
        Err(NotifyError::Rejected(reason)) => {
            tracing::warn!(recipient_id = %req.recipient_id, %reason, "Push rejected");
            metrics::record_notification(&req.push_type, "rejected");
            Ok(Json(SendNotificationResponse::skipped("push_rejected")))
        }
        Err(err) => {
            metrics::record_notification(&req.push_type, "failed");
            Err(AppError::UpstreamError {
                message: "Push delivery failed".to_string(),
                details: err.to_string(),
            })
        }
    }
}
