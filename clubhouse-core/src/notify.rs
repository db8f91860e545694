use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clubhouse_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Where an entrant wants to hear about their offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "channel", content = "target", rename_all = "lowercase")]
pub enum ContactChannel {
    Email(String),
    Push(String),
}

impl ContactChannel {
    pub fn parse(channel: &str, target: &str) -> CoreResult<Self> {
        let contact = match channel {
            "email" => ContactChannel::Email(target.trim().to_string()),
            "push" => ContactChannel::Push(target.trim().to_string()),
            other => {
                return Err(CoreError::ValidationError(format!(
                    "unsupported contact channel '{}'",
                    other
                )))
            }
        };
        contact.validate()?;
        Ok(contact)
    }

    pub fn validate(&self) -> CoreResult<()> {
        match self {
            ContactChannel::Email(addr) if !addr.contains('@') => Err(CoreError::ValidationError(
                "email contact must be an address".to_string(),
            )),
            ContactChannel::Email(target) | ContactChannel::Push(target) if target.is_empty() => {
                Err(CoreError::ValidationError("contact target is required".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            ContactChannel::Email(_) => "email",
            ContactChannel::Push(_) => "push",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            ContactChannel::Email(target) | ContactChannel::Push(target) => target,
        }
    }

    pub fn masked(&self) -> Masked<&str> {
        Masked(self.target())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushReceipt {
    pub ticket_id: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("No transport configured for {0} contacts")]
    ChannelUnavailable(String),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Entrant-facing notices sent by the promotion coordinator. Callers treat
/// failures as observability events only.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_offer(
        &self,
        contact: &ContactChannel,
        event_id: Uuid,
        claim_ref: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError>;

    async fn send_confirmation(
        &self,
        contact: &ContactChannel,
        event_id: Uuid,
        claim_ref: &str,
    ) -> Result<(), NotifyError>;
}

/// Raw push transport
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(&self, message: &PushMessage) -> Result<PushReceipt, NotifyError>;
}
