use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clubhouse_core::{ContactChannel, Notifier, NotifyError, PushMessage, PushReceipt, PushSender};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app_config::NotificationsConfig;

/// Expo-compatible push API client
#[derive(Clone)]
pub struct ExpoPushClient {
    http: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    data: Vec<ExpoTicket>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    id: Option<String>,
    message: Option<String>,
}

fn transport_error(e: reqwest::Error) -> NotifyError {
    NotifyError::Transport(e.to_string())
}

impl ExpoPushClient {
    pub fn new(config: &NotificationsConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.push_endpoint.clone(),
        })
    }
}

fn first_ticket(response: ExpoResponse) -> Result<PushReceipt, NotifyError> {
    let ticket = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| NotifyError::Transport("push service returned no ticket".to_string()))?;

    if ticket.status == "ok" {
        Ok(PushReceipt { ticket_id: ticket.id })
    } else {
        Err(NotifyError::Rejected(
            ticket.message.unwrap_or_else(|| ticket.status.clone()),
        ))
    }
}

#[async_trait]
impl PushSender for ExpoPushClient {
    async fn send_push(&self, message: &PushMessage) -> Result<PushReceipt, NotifyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&[message])
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(NotifyError::Transport(format!("push service returned {}", response.status())));
        }

        let body: ExpoResponse = response.json().await.map_err(transport_error)?;
        let receipt = first_ticket(body)?;
        debug!(ticket_id = ?receipt.ticket_id, "Push accepted");
        Ok(receipt)
    }
}

#[derive(Debug, Serialize)]
struct RelayEmail<'a> {
    to: &'a str,
    subject: String,
    text: String,
}

/// Routes entrant notices to push or to a webhook email relay
pub struct ChannelNotifier {
    push: Arc<dyn PushSender>,
    http: Client,
    email_relay_url: Option<String>,
}

impl ChannelNotifier {
    pub fn new(push: Arc<dyn PushSender>, config: &NotificationsConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            push,
            http,
            email_relay_url: config.email_relay_url.clone().filter(|u| !u.is_empty()),
        })
    }

    async fn deliver(&self, contact: &ContactChannel, title: String, body: String, data: serde_json::Value) -> Result<(), NotifyError> {
        match contact {
            ContactChannel::Push(token) => {
                self.push
                    .send_push(&PushMessage {
                        to: token.clone(),
                        title,
                        body,
                        data,
                    })
                    .await?;
            }
            ContactChannel::Email(address) => {
                let relay = self
                    .email_relay_url
                    .as_deref()
                    .ok_or_else(|| NotifyError::ChannelUnavailable("email".to_string()))?;
                let response = self
                    .http
                    .post(relay)
                    .json(&RelayEmail {
                        to: address,
                        subject: title,
                        text: body,
                    })
                    .send()
                    .await
                    .map_err(transport_error)?;
                if !response.status().is_success() {
                    return Err(NotifyError::Transport(format!("email relay returned {}", response.status())));
                }
            }
        }
        info!(channel = contact.channel(), contact = %contact.masked(), "Notice delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send_offer(
        &self,
        contact: &ContactChannel,
        event_id: Uuid,
        claim_ref: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let body = format!(
            "A seat opened up. Claim it with {} before {}.",
            claim_ref,
            expires_at.format("%b %-d, %H:%M UTC")
        );
        let data = json!({
            "type": "waitlist_offer",
            "event_id": event_id,
            "claim_ref": claim_ref,
            "expires_at": expires_at,
        });
        self.deliver(contact, "You're off the waitlist".to_string(), body, data).await
    }

    async fn send_confirmation(
        &self,
        contact: &ContactChannel,
        event_id: Uuid,
        claim_ref: &str,
    ) -> Result<(), NotifyError> {
        let data = json!({
            "type": "waitlist_confirmed",
            "event_id": event_id,
            "claim_ref": claim_ref,
        });
        self.deliver(
            contact,
            "Your seat is confirmed".to_string(),
            "Your saved card was charged and your seat is booked.".to_string(),
            data,
        )
        .await
    }
}
