use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use clubhouse_core::ContactChannel;
use clubhouse_waitlist::{ClaimOutcome, EntryStatus, PromotionOutcome, SweepReport, WaitlistEntry};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::error::{ApiJson, AppError};
use crate::metrics;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub event_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PromoteResponse {
    pub promoted: bool,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist_entry_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PromoteResponse {
    fn skipped(outcome: &PromotionOutcome, message: String) -> Self {
        Self {
            promoted: outcome.is_promoted(),
            outcome: outcome.label().to_string(),
            waitlist_entry_id: None,
            offer_expires_at: None,
            auto_accepted: None,
            message: Some(message),
        }
    }
}

impl From<&PromotionOutcome> for PromoteResponse {
    fn from(outcome: &PromotionOutcome) -> Self {
        match outcome {
            PromotionOutcome::Offered { entry, expires_at } => Self {
                promoted: outcome.is_promoted(),
                outcome: outcome.label().to_string(),
                waitlist_entry_id: Some(entry.id),
                offer_expires_at: Some(*expires_at),
                auto_accepted: Some(false),
                message: None,
            },
            PromotionOutcome::AutoAccepted { entry, .. } => Self {
                promoted: outcome.is_promoted(),
                outcome: outcome.label().to_string(),
                waitlist_entry_id: Some(entry.id),
                offer_expires_at: None,
                auto_accepted: Some(true),
                message: None,
            },
            PromotionOutcome::Superseded { .. } => Self::skipped(
                outcome,
                "Offer was withdrawn during auto-charge; the charge was refunded".to_string(),
            ),
            PromotionOutcome::NoWaiting => Self::skipped(outcome, "No waiting entries to promote".to_string()),
            PromotionOutcome::NoOpenSeat => Self::skipped(outcome, "No open seats to fill".to_string()),
            PromotionOutcome::Missed { attempts } => {
                Self::skipped(outcome, format!("Promotion missed after {} attempts", attempts))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub channel: String,
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub event_id: Uuid,
    pub contact: ContactRequest,
    pub saved_payment_method_ref: Option<String>,
}

/// Entry as exposed to clients. Contact targets and payment method
/// references stay server-side.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntryResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub position: i64,
    pub status: EntryStatus,
    pub channel: String,
    pub claim_ref: String,
    pub offer_expires_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
    pub auto_charged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WaitlistEntry> for EntryResponse {
    fn from(entry: &WaitlistEntry) -> Self {
        Self {
            id: entry.id,
            event_id: entry.event_id,
            position: entry.position,
            status: entry.status,
            channel: entry.contact.channel().to_string(),
            claim_ref: entry.claim_ref(),
            offer_expires_at: entry.offer_expires_at,
            notified_at: entry.notified_at,
            auto_charged: entry.charge_ref.is_some(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventWaitlistResponse {
    pub event_id: Uuid,
    pub capacity: i64,
    pub confirmed_count: i64,
    pub available_seats: i64,
    pub entries: Vec<EntryResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub outcome: String,
    pub status: EntryStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseSeatResponse {
    pub released: bool,
    pub promotion: PromoteResponse,
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/promote-waitlist", post(promote_waitlist))
        .route("/waitlist/join", post(join_waitlist))
        .route("/waitlist/{entry_id}", get(get_entry))
        .route("/waitlist/{entry_id}/accept", post(accept_offer))
        .route("/waitlist/{entry_id}/decline", post(decline_offer))
        .route("/waitlist/{entry_id}/cancel", post(cancel_entry))
        .route("/events/{event_id}/waitlist", get(event_waitlist))
        .route("/events/{event_id}/waitlist/stream", get(waitlist_stream))
        .route("/events/{event_id}/release-seat", post(release_seat))
        .route("/sweep-offers", post(sweep_offers))
}

pub async fn promote_waitlist(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PromoteRequest>,
) -> Result<Json<PromoteResponse>, AppError> {
    let outcome = state.coordinator.on_seat_freed(req.event_id).await?;
    metrics::record_promotion("manual", outcome.label());
    Ok(Json(PromoteResponse::from(&outcome)))
}

pub async fn join_waitlist(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<JoinRequest>,
) -> Result<Json<EntryResponse>, AppError> {
    let contact = ContactChannel::parse(&req.contact.channel, &req.contact.target)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    let payment_method = req.saved_payment_method_ref.filter(|r| !r.trim().is_empty());

    let entry = state.coordinator.join(req.event_id, contact, payment_method).await?;
    Ok(Json(EntryResponse::from(&entry)))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<EntryResponse>, AppError> {
    let entry = state
        .coordinator
        .store()
        .get(entry_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("Waitlist entry not found: {}", entry_id)))?;
    Ok(Json(EntryResponse::from(&entry)))
}

pub async fn event_waitlist(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EventWaitlistResponse>, AppError> {
    let store = state.coordinator.store();
    let seats = store
        .event_seats(event_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("Event not found: {}", event_id)))?;
    let entries = store.list_for_event(event_id).await?;

    Ok(Json(EventWaitlistResponse {
        event_id,
        capacity: seats.capacity,
        confirmed_count: seats.confirmed_count,
        available_seats: seats.available_seats(),
        entries: entries.iter().map(EntryResponse::from).collect(),
    }))
}

fn claim_response(outcome: ClaimOutcome) -> ClaimResponse {
    let status = match &outcome {
        ClaimOutcome::Accepted(entry) | ClaimOutcome::Declined(entry) => entry.status,
        ClaimOutcome::Expired => EntryStatus::Expired,
        ClaimOutcome::NotClaimable(status) => *status,
    };
    ClaimResponse {
        outcome: outcome.label().to_string(),
        status,
    }
}

pub async fn accept_offer(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<ClaimResponse>, AppError> {
    let outcome = state.coordinator.on_user_accepts(entry_id).await?;
    Ok(Json(claim_response(outcome)))
}

pub async fn decline_offer(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<ClaimResponse>, AppError> {
    let outcome = state.coordinator.on_user_declines(entry_id).await?;
    Ok(Json(claim_response(outcome)))
}

pub async fn cancel_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.coordinator.cancel_entry(entry_id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

pub async fn release_seat(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<ReleaseSeatResponse>, AppError> {
    let release = state.coordinator.release_seat(event_id).await?;
    metrics::record_promotion("release", release.promotion.label());
    Ok(Json(ReleaseSeatResponse {
        released: release.released,
        promotion: PromoteResponse::from(&release.promotion),
    }))
}

pub async fn sweep_offers(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = state.coordinator.sweep(state.coordinator.now()).await?;
    Ok(Json(report))
}

/// Live lifecycle events for one event's waitlist
pub async fn waitlist_stream(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.coordinator.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.event_id() == event_id => Event::default()
            .event(event.kind())
            .json_data(&event)
            .ok()
            .map(Ok),
        // Lagged receivers skip what they missed
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
