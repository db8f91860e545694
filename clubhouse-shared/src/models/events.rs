use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Waitlist lifecycle notifications fanned out to live subscribers (the
/// in-app waitlist view). Delivery is best-effort; the store remains the
/// source of truth.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitlistEvent {
    Joined {
        event_id: Uuid,
        entry_id: Uuid,
        position: i64,
        timestamp: i64,
    },
    OfferExtended {
        event_id: Uuid,
        entry_id: Uuid,
        position: i64,
        expires_at: DateTime<Utc>,
        timestamp: i64,
    },
    SeatConfirmed {
        event_id: Uuid,
        entry_id: Uuid,
        auto_charged: bool,
        timestamp: i64,
    },
    OfferLapsed {
        event_id: Uuid,
        entry_id: Uuid,
        requeued: bool,
        timestamp: i64,
    },
    OfferDeclined {
        event_id: Uuid,
        entry_id: Uuid,
        timestamp: i64,
    },
    EntryCancelled {
        event_id: Uuid,
        entry_id: Uuid,
        timestamp: i64,
    },
    PromotionMissed {
        event_id: Uuid,
        attempts: u32,
        timestamp: i64,
    },
}

impl WaitlistEvent {
    pub fn event_id(&self) -> Uuid {
        match self {
            WaitlistEvent::Joined { event_id, .. }
            | WaitlistEvent::OfferExtended { event_id, .. }
            | WaitlistEvent::SeatConfirmed { event_id, .. }
            | WaitlistEvent::OfferLapsed { event_id, .. }
            | WaitlistEvent::OfferDeclined { event_id, .. }
            | WaitlistEvent::EntryCancelled { event_id, .. }
            | WaitlistEvent::PromotionMissed { event_id, .. } => *event_id,
        }
    }

    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            WaitlistEvent::Joined { .. } => "joined",
            WaitlistEvent::OfferExtended { .. } => "offer_extended",
            WaitlistEvent::SeatConfirmed { .. } => "seat_confirmed",
            WaitlistEvent::OfferLapsed { .. } => "offer_lapsed",
            WaitlistEvent::OfferDeclined { .. } => "offer_declined",
            WaitlistEvent::EntryCancelled { .. } => "entry_cancelled",
            WaitlistEvent::PromotionMissed { .. } => "promotion_missed",
        }
    }
}
