use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clubhouse_core::ContactChannel;
use uuid::Uuid;

use crate::models::{EntryStatus, EventSeats, TransitionFields, WaitlistEntry};

#[derive(Debug, thiserror::Error)]
pub enum WaitlistError {
    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Waitlist entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: EntryStatus,
        to: EntryStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type WaitlistResult<T> = Result<T, WaitlistError>;

/// Durable, ordered waitlist rows. No business logic lives here beyond the
/// conditional updates that make concurrent callers safe.
#[async_trait]
pub trait WaitlistStore: Send + Sync {
    /// Append an entrant at the tail of the event's queue
    async fn enqueue(
        &self,
        event_id: Uuid,
        contact: ContactChannel,
        saved_payment_method_ref: Option<String>,
    ) -> WaitlistResult<WaitlistEntry>;

    async fn get(&self, entry_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>>;

    async fn list_for_event(&self, event_id: Uuid) -> WaitlistResult<Vec<WaitlistEntry>>;

    /// The `waiting` entry with the lowest position
    async fn next_waiting(&self, event_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>>;

    /// Compare-and-swap on status. Returns `Ok(false)` when the entry is no
    /// longer in `from`; that means another actor already handled it.
    ///
    /// Moving to `offered` additionally requires an open seat, checked in the
    /// same atomic unit. Moving to `accepted` bumps the event's confirmed
    /// count in the same atomic unit.
    async fn transition(
        &self,
        entry_id: Uuid,
        from: EntryStatus,
        to: EntryStatus,
        fields: TransitionFields,
    ) -> WaitlistResult<bool>;

    /// `waiting | offered -> cancelled`
    async fn cancel(&self, entry_id: Uuid) -> WaitlistResult<bool>;

    /// Offers whose deadline is at or before `now`
    async fn find_expired_offers(&self, now: DateTime<Utc>) -> WaitlistResult<Vec<WaitlistEntry>>;

    async fn event_seats(&self, event_id: Uuid) -> WaitlistResult<Option<EventSeats>>;

    /// Give back one confirmed seat. `false` when nothing was confirmed.
    async fn release_seat(&self, event_id: Uuid) -> WaitlistResult<bool>;

    /// `expired -> waiting` at a fresh tail position
    async fn requeue(&self, entry_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>>;
}

/// Shared guard for store implementations
pub fn ensure_edge(from: EntryStatus, to: EntryStatus) -> WaitlistResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(WaitlistError::InvalidTransition { from, to })
    }
}
