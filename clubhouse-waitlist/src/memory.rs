use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clubhouse_core::ContactChannel;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::clock::{SystemTime, TimeSource};
use crate::models::{EntryStatus, EventSeats, TransitionFields, WaitlistEntry};
use crate::store::{ensure_edge, WaitlistError, WaitlistResult, WaitlistStore};

#[derive(Debug, Clone)]
struct EventRow {
    capacity: i64,
    confirmed_count: i64,
    price_cents: Option<i64>,
}

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<Uuid, EventRow>,
    entries: HashMap<Uuid, WaitlistEntry>,
}

impl Inner {
    fn seats(&self, event_id: Uuid) -> Option<EventSeats> {
        let row = self.events.get(&event_id)?;
        let offered_count = self
            .entries
            .values()
            .filter(|e| e.event_id == event_id && e.status == EntryStatus::Offered)
            .count() as i64;

        Some(EventSeats {
            event_id,
            capacity: row.capacity,
            confirmed_count: row.confirmed_count,
            offered_count,
            price_cents: row.price_cents,
        })
    }

    fn tail_position(&self, event_id: Uuid) -> i64 {
        self.entries
            .values()
            .filter(|e| e.event_id == event_id)
            .map(|e| e.position)
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Process-local waitlist store. Every operation runs under one mutex, which
/// gives the same all-or-nothing conditional updates the Postgres store gets
/// from row locks. The guard is never held across an `.await`.
pub struct InMemoryWaitlistStore {
    inner: Mutex<Inner>,
    time: Arc<dyn TimeSource>,
}

impl InMemoryWaitlistStore {
    pub fn new() -> Self {
        Self::with_time(Arc::new(SystemTime))
    }

    pub fn with_time(time: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            time,
        }
    }

    /// Register (or overwrite) an event's capacity row
    pub fn add_event(&self, event_id: Uuid, capacity: i64, confirmed_count: i64, price_cents: Option<i64>) {
        self.state().events.insert(
            event_id,
            EventRow {
                capacity,
                confirmed_count,
                price_cents,
            },
        );
    }

    /// Load an existing row as-is, e.g. fixtures with known positions
    pub fn insert_entry(&self, entry: WaitlistEntry) {
        self.state().entries.insert(entry.id, entry);
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryWaitlistStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WaitlistStore for InMemoryWaitlistStore {
    async fn enqueue(
        &self,
        event_id: Uuid,
        contact: ContactChannel,
        saved_payment_method_ref: Option<String>,
    ) -> WaitlistResult<WaitlistEntry> {
        contact
            .validate()
            .map_err(|e| WaitlistError::Validation(e.to_string()))?;

        let now = self.time.now();
        let mut inner = self.state();
        if !inner.events.contains_key(&event_id) {
            return Err(WaitlistError::EventNotFound(event_id));
        }

        let position = inner.tail_position(event_id);
        let entry = WaitlistEntry::new(event_id, position, contact, saved_payment_method_ref, now);
        inner.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, entry_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>> {
        Ok(self.state().entries.get(&entry_id).cloned())
    }

    async fn list_for_event(&self, event_id: Uuid) -> WaitlistResult<Vec<WaitlistEntry>> {
        let mut entries: Vec<WaitlistEntry> = self
            .state()
            .entries
            .values()
            .filter(|e| e.event_id == event_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }

    async fn next_waiting(&self, event_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>> {
        Ok(self
            .state()
            .entries
            .values()
            .filter(|e| e.event_id == event_id && e.status == EntryStatus::Waiting)
            .min_by_key(|e| e.position)
            .cloned())
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        from: EntryStatus,
        to: EntryStatus,
        fields: TransitionFields,
    ) -> WaitlistResult<bool> {
        ensure_edge(from, to)?;

        let mut inner = self.state();
        let current = inner
            .entries
            .get(&entry_id)
            .ok_or(WaitlistError::EntryNotFound(entry_id))?;
        if current.status != from {
            return Ok(false);
        }
        let event_id = current.event_id;

        if to == EntryStatus::Offered {
            let open = inner.seats(event_id).map(|s| s.open_seats()).unwrap_or(0);
            if open <= 0 {
                return Ok(false);
            }
        }

        if to == EntryStatus::Accepted {
            let event = inner
                .events
                .get_mut(&event_id)
                .ok_or(WaitlistError::EventNotFound(event_id))?;
            event.confirmed_count += 1;
        }

        if let Some(entry) = inner.entries.get_mut(&entry_id) {
            entry.apply(to, &fields);
        }
        Ok(true)
    }

    async fn cancel(&self, entry_id: Uuid) -> WaitlistResult<bool> {
        let now = self.time.now();
        let mut inner = self.state();
        let entry = inner
            .entries
            .get_mut(&entry_id)
            .ok_or(WaitlistError::EntryNotFound(entry_id))?;

        if !matches!(entry.status, EntryStatus::Waiting | EntryStatus::Offered) {
            return Ok(false);
        }
        entry.apply(EntryStatus::Cancelled, &TransitionFields::at(now));
        Ok(true)
    }

    async fn find_expired_offers(&self, now: DateTime<Utc>) -> WaitlistResult<Vec<WaitlistEntry>> {
        let mut expired: Vec<WaitlistEntry> = self
            .state()
            .entries
            .values()
            .filter(|e| {
                e.status == EntryStatus::Offered && e.offer_expires_at.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|e| (e.offer_expires_at, e.position));
        Ok(expired)
    }

    async fn event_seats(&self, event_id: Uuid) -> WaitlistResult<Option<EventSeats>> {
        Ok(self.state().seats(event_id))
    }

    async fn release_seat(&self, event_id: Uuid) -> WaitlistResult<bool> {
        let mut inner = self.state();
        let event = inner
            .events
            .get_mut(&event_id)
            .ok_or(WaitlistError::EventNotFound(event_id))?;

        if event.confirmed_count <= 0 {
            return Ok(false);
        }
        event.confirmed_count -= 1;
        Ok(true)
    }

    async fn requeue(&self, entry_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>> {
        let now = self.time.now();
        let mut inner = self.state();
        let event_id = match inner.entries.get(&entry_id) {
            Some(entry) if entry.status == EntryStatus::Expired => entry.event_id,
            Some(_) => return Ok(None),
            None => return Err(WaitlistError::EntryNotFound(entry_id)),
        };

        let position = inner.tail_position(event_id);
        let Some(entry) = inner.entries.get_mut(&entry_id) else {
            return Err(WaitlistError::EntryNotFound(entry_id));
        };
        entry.position = position;
        entry.status = EntryStatus::Waiting;
        entry.offer_expires_at = None;
        entry.updated_at = now;
        Ok(Some(entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn contact(n: usize) -> ContactChannel {
        ContactChannel::Email(format!("member{}@clubhouse.golf", n))
    }

    fn offer_fields(now: DateTime<Utc>) -> TransitionFields {
        TransitionFields::at(now).with_offer_expiry(now + Duration::hours(24))
    }

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_positions() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 2, 2, None);

        let first = store.enqueue(event_id, contact(1), None).await.unwrap();
        let second = store.enqueue(event_id, contact(2), Some("pm_123".to_string())).await.unwrap();

        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert_eq!(second.saved_payment_method_ref.as_deref(), Some("pm_123"));
        assert_eq!(store.next_waiting(event_id).await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_event() {
        let store = InMemoryWaitlistStore::new();
        let result = store.enqueue(Uuid::new_v4(), contact(1), None).await;
        assert!(matches!(result, Err(WaitlistError::EventNotFound(_))));
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 1, 0, None);
        let entry = store.enqueue(event_id, contact(1), None).await.unwrap();
        let now = Utc::now();

        assert!(store
            .transition(entry.id, EntryStatus::Waiting, EntryStatus::Offered, offer_fields(now))
            .await
            .unwrap());
        // Second caller with the same expectation loses
        assert!(!store
            .transition(entry.id, EntryStatus::Waiting, EntryStatus::Offered, offer_fields(now))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_offer_requires_open_seat() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 5, 4, None);
        let a = store.enqueue(event_id, contact(1), None).await.unwrap();
        let b = store.enqueue(event_id, contact(2), None).await.unwrap();
        let now = Utc::now();

        assert!(store
            .transition(a.id, EntryStatus::Waiting, EntryStatus::Offered, offer_fields(now))
            .await
            .unwrap());
        assert!(!store
            .transition(b.id, EntryStatus::Waiting, EntryStatus::Offered, offer_fields(now))
            .await
            .unwrap());

        let seats = store.event_seats(event_id).await.unwrap().unwrap();
        assert_eq!(seats.offered_count, 1);
        assert_eq!(seats.open_seats(), 0);
    }

    #[tokio::test]
    async fn test_accept_confirms_seat() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 3, 2, None);
        let entry = store.enqueue(event_id, contact(1), None).await.unwrap();
        let now = Utc::now();

        store
            .transition(entry.id, EntryStatus::Waiting, EntryStatus::Offered, offer_fields(now))
            .await
            .unwrap();
        store
            .transition(entry.id, EntryStatus::Offered, EntryStatus::Accepted, TransitionFields::at(now))
            .await
            .unwrap();

        let seats = store.event_seats(event_id).await.unwrap().unwrap();
        assert_eq!(seats.confirmed_count, 3);
        assert_eq!(seats.offered_count, 0);
        let stored = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.offer_expires_at, None);
    }

    #[tokio::test]
    async fn test_illegal_edge_is_an_error() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 1, 0, None);
        let entry = store.enqueue(event_id, contact(1), None).await.unwrap();

        let result = store
            .transition(entry.id, EntryStatus::Waiting, EntryStatus::Accepted, TransitionFields::at(Utc::now()))
            .await;
        assert!(matches!(result, Err(WaitlistError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_cancel_only_from_live_states() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 1, 1, None);
        let entry = store.enqueue(event_id, contact(1), None).await.unwrap();

        assert!(store.cancel(entry.id).await.unwrap());
        assert!(!store.cancel(entry.id).await.unwrap());
        assert_eq!(store.get(entry.id).await.unwrap().unwrap().status, EntryStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_expired_offers_query() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 2, 0, None);
        let a = store.enqueue(event_id, contact(1), None).await.unwrap();
        let b = store.enqueue(event_id, contact(2), None).await.unwrap();
        let now = Utc::now();

        store
            .transition(a.id, EntryStatus::Waiting, EntryStatus::Offered, TransitionFields::at(now).with_offer_expiry(now + Duration::hours(1)))
            .await
            .unwrap();
        store
            .transition(b.id, EntryStatus::Waiting, EntryStatus::Offered, TransitionFields::at(now).with_offer_expiry(now + Duration::hours(3)))
            .await
            .unwrap();

        let lapsed = store.find_expired_offers(now + Duration::hours(2)).await.unwrap();
        assert_eq!(lapsed.len(), 1);
        assert_eq!(lapsed[0].id, a.id);
    }

    #[tokio::test]
    async fn test_requeue_moves_to_tail() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 1, 0, None);
        let first = store.enqueue(event_id, contact(1), None).await.unwrap();
        store.enqueue(event_id, contact(2), None).await.unwrap();
        let now = Utc::now();

        store
            .transition(first.id, EntryStatus::Waiting, EntryStatus::Offered, offer_fields(now))
            .await
            .unwrap();
        assert!(store.requeue(first.id).await.unwrap().is_none(), "only expired entries requeue");

        store
            .transition(first.id, EntryStatus::Offered, EntryStatus::Expired, TransitionFields::at(now))
            .await
            .unwrap();
        let requeued = store.requeue(first.id).await.unwrap().unwrap();

        assert_eq!(requeued.status, EntryStatus::Waiting);
        assert_eq!(requeued.position, 3);
    }

    #[tokio::test]
    async fn test_release_seat() {
        let store = InMemoryWaitlistStore::new();
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 2, 1, None);

        assert!(store.release_seat(event_id).await.unwrap());
        assert!(!store.release_seat(event_id).await.unwrap());
        assert!(matches!(
            store.release_seat(Uuid::new_v4()).await,
            Err(WaitlistError::EventNotFound(_))
        ));
    }
}
