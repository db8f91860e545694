use crate::models::{EntryStatus, WaitlistEntry};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_OFFER_TTL_HOURS: i64 = 24;

/// Source of "now" for offer deadlines
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven time for tests and replays
#[derive(Debug)]
pub struct ManualTime {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTime {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Time-boxes offers. Deadlines are data (`offer_expires_at`), never live
/// timers, so a restart loses nothing: the next sweep still finds them.
#[derive(Debug, Clone)]
pub struct OfferClock {
    ttl: Duration,
}

impl OfferClock {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deadline for an offer extended at `now`
    pub fn start_offer(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.ttl
    }

    pub fn is_expired(&self, entry: &WaitlistEntry, now: DateTime<Utc>) -> bool {
        entry.status == EntryStatus::Offered
            && entry.offer_expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Time left to claim, `None` once lapsed or when nothing is on offer
    pub fn remaining(&self, entry: &WaitlistEntry, now: DateTime<Utc>) -> Option<Duration> {
        if entry.status != EntryStatus::Offered {
            return None;
        }
        entry
            .offer_expires_at
            .map(|deadline| deadline - now)
            .filter(|left| *left > Duration::zero())
    }
}

impl Default for OfferClock {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_OFFER_TTL_HOURS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransitionFields;
    use clubhouse_core::ContactChannel;
    use uuid::Uuid;

    fn offered_entry(now: DateTime<Utc>, clock: &OfferClock) -> WaitlistEntry {
        let mut entry = WaitlistEntry::new(
            Uuid::new_v4(),
            11,
            ContactChannel::Push("ExponentPushToken[abc]".to_string()),
            None,
            now,
        );
        entry.apply(
            EntryStatus::Offered,
            &TransitionFields::at(now).with_offer_expiry(clock.start_offer(now)),
        );
        entry
    }

    #[test]
    fn test_offer_expiry() {
        let clock = OfferClock::default();
        let now = Utc::now();
        let entry = offered_entry(now, &clock);

        assert_eq!(entry.offer_expires_at, Some(now + Duration::hours(24)));
        assert!(!clock.is_expired(&entry, now + Duration::hours(23)));
        assert!(clock.is_expired(&entry, now + Duration::hours(24)));
        assert!(clock.is_expired(&entry, now + Duration::hours(25)));
    }

    #[test]
    fn test_remaining_time() {
        let clock = OfferClock::new(Duration::minutes(30));
        let now = Utc::now();
        let entry = offered_entry(now, &clock);

        assert_eq!(clock.remaining(&entry, now + Duration::minutes(10)), Some(Duration::minutes(20)));
        assert_eq!(clock.remaining(&entry, now + Duration::minutes(30)), None);
    }

    #[test]
    fn test_only_live_offers_expire() {
        let clock = OfferClock::default();
        let now = Utc::now();
        let mut entry = offered_entry(now, &clock);
        entry.apply(EntryStatus::Accepted, &TransitionFields::at(now));

        assert!(!clock.is_expired(&entry, now + Duration::days(3)));
    }

    #[test]
    fn test_manual_time_advances() {
        let start = Utc::now();
        let time = ManualTime::new(start);
        time.advance(Duration::hours(25));
        assert_eq!(time.now(), start + Duration::hours(25));
    }
}
