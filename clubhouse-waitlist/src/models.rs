use chrono::{DateTime, Utc};
use clubhouse_core::{ChargeRef, ContactChannel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Waitlist entry status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Waiting,
    Offered,
    Accepted,
    Expired,
    Declined,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Waiting => "waiting",
            EntryStatus::Offered => "offered",
            EntryStatus::Accepted => "accepted",
            EntryStatus::Expired => "expired",
            EntryStatus::Declined => "declined",
            EntryStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal regardless of policy. `Expired` only leaves through a re-queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Accepted | EntryStatus::Declined | EntryStatus::Cancelled)
    }

    /// Edges of the promotion state machine reachable through a conditional
    /// transition. Re-queueing (`expired -> waiting`) assigns a new position
    /// and goes through `WaitlistStore::requeue` instead.
    pub fn can_transition_to(&self, to: EntryStatus) -> bool {
        matches!(
            (self, to),
            (EntryStatus::Waiting, EntryStatus::Offered)
                | (EntryStatus::Waiting, EntryStatus::Cancelled)
                | (EntryStatus::Offered, EntryStatus::Accepted)
                | (EntryStatus::Offered, EntryStatus::Expired)
                | (EntryStatus::Offered, EntryStatus::Declined)
                | (EntryStatus::Offered, EntryStatus::Cancelled)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(EntryStatus::Waiting),
            "offered" => Ok(EntryStatus::Offered),
            "accepted" => Ok(EntryStatus::Accepted),
            "expired" => Ok(EntryStatus::Expired),
            "declined" => Ok(EntryStatus::Declined),
            "cancelled" => Ok(EntryStatus::Cancelled),
            other => Err(format!("unknown waitlist status '{}'", other)),
        }
    }
}

/// A member queued for a seat at a full event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub position: i64,
    pub status: EntryStatus,
    pub contact: ContactChannel,
    pub saved_payment_method_ref: Option<String>,
    pub offer_expires_at: Option<DateTime<Utc>>,
    pub charge_ref: Option<ChargeRef>,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn new(
        event_id: Uuid,
        position: i64,
        contact: ContactChannel,
        saved_payment_method_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            position,
            status: EntryStatus::Waiting,
            contact,
            saved_payment_method_ref,
            offer_expires_at: None,
            charge_ref: None,
            notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reference handed to the entrant for claiming their offer
    pub fn claim_ref(&self) -> String {
        format!("claim_{}", self.id.simple())
    }

    /// Apply a committed transition to this in-memory copy.
    pub fn apply(&mut self, to: EntryStatus, fields: &TransitionFields) {
        self.status = to;
        self.offer_expires_at = if to == EntryStatus::Offered {
            fields.offer_expires_at
        } else {
            None
        };
        if fields.notified_at.is_some() {
            self.notified_at = fields.notified_at;
        }
        if fields.charge_ref.is_some() {
            self.charge_ref = fields.charge_ref.clone();
        }
        self.updated_at = fields.at;
    }
}

/// Column values written alongside a status change
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionFields {
    pub at: DateTime<Utc>,
    pub offer_expires_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
    pub charge_ref: Option<ChargeRef>,
}

impl TransitionFields {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            at: now,
            offer_expires_at: None,
            notified_at: None,
            charge_ref: None,
        }
    }

    pub fn with_offer_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.offer_expires_at = Some(expires_at);
        self
    }

    pub fn with_notified_at(mut self, notified_at: DateTime<Utc>) -> Self {
        self.notified_at = Some(notified_at);
        self
    }

    pub fn with_charge_ref(mut self, charge_ref: ChargeRef) -> Self {
        self.charge_ref = Some(charge_ref);
        self
    }
}

/// Capacity snapshot for one event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSeats {
    pub event_id: Uuid,
    pub capacity: i64,
    pub confirmed_count: i64,
    pub offered_count: i64,
    pub price_cents: Option<i64>,
}

impl EventSeats {
    pub fn available_seats(&self) -> i64 {
        (self.capacity - self.confirmed_count).max(0)
    }

    /// Free seats not already held by a live offer
    pub fn open_seats(&self) -> i64 {
        (self.capacity - self.confirmed_count - self.offered_count).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_state_machine_edges() {
        use EntryStatus::*;

        assert!(Waiting.can_transition_to(Offered));
        assert!(Waiting.can_transition_to(Cancelled));
        assert!(Offered.can_transition_to(Accepted));
        assert!(Offered.can_transition_to(Expired));

        assert!(!Waiting.can_transition_to(Accepted));
        assert!(!Expired.can_transition_to(Offered));
        for terminal in [Accepted, Declined, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Waiting, Offered, Accepted, Expired, Declined, Cancelled] {
                assert!(!terminal.can_transition_to(to), "{} -> {} must be rejected", terminal, to);
            }
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("offered".parse::<EntryStatus>().unwrap(), EntryStatus::Offered);
        assert!("pending".parse::<EntryStatus>().is_err());
    }

    #[test]
    fn test_apply_clears_offer_deadline_on_exit() {
        let now = Utc::now();
        let mut entry = WaitlistEntry::new(
            Uuid::new_v4(),
            1,
            ContactChannel::Email("sam@clubhouse.golf".to_string()),
            None,
            now,
        );

        let expires_at = now + Duration::hours(24);
        entry.apply(
            EntryStatus::Offered,
            &TransitionFields::at(now).with_offer_expiry(expires_at).with_notified_at(now),
        );
        assert_eq!(entry.offer_expires_at, Some(expires_at));
        assert_eq!(entry.notified_at, Some(now));

        let later = now + Duration::hours(1);
        entry.apply(EntryStatus::Declined, &TransitionFields::at(later));
        assert_eq!(entry.offer_expires_at, None);
        assert_eq!(entry.notified_at, Some(now));
        assert_eq!(entry.updated_at, later);
    }

    #[test]
    fn test_open_seats_excludes_live_offers() {
        let seats = EventSeats {
            event_id: Uuid::new_v4(),
            capacity: 10,
            confirmed_count: 8,
            offered_count: 1,
            price_cents: None,
        };
        assert_eq!(seats.available_seats(), 2);
        assert_eq!(seats.open_seats(), 1);
    }
}
