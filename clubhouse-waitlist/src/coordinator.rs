use chrono::{DateTime, Duration, Utc};
use clubhouse_core::{ChargeRef, ContactChannel, Notifier, PaymentError, PaymentGateway};
use clubhouse_shared::WaitlistEvent;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{OfferClock, SystemTime, TimeSource, DEFAULT_OFFER_TTL_HOURS};
use crate::models::{EntryStatus, EventSeats, TransitionFields, WaitlistEntry};
use crate::store::{WaitlistError, WaitlistResult, WaitlistStore};

/// Knobs for how freed seats are filled
#[derive(Debug, Clone)]
pub struct PromotionPolicy {
    pub offer_ttl: Duration,
    pub max_attempts: u32,
    /// Charge a saved payment method straight away instead of waiting for
    /// the entrant to accept.
    pub auto_charge: bool,
    /// Put lapsed entrants back at the tail instead of dropping them
    pub requeue_expired: bool,
    pub charge_timeout: std::time::Duration,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            offer_ttl: Duration::hours(DEFAULT_OFFER_TTL_HOURS),
            max_attempts: 3,
            auto_charge: false,
            requeue_expired: false,
            charge_timeout: std::time::Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    Offered {
        entry: WaitlistEntry,
        expires_at: DateTime<Utc>,
    },
    AutoAccepted {
        entry: WaitlistEntry,
        charge_ref: ChargeRef,
    },
    /// The offer was made but withdrawn by another actor while the saved
    /// card was being charged; the charge has been refunded.
    Superseded {
        entry: WaitlistEntry,
    },
    NoWaiting,
    NoOpenSeat,
    Missed {
        attempts: u32,
    },
}

impl PromotionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PromotionOutcome::Offered { .. } => "offered",
            PromotionOutcome::AutoAccepted { .. } => "auto_accepted",
            PromotionOutcome::Superseded { .. } => "superseded",
            PromotionOutcome::NoWaiting => "no_waiting",
            PromotionOutcome::NoOpenSeat => "no_open_seat",
            PromotionOutcome::Missed { .. } => "missed",
        }
    }

    /// Whether the freed seat now belongs to an entrant. A superseded
    /// offer left the seat open again, so it does not count.
    pub fn is_promoted(&self) -> bool {
        matches!(
            self,
            PromotionOutcome::Offered { .. } | PromotionOutcome::AutoAccepted { .. }
        )
    }

    pub fn entry(&self) -> Option<&WaitlistEntry> {
        match self {
            PromotionOutcome::Offered { entry, .. }
            | PromotionOutcome::AutoAccepted { entry, .. }
            | PromotionOutcome::Superseded { entry } => Some(entry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Accepted(WaitlistEntry),
    Declined(WaitlistEntry),
    /// The deadline had already passed; the offer was expired instead.
    Expired,
    NotClaimable(EntryStatus),
}

impl ClaimOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ClaimOutcome::Accepted(_) => "accepted",
            ClaimOutcome::Declined(_) => "declined",
            ClaimOutcome::Expired => "expired",
            ClaimOutcome::NotClaimable(_) => "not_claimable",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub promoted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeatRelease {
    pub released: bool,
    pub promotion: PromotionOutcome,
}

/// The only component that moves entries into or out of `offered`.
///
/// Holds no per-event state of its own: every decision is a conditional
/// update against the store, so any number of coordinators (handlers,
/// sweep ticks, other processes) can run against the same event.
pub struct PromotionCoordinator {
    store: Arc<dyn WaitlistStore>,
    notifier: Arc<dyn Notifier>,
    payments: Arc<dyn PaymentGateway>,
    clock: OfferClock,
    time: Arc<dyn TimeSource>,
    policy: PromotionPolicy,
    events: broadcast::Sender<WaitlistEvent>,
}

impl PromotionCoordinator {
    pub fn new(
        store: Arc<dyn WaitlistStore>,
        notifier: Arc<dyn Notifier>,
        payments: Arc<dyn PaymentGateway>,
        policy: PromotionPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            notifier,
            payments,
            clock: OfferClock::new(policy.offer_ttl),
            time: Arc::new(SystemTime),
            policy,
            events,
        }
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn store(&self) -> &Arc<dyn WaitlistStore> {
        &self.store
    }

    pub fn clock(&self) -> &OfferClock {
        &self.clock
    }

    pub fn policy(&self) -> &PromotionPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WaitlistEvent> {
        self.events.subscribe()
    }

    /// Add an entrant to an event's waitlist
    pub async fn join(
        &self,
        event_id: Uuid,
        contact: ContactChannel,
        saved_payment_method_ref: Option<String>,
    ) -> WaitlistResult<WaitlistEntry> {
        let entry = self
            .store
            .enqueue(event_id, contact, saved_payment_method_ref)
            .await?;
        info!(%event_id, entry_id = %entry.id, position = entry.position, contact = %entry.contact.masked(), "Joined waitlist");

        self.publish(WaitlistEvent::Joined {
            event_id,
            entry_id: entry.id,
            position: entry.position,
            timestamp: self.time.now().timestamp(),
        });
        Ok(entry)
    }

    /// A confirmed attendee dropped out: give the seat back and fill it.
    pub async fn release_seat(&self, event_id: Uuid) -> WaitlistResult<SeatRelease> {
        let released = self.store.release_seat(event_id).await?;
        if !released {
            debug!(%event_id, "Release requested with no confirmed seats");
        }
        let promotion = self.on_seat_freed(event_id).await?;
        Ok(SeatRelease { released, promotion })
    }

    /// Fill one open seat from the head of the waitlist.
    ///
    /// Lost races are retried against the next head up to
    /// `max_attempts`; exhausting them leaves the seat empty and is reported
    /// as `Missed` for operators.
    pub async fn on_seat_freed(&self, event_id: Uuid) -> WaitlistResult<PromotionOutcome> {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let seats = self
                .store
                .event_seats(event_id)
                .await?
                .ok_or(WaitlistError::EventNotFound(event_id))?;
            if seats.open_seats() == 0 {
                debug!(%event_id, "No open seat to fill");
                return Ok(PromotionOutcome::NoOpenSeat);
            }

            let Some(mut entry) = self.store.next_waiting(event_id).await? else {
                debug!(%event_id, "No waiting entries to promote");
                return Ok(PromotionOutcome::NoWaiting);
            };

            let now = self.time.now();
            let expires_at = self.clock.start_offer(now);
            let fields = TransitionFields::at(now)
                .with_offer_expiry(expires_at)
                .with_notified_at(now);

            if self
                .store
                .transition(entry.id, EntryStatus::Waiting, EntryStatus::Offered, fields.clone())
                .await?
            {
                entry.apply(EntryStatus::Offered, &fields);
                info!(%event_id, entry_id = %entry.id, position = entry.position, %expires_at, "Offer extended");
                return self.fulfil_offer(entry, expires_at, &seats).await;
            }

            debug!(%event_id, entry_id = %entry.id, attempt, "Lost promotion race");
        }

        error!(
            target: "missed_promotion",
            %event_id,
            attempts,
            "Seat left unfilled after exhausting promotion attempts"
        );
        self.publish(WaitlistEvent::PromotionMissed {
            event_id,
            attempts,
            timestamp: self.time.now().timestamp(),
        });
        Ok(PromotionOutcome::Missed { attempts })
    }

    /// Offer is live and committed. Either settle it with the saved card or
    /// tell the entrant about it.
    async fn fulfil_offer(
        &self,
        entry: WaitlistEntry,
        expires_at: DateTime<Utc>,
        seats: &EventSeats,
    ) -> WaitlistResult<PromotionOutcome> {
        let amount = seats.price_cents.filter(|cents| *cents > 0);
        let method = entry.saved_payment_method_ref.clone();

        if let (true, Some(method), Some(amount)) = (self.policy.auto_charge, method, amount) {
            match self.charge_with_timeout(&method, amount).await {
                Ok(charge_ref) => return self.settle_charged_offer(entry, expires_at, charge_ref).await,
                Err(err) => {
                    warn!(entry_id = %entry.id, error = %err, "Auto-charge failed, falling back to offer notice");
                }
            }
        }

        self.notify_offer(&entry, expires_at).await;
        self.publish(WaitlistEvent::OfferExtended {
            event_id: entry.event_id,
            entry_id: entry.id,
            position: entry.position,
            expires_at,
            timestamp: self.time.now().timestamp(),
        });
        Ok(PromotionOutcome::Offered { entry, expires_at })
    }

    async fn settle_charged_offer(
        &self,
        mut entry: WaitlistEntry,
        expires_at: DateTime<Utc>,
        charge_ref: ChargeRef,
    ) -> WaitlistResult<PromotionOutcome> {
        let fields = TransitionFields::at(self.time.now()).with_charge_ref(charge_ref.clone());

        match self
            .store
            .transition(entry.id, EntryStatus::Offered, EntryStatus::Accepted, fields.clone())
            .await
        {
            Ok(true) => {
                entry.apply(EntryStatus::Accepted, &fields);
                info!(event_id = %entry.event_id, entry_id = %entry.id, %charge_ref, "Seat confirmed by auto-charge");

                if let Err(err) = self
                    .notifier
                    .send_confirmation(&entry.contact, entry.event_id, &entry.claim_ref())
                    .await
                {
                    warn!(entry_id = %entry.id, error = %err, "Confirmation notice failed");
                }
                self.publish(WaitlistEvent::SeatConfirmed {
                    event_id: entry.event_id,
                    entry_id: entry.id,
                    auto_charged: true,
                    timestamp: self.time.now().timestamp(),
                });
                Ok(PromotionOutcome::AutoAccepted { entry, charge_ref })
            }
            Ok(false) => {
                warn!(entry_id = %entry.id, %charge_ref, %expires_at, "Offer withdrawn during auto-charge, refunding");
                self.refund_orphaned_charge(&entry, &charge_ref).await;
                Ok(PromotionOutcome::Superseded { entry })
            }
            Err(err) => {
                // The write may or may not have landed, so the charge is left
                // in place for manual reconciliation.
                error!(entry_id = %entry.id, %charge_ref, error = %err, "Could not record auto-charged seat");
                Err(err)
            }
        }
    }

    async fn charge_with_timeout(&self, method: &str, amount_cents: i64) -> Result<ChargeRef, PaymentError> {
        match tokio::time::timeout(self.policy.charge_timeout, self.payments.charge(method, amount_cents)).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout),
        }
    }

    async fn refund_orphaned_charge(&self, entry: &WaitlistEntry, charge_ref: &ChargeRef) {
        if let Err(err) = self.payments.refund(charge_ref).await {
            error!(entry_id = %entry.id, %charge_ref, error = %err, "Refund of orphaned auto-charge failed");
        }
    }

    async fn notify_offer(&self, entry: &WaitlistEntry, expires_at: DateTime<Utc>) {
        if let Err(err) = self
            .notifier
            .send_offer(&entry.contact, entry.event_id, &entry.claim_ref(), expires_at)
            .await
        {
            warn!(
                entry_id = %entry.id,
                contact = %entry.contact.masked(),
                error = %err,
                "Offer notice failed; offer remains live"
            );
        }
    }

    /// Expire a lapsed offer and hand its seat to the next entrant
    pub async fn on_offer_expired(&self, entry: &WaitlistEntry) -> WaitlistResult<Option<PromotionOutcome>> {
        self.expire_offer(entry, self.time.now()).await
    }

    async fn expire_offer(
        &self,
        entry: &WaitlistEntry,
        now: DateTime<Utc>,
    ) -> WaitlistResult<Option<PromotionOutcome>> {
        // Re-read so a stale sweep snapshot cannot expire a fresher offer.
        let Some(current) = self.store.get(entry.id).await? else {
            return Err(WaitlistError::EntryNotFound(entry.id));
        };
        if !self.clock.is_expired(&current, now) {
            debug!(entry_id = %entry.id, status = %current.status, "Offer no longer lapsed");
            return Ok(None);
        }

        if !self
            .store
            .transition(entry.id, EntryStatus::Offered, EntryStatus::Expired, TransitionFields::at(now))
            .await?
        {
            debug!(entry_id = %entry.id, "Offer already resolved by another actor");
            return Ok(None);
        }

        let requeued = if self.policy.requeue_expired {
            self.store.requeue(entry.id).await?.is_some()
        } else {
            false
        };
        info!(event_id = %entry.event_id, entry_id = %entry.id, requeued, "Offer expired");
        self.publish(WaitlistEvent::OfferLapsed {
            event_id: entry.event_id,
            entry_id: entry.id,
            requeued,
            timestamp: now.timestamp(),
        });

        let outcome = self.on_seat_freed(entry.event_id).await?;
        Ok(Some(outcome))
    }

    /// Expire every offer whose deadline has passed. Overlapping sweeps are
    /// harmless: each expiry is a conditional update.
    pub async fn sweep(&self, now: DateTime<Utc>) -> WaitlistResult<SweepReport> {
        let lapsed = self.store.find_expired_offers(now).await?;
        let mut report = SweepReport::default();

        for entry in &lapsed {
            match self.expire_offer(entry, now).await {
                Ok(Some(outcome)) => {
                    report.expired += 1;
                    if outcome.is_promoted() {
                        report.promoted += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    report.failed += 1;
                    error!(entry_id = %entry.id, error = %err, "Failed to expire offer");
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(expired = report.expired, promoted = report.promoted, failed = report.failed, "Offer sweep finished");
        }
        Ok(report)
    }

    pub async fn on_user_accepts(&self, entry_id: Uuid) -> WaitlistResult<ClaimOutcome> {
        let mut entry = self.claimable(entry_id).await?;
        if entry.status != EntryStatus::Offered {
            return Ok(ClaimOutcome::NotClaimable(entry.status));
        }

        let now = self.time.now();
        if self.clock.is_expired(&entry, now) {
            self.expire_offer(&entry, now).await?;
            return Ok(ClaimOutcome::Expired);
        }

        let fields = TransitionFields::at(now);
        if !self
            .store
            .transition(entry_id, EntryStatus::Offered, EntryStatus::Accepted, fields.clone())
            .await?
        {
            return self.lost_claim(entry_id).await;
        }

        entry.apply(EntryStatus::Accepted, &fields);
        info!(event_id = %entry.event_id, %entry_id, "Offer accepted");
        self.publish(WaitlistEvent::SeatConfirmed {
            event_id: entry.event_id,
            entry_id,
            auto_charged: false,
            timestamp: now.timestamp(),
        });
        Ok(ClaimOutcome::Accepted(entry))
    }

    pub async fn on_user_declines(&self, entry_id: Uuid) -> WaitlistResult<ClaimOutcome> {
        let mut entry = self.claimable(entry_id).await?;
        if entry.status != EntryStatus::Offered {
            return Ok(ClaimOutcome::NotClaimable(entry.status));
        }

        let fields = TransitionFields::at(self.time.now());
        if !self
            .store
            .transition(entry_id, EntryStatus::Offered, EntryStatus::Declined, fields.clone())
            .await?
        {
            return self.lost_claim(entry_id).await;
        }

        entry.apply(EntryStatus::Declined, &fields);
        info!(event_id = %entry.event_id, %entry_id, "Offer declined");
        self.publish(WaitlistEvent::OfferDeclined {
            event_id: entry.event_id,
            entry_id,
            timestamp: fields.at.timestamp(),
        });

        self.on_seat_freed(entry.event_id).await?;
        Ok(ClaimOutcome::Declined(entry))
    }

    /// Withdraw from the waitlist. Cancelling a live offer frees its seat.
    pub async fn cancel_entry(&self, entry_id: Uuid) -> WaitlistResult<bool> {
        let entry = self.claimable(entry_id).await?;
        let now = self.time.now();

        let held_offer = if self
            .store
            .transition(entry_id, EntryStatus::Waiting, EntryStatus::Cancelled, TransitionFields::at(now))
            .await?
        {
            false
        } else if self
            .store
            .transition(entry_id, EntryStatus::Offered, EntryStatus::Cancelled, TransitionFields::at(now))
            .await?
        {
            true
        } else {
            debug!(%entry_id, "Cancel ignored for resolved entry");
            return Ok(false);
        };

        info!(event_id = %entry.event_id, %entry_id, held_offer, "Waitlist entry cancelled");
        self.publish(WaitlistEvent::EntryCancelled {
            event_id: entry.event_id,
            entry_id,
            timestamp: now.timestamp(),
        });

        if held_offer {
            self.on_seat_freed(entry.event_id).await?;
        }
        Ok(true)
    }

    async fn claimable(&self, entry_id: Uuid) -> WaitlistResult<WaitlistEntry> {
        self.store
            .get(entry_id)
            .await?
            .ok_or(WaitlistError::EntryNotFound(entry_id))
    }

    async fn lost_claim(&self, entry_id: Uuid) -> WaitlistResult<ClaimOutcome> {
        let current = self.claimable(entry_id).await?;
        debug!(%entry_id, status = %current.status, "Claim lost to a concurrent transition");
        Ok(ClaimOutcome::NotClaimable(current.status))
    }

    fn publish(&self, event: WaitlistEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
