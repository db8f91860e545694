use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clubhouse_core::{ChargeRef, ContactChannel};
use clubhouse_waitlist::store::ensure_edge;
use clubhouse_waitlist::{
    EntryStatus, EventSeats, TransitionFields, WaitlistEntry, WaitlistError, WaitlistResult, WaitlistStore,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, event_id, position, status, contact_channel, contact_target, \
     saved_payment_method_ref, offer_expires_at, charge_ref, notified_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    event_id: Uuid,
    position: i64,
    status: String,
    contact_channel: String,
    contact_target: String,
    saved_payment_method_ref: Option<String>,
    offer_expires_at: Option<DateTime<Utc>>,
    charge_ref: Option<String>,
    notified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for WaitlistEntry {
    type Error = WaitlistError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<EntryStatus>().map_err(WaitlistError::Storage)?;
        let contact = match row.contact_channel.as_str() {
            "email" => ContactChannel::Email(row.contact_target),
            "push" => ContactChannel::Push(row.contact_target),
            other => return Err(WaitlistError::Storage(format!("unknown contact channel '{}'", other))),
        };

        Ok(WaitlistEntry {
            id: row.id,
            event_id: row.event_id,
            position: row.position,
            status,
            contact,
            saved_payment_method_ref: row.saved_payment_method_ref,
            offer_expires_at: row.offer_expires_at,
            charge_ref: row.charge_ref.map(ChargeRef),
            notified_at: row.notified_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SeatsRow {
    id: Uuid,
    capacity: i64,
    confirmed_count: i64,
    offered_count: i64,
    price_cents: Option<i64>,
}

fn storage(e: sqlx::Error) -> WaitlistError {
    WaitlistError::Storage(e.to_string())
}

/// Postgres-backed waitlist.
///
/// Status changes are `UPDATE ... WHERE status = $from`. Changes that touch
/// seat accounting (offer, accept, enqueue, requeue) first lock the event
/// row, so the open-seat check and the status change commit together.
pub struct PgWaitlistStore {
    pool: PgPool,
}

impl PgWaitlistStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_event(tx: &mut Transaction<'_, Postgres>, event_id: Uuid) -> WaitlistResult<(i64, i64)> {
        sqlx::query_as::<_, (i64, i64)>("SELECT capacity, confirmed_count FROM events WHERE id = $1 FOR UPDATE")
            .bind(event_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage)?
            .ok_or(WaitlistError::EventNotFound(event_id))
    }

    async fn tail_position(tx: &mut Transaction<'_, Postgres>, event_id: Uuid) -> WaitlistResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM waitlist_entries WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)
    }
}

#[async_trait]
impl WaitlistStore for PgWaitlistStore {
    async fn enqueue(
        &self,
        event_id: Uuid,
        contact: ContactChannel,
        saved_payment_method_ref: Option<String>,
    ) -> WaitlistResult<WaitlistEntry> {
        contact
            .validate()
            .map_err(|e| WaitlistError::Validation(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        Self::lock_event(&mut tx, event_id).await?;
        let position = Self::tail_position(&mut tx, event_id).await?;

        let entry = WaitlistEntry::new(event_id, position, contact, saved_payment_method_ref, Utc::now());
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "INSERT INTO waitlist_entries \
             (id, event_id, position, status, contact_channel, contact_target, saved_payment_method_ref, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(entry.id)
        .bind(entry.event_id)
        .bind(entry.position)
        .bind(entry.status.as_str())
        .bind(entry.contact.channel())
        .bind(entry.contact.target())
        .bind(entry.saved_payment_method_ref.as_deref())
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        row.try_into()
    }

    async fn get(&self, entry_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM waitlist_entries WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(WaitlistEntry::try_from).transpose()
    }

    async fn list_for_event(&self, event_id: Uuid) -> WaitlistResult<Vec<WaitlistEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM waitlist_entries WHERE event_id = $1 ORDER BY position",
            ENTRY_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(WaitlistEntry::try_from).collect()
    }

    async fn next_waiting(&self, event_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM waitlist_entries WHERE event_id = $1 AND status = 'waiting' \
             ORDER BY position LIMIT 1",
            ENTRY_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(WaitlistEntry::try_from).transpose()
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        from: EntryStatus,
        to: EntryStatus,
        fields: TransitionFields,
    ) -> WaitlistResult<bool> {
        ensure_edge(from, to)?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let event_id = sqlx::query_scalar::<_, Uuid>("SELECT event_id FROM waitlist_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(WaitlistError::EntryNotFound(entry_id))?;

        let touches_seats = matches!(to, EntryStatus::Offered | EntryStatus::Accepted);
        if touches_seats {
            let (capacity, confirmed_count) = Self::lock_event(&mut tx, event_id).await?;
            if to == EntryStatus::Offered {
                let offered_count = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM waitlist_entries WHERE event_id = $1 AND status = 'offered'",
                )
                .bind(event_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage)?;

                if capacity - confirmed_count - offered_count <= 0 {
                    debug!(%entry_id, %event_id, "No open seat for offer");
                    tx.rollback().await.map_err(storage)?;
                    return Ok(false);
                }
            }
        }

        let offer_expires_at = if to == EntryStatus::Offered {
            fields.offer_expires_at
        } else {
            None
        };
        let updated = sqlx::query(
            "UPDATE waitlist_entries SET status = $3, offer_expires_at = $4, \
             notified_at = COALESCE($5, notified_at), charge_ref = COALESCE($6, charge_ref), updated_at = $7 \
             WHERE id = $1 AND status = $2",
        )
        .bind(entry_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(offer_expires_at)
        .bind(fields.notified_at)
        .bind(fields.charge_ref.as_ref().map(|c| c.0.as_str()))
        .bind(fields.at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await.map_err(storage)?;
            return Ok(false);
        }

        if to == EntryStatus::Accepted {
            sqlx::query("UPDATE events SET confirmed_count = confirmed_count + 1 WHERE id = $1")
                .bind(event_id)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(true)
    }

    async fn cancel(&self, entry_id: Uuid) -> WaitlistResult<bool> {
        let updated = sqlx::query(
            "UPDATE waitlist_entries SET status = 'cancelled', offer_expires_at = NULL, updated_at = $2 \
             WHERE id = $1 AND status IN ('waiting', 'offered')",
        )
        .bind(entry_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .rows_affected();

        if updated > 0 {
            return Ok(true);
        }
        match self.get(entry_id).await? {
            Some(_) => Ok(false),
            None => Err(WaitlistError::EntryNotFound(entry_id)),
        }
    }

    async fn find_expired_offers(&self, now: DateTime<Utc>) -> WaitlistResult<Vec<WaitlistEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM waitlist_entries WHERE status = 'offered' AND offer_expires_at <= $1 \
             ORDER BY offer_expires_at, position",
            ENTRY_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(WaitlistEntry::try_from).collect()
    }

    async fn event_seats(&self, event_id: Uuid) -> WaitlistResult<Option<EventSeats>> {
        let row = sqlx::query_as::<_, SeatsRow>(
            "SELECT e.id, e.capacity, e.confirmed_count, e.price_cents, \
             (SELECT COUNT(*) FROM waitlist_entries w WHERE w.event_id = e.id AND w.status = 'offered') AS offered_count \
             FROM events e WHERE e.id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.map(|r| EventSeats {
            event_id: r.id,
            capacity: r.capacity,
            confirmed_count: r.confirmed_count,
            offered_count: r.offered_count,
            price_cents: r.price_cents,
        }))
    }

    async fn release_seat(&self, event_id: Uuid) -> WaitlistResult<bool> {
        let updated = sqlx::query(
            "UPDATE events SET confirmed_count = confirmed_count - 1 WHERE id = $1 AND confirmed_count > 0",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .rows_affected();

        if updated > 0 {
            return Ok(true);
        }
        match self.event_seats(event_id).await? {
            Some(_) => Ok(false),
            None => Err(WaitlistError::EventNotFound(event_id)),
        }
    }

    async fn requeue(&self, entry_id: Uuid) -> WaitlistResult<Option<WaitlistEntry>> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let event_id = sqlx::query_scalar::<_, Uuid>("SELECT event_id FROM waitlist_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(WaitlistError::EntryNotFound(entry_id))?;

        Self::lock_event(&mut tx, event_id).await?;
        let position = Self::tail_position(&mut tx, event_id).await?;

        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "UPDATE waitlist_entries SET status = 'waiting', position = $2, offer_expires_at = NULL, updated_at = $3 \
             WHERE id = $1 AND status = 'expired' RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .bind(position)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        row.map(WaitlistEntry::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, channel: &str) -> EntryRow {
        let now = Utc::now();
        EntryRow {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            position: 4,
            status: status.to_string(),
            contact_channel: channel.to_string(),
            contact_target: "ExponentPushToken[xyz]".to_string(),
            saved_payment_method_ref: None,
            offer_expires_at: Some(now),
            charge_ref: Some("pi_123".to_string()),
            notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_maps_to_entry() {
        let entry = WaitlistEntry::try_from(row("offered", "push")).unwrap();
        assert_eq!(entry.status, EntryStatus::Offered);
        assert_eq!(entry.contact, ContactChannel::Push("ExponentPushToken[xyz]".to_string()));
        assert_eq!(entry.charge_ref, Some(ChargeRef::from("pi_123")));
    }

    #[test]
    fn test_corrupt_rows_are_storage_errors() {
        assert!(matches!(
            WaitlistEntry::try_from(row("held", "push")),
            Err(WaitlistError::Storage(_))
        ));
        assert!(matches!(
            WaitlistEntry::try_from(row("waiting", "sms")),
            Err(WaitlistError::Storage(_))
        ));
    }
}
