use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clubhouse_billing::{CheckoutMode, LedgerResult, PaymentLedger, PaymentRecord, PaymentRecordStatus, PaymentSubject};
use clubhouse_core::ChargeRef;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgPaymentLedger {
    pool: PgPool,
}

impl PgPaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    subject_kind: String,
    subject_id: Uuid,
    mode: String,
    external_id: String,
    charge_ref: Option<String>,
    amount_cents: i64,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    refunded_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = String;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let subject = format!("{}:{}", row.subject_kind, row.subject_id).parse::<PaymentSubject>()?;
        let mode = match row.mode.as_str() {
            "intent" => CheckoutMode::Intent,
            "hosted" => CheckoutMode::Hosted,
            other => return Err(format!("unknown checkout mode '{}'", other)),
        };

        Ok(PaymentRecord {
            id: row.id,
            subject,
            mode,
            external_id: row.external_id,
            charge_ref: row.charge_ref.map(ChargeRef),
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: row.status.parse::<PaymentRecordStatus>()?,
            created_at: row.created_at,
            refunded_at: row.refunded_at,
        })
    }
}

#[async_trait]
impl PaymentLedger for PgPaymentLedger {
    async fn record(&self, record: &PaymentRecord) -> LedgerResult<()> {
        let mode = match record.mode {
            CheckoutMode::Intent => "intent",
            CheckoutMode::Hosted => "hosted",
        };

        sqlx::query(
            "INSERT INTO payments \
             (id, subject_kind, subject_id, mode, external_id, charge_ref, amount_cents, currency, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id)
        .bind(record.subject.kind())
        .bind(record.subject.id())
        .bind(mode)
        .bind(&record.external_id)
        .bind(record.charge_ref.as_ref().map(|c| c.0.as_str()))
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_refundable_for_member(&self, member_id: Uuid) -> LedgerResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, subject_kind, subject_id, mode, external_id, charge_ref, amount_cents, currency, status, \
             created_at, refunded_at FROM payments \
             WHERE subject_kind = 'member' AND subject_id = $1 AND status = 'pending' AND charge_ref IS NOT NULL \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PaymentRecord::try_from).transpose()?)
    }

    async fn claim_refund(&self, record_id: Uuid) -> LedgerResult<bool> {
        let result = sqlx::query("UPDATE payments SET status = 'refunding' WHERE id = $1 AND status = 'pending'")
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_refund(&self, record_id: Uuid, at: DateTime<Utc>) -> LedgerResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'refunded', refunded_at = $2 WHERE id = $1 AND status = 'refunding'",
        )
        .bind(record_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_refund(&self, record_id: Uuid) -> LedgerResult<bool> {
        let result = sqlx::query("UPDATE payments SET status = 'pending' WHERE id = $1 AND status = 'refunding'")
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
