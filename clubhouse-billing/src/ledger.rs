use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::models::{PaymentRecord, PaymentRecordStatus, PaymentSubject};

pub type LedgerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Repository trait for payment records
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn record(&self, record: &PaymentRecord) -> LedgerResult<()>;

    /// Most recent refundable payment made for a member
    async fn latest_refundable_for_member(&self, member_id: Uuid) -> LedgerResult<Option<PaymentRecord>>;

    /// Conditional `pending -> refunding`. Only the caller that wins the
    /// claim may ask the processor for the refund.
    async fn claim_refund(&self, record_id: Uuid) -> LedgerResult<bool>;

    /// Conditional `refunding -> refunded`
    async fn complete_refund(&self, record_id: Uuid, at: DateTime<Utc>) -> LedgerResult<bool>;

    /// Conditional `refunding -> pending`, after the processor refused
    async fn release_refund(&self, record_id: Uuid) -> LedgerResult<bool>;
}

#[derive(Default)]
pub struct InMemoryPaymentLedger {
    records: Mutex<Vec<PaymentRecord>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<PaymentRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn swap_status(
        &self,
        record_id: Uuid,
        from: PaymentRecordStatus,
        to: PaymentRecordStatus,
        refunded_at: Option<DateTime<Utc>>,
    ) -> bool {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|r| r.id == record_id && r.status == from) {
            Some(record) => {
                record.status = to;
                record.refunded_at = refunded_at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn record(&self, record: &PaymentRecord) -> LedgerResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn latest_refundable_for_member(&self, member_id: Uuid) -> LedgerResult<Option<PaymentRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.subject == PaymentSubject::Member(member_id) && r.is_refundable())
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn claim_refund(&self, record_id: Uuid) -> LedgerResult<bool> {
        Ok(self.swap_status(record_id, PaymentRecordStatus::Pending, PaymentRecordStatus::Refunding, None))
    }

    async fn complete_refund(&self, record_id: Uuid, at: DateTime<Utc>) -> LedgerResult<bool> {
        Ok(self.swap_status(record_id, PaymentRecordStatus::Refunding, PaymentRecordStatus::Refunded, Some(at)))
    }

    async fn release_refund(&self, record_id: Uuid) -> LedgerResult<bool> {
        Ok(self.swap_status(record_id, PaymentRecordStatus::Refunding, PaymentRecordStatus::Pending, None))
    }
}
