use chrono::{DateTime, Utc};
use clubhouse_core::ChargeRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Who a payment is for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PaymentSubject {
    /// Membership dues
    Member(Uuid),
    /// Lodging or tee-time reservation
    Reservation(Uuid),
}

impl PaymentSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentSubject::Member(_) => "member",
            PaymentSubject::Reservation(_) => "reservation",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            PaymentSubject::Member(id) | PaymentSubject::Reservation(id) => *id,
        }
    }
}

impl fmt::Display for PaymentSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

impl FromStr for PaymentSubject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed payment subject '{}'", s))?;
        let id = Uuid::parse_str(id).map_err(|e| e.to_string())?;
        match kind {
            "member" => Ok(PaymentSubject::Member(id)),
            "reservation" => Ok(PaymentSubject::Reservation(id)),
            other => Err(format!("unknown payment subject kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    /// Client confirms with a secret (mobile payment sheet)
    #[default]
    Intent,
    /// Redirect to a hosted checkout page (web)
    Hosted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordStatus {
    Pending,
    /// Claimed by a refund that is in flight at the processor
    Refunding,
    Refunded,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "pending",
            PaymentRecordStatus::Refunding => "refunding",
            PaymentRecordStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentRecordStatus::Pending),
            "refunding" => Ok(PaymentRecordStatus::Refunding),
            "refunded" => Ok(PaymentRecordStatus::Refunded),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Local record of a payment started through checkout. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub subject: PaymentSubject,
    pub mode: CheckoutMode,
    /// Processor id of the intent or hosted session
    pub external_id: String,
    /// Refundable processor reference; hosted sessions only learn theirs
    /// after completion.
    pub charge_ref: Option<ChargeRef>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn new(
        subject: PaymentSubject,
        mode: CheckoutMode,
        external_id: String,
        charge_ref: Option<ChargeRef>,
        amount_cents: i64,
        currency: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            mode,
            external_id,
            charge_ref,
            amount_cents,
            currency,
            status: PaymentRecordStatus::Pending,
            created_at: Utc::now(),
            refunded_at: None,
        }
    }

    pub fn is_refundable(&self) -> bool {
        self.status == PaymentRecordStatus::Pending && self.charge_ref.is_some()
    }
}

/// Validated checkout request
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub subject: PaymentSubject,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub mode: CheckoutMode,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CheckoutResult {
    Intent {
        client_secret: String,
        payment_intent_id: String,
    },
    Hosted {
        url: String,
        session_id: String,
    },
}
