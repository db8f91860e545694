pub mod payment;
pub mod notify;
pub mod recipients;

pub use notify::{ContactChannel, Notifier, NotifyError, PushMessage, PushReceipt, PushSender};
pub use payment::{ChargeRef, PaymentError, PaymentGateway};
pub use recipients::{InMemoryRecipientDirectory, Recipient, RecipientDirectory};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
