pub mod models;
pub mod ledger;
pub mod orchestrator;

pub use models::{CheckoutMode, CheckoutResult, CreatePayment, PaymentRecord, PaymentRecordStatus, PaymentSubject};
pub use ledger::{InMemoryPaymentLedger, LedgerResult, PaymentLedger};
pub use orchestrator::{BillingError, CheckoutOrchestrator, MockPaymentGateway};
