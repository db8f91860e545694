pub mod app_config;
pub mod database;
pub mod waitlist_repo;
pub mod payment_repo;
pub mod profile_repo;
pub mod stripe;
pub mod push;

pub use app_config::Config;
pub use database::DbClient;
pub use payment_repo::PgPaymentLedger;
pub use profile_repo::PgRecipientDirectory;
pub use push::{ChannelNotifier, ExpoPushClient};
pub use stripe::StripeGateway;
pub use waitlist_repo::PgWaitlistStore;
