pub mod pii;
pub mod models;

pub use models::events::WaitlistEvent;
pub use pii::Masked;
