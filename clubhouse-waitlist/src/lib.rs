pub mod models;
pub mod clock;
pub mod store;
pub mod memory;
pub mod coordinator;

pub use models::{EntryStatus, EventSeats, TransitionFields, WaitlistEntry};
pub use clock::{ManualTime, OfferClock, SystemTime, TimeSource};
pub use store::{WaitlistError, WaitlistResult, WaitlistStore};
pub use memory::InMemoryWaitlistStore;
pub use coordinator::{
    ClaimOutcome, PromotionCoordinator, PromotionOutcome, PromotionPolicy, SeatRelease, SweepReport,
};
