use std::sync::Arc;
use std::time::Duration;
use clubhouse_billing::CheckoutOrchestrator;
use clubhouse_core::{PushSender, RecipientDirectory};
use clubhouse_waitlist::PromotionCoordinator;

use crate::middleware::resiliency::CircuitBreaker;

pub struct ResiliencyState {
    pub payment_cb: CircuitBreaker,
    pub push_cb: CircuitBreaker,
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self {
            payment_cb: CircuitBreaker::new("payments", 5, Duration::from_secs(30)),
            push_cb: CircuitBreaker::new("push", 5, Duration::from_secs(30)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<PromotionCoordinator>,
    pub billing: Arc<CheckoutOrchestrator>,
    pub push: Arc<dyn PushSender>,
    pub recipients: Arc<dyn RecipientDirectory>,
    pub resiliency: Arc<ResiliencyState>,
}
