use std::sync::Arc;
use std::time::Duration;
use clubhouse_waitlist::PromotionCoordinator;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Periodically expire lapsed offers and cascade their seats.
pub async fn start_offer_sweeper(coordinator: Arc<PromotionCoordinator>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Offer sweeper started, running every {:?}", every);

    loop {
        ticker.tick().await;
        match coordinator.sweep(coordinator.now()).await {
            Ok(report) if report.expired > 0 => {
                info!(expired = report.expired, promoted = report.promoted, "Sweep tick processed lapsed offers");
            }
            Ok(_) => {}
            Err(e) => error!("Offer sweep failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use clubhouse_billing::MockPaymentGateway;
    use clubhouse_core::{ContactChannel, Notifier, NotifyError};
    use clubhouse_waitlist::{
        EntryStatus, InMemoryWaitlistStore, ManualTime, PromotionPolicy, TimeSource, TransitionFields, WaitlistStore,
    };
    use uuid::Uuid;

    struct SilentNotifier;

    #[async_trait]
    impl Notifier for SilentNotifier {
        async fn send_offer(
            &self,
            _: &ContactChannel,
            _: Uuid,
            _: &str,
            _: chrono::DateTime<Utc>,
        ) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn send_confirmation(&self, _: &ContactChannel, _: Uuid, _: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweeper_expires_lapsed_offers() {
        let time = Arc::new(ManualTime::new(Utc::now()));
        let store = Arc::new(InMemoryWaitlistStore::with_time(time.clone()));
        let event_id = Uuid::new_v4();
        store.add_event(event_id, 1, 0, None);

        let entry = store
            .enqueue(event_id, ContactChannel::Push("ExponentPushToken[a]".to_string()), None)
            .await
            .unwrap();
        let now = time.now();
        store
            .transition(
                entry.id,
                EntryStatus::Waiting,
                EntryStatus::Offered,
                TransitionFields::at(now).with_offer_expiry(now + ChronoDuration::minutes(1)),
            )
            .await
            .unwrap();
        time.advance(ChronoDuration::minutes(2));

        let coordinator = Arc::new(
            PromotionCoordinator::new(
                store.clone(),
                Arc::new(SilentNotifier),
                Arc::new(MockPaymentGateway::new()),
                PromotionPolicy::default(),
            )
            .with_time_source(time.clone()),
        );

        let handle = tokio::spawn(start_offer_sweeper(coordinator, Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let entry = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Expired);
    }
}
