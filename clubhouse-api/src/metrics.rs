use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use clubhouse_shared::WaitlistEvent;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use tokio::sync::broadcast;

struct Metrics {
    registry: Registry,
    promotion_requests_total: IntCounterVec,
    waitlist_events_total: IntCounterVec,
    missed_promotions_total: IntCounter,
    notifications_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let promotion_requests_total = IntCounterVec::new(
            Opts::new("waitlist_promotion_requests_total", "Seat-freed triggers by outcome"),
            &["trigger", "outcome"],
        )
        .expect("waitlist_promotion_requests_total metric");

        let waitlist_events_total = IntCounterVec::new(
            Opts::new("waitlist_events_total", "Waitlist lifecycle events by kind"),
            &["kind"],
        )
        .expect("waitlist_events_total metric");

        let missed_promotions_total = IntCounter::with_opts(Opts::new(
            "waitlist_missed_promotions_total",
            "Seats left unfilled after retries",
        ))
        .expect("waitlist_missed_promotions_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("push_notifications_total", "Push notification requests by result"),
            &["push_type", "result"],
        )
        .expect("push_notifications_total metric");

        registry
            .register(Box::new(promotion_requests_total.clone()))
            .expect("register waitlist_promotion_requests_total");
        registry
            .register(Box::new(waitlist_events_total.clone()))
            .expect("register waitlist_events_total");
        registry
            .register(Box::new(missed_promotions_total.clone()))
            .expect("register waitlist_missed_promotions_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register push_notifications_total");

        Metrics {
            registry,
            promotion_requests_total,
            waitlist_events_total,
            missed_promotions_total,
            notifications_total,
        }
    })
}

pub fn record_promotion(trigger: &'static str, outcome: &'static str) {
    metrics()
        .promotion_requests_total
        .with_label_values(&[trigger, outcome])
        .inc();
}

pub fn record_notification(push_type: &str, result: &'static str) {
    metrics()
        .notifications_total
        .with_label_values(&[push_type, result])
        .inc();
}

pub fn record_event(event: &WaitlistEvent) {
    let m = metrics();
    m.waitlist_events_total.with_label_values(&[event.kind()]).inc();
    if matches!(event, WaitlistEvent::PromotionMissed { .. }) {
        m.missed_promotions_total.inc();
    }
}

/// Count every lifecycle event the coordinator publishes, including the
/// cascades that never surface in a handler's response.
pub async fn run_event_recorder(mut rx: broadcast::Receiver<WaitlistEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => record_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Metrics recorder lagged behind waitlist events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub fn metrics_response() -> impl IntoResponse {
    let metric_families = metrics().registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            "failed to encode metrics".to_string(),
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    (
        StatusCode::OK,
        headers,
        String::from_utf8_lossy(&buffer).to_string(),
    )
}
