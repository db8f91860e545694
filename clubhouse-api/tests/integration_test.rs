use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use clubhouse_api::{app, AppState, ResiliencyState};
use clubhouse_billing::{CheckoutOrchestrator, InMemoryPaymentLedger, MockPaymentGateway};
use clubhouse_core::{
    ContactChannel, InMemoryRecipientDirectory, Notifier, NotifyError, PushMessage, PushReceipt, PushSender,
    Recipient,
};
use clubhouse_waitlist::{InMemoryWaitlistStore, PromotionCoordinator, PromotionPolicy};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;
use tower::ServiceExt;
use uuid::Uuid;

#[derive(Default)]
struct RecordingNotifier {
    offers: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_offer(
        &self,
        contact: &ContactChannel,
        _event_id: Uuid,
        _claim_ref: &str,
        _expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.offers.lock().unwrap().push(contact.target().to_string());
        Ok(())
    }

    async fn send_confirmation(&self, _: &ContactChannel, _: Uuid, _: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<PushMessage>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send_push(&self, message: &PushMessage) -> Result<PushReceipt, NotifyError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(PushReceipt {
            ticket_id: Some("ticket-123".to_string()),
        })
    }
}

struct TestApp {
    router: Router,
    store: Arc<InMemoryWaitlistStore>,
    notifier: Arc<RecordingNotifier>,
    push: Arc<RecordingPush>,
    recipients: Arc<InMemoryRecipientDirectory>,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(InMemoryWaitlistStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let push = Arc::new(RecordingPush::default());
        let recipients = Arc::new(InMemoryRecipientDirectory::new());
        let gateway = Arc::new(MockPaymentGateway::new());

        let coordinator = Arc::new(PromotionCoordinator::new(
            store.clone(),
            notifier.clone(),
            gateway.clone(),
            PromotionPolicy::default(),
        ));
        let billing = Arc::new(CheckoutOrchestrator::new(
            gateway,
            Arc::new(InMemoryPaymentLedger::new()),
            "usd",
        ));

        let router = app(AppState {
            coordinator,
            billing,
            push: push.clone(),
            recipients: recipients.clone(),
            resiliency: Arc::new(ResiliencyState::default()),
        });

        Self {
            router,
            store,
            notifier,
            push,
            recipients,
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn join(&self, event_id: Uuid, email: &str) -> Uuid {
        let (status, body) = self
            .send(
                Method::POST,
                "/waitlist/join",
                Some(json!({
                    "event_id": event_id,
                    "contact": {"channel": "email", "target": email},
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
    }
}

#[tokio::test]
async fn test_release_seat_promotes_head_of_waitlist() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 2, 2, None);

    let first = test.join(event_id, "first@clubhouse.golf").await;
    let second = test.join(event_id, "second@clubhouse.golf").await;

    let (status, body) = test
        .send(Method::POST, &format!("/events/{}/release-seat", event_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], true);
    assert_eq!(body["promotion"]["promoted"], true);
    assert_eq!(body["promotion"]["waitlist_entry_id"], first.to_string());
    assert!(body["promotion"]["offer_expires_at"].is_string());

    let (_, entry) = test.send(Method::GET, &format!("/waitlist/{}", second), None).await;
    assert_eq!(entry["status"], "waiting");
    assert_eq!(*test.notifier.offers.lock().unwrap(), vec!["first@clubhouse.golf".to_string()]);
}

#[tokio::test]
async fn test_waitlist_stream_reports_offer_after_release() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 2, 2, None);
    let first = test.join(event_id, "first@clubhouse.golf").await;

    let response = test
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/events/{}/waitlist/stream", event_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");

    let (status, _) = test
        .send(Method::POST, &format!("/events/{}/release-seat", event_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let mut frames = response.into_body().into_data_stream();
    let mut text = String::new();
    while !text.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .expect("stream frame within timeout")
            .expect("stream still open")
            .unwrap();
        text.push_str(std::str::from_utf8(&chunk).unwrap());
    }

    let frame = text.split("\n\n").next().unwrap();
    assert!(frame.starts_with("event: offer_extended"), "{}", frame);
    assert!(frame.contains(&first.to_string()), "{}", frame);
}

#[tokio::test]
async fn test_promote_without_waiting_entries() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 4, 3, None);

    let (status, body) = test
        .send(Method::POST, "/promote-waitlist", Some(json!({"event_id": event_id})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["promoted"], false);
    assert_eq!(body["message"], "No waiting entries to promote");
}

#[tokio::test]
async fn test_promote_when_event_is_full() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 1, 1, None);
    test.join(event_id, "member@clubhouse.golf").await;

    let (status, body) = test
        .send(Method::POST, "/promote-waitlist", Some(json!({"event_id": event_id})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["promoted"], false);
    assert_eq!(body["message"], "No open seats to fill");
}

#[tokio::test]
async fn test_promote_validation_and_not_found() {
    let test = TestApp::new();

    let (status, body) = test.send(Method::POST, "/promote-waitlist", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = test
        .send(Method::POST, "/promote-waitlist", Some(json!({"event_id": Uuid::new_v4()})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Event not found"));
}

#[tokio::test]
async fn test_unsupported_method_and_preflight() {
    let test = TestApp::new();

    let (status, _) = test.send(Method::GET, "/promote-waitlist", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = test.send(Method::OPTIONS, "/create-payment", None).await;
    assert_eq!(status, StatusCode::OK);

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/send-notification")
        .header(header::ORIGIN, "https://app.clubhouse.golf")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = test.router.clone().oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_join_rejects_bad_contact() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 1, 1, None);

    let (status, body) = test
        .send(
            Method::POST,
            "/waitlist/join",
            Some(json!({"event_id": event_id, "contact": {"channel": "sms", "target": "555"}})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_accept_confirms_seat() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 3, 3, None);
    let entry_id = test.join(event_id, "ace@clubhouse.golf").await;

    test.send(Method::POST, &format!("/events/{}/release-seat", event_id), None).await;
    let (status, body) = test
        .send(Method::POST, &format!("/waitlist/{}/accept", entry_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"outcome": "accepted", "status": "accepted"}));

    let (_, waitlist) = test.send(Method::GET, &format!("/events/{}/waitlist", event_id), None).await;
    assert_eq!(waitlist["confirmed_count"], 3);
    assert_eq!(waitlist["available_seats"], 0);

    let (_, again) = test
        .send(Method::POST, &format!("/waitlist/{}/accept", entry_id), None)
        .await;
    assert_eq!(again["outcome"], "not_claimable");
}

#[tokio::test]
async fn test_decline_cascades_to_next_entrant() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 1, 1, None);
    let first = test.join(event_id, "first@clubhouse.golf").await;
    let second = test.join(event_id, "second@clubhouse.golf").await;

    test.send(Method::POST, &format!("/events/{}/release-seat", event_id), None).await;
    let (_, body) = test
        .send(Method::POST, &format!("/waitlist/{}/decline", first), None)
        .await;
    assert_eq!(body["status"], "declined");

    let (_, next) = test.send(Method::GET, &format!("/waitlist/{}", second), None).await;
    assert_eq!(next["status"], "offered");
}

#[tokio::test]
async fn test_cancel_waiting_entry() {
    let test = TestApp::new();
    let event_id = Uuid::new_v4();
    test.store.add_event(event_id, 1, 1, None);
    let entry_id = test.join(event_id, "quits@clubhouse.golf").await;

    let (status, body) = test
        .send(Method::POST, &format!("/waitlist/{}/cancel", entry_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);

    let (_, body) = test
        .send(Method::POST, &format!("/waitlist/{}/cancel", entry_id), None)
        .await;
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_sweep_endpoint_reports_counts() {
    let test = TestApp::new();
    let (status, body) = test.send(Method::POST, "/sweep-offers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expired"], 0);
    assert_eq!(body["promoted"], 0);
}

#[tokio::test]
async fn test_create_payment_modes() {
    let test = TestApp::new();

    let (status, body) = test
        .send(
            Method::POST,
            "/create-payment",
            Some(json!({"reservation_id": Uuid::new_v4(), "amount_cents": 12000})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["client_secret"].is_string());
    assert!(body["payment_intent_id"].is_string());

    let (status, body) = test
        .send(
            Method::POST,
            "/create-payment",
            Some(json!({
                "member_id": Uuid::new_v4(),
                "amount_cents": 30000,
                "checkout_mode": "hosted",
                "success_url": "https://clubhouse.golf/paid",
                "cancel_url": "https://clubhouse.golf/cancel",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().starts_with("https://"));

    let (status, body) = test
        .send(Method::POST, "/create-payment", Some(json!({"amount_cents": 100})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "member_id or reservation_id is required");
}

#[tokio::test]
async fn test_refund_member_payment() {
    let test = TestApp::new();
    let member_id = Uuid::new_v4();

    let (status, body) = test
        .send(Method::POST, "/refund-payment", Some(json!({"member_id": member_id})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    test.send(
        Method::POST,
        "/create-payment",
        Some(json!({"member_id": member_id, "amount_cents": 25000})),
    )
    .await;
    let (status, body) = test
        .send(Method::POST, "/refund-payment", Some(json!({"member_id": member_id})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_send_notification_skips_and_sends() {
    let test = TestApp::new();
    let no_token = Uuid::new_v4();
    let opted_out = Uuid::new_v4();
    let reachable = Uuid::new_v4();

    test.recipients.upsert(Recipient {
        recipient_id: no_token,
        push_token: None,
        disabled_push_types: BTreeSet::new(),
    });
    test.recipients.upsert(Recipient {
        recipient_id: opted_out,
        push_token: Some("ExponentPushToken[b]".to_string()),
        disabled_push_types: BTreeSet::from(["event_reminder".to_string()]),
    });
    test.recipients.upsert(Recipient {
        recipient_id: reachable,
        push_token: Some("ExponentPushToken[c]".to_string()),
        disabled_push_types: BTreeSet::new(),
    });

    let payload = |recipient_id: Uuid| {
        json!({
            "recipient_id": recipient_id,
            "title": "Tee times posted",
            "body": "Saturday sheet is open",
            "data": {"event_id": "abc"},
            "push_type": "event_reminder",
        })
    };

    let (_, body) = test.send(Method::POST, "/send-notification", Some(payload(no_token))).await;
    assert_eq!(body, json!({"skipped": true, "reason": "no_push_token"}));

    let (_, body) = test.send(Method::POST, "/send-notification", Some(payload(opted_out))).await;
    assert_eq!(body, json!({"skipped": true, "reason": "push_type_disabled"}));

    let (status, body) = test.send(Method::POST, "/send-notification", Some(payload(reachable))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "ticket_id": "ticket-123"}));

    let sent = test.push.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ExponentPushToken[c]");
    assert_eq!(sent[0].data["type"], "event_reminder");
    assert_eq!(sent[0].data["event_id"], "abc");

    drop(sent);
    let (status, _) = test
        .send(Method::POST, "/send-notification", Some(payload(Uuid::new_v4())))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let test = TestApp::new();
    let (status, body) = test.send(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let response = test
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
