use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use skyfare_api::app;
use skyfare_api::middleware::auth::Claims;
use skyfare_api::state::{AppState, AuthConfig};
use skyfare_booking::BookingLifecycle;
use skyfare_core::collaborators::{LogNotifier, NoopSeatAssigner};
use skyfare_core::payment::{PaymentOutcome, PaymentProvider};
use skyfare_core::repository::{BookingRepository, PaymentRepository};
use skyfare_payments::providers::paymob::{
    self, PaymobEvent, PaymobOrder, PaymobSourceData, PaymobTransaction,
};
use skyfare_payments::providers::{GatewayRegistry, MockGateway};
use skyfare_payments::{
    PaymentLedger, PaymentOrchestrator, ReconcilerConfig, VerificationMode, WebhookReconciler,
};
use skyfare_store::memory::{InMemoryBookingRepository, InMemoryPaymentRepository};

const JWT_SECRET: &str = "api-test-secret";
const STRIPE_SECRET: &str = "whsec_api_test";
const PAYMOB_SECRET: &str = "paymob_api_test";

struct TestApp {
    app: Router,
    bookings: Arc<InMemoryBookingRepository>,
    payments: Arc<InMemoryPaymentRepository>,
    gateway: Arc<MockGateway>,
}

fn test_app() -> TestApp {
    let bookings = Arc::new(InMemoryBookingRepository::new());
    let payments = Arc::new(InMemoryPaymentRepository::new());
    let ledger = Arc::new(PaymentLedger::new(payments.clone()));
    let gateway = Arc::new(MockGateway::new(PaymentProvider::Stripe));
    let gateways = GatewayRegistry::new().with(gateway.clone());

    let notifier = Arc::new(LogNotifier);
    let lifecycle = Arc::new(BookingLifecycle::new(
        bookings.clone(),
        Arc::new(NoopSeatAssigner),
        notifier.clone(),
        5,
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        bookings.clone(),
        ledger.clone(),
        gateways.clone(),
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        bookings.clone(),
        ledger.clone(),
        gateways,
        notifier,
        ReconcilerConfig {
            stripe_webhook_secret: STRIPE_SECRET.to_string(),
            paymob_hmac_secret: PAYMOB_SECRET.to_string(),
            mode: VerificationMode::Strict,
        },
    ));

    let state = AppState {
        lifecycle,
        orchestrator,
        reconciler,
        ledger,
        auth: AuthConfig {
            secret: JWT_SECRET.to_string(),
            expiration: 3600,
        },
    };

    TestApp {
        app: app(state),
        bookings,
        payments,
        gateway,
    }
}

fn token_for(user_id: Uuid) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        email: None,
        role: "GUEST".to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(t: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let response = t.app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("Authorization", format!("Bearer {}", t));
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn booking_body() -> Value {
    let departure = Utc::now() + Duration::hours(48);
    json!({
        "trip_type": "ONE_WAY",
        "flight": {
            "flight_number": "SF802",
            "airline": "Skyfare Air",
            "origin": "CAI",
            "destination": "DXB",
            "departure_time": departure,
            "arrival_time": departure + Duration::hours(4),
            "cabin_class": "ECONOMY",
            "direction": null
        },
        "travelers": [
            { "first_name": "Omar", "last_name": "Said", "date_of_birth": null, "seat_number": null }
        ],
        "contact": { "email": "omar@example.com", "phone": "+201000000000" },
        "total_price": 1250.0,
        "currency": "USD"
    })
}

async fn create_booking(t: &TestApp, token: &str) -> Uuid {
    let (status, body) = send(t, post_json("/v1/bookings", Some(token), &booking_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    Uuid::parse_str(body["booking_id"].as_str().unwrap()).unwrap()
}

fn stripe_sign(payload: &[u8]) -> String {
    let ts = Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(STRIPE_SECRET.as_bytes()).unwrap();
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

fn stripe_event(intent_id: &str, booking_id: Uuid, amount_cents: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_api_1",
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": intent_id,
                "status": "succeeded",
                "amount": amount_cents,
                "currency": "usd",
                "metadata": { "merchant_order_id": booking_id.to_string() }
            }
        }
    }))
    .unwrap()
}

fn stripe_webhook(body: Vec<u8>, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/webhooks/payments/stripe")
        .header("content-type", "application/json")
        .header("Stripe-Signature", signature)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let t = test_app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&t, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn guest_token_grants_access() {
    let t = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/v1/auth/guest")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&t, req).await;
    assert_eq!(status, StatusCode::OK);

    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(body["expires_in"], 3600);

    let (status, body) = send(&t, get_auth("/v1/bookings", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let t = test_app();
    let (status, _) = send(&t, post_json("/v1/bookings", None, &booking_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/v1/bookings")
        .header("Authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&t, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_and_fetch_booking() {
    let t = test_app();
    let user = Uuid::new_v4();
    let token = token_for(user);

    let (status, body) = send(&t, post_json("/v1/bookings", Some(&token), &booking_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["booking_ref"].as_str().unwrap().len(), 8);
    let id = Uuid::parse_str(body["booking_id"].as_str().unwrap()).unwrap();

    let (status, body) = send(&t, get_auth(&format!("/v1/bookings/{}", id), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_status"], "PENDING");
    assert_eq!(body["total_amount_cents"], 125_000);

    // Someone else's token cannot see it
    let foreign = token_for(Uuid::new_v4());
    let (status, body) = send(&t, get_auth(&format!("/v1/bookings/{}", id), &foreign)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, _) = send(
        &t,
        get_auth(&format!("/v1/bookings/{}", Uuid::new_v4()), &token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn amount_mismatch_never_reaches_the_provider() {
    let t = test_app();
    let token = token_for(Uuid::new_v4());
    let id = create_booking(&t, &token).await;

    let req = json!({ "amount": 999.0, "currency": "USD", "provider": "STRIPE" });
    let (status, body) = send(
        &t,
        post_json(&format!("/v1/bookings/{}/payment-intent", id), Some(&token), &req),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_failed");
    assert_eq!(t.gateway.order_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stripe_payment_settles_end_to_end() {
    let t = test_app();
    let token = token_for(Uuid::new_v4());
    let id = create_booking(&t, &token).await;

    let req = json!({ "amount": 1250.0, "currency": "USD", "provider": "STRIPE" });
    let (status, body) = send(
        &t,
        post_json(&format!("/v1/bookings/{}/payment-intent", id), Some(&token), &req),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let intent_id = body["provider_order_id"].as_str().unwrap().to_string();
    assert!(body["handle"].as_str().unwrap().starts_with("mock-handle-"));

    let event = stripe_event(&intent_id, id, 125_000);
    let signature = stripe_sign(&event);
    let (status, body) = send(&t, stripe_webhook(event.clone(), &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let (status, body) = send(
        &t,
        get_auth(&format!("/v1/bookings/{}/payment-status", id), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking_status"], "CONFIRMED");
    assert_eq!(body["payment_status"], "COMPLETED");

    // Redelivery is acknowledged but changes nothing
    let (status, _) = send(&t, stripe_webhook(event, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    let records = t.payments.find_by_booking(id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].transaction_id.as_deref(), Some(intent_id.as_str()));
}

#[tokio::test]
async fn stripe_webhook_with_bad_signature_is_unauthorized() {
    let t = test_app();
    let token = token_for(Uuid::new_v4());
    let id = create_booking(&t, &token).await;

    let event = stripe_event("pi_forged", id, 125_000);
    // Signature computed over different bytes
    let signature = stripe_sign(b"something else entirely");
    let (status, body) = send(&t, stripe_webhook(event, &signature)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "signature_rejected");

    let stored = t.bookings.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_str(), "PENDING");
}

#[tokio::test]
async fn cancel_rules_are_enforced_over_http() {
    let t = test_app();
    let user = Uuid::new_v4();
    let token = token_for(user);
    let id = create_booking(&t, &token).await;

    // Still pending, not cancellable
    let (status, body) = send(
        &t,
        post_json(&format!("/v1/bookings/{}/cancel", id), Some(&token), &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_failed");

    // Confirm the payment out of band, then cancel with a reason
    let mut booking = t.bookings.find_by_id(id).await.unwrap().unwrap();
    booking.confirm_payment(Utc::now());
    t.bookings.update(&booking).await.unwrap();

    let foreign = token_for(Uuid::new_v4());
    let (status, _) = send(
        &t,
        post_json(&format!("/v1/bookings/{}/cancel", id), Some(&foreign), &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &t,
        post_json(
            &format!("/v1/bookings/{}/cancel", id),
            Some(&token),
            &json!({ "reason": "plans changed" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert!(body["cancelled_at"].is_string());
}

#[tokio::test]
async fn refunds_are_recorded_for_the_owner() {
    let t = test_app();
    let token = token_for(Uuid::new_v4());
    let id = create_booking(&t, &token).await;

    let req = json!({ "amount": 1250.0, "currency": "USD", "provider": "STRIPE" });
    let (status, body) = send(
        &t,
        post_json(&format!("/v1/bookings/{}/payment-intent", id), Some(&token), &req),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let intent_id = body["provider_order_id"].as_str().unwrap().to_string();

    let event = stripe_event(&intent_id, id, 125_000);
    let signature = stripe_sign(&event);
    let (status, _) = send(&t, stripe_webhook(event, &signature)).await;
    assert_eq!(status, StatusCode::OK);

    let payment_id = t.payments.find_by_booking(id).await.unwrap()[0].id;

    // Not the owner's payment
    let foreign = token_for(Uuid::new_v4());
    let (status, _) = send(
        &t,
        post_json(
            &format!("/v1/payments/{}/refund", payment_id),
            Some(&foreign),
            &json!({ "amount": 1250.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &t,
        post_json(
            &format!("/v1/payments/{}/refund", payment_id),
            Some(&token),
            &json!({ "amount": 1250.0, "reason": "flight cancelled" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "REFUNDED");
    assert_eq!(body["refunded_amount_cents"], 125_000);
    assert_eq!(body["refund_reason"], "flight cancelled");
}

#[tokio::test]
async fn payment_status_polls_provider_while_pending() {
    let t = test_app();
    let token = token_for(Uuid::new_v4());
    let id = create_booking(&t, &token).await;

    let req = json!({ "amount": 1250.0, "currency": "USD", "provider": "STRIPE" });
    let (status, _) = send(
        &t,
        post_json(&format!("/v1/bookings/{}/payment-intent", id), Some(&token), &req),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The webhook never arrives, but the provider knows the charge went
    // through; asking for the status repairs the booking.
    t.gateway.set_remote_outcome(PaymentOutcome::Success).await;
    let (status, body) = send(
        &t,
        get_auth(&format!("/v1/bookings/{}/payment-status", id), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking_status"], "CONFIRMED");
    assert_eq!(body["payment_status"], "COMPLETED");
    assert_eq!(body["provider_status"], "SUCCESS");
}

#[tokio::test]
async fn paymob_callback_settles_booking_via_query_hmac() {
    let t = test_app();
    let token = token_for(Uuid::new_v4());
    let id = create_booking(&t, &token).await;

    let txn = PaymobTransaction {
        id: 88_001,
        amount_cents: 125_000,
        currency: "USD".to_string(),
        success: true,
        pending: false,
        error_occured: false,
        is_auth: false,
        is_capture: false,
        is_refunded: false,
        is_standalone_payment: true,
        is_voided: false,
        is_3d_secure: true,
        has_parent_transaction: false,
        integration_id: 4419,
        owner: 761,
        created_at: "2025-05-01T10:00:00.000000".to_string(),
        order: PaymobOrder {
            id: 9001,
            merchant_order_id: Some(id.to_string()),
        },
        source_data: PaymobSourceData::default(),
    };
    let hmac = paymob::compute_hmac(PAYMOB_SECRET, &txn).unwrap();
    let body = serde_json::to_vec(&PaymobEvent {
        type_: "TRANSACTION".to_string(),
        obj: txn,
    })
    .unwrap();

    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/webhooks/payments/paymob?hmac={}", hmac))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&t, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let stored = t.bookings.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_str(), "CONFIRMED");

    let record = t.payments.find_by_transaction_id("88001").await.unwrap().unwrap();
    assert_eq!(record.status.as_str(), "COMPLETED");
    assert_eq!(record.amount_cents, 125_000);
}
