//! Callback endpoint behavior end to end: status codes per rejection class,
//! and an audit row appended on every branch, accepted or not.

mod support;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use pambo_payments::api::callbacks::{
    handle_callback, CallbackState, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use pambo_payments::config::SignatureEnforcement;
use pambo_payments::gateway::replay::{ReplayGuard, ReplayPolicy};
use pambo_payments::gateway::signature::SignaturePolicy;
use pambo_payments::services::reconciler::PaymentReconciler;
use pambo_payments::services::store::ProcessingStatus;

use support::MemoryStore;

const SECRET: &str = "topsecret";

fn callback_app(store: Arc<MemoryStore>) -> Router {
    let state = CallbackState {
        reconciler: Arc::new(PaymentReconciler::new(store.clone())),
        replay_guard: Arc::new(ReplayGuard::new(store, ReplayPolicy::new(300, true))),
        signature: SignaturePolicy::new(Some(SECRET.to_string()), SignatureEnforcement::Require),
    };
    Router::new()
        .route("/callbacks/{gateway}", post(handle_callback))
        .with_state(state)
}

fn sign(timestamp: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

fn success_body(merchant: &str, checkout: &str) -> String {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": merchant,
                "CheckoutRequestID": checkout,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 7000},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "PhoneNumber", "Value": 254708374149u64}
                    ]
                }
            }
        }
    })
    .to_string()
}

fn request_with(timestamp: &str, signature: &str, nonce: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/callbacks/mpesa")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(TIMESTAMP_HEADER, timestamp)
        .header(NONCE_HEADER, nonce)
        .body(Body::from(body))
        .unwrap()
}

fn signed_request(nonce: &str, body: String) -> Request<Body> {
    let ts = Utc::now().timestamp().to_string();
    let sig = sign(&ts, body.as_bytes());
    request_with(&ts, &sig, nonce, body)
}

async fn ack_code(response: Response) -> i64 {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    value["ResultCode"].as_i64().unwrap()
}

#[tokio::test]
async fn valid_callback_is_acknowledged_and_audited() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_profile(user_id);
    store.seed_payment("M1", "C1", user_id, "pro", BigDecimal::from(7000));
    let app = callback_app(store.clone());

    let response = app
        .oneshot(signed_request("n1", success_body("M1", "C1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ack_code(response).await, 0);
    assert_eq!(
        store.records_with_status(ProcessingStatus::Processed).len(),
        1
    );
}

#[tokio::test]
async fn invalid_signature_returns_401_and_is_audited() {
    let store = Arc::new(MemoryStore::new());
    let app = callback_app(store.clone());

    let ts = Utc::now().timestamp().to_string();
    let body = success_body("M1", "C1");
    let response = app
        .oneshot(request_with(&ts, "not-the-signature", "n1", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let failed = store.records_with_status(ProcessingStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .record
        .error_message
        .as_deref()
        .unwrap()
        .contains("signature rejected"));
    assert_eq!(failed[0].record.signature_valid, Some(false));
}

#[tokio::test]
async fn missing_signature_header_returns_401_and_is_audited() {
    let store = Arc::new(MemoryStore::new());
    let app = callback_app(store.clone());

    let ts = Utc::now().timestamp().to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/callbacks/mpesa")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, ts)
        .header(NONCE_HEADER, "n1")
        .body(Body::from(success_body("M1", "C1")))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(store.records_with_status(ProcessingStatus::Failed).len(), 1);
}

#[tokio::test]
async fn replayed_nonce_returns_409_and_is_audited() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_profile(user_id);
    store.seed_payment("M1", "C1", user_id, "pro", BigDecimal::from(7000));
    let app = callback_app(store.clone());

    let first = app
        .clone()
        .oneshot(signed_request("n1", success_body("M1", "C1")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(signed_request("n1", success_body("M1", "C1")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let failed = store.records_with_status(ProcessingStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .record
        .error_message
        .as_deref()
        .unwrap()
        .contains("replay guard rejected"));
}

#[tokio::test]
async fn stale_timestamp_returns_401_and_is_audited() {
    let store = Arc::new(MemoryStore::new());
    let app = callback_app(store.clone());

    let stale = (Utc::now() - Duration::seconds(3600)).timestamp().to_string();
    let body = success_body("M1", "C1");
    let sig = sign(&stale, body.as_bytes());
    let response = app
        .oneshot(request_with(&stale, &sig, "n1", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let failed = store.records_with_status(ProcessingStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .record
        .error_message
        .as_deref()
        .unwrap()
        .contains("replay guard rejected"));
}

#[tokio::test]
async fn malformed_payload_soft_fails_with_audit() {
    let store = Arc::new(MemoryStore::new());
    let app = callback_app(store.clone());

    let response = app
        .oneshot(signed_request("n1", "this is not json".to_string()))
        .await
        .unwrap();

    // Authenticated but undecodable: acknowledged so the gateway stops
    // retrying, with the internal malformed code.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ack_code(response).await, 3);

    let failed = store.records_with_status(ProcessingStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].record.payload.get("raw").is_some());
}

#[tokio::test]
async fn unknown_correlation_soft_fails_with_audit() {
    let store = Arc::new(MemoryStore::new());
    let app = callback_app(store.clone());

    let response = app
        .oneshot(signed_request("n1", success_body("M-none", "C-none")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ack_code(response).await, 1);

    let failed = store.records_with_status(ProcessingStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].record.error_message.as_deref(),
        Some("payment record not found")
    );
}

#[tokio::test]
async fn store_failure_soft_fails_with_audit() {
    let store = Arc::new(MemoryStore::new());
    store.fail_payment_lookups();
    let app = callback_app(store.clone());

    let response = app
        .oneshot(signed_request("n1", success_body("M1", "C1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ack_code(response).await, 2);

    let failed = store.records_with_status(ProcessingStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .record
        .error_message
        .as_deref()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn unknown_gateway_returns_404() {
    let store = Arc::new(MemoryStore::new());
    let app = callback_app(store.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/callbacks/paypal")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(store.records().is_empty());
}
