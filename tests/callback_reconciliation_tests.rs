//! Reconciler behavior driven through an in-memory store

mod support;

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde_json::json;
use uuid::Uuid;

use pambo_payments::database::pending_payment_repository::PaymentStatus;
use pambo_payments::gateway::types::{GatewayName, PaymentCallback};
use pambo_payments::services::reconciler::{
    PaymentReconciler, ReconcileInput, ReconcileOutcome,
};
use pambo_payments::services::store::ProcessingStatus;

use support::MemoryStore;

fn success_callback(merchant: &str, checkout: &str) -> PaymentCallback {
    PaymentCallback {
        merchant_request_id: merchant.to_string(),
        checkout_request_id: checkout.to_string(),
        result_code: 0,
        result_desc: "The service request is processed successfully.".to_string(),
        receipt_number: Some("NLJ7RT61SV".to_string()),
        amount: Some(BigDecimal::from_str("7000").unwrap()),
        phone_number: Some("254708374149".to_string()),
        transaction_date: Some("20191219102115".to_string()),
    }
}

fn failure_callback(merchant: &str, checkout: &str) -> PaymentCallback {
    PaymentCallback {
        merchant_request_id: merchant.to_string(),
        checkout_request_id: checkout.to_string(),
        result_code: 1032,
        result_desc: "Request cancelled by user".to_string(),
        receipt_number: None,
        amount: None,
        phone_number: None,
        transaction_date: None,
    }
}

fn input_for(callback: PaymentCallback) -> ReconcileInput {
    ReconcileInput {
        gateway: GatewayName::Mpesa,
        callback,
        raw_payload: json!({"Body": {"stkCallback": {}}}),
        signature_valid: Some(true),
        nonce: Some(Uuid::new_v4().to_string()),
        timestamp_header: Some("1700000000".to_string()),
    }
}

#[tokio::test]
async fn successful_callback_completes_payment_and_activates_tier() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_profile(user_id);
    let payment_id = store.seed_payment("M1", "C1", user_id, "pro", BigDecimal::from(7000));

    let reconciler = PaymentReconciler::new(store.clone());
    let outcome = reconciler
        .process(input_for(success_callback("M1", "C1")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Processed);

    let payment = store.payment(payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed.as_str());
    assert_eq!(payment.receipt_number.as_deref(), Some("NLJ7RT61SV"));
    assert!(payment.completed_at.is_some());

    let activations = store.activations();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].user_id, user_id);
    assert_eq!(activations[0].tier, "pro");

    let processed = store.records_with_status(ProcessingStatus::Processed);
    assert_eq!(processed.len(), 1);
}

#[tokio::test]
async fn failed_callback_marks_payment_failed_without_activation() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_profile(user_id);
    let payment_id = store.seed_payment("M1", "C1", user_id, "pro", BigDecimal::from(7000));

    let reconciler = PaymentReconciler::new(store.clone());
    let outcome = reconciler
        .process(input_for(failure_callback("M1", "C1")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Processed);

    let payment = store.payment(payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed.as_str());
    assert_eq!(
        payment.failure_reason.as_deref(),
        Some("Request cancelled by user")
    );
    assert!(store.activations().is_empty());
}

#[tokio::test]
async fn repeated_deliveries_process_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_profile(user_id);
    store.seed_payment("M1", "C1", user_id, "pro", BigDecimal::from(7000));

    let reconciler = PaymentReconciler::new(store.clone());
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(
            reconciler
                .process(input_for(success_callback("M1", "C1")))
                .await
                .unwrap(),
        );
    }

    assert_eq!(outcomes[0], ReconcileOutcome::Processed);
    assert_eq!(outcomes[1], ReconcileOutcome::Duplicate);
    assert_eq!(outcomes[2], ReconcileOutcome::Duplicate);

    assert_eq!(store.activations().len(), 1);
    assert_eq!(
        store.records_with_status(ProcessingStatus::Processed).len(),
        1
    );
    assert_eq!(
        store.records_with_status(ProcessingStatus::Duplicate).len(),
        2
    );
}

#[tokio::test]
async fn unknown_correlation_is_audited_without_mutation() {
    let store = Arc::new(MemoryStore::new());

    let reconciler = PaymentReconciler::new(store.clone());
    let outcome = reconciler
        .process(input_for(success_callback("M-unknown", "C-unknown")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::RecordNotFound);
    assert!(store.activations().is_empty());

    let failed = store.records_with_status(ProcessingStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].record.error_message.as_deref(),
        Some("payment record not found")
    );
}

#[tokio::test]
async fn callback_for_terminal_payment_is_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_profile(user_id);
    let payment_id = store.seed_payment("M1", "C1", user_id, "pro", BigDecimal::from(7000));

    let reconciler = PaymentReconciler::new(store.clone());
    reconciler
        .process(input_for(failure_callback("M1", "C1")))
        .await
        .unwrap();

    // Different result code, so the audit-log idempotency check misses and
    // the conditional status transition has to catch it.
    let outcome = reconciler
        .process(input_for(success_callback("M1", "C1")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Duplicate);

    let payment = store.payment(payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed.as_str());
    assert!(store.activations().is_empty());
}

#[tokio::test]
async fn activation_failure_still_acknowledges_callback() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    // No profile seeded, so activation fails
    let payment_id = store.seed_payment("M1", "C1", user_id, "pro", BigDecimal::from(7000));

    let reconciler = PaymentReconciler::new(store.clone());
    let outcome = reconciler
        .process(input_for(success_callback("M1", "C1")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Processed);
    let payment = store.payment(payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed.as_str());
    assert!(store.activations().is_empty());
}
