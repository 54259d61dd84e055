//! In-memory store fake for driving the reconciler without Postgres

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use pambo_payments::database::error::{DatabaseError, DatabaseErrorKind};
use pambo_payments::database::pending_payment_repository::{PaymentStatus, PendingPayment};
use pambo_payments::gateway::replay::NonceLedger;
use pambo_payments::services::store::{
    CompletionDetails, NewCallbackRecord, ProcessingStatus, ReconcilerStore,
};

#[derive(Debug, Clone)]
pub struct RecordedCallback {
    pub id: Uuid,
    pub record: NewCallbackRecord,
}

#[derive(Debug, Clone)]
pub struct Activation {
    pub user_id: Uuid,
    pub tier: String,
    pub activated_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    payments: HashMap<Uuid, PendingPayment>,
    records: Vec<RecordedCallback>,
    activations: Vec<Activation>,
    nonces: HashMap<String, DateTime<Utc>>,
    profiles: Vec<Uuid>,
    fail_payment_lookups: bool,
}

/// Mutex-guarded in-memory implementation of the reconciler's storage
/// surface and the nonce ledger.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_profile(&self, user_id: Uuid) {
        self.state.lock().unwrap().profiles.push(user_id);
    }

    pub fn seed_payment(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        user_id: Uuid,
        tier: &str,
        amount: BigDecimal,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let payment = PendingPayment {
            id,
            merchant_request_id: merchant_request_id.to_string(),
            checkout_request_id: checkout_request_id.to_string(),
            user_id,
            tier: tier.to_string(),
            amount,
            phone_number: None,
            receipt_number: None,
            failure_reason: None,
            status: PaymentStatus::Pending.as_str().to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.state.lock().unwrap().payments.insert(id, payment);
        id
    }

    pub fn payment(&self, id: Uuid) -> Option<PendingPayment> {
        self.state.lock().unwrap().payments.get(&id).cloned()
    }

    pub fn records(&self) -> Vec<RecordedCallback> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn records_with_status(&self, status: ProcessingStatus) -> Vec<RecordedCallback> {
        self.records()
            .into_iter()
            .filter(|r| r.record.processing_status == status)
            .collect()
    }

    pub fn activations(&self) -> Vec<Activation> {
        self.state.lock().unwrap().activations.clone()
    }

    /// Make payment lookups fail with a connection error; audit writes keep
    /// working, mirroring a partial storage outage.
    pub fn fail_payment_lookups(&self) {
        self.state.lock().unwrap().fail_payment_lookups = true;
    }
}

#[async_trait]
impl ReconcilerStore for MemoryStore {
    async fn find_payment(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        let state = self.state.lock().unwrap();
        if state.fail_payment_lookups {
            return Err(DatabaseError::new(DatabaseErrorKind::Connection {
                message: "connection refused".to_string(),
            }));
        }
        Ok(state
            .payments
            .values()
            .find(|p| {
                p.merchant_request_id == merchant_request_id
                    && p.checkout_request_id == checkout_request_id
            })
            .cloned())
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        details: &CompletionDetails,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().unwrap();
        let Some(payment) = state.payments.get_mut(&payment_id) else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Pending.as_str() {
            return Ok(false);
        }
        payment.status = PaymentStatus::Completed.as_str().to_string();
        if details.receipt_number.is_some() {
            payment.receipt_number = details.receipt_number.clone();
        }
        if let Some(amount) = &details.amount {
            payment.amount = amount.clone();
        }
        if details.phone_number.is_some() {
            payment.phone_number = details.phone_number.clone();
        }
        payment.completed_at = Some(Utc::now());
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail_payment(&self, payment_id: Uuid, reason: &str) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().unwrap();
        let Some(payment) = state.payments.get_mut(&payment_id) else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Pending.as_str() {
            return Ok(false);
        }
        payment.status = PaymentStatus::Failed.as_str().to_string();
        payment.failure_reason = Some(reason.to_string());
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn callback_already_processed(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        result_code: i64,
    ) -> Result<bool, DatabaseError> {
        let state = self.state.lock().unwrap();
        Ok(state.records.iter().any(|r| {
            r.record.processing_status == ProcessingStatus::Processed
                && r.record.merchant_request_id.as_deref() == Some(merchant_request_id)
                && r.record.checkout_request_id.as_deref() == Some(checkout_request_id)
                && r.record.result_code == Some(result_code)
        }))
    }

    async fn record_callback(&self, record: NewCallbackRecord) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        self.state
            .lock()
            .unwrap()
            .records
            .push(RecordedCallback { id, record });
        Ok(id)
    }

    async fn activate_subscription(
        &self,
        user_id: Uuid,
        tier: &str,
        activated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        if !state.profiles.contains(&user_id) {
            return Err(DatabaseError::not_found("profile", user_id.to_string()));
        }
        state.activations.push(Activation {
            user_id,
            tier: tier.to_string(),
            activated_at,
        });
        Ok(())
    }
}

#[async_trait]
impl NonceLedger for MemoryStore {
    async fn try_record_nonce(
        &self,
        nonce: &str,
        seen_at: DateTime<Utc>,
        _expires_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().unwrap();
        if state.nonces.contains_key(nonce) {
            return Ok(false);
        }
        state.nonces.insert(nonce.to_string(), seen_at);
        Ok(true)
    }
}
