use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::pending_payment_repository::PendingPayment;

/// Terminal disposition recorded on an audit row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Processed,
    Duplicate,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Duplicate => "duplicate",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// Audit row to append for an inbound callback
#[derive(Debug, Clone)]
pub struct NewCallbackRecord {
    pub gateway: String,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub result_code: Option<i64>,
    pub payload: Value,
    pub signature_valid: Option<bool>,
    pub nonce: Option<String>,
    pub timestamp_header: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
}

/// Fields applied when a pending payment completes
#[derive(Debug, Clone)]
pub struct CompletionDetails {
    pub receipt_number: Option<String>,
    pub amount: Option<BigDecimal>,
    pub phone_number: Option<String>,
}

/// Storage surface the reconciler runs against.
///
/// The conditional mutations (`complete_payment`, `fail_payment`) return
/// `false` when the payment was no longer pending, which is how concurrent
/// duplicate callbacks are detected after the fact.
#[async_trait]
pub trait ReconcilerStore: Send + Sync {
    async fn find_payment(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError>;

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        details: &CompletionDetails,
    ) -> Result<bool, DatabaseError>;

    async fn fail_payment(&self, payment_id: Uuid, reason: &str) -> Result<bool, DatabaseError>;

    async fn callback_already_processed(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        result_code: i64,
    ) -> Result<bool, DatabaseError>;

    async fn record_callback(&self, record: NewCallbackRecord) -> Result<Uuid, DatabaseError>;

    async fn activate_subscription(
        &self,
        user_id: Uuid,
        tier: &str,
        activated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
}
