use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::gateway::types::{GatewayName, PaymentCallback};
use crate::services::store::{
    CompletionDetails, NewCallbackRecord, ProcessingStatus, ReconcilerStore,
};

/// A verified callback ready for reconciliation
#[derive(Debug, Clone)]
pub struct ReconcileInput {
    pub gateway: GatewayName,
    pub callback: PaymentCallback,
    pub raw_payload: Value,
    pub signature_valid: Option<bool>,
    pub nonce: Option<String>,
    pub timestamp_header: Option<String>,
}

/// How a callback was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First delivery; the payment record was transitioned
    Processed,
    /// Same idempotency key already processed, or the payment had already
    /// reached a terminal status
    Duplicate,
    /// No pending payment matches the correlation identifiers
    RecordNotFound,
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Applies verified callbacks to pending payments, exactly once.
///
/// Idempotency is layered: the audit log is consulted first by
/// (merchant_request_id, checkout_request_id, result_code), and the status
/// transition itself is a conditional update that only fires while the
/// payment is still pending. Either layer alone catches a duplicate; races
/// between concurrent deliveries fall through to the second.
pub struct PaymentReconciler {
    store: Arc<dyn ReconcilerStore>,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn ReconcilerStore>) -> Self {
        Self { store }
    }

    pub async fn process(&self, input: ReconcileInput) -> Result<ReconcileOutcome, ReconcilerError> {
        let cb = &input.callback;

        if self
            .store
            .callback_already_processed(
                &cb.merchant_request_id,
                &cb.checkout_request_id,
                cb.result_code,
            )
            .await?
        {
            info!(
                merchant_request_id = %cb.merchant_request_id,
                checkout_request_id = %cb.checkout_request_id,
                result_code = cb.result_code,
                "duplicate callback, already processed"
            );
            self.audit(&input, ProcessingStatus::Duplicate, None).await?;
            return Ok(ReconcileOutcome::Duplicate);
        }

        let payment = self
            .store
            .find_payment(&cb.merchant_request_id, &cb.checkout_request_id)
            .await?;
        let Some(payment) = payment else {
            warn!(
                merchant_request_id = %cb.merchant_request_id,
                checkout_request_id = %cb.checkout_request_id,
                "callback for unknown payment record"
            );
            self.audit(
                &input,
                ProcessingStatus::Failed,
                Some("payment record not found"),
            )
            .await?;
            return Ok(ReconcileOutcome::RecordNotFound);
        };

        let outcome = if cb.result_code == 0 {
            self.apply_success(&input, payment.id, payment.user_id, &payment.tier)
                .await?
        } else {
            self.apply_failure(&input, payment.id).await?
        };
        Ok(outcome)
    }

    async fn apply_success(
        &self,
        input: &ReconcileInput,
        payment_id: Uuid,
        user_id: Uuid,
        tier: &str,
    ) -> Result<ReconcileOutcome, ReconcilerError> {
        let cb = &input.callback;
        let details = CompletionDetails {
            receipt_number: cb.receipt_number.clone(),
            amount: cb.amount.clone(),
            phone_number: cb.phone_number.clone(),
        };
        let transitioned = self.store.complete_payment(payment_id, &details).await?;
        if !transitioned {
            info!(
                payment_id = %payment_id,
                "payment already terminal, treating callback as duplicate"
            );
            self.audit(input, ProcessingStatus::Duplicate, None).await?;
            return Ok(ReconcileOutcome::Duplicate);
        }

        // Tier activation is derived state: if it fails here it can be
        // replayed later from the completed payment, so the callback is
        // still acknowledged as processed.
        if let Err(e) = self
            .store
            .activate_subscription(user_id, tier, chrono::Utc::now())
            .await
        {
            error!(
                user_id = %user_id,
                tier = %tier,
                error = %e,
                "payment completed but tier activation failed, needs rederive"
            );
        } else {
            info!(user_id = %user_id, tier = %tier, "subscription tier activated");
        }

        info!(
            payment_id = %payment_id,
            receipt = ?cb.receipt_number,
            "payment completed"
        );
        self.audit(input, ProcessingStatus::Processed, None).await?;
        Ok(ReconcileOutcome::Processed)
    }

    async fn apply_failure(
        &self,
        input: &ReconcileInput,
        payment_id: Uuid,
    ) -> Result<ReconcileOutcome, ReconcilerError> {
        let cb = &input.callback;
        let transitioned = self.store.fail_payment(payment_id, &cb.result_desc).await?;
        if !transitioned {
            info!(
                payment_id = %payment_id,
                "payment already terminal, treating callback as duplicate"
            );
            self.audit(input, ProcessingStatus::Duplicate, None).await?;
            return Ok(ReconcileOutcome::Duplicate);
        }

        info!(
            payment_id = %payment_id,
            result_code = cb.result_code,
            result_desc = %cb.result_desc,
            "payment failed"
        );
        self.audit(input, ProcessingStatus::Processed, None).await?;
        Ok(ReconcileOutcome::Processed)
    }

    async fn audit(
        &self,
        input: &ReconcileInput,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<(), ReconcilerError> {
        let cb = &input.callback;
        self.store
            .record_callback(NewCallbackRecord {
                gateway: input.gateway.to_string(),
                merchant_request_id: Some(cb.merchant_request_id.clone()),
                checkout_request_id: Some(cb.checkout_request_id.clone()),
                result_code: Some(cb.result_code),
                payload: input.raw_payload.clone(),
                signature_valid: input.signature_valid,
                nonce: input.nonce.clone(),
                timestamp_header: input.timestamp_header.clone(),
                processing_status: status,
                error_message: error_message.map(String::from),
            })
            .await?;
        Ok(())
    }

    /// Append an audit row for a callback rejected before reconciliation
    /// (bad signature, replay, undecodable payload). Correlation identifiers
    /// are pulled out of the raw payload when they are legible. Best-effort:
    /// audit failure here is logged, never surfaced.
    pub async fn record_rejection(
        &self,
        gateway: &str,
        raw_payload: Value,
        signature_valid: Option<bool>,
        nonce: Option<String>,
        timestamp_header: Option<String>,
        error: &str,
    ) {
        let stk = raw_payload
            .pointer("/Body/stkCallback")
            .cloned()
            .unwrap_or(Value::Null);
        let merchant_request_id = stk
            .get("MerchantRequestID")
            .and_then(Value::as_str)
            .map(String::from);
        let checkout_request_id = stk
            .get("CheckoutRequestID")
            .and_then(Value::as_str)
            .map(String::from);
        let result_code = stk.get("ResultCode").and_then(Value::as_i64);

        let record = NewCallbackRecord {
            gateway: gateway.to_string(),
            merchant_request_id,
            checkout_request_id,
            result_code,
            payload: raw_payload,
            signature_valid,
            nonce,
            timestamp_header,
            processing_status: ProcessingStatus::Failed,
            error_message: Some(error.to_string()),
        };
        if let Err(e) = self.store.record_callback(record).await {
            error!(error = %e, "failed to record rejected callback");
        }
    }
}
