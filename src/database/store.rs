use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::callback_record_repository::CallbackRecordRepository;
use crate::database::error::DatabaseError;
use crate::database::nonce_repository::NonceRepository;
use crate::database::pending_payment_repository::{PendingPayment, PendingPaymentRepository};
use crate::database::profile_repository::ProfileRepository;
use crate::gateway::replay::NonceLedger;
use crate::services::store::{CompletionDetails, NewCallbackRecord, ReconcilerStore};

/// Postgres-backed implementation of the reconciler's storage surface,
/// composed from the individual repositories.
pub struct PgReconcilerStore {
    payments: PendingPaymentRepository,
    callbacks: CallbackRecordRepository,
    nonces: NonceRepository,
    profiles: ProfileRepository,
}

impl PgReconcilerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            payments: PendingPaymentRepository::new(pool.clone()),
            callbacks: CallbackRecordRepository::new(pool.clone()),
            nonces: NonceRepository::new(pool.clone()),
            profiles: ProfileRepository::new(pool),
        }
    }
}

#[async_trait]
impl ReconcilerStore for PgReconcilerStore {
    async fn find_payment(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        self.payments
            .find_by_correlation(merchant_request_id, checkout_request_id)
            .await
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        details: &CompletionDetails,
    ) -> Result<bool, DatabaseError> {
        self.payments
            .complete_if_pending(
                payment_id,
                details.receipt_number.as_deref(),
                details.amount.as_ref(),
                details.phone_number.as_deref(),
            )
            .await
    }

    async fn fail_payment(&self, payment_id: Uuid, reason: &str) -> Result<bool, DatabaseError> {
        self.payments.fail_if_pending(payment_id, reason).await
    }

    async fn callback_already_processed(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        result_code: i64,
    ) -> Result<bool, DatabaseError> {
        self.callbacks
            .exists_processed(merchant_request_id, checkout_request_id, result_code)
            .await
    }

    async fn record_callback(&self, record: NewCallbackRecord) -> Result<Uuid, DatabaseError> {
        let row = self
            .callbacks
            .append(
                &record.gateway,
                record.merchant_request_id.as_deref(),
                record.checkout_request_id.as_deref(),
                record.result_code,
                record.payload,
                record.signature_valid,
                record.nonce.as_deref(),
                record.timestamp_header.as_deref(),
                record.processing_status.as_str(),
                record.error_message.as_deref(),
            )
            .await?;
        Ok(row.id)
    }

    async fn activate_subscription(
        &self,
        user_id: Uuid,
        tier: &str,
        activated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .profiles
            .activate_subscription(user_id, tier, activated_at)
            .await?;
        if !updated {
            return Err(DatabaseError::not_found("profile", &user_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NonceLedger for PgReconcilerStore {
    async fn try_record_nonce(
        &self,
        nonce: &str,
        seen_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.nonces.try_record(nonce, seen_at, expires_at).await
    }
}
