use crate::database::error::DatabaseError;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Pending payment entity
///
/// Created when an STK push is initiated. The status moves from `pending` to
/// exactly one of the terminal states (`completed` or `failed`) and the row is
/// never deleted; it doubles as the payment audit trail.
#[derive(Debug, Clone, FromRow)]
pub struct PendingPayment {
    pub id: Uuid,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub user_id: Uuid,
    pub tier: String,
    pub amount: BigDecimal,
    pub phone_number: Option<String>,
    pub receipt_number: Option<String>,
    pub failure_reason: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl PendingPayment {
    pub fn is_terminal(&self) -> bool {
        self.status != PaymentStatus::Pending.as_str()
    }
}

const PAYMENT_COLUMNS: &str = "id, merchant_request_id, checkout_request_id, user_id, tier, \
     amount, phone_number, receipt_number, failure_reason, status, \
     created_at, updated_at, completed_at";

/// Repository for pending payment records
pub struct PendingPaymentRepository {
    pool: PgPool,
}

impl PendingPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending payment carrying the gateway's correlation identifiers
    pub async fn create(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        user_id: Uuid,
        tier: &str,
        amount: BigDecimal,
        phone_number: Option<&str>,
    ) -> Result<PendingPayment, DatabaseError> {
        sqlx::query_as::<_, PendingPayment>(&format!(
            "INSERT INTO pending_payments \
             (merchant_request_id, checkout_request_id, user_id, tier, amount, phone_number, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending') \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .bind(user_id)
        .bind(tier)
        .bind(amount)
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find a payment by its gateway correlation identifiers
    pub async fn find_by_correlation(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        sqlx::query_as::<_, PendingPayment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM pending_payments \
             WHERE merchant_request_id = $1 AND checkout_request_id = $2"
        ))
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Transition `pending -> completed`, recording receipt details.
    ///
    /// Conditional on the current status so two racing identical callbacks
    /// cannot both claim the transition; returns `false` when the payment was
    /// no longer pending.
    pub async fn complete_if_pending(
        &self,
        id: Uuid,
        receipt_number: Option<&str>,
        amount: Option<&BigDecimal>,
        phone_number: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'completed', \
                 receipt_number = COALESCE($2, receipt_number), \
                 amount = COALESCE($3, amount), \
                 phone_number = COALESCE($4, phone_number), \
                 completed_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(receipt_number)
        .bind(amount)
        .bind(phone_number)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition `pending -> failed` with the gateway's failure reason.
    /// Returns `false` when the payment was no longer pending.
    pub async fn fail_if_pending(&self, id: Uuid, reason: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'failed', failure_reason = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent completed payment for a user; used to re-derive the
    /// subscription tier after a crashed activation.
    pub async fn latest_completed_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        sqlx::query_as::<_, PendingPayment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM pending_payments \
             WHERE user_id = $1 AND status = 'completed' \
             ORDER BY completed_at DESC NULLS LAST \
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// List a user's payments, newest first
    pub async fn find_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PendingPayment>, DatabaseError> {
        sqlx::query_as::<_, PendingPayment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM pending_payments \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        assert_eq!(PaymentStatus::Pending.as_str(), "pending");
        assert_eq!(PaymentStatus::Completed.as_str(), "completed");
        assert_eq!(PaymentStatus::Failed.as_str(), "failed");
    }
}
