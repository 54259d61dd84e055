use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Callback audit log entry
///
/// One row per inbound callback, written on every branch including
/// rejections. Append-only; rows are never updated or deleted.
#[derive(Debug, Clone, FromRow)]
pub struct CallbackRecord {
    pub id: Uuid,
    pub gateway: String,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub result_code: Option<i64>,
    pub payload: serde_json::Value,
    pub signature_valid: Option<bool>,
    pub nonce: Option<String>,
    pub timestamp_header: Option<String>,
    pub processing_status: String,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const RECORD_COLUMNS: &str = "id, gateway, merchant_request_id, checkout_request_id, result_code, \
     payload, signature_valid, nonce, timestamp_header, processing_status, \
     error_message, created_at";

/// Repository for the append-only callback audit log
pub struct CallbackRecordRepository {
    pool: PgPool,
}

impl CallbackRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one audit row
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        gateway: &str,
        merchant_request_id: Option<&str>,
        checkout_request_id: Option<&str>,
        result_code: Option<i64>,
        payload: serde_json::Value,
        signature_valid: Option<bool>,
        nonce: Option<&str>,
        timestamp_header: Option<&str>,
        processing_status: &str,
        error_message: Option<&str>,
    ) -> Result<CallbackRecord, DatabaseError> {
        sqlx::query_as::<_, CallbackRecord>(&format!(
            "INSERT INTO callback_records \
             (gateway, merchant_request_id, checkout_request_id, result_code, payload, \
              signature_valid, nonce, timestamp_header, processing_status, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(gateway)
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .bind(result_code)
        .bind(payload)
        .bind(signature_valid)
        .bind(nonce)
        .bind(timestamp_header)
        .bind(processing_status)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Whether a callback with this idempotency key (correlation identifiers
    /// plus result code) has already been fully processed.
    pub async fn exists_processed(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        result_code: i64,
    ) -> Result<bool, DatabaseError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM callback_records \
             WHERE merchant_request_id = $1 \
               AND checkout_request_id = $2 \
               AND result_code = $3 \
               AND processing_status = 'processed' \
             LIMIT 1",
        )
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .bind(result_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.is_some())
    }

    /// Recent audit rows for a correlation pair, newest first (operator surface)
    pub async fn find_by_correlation(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        limit: i64,
    ) -> Result<Vec<CallbackRecord>, DatabaseError> {
        sqlx::query_as::<_, CallbackRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM callback_records \
             WHERE merchant_request_id = $1 AND checkout_request_id = $2 \
             ORDER BY created_at DESC \
             LIMIT $3"
        ))
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
