use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Repository for the callback nonce ledger
///
/// The UNIQUE constraint on `nonce` is what makes concurrent duplicate
/// submissions fail atomically; the insert-or-conflict below is the entire
/// replay-detection primitive.
pub struct NonceRepository {
    pool: PgPool,
}

impl NonceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a nonce if it has not been seen. Returns `false` on conflict,
    /// meaning the nonce is a replay.
    pub async fn try_record(
        &self,
        nonce: &str,
        seen_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO callback_nonces (nonce, seen_at, expires_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (nonce) DO NOTHING",
        )
        .bind(nonce)
        .bind(seen_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete nonces whose window has elapsed; returns how many were pruned
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM callback_nonces WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
