use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// The slice of the profile row this service owns
#[derive(Debug, Clone, FromRow)]
pub struct ProfileSubscription {
    pub id: Uuid,
    pub subscription_tier: Option<String>,
    pub subscription_activated_at: Option<DateTime<Utc>>,
}

/// Repository for subscription state on user profiles
pub struct ProfileRepository {
    pool: PgPool,
}

impl ProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ProfileSubscription>, DatabaseError> {
        sqlx::query_as::<_, ProfileSubscription>(
            "SELECT id, subscription_tier, subscription_activated_at \
             FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Set the subscription tier. A plain conditional-free UPDATE keyed on the
    /// profile id: applying it twice with the same tier is a no-op in effect,
    /// which is what makes tier activation safely re-playable.
    /// Returns `false` when the profile does not exist.
    pub async fn activate_subscription(
        &self,
        user_id: Uuid,
        tier: &str,
        activated_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE profiles \
             SET subscription_tier = $2, subscription_activated_at = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(tier)
        .bind(activated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}
