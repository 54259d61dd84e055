use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::pending_payment_repository::PendingPaymentRepository;
use crate::database::profile_repository::ProfileRepository;

/// Subscription tier state on user profiles.
///
/// Tier is derived from completed payments, so it can always be rebuilt:
/// `rederive_for_user` re-applies the latest completed payment when a
/// callback completed but the activation step failed.
pub struct SubscriptionService {
    profiles: ProfileRepository,
    payments: PendingPaymentRepository,
}

impl SubscriptionService {
    pub fn new(profiles: ProfileRepository, payments: PendingPaymentRepository) -> Self {
        Self { profiles, payments }
    }

    pub async fn activate(&self, user_id: Uuid, tier: &str) -> Result<bool, DatabaseError> {
        self.profiles
            .activate_subscription(user_id, tier, Utc::now())
            .await
    }

    /// Re-derive the tier from the user's most recent completed payment.
    /// Returns the tier that was applied, or `None` when the user has no
    /// completed payments.
    pub async fn rederive_for_user(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError> {
        let Some(payment) = self.payments.latest_completed_for_user(user_id).await? else {
            return Ok(None);
        };
        let activated_at = payment.completed_at.unwrap_or_else(Utc::now);
        let applied = self
            .profiles
            .activate_subscription(user_id, &payment.tier, activated_at)
            .await?;
        if !applied {
            return Err(DatabaseError::not_found("profile", user_id.to_string()));
        }
        info!(
            user_id = %user_id,
            tier = %payment.tier,
            payment_id = %payment.id,
            "subscription tier rederived from completed payment"
        );
        Ok(Some(payment.tier))
    }
}
