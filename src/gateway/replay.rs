use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thiserror::Error;

use crate::database::error::DatabaseError;

/// Why a callback failed the replay check
#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    #[error("missing nonce or timestamp header")]
    MissingHeaders,

    #[error("unparseable callback timestamp: {0}")]
    UnparseableTimestamp(String),

    #[error("callback timestamp outside acceptance window: age {age_secs}s, max {max_age_secs}s")]
    StaleTimestamp { age_secs: i64, max_age_secs: i64 },

    #[error("nonce already seen: {0}")]
    ReplayDetected(String),

    #[error("nonce ledger unavailable: {0}")]
    Ledger(String),
}

impl ReplayError {
    /// A detected replay is a conflict (409); everything else is a plain
    /// authentication failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReplayError::ReplayDetected(_))
    }
}

impl From<ReplayError> for crate::error::AppError {
    fn from(err: ReplayError) -> Self {
        use crate::error::{AppError, AppErrorKind};
        let conflict = err.is_conflict();
        AppError::new(AppErrorKind::Replay {
            reason: err.to_string(),
            conflict,
        })
    }
}

/// Replay window settings, derived from [`crate::config::CallbackConfig`]
#[derive(Debug, Clone, Copy)]
pub struct ReplayPolicy {
    pub max_age_secs: i64,
    pub require_nonce: bool,
}

impl ReplayPolicy {
    /// The window floor is enforced once, by
    /// [`crate::config::CallbackConfig::validate`]; callers pass the
    /// validated value through unchanged.
    pub fn new(max_age_secs: i64, require_nonce: bool) -> Self {
        Self {
            max_age_secs,
            require_nonce,
        }
    }
}

/// Storage for seen nonces. The single method is an atomic
/// record-if-unseen: `Ok(false)` means the nonce was already present.
#[async_trait]
pub trait NonceLedger: Send + Sync {
    async fn try_record_nonce(
        &self,
        nonce: &str,
        seen_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
}

/// Parse the callback timestamp header.
///
/// Accepts epoch seconds, epoch milliseconds (disambiguated by magnitude)
/// and ISO-8601, with or without an offset.
pub fn parse_callback_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(numeric) = raw.parse::<i64>() {
        // Epoch seconds roll past 12 digits around year 5138; anything that
        // large is milliseconds.
        if numeric.abs() >= 100_000_000_000 {
            return DateTime::from_timestamp_millis(numeric);
        }
        return DateTime::from_timestamp(numeric, 0);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

/// Guards the callback endpoint against replayed deliveries.
///
/// Checks run in a fixed order so rejection reasons are deterministic:
/// header presence, then timestamp parse, then staleness, then the nonce
/// ledger. The ledger insert happens last so stale junk never consumes a
/// nonce slot.
pub struct ReplayGuard {
    ledger: Arc<dyn NonceLedger>,
    policy: ReplayPolicy,
}

impl ReplayGuard {
    pub fn new(ledger: Arc<dyn NonceLedger>, policy: ReplayPolicy) -> Self {
        Self { ledger, policy }
    }

    pub async fn check(
        &self,
        nonce: Option<&str>,
        timestamp: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), ReplayError> {
        if self.policy.require_nonce && (nonce.is_none() || timestamp.is_none()) {
            return Err(ReplayError::MissingHeaders);
        }

        // A nonce without a timestamp has no staleness backstop: once the
        // pruner drops the row, the same delivery would pass again. Reject
        // the combination even when headers are otherwise optional.
        if nonce.is_some() && timestamp.is_none() {
            return Err(ReplayError::MissingHeaders);
        }

        let mut callback_time = now;
        if let Some(raw_ts) = timestamp {
            let parsed = parse_callback_timestamp(raw_ts)
                .ok_or_else(|| ReplayError::UnparseableTimestamp(raw_ts.to_string()))?;
            let age_secs = (now - parsed).num_seconds().abs();
            if age_secs > self.policy.max_age_secs {
                return Err(ReplayError::StaleTimestamp {
                    age_secs,
                    max_age_secs: self.policy.max_age_secs,
                });
            }
            callback_time = parsed;
        }

        if let Some(nonce) = nonce {
            // Expiry is anchored to the callback's own timestamp: once the
            // window has passed, the staleness check rejects any replay, so
            // the nonce row is free to be pruned.
            let expires_at = callback_time + Duration::seconds(self.policy.max_age_secs);
            let fresh = self
                .ledger
                .try_record_nonce(nonce, now, expires_at)
                .await
                .map_err(|e| ReplayError::Ledger(e.to_string()))?;
            if !fresh {
                return Err(ReplayError::ReplayDetected(nonce.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_epoch_seconds() {
        let ts = parse_callback_timestamp("1700000000").unwrap();
        assert_eq!(ts, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn parses_epoch_millis() {
        let ts = parse_callback_timestamp("1700000000123").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn parses_rfc3339() {
        let ts = parse_callback_timestamp("2024-11-14T22:13:20Z").unwrap();
        assert_eq!(ts.timestamp(), 1_731_622_400);
    }

    #[test]
    fn parses_naive_iso8601() {
        let ts = parse_callback_timestamp("2024-11-14T22:13:20").unwrap();
        assert_eq!(ts.timestamp(), 1_731_622_400);
    }

    #[test]
    fn rejects_garbage_timestamp() {
        assert!(parse_callback_timestamp("next tuesday").is_none());
        assert!(parse_callback_timestamp("").is_none());
    }

    #[test]
    fn policy_keeps_configured_window() {
        let policy = ReplayPolicy::new(600, true);
        assert_eq!(policy.max_age_secs, 600);
        assert!(policy.require_nonce);
    }
}
