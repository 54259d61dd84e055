use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::SignatureEnforcement;

type HmacSha256 = Hmac<Sha256>;

/// Result of verifying a callback signature.
///
/// `Unverified` means no shared secret is configured, so nothing could be
/// checked. It is distinct from `Invalid` so the audit log can tell
/// "we chose not to verify" apart from "verification failed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureOutcome {
    Valid,
    Invalid { reason: String },
    Unverified,
}

impl SignatureOutcome {
    /// Tri-state flag recorded on the audit row
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            SignatureOutcome::Valid => Some(true),
            SignatureOutcome::Invalid { .. } => Some(false),
            SignatureOutcome::Unverified => None,
        }
    }
}

/// Verify an HMAC-SHA256 callback signature against the raw request body.
///
/// The signed message is `timestamp + "." + body` when a timestamp header is
/// present, otherwise the body alone, so a valid signature also binds the
/// timestamp the sender claimed. A leading `sha256=` prefix on the header is
/// accepted and stripped. The digest is compared base64-encoded in constant
/// time.
pub fn verify_callback_signature(
    secret: Option<&str>,
    signature_header: Option<&str>,
    timestamp_header: Option<&str>,
    body: &[u8],
) -> SignatureOutcome {
    let Some(secret) = secret else {
        return SignatureOutcome::Unverified;
    };

    let Some(signature) = signature_header else {
        return SignatureOutcome::Invalid {
            reason: "missing signature header".to_string(),
        };
    };

    let presented = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if presented.is_empty() {
        return SignatureOutcome::Invalid {
            reason: "empty signature header".to_string(),
        };
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => {
            return SignatureOutcome::Invalid {
                reason: "invalid signing key".to_string(),
            }
        }
    };
    if let Some(timestamp) = timestamp_header {
        mac.update(timestamp.as_bytes());
        mac.update(b".");
    }
    mac.update(body);
    let expected = BASE64.encode(mac.finalize().into_bytes());

    if secure_eq(presented.as_bytes(), expected.as_bytes()) {
        SignatureOutcome::Valid
    } else {
        SignatureOutcome::Invalid {
            reason: "signature mismatch".to_string(),
        }
    }
}

/// Constant-time byte comparison
fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Signature configuration bound into the callback handler.
///
/// In `Require` mode an invalid or missing signature rejects the request; in
/// `LogOnly` mode it is recorded on the audit row but processing continues.
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    pub secret: Option<String>,
    pub enforcement: SignatureEnforcement,
}

impl SignaturePolicy {
    pub fn new(secret: Option<String>, enforcement: SignatureEnforcement) -> Self {
        Self { secret, enforcement }
    }

    pub fn verify(
        &self,
        signature_header: Option<&str>,
        timestamp_header: Option<&str>,
        body: &[u8],
    ) -> SignatureOutcome {
        verify_callback_signature(self.secret.as_deref(), signature_header, timestamp_header, body)
    }

    pub fn enforced(&self) -> bool {
        matches!(self.enforcement, SignatureEnforcement::Require)
    }
}
