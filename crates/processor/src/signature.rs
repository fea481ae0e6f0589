//! Verification of the processor's signed notification envelopes.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>` where the MAC covers
//! `"<t>.<raw body>"`. Several `v1` entries may be present during secret rotation.

use hmac::{Hmac, Mac};
use relay_core::{RelayError, RelayResult};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the notification signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify `header` against `payload` using the current time.
    pub fn verify(&self, payload: &[u8], header: &str) -> RelayResult<()> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> RelayResult<()> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = Some(t),
                Some(("v1", v)) => signatures.push(v),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| RelayError::AuthFailure("signature header missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(RelayError::AuthFailure(
                "signature header missing v1 signature".into(),
            ));
        }

        let signed_at: i64 = timestamp
            .parse()
            .map_err(|_| RelayError::AuthFailure("signature timestamp is not a number".into()))?;
        if now.abs_diff(signed_at) > self.tolerance_secs {
            return Err(RelayError::AuthFailure(
                "signature timestamp outside tolerance".into(),
            ));
        }

        let matched = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            self.mac(timestamp, payload)
                .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
        });

        if matched {
            Ok(())
        } else {
            Err(RelayError::AuthFailure("signature mismatch".into()))
        }
    }

    /// Produce a header value for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let digest = self
            .mac(&timestamp.to_string(), payload)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("t={timestamp},v1={digest}")
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Some(mac)
    }
}
