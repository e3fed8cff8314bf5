use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub invoice_ref: String,
    pub order_id: Uuid,
    pub status: PaymentStatus,
}

/// Hex-encoded HMAC-SHA256 of `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `signature` against the raw body in constant time. An empty secret
/// rejects everything.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), AppError> {
    if secret.is_empty() {
        return Err(AppError::Unauthorized(
            "webhook secret is not configured".to_string(),
        ));
    }
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;
    let expected = hex::decode(signature)
        .map_err(|_| AppError::Unauthorized("malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::Unauthorized("webhook signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"invoice_ref":"inv_1","status":"paid"}"#;

    #[test]
    fn valid_signature_passes() {
        let signature = sign(SECRET, BODY).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(SECRET, BODY, Some(&signature)).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign(SECRET, BODY).unwrap();
        let result = verify_signature(SECRET, b"{\"status\":\"paid\"}", Some(&signature));
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn missing_or_malformed_signature_is_rejected() {
        assert!(matches!(
            verify_signature(SECRET, BODY, None),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            verify_signature(SECRET, BODY, Some("not-hex")),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let signature = sign("", BODY).unwrap();
        assert!(matches!(
            verify_signature("", BODY, Some(&signature)),
            Err(AppError::Unauthorized(_))
        ));
    }
}
