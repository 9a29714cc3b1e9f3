use crate::config::WebhookConfig;
use crate::error::{LedgerError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Checks provider webhook signatures: hex HMAC-SHA256 of the raw body under
/// the provider's shared secret.
#[derive(Debug, Clone, Default)]
pub struct WebhookVerifier {
    config: WebhookConfig,
}

impl WebhookVerifier {
    pub fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// Hex signature of `body` under `secret`.
    pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| LedgerError::ValidationError("invalid HMAC key".to_string()))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Fails with `InvalidSignature` on a mismatch, a malformed signature, or
    /// a provider without a configured secret.
    pub fn verify(&self, provider: &str, body: &[u8], signature: &str) -> Result<()> {
        let secret = self
            .config
            .secret_for(provider)
            .ok_or(LedgerError::InvalidSignature)?;
        let signature = signature.trim();
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        let provided = hex::decode(signature).map_err(|_| LedgerError::InvalidSignature)?;

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| LedgerError::InvalidSignature)?;
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            Ok(())
        } else {
            Err(LedgerError::InvalidSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(WebhookConfig {
            secrets: HashMap::from([("razorpay".to_string(), "whsec_test".to_string())]),
        })
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2.
        let signature = WebhookVerifier::sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"externalRef":"ORD-2026-000001","status":"captured"}"#;
        let signature = WebhookVerifier::sign("whsec_test", body).unwrap();
        assert!(verifier().verify("razorpay", body, &signature).is_ok());
        assert!(verifier().verify("RazorPay", body, &format!("sha256={signature}")).is_ok());
    }

    #[test]
    fn test_tampered_body() {
        let body = br#"{"externalRef":"ORD-2026-000001","status":"captured"}"#;
        let signature = WebhookVerifier::sign("whsec_test", body).unwrap();
        let tampered = br#"{"externalRef":"ORD-2026-000002","status":"captured"}"#;
        assert!(matches!(
            verifier().verify("razorpay", tampered, &signature),
            Err(LedgerError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_secret_garbage_and_unknown_provider() {
        let body = b"{}";
        let foreign = WebhookVerifier::sign("other", body).unwrap();
        assert!(verifier().verify("razorpay", body, &foreign).is_err());
        assert!(verifier().verify("razorpay", body, "not-hex").is_err());
        assert!(verifier().verify("razorpay", body, "abcd").is_err());
        let own = WebhookVerifier::sign("whsec_test", body).unwrap();
        assert!(matches!(
            verifier().verify("paytm", body, &own),
            Err(LedgerError::InvalidSignature)
        ));
    }
}
