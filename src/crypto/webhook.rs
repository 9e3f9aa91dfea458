use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{verify_signature, CryptoError};

type HmacSha256 = Hmac<Sha256>;

/// Inbound webhook signature formats this core can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookScheme {
    /// `X-Webhook-Signature: <hex>` over the raw body.
    HmacSha256,
    /// `Stripe-Signature: t=<ts>,v1=<sig>` over `<ts>.<body>`.
    Stripe,
    /// `X-Hub-Signature-256: sha256=<hex>` over the raw body.
    GitHub,
}

fn hex_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn constant_time_hex_eq(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() == 1
}

/// Verify an inbound webhook signature in constant time.
pub fn verify_webhook(
    scheme: WebhookScheme,
    secret: &[u8],
    header_value: &str,
    body: &[u8],
    now_unix: i64,
) -> Result<(), CryptoError> {
    match scheme {
        WebhookScheme::HmacSha256 => {
            if constant_time_hex_eq(&hex_hmac(secret, body), header_value) {
                Ok(())
            } else {
                Err(CryptoError::SignatureMismatch)
            }
        }
        WebhookScheme::Stripe => verify_signature(secret, header_value, body, now_unix),
        WebhookScheme::GitHub => {
            let provided = header_value
                .strip_prefix("sha256=")
                .ok_or_else(|| CryptoError::MalformedSignature("missing sha256= prefix".into()))?;
            if constant_time_hex_eq(&hex_hmac(secret, body), provided) {
                Ok(())
            } else {
                Err(CryptoError::SignatureMismatch)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign_request;

    const SECRET: &[u8] = b"webhook-secret";

    #[test]
    fn plain_hmac_scheme() {
        let body = br#"{"event":"contact.created"}"#;
        let header = hex_hmac(SECRET, body);
        verify_webhook(WebhookScheme::HmacSha256, SECRET, &header, body, 0).unwrap();
        assert!(verify_webhook(WebhookScheme::HmacSha256, SECRET, "bad", body, 0).is_err());
    }

    #[test]
    fn stripe_scheme() {
        let body = b"stripe event";
        let header = sign_request(SECRET, 1_700_000_000, body);
        verify_webhook(WebhookScheme::Stripe, SECRET, &header, body, 1_700_000_000).unwrap();
    }

    #[test]
    fn github_scheme() {
        let body = b"push event";
        let header = format!("sha256={}", hex_hmac(SECRET, body));
        verify_webhook(WebhookScheme::GitHub, SECRET, &header, body, 0).unwrap();

        let err = verify_webhook(WebhookScheme::GitHub, SECRET, "nope", body, 0).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedSignature(_)));
    }
}
