use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Replay window for signed requests, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

fn hmac_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    let bytes = mac.finalize().into_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build a `t=<unix>,v1=<hex>` signature header over
/// `"<timestamp>.<body>"`.
pub fn sign_request(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    let mut message = timestamp.to_string().into_bytes();
    message.push(b'.');
    message.extend_from_slice(body);
    format!("t={timestamp},v1={}", hmac_hex(secret, &message))
}

/// Parsed form of the signature header: the timestamp plus every `v1`
/// entry (more than one is legal during key rotation).
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, CryptoError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| CryptoError::MalformedSignature("bad timestamp".into()))?,
                );
            }
            Some(("v1", value)) => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| CryptoError::MalformedSignature("missing t".into()))?;
    if signatures.is_empty() {
        return Err(CryptoError::MalformedSignature("missing v1".into()));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Verify a signature header against the raw request body.
///
/// The expected HMAC is compared against each provided `v1` in constant
/// time; a stale or future timestamp beyond the tolerance is rejected
/// before any comparison.
pub fn verify_signature(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now_unix: i64,
) -> Result<(), CryptoError> {
    let parsed = parse_header(header)?;

    if (now_unix - parsed.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(CryptoError::StaleTimestamp);
    }

    let mut message = parsed.timestamp.to_string().into_bytes();
    message.push(b'.');
    message.extend_from_slice(body);
    let expected = hmac_hex(secret, &message);

    for candidate in &parsed.signatures {
        if expected
            .as_bytes()
            .ct_eq(candidate.as_bytes())
            .unwrap_u8()
            == 1
        {
            return Ok(());
        }
    }

    Err(CryptoError::SignatureMismatch)
}
