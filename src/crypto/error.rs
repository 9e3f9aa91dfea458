use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("No master secret configured for key id: {0}")]
    UnknownKeyId(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed (wrong key or corrupted payload)")]
    DecryptionFailed,

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Malformed signature header: {0}")]
    MalformedSignature(String),

    #[error("Signature timestamp outside the allowed window")]
    StaleTimestamp,

    #[error("Signature mismatch")]
    SignatureMismatch,
}
