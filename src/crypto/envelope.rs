use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;

use crate::config;

use super::CryptoError;

pub const ENVELOPE_ALGORITHM: &str = "AES-256-GCM";

const PBKDF2_ROUNDS: u32 = 100_000;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;

/// Wire form of one encrypted value. All byte fields are base64.
///
/// The GCM tag rides at the end of `ciphertext`, so integrity comes for
/// free on decrypt. `key_id` selects the master secret used for key
/// derivation, which lets stored payloads survive key rotation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub key_id: String,
    pub alg: String,
}

/// Resolves master secrets per key id.
///
/// Secrets registered with [`KeyRing::with_secret`] win; anything else is
/// looked up in process configuration at call time, so a missing secret is
/// a per-call error rather than a startup failure.
#[derive(Clone, Default)]
pub struct KeyRing {
    current_key_id: String,
    secrets: HashMap<String, SecretString>,
}

impl KeyRing {
    pub fn new(current_key_id: impl Into<String>) -> Self {
        Self {
            current_key_id: current_key_id.into(),
            secrets: HashMap::new(),
        }
    }

    /// Key ring configured from the environment: current key id plus the
    /// lazily-resolved master secrets.
    pub fn from_env() -> Self {
        Self::new(config::current_key_id())
    }

    pub fn with_secret(mut self, key_id: impl Into<String>, secret: SecretString) -> Self {
        self.secrets.insert(key_id.into(), secret);
        self
    }

    pub fn current_key_id(&self) -> &str {
        &self.current_key_id
    }

    fn secret_for(&self, key_id: &str) -> Result<SecretString, CryptoError> {
        if let Some(secret) = self.secrets.get(key_id) {
            return Ok(secret.clone());
        }
        config::master_secret(key_id).ok_or_else(|| CryptoError::UnknownKeyId(key_id.to_string()))
    }

    fn derive_key(&self, key_id: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
        let secret = self.secret_for(key_id)?;
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            secret.expose_secret().as_bytes(),
            salt,
            PBKDF2_ROUNDS,
            &mut key,
        );
        Ok(key)
    }

    /// Encrypt a JSON value under the secret named by `key_id`.
    ///
    /// A fresh salt and IV are drawn per call, so two envelopes of the same
    /// plaintext never compare equal.
    pub fn encrypt(&self, plaintext: &Value, key_id: &str) -> Result<EncryptedPayload, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);

        let key = self.derive_key(key_id, &salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::EncryptionFailed)?;

        let serialized = serde_json::to_vec(plaintext)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), serialized.as_ref())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(EncryptedPayload {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(iv),
            salt: BASE64.encode(salt),
            key_id: key_id.to_string(),
            alg: ENVELOPE_ALGORITHM.to_string(),
        })
    }

    /// Encrypt under the current key id.
    pub fn encrypt_current(&self, plaintext: &Value) -> Result<EncryptedPayload, CryptoError> {
        let key_id = self.current_key_id.clone();
        self.encrypt(plaintext, &key_id)
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Value, CryptoError> {
        if payload.alg != ENVELOPE_ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm(payload.alg.clone()));
        }

        let salt = BASE64.decode(&payload.salt)?;
        let iv = BASE64.decode(&payload.iv)?;
        let ciphertext = BASE64.decode(&payload.ciphertext)?;

        let key = self.derive_key(&payload.key_id, &salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::DecryptionFailed)?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Decrypt with the payload's (possibly legacy) key id and re-encrypt
    /// under the current one. Callers use this to migrate stored
    /// credentials lazily on access.
    pub fn re_encrypt(&self, payload: &EncryptedPayload) -> Result<EncryptedPayload, CryptoError> {
        let plaintext = self.decrypt(payload)?;
        self.encrypt_current(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_ring() -> KeyRing {
        KeyRing::new("key-v2")
            .with_secret("key-v2", SecretString::from("current master secret"))
            .with_secret("key-v1", SecretString::from("legacy service role key"))
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let ring = test_ring();
        let plaintext = json!({"access_token": "tok_123", "refresh_token": "ref_456"});

        let payload = ring.encrypt_current(&plaintext).unwrap();
        assert_eq!(payload.alg, ENVELOPE_ALGORITHM);
        assert_eq!(payload.key_id, "key-v2");

        assert_eq!(ring.decrypt(&payload).unwrap(), plaintext);
    }

    #[test]
    fn same_plaintext_yields_distinct_ciphertexts() {
        let ring = test_ring();
        let plaintext = json!("constant");
        let a = ring.encrypt_current(&plaintext).unwrap();
        let b = ring.encrypt_current(&plaintext).unwrap();
        assert_ne!((&a.ciphertext, &a.iv, &a.salt), (&b.ciphertext, &b.iv, &b.salt));
    }

    #[test]
    fn re_encrypt_migrates_key_id() {
        let ring = test_ring();
        let plaintext = json!({"api_key": "sk_live_abc"});

        let legacy = ring.encrypt(&plaintext, "key-v1").unwrap();
        let migrated = ring.re_encrypt(&legacy).unwrap();

        assert_eq!(migrated.key_id, "key-v2");
        assert_eq!(ring.decrypt(&migrated).unwrap(), plaintext);
    }

    #[test]
    fn unknown_key_id_is_a_per_call_error() {
        let ring = test_ring();
        let err = ring.encrypt(&json!(1), "key-v9").unwrap_err();
        assert!(matches!(err, CryptoError::UnknownKeyId(_)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let ring = test_ring();
        let mut payload = ring.encrypt_current(&json!("secret")).unwrap();
        let mut raw = BASE64.decode(&payload.ciphertext).unwrap();
        raw[0] ^= 0xff;
        payload.ciphertext = BASE64.encode(raw);
        assert!(matches!(
            ring.decrypt(&payload),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}
