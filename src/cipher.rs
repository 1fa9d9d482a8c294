//! Credential encryption for stored SSH passwords.
//!
//! ChaCha20-Poly1305 with a random 96-bit nonce per message. The stored text
//! is `base64(nonce || ciphertext || tag)`, so any tampering or a wrong key
//! fails authentication and decryption returns an error instead of garbage.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable holding the credential key.
pub const KEY_ENV_VAR: &str = "TRANSITCTL_CREDENTIAL_KEY";

/// Development-only key used when [`KEY_ENV_VAR`] is unset. Anything encrypted
/// with it is effectively plaintext to whoever has this source.
const DEV_KEY: [u8; 32] = *b"transitctl-dev-key-do-not-deploy";

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Invalid key or corrupted ciphertext")]
    InvalidKeyOrCorrupt,
    #[error("Ciphertext is not valid base64")]
    InvalidEncoding,
    #[error("Ciphertext too short")]
    CiphertextTooShort,
}

/// Symmetric key for credential storage.
#[derive(Clone)]
pub struct CredentialKey {
    bytes: [u8; 32],
    development: bool,
}

impl std::fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialKey")
            .field("development", &self.development)
            .finish_non_exhaustive()
    }
}

impl CredentialKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            bytes,
            development: false,
        }
    }

    /// Interpret an operator-supplied secret.
    ///
    /// A base64 string decoding to exactly 32 bytes (as printed by
    /// `transitctl gen-key`) is used as-is; any other string is hashed with
    /// SHA-256.
    pub fn from_secret(secret: &str) -> Self {
        let trimmed = secret.trim();
        if let Ok(decoded) = BASE64.decode(trimmed) {
            if let Ok(bytes) = <[u8; 32]>::try_from(decoded.as_slice()) {
                return Self::from_bytes(bytes);
            }
        }
        Self::from_bytes(Sha256::digest(trimmed.as_bytes()).into())
    }

    /// The embedded development key.
    pub fn development() -> Self {
        Self {
            bytes: DEV_KEY,
            development: true,
        }
    }

    /// Load from [`KEY_ENV_VAR`], falling back to the development key with a
    /// warning. Called once at startup.
    pub fn from_env() -> Self {
        match std::env::var(KEY_ENV_VAR) {
            Ok(secret) if !secret.trim().is_empty() => {
                info!("Loaded credential key from {KEY_ENV_VAR}");
                Self::from_secret(&secret)
            }
            _ => {
                warn!(
                    "{KEY_ENV_VAR} not set, using the built-in development key. \
                     Set {KEY_ENV_VAR} before storing real credentials"
                );
                Self::development()
            }
        }
    }

    pub fn is_development(&self) -> bool {
        self.development
    }
}

/// Generate a fresh random key, base64 encoded.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Encrypt `plaintext` for storage.
pub fn encrypt(plaintext: &str, key: &CredentialKey) -> Result<String, CipherError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes)
        .map_err(|_| CipherError::EncryptionFailed)?;
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CipherError::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt a value produced by [`encrypt`].
pub fn decrypt(ciphertext: &str, key: &CredentialKey) -> Result<String, CipherError> {
    let blob = BASE64
        .decode(ciphertext.trim())
        .map_err(|_| CipherError::InvalidEncoding)?;
    if blob.len() < NONCE_LEN {
        return Err(CipherError::CiphertextTooShort);
    }
    let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes)
        .map_err(|_| CipherError::InvalidKeyOrCorrupt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| CipherError::InvalidKeyOrCorrupt)?;
    String::from_utf8(plaintext).map_err(|_| CipherError::InvalidKeyOrCorrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let key = CredentialKey::from_bytes([7u8; 32]);
        for secret in ["p", "hunter2", "pässwörd with spaces", "🔑"] {
            let sealed = encrypt(secret, &key).unwrap();
            assert_ne!(sealed, secret);
            assert_eq!(decrypt(&sealed, &key).unwrap(), secret);
        }
    }

    #[test]
    fn test_nonce_makes_ciphertexts_differ() {
        let key = CredentialKey::from_bytes([7u8; 32]);
        assert_ne!(
            encrypt("same", &key).unwrap(),
            encrypt("same", &key).unwrap()
        );
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let sealed = encrypt("secret", &CredentialKey::from_bytes([1u8; 32])).unwrap();
        let err = decrypt(&sealed, &CredentialKey::from_bytes([2u8; 32])).unwrap_err();
        assert_eq!(err, CipherError::InvalidKeyOrCorrupt);
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = CredentialKey::from_bytes([3u8; 32]);
        let sealed = encrypt("secret", &key).unwrap();
        let mut blob = BASE64.decode(&sealed).unwrap();
        blob.truncate(blob.len() - 1);
        assert_eq!(
            decrypt(&BASE64.encode(&blob), &key),
            Err(CipherError::InvalidKeyOrCorrupt)
        );
        assert_eq!(
            decrypt(&BASE64.encode([0u8; 5]), &key),
            Err(CipherError::CiphertextTooShort)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = CredentialKey::from_bytes([4u8; 32]);
        let mut blob = BASE64.decode(encrypt("secret", &key).unwrap()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(decrypt(&BASE64.encode(&blob), &key).is_err());
    }

    #[test]
    fn test_not_base64() {
        let key = CredentialKey::development();
        assert_eq!(
            decrypt("%%% not base64 %%%", &key),
            Err(CipherError::InvalidEncoding)
        );
    }

    #[test]
    fn test_generated_key_is_used_verbatim() {
        let encoded = generate_key();
        let key = CredentialKey::from_secret(&encoded);
        let raw: [u8; 32] = BASE64.decode(&encoded).unwrap().try_into().unwrap();
        assert_eq!(key.bytes, raw);
        assert!(!key.is_development());
    }

    #[test]
    fn test_passphrase_is_hashed() {
        let a = CredentialKey::from_secret("correct horse battery staple");
        let b = CredentialKey::from_secret("correct horse battery staple");
        assert_eq!(a.bytes, b.bytes);
        let sealed = encrypt("x", &a).unwrap();
        assert_eq!(decrypt(&sealed, &b).unwrap(), "x");
    }
}
