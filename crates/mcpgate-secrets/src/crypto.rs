//! AES-256-GCM primitives for the secret store.
//!
//! A single 256-bit master key is persisted next to the bundles (mode 0600,
//! generated on first run). Every encrypted value carries its own random
//! 12-byte nonce, and a fixed associated-data string binds ciphertexts to
//! this store so blobs cannot be replayed into another consumer of the same
//! key file.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Nonce length for AES-GCM.
pub const NONCE_LENGTH: usize = 12;

/// Master key length (AES-256).
const KEY_LENGTH: usize = 32;

/// Algorithm tag written into every blob.
const ALGORITHM: &str = "aes-256-gcm";

/// Associated data binding ciphertexts to this store.
const ASSOCIATED_DATA: &[u8] = b"mcpgate.secret-store.v1";

/// Errors from key handling and encryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key file error: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("key file is corrupt: expected {KEY_LENGTH} bytes, found {0}")]
    KeyLength(usize),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("unsupported algorithm {0:?}")]
    Algorithm(String),
}

/// One encrypted value as persisted in a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    /// Base64 ciphertext, GCM tag appended.
    pub ciphertext: String,
    /// Base64 12-byte nonce.
    pub nonce: String,
    /// Algorithm tag, currently always "aes-256-gcm".
    pub algorithm: String,
    /// When the value was encrypted.
    pub encrypted_at: DateTime<Utc>,
}

/// The store's master key.
pub struct MasterKey {
    key: Key<Aes256Gcm>,
}

impl MasterKey {
    /// Load the key from `path`, generating and persisting a fresh one when
    /// the file does not exist.
    ///
    /// If the key file is later lost, existing bundles become undecryptable;
    /// the store logs and skips such values rather than failing.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.len() != KEY_LENGTH {
                return Err(CryptoError::KeyLength(bytes.len()));
            }
            return Ok(Self {
                key: *Key::<Aes256Gcm>::from_slice(&bytes),
            });
        }

        let key = Self::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, key.key.as_slice())?;
        restrict_permissions(path)?;
        Ok(key)
    }

    /// A random in-memory key (memory-only storage mode).
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self {
            key: *Key::<Aes256Gcm>::from_slice(&bytes),
        }
    }

    /// Encrypt one plaintext value into a self-describing blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBlob, CryptoError> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: ASSOCIATED_DATA,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(EncryptedBlob {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
            algorithm: ALGORITHM.to_string(),
            encrypted_at: Utc::now(),
        })
    }

    /// Decrypt one blob back into its plaintext value.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<String, CryptoError> {
        if blob.algorithm != ALGORITHM {
            return Err(CryptoError::Algorithm(blob.algorithm.clone()));
        }

        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|e| CryptoError::Decrypt(format!("invalid base64 ciphertext: {e}")))?;
        let nonce_bytes = BASE64
            .decode(&blob.nonce)
            .map_err(|e| CryptoError::Decrypt(format!("invalid base64 nonce: {e}")))?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(CryptoError::Decrypt(format!(
                "nonce length {} != {NONCE_LENGTH}",
                nonce_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: ciphertext.as_ref(),
                    aad: ASSOCIATED_DATA,
                },
            )
            .map_err(|_| CryptoError::Decrypt("authentication failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(format!("invalid UTF-8: {e}")))
    }
}

/// Set mode 0600 on the key file.
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = MasterKey::generate();
        let blob = key.encrypt("sk-test-12345").unwrap();
        assert_eq!(blob.algorithm, "aes-256-gcm");
        assert_eq!(key.decrypt(&blob).unwrap(), "sk-test-12345");
    }

    #[test]
    fn nonces_are_fresh_per_encryption() {
        let key = MasterKey::generate();
        let a = key.encrypt("same").unwrap();
        let b = key.encrypt("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let blob = MasterKey::generate().encrypt("value").unwrap();
        let other = MasterKey::generate();
        assert!(matches!(other.decrypt(&blob), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = MasterKey::generate();
        let mut blob = key.encrypt("value").unwrap();
        let mut bytes = BASE64.decode(&blob.ciphertext).unwrap();
        bytes[0] ^= 0xff;
        blob.ciphertext = BASE64.encode(bytes);
        assert!(key.decrypt(&blob).is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let key = MasterKey::generate();
        let mut blob = key.encrypt("value").unwrap();
        blob.algorithm = "rot13".to_string();
        assert!(matches!(key.decrypt(&blob), Err(CryptoError::Algorithm(_))));
    }

    #[test]
    fn key_is_persisted_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.key");

        let first = MasterKey::load_or_generate(&path).unwrap();
        let blob = first.encrypt("persisted").unwrap();

        let second = MasterKey::load_or_generate(&path).unwrap();
        assert_eq!(second.decrypt(&blob).unwrap(), "persisted");
    }

    #[test]
    #[cfg(unix)]
    fn key_file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.key");
        MasterKey::load_or_generate(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn truncated_key_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.key");
        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            MasterKey::load_or_generate(&path),
            Err(CryptoError::KeyLength(5))
        ));
    }
}
