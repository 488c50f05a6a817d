//! Encrypted per-server secret storage.
//!
//! Each managed server gets one JSON bundle on disk holding AES-256-GCM
//! encrypted environment variables. Bundles are written atomically (temp
//! file + rename) with restrictive permissions, decrypted values are cached
//! in memory with a short TTL, and the store degrades gracefully through
//! persistent -> tmpfs -> memory-only backends.

mod crypto;
mod store;
mod summary;

pub use crypto::{CryptoError, EncryptedBlob, MasterKey, NONCE_LENGTH};
pub use store::{BundleMetadata, SecretBundle, SecretStore, SecretStoreError, StorageMode};
pub use summary::{SecretSummary, SecretValueType};
