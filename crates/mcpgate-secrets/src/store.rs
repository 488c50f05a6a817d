//! The on-disk secret store.
//!
//! One JSON bundle per server at `<dir>/<serverId>.env.json` (mode 0600,
//! directory 0700). Saves go through a temp file and an atomic rename so a
//! reader never observes a partial write. Decrypted values are cached for
//! five minutes; the cache is invalidated by save and delete.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::crypto::{CryptoError, EncryptedBlob, MasterKey};
use crate::summary::SecretSummary;

/// How long decrypted variables stay cached.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Bundle format version.
const BUNDLE_VERSION: u32 = 1;

/// File name of the master key inside the storage directory.
const MASTER_KEY_FILE: &str = "master.key";

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("secret file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("secret bundle is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Where bundles live, in decreasing order of durability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// The preferred persistent directory.
    Persistent(PathBuf),
    /// A tmpfs directory; bundles survive restarts but not reboots.
    Ephemeral(PathBuf),
    /// No durable storage at all; bundles die with the process.
    MemoryOnly,
}

impl StorageMode {
    /// The backing directory, when one exists.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        match self {
            Self::Persistent(dir) | Self::Ephemeral(dir) => Some(dir),
            Self::MemoryOnly => None,
        }
    }
}

/// Bundle bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub key_count: usize,
    pub version: u32,
}

/// Persisted document: one per server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    pub server_id: String,
    pub last_updated: DateTime<Utc>,
    pub variables: BTreeMap<String, EncryptedBlob>,
    pub metadata: BundleMetadata,
}

struct CacheEntry {
    expires_at: Instant,
    vars: BTreeMap<String, String>,
}

/// Encrypted per-server secret storage with an in-memory cache.
pub struct SecretStore {
    mode: StorageMode,
    master: MasterKey,
    cache: RwLock<HashMap<String, CacheEntry>>,
    /// Backing map for [`StorageMode::MemoryOnly`].
    memory: RwLock<HashMap<String, SecretBundle>>,
}

impl SecretStore {
    /// Open the store, degrading through storage modes as needed.
    ///
    /// Tries `preferred` (persistent), then `fallback` (tmpfs, with a
    /// warning), then memory-only (with a louder warning). Summaries and
    /// loads behave identically across modes.
    #[must_use]
    pub fn open(preferred: &Path, fallback: &Path) -> Self {
        match Self::try_dir(preferred) {
            Ok(master) => {
                return Self::new(StorageMode::Persistent(preferred.to_path_buf()), master);
            }
            Err(e) => {
                warn!(
                    dir = %preferred.display(),
                    error = %e,
                    "secret directory not usable, falling back to tmpfs"
                );
            }
        }

        match Self::try_dir(fallback) {
            Ok(master) => Self::new(StorageMode::Ephemeral(fallback.to_path_buf()), master),
            Err(e) => {
                error!(
                    dir = %fallback.display(),
                    error = %e,
                    "no writable secret directory; secrets will NOT survive a restart"
                );
                Self::new(StorageMode::MemoryOnly, MasterKey::generate())
            }
        }
    }

    fn new(mode: StorageMode, master: MasterKey) -> Self {
        Self {
            mode,
            master,
            cache: RwLock::new(HashMap::new()),
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// Prepare a storage directory (0700) and load or create its master key.
    fn try_dir(dir: &Path) -> Result<MasterKey, SecretStoreError> {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }

        // Probe writability before committing to this directory.
        let probe = dir.join(".write-probe");
        fs::write(&probe, b"")?;
        fs::remove_file(&probe)?;

        Ok(MasterKey::load_or_generate(&dir.join(MASTER_KEY_FILE))?)
    }

    /// The active storage mode.
    #[must_use]
    pub const fn mode(&self) -> &StorageMode {
        &self.mode
    }

    /// Load and decrypt all variables for a server.
    ///
    /// A missing bundle is an empty map, not an error. Individual values that
    /// fail to decrypt (key rotation, key-file loss) are logged and skipped;
    /// the remaining values are still returned.
    pub async fn load(&self, server_id: &str) -> Result<BTreeMap<String, String>, SecretStoreError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(server_id) {
                if entry.expires_at > Instant::now() {
                    return Ok(entry.vars.clone());
                }
            }
        }

        let Some(bundle) = self.read_bundle(server_id).await? else {
            return Ok(BTreeMap::new());
        };

        let mut vars = BTreeMap::new();
        for (name, blob) in &bundle.variables {
            match self.master.decrypt(blob) {
                Ok(value) => {
                    vars.insert(name.clone(), value);
                }
                Err(e) => {
                    warn!(
                        server_id = %server_id,
                        variable = %name,
                        error = %e,
                        "skipping undecryptable secret"
                    );
                }
            }
        }

        self.cache.write().await.insert(
            server_id.to_string(),
            CacheEntry {
                expires_at: Instant::now() + CACHE_TTL,
                vars: vars.clone(),
            },
        );

        Ok(vars)
    }

    /// Encrypt and persist the full variable set for a server.
    pub async fn save(
        &self,
        server_id: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), SecretStoreError> {
        let mut variables = BTreeMap::new();
        for (name, value) in vars {
            variables.insert(name.clone(), self.master.encrypt(value)?);
        }

        let bundle = SecretBundle {
            server_id: server_id.to_string(),
            last_updated: Utc::now(),
            metadata: BundleMetadata {
                key_count: variables.len(),
                version: BUNDLE_VERSION,
            },
            variables,
        };

        self.write_bundle(server_id, &bundle).await?;
        self.cache.write().await.remove(server_id);
        debug!(server_id = %server_id, keys = bundle.metadata.key_count, "saved secret bundle");
        Ok(())
    }

    /// Set one variable, preserving the rest of the bundle.
    pub async fn set(
        &self,
        server_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), SecretStoreError> {
        let mut vars = self.load(server_id).await?;
        vars.insert(key.to_string(), value.to_string());
        self.save(server_id, &vars).await
    }

    /// Remove one variable. Removing the last variable keeps an empty bundle.
    pub async fn unset(&self, server_id: &str, key: &str) -> Result<(), SecretStoreError> {
        let mut vars = self.load(server_id).await?;
        if vars.remove(key).is_some() {
            self.save(server_id, &vars).await?;
        }
        Ok(())
    }

    /// Delete a server's bundle entirely.
    pub async fn delete(&self, server_id: &str) -> Result<(), SecretStoreError> {
        match &self.mode {
            StorageMode::MemoryOnly => {
                self.memory.write().await.remove(server_id);
            }
            mode => {
                if let Some(dir) = mode.dir() {
                    let path = bundle_path(dir, server_id);
                    if path.exists() {
                        fs::remove_file(&path)?;
                    }
                }
            }
        }
        self.cache.write().await.remove(server_id);
        Ok(())
    }

    /// Key names, masked placeholders, and inferred types. Never plaintext.
    pub async fn summary(&self, server_id: &str) -> Result<Vec<SecretSummary>, SecretStoreError> {
        let Some(bundle) = self.read_bundle(server_id).await? else {
            return Ok(Vec::new());
        };
        Ok(bundle
            .variables
            .keys()
            .map(|name| SecretSummary::from_name(name))
            .collect())
    }

    async fn read_bundle(&self, server_id: &str) -> Result<Option<SecretBundle>, SecretStoreError> {
        match &self.mode {
            StorageMode::MemoryOnly => Ok(self.memory.read().await.get(server_id).cloned()),
            StorageMode::Persistent(dir) | StorageMode::Ephemeral(dir) => {
                let path = bundle_path(dir, server_id);
                if !path.exists() {
                    return Ok(None);
                }
                let content = fs::read(&path)?;
                Ok(Some(serde_json::from_slice(&content)?))
            }
        }
    }

    async fn write_bundle(
        &self,
        server_id: &str,
        bundle: &SecretBundle,
    ) -> Result<(), SecretStoreError> {
        match &self.mode {
            StorageMode::MemoryOnly => {
                self.memory
                    .write()
                    .await
                    .insert(server_id.to_string(), bundle.clone());
                Ok(())
            }
            StorageMode::Persistent(dir) | StorageMode::Ephemeral(dir) => {
                let path = bundle_path(dir, server_id);
                let tmp = dir.join(format!("{}.env.json.tmp", sanitize_id(server_id)));

                let json = serde_json::to_vec_pretty(bundle)?;
                fs::write(&tmp, &json)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
                }
                // Atomic replace: readers see either the old or the new bundle.
                fs::rename(&tmp, &path)?;
                Ok(())
            }
        }
    }

    #[cfg(test)]
    async fn expire_cache(&self, server_id: &str) {
        if let Some(entry) = self.cache.write().await.get_mut(server_id) {
            entry.expires_at = Instant::now();
        }
    }
}

/// Bundle file for a server id, with path-hostile characters replaced.
fn bundle_path(dir: &Path, server_id: &str) -> PathBuf {
    dir.join(format!("{}.env.json", sanitize_id(server_id)))
}

fn sanitize_id(server_id: &str) -> String {
    server_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn persistent_store(dir: &TempDir) -> SecretStore {
        let store = SecretStore::open(&dir.path().join("secrets"), &dir.path().join("tmp"));
        assert!(matches!(store.mode(), StorageMode::Persistent(_)));
        store
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);

        let input = vars(&[("API_KEY", "sk-123"), ("ENDPOINT", "https://x")]);
        store.save("memory", &input).await.unwrap();
        assert_eq!(store.load("memory").await.unwrap(), input);
    }

    #[tokio::test]
    async fn load_missing_bundle_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        assert!(store.load("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn values_are_not_plaintext_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store
            .save("memory", &vars(&[("API_KEY", "super-secret-value")]))
            .await
            .unwrap();

        let path = dir.path().join("secrets").join("memory.env.json");
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("super-secret-value"));
        assert!(raw.contains("aes-256-gcm"));
        assert!(raw.contains("\"keyCount\": 1"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn bundle_file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("memory", &vars(&[("A", "1")])).await.unwrap();

        let path = dir.path().join("secrets").join("memory.env.json");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn set_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("s", &vars(&[("A", "1")])).await.unwrap();
        store.set("s", "B", "2").await.unwrap();
        assert_eq!(store.load("s").await.unwrap(), vars(&[("A", "1"), ("B", "2")]));
    }

    #[tokio::test]
    async fn unset_removes_only_named_key() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("s", &vars(&[("A", "1"), ("B", "2")])).await.unwrap();
        store.unset("s", "A").await.unwrap();
        assert_eq!(store.load("s").await.unwrap(), vars(&[("B", "2")]));
    }

    #[tokio::test]
    async fn delete_removes_bundle() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("s", &vars(&[("A", "1")])).await.unwrap();
        store.delete("s").await.unwrap();
        assert!(store.load("s").await.unwrap().is_empty());
        assert!(!dir.path().join("secrets").join("s.env.json").exists());
    }

    #[tokio::test]
    async fn cache_serves_after_file_removal_until_invalidated() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("s", &vars(&[("A", "1")])).await.unwrap();

        // Prime the cache.
        assert_eq!(store.load("s").await.unwrap().len(), 1);

        // Remove the file behind the store's back: cache still answers.
        std::fs::remove_file(dir.path().join("secrets").join("s.env.json")).unwrap();
        assert_eq!(store.load("s").await.unwrap().len(), 1);

        // Once expired, the empty truth shows through.
        store.expire_cache("s").await;
        assert!(store.load("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partially_undecryptable_bundle_returns_surviving_keys() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("s", &vars(&[("GOOD", "ok"), ("BAD", "x")])).await.unwrap();

        // Corrupt one ciphertext on disk.
        let path = dir.path().join("secrets").join("s.env.json");
        let mut bundle: SecretBundle =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        bundle.variables.get_mut("BAD").unwrap().ciphertext = "AAAAAAAAAAAAAAAAAAAA".into();
        std::fs::write(&path, serde_json::to_vec(&bundle).unwrap()).unwrap();
        store.expire_cache("s").await;

        let loaded = store.load("s").await.unwrap();
        assert_eq!(loaded, vars(&[("GOOD", "ok")]));
    }

    #[tokio::test]
    async fn no_tmp_file_left_behind_after_save() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("s", &vars(&[("A", "1")])).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("secrets"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn stale_tmp_file_does_not_shadow_last_complete_save() {
        // Simulates a crash after the temp write but before the rename: the
        // persisted bundle must still be the last fully completed save.
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("s", &vars(&[("A", "committed")])).await.unwrap();

        std::fs::write(
            dir.path().join("secrets").join("s.env.json.tmp"),
            b"{\"partial\":",
        )
        .unwrap();
        store.expire_cache("s").await;

        assert_eq!(store.load("s").await.unwrap(), vars(&[("A", "committed")]));
    }

    #[tokio::test]
    async fn memory_only_mode_round_trips() {
        let dir = TempDir::new().unwrap();
        // Point both candidates at a path under a file, which cannot be a directory.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let store = SecretStore::open(&blocker.join("a"), &blocker.join("b"));
        assert!(matches!(store.mode(), StorageMode::MemoryOnly));

        store.save("s", &vars(&[("A", "1")])).await.unwrap();
        assert_eq!(store.load("s").await.unwrap(), vars(&[("A", "1")]));
        assert_eq!(store.summary("s").await.unwrap().len(), 1);
        store.delete("s").await.unwrap();
        assert!(store.load("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_never_contains_values() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store
            .save("s", &vars(&[("OPENAI_API_KEY", "sk-abc")]))
            .await
            .unwrap();
        let summaries = store.summary("s").await.unwrap();
        assert_eq!(summaries.len(), 1);
        let json = serde_json::to_string(&summaries).unwrap();
        assert!(!json.contains("sk-abc"));
    }

    #[tokio::test]
    async fn ids_with_path_separators_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = persistent_store(&dir);
        store.save("../evil", &vars(&[("A", "1")])).await.unwrap();
        assert!(dir.path().join("secrets").join(".._evil.env.json").exists());
    }
}
