//! On-disk credential store
//!
//! A single JSON document mapping provider id to credential record. The
//! in-memory map is authoritative during a request; every `put` rewrites the
//! file atomically. Load failures degrade to an empty store with a warning,
//! never an error.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::{AuthError, Result};
use crate::record::Credential;

/// Shared credential store backed by `auth.json`
pub struct CredentialStore {
    path: PathBuf,
    records: RwLock<HashMap<String, Credential>>,
    /// Per-provider write locks so a refresh never races a concurrent edit
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialStore {
    /// Resolve the primary credential file location
    ///
    /// `${XDG_CONFIG_HOME:-$HOME/.config}/ai-gateway/auth.json`
    pub fn default_path() -> PathBuf {
        let config_dir = std::env::var_os("XDG_CONFIG_HOME").map_or_else(
            || dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config"),
            PathBuf::from,
        );
        config_dir.join("ai-gateway").join("auth.json")
    }

    /// Legacy read-only fallback consulted when the primary file is absent
    fn fallback_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("pi").join("auth.json"))
    }

    /// Load the store from the default location
    pub fn load_default() -> Self {
        let primary = Self::default_path();
        if primary.exists() {
            return Self::load_from(primary);
        }
        if let Some(fallback) = Self::fallback_path()
            && fallback.exists()
        {
            let records = read_records(&fallback);
            // Writes still target the primary location
            return Self::with_records(primary, records);
        }
        Self::with_records(primary, HashMap::new())
    }

    /// Load the store from an explicit path
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = read_records(&path);
        Self::with_records(path, records)
    }

    fn with_records(path: PathBuf, records: HashMap<String, Credential>) -> Self {
        Self {
            path,
            records: RwLock::new(records),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the credential record for a provider
    pub async fn get(&self, provider_id: &str) -> Option<Credential> {
        self.records.read().await.get(provider_id).cloned()
    }

    /// Snapshot of every stored record
    pub async fn list(&self) -> HashMap<String, Credential> {
        self.records.read().await.clone()
    }

    /// Insert or replace a provider record and rewrite the file atomically
    pub async fn put(&self, provider_id: &str, credential: Credential) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(provider_id.to_owned(), credential);
        write_records(&self.path, &records)
    }

    /// Remove a provider record, rewriting the file
    pub async fn remove(&self, provider_id: &str) -> Result<Option<Credential>> {
        let mut records = self.records.write().await;
        let removed = records.remove(provider_id);
        if removed.is_some() {
            write_records(&self.path, &records)?;
        }
        Ok(removed)
    }

    /// Per-provider mutex serializing refresh writers
    pub async fn provider_lock(&self, provider_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(provider_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Read the credential map, degrading to empty on any failure
fn read_records(path: &Path) -> HashMap<String, Credential> {
    if !path.exists() {
        return HashMap::new();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "credential file unreadable, starting empty");
            return HashMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "credential file malformed, starting empty");
            HashMap::new()
        }
    }
}

/// Atomically replace the credential file
fn write_records(path: &Path, records: &HashMap<String, Credential>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AuthError::Storage(format!("no parent directory for {}", path.display())))?;

    std::fs::create_dir_all(parent).map_err(|e| AuthError::Storage(format!("create dir failed: {e}")))?;

    let content =
        serde_json::to_string_pretty(records).map_err(|e| AuthError::Storage(format!("serialize failed: {e}")))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| AuthError::Storage(format!("temp file failed: {e}")))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| AuthError::Storage(format!("write failed: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600));
    }

    tmp.persist(path)
        .map_err(|e| AuthError::Storage(format!("atomic replace failed: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CredentialKind;

    #[tokio::test]
    async fn put_then_get_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let store = CredentialStore::load_from(&path);
        store
            .put("openai", Credential::from_api_key("sk-test"))
            .await
            .unwrap();

        let reloaded = CredentialStore::load_from(&path);
        let cred = reloaded.get("openai").await.unwrap();
        assert_eq!(cred.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cred.kind, CredentialKind::Key);
    }

    #[tokio::test]
    async fn malformed_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = CredentialStore::load_from(&path);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load_from(dir.path().join("absent.json"));
        assert!(store.get("openai").await.is_none());
    }

    #[tokio::test]
    async fn remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let store = CredentialStore::load_from(&path);
        store.put("groq", Credential::from_api_key("gk")).await.unwrap();
        store.remove("groq").await.unwrap();

        let reloaded = CredentialStore::load_from(&path);
        assert!(reloaded.get("groq").await.is_none());
    }

    #[tokio::test]
    async fn provider_lock_is_stable_per_provider() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load_from(dir.path().join("auth.json"));

        let a = store.provider_lock("qwen-cli").await;
        let b = store.provider_lock("qwen-cli").await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
