//! JSON file credential storage.
//!
//! Records are kept in a single pretty-printed JSON file, by default
//! `~/.local/share/panauth/credentials.json` on Linux and the platform
//! equivalent elsewhere.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::{AccountRecord, CredentialStore, StoreError};
use crate::model::AccountId;

/// On-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    /// Version of the file format (for future migrations).
    version: u32,

    /// Records keyed by account id.
    accounts: BTreeMap<String, AccountRecord>,
}

impl Default for CredentialFile {
    fn default() -> Self {
        Self {
            version: 1,
            accounts: BTreeMap::new(),
        }
    }
}

/// Disk-backed credential store.
///
/// The whole file is cached in memory and rewritten on every change.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is safe to
/// share across threads via `Arc`.
pub struct FileCredentialStore {
    path: PathBuf,
    data: Arc<RwLock<CredentialFile>>,
}

impl FileCredentialStore {
    /// Get the default storage path for credentials.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "panauth", "panauth")
            .ok_or(StoreError::ConfigDirUnavailable)?;
        Ok(dirs.data_dir().join("credentials.json"))
    }

    /// Load the store from the default location.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the store from a specific path.
    ///
    /// Creates the parent directories if they don't exist; the file itself is
    /// written on the first save.
    pub fn load_from_path(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            CredentialFile::default()
        };

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, data: &CredentialFile) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    fn lock_error(e: impl std::fmt::Display) -> StoreError {
        StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        }
    }
}

impl std::fmt::Debug for FileCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCredentialStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, account: &AccountId) -> Result<Option<AccountRecord>, StoreError> {
        let data = self.data.read().map_err(Self::lock_error)?;
        Ok(data.accounts.get(account.as_str()).cloned())
    }

    async fn save(&self, account: &AccountId, record: &AccountRecord) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(Self::lock_error)?;
        data.accounts
            .insert(account.as_str().to_string(), record.clone());
        self.write_file(&data)
    }

    async fn delete(&self, account: &AccountId) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(Self::lock_error)?;
        if data.accounts.remove(account.as_str()).is_some() {
            self.write_file(&data)?;
        }
        Ok(())
    }
}
