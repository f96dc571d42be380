//! In-memory credential storage implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{AccountRecord, CredentialStore, StoreError};
use crate::model::AccountId;

/// In-memory credential store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<AccountId, AccountRecord>>,
}

impl MemoryCredentialStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store with initial records.
    pub fn with_records(records: HashMap<AccountId, AccountRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.records.read().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("MemoryCredentialStore")
            .field("accounts_count", &count)
            .finish()
    }
}

fn poisoned(e: impl std::fmt::Display) -> StoreError {
    StoreError::BackendError {
        message: format!("lock poisoned: {}", e),
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, account: &AccountId) -> Result<Option<AccountRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(account).cloned())
    }

    async fn save(&self, account: &AccountId, record: &AccountRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(account.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, account: &AccountId) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.remove(account);
        Ok(())
    }
}
