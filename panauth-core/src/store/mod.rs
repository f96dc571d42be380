//! Credential persistence.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialStore`] - Trait for the configuration sink credentials are saved to
//! - [`MemoryCredentialStore`] - In-memory implementation for testing
//! - [`FileCredentialStore`] - JSON file implementation
//! - [`KeyringCredentialStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select backend based on availability
//!
//! Every change to an account's token pair (refresh, relay login, relay renewal)
//! is written through [`CredentialStore::save_credentials`] before it is adopted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use zeroize::Zeroize;

use crate::model::{AccountId, Credentials};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringCredentialStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// I/O error reading or writing a file backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// Configuration directory not available.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

/// Everything persisted for one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Secret>,

    /// Session id of a pending relay (QR/TV) authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

impl AccountRecord {
    /// The stored token pair, if a refresh token is present.
    pub fn credentials(&self) -> Option<Credentials> {
        let refresh = self.refresh_token.as_ref().filter(|t| !t.is_empty())?;
        Some(Credentials {
            refresh_token: refresh.clone(),
            access_token: self.access_token.clone().unwrap_or_default(),
        })
    }
}

/// The external "save configuration" sink.
///
/// Implementations include:
/// - [`MemoryCredentialStore`] - In-memory storage for testing
/// - [`FileCredentialStore`] - A JSON file keyed by account
/// - [`KeyringCredentialStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the record of an account.
    ///
    /// Returns `Ok(None)` if nothing was saved for the account.
    async fn load(&self, account: &AccountId) -> Result<Option<AccountRecord>, StoreError>;

    /// Replace the record of an account.
    async fn save(&self, account: &AccountId, record: &AccountRecord) -> Result<(), StoreError>;

    /// Delete the record of an account.
    ///
    /// Returns `Ok(())` even if nothing was stored.
    async fn delete(&self, account: &AccountId) -> Result<(), StoreError>;

    /// Persist a new token pair, keeping the rest of the record.
    async fn save_credentials(
        &self,
        account: &AccountId,
        credentials: &Credentials,
    ) -> Result<(), StoreError> {
        let mut record = self.load(account).await?.unwrap_or_default();
        record.refresh_token = Some(credentials.refresh_token.clone());
        record.access_token = Some(credentials.access_token.clone());
        self.save(account, &record).await
    }

    /// Persist the session id of a pending relay authorization.
    async fn save_sid(&self, account: &AccountId, sid: &str) -> Result<(), StoreError> {
        let mut record = self.load(account).await?.unwrap_or_default();
        record.sid = Some(sid.to_string());
        self.save(account, &record).await
    }
}

/// Create a credential store with automatic backend selection.
///
/// - If `prefer_keyring` is `true` and the `keyring-store` feature is enabled,
///   a [`KeyringCredentialStore`] is tried first.
/// - Otherwise, or if the keyring is unavailable, credentials go to a
///   [`FileCredentialStore`] at `fallback_path`.
pub fn create_store(
    prefer_keyring: bool,
    fallback_path: PathBuf,
) -> Result<Box<dyn CredentialStore>, StoreError> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringCredentialStore::try_new("panauth") {
            Ok(store) => {
                tracing::info!("Using OS keyring for credential storage");
                return Ok(Box::new(store));
            }
            Err(e) => {
                tracing::warn!(
                    "Keyring unavailable ({}), falling back to file store at {:?}",
                    e,
                    fallback_path
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "Keyring storage requested but keyring-store feature not enabled. \
             Using file store."
        );
    }

    tracing::debug!("Using file credential storage at {:?}", fallback_path);
    Ok(Box::new(FileCredentialStore::load_from_path(fallback_path)?))
}
