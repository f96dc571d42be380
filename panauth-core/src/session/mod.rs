//! Per-account device session state.
//!
//! This module provides:
//! - [`SessionState`] - Device id, signing key, current signature and retry counter
//! - [`SessionStore`] - Concurrency-safe registry of session states by account
//! - [`DeviceSessionSigner`] - The per-account secp256k1 signer
//!
//! Each state sits behind its own async mutex. Holding it across a
//! session-creation round trip serialises creation per account, which keeps the
//! retry counter consistent under concurrent requests.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::model::AccountId;

mod signer;

pub use signer::{APP_ID, DeviceSessionSigner};

/// Session creation attempts allowed before the counter resets with an error.
pub const MAX_SESSION_ATTEMPTS: u32 = 3;

/// Error type for device session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Producing the signature failed.
    #[error("failed to sign device session: {message}")]
    Signing { message: String },

    /// Session creation failed on every allowed attempt.
    #[error("createSession failed after three retries")]
    RetriesExhausted,
}

/// Mutable device-session state of one account.
#[derive(Debug)]
pub struct SessionState {
    device_id: String,
    signer: DeviceSessionSigner,
    signature: String,
    retry_count: u32,
}

impl SessionState {
    /// Create a state with a fresh keypair and the account's stable device id.
    pub fn new(account: &AccountId) -> Self {
        Self::with_signer(account, DeviceSessionSigner::generate())
    }

    pub fn with_signer(account: &AccountId, signer: DeviceSessionSigner) -> Self {
        Self {
            device_id: hex::encode(Sha256::digest(account.as_str().as_bytes())),
            signer,
            signature: String::new(),
            retry_count: 0,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn public_key_hex(&self) -> String {
        self.signer.public_key_hex()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Recompute and store the signature for `account`.
    pub fn sign(&mut self, account: &AccountId) -> Result<&str, SessionError> {
        self.signature = self.signer.sign(&self.device_id, account)?;
        Ok(&self.signature)
    }

    /// Count one session-creation attempt.
    ///
    /// The attempt after the third consecutive failure resets the counter and
    /// fails with [`SessionError::RetriesExhausted`] without going out.
    pub fn begin_attempt(&mut self) -> Result<(), SessionError> {
        self.retry_count += 1;
        if self.retry_count > MAX_SESSION_ATTEMPTS {
            self.retry_count = 0;
            return Err(SessionError::RetriesExhausted);
        }
        Ok(())
    }

    /// Give back an attempt that never reached the provider.
    pub fn abandon_attempt(&mut self) {
        self.retry_count = self.retry_count.saturating_sub(1);
    }

    /// Record a successful session creation.
    pub fn reset_attempts(&mut self) {
        self.retry_count = 0;
    }
}

/// Shared handle to one account's state.
pub type SessionHandle = Arc<tokio::sync::Mutex<SessionState>>;

struct SessionEntry {
    state: SessionHandle,
    last_used: Instant,
}

/// Registry mapping accounts to their session state.
///
/// States are created lazily by [`ensure`](SessionStore::ensure) and live until
/// evicted explicitly or by [`evict_idle`](SessionStore::evict_idle).
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<AccountId, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an account's state without creating it.
    pub fn load(&self, account: &AccountId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock();
        sessions.get_mut(account).map(|entry| {
            entry.last_used = Instant::now();
            entry.state.clone()
        })
    }

    /// Get an account's state, creating it on first use.
    pub fn ensure(&self, account: &AccountId) -> SessionHandle {
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(account.clone()).or_insert_with(|| {
            tracing::debug!("Creating device session state for {}", account);
            SessionEntry {
                state: Arc::new(tokio::sync::Mutex::new(SessionState::new(account))),
                last_used: Instant::now(),
            }
        });
        entry.last_used = Instant::now();
        entry.state.clone()
    }

    /// Install a prepared state, replacing any existing one.
    pub fn insert(&self, account: AccountId, state: SessionState) -> SessionHandle {
        let handle = Arc::new(tokio::sync::Mutex::new(state));
        self.sessions.lock().insert(
            account,
            SessionEntry {
                state: handle.clone(),
                last_used: Instant::now(),
            },
        );
        handle
    }

    /// Drop an account's state. Returns whether one existed.
    pub fn evict(&self, account: &AccountId) -> bool {
        self.sessions.lock().remove(account).is_some()
    }

    /// Drop every state not touched for `max_idle`. Returns how many were dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() < max_idle);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("accounts_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_is_stable_per_account() {
        let account = AccountId::new("user-1");
        let a = SessionState::new(&account);
        let b = SessionState::new(&account);
        assert_eq!(a.device_id(), b.device_id());
        assert_eq!(a.device_id().len(), 64);
        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn test_fourth_attempt_fails_and_resets() {
        let mut state = SessionState::new(&AccountId::new("u"));

        for expected in 1..=3 {
            state.begin_attempt().unwrap();
            assert_eq!(state.retry_count(), expected);
        }

        let result = state.begin_attempt();
        assert!(matches!(result, Err(SessionError::RetriesExhausted)));
        assert_eq!(state.retry_count(), 0);
    }

    #[test]
    fn test_reset_attempts() {
        let mut state = SessionState::new(&AccountId::new("u"));
        state.begin_attempt().unwrap();
        state.begin_attempt().unwrap();
        state.reset_attempts();
        assert_eq!(state.retry_count(), 0);
    }

    #[test]
    fn test_abandon_attempt_gives_back_one() {
        let mut state = SessionState::new(&AccountId::new("u"));
        state.begin_attempt().unwrap();
        state.begin_attempt().unwrap();
        state.abandon_attempt();
        assert_eq!(state.retry_count(), 1);

        state.abandon_attempt();
        state.abandon_attempt();
        assert_eq!(state.retry_count(), 0);
    }

    #[test]
    fn test_sign_updates_signature() {
        let account = AccountId::new("u");
        let mut state = SessionState::new(&account);
        assert!(state.signature().is_empty());
        let signature = state.sign(&account).unwrap().to_string();
        assert_eq!(state.signature(), signature);
    }

    #[test]
    fn test_store_ensure_and_load() {
        let store = SessionStore::new();
        let account = AccountId::new("u");

        assert!(store.load(&account).is_none());
        let first = store.ensure(&account);
        let second = store.ensure(&account);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(store.load(&account).is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_insert_replaces_state() {
        let store = SessionStore::new();
        let account = AccountId::new("u");
        let generated = store.ensure(&account);

        let signer = DeviceSessionSigner::from_slice(&[7u8; 32]).unwrap();
        let public_key = signer.public_key_hex();
        let inserted = store.insert(account.clone(), SessionState::with_signer(&account, signer));

        assert!(!Arc::ptr_eq(&generated, &inserted));
        assert!(Arc::ptr_eq(&store.ensure(&account), &inserted));
        assert_eq!(inserted.lock().await.public_key_hex(), public_key);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_evict() {
        let store = SessionStore::new();
        let account = AccountId::new("u");
        store.ensure(&account);

        assert!(store.evict(&account));
        assert!(!store.evict(&account));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_evict_idle() {
        let store = SessionStore::new();
        store.ensure(&AccountId::new("a"));
        store.ensure(&AccountId::new("b"));

        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.evict_idle(Duration::ZERO), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_attempts_share_counter() {
        let store = Arc::new(SessionStore::new());
        let account = AccountId::new("u");

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let handle = store.ensure(&account);
            tasks.push(tokio::spawn(async move {
                handle.lock().await.begin_attempt().is_ok()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let handle = store.ensure(&account);
        assert_eq!(handle.lock().await.retry_count(), 3);
    }
}
