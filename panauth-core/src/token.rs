//! Credential ownership and delegation.
//!
//! This module provides:
//! - [`TokenProvider`] - What the request executor needs from an account's credentials
//! - [`CredentialOwner`] - Owns a token pair, renews it and persists every change
//! - [`DelegatedCredentials`] - A view forwarding every token operation to another provider
//! - [`Renewal`] - How an owner renews: OAuth refresh exchange or the QR/TV relay
//!
//! Two drives backed by the same physical account should share one owner
//! through delegation, so that only one of them ever rotates the refresh token.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ClientConfig;
use crate::model::{AccountId, Credentials};
use crate::oauth::{RelayAuthFlow, RelayGrant, TokenRefresher};
use crate::store::{CredentialStore, Secret, StoreError};

/// Error type for token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token endpoint answered with a structured error.
    #[error("failed to refresh token: {message}")]
    RefreshFailed { message: String },

    /// The exchange succeeded but returned no refresh token.
    #[error("failed to refresh token: refresh token is empty")]
    EmptyRefreshToken,

    /// Old and new refresh tokens belong to different subjects.
    #[error("failed to refresh token: subject mismatch ({current} -> {received})")]
    IdentityMismatch { current: String, received: String },

    /// A refresh token could not be decoded as a JWT.
    #[error("not a jwt token: {message}")]
    MalformedToken { message: String },

    /// The account holds no refresh token to renew with.
    #[error("no refresh token available for {account}")]
    NoRefreshToken { account: String },

    /// The user has to approve the login out of band.
    #[error("authorization required, open {auth_url} to approve this device")]
    AuthorizationRequired { auth_url: String },

    /// The QR/TV login has not completed yet.
    #[error("failed to get auth code: {status}")]
    LoginPending { status: String },

    /// The relay flow is not configured for this account.
    #[error("relay authorization not configured for {account}")]
    RelayNotConfigured { account: String },

    /// The relay's encrypted payload could not be decoded.
    #[error("failed to decrypt relay payload: {message}")]
    Decrypt { message: String },

    /// A response did not have the expected shape.
    #[error("invalid token response: {message}")]
    InvalidResponse { message: String },

    /// Network error during an exchange.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Storage error while persisting credentials.
    #[error("storage error: {0}")]
    StorageError(#[from] StoreError),
}

impl TokenError {
    /// Failures that retrying the same exchange cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IdentityMismatch { .. } | Self::MalformedToken { .. } | Self::NoRefreshToken { .. }
        )
    }
}

/// Source of an account's bearer token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The account the credentials belong to.
    fn account(&self) -> &AccountId;

    /// The current token pair.
    async fn credentials(&self) -> Result<Credentials, TokenError>;

    /// The current access token (possibly empty before the first renewal).
    async fn access_token(&self) -> Result<Secret, TokenError> {
        Ok(self.credentials().await?.access_token)
    }

    /// Renew the token pair, persist it and return it.
    async fn refresh(&self) -> Result<Credentials, TokenError>;

    /// Renew the token pair unless the access token already differs from
    /// `failed_with`, the token a rejected call was sent with.
    async fn refresh_if_stale(&self, failed_with: &Secret) -> Result<Credentials, TokenError> {
        let current = self.credentials().await?;
        if current.access_token != *failed_with && !current.access_token.is_empty() {
            return Ok(current);
        }
        self.refresh().await
    }
}

/// How a [`CredentialOwner`] renews its tokens.
#[derive(Debug)]
pub enum Renewal {
    /// Refresh-token exchange against the OAuth-style endpoint.
    OAuth(TokenRefresher),

    /// `refresh_token=` exchange through the QR/TV relay.
    Relay(RelayAuthFlow),
}

impl Renewal {
    /// Pick the renewal method the configuration asks for.
    pub fn from_config(config: &ClientConfig, http: reqwest::Client) -> Self {
        if config.use_relay_auth {
            Self::Relay(RelayAuthFlow::new(http, config.endpoints.clone()))
        } else {
            Self::OAuth(TokenRefresher::from_config(config, http))
        }
    }
}

/// Owns the canonical token pair of one account.
pub struct CredentialOwner {
    account: AccountId,
    credentials: parking_lot::RwLock<Credentials>,
    renewal: Renewal,
    store: Arc<dyn CredentialStore>,
    renew_lock: tokio::sync::Mutex<()>,
}

impl CredentialOwner {
    pub fn new(
        account: AccountId,
        credentials: Credentials,
        renewal: Renewal,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            account,
            credentials: parking_lot::RwLock::new(credentials),
            renewal,
            store,
            renew_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create an owner from whatever the store holds for `account`.
    ///
    /// An account without stored tokens starts empty; it needs
    /// [`authorize`](Self::authorize) or an explicit token before use.
    pub async fn from_store(
        account: AccountId,
        renewal: Renewal,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, TokenError> {
        let credentials = store
            .load(&account)
            .await?
            .and_then(|record| record.credentials())
            .unwrap_or_else(|| Credentials::new("", ""));
        Ok(Self::new(account, credentials, renewal, store))
    }

    pub fn renewal(&self) -> &Renewal {
        &self.renewal
    }

    /// Persist and adopt a new token pair.
    async fn adopt(&self, credentials: Credentials) -> Result<(), TokenError> {
        self.store
            .save_credentials(&self.account, &credentials)
            .await?;
        *self.credentials.write() = credentials;
        tracing::info!("Token exchange completed for {}", self.account);
        Ok(())
    }

    /// Replace the token pair by hand (initial configuration).
    pub async fn set_credentials(&self, credentials: Credentials) -> Result<(), TokenError> {
        self.adopt(credentials).await
    }

    /// Log in through the QR/TV relay.
    ///
    /// Without a pending session id this requests one, persists it and fails
    /// with [`TokenError::AuthorizationRequired`] carrying the link the user
    /// must open. With a pending session id it polls the login status, exchanges
    /// the auth code and adopts the resulting credentials.
    pub async fn authorize(&self) -> Result<Credentials, TokenError> {
        let Renewal::Relay(relay) = &self.renewal else {
            return Err(TokenError::RelayNotConfigured {
                account: self.account.to_string(),
            });
        };

        let mut record = self.store.load(&self.account).await?.unwrap_or_default();
        let Some(sid) = record.sid.clone().filter(|sid| !sid.is_empty()) else {
            let pending = relay.request_sid().await?;
            self.store.save_sid(&self.account, &pending.sid).await?;
            tracing::info!("Relay login started for {}", self.account);
            return Err(TokenError::AuthorizationRequired {
                auth_url: pending.auth_url,
            });
        };

        let auth_code = relay.poll_login_status(&sid).await?;
        let credentials = relay
            .exchange_with_retries(RelayGrant::AuthCode(auth_code))
            .await?;

        record.sid = None;
        record.refresh_token = Some(credentials.refresh_token.clone());
        record.access_token = Some(credentials.access_token.clone());
        self.store.save(&self.account, &record).await?;
        *self.credentials.write() = credentials.clone();
        tracing::info!("Relay login completed for {}", self.account);
        Ok(credentials)
    }

    /// Forget a pending relay login so the next `authorize` starts over.
    pub async fn clear_pending_authorization(&self) -> Result<(), TokenError> {
        if let Some(mut record) = self.store.load(&self.account).await? {
            record.sid = None;
            self.store.save(&self.account, &record).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CredentialOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialOwner")
            .field("account", &self.account)
            .field("renewal", &self.renewal)
            .finish()
    }
}

#[async_trait]
impl TokenProvider for CredentialOwner {
    fn account(&self) -> &AccountId {
        &self.account
    }

    async fn credentials(&self) -> Result<Credentials, TokenError> {
        Ok(self.credentials.read().clone())
    }

    async fn refresh(&self) -> Result<Credentials, TokenError> {
        let observed = self.credentials.read().access_token.clone();
        self.refresh_if_stale(&observed).await
    }

    async fn refresh_if_stale(&self, failed_with: &Secret) -> Result<Credentials, TokenError> {
        let _guard = self.renew_lock.lock().await;

        let current = self.credentials.read().clone();
        if current.access_token != *failed_with && !current.access_token.is_empty() {
            tracing::debug!("Tokens for {} were renewed while waiting", self.account);
            return Ok(current);
        }
        if current.refresh_token.is_empty() {
            return Err(TokenError::NoRefreshToken {
                account: self.account.to_string(),
            });
        }

        let renewed = match &self.renewal {
            Renewal::OAuth(refresher) => refresher.refresh(&current).await?,
            Renewal::Relay(relay) => {
                relay
                    .exchange_with_retries(RelayGrant::RefreshToken(
                        current.refresh_token.expose().to_string(),
                    ))
                    .await?
            }
        };

        self.adopt(renewed.clone()).await?;
        Ok(renewed)
    }
}

/// A credential view that forwards to the provider owning the token pair.
#[derive(Clone)]
pub struct DelegatedCredentials {
    reference: Arc<dyn TokenProvider>,
}

impl DelegatedCredentials {
    pub fn new(reference: Arc<dyn TokenProvider>) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> &Arc<dyn TokenProvider> {
        &self.reference
    }
}

impl std::fmt::Debug for DelegatedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedCredentials")
            .field("account", self.reference.account())
            .finish()
    }
}

#[async_trait]
impl TokenProvider for DelegatedCredentials {
    fn account(&self) -> &AccountId {
        self.reference.account()
    }

    async fn credentials(&self) -> Result<Credentials, TokenError> {
        self.reference.credentials().await
    }

    async fn access_token(&self) -> Result<Secret, TokenError> {
        self.reference.access_token().await
    }

    async fn refresh(&self) -> Result<Credentials, TokenError> {
        self.reference.refresh().await
    }

    async fn refresh_if_stale(&self, failed_with: &Secret) -> Result<Credentials, TokenError> {
        self.reference.refresh_if_stale(failed_with).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiVariant, Endpoints};
    use crate::store::MemoryCredentialStore;

    fn owner(credentials: Credentials, store: Arc<dyn CredentialStore>) -> CredentialOwner {
        let config = ClientConfig {
            variant: ApiVariant::DeviceSession,
            endpoints: Endpoints::all("http://127.0.0.1:9"),
            ..ClientConfig::default()
        };
        let renewal = Renewal::from_config(&config, reqwest::Client::new());
        CredentialOwner::new(AccountId::new("u1"), credentials, renewal, store)
    }

    #[tokio::test]
    async fn test_delegate_forwards_credentials() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let owner: Arc<dyn TokenProvider> = Arc::new(owner(Credentials::new("r", "a"), store));
        let delegate = DelegatedCredentials::new(owner.clone());

        assert_eq!(delegate.account(), owner.account());
        assert_eq!(delegate.access_token().await.unwrap().expose(), "a");
    }

    #[tokio::test]
    async fn test_set_credentials_persists() {
        let store = Arc::new(MemoryCredentialStore::new());
        let owner = owner(Credentials::new("", ""), store.clone());

        owner
            .set_credentials(Credentials::new("r2", "a2"))
            .await
            .unwrap();

        let record = store.load(&AccountId::new("u1")).await.unwrap().unwrap();
        assert_eq!(record.credentials().unwrap(), Credentials::new("r2", "a2"));
        assert_eq!(owner.access_token().await.unwrap().expose(), "a2");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let owner = owner(Credentials::new("", ""), store);

        let result = owner.refresh().await;
        assert!(matches!(result, Err(TokenError::NoRefreshToken { .. })));
    }

    #[tokio::test]
    async fn test_authorize_requires_relay() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let owner = owner(Credentials::new("", ""), store);

        let result = owner.authorize().await;
        assert!(matches!(result, Err(TokenError::RelayNotConfigured { .. })));
    }

    #[tokio::test]
    async fn test_from_store_loads_record() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save_credentials(&AccountId::new("u1"), &Credentials::new("r", "a"))
            .await
            .unwrap();

        let owner = CredentialOwner::from_store(
            AccountId::new("u1"),
            Renewal::OAuth(TokenRefresher::from_config(
                &ClientConfig::default(),
                reqwest::Client::new(),
            )),
            store,
        )
        .await
        .unwrap();

        assert_eq!(owner.credentials().await.unwrap(), Credentials::new("r", "a"));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TokenError::IdentityMismatch {
            current: "a".into(),
            received: "b".into()
        }
        .is_fatal());
        assert!(!TokenError::EmptyRefreshToken.is_fatal());
    }
}
