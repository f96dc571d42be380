//! # panauth core
//!
//! Self-healing authenticated request layer for the Alipan cloud drive APIs.
//!
//! This crate provides:
//! - An executor that attaches credentials, classifies provider errors and
//!   repairs the token pair or device session once before retrying
//! - Per-account device session state with secp256k1 request signing
//! - Token renewal by refresh-token exchange or through the QR/TV relay
//! - Credential delegation between drives sharing one physical account
//! - Marker-paginated listing and batched move/rename on top of the executor
//! - Pluggable credential persistence (memory, JSON file, OS keyring)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use panauth_core::{
//!     AccountId, ApiClient, ClientConfig, CredentialOwner, Drive, MemoryCredentialStore,
//!     Renewal, SessionStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn list_root(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
//!     let http = panauth_core::build_http_client(&config)?;
//!     let store = Arc::new(MemoryCredentialStore::new());
//!     let renewal = Renewal::from_config(&config, http.clone());
//!     let owner = CredentialOwner::from_store(AccountId::new("user-1"), renewal, store).await?;
//!
//!     let client = ApiClient::with_http(http, config, Arc::new(owner), Arc::new(SessionStore::new()));
//!     let drive = Drive::new(client);
//!     for entry in drive.list_all("root", &CancellationToken::new()).await? {
//!         println!("{}", entry.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod drive;
pub mod envelope;
pub mod error;
pub mod hook;
pub mod model;
pub mod oauth;
pub mod session;
pub mod store;
pub mod token;

// Re-export commonly used types at crate root
pub use model::{
    AccountId,
    BatchRequest,
    BatchResponse,
    Credentials,
    EntryKind,
    FileEntry,
    FilePage,
};

pub use config::{
    ApiVariant,
    ClientConfig,
    Endpoints,
    OAuthConfig,
};

pub use envelope::{
    ErrorEnvelope,
    Recovery,
};

pub use session::{
    DeviceSessionSigner,
    SessionError,
    SessionState,
    SessionStore,
};

pub use store::{
    AccountRecord,
    CredentialStore,
    FileCredentialStore,
    MemoryCredentialStore,
    Secret,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringCredentialStore;

pub use token::{
    CredentialOwner,
    DelegatedCredentials,
    Renewal,
    TokenError,
    TokenProvider,
};

pub use oauth::{
    PendingAuthorization,
    RelayAuthFlow,
    RelayGrant,
    TokenRefresher,
};

pub use client::{
    ApiClient,
    ApiRequest,
    build_http_client,
};

pub use drive::{
    DirectoryOps,
    Drive,
    remove_duplicates,
};

pub use hook::SignatureHook;

pub use error::RequestError;
