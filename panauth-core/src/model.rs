//! Domain model types for panauth.
//!
//! This module defines the core types shared by the request layer:
//! - [`AccountId`] - Identifier of one logical cloud account
//! - [`Credentials`] - The refresh/access token pair of an account
//! - [`FileEntry`] / [`FilePage`] - Listing wire shapes
//! - [`BatchRequest`] / [`BatchResponse`] - Batch mutation wire shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::store::Secret;

/// Identifier for one logical cloud account (the provider's user id).
///
/// Session state and persisted credentials are keyed by this value.
///
/// # Examples
///
/// ```
/// use panauth_core::AccountId;
///
/// let account = AccountId::new("8f2e61b7c0a94f");
/// assert_eq!(account.as_str(), "8f2e61b7c0a94f");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new account ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the account ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The refresh/access token pair owned by an account's configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Long-lived token used to mint new access tokens.
    pub refresh_token: Secret,

    /// Short-lived bearer token attached to API calls.
    pub access_token: Secret,
}

impl Credentials {
    /// Create a credential pair.
    pub fn new(refresh_token: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            refresh_token: Secret::new(refresh_token),
            access_token: Secret::new(access_token),
        }
    }

    /// Credentials that only carry a refresh token; the first call will renew.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self::new(refresh_token, "")
    }
}

/// Kind of a drive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// A single entry returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub drive_id: String,

    pub file_id: String,

    #[serde(default)]
    pub parent_file_id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: EntryKind,

    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// One page of a cursor-paginated listing.
///
/// An empty `next_marker` terminates pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilePage {
    #[serde(default)]
    pub items: Vec<FileEntry>,

    #[serde(default)]
    pub next_marker: String,
}

/// One inner request of a batch envelope.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequestItem {
    pub id: String,
    pub method: String,
    pub url: String,
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub body: serde_json::Value,
}

/// Batch envelope sent to the batch endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub requests: Vec<BatchRequestItem>,
    pub resource: String,
}

/// One inner response of a batch reply.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponseItem {
    #[serde(default)]
    pub id: String,

    #[serde(default, deserialize_with = "status_code")]
    pub status: i64,
}

/// Accepts the inner status as a number or a numeric string.
fn status_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Status {
        Number(i64),
        Text(String),
    }

    Ok(match Status::deserialize(deserializer)? {
        Status::Number(status) => status,
        Status::Text(status) => status.trim().parse().unwrap_or_default(),
    })
}

impl BatchResponseItem {
    /// Inner statuses in `100..400` count as success.
    pub fn is_success(&self) -> bool {
        (100..400).contains(&self.status)
    }
}

/// Batch reply as returned by the batch endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub responses: Vec<BatchResponseItem>,
}
