//! Drive-level call shapes built on the executor.
//!
//! This module provides:
//! - [`Drive::list_all`] - Marker-cursor listing of a folder
//! - [`Drive::move_or_rename`] - Single-item batch mutation
//! - [`Drive::refresh_drive_id`] - Adopt the drive id of the configured drive type
//! - [`remove_duplicates`] - Same-name cleanup through a [`DirectoryOps`] collaborator
//!
//! Nothing here touches token or session state directly; every call goes
//! through [`ApiClient`].

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::client::{ApiClient, ApiRequest};
use crate::config::ApiVariant;
use crate::error::RequestError;
use crate::model::{
    BatchRequest, BatchRequestItem, BatchResponse, BatchResponseItem, FileEntry, FilePage,
};

/// Page size requested by listings.
pub const LIST_LIMIT: u32 = 200;

/// Lifetime of thumbnail and download URLs embedded in legacy listings.
const URL_EXPIRE_SEC: u64 = 14_400;

/// One account's drive.
pub struct Drive {
    client: ApiClient,
    drive_id: RwLock<String>,
}

impl Drive {
    pub fn new(client: ApiClient) -> Self {
        let drive_id = client.config().drive_id.clone();
        Self {
            client,
            drive_id: RwLock::new(drive_id),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn drive_id(&self) -> String {
        self.drive_id.read().clone()
    }

    pub fn set_drive_id(&self, drive_id: impl Into<String>) {
        *self.drive_id.write() = drive_id.into();
    }

    fn list_url(&self) -> String {
        let endpoints = &self.client.config().endpoints;
        match self.client.config().variant {
            ApiVariant::DeviceSession => format!("{}/v2/file/list", endpoints.api),
            ApiVariant::Open => format!("{}/adrive/v1.0/openFile/list", endpoints.open_api),
        }
    }

    fn list_body(&self, parent_id: &str, marker: &str) -> Value {
        let config = self.client.config();
        let mut body = json!({
            "drive_id": self.drive_id(),
            "limit": LIST_LIMIT,
            "marker": marker,
            "order_by": config.order_by,
            "order_direction": config.order_direction,
            "parent_file_id": parent_id,
        });
        if config.variant == ApiVariant::DeviceSession {
            if let Some(fields) = body.as_object_mut() {
                fields.insert("fields".into(), json!("*"));
                fields.insert(
                    "image_thumbnail_process".into(),
                    json!("image/resize,w_400/format,jpeg"),
                );
                fields.insert(
                    "image_url_process".into(),
                    json!("image/resize,w_1920/format,jpeg"),
                );
                fields.insert(
                    "video_thumbnail_process".into(),
                    json!("video/snapshot,t_0,f_jpg,ar_auto,w_300"),
                );
                fields.insert("url_expire_sec".into(), json!(URL_EXPIRE_SEC));
            }
        }
        body
    }

    /// Fetch one page of `parent_id`. An empty marker requests the first page.
    pub async fn list_page(
        &self,
        parent_id: &str,
        marker: &str,
        cancel: &CancellationToken,
    ) -> Result<FilePage, RequestError> {
        let request = ApiRequest::post(self.list_url()).json(self.list_body(parent_id, marker));
        self.client.execute_json(&request, cancel).await
    }

    /// List every entry of `parent_id` in server order.
    ///
    /// Follows `next_marker` until it comes back empty. A failing page aborts
    /// the whole listing. More than `max_pages` pages fail with
    /// [`RequestError::PaginationLimit`].
    pub async fn list_all(
        &self,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileEntry>, RequestError> {
        let max_pages = self.client.config().max_pages;
        let mut entries = Vec::new();
        let mut marker = String::new();
        let mut pages = 0;

        loop {
            if pages >= max_pages {
                tracing::warn!("Listing of {} still has a marker after {} pages", parent_id, pages);
                return Err(RequestError::PaginationLimit { pages });
            }

            let page = self.list_page(parent_id, &marker, cancel).await?;
            pages += 1;
            entries.extend(page.items);

            if page.next_marker.is_empty() {
                break;
            }
            marker = page.next_marker;
        }

        tracing::debug!("Listed {} entries of {} in {} pages", entries.len(), parent_id, pages);
        Ok(entries)
    }

    fn batch_request(&self, source_id: &str, to_parent_id: &str, url: &str) -> BatchRequest {
        let drive_id = self.drive_id();
        let mut headers = Map::new();
        headers.insert("Content-Type".into(), json!("application/json"));

        BatchRequest {
            requests: vec![BatchRequestItem {
                id: source_id.to_string(),
                method: "POST".to_string(),
                url: url.to_string(),
                headers,
                body: json!({
                    "drive_id": drive_id,
                    "file_id": source_id,
                    "to_drive_id": drive_id,
                    "to_parent_file_id": to_parent_id,
                }),
            }],
            resource: "file".to_string(),
        }
    }

    /// Move (or rename, depending on `url`) one entry through the batch endpoint.
    ///
    /// The inner status of the first response decides the outcome; a failure
    /// carries the raw batch reply.
    pub async fn move_or_rename(
        &self,
        source_id: &str,
        to_parent_id: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RequestError> {
        let batch = serde_json::to_value(self.batch_request(source_id, to_parent_id, url))?;
        let request = ApiRequest::post(format!("{}/v3/batch", self.client.config().endpoints.api))
            .json(batch);
        let body = self.client.execute(&request, cancel).await?;

        let reply: BatchResponse = serde_json::from_slice(&body).unwrap_or_default();
        if reply
            .responses
            .first()
            .is_some_and(BatchResponseItem::is_success)
        {
            return Ok(());
        }
        Err(RequestError::BatchFailed {
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    /// Look up the drive id of the configured drive type and adopt it.
    pub async fn refresh_drive_id(&self, cancel: &CancellationToken) -> Result<String, RequestError> {
        let config = self.client.config();
        let request = ApiRequest::post(format!("{}/v2/user/get", config.endpoints.biz_api))
            .header("host", "user.alipan.com");
        let body = self.client.execute_signed(request, cancel).await?;

        let info: Value = serde_json::from_slice(&body)?;
        let key = format!("{}_drive_id", config.drive_type);
        let drive_id = info
            .get(&key)
            .and_then(Value::as_str)
            .ok_or_else(|| RequestError::UnexpectedResponse {
                message: format!("user info has no {}", key),
            })?
            .to_string();

        tracing::info!("Using {} {} for {}", key, drive_id, self.client.account());
        self.set_drive_id(drive_id.clone());
        Ok(drive_id)
    }

    /// Decrypt an encrypted download URL through the signing hook.
    pub async fn decrypt_url(&self, encrypted_url: &str) -> Result<String, RequestError> {
        let hook = self.client.hook().ok_or_else(|| RequestError::Hook {
            message: "no hook address configured".to_string(),
        })?;
        hook.decrypt_url(encrypted_url).await
    }
}

impl std::fmt::Debug for Drive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("client", &self.client)
            .field("drive_id", &*self.drive_id.read())
            .finish()
    }
}

/// Path-based file operations provided by the surrounding filesystem layer.
#[async_trait]
pub trait DirectoryOps: Send + Sync {
    /// List the entries of the directory at `path`.
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>, RequestError>;

    /// Delete one entry.
    async fn remove(&self, entry: &FileEntry) -> Result<(), RequestError>;

    /// Create the directory at `path` unless it exists.
    async fn ensure_dir(&self, path: &str) -> Result<(), RequestError>;
}

/// Delete every entry named `name` under `parent_path` except `keep_id`.
///
/// An empty `parent_path` means the root. Returns the number of entries removed;
/// the first failed deletion aborts the cleanup.
pub async fn remove_duplicates(
    dir: &dyn DirectoryOps,
    parent_path: &str,
    name: &str,
    keep_id: &str,
    cancel: &CancellationToken,
) -> Result<usize, RequestError> {
    let parent_path = if parent_path.is_empty() { "/" } else { parent_path };

    let duplicates: Vec<FileEntry> = dir
        .list(parent_path)
        .await?
        .into_iter()
        .filter(|entry| entry.name == name && entry.file_id != keep_id)
        .collect();

    for entry in &duplicates {
        if cancel.is_cancelled() {
            return Err(RequestError::Cancelled);
        }
        dir.remove(entry).await?;
        tracing::debug!("Removed duplicate {} ({}) in {}", entry.name, entry.file_id, parent_path);
    }
    Ok(duplicates.len())
}
