//! Client of the external v2 signing collaborator.
//!
//! The legacy API's v2 signature and its encrypted download URLs are computed
//! by a separate service rather than in process. This module only speaks its
//! two endpoints; [`ApiClient::execute_signed`](crate::ApiClient::execute_signed)
//! decides when a signature is needed.

use serde_json::json;

use crate::error::RequestError;

/// Android client identity sent alongside v2 signatures.
pub const SIGNED_USER_AGENT: &str = "AliApp(AYSD/6.0.1) com.alicloud.databox/38172215 Channel/36176427979800@rimet_android_6.0.1 language/zh-CN /Android Mobile/samsung samsung+SM-G9810";

/// HTTP client for the signing collaborator at `address`.
#[derive(Debug, Clone)]
pub struct SignatureHook {
    http: reqwest::Client,
    address: String,
}

impl SignatureHook {
    pub fn new(http: reqwest::Client, address: impl Into<String>) -> Self {
        Self {
            http,
            address: address.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Compute the `x-signature-v2` value for one request.
    pub async fn sign_v2(
        &self,
        device_id: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<String, RequestError> {
        self.post(
            "encrypt",
            json!({
                "device_id": device_id,
                "timestamp": timestamp,
                "uuid": nonce,
            }),
        )
        .await
    }

    /// Decrypt an encrypted download URL.
    pub async fn decrypt_url(&self, encrypted_url: &str) -> Result<String, RequestError> {
        self.post("decrypt", json!({ "encrypt_url": encrypted_url }))
            .await
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String, RequestError> {
        let url = format!("{}/{}", self.address, path);
        let response = self.http.post(&url).json(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RequestError::Hook {
                message: format!("{} returned {}: {}", url, status, text),
            });
        }
        Ok(text)
    }
}
