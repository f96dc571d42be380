//! Refresh-token exchange.
//!
//! The legacy API refreshes against `{auth}/v2/account/token` with a bare
//! `{refresh_token, grant_type}` body. The open API refreshes against
//! `{open_api}/oauth/access_token` with the client identity attached, and its
//! refresh tokens are JWTs whose `sub` claim must survive rotation.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use serde_json::json;

use super::with_retries;
use crate::config::{ApiVariant, ClientConfig};
use crate::envelope::ErrorEnvelope;
use crate::model::Credentials;
use crate::store::Secret;
use crate::token::TokenError;

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    refresh_token: String,

    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
}

/// Exchanges a refresh token for a new token pair.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    verify_subject: bool,
}

impl TokenRefresher {
    /// Build the refresher matching the configured API variant.
    pub fn from_config(config: &ClientConfig, http: reqwest::Client) -> Self {
        match config.variant {
            ApiVariant::DeviceSession => Self {
                http,
                token_url: format!("{}/v2/account/token", config.endpoints.auth),
                client_id: String::new(),
                client_secret: String::new(),
                verify_subject: false,
            },
            ApiVariant::Open => {
                let token_url = match &config.oauth.token_url {
                    Some(url) if config.oauth.client_id.is_empty() => url.clone(),
                    _ => format!("{}/oauth/access_token", config.endpoints.open_api),
                };
                Self {
                    http,
                    token_url,
                    client_id: config.oauth.client_id.clone(),
                    client_secret: config.oauth.client_secret.clone(),
                    verify_subject: true,
                }
            }
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    fn request_body(&self, refresh_token: &Secret) -> serde_json::Value {
        if self.verify_subject {
            json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "grant_type": "refresh_token",
                "refresh_token": refresh_token.expose(),
            })
        } else {
            json!({
                "refresh_token": refresh_token.expose(),
                "grant_type": "refresh_token",
            })
        }
    }

    /// Run a single exchange.
    pub async fn exchange(&self, current: &Credentials) -> Result<Credentials, TokenError> {
        let response = self
            .http
            .post(&self.token_url)
            .json(&self.request_body(&current.refresh_token))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        tracing::debug!("Refresh response from {}: {}", self.token_url, status);

        if !status.is_success() {
            let envelope = ErrorEnvelope::parse(&body);
            let message = if envelope.is_error() {
                envelope.message
            } else {
                format!("bad status code {}", status)
            };
            return Err(TokenError::RefreshFailed { message });
        }

        let tokens: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| TokenError::InvalidResponse {
                message: e.to_string(),
            })?;
        if tokens.refresh_token.is_empty() {
            return Err(TokenError::EmptyRefreshToken);
        }

        if self.verify_subject {
            let current_sub = subject_of(current.refresh_token.expose())?;
            let received_sub = subject_of(&tokens.refresh_token)?;
            if current_sub != received_sub {
                return Err(TokenError::IdentityMismatch {
                    current: current_sub,
                    received: received_sub,
                });
            }
        }

        Ok(Credentials::new(tokens.refresh_token, tokens.access_token))
    }

    /// Exchange with up to three immediate retries.
    ///
    /// Subject mismatches and undecodable tokens are not retried.
    pub async fn refresh(&self, current: &Credentials) -> Result<Credentials, TokenError> {
        with_retries("refresh", || self.exchange(current)).await
    }
}

/// Decode the `sub` claim of a JWT without verifying it.
pub fn subject_of(token: &str) -> Result<String, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::MalformedToken {
            message: format!("expected 3 segments, got {}", segments.len()),
        });
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = STANDARD_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE_NO_PAD.decode(payload))
        .map_err(|e| TokenError::MalformedToken {
            message: format!("failed to decode jwt payload: {}", e),
        })?;

    let claims: Claims = serde_json::from_slice(&bytes).map_err(|e| TokenError::MalformedToken {
        message: format!("invalid jwt claims: {}", e),
    })?;
    Ok(claims.sub)
}
