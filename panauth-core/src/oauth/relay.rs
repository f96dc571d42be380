//! QR/TV out-of-band login through the relay service.
//!
//! # Flow Overview
//!
//! 1. Ask the relay for a session id (SID) and show the user the authorization link
//! 2. The user approves the login on another device
//! 3. Poll the login status of the SID until it reports `LoginSuccess` and an auth code
//! 4. Exchange the auth code (or later, a refresh token) at the relay's token endpoint
//! 5. Decrypt the relay's AES-256-CBC payload into the token pair
//!
//! The relay encrypts its payload with a fixed key shared by every client of the
//! protocol; it is part of the wire format.

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

use super::with_retries;
use crate::config::Endpoints;
use crate::model::Credentials;
use crate::token::TokenError;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Scopes requested for relay logins.
pub const RELAY_SCOPES: &str = "user:base,file:all:read,file:all:write";

/// Size of the QR code the relay renders.
const QR_SIZE: u32 = 500;

const RELAY_KEY: &[u8; 32] = b"^(i/x>>5(ebyhumz*i1wkpk^orIs^Na.";

/// Time the provider needs to publish a SID's new status.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

const LOGIN_SUCCESS: &str = "LoginSuccess";

#[derive(Debug, Deserialize)]
struct SidResponse {
    data: SidData,
}

#[derive(Debug, Deserialize)]
struct SidData {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct LoginStatusResponse {
    #[serde(default)]
    status: String,

    #[serde(default, rename = "authCode")]
    auth_code: String,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    data: EncryptedPayload,
}

#[derive(Debug, Deserialize)]
struct EncryptedPayload {
    #[serde(default)]
    ciphertext: String,

    #[serde(default)]
    iv: String,
}

#[derive(Debug, Deserialize)]
struct DecryptedTokens {
    #[serde(default)]
    refresh_token: String,

    #[serde(default)]
    access_token: String,
}

/// A login waiting for the user's approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub sid: String,

    /// The link the user opens to approve the login.
    pub auth_url: String,
}

/// What the relay token endpoint is asked to exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayGrant {
    /// Auth code from a completed QR login.
    AuthCode(String),

    /// Existing refresh token, for renewal.
    RefreshToken(String),
}

impl RelayGrant {
    fn form(&self) -> [(&'static str, &str); 1] {
        match self {
            Self::AuthCode(code) => [("code", code.as_str())],
            Self::RefreshToken(token) => [("refresh_token", token.as_str())],
        }
    }
}

/// Client of the relay service.
#[derive(Debug, Clone)]
pub struct RelayAuthFlow {
    http: reqwest::Client,
    endpoints: Endpoints,
    settle_delay: Duration,
}

impl RelayAuthFlow {
    pub fn new(http: reqwest::Client, endpoints: Endpoints) -> Self {
        Self {
            http,
            endpoints,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Override the pause taken before reading a SID's status.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// The page a user opens to approve `sid`.
    pub fn authorization_url(&self, sid: &str) -> Result<String, TokenError> {
        let base = format!("{}/o/oauth/authorize", self.endpoints.authorize);
        let url = url::Url::parse_with_params(&base, &[("sid", sid)]).map_err(|e| {
            TokenError::InvalidResponse {
                message: format!("invalid authorization URL: {}", e),
            }
        })?;
        Ok(url.to_string())
    }

    /// Ask the relay for a new session id.
    pub async fn request_sid(&self) -> Result<PendingAuthorization, TokenError> {
        let response: SidResponse = self
            .http
            .post(format!("{}/aliyundrive/qrcode", self.endpoints.relay))
            .json(&json!({
                "scopes": RELAY_SCOPES,
                "width": QR_SIZE,
                "height": QR_SIZE,
            }))
            .send()
            .await?
            .json()
            .await?;

        if response.data.sid.is_empty() {
            return Err(TokenError::InvalidResponse {
                message: "relay returned an empty sid".to_string(),
            });
        }

        let auth_url = self.authorization_url(&response.data.sid)?;
        Ok(PendingAuthorization {
            sid: response.data.sid,
            auth_url,
        })
    }

    /// Read the login status of `sid`, returning the auth code once the user
    /// has approved.
    ///
    /// Any status other than `LoginSuccess` fails with
    /// [`TokenError::LoginPending`]; callers may poll again later.
    pub async fn poll_login_status(&self, sid: &str) -> Result<String, TokenError> {
        sleep(self.settle_delay).await;

        let response: LoginStatusResponse = self
            .http
            .get(format!("{}/oauth/qrcode/{}/status", self.endpoints.open_api, sid))
            .send()
            .await?
            .json()
            .await?;

        if response.status != LOGIN_SUCCESS {
            tracing::debug!("Relay login for sid {} not complete: {}", sid, response.status);
            return Err(TokenError::LoginPending {
                status: response.status,
            });
        }
        Ok(response.auth_code)
    }

    /// Run a single exchange at the relay token endpoint.
    pub async fn exchange(&self, grant: &RelayGrant) -> Result<Credentials, TokenError> {
        let response = self
            .http
            .post(format!("{}/aliyundrive/v2/token", self.endpoints.relay))
            .form(&grant.form())
            .send()
            .await?;

        let body = response.bytes().await?;
        let exchange: TokenExchangeResponse =
            serde_json::from_slice(&body).map_err(|e| TokenError::InvalidResponse {
                message: format!("{}: {}", e, String::from_utf8_lossy(&body)),
            })?;

        decrypt_payload(&exchange.data.ciphertext, &exchange.data.iv)
    }

    /// Exchange with up to three immediate retries.
    pub async fn exchange_with_retries(&self, grant: RelayGrant) -> Result<Credentials, TokenError> {
        with_retries("relay", || self.exchange(&grant)).await
    }
}

/// Decrypt the relay payload: base64 ciphertext, hex IV, AES-256-CBC, PKCS#7.
pub fn decrypt_payload(cipher_text: &str, iv: &str) -> Result<Credentials, TokenError> {
    let cipher = STANDARD
        .decode(cipher_text)
        .map_err(|e| TokenError::Decrypt {
            message: format!("invalid ciphertext: {}", e),
        })?;
    let iv = hex::decode(iv).map_err(|e| TokenError::Decrypt {
        message: format!("invalid iv: {}", e),
    })?;

    let plain = Aes256CbcDec::new_from_slices(RELAY_KEY, &iv)
        .map_err(|e| TokenError::Decrypt {
            message: format!("invalid iv length: {}", e),
        })?
        .decrypt_padded_vec_mut::<Pkcs7>(&cipher)
        .map_err(|e| TokenError::Decrypt {
            message: format!("bad padding: {}", e),
        })?;

    let tokens: DecryptedTokens =
        serde_json::from_slice(&plain).map_err(|e| TokenError::Decrypt {
            message: format!("invalid plaintext: {}", e),
        })?;
    if tokens.refresh_token.is_empty() {
        return Err(TokenError::EmptyRefreshToken);
    }
    Ok(Credentials::new(tokens.refresh_token, tokens.access_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    /// Encrypt `plain` the way the relay does; returns `(ciphertext, iv)`.
    fn encrypt_payload(plain: &str) -> (String, String) {
        let iv = [0x42u8; 16];
        let cipher = Aes256CbcEnc::new_from_slices(RELAY_KEY, &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
        (STANDARD.encode(cipher), hex::encode(iv))
    }

    #[test]
    fn test_decrypt_payload() {
        let (cipher, iv) =
            encrypt_payload(r#"{"refresh_token":"rt-1","access_token":"at-1","expires_in":7200}"#);
        let creds = decrypt_payload(&cipher, &iv).unwrap();
        assert_eq!(creds, Credentials::new("rt-1", "at-1"));
    }

    #[test]
    fn test_decrypt_payload_empty_refresh_token() {
        let (cipher, iv) = encrypt_payload(r#"{"refresh_token":"","access_token":"at"}"#);
        assert!(matches!(
            decrypt_payload(&cipher, &iv),
            Err(TokenError::EmptyRefreshToken)
        ));
    }

    #[test]
    fn test_decrypt_payload_rejects_bad_iv() {
        let (cipher, _) = encrypt_payload(r#"{"refresh_token":"r"}"#);
        assert!(matches!(
            decrypt_payload(&cipher, "zz"),
            Err(TokenError::Decrypt { .. })
        ));
        assert!(matches!(
            decrypt_payload(&cipher, "0011"),
            Err(TokenError::Decrypt { .. })
        ));
    }

    #[test]
    fn test_decrypt_payload_rejects_bad_base64() {
        assert!(matches!(
            decrypt_payload("***", &hex::encode([0u8; 16])),
            Err(TokenError::Decrypt { .. })
        ));
    }

    #[test]
    fn test_authorization_url() {
        let flow = RelayAuthFlow::new(reqwest::Client::new(), Endpoints::default());
        assert_eq!(
            flow.authorization_url("abc").unwrap(),
            "https://www.aliyundrive.com/o/oauth/authorize?sid=abc"
        );
    }

    #[test]
    fn test_grant_form() {
        assert_eq!(RelayGrant::AuthCode("c".into()).form(), [("code", "c")]);
        assert_eq!(
            RelayGrant::RefreshToken("r".into()).form(),
            [("refresh_token", "r")]
        );
    }
}
