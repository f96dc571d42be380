//! Structured error responses and their recovery classes.

use serde::{Deserialize, Serialize};

use crate::config::ApiVariant;

/// The provider's `{code, message}` error body. An empty code means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub message: String,
}

/// Codes answered by renewing the access token.
const TOKEN_CODES: &[&str] = &["AccessTokenInvalid", "AccessTokenExpired", "I400JD"];

/// Code answered by re-establishing the device session.
const SESSION_CODE: &str = "DeviceSessionSignatureInvalid";

/// The repair action matching an error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Renew the token pair, then retry.
    RefreshToken,

    /// Sign and create a new device session, then retry.
    CreateSession,

    /// Surface the error as is.
    None,
}

impl ErrorEnvelope {
    /// Decode an envelope from any response body.
    ///
    /// Bodies that are not JSON objects decode to the empty (success) envelope.
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    pub fn is_error(&self) -> bool {
        !self.code.is_empty()
    }

    /// Map the code to its recovery class.
    ///
    /// `token_missing` reports whether the request went out without an access
    /// token; on the open API any error is then answered with a renewal.
    pub fn classify(&self, variant: ApiVariant, token_missing: bool) -> Recovery {
        if !self.is_error() {
            return Recovery::None;
        }
        if TOKEN_CODES.contains(&self.code.as_str()) {
            return Recovery::RefreshToken;
        }
        match variant {
            ApiVariant::DeviceSession if self.code == SESSION_CODE => Recovery::CreateSession,
            ApiVariant::Open if token_missing => Recovery::RefreshToken,
            _ => Recovery::None,
        }
    }
}
