//! Client configuration.
//!
//! All fields default to the provider's production values, so a TOML file only
//! has to name what differs:
//!
//! ```toml
//! variant = "open"
//! drive_id = "12345"
//!
//! [oauth]
//! client_id = "..."
//! client_secret = "..."
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which flavour of the provider API an account talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVariant {
    /// Legacy consumer API authenticated by a signed device session.
    #[default]
    DeviceSession,

    /// Open-platform API authenticated by OAuth bearer tokens only.
    Open,
}

/// Base URLs of every remote service the layer talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Legacy API host (listing, batch, session creation).
    pub api: String,

    /// Legacy token endpoint host.
    pub auth: String,

    /// Legacy user-info host used by v2-signed requests.
    pub biz_api: String,

    /// Open-platform host (listing, OAuth token, QR login status).
    pub open_api: String,

    /// Relay service of the QR/TV login flow.
    pub relay: String,

    /// Web host serving the user-facing authorization page.
    pub authorize: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api: "https://api.alipan.com".to_string(),
            auth: "https://auth.alipan.com".to_string(),
            biz_api: "https://bizapi.alipan.com".to_string(),
            open_api: "https://openapi.alipan.com".to_string(),
            relay: "http://api.extscreen.com".to_string(),
            authorize: "https://www.aliyundrive.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at one base URL (mock servers, proxies).
    pub fn all(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            api: base.clone(),
            auth: base.clone(),
            biz_api: base.clone(),
            open_api: base.clone(),
            relay: base.clone(),
            authorize: base,
        }
    }
}

/// OAuth client identity for the open-platform refresh exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Alternative token endpoint, used only when `client_id` is empty.
    pub token_url: Option<String>,
}

/// Configuration of one account's request layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub variant: ApiVariant,

    pub drive_id: String,

    /// Which drive `refresh_drive_id` adopts (`resource`, `backup`, `default`).
    pub drive_type: String,

    pub order_by: String,
    pub order_direction: String,

    pub oauth: OAuthConfig,

    /// Renew tokens through the QR/TV relay instead of the OAuth endpoint.
    pub use_relay_auth: bool,

    /// Base URL of the v2 signing collaborator.
    pub hook_address: Option<String>,

    pub request_timeout_secs: u64,

    /// Upper bound on pages fetched by one listing.
    pub max_pages: usize,

    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            variant: ApiVariant::default(),
            drive_id: String::new(),
            drive_type: "resource".to_string(),
            order_by: "name".to_string(),
            order_direction: "ASC".to_string(),
            oauth: OAuthConfig::default(),
            use_relay_auth: false,
            hook_address: None,
            request_timeout_secs: 30,
            max_pages: 10_000,
            endpoints: Endpoints::default(),
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
