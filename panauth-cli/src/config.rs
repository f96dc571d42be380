//! CLI configuration handling.

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use panauth_core::{AccountId, ClientConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Provider user id of the account to act on.
    pub account: String,

    /// Logging level, overridden by `RUST_LOG` and `--verbose`.
    pub log_level: String,

    /// Keep credentials in the OS keyring instead of a JSON file.
    pub prefer_keyring: bool,

    /// JSON file holding credentials when the keyring is not used.
    pub credentials_path: PathBuf,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Request layer settings.
    pub client: ClientConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        let credentials_path = project_dirs()
            .map(|d| d.data_dir().join("credentials.json"))
            .unwrap_or_else(|| PathBuf::from(".panauth/credentials.json"));

        Self {
            account: String::new(),
            log_level: "info".to_string(),
            prefer_keyring: false,
            credentials_path,
            config_path: PathBuf::new(),
            client: ClientConfig::default(),
        }
    }
}

impl CliConfig {
    /// The configured account, which every command needs.
    pub fn account_id(&self) -> Result<AccountId> {
        if self.account.is_empty() {
            bail!(
                "no account configured; set `account` in {:?}",
                self.config_path
            );
        }
        Ok(AccountId::new(self.account.as_str()))
    }
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("panauth.toml")),
    };

    let mut config: CliConfig = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path;

    if let Some(parent) = config.credentials_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }

    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "panauth", "panauth")
}
