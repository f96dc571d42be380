//! panauth CLI
//!
//! Drives the request layer by hand: log in, inspect tokens, list and move files.
//!
//! # Usage
//!
//! ```bash
//! # Log in through the QR/TV relay (run twice: request, then confirm)
//! panauth login
//!
//! # Or seed a refresh token obtained elsewhere
//! panauth login --refresh-token <token>
//!
//! # Print the current access token, renewing it first
//! panauth token --refresh
//!
//! # List a folder
//! panauth ls root
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use panauth_core::{
    ApiClient, CredentialOwner, Credentials, Drive, Renewal, SessionStore, TokenError,
    TokenProvider, build_http_client, create_store,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod config;

use config::CliConfig;

/// Inner URL of a batch move.
const MOVE_URL: &str = "/file/move";

#[derive(Parser)]
#[command(name = "panauth")]
#[command(about = "Authenticated access to Alipan drives")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in through the QR/TV relay, or store a refresh token
    Login {
        /// Use this refresh token instead of the relay login
        #[arg(long)]
        refresh_token: Option<String>,

        /// Forget a pending relay login and start over
        #[arg(long)]
        reset: bool,
    },

    /// Print the current access token
    Token {
        /// Renew the token pair first
        #[arg(short, long)]
        refresh: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the entries of a folder
    Ls {
        /// Parent folder id
        #[arg(default_value = "root")]
        parent_id: String,
    },

    /// Move an entry into another folder
    Mv {
        /// Entry to move
        file_id: String,

        /// Destination folder id
        to_parent_id: String,
    },

    /// Look up and print the drive id of the configured drive type
    DriveId,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    init_logging(&config.log_level, cli.verbose);
    info!("Loaded configuration from {:?}", config.config_path);

    let owner = Arc::new(credential_owner(&config).await?);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Login { refresh_token, reset } => {
            login(&owner, refresh_token, reset).await
        }
        Commands::Token { refresh, format } => {
            token(&owner, refresh, &format).await
        }
        Commands::Ls { parent_id } => {
            list(&drive(&config, owner)?, &parent_id, &cancel).await
        }
        Commands::Mv { file_id, to_parent_id } => {
            move_entry(&drive(&config, owner)?, &file_id, &to_parent_id, &cancel).await
        }
        Commands::DriveId => {
            drive_id(&drive(&config, owner)?, &cancel).await
        }
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn credential_owner(config: &CliConfig) -> Result<CredentialOwner> {
    let account = config.account_id()?;
    let store = create_store(config.prefer_keyring, config.credentials_path.clone())?;
    let http = build_http_client(&config.client)?;
    let renewal = Renewal::from_config(&config.client, http);

    Ok(CredentialOwner::from_store(account, renewal, Arc::from(store)).await?)
}

fn drive(config: &CliConfig, owner: Arc<CredentialOwner>) -> Result<Drive> {
    let client = ApiClient::new(config.client.clone(), owner, Arc::new(SessionStore::new()))?;
    Ok(Drive::new(client))
}

async fn login(owner: &CredentialOwner, refresh_token: Option<String>, reset: bool) -> Result<()> {
    if let Some(refresh_token) = refresh_token {
        owner
            .set_credentials(Credentials::from_refresh_token(refresh_token))
            .await?;
        owner.refresh().await?;
        println!("Logged in as {}", owner.account());
        return Ok(());
    }

    if reset {
        owner.clear_pending_authorization().await?;
    }

    match owner.authorize().await {
        Ok(_) => {
            println!("Logged in as {}", owner.account());
            Ok(())
        }
        Err(TokenError::AuthorizationRequired { auth_url }) => {
            println!("Open this link to approve the login:");
            println!("  {}", auth_url);
            println!("Then run `panauth login` again.");
            Ok(())
        }
        Err(TokenError::LoginPending { status }) => {
            println!("Login not approved yet ({}). Run `panauth login` again.", status);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn token(owner: &CredentialOwner, refresh: bool, format: &str) -> Result<()> {
    let credentials = if refresh {
        owner.refresh().await?
    } else {
        owner.credentials().await?
    };

    match format {
        "json" => {
            let output = serde_json::json!({
                "account": owner.account().as_str(),
                "access_token": credentials.access_token.expose(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("{}", credentials.access_token.expose());
        }
    }
    Ok(())
}

async fn list(drive: &Drive, parent_id: &str, cancel: &CancellationToken) -> Result<()> {
    let entries = drive.list_all(parent_id, cancel).await?;
    for entry in &entries {
        let kind = if entry.is_dir() { "d" } else { "-" };
        println!("{} {:>12} {}  {}", kind, entry.size, entry.file_id, entry.name);
    }
    info!("{} entries", entries.len());
    Ok(())
}

async fn move_entry(
    drive: &Drive,
    file_id: &str,
    to_parent_id: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    drive
        .move_or_rename(file_id, to_parent_id, MOVE_URL, cancel)
        .await?;
    println!("Moved {} into {}", file_id, to_parent_id);
    Ok(())
}

async fn drive_id(drive: &Drive, cancel: &CancellationToken) -> Result<()> {
    let drive_id = drive.refresh_drive_id(cancel).await?;
    println!("{}", drive_id);
    Ok(())
}
