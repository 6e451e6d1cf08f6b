//! Command-line surface: credential setup, account authorization and
//! stored-token management.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::auth::flow::Authorizer;
use crate::auth::manage::{ManageOptions, ManageServer};
use crate::auth::AuthorizeOptions;
use crate::config::{self, StoredCredentials};
use crate::secrets::{self, SecretStore, Token};
use crate::services::{self, Service};

#[derive(Parser)]
#[command(name = "gauth", version, about = "Google account authorization and token storage")]
pub struct Cli {
    /// Emit JSON instead of tab-separated text
    #[arg(long, global = true)]
    pub json: bool,

    /// Secret-store backend: auto, keychain or file
    #[arg(long, global = true, value_name = "BACKEND")]
    pub keyring_backend: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store the OAuth client credentials from a downloaded client JSON file
    Credentials {
        /// Path to the OAuth client JSON file
        path: PathBuf,
    },
    /// Authorize an account and store its refresh token
    Add {
        /// Account email the token will be stored under
        email: String,
        /// Paste the redirect URL instead of running a local listener
        #[arg(long)]
        manual: bool,
        /// Force the consent screen (re-issues a refresh token)
        #[arg(long)]
        force_consent: bool,
        /// Comma-separated service names (default: all user services)
        #[arg(long, value_name = "NAMES")]
        services: Option<String>,
        /// Flow timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// List authorized accounts
    List,
    /// Remove a stored account
    Remove {
        /// Account email
        email: String,
    },
    /// Mark an account as the default
    SetDefault {
        /// Account email
        email: String,
    },
    /// Show configuration and secret-store status
    Status,
    /// Run the browser-based accounts manager
    Manage {
        /// Session timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Comma-separated service names (default: all user services)
        #[arg(long, value_name = "NAMES")]
        services: Option<String>,
        /// Force the consent screen (re-issues a refresh token)
        #[arg(long)]
        force_consent: bool,
    },
    /// Inspect, export and import stored token records
    #[command(subcommand)]
    Tokens(TokensCommand),
}

#[derive(Subcommand)]
pub enum TokensCommand {
    /// List stored token records
    List,
    /// Delete a stored token record
    Delete {
        /// Account email
        email: String,
    },
    /// Write one token record to a JSON file
    Export {
        /// Account email
        email: String,
        /// Output path
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
        /// Replace the output file if it exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Read a token record from a JSON file and store it
    Import {
        /// Input path
        path: PathBuf,
    },
}

/// Parse a comma-separated service list for interactive authorization.
/// Rejects service-account-only services.
fn parse_auth_services(raw: &str) -> Result<Vec<Service>> {
    let allowed = services::user_services();
    let mut out = Vec::new();
    for name in raw.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let service = Service::parse(name)?;
        if !allowed.contains(&service) {
            return Err(anyhow!(
                "service {} does not support interactive authorization",
                service.name()
            ));
        }
        if !out.contains(&service) {
            out.push(service);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("no services given"));
    }
    Ok(out)
}

fn open_store(backend: Option<&str>) -> Result<Box<dyn SecretStore>> {
    let info = secrets::resolve_backend(backend)?;
    Ok(secrets::open_backend(info.value)?)
}

pub async fn run(cli: Cli) -> Result<()> {
    let backend = cli.keyring_backend.as_deref();
    match cli.command {
        Command::Credentials { path } => {
            let data = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let creds = config::parse_oauth_client_json(&data)?;
            let written = config::write_client_credentials(&creds)?;
            eprintln!("Stored OAuth client credentials at {}", written.display());
            Ok(())
        }
        Command::Add {
            email,
            manual,
            force_consent,
            services: service_names,
            timeout,
        } => {
            let selected = match service_names.as_deref() {
                Some(raw) => parse_auth_services(raw)?,
                None => services::user_services(),
            };
            // Open the store before the flow so backend problems surface
            // before the browser round trip.
            let store = open_store(backend)?;

            let authorizer = Authorizer::new(Arc::new(StoredCredentials));
            let refresh_token = authorizer
                .authorize(AuthorizeOptions {
                    services: selected.clone(),
                    scopes: services::scopes_for_services(&selected),
                    manual,
                    force_consent,
                    timeout: Duration::from_secs(timeout.unwrap_or(0)),
                })
                .await?;

            let token = Token {
                email: email.clone(),
                services: selected.iter().map(|s| s.name().to_string()).collect(),
                scopes: services::scopes_for_services(&selected),
                refresh_token,
                created_at: Some(Utc::now()),
            };
            store.set_token(&email, token)?;
            eprintln!("Authorized {email}");
            Ok(())
        }
        Command::List => {
            let store = open_store(backend)?;
            let tokens = store.list_tokens()?;
            let default = store.default_account()?;
            if cli.json {
                let accounts: Vec<_> = tokens
                    .iter()
                    .map(|t| {
                        json!({
                            "email": t.email,
                            "services": t.services,
                            "default": is_default(&t.email, default.as_deref(), &tokens),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&accounts)?);
            } else {
                for t in &tokens {
                    let marker = if is_default(&t.email, default.as_deref(), &tokens) {
                        "default"
                    } else {
                        ""
                    };
                    println!("{}\t{}\t{}", t.email, t.services.join(","), marker);
                }
            }
            Ok(())
        }
        Command::Remove { email } => {
            let store = open_store(backend)?;
            store.delete_token(&email)?;
            eprintln!("Removed {email}");
            Ok(())
        }
        Command::SetDefault { email } => {
            let store = open_store(backend)?;
            store.set_default_account(&email)?;
            eprintln!("Default account set to {email}");
            Ok(())
        }
        Command::Status => {
            let config_path = config::config_path()?;
            let config_exists = config::config_exists()?;
            let creds_exist = config::credentials_path()?.exists();
            let info = secrets::resolve_backend(backend)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "config_path": config_path,
                        "config_exists": config_exists,
                        "credentials_stored": creds_exist,
                        "keyring_backend": info.value.to_string(),
                        "keyring_backend_source": info.source.to_string(),
                    }))?
                );
            } else {
                println!("config\t{}\t{}", config_path.display(), if config_exists { "present" } else { "absent" });
                println!("credentials\t{}", if creds_exist { "stored" } else { "not stored" });
                println!("keyring-backend\t{}\t{}", info.value, info.source);
            }
            Ok(())
        }
        Command::Manage {
            timeout,
            services: service_names,
            force_consent,
        } => {
            let selected = match service_names.as_deref() {
                Some(raw) => parse_auth_services(raw)?,
                None => services::user_services(),
            };
            let store: Arc<dyn SecretStore> = Arc::from(open_store(backend)?);
            let server = ManageServer::new(store, Arc::new(StoredCredentials));
            server
                .run(ManageOptions {
                    timeout: Duration::from_secs(timeout.unwrap_or(0)),
                    services: selected,
                    force_consent,
                })
                .await?;
            Ok(())
        }
        Command::Tokens(cmd) => run_tokens(cmd, cli.json, backend),
    }
}

fn run_tokens(cmd: TokensCommand, json: bool, backend: Option<&str>) -> Result<()> {
    let store = open_store(backend)?;
    match cmd {
        TokensCommand::List => {
            let tokens = store.list_tokens()?;
            if json {
                let records: Vec<_> = tokens
                    .iter()
                    .map(|t| {
                        json!({
                            "email": t.email,
                            "services": t.services,
                            "scopes": t.scopes,
                            "created_at": t.created_at,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for t in &tokens {
                    let created = t
                        .created_at
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_default();
                    println!("{}\t{}\t{}", t.email, t.services.join(","), created);
                }
            }
            Ok(())
        }
        TokensCommand::Delete { email } => {
            store.delete_token(&email)?;
            eprintln!("Deleted token for {email}");
            Ok(())
        }
        TokensCommand::Export {
            email,
            out,
            overwrite,
        } => {
            secrets::export_token(store.as_ref(), &email, &out, overwrite)?;
            eprintln!("Exported token for {email} to {}", out.display());
            Ok(())
        }
        TokensCommand::Import { path } => {
            let data = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let token = secrets::import_token(store.as_ref(), &data)?;
            eprintln!("Imported token for {}", token.email);
            Ok(())
        }
    }
}

fn is_default(email: &str, stored: Option<&str>, all: &[Token]) -> bool {
    match stored {
        Some(d) => d.eq_ignore_ascii_case(email),
        None => all.first().is_some_and(|t| t.email == email),
    }
}
