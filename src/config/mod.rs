//! Configuration file and persisted OAuth client credentials.
//!
//! The config file is optional TOML under the per-user config directory;
//! missing file or missing sections fall back to defaults. The OAuth client
//! id/secret pair is persisted once by `gauth credentials` and read at the
//! start of every flow.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::auth::{ClientCredentials, CredentialsProvider, FlowError};

/// Complete gauth configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub keyring: KeyringConfig,
}

/// Secret-store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyringConfig {
    /// Backend selection: `auto`, `keychain` or `file`.
    #[serde(default)]
    pub backend: Option<String>,
}

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("gauth"))
        .context("no user config directory")
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn config_exists() -> Result<bool> {
    Ok(config_path()?.exists())
}

/// Load the config file, or defaults when it does not exist.
pub fn load_default() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}

pub fn credentials_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("credentials.json"))
}

/// Parse an OAuth client JSON file. Accepts the provider's `installed` /
/// `web` download envelopes as well as a flat id/secret object.
pub fn parse_oauth_client_json(data: &[u8]) -> Result<ClientCredentials> {
    #[derive(Deserialize)]
    struct Envelope {
        installed: Option<ClientCredentials>,
        web: Option<ClientCredentials>,
        client_id: Option<String>,
        client_secret: Option<String>,
    }

    let envelope: Envelope = serde_json::from_slice(data).context("invalid client JSON")?;
    let creds = if let Some(c) = envelope.installed.or(envelope.web) {
        c
    } else {
        match (envelope.client_id, envelope.client_secret) {
            (Some(client_id), Some(client_secret)) => ClientCredentials {
                client_id,
                client_secret,
            },
            _ => return Err(anyhow!("client JSON has no installed/web section")),
        }
    };

    if creds.client_id.trim().is_empty() || creds.client_secret.trim().is_empty() {
        return Err(anyhow!("client JSON has empty client_id or client_secret"));
    }
    Ok(creds)
}

/// Persist client credentials (0600) and return the path written.
pub fn write_client_credentials(creds: &ClientCredentials) -> Result<PathBuf> {
    let dir = config_dir()?;
    fs::create_dir_all(&dir)?;
    let path = credentials_path()?;
    fs::write(&path, serde_json::to_vec_pretty(creds)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}

/// Read the persisted client credentials.
pub fn read_client_credentials() -> Result<ClientCredentials, FlowError> {
    let path = credentials_path()
        .map_err(|e| FlowError::MissingCredentials(e.to_string()))?;
    let data = fs::read(&path).map_err(|_| {
        FlowError::MissingCredentials(format!(
            "no client credentials at {} (run: gauth credentials <file>)",
            path.display()
        ))
    })?;
    serde_json::from_slice(&data)
        .map_err(|e| FlowError::MissingCredentials(format!("corrupt credentials file: {e}")))
}

/// [`CredentialsProvider`] over the persisted credentials file.
pub struct StoredCredentials;

impl CredentialsProvider for StoredCredentials {
    fn client_credentials(&self) -> Result<ClientCredentials, FlowError> {
        read_client_credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installed_envelope() {
        let json = br#"{"installed":{"client_id":"id","client_secret":"secret"}}"#;
        let creds = parse_oauth_client_json(json).unwrap();
        assert_eq!(creds.client_id, "id");
        assert_eq!(creds.client_secret, "secret");
    }

    #[test]
    fn test_parse_flat_object() {
        let json = br#"{"client_id":"id","client_secret":"secret"}"#;
        let creds = parse_oauth_client_json(json).unwrap();
        assert_eq!(creds.client_id, "id");
    }

    #[test]
    fn test_parse_rejects_empty_fields() {
        let json = br#"{"web":{"client_id":"","client_secret":"secret"}}"#;
        assert!(parse_oauth_client_json(json).is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.keyring.backend.is_none());

        let config: Config = toml::from_str("[keyring]\nbackend = \"file\"\n").unwrap();
        assert_eq!(config.keyring.backend.as_deref(), Some("file"));
    }
}
