//! Secret storage for refresh tokens.
//!
//! One contract, two backends: the OS-native credential manager and a
//! password-derived encrypted file store for headless machines. Records are
//! keyed by `token:<normalized-email>`; the store exclusively owns the
//! persisted representation.

pub mod file_store;
pub mod keyring_store;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file_store::FileStore;
pub use keyring_store::{ensure_native_access, NativeStore};

/// Service name for native keyring entries.
pub const KEYRING_SERVICE: &str = "gauth";

/// Prefix of every token record key.
pub const TOKEN_KEY_PREFIX: &str = "token:";

/// Key under which the default account email is stored.
pub const DEFAULT_ACCOUNT_KEY: &str = "default-account";

/// Environment override for the backend selection.
pub const BACKEND_ENV: &str = "GAUTH_KEYRING_BACKEND";

/// Out-of-band password for the encrypted file backend.
pub const PASSWORD_ENV: &str = "GAUTH_KEYRING_PASSWORD";

/// Bounded pre-flight window for the native backend probe.
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored secret for {0}")]
    NotFound(String),
    #[error("secret-store backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("unknown keyring backend {0:?} (expected auto|keychain|file)")]
    UnknownBackend(String),
    #[error("invalid token record: {0}")]
    Invalid(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A stored refresh-token record. At most one live record per normalized
/// email.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub email: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Lower-cased, trimmed email used for key derivation.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Stable record key for an email.
pub fn token_key(email: &str) -> String {
    format!("{TOKEN_KEY_PREFIX}{}", normalize_email(email))
}

/// Storage contract shared by both backends.
///
/// `set_token` overwrites the whole record atomically from the caller's
/// perspective; `delete_token` on an absent key fails with
/// [`StoreError::NotFound`] so callers can tell "deleted" from "nothing to
/// delete".
pub trait SecretStore: Send + Sync {
    fn get_token(&self, email: &str) -> Result<Token, StoreError>;
    fn set_token(&self, email: &str, token: Token) -> Result<(), StoreError>;
    fn delete_token(&self, email: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
    fn list_tokens(&self) -> Result<Vec<Token>, StoreError>;
    fn default_account(&self) -> Result<Option<String>, StoreError>;
    fn set_default_account(&self, email: &str) -> Result<(), StoreError>;
}

/// Backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Native when available, otherwise the encrypted file store.
    Auto,
    /// Native OS credential manager; probe failure is a hard error.
    Keychain,
    /// Password-derived encrypted file store.
    File,
}

impl Backend {
    /// Parse a backend name. Trimmed and case-insensitive; `native` and
    /// `keychain` both name the native backend.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Backend::Auto),
            "keychain" | "native" => Ok(Backend::Keychain),
            "file" => Ok(Backend::File),
            _ => Err(StoreError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Auto => "auto",
            Backend::Keychain => "keychain",
            Backend::File => "file",
        })
    }
}

/// Where a backend selection came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendSource {
    Override,
    Env,
    Config,
    Default,
}

impl fmt::Display for BackendSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendSource::Override => "override",
            BackendSource::Env => "env",
            BackendSource::Config => "config",
            BackendSource::Default => "default",
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BackendInfo {
    pub value: Backend,
    pub source: BackendSource,
}

/// Resolve the backend with override > env > config > default precedence.
pub fn resolve_backend(explicit: Option<&str>) -> Result<BackendInfo, StoreError> {
    if let Some(value) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(BackendInfo {
            value: Backend::parse(value)?,
            source: BackendSource::Override,
        });
    }
    if let Ok(value) = std::env::var(BACKEND_ENV) {
        if !value.trim().is_empty() {
            return Ok(BackendInfo {
                value: Backend::parse(&value)?,
                source: BackendSource::Env,
            });
        }
    }
    if let Some(value) = crate::config::load_default()
        .ok()
        .and_then(|c| c.keyring.backend)
        .filter(|v| !v.trim().is_empty())
    {
        return Ok(BackendInfo {
            value: Backend::parse(&value)?,
            source: BackendSource::Config,
        });
    }
    Ok(BackendInfo {
        value: Backend::Auto,
        source: BackendSource::Default,
    })
}

/// Open the store selected by the usual resolution chain.
pub fn open_default() -> Result<Box<dyn SecretStore>, StoreError> {
    open_backend(resolve_backend(None)?.value)
}

/// Open a specific backend.
pub fn open_backend(backend: Backend) -> Result<Box<dyn SecretStore>, StoreError> {
    match backend {
        Backend::Keychain => {
            ensure_native_access(PREFLIGHT_TIMEOUT)?;
            Ok(Box::new(NativeStore::new(KEYRING_SERVICE)))
        }
        Backend::File => {
            let password = file_password()?;
            Ok(Box::new(FileStore::open(default_store_dir()?, &password)?))
        }
        Backend::Auto => match ensure_native_access(PREFLIGHT_TIMEOUT) {
            Ok(()) => Ok(Box::new(NativeStore::new(KEYRING_SERVICE))),
            Err(e) => {
                tracing::debug!(error = %e, "native keyring unavailable, using file backend");
                let password = file_password()?;
                Ok(Box::new(FileStore::open(default_store_dir()?, &password)?))
            }
        },
    }
}

/// Directory holding the encrypted file store.
pub fn default_store_dir() -> Result<PathBuf, StoreError> {
    let base = dirs::data_dir()
        .ok_or_else(|| StoreError::BackendUnavailable("no user data directory".to_string()))?;
    Ok(base.join("gauth").join("keyring"))
}

/// File-backend password: env value for non-interactive runs, otherwise an
/// interactive prompt on stderr/stdin.
fn file_password() -> Result<String, StoreError> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    eprint!("Keyring password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(StoreError::BackendUnavailable(format!(
            "no file-store password (set {PASSWORD_ENV} for non-interactive use)"
        )));
    }
    Ok(password)
}

/// Write a token record to `path` as JSON (0600). Refuses to overwrite
/// unless asked.
pub fn export_token(
    store: &dyn SecretStore,
    email: &str,
    path: &Path,
    overwrite: bool,
) -> Result<Token, StoreError> {
    let token = store.get_token(email)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut open = std::fs::OpenOptions::new();
    open.write(true).create(true).truncate(true);
    if !overwrite {
        open.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open.mode(0o600);
    }
    let mut file = open.open(path)?;
    serde_json::to_writer_pretty(&mut file, &token)?;
    file.write_all(b"\n")?;
    Ok(token)
}

/// Parse and validate an exported token record, then store it.
pub fn import_token(store: &dyn SecretStore, data: &[u8]) -> Result<Token, StoreError> {
    let token: Token = serde_json::from_slice(data)?;
    if token.email.trim().is_empty() {
        return Err(StoreError::Invalid("missing email".to_string()));
    }
    if token.refresh_token.trim().is_empty() {
        return Err(StoreError::Invalid("missing refresh_token".to_string()));
    }
    let email = token.email.clone();
    store.set_token(&email, token.clone())?;
    Ok(token)
}
