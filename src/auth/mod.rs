//! OAuth 2.0 authorization for Google services.
//!
//! Two front doors over the same authorization-code exchange:
//! - [`flow::Authorizer`] runs a single interactive or manual flow and hands
//!   the refresh token back to the caller.
//! - [`manage::ManageServer`] runs a longer-lived local server that lets a
//!   browser session add, list, remove and default accounts, persisting
//!   tokens straight into the secret store.

pub mod exchange;
pub mod flow;
pub mod manage;
pub mod pages;
pub mod state;
pub mod url;

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::Service;

/// Overall deadline for a single authorization flow.
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(120);

/// How long the success page stays reachable before the local server shuts
/// down. Matches the countdown shown on the rendered success page.
pub const POST_SUCCESS_DISPLAY: Duration = Duration::from_secs(30);

/// Errors terminating an authorization flow. None of these is retried
/// automatically; retry (e.g. with forced consent) is the caller's decision.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("missing OAuth client credentials: {0}")]
    MissingCredentials(String),
    #[error("missing scopes")]
    EmptyScopes,
    #[error("state mismatch - possible CSRF attack")]
    StateMismatch,
    #[error("missing authorization code")]
    MissingCode,
    #[error("authorization error: {0}")]
    Cancelled(String),
    #[error("token exchange failed with status {status}: {body}")]
    TokenExchange { status: u16, body: String },
    #[error("no refresh token received; try again with --force-consent")]
    NoRefreshToken,
    #[error("authorization timed out")]
    Timeout,
    #[error("could not parse redirect URL: {0}")]
    InvalidRedirect(String),
    #[error("input closed before a redirect URL was provided")]
    InputClosed,
    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// OAuth client id/secret pair persisted by `gauth credentials`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Source of the OAuth client credentials. The real implementation reads the
/// persisted credentials file; tests inject closures.
pub trait CredentialsProvider: Send + Sync {
    fn client_credentials(&self) -> Result<ClientCredentials, FlowError>;
}

impl<F> CredentialsProvider for F
where
    F: Fn() -> Result<ClientCredentials, FlowError> + Send + Sync,
{
    fn client_credentials(&self) -> Result<ClientCredentials, FlowError> {
        self()
    }
}

/// Provider endpoint set used by the flows.
#[derive(Clone, Debug)]
pub struct OAuthEndpoint {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl OAuthEndpoint {
    pub fn google() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
        }
    }
}

/// Options for one authorization attempt.
#[derive(Clone, Debug)]
pub struct AuthorizeOptions {
    pub services: Vec<Service>,
    pub scopes: Vec<String>,
    pub manual: bool,
    pub force_consent: bool,
    /// Zero means [`DEFAULT_FLOW_TIMEOUT`].
    pub timeout: Duration,
}

impl Default for AuthorizeOptions {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            scopes: Vec::new(),
            manual: false,
            force_consent: false,
            timeout: Duration::ZERO,
        }
    }
}

/// Best-effort browser launcher. Failure to open is never a flow error; the
/// authorization URL is always also printed.
pub type BrowserOpener = Arc<dyn Fn(&str) + Send + Sync>;

/// Default browser opener: `open` on macOS, `start` on Windows, `xdg-open`
/// elsewhere. Errors are logged and otherwise ignored.
pub fn open_browser(url: &str) {
    let cmd = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "start"
    } else {
        "xdg-open"
    };

    if let Err(e) = Command::new(cmd).arg(url).spawn() {
        tracing::debug!(error = %e, "failed to launch browser");
    }
}
