//! Local accounts-manager server.
//!
//! A longer-lived loopback server that lets a browser session add, list,
//! remove, and default accounts. It reuses the flow's URL construction,
//! state validation, and token exchange, but multiplexes many operations
//! over one listener and persists tokens straight into the secret store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::secrets::{SecretStore, StoreError, Token};
use crate::services::{scopes_for_services, user_services, Service};

use super::exchange::exchange_code;
use super::pages::{DefaultPages, Page, PageRenderer};
use super::state::{csrf_token, random_state};
use super::url::build_auth_url;
use super::{
    open_browser, BrowserOpener, CredentialsProvider, FlowError, OAuthEndpoint,
    POST_SUCCESS_DISPLAY,
};

/// Overall session deadline for the accounts manager.
pub const DEFAULT_MANAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Options for one accounts-manager session.
#[derive(Clone, Debug, Default)]
pub struct ManageOptions {
    /// Zero means [`DEFAULT_MANAGE_TIMEOUT`].
    pub timeout: Duration,
    /// Empty means [`user_services`].
    pub services: Vec<Service>,
    pub force_consent: bool,
}

/// One stored account, as listed to the browser.
#[derive(Debug, Serialize)]
pub struct AccountInfo {
    pub email: String,
    pub services: Vec<String>,
    pub is_default: bool,
}

/// Error responses for the JSON endpoints.
enum ApiError {
    Forbidden(String),
    NotFound(String),
    ServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

/// Shared state behind the accounts-manager router.
pub struct ManageAppState {
    pub store: Arc<dyn SecretStore>,
    pub credentials: Arc<dyn CredentialsProvider>,
    pub endpoint: OAuthEndpoint,
    pub renderer: Arc<dyn PageRenderer>,
    pub http: reqwest::Client,
    /// Issued at server start; read-only for the server's lifetime.
    pub csrf_token: String,
    /// Single-use OAuth state: written at `/auth/start`, taken at callback.
    pub oauth_state: Mutex<Option<String>>,
    pub state_source: Arc<dyn Fn() -> String + Send + Sync>,
    pub services: Vec<Service>,
    pub scopes: Vec<String>,
    pub force_consent: bool,
    /// Port the listener is bound to; used to rebuild the redirect URI.
    pub port: u16,
    /// Signaled after the first completed flow; ends the session.
    pub done_tx: mpsc::Sender<()>,
    pub success_display: Duration,
}

/// Build the accounts-manager router.
pub fn manage_router(state: Arc<ManageAppState>) -> Router {
    Router::new()
        .route("/", get(accounts_page))
        .route("/accounts", get(list_accounts))
        .route("/auth/start", get(auth_start))
        .route("/oauth2/callback", get(oauth_callback))
        .route("/set-default", post(set_default))
        .route("/remove-account", post(remove_account))
        .with_state(state)
}

/// Runs the accounts-manager session end to end.
pub struct ManageServer {
    store: Arc<dyn SecretStore>,
    credentials: Arc<dyn CredentialsProvider>,
    endpoint: OAuthEndpoint,
    opener: BrowserOpener,
    state_source: Arc<dyn Fn() -> String + Send + Sync>,
    renderer: Arc<dyn PageRenderer>,
    success_display: Duration,
    http: reqwest::Client,
}

impl ManageServer {
    pub fn new(store: Arc<dyn SecretStore>, credentials: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            store,
            credentials,
            endpoint: OAuthEndpoint::google(),
            opener: Arc::new(|url| open_browser(url)),
            state_source: Arc::new(random_state),
            renderer: Arc::new(DefaultPages),
            success_display: POST_SUCCESS_DISPLAY,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: OAuthEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_browser_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.opener = Arc::new(opener);
        self
    }

    pub fn with_state_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.state_source = Arc::new(source);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_success_display(mut self, window: Duration) -> Self {
        self.success_display = window;
        self
    }

    /// Serve the accounts manager until the first completed flow or the
    /// session timeout. The listener is closed on every exit path.
    pub async fn run(&self, opts: ManageOptions) -> Result<(), FlowError> {
        let timeout = if opts.timeout.is_zero() {
            DEFAULT_MANAGE_TIMEOUT
        } else {
            opts.timeout
        };
        let services = if opts.services.is_empty() {
            user_services()
        } else {
            opts.services.clone()
        };
        let scopes = scopes_for_services(&services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (done_tx, mut done_rx) = mpsc::channel(1);

        let state = Arc::new(ManageAppState {
            store: self.store.clone(),
            credentials: self.credentials.clone(),
            endpoint: self.endpoint.clone(),
            renderer: self.renderer.clone(),
            http: self.http.clone(),
            csrf_token: csrf_token(),
            oauth_state: Mutex::new(None),
            state_source: self.state_source.clone(),
            services,
            scopes,
            force_consent: opts.force_consent,
            port,
            done_tx,
            success_display: self.success_display,
        });

        let url = format!("http://127.0.0.1:{port}");
        eprintln!("Opening accounts manager in browser...");
        eprintln!("If the browser doesn't open, visit: {url}");
        (self.opener)(&url);

        info!(port, "accounts manager listening");

        axum::serve(listener, manage_router(state))
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = done_rx.recv() => debug!("accounts manager done"),
                    _ = tokio::time::sleep(timeout) => debug!("accounts manager session timed out"),
                }
            })
            .await?;

        Ok(())
    }
}

async fn accounts_page(State(st): State<Arc<ManageAppState>>) -> Html<String> {
    Html(
        st.renderer
            .render(Page::Accounts, &json!({"csrf_token": st.csrf_token})),
    )
}

async fn list_accounts(
    State(st): State<Arc<ManageAppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tokens = st
        .store
        .list_tokens()
        .map_err(|e| ApiError::ServerError(format!("failed to list accounts: {e}")))?;
    let default = st.store.default_account().unwrap_or(None);

    let accounts: Vec<AccountInfo> = tokens
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let is_default = match &default {
                Some(d) => t.email.eq_ignore_ascii_case(d),
                // First account is default if none set
                None => i == 0,
            };
            AccountInfo {
                email: t.email.clone(),
                services: t.services.clone(),
                is_default,
            }
        })
        .collect();

    Ok(Json(json!({"accounts": accounts})))
}

async fn auth_start(State(st): State<Arc<ManageAppState>>) -> Result<Redirect, ApiError> {
    let creds = st.credentials.client_credentials().map_err(|e| {
        error!(error = %e, "client credentials unavailable");
        ApiError::ServerError(
            "OAuth credentials not configured. Run: gauth credentials <file>".to_string(),
        )
    })?;

    let state = (st.state_source)();
    *st.oauth_state.lock().expect("oauth state poisoned") = Some(state.clone());

    let redirect_uri = format!("http://127.0.0.1:{}/oauth2/callback", st.port);
    let auth_url = build_auth_url(
        &st.endpoint.auth_url,
        &creds.client_id,
        &redirect_uri,
        &st.scopes,
        &state,
        st.force_consent,
    );

    debug!("redirecting to provider");
    Ok(Redirect::to(&auth_url))
}

#[derive(Debug, Deserialize)]
struct ManageCallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    email: Option<String>,
}

async fn oauth_callback(
    State(st): State<Arc<ManageAppState>>,
    Query(params): Query<ManageCallbackParams>,
) -> (StatusCode, Html<String>) {
    if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
        warn!(error = %error, "authorization cancelled");
        return (
            StatusCode::OK,
            Html(st.renderer.render(Page::Cancelled, &json!({}))),
        );
    }

    // Single-use: taken here, so a replayed callback cannot match again.
    let expected = st
        .oauth_state
        .lock()
        .expect("oauth state poisoned")
        .take();
    if expected.is_none() || params.state != expected {
        warn!("callback state mismatch");
        return error_page(
            &st,
            StatusCode::BAD_REQUEST,
            "State mismatch - possible CSRF attack. Please try again.",
        );
    }

    let code = match params.code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => code.to_string(),
        None => {
            return error_page(
                &st,
                StatusCode::BAD_REQUEST,
                "Missing authorization code. Please try again.",
            )
        }
    };

    let creds = match st.credentials.client_credentials() {
        Ok(c) => c,
        Err(_) => {
            return error_page(
                &st,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read client credentials",
            )
        }
    };

    let redirect_uri = format!("http://127.0.0.1:{}/oauth2/callback", st.port);
    let token = match exchange_code(
        &st.http,
        &st.endpoint.token_url,
        &code,
        &redirect_uri,
        &creds.client_id,
        &creds.client_secret,
    )
    .await
    {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "token exchange failed");
            return error_page(
                &st,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Failed to exchange code for token: {e}"),
            );
        }
    };

    let refresh_token = match token.require_refresh_token() {
        Ok(r) => r,
        Err(_) => {
            return error_page(
                &st,
                StatusCode::BAD_REQUEST,
                "No refresh token received. Try again with force-consent.",
            )
        }
    };

    // Resolve the account identity; never store under a placeholder.
    let email = match resolve_email(&st, &token.access_token, params.email.as_deref()).await {
        Some(email) => email,
        None => {
            return error_page(
                &st,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not determine the authorized account's email",
            )
        }
    };

    let mut service_names: Vec<String> =
        st.services.iter().map(|s| s.name().to_string()).collect();
    service_names.sort();

    if let Err(e) = st.store.set_token(
        &email,
        Token {
            email: email.clone(),
            services: service_names.clone(),
            scopes: st.scopes.clone(),
            refresh_token,
            created_at: Some(Utc::now()),
        },
    ) {
        error!(error = %e, "failed to store token");
        return error_page(
            &st,
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to store token: {e}"),
        );
    }

    info!(email = %email, "account authorized and stored");

    // Let the success page render, then end the session.
    let done_tx = st.done_tx.clone();
    let display = st.success_display;
    tokio::spawn(async move {
        tokio::time::sleep(display).await;
        let _ = done_tx.try_send(());
    });

    (
        StatusCode::OK,
        Html(st.renderer.render(
            Page::Success,
            &json!({"email": email, "services": service_names}),
        )),
    )
}

/// Ask the provider's userinfo endpoint who just authorized; fall back to an
/// `email` query parameter when the provider response is unusable.
async fn resolve_email(
    st: &ManageAppState,
    access_token: &str,
    param: Option<&str>,
) -> Option<String> {
    #[derive(Deserialize)]
    struct UserInfo {
        email: Option<String>,
    }

    let from_provider = async {
        let resp = st
            .http
            .get(&st.endpoint.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<UserInfo>().await.ok()?.email
    }
    .await;

    from_provider
        .or_else(|| param.map(str::to_string))
        .filter(|e| !e.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct EmailRequest {
    email: String,
}

fn require_csrf(st: &ManageAppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let supplied = headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if supplied != st.csrf_token {
        return Err(ApiError::Forbidden("Invalid CSRF token".to_string()));
    }
    Ok(())
}

async fn set_default(
    State(st): State<Arc<ManageAppState>>,
    headers: HeaderMap,
    Json(req): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_csrf(&st, &headers)?;

    st.store.set_default_account(&req.email).map_err(|e| match e {
        StoreError::NotFound(_) => ApiError::NotFound(format!("no stored token for {}", req.email)),
        other => ApiError::ServerError(format!("failed to set default account: {other}")),
    })?;

    Ok(Json(json!({"success": true})))
}

async fn remove_account(
    State(st): State<Arc<ManageAppState>>,
    headers: HeaderMap,
    Json(req): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_csrf(&st, &headers)?;

    st.store.delete_token(&req.email).map_err(|e| match e {
        StoreError::NotFound(_) => ApiError::NotFound(format!("no stored token for {}", req.email)),
        other => ApiError::ServerError(format!("failed to remove account: {other}")),
    })?;

    Ok(Json(json!({"success": true})))
}

fn error_page(st: &ManageAppState, status: StatusCode, message: &str) -> (StatusCode, Html<String>) {
    (
        status,
        Html(st.renderer.render(Page::Error, &json!({"message": message}))),
    )
}
