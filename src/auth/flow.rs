//! Interactive and manual authorization-code flows.
//!
//! The interactive variant binds an ephemeral loopback listener, sends the
//! user's browser to the provider, and waits for exactly one callback. The
//! manual variant prints the same URL and accepts a pasted redirect instead.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::exchange::exchange_code;
use super::pages::{DefaultPages, Page, PageRenderer};
use super::state::random_state;
use super::url::build_auth_url;
use super::{
    open_browser, AuthorizeOptions, BrowserOpener, ClientCredentials, CredentialsProvider,
    FlowError, OAuthEndpoint, DEFAULT_FLOW_TIMEOUT, POST_SUCCESS_DISPLAY,
};

/// Query parameters delivered to the callback path.
#[derive(Debug, Deserialize)]
pub(crate) struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// What one callback request amounted to. Exactly one outcome per flow is
/// accepted; the rest are discarded by the single-assignment slot.
enum CallbackOutcome {
    Code(String),
    Cancelled(String),
    StateMismatch,
    MissingCode,
}

/// Write-once rendezvous between the callback handler and the coordinator.
/// The first writer takes the sender; later writers observe `None` and drop
/// their payload without affecting the outcome.
type OutcomeSlot = Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    slot: OutcomeSlot,
    renderer: Arc<dyn PageRenderer>,
}

/// Drives one OAuth2 authorization-code exchange.
///
/// All collaborators are injected with working defaults, so tests can swap
/// the endpoint, browser launcher, or state source without any shared
/// mutable globals.
pub struct Authorizer {
    credentials: Arc<dyn CredentialsProvider>,
    endpoint: OAuthEndpoint,
    opener: BrowserOpener,
    state_source: Arc<dyn Fn() -> String + Send + Sync>,
    renderer: Arc<dyn PageRenderer>,
    success_display: Duration,
    http: reqwest::Client,
}

impl Authorizer {
    pub fn new(credentials: Arc<dyn CredentialsProvider>) -> Self {
        Self {
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

    /// How long the success page stays up before the listener shuts down.
    pub fn with_success_display(mut self, window: Duration) -> Self {
        self.success_display = window;
        self
    }

    /// Run one authorization flow and return the refresh token.
    pub async fn authorize(&self, opts: AuthorizeOptions) -> Result<String, FlowError> {
        let (creds, state, timeout) = self.prepare(&opts)?;
        if opts.manual {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            return tokio::time::timeout(timeout, self.manual_flow(&creds, &opts, &state, stdin))
                .await
                .map_err(|_| FlowError::Timeout)?;
        }
        self.interactive_flow(&creds, &opts, &state, timeout).await
    }

    /// Manual flow reading the pasted redirect URL from `input` instead of
    /// stdin. Used by tests and scripted callers.
    pub async fn authorize_with_input<R>(
        &self,
        opts: AuthorizeOptions,
        input: R,
    ) -> Result<String, FlowError>
    where
        R: AsyncBufRead + Unpin,
    {
        let (creds, state, timeout) = self.prepare(&opts)?;
        tokio::time::timeout(timeout, self.manual_flow(&creds, &opts, &state, input))
            .await
            .map_err(|_| FlowError::Timeout)?
    }

    fn prepare(
        &self,
        opts: &AuthorizeOptions,
    ) -> Result<(ClientCredentials, String, Duration), FlowError> {
        if opts.scopes.is_empty() {
            return Err(FlowError::EmptyScopes);
        }
        let timeout = if opts.timeout.is_zero() {
            DEFAULT_FLOW_TIMEOUT
        } else {
            opts.timeout
        };
        let creds = self.credentials.client_credentials()?;
        let state = (self.state_source)();
        Ok((creds, state, timeout))
    }

    async fn interactive_flow(
        &self,
        creds: &ClientCredentials,
        opts: &AuthorizeOptions,
        state: &str,
        timeout: Duration,
    ) -> Result<String, FlowError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/oauth2/callback");

        let (tx, rx) = oneshot::channel();
        let callback_state = CallbackState {
            expected_state: state.to_string(),
            slot: Arc::new(Mutex::new(Some(tx))),
            renderer: self.renderer.clone(),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = callback_router(callback_state);
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        // Listener dies with this guard on every exit path, including
        // cancellation of the authorize future itself.
        let _guard = AbortOnDrop(server);

        let auth_url = build_auth_url(
            &self.endpoint.auth_url,
            &creds.client_id,
            &redirect_uri,
            &opts.scopes,
            state,
            opts.force_consent,
        );
        eprintln!("Opening browser for authorization…");
        eprintln!("If the browser doesn't open, visit this URL:");
        eprintln!("{auth_url}");
        (self.opener)(&auth_url);

        debug!(port, "waiting for OAuth callback");

        let outcome = tokio::select! {
            outcome = rx => outcome.map_err(|_| FlowError::Cancelled("callback listener closed".to_string()))?,
            _ = tokio::time::sleep_until(deadline) => {
                warn!("authorization timed out before a callback arrived");
                return Err(FlowError::Timeout);
            }
        };

        match outcome {
            CallbackOutcome::Code(code) => {
                let token = exchange_code(
                    &self.http,
                    &self.endpoint.token_url,
                    &code,
                    &redirect_uri,
                    &creds.client_id,
                    &creds.client_secret,
                )
                .await?;
                let refresh_token = token.require_refresh_token()?;
                info!("authorization complete");
                // Keep the listener alive so the success page can render,
                // but never past the flow's overall deadline.
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                tokio::time::sleep(self.success_display.min(remaining)).await;
                let _ = shutdown_tx.send(());
                Ok(refresh_token)
            }
            CallbackOutcome::Cancelled(reason) => Err(FlowError::Cancelled(reason)),
            CallbackOutcome::StateMismatch => Err(FlowError::StateMismatch),
            CallbackOutcome::MissingCode => Err(FlowError::MissingCode),
        }
    }

    async fn manual_flow<R>(
        &self,
        creds: &ClientCredentials,
        opts: &AuthorizeOptions,
        state: &str,
        mut input: R,
    ) -> Result<String, FlowError>
    where
        R: AsyncBufRead + Unpin,
    {
        // No listener; the redirect lands on a dead localhost port and the
        // user pastes the resulting address-bar URL back to us.
        let redirect_uri = "http://localhost:1";
        let auth_url = build_auth_url(
            &self.endpoint.auth_url,
            &creds.client_id,
            redirect_uri,
            &opts.scopes,
            state,
            opts.force_consent,
        );
        eprintln!("Visit this URL to authorize:");
        eprintln!("{auth_url}");
        eprintln!();
        eprintln!("After authorizing, you'll be redirected to a localhost URL that won't load.");
        eprintln!("Copy the URL from your browser's address bar and paste it here.");
        eprintln!();
        eprint!("Paste redirect URL: ");

        let mut line = String::new();
        let read = input.read_line(&mut line).await?;
        if read == 0 {
            return Err(FlowError::InputClosed);
        }

        let (code, got_state) = parse_redirect_url(line.trim())?;
        if let Some(got) = got_state {
            if got != state {
                return Err(FlowError::StateMismatch);
            }
        }

        let token = exchange_code(
            &self.http,
            &self.endpoint.token_url,
            &code,
            redirect_uri,
            &creds.client_id,
            &creds.client_secret,
        )
        .await?;
        token.require_refresh_token()
    }
}

/// Parse `code` and `state` out of a pasted redirect URL.
pub fn parse_redirect_url(raw: &str) -> Result<(String, Option<String>), FlowError> {
    let (_, query) = raw
        .split_once('?')
        .ok_or_else(|| FlowError::InvalidRedirect(raw.to_string()))?;
    let query = query.split('#').next().unwrap_or(query);
    let params: CallbackParams = serde_urlencoded::from_str(query)
        .map_err(|_| FlowError::InvalidRedirect(raw.to_string()))?;

    if let Some(error) = params.error {
        return Err(FlowError::Cancelled(error));
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(FlowError::MissingCode)?;
    Ok((code, params.state.filter(|s| !s.is_empty())))
}

fn callback_router(state: CallbackState) -> Router {
    Router::new()
        .route("/oauth2/callback", get(handle_callback))
        .with_state(state)
}

async fn handle_callback(
    State(st): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    let (outcome, status, page, context) = classify(&params, &st.expected_state);

    // First writer wins; duplicate redirects find the slot empty and their
    // payload is discarded without altering the outcome.
    if let Some(tx) = st.slot.lock().expect("outcome slot poisoned").take() {
        let _ = tx.send(outcome);
    } else {
        debug!("duplicate callback ignored");
    }

    (status, Html(st.renderer.render(page, &context)))
}

/// Decide outcome, HTTP status, and page for one callback request.
/// An `error` parameter counts as cancellation even when a code is present.
fn classify(
    params: &CallbackParams,
    expected_state: &str,
) -> (CallbackOutcome, StatusCode, Page, serde_json::Value) {
    if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
        return (
            CallbackOutcome::Cancelled(error.to_string()),
            StatusCode::OK,
            Page::Cancelled,
            json!({}),
        );
    }
    if params.state.as_deref() != Some(expected_state) {
        warn!("callback state mismatch");
        return (
            CallbackOutcome::StateMismatch,
            StatusCode::BAD_REQUEST,
            Page::Error,
            json!({"message": "State mismatch - possible CSRF attack. Please try again."}),
        );
    }
    match params.code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => (
            CallbackOutcome::Code(code.to_string()),
            StatusCode::OK,
            Page::Success,
            json!({}),
        ),
        None => (
            CallbackOutcome::MissingCode,
            StatusCode::BAD_REQUEST,
            Page::Error,
            json!({"message": "Missing authorization code. Please try again."}),
        ),
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
