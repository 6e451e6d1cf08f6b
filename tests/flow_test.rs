// Integration tests for the authorization-code flows

use std::sync::Arc;
use std::time::Duration;

use gauth::auth::flow::Authorizer;
use gauth::auth::{
    AuthorizeOptions, ClientCredentials, CredentialsProvider, FlowError, OAuthEndpoint,
};
use gauth::services::Service;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_credentials() -> Arc<dyn CredentialsProvider> {
    Arc::new(|| -> Result<ClientCredentials, FlowError> {
        Ok(ClientCredentials {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        })
    })
}

fn test_authorizer(server: &MockServer) -> Authorizer {
    Authorizer::new(test_credentials())
        .with_endpoint(OAuthEndpoint {
            auth_url: format!("{}/auth", server.uri()),
            token_url: format!("{}/token", server.uri()),
            userinfo_url: format!("{}/userinfo", server.uri()),
        })
        .with_state_source(|| "fixed-state".to_string())
        .with_success_display(Duration::ZERO)
        .with_browser_opener(|_| {})
}

fn opts() -> AuthorizeOptions {
    AuthorizeOptions {
        services: vec![Service::Gmail],
        scopes: vec!["https://mail.google.com/".to_string()],
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Extract and decode one query parameter from a URL.
fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            return Some(urlencoding::decode(v).ok()?.into_owned());
        }
    }
    None
}

/// Browser stand-in: follows the auth URL's redirect_uri straight back to
/// the loopback listener with the given callback query string.
fn callback_opener(params: &'static str) -> impl Fn(&str) + Send + Sync + 'static {
    move |auth_url: &str| {
        let redirect = query_param(auth_url, "redirect_uri").expect("auth URL has redirect_uri");
        tokio::spawn(async move {
            let _ = reqwest::get(format!("{redirect}?{params}")).await;
        });
    }
}

async fn mount_token_success(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.access",
            "refresh_token": "1//refresh",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_interactive_flow_returns_refresh_token() {
    let server = MockServer::start().await;
    mount_token_success(&server, 1).await;

    let authorizer =
        test_authorizer(&server).with_browser_opener(callback_opener("code=good-code&state=fixed-state"));

    let refresh = authorizer.authorize(opts()).await.unwrap();
    assert_eq!(refresh, "1//refresh");
}

#[tokio::test]
async fn test_interactive_flow_ignores_duplicate_callback() {
    let server = MockServer::start().await;
    // Only the first callback's code may reach the token endpoint.
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=first-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.access",
            "refresh_token": "1//refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let authorizer = test_authorizer(&server)
        // Keep the listener up long enough for the duplicate to arrive.
        .with_success_display(Duration::from_millis(200))
        .with_browser_opener(|auth_url: &str| {
            let redirect =
                query_param(auth_url, "redirect_uri").expect("auth URL has redirect_uri");
            tokio::spawn(async move {
                let _ = reqwest::get(format!("{redirect}?code=first-code&state=fixed-state")).await;
                let _ = reqwest::get(format!("{redirect}?code=second-code&state=fixed-state")).await;
            });
        });

    let refresh = authorizer.authorize(opts()).await.unwrap();
    assert_eq!(refresh, "1//refresh");
}

#[tokio::test]
async fn test_interactive_flow_rejects_forged_state() {
    let server = MockServer::start().await;
    // A forged callback must never reach the token endpoint.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let authorizer =
        test_authorizer(&server).with_browser_opener(callback_opener("code=stolen&state=forged"));

    let err = authorizer.authorize(opts()).await.unwrap_err();
    assert!(matches!(err, FlowError::StateMismatch));
}

#[tokio::test]
async fn test_interactive_flow_error_param_is_cancellation() {
    let server = MockServer::start().await;

    let authorizer =
        test_authorizer(&server).with_browser_opener(callback_opener("error=access_denied"));

    let err = authorizer.authorize(opts()).await.unwrap_err();
    assert!(matches!(err, FlowError::Cancelled(reason) if reason == "access_denied"));
}

#[tokio::test]
async fn test_interactive_flow_times_out_without_callback() {
    let server = MockServer::start().await;

    let authorizer = test_authorizer(&server);
    let err = authorizer
        .authorize(AuthorizeOptions {
            timeout: Duration::from_millis(100),
            ..opts()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Timeout));
}

#[tokio::test]
async fn test_success_display_never_outlives_flow_deadline() {
    let server = MockServer::start().await;
    mount_token_success(&server, 1).await;

    // A long display window must be cut short by the overall deadline.
    let authorizer = test_authorizer(&server)
        .with_success_display(Duration::from_secs(600))
        .with_browser_opener(callback_opener("code=good-code&state=fixed-state"));

    let refresh = tokio::time::timeout(
        Duration::from_secs(3),
        authorizer.authorize(AuthorizeOptions {
            timeout: Duration::from_millis(500),
            ..opts()
        }),
    )
    .await
    .expect("flow exceeded its deadline")
    .unwrap();
    assert_eq!(refresh, "1//refresh");
}

#[tokio::test]
async fn test_empty_scopes_rejected_before_any_listener() {
    let server = MockServer::start().await;

    let authorizer = test_authorizer(&server);
    let err = authorizer
        .authorize(AuthorizeOptions {
            scopes: Vec::new(),
            ..opts()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::EmptyScopes));
}

#[tokio::test]
async fn test_interactive_flow_missing_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "ya29.access"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let authorizer =
        test_authorizer(&server).with_browser_opener(callback_opener("code=good-code&state=fixed-state"));

    let err = authorizer.authorize(opts()).await.unwrap_err();
    assert!(matches!(err, FlowError::NoRefreshToken));
}

#[tokio::test]
async fn test_manual_flow_accepts_pasted_redirect() {
    let server = MockServer::start().await;
    mount_token_success(&server, 1).await;

    let authorizer = test_authorizer(&server);
    let input = b"http://localhost:1/?code=pasted-code&state=fixed-state\n";

    let refresh = authorizer
        .authorize_with_input(
            AuthorizeOptions {
                manual: true,
                ..opts()
            },
            &input[..],
        )
        .await
        .unwrap();
    assert_eq!(refresh, "1//refresh");
}

#[tokio::test]
async fn test_manual_flow_rejects_non_url_paste() {
    let server = MockServer::start().await;
    // Garbage input must fail before any endpoint contact.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let authorizer = test_authorizer(&server);
    let err = authorizer
        .authorize_with_input(
            AuthorizeOptions {
                manual: true,
                ..opts()
            },
            &b"not a url\n"[..],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::InvalidRedirect(_)));
}

#[tokio::test]
async fn test_manual_flow_rejects_mismatched_state() {
    let server = MockServer::start().await;

    let authorizer = test_authorizer(&server);
    let err = authorizer
        .authorize_with_input(
            AuthorizeOptions {
                manual: true,
                ..opts()
            },
            &b"http://localhost:1/?code=pasted-code&state=forged\n"[..],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::StateMismatch));
}

#[tokio::test]
async fn test_manual_flow_closed_input() {
    let server = MockServer::start().await;

    let authorizer = test_authorizer(&server);
    let err = authorizer
        .authorize_with_input(
            AuthorizeOptions {
                manual: true,
                ..opts()
            },
            &b""[..],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::InputClosed));
}
