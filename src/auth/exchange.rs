//! Authorization-code exchange at the provider's token endpoint.

use std::collections::HashMap;

use serde::Deserialize;

use super::FlowError;

/// Token endpoint response (standard OAuth 2.0).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Exchange an authorization code for tokens.
///
/// Non-2xx responses map to [`FlowError::TokenExchange`] carrying the status
/// and body so the caller can print a useful diagnosis.
pub async fn exchange_code(
    http: &reqwest::Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse, FlowError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);
    form.insert("redirect_uri", redirect_uri);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    tracing::debug!(token_url = %token_url, "exchanging authorization code");

    let response = http
        .post(token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(FlowError::TokenExchange { status, body });
    }

    let token: TokenResponse = response.json().await?;

    tracing::debug!(
        has_refresh_token = token.refresh_token.is_some(),
        expires_in = ?token.expires_in,
        "token exchange successful"
    );

    Ok(token)
}

impl TokenResponse {
    /// The refresh token, or [`FlowError::NoRefreshToken`] when the provider
    /// omitted it (repeat consent without `prompt=consent`).
    pub fn require_refresh_token(&self) -> Result<String, FlowError> {
        match self.refresh_token.as_deref() {
            Some(t) if !t.is_empty() => Ok(t.to_string()),
            _ => Err(FlowError::NoRefreshToken),
        }
    }
}
