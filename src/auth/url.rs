//! Authorization URL construction.

/// Build the provider authorization URL.
///
/// `scopes` must already be the sorted union from the registry so that two
/// runs with the same service set produce byte-identical URLs.
pub fn build_auth_url(
    auth_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    force_consent: bool,
) -> String {
    let scope = scopes.join(" ");
    let mut url = format!(
        "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code&access_type=offline&include_granted_scopes=true",
        auth_url,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scope),
        urlencoding::encode(state),
    );
    if force_consent {
        url.push_str("&prompt=consent");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> Vec<String> {
        vec!["a-scope".to_string(), "b-scope".to_string()]
    }

    #[test]
    fn test_build_auth_url() {
        let url = build_auth_url(
            "https://example.com/auth",
            "client-id",
            "http://127.0.0.1:4321/oauth2/callback",
            &scopes(),
            "random_state",
            false,
        );

        assert!(url.starts_with("https://example.com/auth?"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A4321%2Foauth2%2Fcallback"));
        assert!(url.contains("scope=a-scope%20b-scope"));
        assert!(url.contains("state=random_state"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("include_granted_scopes=true"));
        assert!(!url.contains("prompt=consent"));
    }

    #[test]
    fn test_force_consent_adds_prompt() {
        let url = build_auth_url(
            "https://example.com/auth",
            "client-id",
            "http://127.0.0.1:4321/oauth2/callback",
            &scopes(),
            "s",
            true,
        );
        assert!(url.contains("prompt=consent"));
    }
}
