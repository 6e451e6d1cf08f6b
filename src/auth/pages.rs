//! Human-facing browser pages.
//!
//! The flows only need "render a page given a name and a data object"; the
//! full HTML templates live outside this crate. The default renderer emits
//! minimal self-contained pages so the flows work without any template pack.

use serde_json::Value;

/// Pages the flows render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Page {
    /// Authorization finished; context may carry `email` and `services`.
    Success,
    /// User declined at the consent screen.
    Cancelled,
    /// Terminal failure; context carries `message`.
    Error,
    /// Accounts-manager index; context carries `csrf_token`.
    Accounts,
}

pub trait PageRenderer: Send + Sync {
    fn render(&self, page: Page, context: &Value) -> String;
}

/// Plain-HTML fallback renderer.
pub struct DefaultPages;

impl PageRenderer for DefaultPages {
    fn render(&self, page: Page, context: &Value) -> String {
        match page {
            Page::Success => {
                let email = context["email"].as_str().unwrap_or_default();
                let detail = if email.is_empty() {
                    String::new()
                } else {
                    format!("<p>Authorized <b>{}</b>.</p>", escape(email))
                };
                format!(
                    "<!DOCTYPE html><html><body><h1>Authorization complete</h1>{}\
                     <p>You can close this window.</p></body></html>",
                    detail
                )
            }
            Page::Cancelled => "<!DOCTYPE html><html><body><h1>Authorization cancelled</h1>\
                 <p>You can close this window.</p></body></html>"
                .to_string(),
            Page::Error => {
                let message = context["message"].as_str().unwrap_or("unexpected error");
                format!(
                    "<!DOCTYPE html><html><body><h1>Authorization failed</h1><p>{}</p></body></html>",
                    escape(message)
                )
            }
            Page::Accounts => {
                let csrf = context["csrf_token"].as_str().unwrap_or_default();
                format!(
                    "<!DOCTYPE html><html><head><meta name=\"csrf-token\" content=\"{}\"></head>\
                     <body><h1>Accounts</h1>\
                     <p>Fetch <code>/accounts</code> for the stored accounts, \
                     or visit <a href=\"/auth/start\">/auth/start</a> to add one.</p>\
                     </body></html>",
                    escape(csrf)
                )
            }
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_page_escapes_message() {
        let html = DefaultPages.render(Page::Error, &json!({"message": "<script>"}));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_accounts_page_embeds_csrf_token() {
        let html = DefaultPages.render(Page::Accounts, &json!({"csrf_token": "tok123"}));
        assert!(html.contains("tok123"));
    }
}
