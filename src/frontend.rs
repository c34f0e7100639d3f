//! Static pairing page served at `/`.

use pairgate_core::config::Platform;

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");

/// Render the page with the platform label filled in.
///
/// With `auth_required` the page shows an API key field and sends it as a
/// bearer token.
pub fn render(platform: Platform, auth_required: bool) -> String {
    let auth_attr = if auth_required { "" } else { "hidden" };
    INDEX_TEMPLATE
        .replace("{{PLATFORM}}", platform.label())
        .replace("{{AUTH_HIDDEN}}", auth_attr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_every_placeholder() {
        let html = render(Platform::Railway, false);
        assert!(!html.contains("{{PLATFORM}}"));
        assert!(!html.contains("{{AUTH_HIDDEN}}"));
        assert!(html.contains(r#"<div id="auth" hidden>"#));
        assert!(html.contains("<title>WhatsApp Pairing - Railway</title>"));
        assert!(html.contains("fetch('/api/start'"));
    }

    #[test]
    fn test_render_shows_token_field_when_auth_required() {
        let html = render(Platform::Fly, true);
        assert!(html.contains(r#"<div id="auth" >"#));
        assert!(html.contains("'Bearer ' + token"));
    }
}
