//! Viewer page rendering
//!
//! The viewer is a single self-contained HTML page with the stream
//! credentials baked in at render time. The bridge only stores and serves
//! the finished bytes.

use crate::rtc::Credentials;

const TEMPLATE: &str = include_str!("../../assets/viewer.html");

/// Render the viewer page for the given stream credentials
pub fn render_viewer_page(creds: &Credentials) -> String {
    // JSON-encode the token so it lands as a valid JS string literal
    let token_json = serde_json::to_string(&creds.token)
        .unwrap_or_else(|_| "\"\"".to_string());

    TEMPLATE
        .replace("__APP_ID__", &creds.app_id)
        .replace("__CHANNEL__", &creds.channel)
        .replace("__TOKEN_JSON__", &token_json)
        .replace("__UID__", &creds.uid.to_string())
        .replace("__PUBLISH_UID__", &creds.publish_uid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            app_id: "app123".to_string(),
            channel: "room7".to_string(),
            token: "to\"ken".to_string(),
            uid: 42,
            publish_uid: 50000,
        }
    }

    #[test]
    fn test_render_embeds_credentials() {
        let page = render_viewer_page(&creds());

        assert!(page.contains("const appId = \"app123\";"));
        assert!(page.contains("const channel = \"room7\";"));
        assert!(page.contains("const uid = 42;"));
        assert!(page.contains("const publishUid = 50000;"));
        assert!(!page.contains("__APP_ID__"));
    }

    #[test]
    fn test_token_is_escaped_as_js_literal() {
        let page = render_viewer_page(&creds());
        assert!(page.contains(r#"const token = "to\"ken" || null;"#));
    }
}
