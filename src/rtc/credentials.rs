//! Connection grant parsing

/// Credentials for one realtime transport session.
///
/// `uid` is the local operator principal; `publish_uid` is the principal the
/// robot publishes under. The two are distinct and a grant is only valid for
/// its own `uid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: String,
    pub channel: String,
    pub token: String,
    pub uid: u32,
    pub publish_uid: u32,
}

impl Credentials {
    /// Parse a vendor connection grant.
    ///
    /// The grant arrives as a URL-encoded `key=value` string in the
    /// `openStream/start` response; `publish_uid` is carried out-of-band in
    /// the same response. This never fails: absent or malformed fields come
    /// back empty (or 0 for `uid`) and callers validate before use.
    pub fn parse_stream_grant(grant: &str, publish_uid: u32) -> Self {
        let mut app_id = String::new();
        let mut channel = String::new();
        let mut token = String::new();
        let mut uid = 0u32;

        for part in grant.split('&') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let decoded = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());

            match key {
                "app_id" => app_id = decoded,
                "channel" => channel = decoded,
                "token" => token = decoded,
                "uid" => uid = decoded.parse().unwrap_or(0),
                _ => {}
            }
        }

        Self {
            app_id,
            channel,
            token,
            uid,
            publish_uid,
        }
    }

    /// Whether the fields required to connect are all present
    pub fn is_complete(&self) -> bool {
        !self.app_id.is_empty() && !self.channel.is_empty() && !self.token.is_empty()
    }
}
