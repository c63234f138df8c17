//! HTTP client for the vendor's device-management API
//!
//! Every call is a JSON POST authenticated by the member token; the server
//! wraps its reply in a `{result: {code, msg}, data}` envelope where
//! `code == 0` means success. Endpoints are keyed by device serial.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// The vendor's mobile app identifier; some endpoints refuse other agents
const USER_AGENT: &str = "DJI-Home/1.5.13";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Publisher UID the robot uses when the response does not say otherwise
const DEFAULT_PUBLISH_UID: u32 = 50000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResult {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
}

impl Default for ApiResult {
    /// A missing result block must never read as success
    fn default() -> Self {
        Self { code: -1, msg: None }
    }
}

/// Standard response envelope of the device-management API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub result: ApiResult,
    #[serde(default)]
    pub data: Option<Value>,
    /// Any other top-level fields the device sends, passed through verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiEnvelope {
    pub fn is_success(&self) -> bool {
        self.result.code == 0
    }

    fn describe_failure(&self) -> String {
        match &self.result.msg {
            Some(msg) => format!("code {} ({})", self.result.code, msg),
            None => format!("code {}", self.result.code),
        }
    }
}

/// The raw connection grant handed out by `openStream/start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamGrant {
    /// URL-encoded `key=value` grant string
    pub url: String,
    /// UID the robot publishes under in the channel
    pub publish_uid: u32,
}

/// Device-management API operations.
///
/// Only `post` touches the network; the named operations are default methods
/// on top of it so tests can swap in a recording implementation.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn post(&self, endpoint: &str, body: Value) -> Result<ApiEnvelope>;

    /// Request a fresh stream grant for the device
    async fn open_stream(&self, sn: &str) -> Result<StreamGrant> {
        let endpoint = format!("/cr/app/api/v1/devices/{}/live/openStream/start", sn);
        let envelope = self.post(&endpoint, json!({})).await?;
        if !envelope.is_success() {
            return Err(AppError::CredentialAcquisition(format!(
                "openStream/start failed: {}",
                envelope.describe_failure()
            )));
        }

        let data = envelope.data.unwrap_or(Value::Null);
        let url = data
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if url.is_empty() {
            return Err(AppError::CredentialAcquisition(
                "openStream/start response carried no grant".to_string(),
            ));
        }
        let publish_uid = data
            .get("publish_uid")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(DEFAULT_PUBLISH_UID)) as u32;

        Ok(StreamGrant { url, publish_uid })
    }

    /// Release the device's single live-stream slot
    async fn stop_stream(&self, sn: &str) -> Result<ApiEnvelope> {
        self.post(
            &format!("/cr/app/api/v1/devices/{}/live/stop", sn),
            json!({}),
        )
        .await
    }

    /// Put the robot into remote-control mode.
    ///
    /// Firmware revisions expose this under different endpoints, so the
    /// known candidates are tried in a fixed order and the first accepted
    /// one wins. A candidate failure is not retried; if none succeed the
    /// failures are reported as one aggregated error.
    async fn enter_control_mode(&self, sn: &str) -> Result<ApiEnvelope> {
        let candidates = [
            (
                format!(
                    "/cr/app/api/v1/devices/{}/live/activationCode/enterModeB",
                    sn
                ),
                json!({}),
            ),
            (
                format!(
                    "/cr/app/api/v1/devices/{}/live/activationCode/enterMode",
                    sn
                ),
                json!({"mode": "control"}),
            ),
            (format!("/cr/app/api/v1/devices/{}/rc/enter", sn), json!({})),
        ];

        let mut failures = Vec::new();
        for (endpoint, body) in candidates {
            match self.post(&endpoint, body).await {
                Ok(envelope) if envelope.is_success() => {
                    info!("Control mode activated via {}", endpoint);
                    return Ok(envelope);
                }
                Ok(envelope) => {
                    failures.push(format!("{}: {}", endpoint, envelope.describe_failure()))
                }
                Err(e) => failures.push(format!("{}: {}", endpoint, e)),
            }
        }

        Err(AppError::ControlModeActivation(failures.join("; ")))
    }

    /// Leave remote-control mode
    async fn exit_control_mode(&self, sn: &str) -> Result<ApiEnvelope> {
        self.post(
            &format!("/cr/app/api/v1/devices/{}/live/activationCode/exitMode", sn),
            json!({}),
        )
        .await
    }

    /// Send the robot back to its dock
    async fn go_home(&self, sn: &str) -> Result<ApiEnvelope> {
        self.post(
            &format!("/cr/app/api/v1/devices/{}/jobs/goHomes/start", sn),
            json!({}),
        )
        .await
    }
}

/// Production client over reqwest
pub struct DeviceApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl DeviceApiClient {
    pub fn new(base_url: &str, user_token: &str, locale: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-member-token",
            HeaderValue::from_str(user_token)
                .map_err(|_| AppError::Config("Invalid user token".to_string()))?,
        );
        headers.insert(
            "X-DJI-locale",
            HeaderValue::from_str(locale)
                .map_err(|_| AppError::Config("Invalid locale".to_string()))?,
        );

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl DeviceApi for DeviceApiClient {
    async fn post(&self, endpoint: &str, body: Value) -> Result<ApiEnvelope> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("POST {}", url);

        let envelope: ApiEnvelope = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        debug!("POST {} -> code {}", endpoint, envelope.result.code);
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every endpoint hit; succeeds only on the chosen call index
    struct ScriptedApi {
        calls: Mutex<Vec<String>>,
        succeed_at: Option<usize>,
        data: Option<Value>,
    }

    impl ScriptedApi {
        fn new(succeed_at: Option<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                succeed_at,
                data: None,
            }
        }
    }

    #[async_trait]
    impl DeviceApi for ScriptedApi {
        async fn post(&self, endpoint: &str, _body: Value) -> Result<ApiEnvelope> {
            let index = {
                let mut calls = self.calls.lock();
                calls.push(endpoint.to_string());
                calls.len() - 1
            };

            if self.succeed_at == Some(index) {
                Ok(ApiEnvelope {
                    result: ApiResult { code: 0, msg: None },
                    data: self.data.clone(),
                    extra: Map::new(),
                })
            } else {
                Ok(ApiEnvelope {
                    result: ApiResult {
                        code: 419,
                        msg: Some("not supported".to_string()),
                    },
                    data: None,
                    extra: Map::new(),
                })
            }
        }
    }

    #[tokio::test]
    async fn test_enter_control_mode_stops_at_first_success() {
        let api = ScriptedApi::new(Some(1));
        api.enter_control_mode("SN1").await.unwrap();

        let calls = api.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].ends_with("/live/activationCode/enterModeB"));
        assert!(calls[1].ends_with("/live/activationCode/enterMode"));
    }

    #[tokio::test]
    async fn test_enter_control_mode_tries_all_three_in_order() {
        let api = ScriptedApi::new(Some(2));
        let envelope = api.enter_control_mode("SN1").await.unwrap();
        assert!(envelope.is_success());

        let calls = api.calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].ends_with("/live/activationCode/enterModeB"));
        assert!(calls[1].ends_with("/live/activationCode/enterMode"));
        assert!(calls[2].ends_with("/rc/enter"));
    }

    #[tokio::test]
    async fn test_enter_control_mode_aggregates_failures() {
        let api = ScriptedApi::new(None);
        let err = api.enter_control_mode("SN1").await.unwrap_err();

        let calls = api.calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].ends_with("/rc/enter"));

        match err {
            AppError::ControlModeActivation(detail) => {
                assert!(detail.contains("enterModeB"));
                assert!(detail.contains("rc/enter"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_stream_parses_grant() {
        let mut api = ScriptedApi::new(Some(0));
        api.data = Some(json!({
            "url": "app_id=a&channel=c&token=t&uid=7",
            "publish_uid": 60001,
        }));

        let grant = api.open_stream("SN1").await.unwrap();
        assert_eq!(grant.url, "app_id=a&channel=c&token=t&uid=7");
        assert_eq!(grant.publish_uid, 60001);
    }

    #[tokio::test]
    async fn test_open_stream_defaults_publish_uid() {
        let mut api = ScriptedApi::new(Some(0));
        api.data = Some(json!({"url": "app_id=a&channel=c&token=t&uid=7"}));

        let grant = api.open_stream("SN1").await.unwrap();
        assert_eq!(grant.publish_uid, DEFAULT_PUBLISH_UID);
    }

    #[tokio::test]
    async fn test_open_stream_rejects_failure_code() {
        let api = ScriptedApi::new(None);
        let err = api.open_stream("SN1").await.unwrap_err();
        assert!(matches!(err, AppError::CredentialAcquisition(_)));
    }

    #[test]
    fn test_missing_result_block_is_not_success() {
        let envelope: ApiEnvelope = serde_json::from_str("{}").unwrap();
        assert!(!envelope.is_success());
    }

    #[test]
    fn test_envelope_preserves_unknown_fields() {
        let raw = r#"{"result":{"code":0},"data":null,"request_id":"abc-123"}"#;
        let envelope: ApiEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.extra.get("request_id").unwrap(), "abc-123");

        let reserialized = serde_json::to_value(&envelope).unwrap();
        assert_eq!(reserialized["request_id"], "abc-123");
    }
}
