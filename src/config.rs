//! Application configuration
//!
//! Settings come from three layers, lowest priority first: a `.env` file in
//! the working directory, process environment variables, and CLI overrides
//! applied by `main`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, Result};

/// Default device-management API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://home-api-vg.djigate.com";

/// Default SDP exchange gateway for the realtime transport
pub const DEFAULT_RTC_GATEWAY_URL: &str = "https://rtc-gateway-vg.djigate.com/v2/sdp";

/// Default local control bridge port
pub const DEFAULT_CONTROL_PORT: u16 = 8765;

/// Runtime configuration for the bridge
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Member token sent as `x-member-token` on every device API call
    pub user_token: String,
    /// Device serial number the API is keyed by
    pub device_sn: String,
    /// Device-management API base URL
    pub api_base_url: String,
    /// Locale sent as `X-DJI-locale`
    pub locale: String,
    /// SDP exchange gateway for the realtime transport
    pub rtc_gateway_url: String,
    /// Loopback port for the local control bridge
    pub control_port: u16,
}

impl AppConfig {
    /// Load configuration from an optional `.env` file plus the process
    /// environment. Environment variables win over file entries.
    pub fn load(env_file: &Path) -> Result<Self> {
        let mut vars = if env_file.exists() {
            parse_env_file(&std::fs::read_to_string(env_file)?)
        } else {
            HashMap::new()
        };

        for key in [
            "DJI_USER_TOKEN",
            "DJI_DEVICE_SN",
            "DJI_API_URL",
            "DJI_LOCALE",
            "DJI_RTC_GATEWAY",
            "DJI_CONTROL_PORT",
        ] {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }

        let get = |key: &str| vars.get(key).cloned().unwrap_or_default();

        let control_port = match vars.get("DJI_CONTROL_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid DJI_CONTROL_PORT: {}", raw)))?,
            None => DEFAULT_CONTROL_PORT,
        };

        Ok(Self {
            user_token: get("DJI_USER_TOKEN"),
            device_sn: get("DJI_DEVICE_SN"),
            api_base_url: non_empty_or(get("DJI_API_URL"), DEFAULT_API_BASE_URL),
            locale: non_empty_or(get("DJI_LOCALE"), "en_US"),
            rtc_gateway_url: non_empty_or(get("DJI_RTC_GATEWAY"), DEFAULT_RTC_GATEWAY_URL),
            control_port,
        })
    }

    /// Validate that the fields required to reach the device are present
    pub fn validate(&self) -> Result<()> {
        if self.user_token.is_empty() {
            return Err(AppError::Config(
                "DJI_USER_TOKEN is missing (set it in .env or the environment)".to_string(),
            ));
        }
        if self.device_sn.is_empty() {
            return Err(AppError::Config(
                "DJI_DEVICE_SN is missing (set it in .env or the environment)".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Parse `KEY=VALUE` lines, skipping blanks and `#` comments
fn parse_env_file(contents: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            vars.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    vars
}
