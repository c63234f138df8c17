//! Device-management API client

pub mod client;

pub use client::{ApiEnvelope, ApiResult, DeviceApi, DeviceApiClient, StreamGrant};
