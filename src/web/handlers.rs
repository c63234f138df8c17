//! Control bridge request handlers

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::ApiEnvelope;
use crate::control::ControlCommand;
use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub direction: String,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub ok: bool,
    pub direction: &'static str,
    pub via: &'static str,
}

/// Serve the rendered viewer page
pub async fn viewer_page(State(state): State<Arc<AppState>>) -> Result<Response> {
    let asset = state
        .viewer_asset()
        .ok_or_else(|| AppError::NotFound("Viewer not ready".to_string()))?;

    let headers = [
        (header::CONTENT_TYPE, "text/html; charset=utf-8"),
        // the viewer reads gamepads for joystick input
        (
            header::HeaderName::from_static("permissions-policy"),
            "gamepad=(self)",
        ),
    ];

    Ok((headers, asset.as_ref().clone()).into_response())
}

/// Latch a drive direction (or stop) onto the command broadcaster.
///
/// Refused with 503 while the realtime channel is not ready; the latch is
/// never touched in that case.
pub async fn control(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>> {
    let command = ControlCommand::from_token(&request.direction).ok_or_else(|| {
        AppError::BadRequest(format!("Unknown direction '{}'", request.direction))
    })?;

    if !state.session.is_ready() {
        return Err(AppError::ServiceUnavailable(
            "Realtime channel not ready".to_string(),
        ));
    }

    state.broadcaster.apply(command).await;

    Ok(Json(ControlResponse {
        ok: true,
        direction: command.token(),
        via: "rtc",
    }))
}

/// Activate the robot's remote-control mode
pub async fn enter_control(State(state): State<Arc<AppState>>) -> Result<Json<ApiEnvelope>> {
    let envelope = state.api.enter_control_mode(state.device_sn()).await?;
    Ok(Json(envelope))
}

/// Leave remote-control mode; the device's answer is passed through verbatim
pub async fn exit_control(State(state): State<Arc<AppState>>) -> Result<Json<ApiEnvelope>> {
    let envelope = state.api.exit_control_mode(state.device_sn()).await?;
    Ok(Json(envelope))
}

/// Send the robot back to its dock
pub async fn go_home(State(state): State<Arc<AppState>>) -> Result<Json<ApiEnvelope>> {
    let envelope = state.api.go_home(state.device_sn()).await?;
    Ok(Json(envelope))
}

pub async fn not_found() -> AppError {
    AppError::NotFound("No such endpoint".to_string())
}
