//! Session orchestration
//!
//! The device hands out one live-stream slot at a time and every grant is
//! scoped to the UID it was issued for, so the channel session and the
//! browser viewer cannot share credentials. The orchestrator runs the
//! three-step dance: take a grant for the command channel, release the
//! stream slot, then take a second grant for the viewer.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::rtc::Credentials;
use crate::state::AppState;
use crate::web::viewer::render_viewer_page;

/// Pause between releasing the stream slot and requesting the second grant;
/// the device needs a moment to actually free the slot
const SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct SessionOrchestrator {
    state: Arc<AppState>,
}

impl SessionOrchestrator {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    async fn resolve_grant(&self) -> Result<Credentials> {
        let sn = self.state.device_sn();
        let grant = self.state.api.open_stream(sn).await?;
        let creds = Credentials::parse_stream_grant(&grant.url, grant.publish_uid);
        if !creds.is_complete() {
            return Err(AppError::CredentialAcquisition(
                "Stream grant is missing required fields".to_string(),
            ));
        }
        Ok(creds)
    }

    /// Bring the command channel and the viewer up.
    ///
    /// Step order is load-bearing: the stream slot must be released before
    /// the viewer grant is requested, and the command channel must already
    /// be connected by then since its own grant dies with the slot release.
    pub async fn start(&self) -> Result<()> {
        info!("Step 1/3: acquiring command channel grant");
        let channel_creds = self.resolve_grant().await?;

        self.state.session.connect(&channel_creds).await?;
        self.state.broadcaster.start();

        info!("Step 2/3: releasing the live-stream slot for the viewer");
        if let Err(e) = self.state.api.stop_stream(self.state.device_sn()).await {
            warn!("Failed to release stream slot: {}", e);
        }
        tokio::time::sleep(SETTLE_DELAY).await;

        info!("Step 3/3: acquiring viewer grant");
        let viewer_creds = self.resolve_grant().await?;
        if viewer_creds.uid == channel_creds.uid {
            warn!(
                "Viewer grant reuses the channel UID {}; the device may evict one of the two",
                viewer_creds.uid
            );
        }

        let page = render_viewer_page(&viewer_creds);
        self.state.publish_viewer_asset(Bytes::from(page));
        info!(
            "Viewer ready at http://127.0.0.1:{}/",
            self.state.config.control_port
        );

        Ok(())
    }

    /// Tear everything down in order; every step runs even when an earlier
    /// one fails
    pub async fn shutdown(&self) {
        info!("Shutting down");
        let sn = self.state.device_sn();

        self.state.broadcaster.stop().await;

        if let Err(e) = self.state.api.exit_control_mode(sn).await {
            warn!("Failed to exit control mode: {}", e);
        }

        if let Err(e) = self.state.session.disconnect().await {
            warn!("Failed to disconnect session: {}", e);
        }

        // stops the bridge's accept loop
        let _ = self.state.shutdown_tx.send(());

        if let Err(e) = self.state.api.stop_stream(sn).await {
            warn!("Failed to release stream slot: {}", e);
        }
    }
}
