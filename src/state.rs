//! Shared application state

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::api::DeviceApi;
use crate::config::AppConfig;
use crate::control::CommandBroadcaster;
use crate::rtc::RtcChannelSession;

/// State shared by the control bridge handlers and the orchestrator
pub struct AppState {
    pub config: AppConfig,
    pub api: Arc<dyn DeviceApi>,
    pub session: Arc<RtcChannelSession>,
    pub broadcaster: Arc<CommandBroadcaster>,
    /// Rendered viewer page; absent until the orchestrator publishes it
    viewer_asset: ArcSwapOption<Bytes>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        api: Arc<dyn DeviceApi>,
        session: Arc<RtcChannelSession>,
        broadcaster: Arc<CommandBroadcaster>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            api,
            session,
            broadcaster,
            viewer_asset: ArcSwapOption::empty(),
            shutdown_tx,
        })
    }

    pub fn device_sn(&self) -> &str {
        &self.config.device_sn
    }

    pub fn publish_viewer_asset(&self, asset: Bytes) {
        self.viewer_asset.store(Some(Arc::new(asset)));
    }

    pub fn viewer_asset(&self) -> Option<Arc<Bytes>> {
        self.viewer_asset.load_full()
    }
}
