//! Realtime transport seam and WebRTC implementation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use super::credentials::Credentials;
use super::events::TransportEvent;
use crate::error::{AppError, Result};

/// Label of the dedicated command channel
const CONTROL_CHANNEL_LABEL: &str = "control";

/// Realtime transport backend.
///
/// Lifecycle changes are reported as [`TransportEvent`]s on the channel the
/// implementation was constructed with; the session owns all state
/// transitions. `send` is fire-and-forget: the caller never waits for
/// delivery confirmation.
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Establish the transport connection for the given grant
    async fn connect(&self, creds: &Credentials) -> Result<()>;

    /// Create the dedicated reliable, ordered command channel.
    ///
    /// Failure here is non-fatal to the caller: the transport falls back to
    /// whatever default channel the remote side opens.
    async fn create_data_channel(&self) -> Result<()>;

    /// Send one message on the command channel
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Tear down the connection; idempotent
    async fn disconnect(&self) -> Result<()>;
}

#[derive(serde::Serialize)]
struct SdpExchangeRequest<'a> {
    app_id: &'a str,
    channel: &'a str,
    token: &'a str,
    uid: u32,
    offer: String,
}

#[derive(Deserialize)]
struct SdpExchangeResponse {
    code: i32,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

/// WebRTC-backed transport.
///
/// Joins the vendor channel by exchanging SDP with the vendor's signaling
/// gateway over HTTPS, then runs command traffic over a reliable ordered
/// data channel on the resulting peer connection.
pub struct PeerTransport {
    gateway_url: String,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<TransportEvent>,
    pc: RwLock<Option<Arc<RTCPeerConnection>>>,
    /// Active command channel; either our dedicated channel or the remote
    /// side's default channel when dedicated creation was refused
    channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    was_connected: Arc<AtomicBool>,
    peer_seen: Arc<AtomicBool>,
}

impl PeerTransport {
    pub fn new(gateway_url: String, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            gateway_url,
            http: reqwest::Client::new(),
            events,
            pc: RwLock::new(None),
            channel: Arc::new(RwLock::new(None)),
            was_connected: Arc::new(AtomicBool::new(false)),
            peer_seen: Arc::new(AtomicBool::new(false)),
        }
    }

    fn setup_event_handlers(&self, pc: &Arc<RTCPeerConnection>, publish_uid: u32) {
        // Connection state changes
        let events = self.events.clone();
        let was_connected = self.was_connected.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            let was_connected = was_connected.clone();

            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => {
                        let event = if was_connected.swap(true, Ordering::SeqCst) {
                            TransportEvent::Reconnected
                        } else {
                            TransportEvent::Connected
                        };
                        let _ = events.send(event);
                    }
                    RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed => {
                        let _ = events.send(TransportEvent::Disconnected);
                    }
                    _ => {}
                }
            })
        }));

        // Remote media arriving is the robot attaching to the channel
        let events = self.events.clone();
        let peer_seen = self.peer_seen.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            let peer_seen = peer_seen.clone();

            Box::pin(async move {
                debug!("Remote track: {}", track.kind());
                if !peer_seen.swap(true, Ordering::SeqCst) {
                    let _ = events.send(TransportEvent::PeerJoined(publish_uid));
                }
            })
        }));

        // A remote-opened channel doubles as the fallback command channel
        let events = self.events.clone();
        let peer_seen = self.peer_seen.clone();
        let channel = self.channel.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let peer_seen = peer_seen.clone();
            let channel = channel.clone();

            Box::pin(async move {
                info!("Remote data channel opened: {}", dc.label());

                if !peer_seen.swap(true, Ordering::SeqCst) {
                    let _ = events.send(TransportEvent::PeerJoined(publish_uid));
                }

                attach_message_logger(&dc);

                let mut guard = channel.write().await;
                if guard.is_none() {
                    *guard = Some(dc);
                }
            })
        }));
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::Transport(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::Transport(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| AppError::Transport(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(pc))
    }

    /// Stage the command channel and media lines, then produce the local
    /// offer once candidate gathering finishes.
    ///
    /// The data channel must exist before the offer is created: the SCTP
    /// association is only negotiated when the offer carries an application
    /// m-line, and there is no renegotiation path after connect. The channel
    /// itself opens once the connection establishes.
    async fn prepare_offer(&self, pc: &Arc<RTCPeerConnection>) -> Result<RTCSessionDescription> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = pc
            .create_data_channel(CONTROL_CHANNEL_LABEL, Some(init))
            .await
            .map_err(|e| AppError::Transport(format!("Failed to create data channel: {}", e)))?;
        attach_message_logger(&dc);
        *self.channel.write().await = Some(dc);

        // Receive-only media lines so the gateway treats us as a subscriber
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(kind, None)
                .await
                .map_err(|e| AppError::Transport(format!("Failed to add transceiver: {}", e)))?;
        }

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Transport(format!("Failed to create offer: {}", e)))?;

        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| AppError::Transport(format!("Failed to set local description: {}", e)))?;
        let _ = gather_complete.recv().await;

        pc.local_description()
            .await
            .ok_or_else(|| AppError::Transport("No local description".to_string()))
    }

    /// Exchange SDP with the vendor gateway and apply the answer
    async fn exchange_sdp(
        &self,
        pc: &Arc<RTCPeerConnection>,
        creds: &Credentials,
        offer: String,
    ) -> Result<()> {
        let request = SdpExchangeRequest {
            app_id: &creds.app_id,
            channel: &creds.channel,
            token: &creds.token,
            uid: creds.uid,
            offer,
        };

        let response: SdpExchangeResponse = self
            .http
            .post(&self.gateway_url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if response.code != 0 {
            return Err(AppError::Transport(format!(
                "SDP exchange rejected (code {}): {}",
                response.code,
                response.message.unwrap_or_default()
            )));
        }

        let answer_sdp = response
            .answer
            .ok_or_else(|| AppError::Transport("SDP exchange returned no answer".to_string()))?;
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| AppError::Transport(format!("Invalid SDP answer: {}", e)))?;

        pc.set_remote_description(answer)
            .await
            .map_err(|e| AppError::Transport(format!("Failed to set remote description: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl RtcTransport for PeerTransport {
    async fn connect(&self, creds: &Credentials) -> Result<()> {
        if self.pc.read().await.is_some() {
            warn!("Transport already connected");
            return Ok(());
        }

        let pc = self.build_peer_connection().await?;
        self.setup_event_handlers(&pc, creds.publish_uid);

        let local = self.prepare_offer(&pc).await?;
        self.exchange_sdp(&pc, creds, local.sdp).await?;

        *self.pc.write().await = Some(pc);
        info!(
            "Transport joining channel {} as UID {}",
            creds.channel, creds.uid
        );

        Ok(())
    }

    async fn create_data_channel(&self) -> Result<()> {
        // The channel was staged into the offer during connect; once the
        // connection is up it opens on its own
        if self.channel.read().await.is_some() {
            info!("Reliable command channel '{}' negotiated", CONTROL_CHANNEL_LABEL);
            return Ok(());
        }

        let pc = self.pc.read().await;
        let pc = pc
            .as_ref()
            .ok_or_else(|| AppError::Transport("Not connected".to_string()))?;

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };

        let dc = pc
            .create_data_channel(CONTROL_CHANNEL_LABEL, Some(init))
            .await
            .map_err(|e| AppError::Transport(format!("Failed to create data channel: {}", e)))?;

        attach_message_logger(&dc);

        *self.channel.write().await = Some(dc);
        info!("Reliable command channel '{}' created", CONTROL_CHANNEL_LABEL);

        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        let channel = self.channel.read().await;
        let dc = channel
            .as_ref()
            .ok_or_else(|| AppError::Transport("No command channel".to_string()))?;

        dc.send(&bytes::Bytes::copy_from_slice(data))
            .await
            .map_err(|e| AppError::Transport(format!("Send failed: {}", e)))?;

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.channel.write().await = None;

        if let Some(pc) = self.pc.write().await.take() {
            if let Err(e) = pc.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }

        Ok(())
    }
}

/// Log inbound messages from the robot at debug level
fn attach_message_logger(dc: &Arc<RTCDataChannel>) {
    let label = dc.label().to_string();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        match std::str::from_utf8(&msg.data) {
            Ok(text) => debug!("[{}] <<< {}", label, truncate(text, 80)),
            Err(_) => debug!("[{}] <<< {} binary bytes", label, msg.data.len()),
        }
        Box::pin(async {})
    }));
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_carries_command_channel_and_media_lines() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = PeerTransport::new("http://127.0.0.1:1/sdp".to_string(), tx);

        let pc = transport.build_peer_connection().await.unwrap();
        let offer = transport.prepare_offer(&pc).await.unwrap();

        // the SCTP association is negotiated with the offer itself; without
        // the application m-line the channel could never open
        assert!(offer.sdp.contains("m=application"));
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("m=audio"));
        assert!(transport.channel.read().await.is_some());

        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_data_channel_is_a_no_op_once_staged() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = PeerTransport::new("http://127.0.0.1:1/sdp".to_string(), tx);

        let pc = transport.build_peer_connection().await.unwrap();
        let _ = transport.prepare_offer(&pc).await.unwrap();

        transport.create_data_channel().await.unwrap();
        assert!(transport.channel.read().await.is_some());

        pc.close().await.unwrap();
    }
}
