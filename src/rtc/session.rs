//! Connection state machine for the realtime command channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::TransportEvent;
use super::transport::RtcTransport;
use crate::error::{AppError, Result};
use crate::rtc::Credentials;

/// Poll interval for the readiness and peer gates
const GATE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Readiness gate: 100 polls at 100ms is a 10 second ceiling
const READINESS_ATTEMPTS: u32 = 100;
/// Peer gate: 50 polls at 100ms is a 5 second ceiling
const PEER_ATTEMPTS: u32 = 50;

/// Shared connection flags, written only by the event pump.
///
/// `peer_joined` is only ever true while `connected` is true; losing the
/// connection clears it.
#[derive(Default)]
pub struct ConnectionFlags {
    connected: AtomicBool,
    stream_ready: AtomicBool,
    peer_joined: AtomicBool,
}

impl ConnectionFlags {
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn stream_ready(&self) -> bool {
        self.stream_ready.load(Ordering::SeqCst)
    }

    pub fn peer_joined(&self) -> bool {
        self.peer_joined.load(Ordering::SeqCst)
    }
}

/// Coarse session state derived from the connection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Transport is up but the command channel is not usable yet
    Connected,
    /// Connected with a usable command channel
    Ready,
}

/// One realtime channel session.
///
/// Owns the transport and the event pump that turns [`TransportEvent`]s into
/// flag transitions. Commands are only accepted while the session is ready;
/// readiness drops as soon as the transport reports a disconnect and comes
/// back on its own after a recovery.
pub struct RtcChannelSession {
    transport: Arc<dyn RtcTransport>,
    flags: Arc<ConnectionFlags>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RtcChannelSession {
    /// Create a session and start its event pump
    pub fn new(
        transport: Arc<dyn RtcTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            transport: transport.clone(),
            flags: Arc::new(ConnectionFlags::default()),
            pump: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::event_pump(
            transport,
            session.flags.clone(),
            events,
        ));
        *session.pump.lock() = Some(handle);

        session
    }

    /// Single consumer of transport events; the only writer of the flags
    async fn event_pump(
        transport: Arc<dyn RtcTransport>,
        flags: Arc<ConnectionFlags>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => {
                    info!("Realtime transport connected");
                    flags.connected.store(true, Ordering::SeqCst);

                    // Prefer a dedicated channel; a refusal just means we
                    // ride the remote side's default channel instead
                    if let Err(e) = transport.create_data_channel().await {
                        warn!("Dedicated command channel refused, using default: {}", e);
                    }
                    flags.stream_ready.store(true, Ordering::SeqCst);
                }
                TransportEvent::Reconnected => {
                    info!("Realtime transport recovered");
                    flags.connected.store(true, Ordering::SeqCst);
                    flags.stream_ready.store(true, Ordering::SeqCst);
                }
                TransportEvent::Disconnected => {
                    warn!("Realtime transport disconnected");
                    flags.connected.store(false, Ordering::SeqCst);
                    flags.stream_ready.store(false, Ordering::SeqCst);
                    flags.peer_joined.store(false, Ordering::SeqCst);
                }
                TransportEvent::PeerJoined(uid) => {
                    if flags.connected() {
                        info!("Robot joined the channel (UID {})", uid);
                        flags.peer_joined.store(true, Ordering::SeqCst);
                    } else {
                        warn!("Peer join (UID {}) reported while disconnected, ignoring", uid);
                    }
                }
                TransportEvent::PeerLeft(uid) => {
                    info!("Robot left the channel (UID {})", uid);
                    flags.peer_joined.store(false, Ordering::SeqCst);
                }
                TransportEvent::StreamError(code) => {
                    warn!("Stream error reported by transport: {}", code);
                }
            }
        }
        debug!("Transport event pump finished");
    }

    /// Connect and wait for the command channel to become usable.
    ///
    /// Blocks up to 10 seconds for readiness, then up to another 5 seconds
    /// for the robot to show up in the channel. A missing robot is only a
    /// warning; a missing command channel is a hard failure.
    pub async fn connect(&self, creds: &Credentials) -> Result<()> {
        if self.flags.connected() {
            warn!("Session already connected");
            return Ok(());
        }

        self.transport.connect(creds).await?;

        let mut ready = false;
        for _ in 0..READINESS_ATTEMPTS {
            if self.flags.connected() && self.flags.stream_ready() {
                ready = true;
                break;
            }
            tokio::time::sleep(GATE_POLL_INTERVAL).await;
        }
        if !ready {
            // cleanup failure must not mask the timeout itself
            if let Err(e) = self.transport.disconnect().await {
                warn!("Failed to release transport after timeout: {}", e);
            }
            return Err(AppError::ConnectionTimeout);
        }

        let mut peer = false;
        for _ in 0..PEER_ATTEMPTS {
            if self.flags.peer_joined() {
                peer = true;
                break;
            }
            tokio::time::sleep(GATE_POLL_INTERVAL).await;
        }
        if !peer {
            warn!("Robot has not joined the channel yet; commands may be dropped");
        }

        Ok(())
    }

    /// Whether commands can be sent right now
    pub fn is_ready(&self) -> bool {
        self.flags.connected() && self.flags.stream_ready()
    }

    pub fn state(&self) -> SessionState {
        if !self.flags.connected() {
            SessionState::Disconnected
        } else if self.flags.stream_ready() {
            SessionState::Ready
        } else {
            SessionState::Connected
        }
    }

    pub fn flags(&self) -> &ConnectionFlags {
        &self.flags
    }

    /// Send one message on the command channel
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if !self.is_ready() {
            return Err(AppError::Transport("Session not ready".to_string()));
        }
        self.transport.send(data).await
    }

    /// Tear down the transport; idempotent
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await?;
        self.flags.connected.store(false, Ordering::SeqCst);
        self.flags.stream_ready.store(false, Ordering::SeqCst);
        self.flags.peer_joined.store(false, Ordering::SeqCst);

        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }

        Ok(())
    }
}
