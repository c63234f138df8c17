//! Level-triggered command broadcaster
//!
//! The robot expects its active drive command re-asserted continuously, not
//! edge-triggered. A single latch holds the current direction and a 10Hz
//! loop re-sends it for as long as it stays set; clearing the latch simply
//! stops the stream, there is no explicit stop frame on the wire.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::command::{ControlCommand, ControlFrame, Direction};
use crate::rtc::RtcChannelSession;

/// Re-send period of the latched command
const BROADCAST_INTERVAL: Duration = Duration::from_millis(100);
/// How long stop() waits for the loop to wind down
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct CommandBroadcaster {
    session: Arc<RtcChannelSession>,
    latch: Arc<Mutex<Option<Direction>>>,
    seq: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CommandBroadcaster {
    pub fn new(session: Arc<RtcChannelSession>) -> Self {
        Self {
            session,
            latch: Arc::new(Mutex::new(None)),
            seq: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Latch a new command. A drive command also goes out immediately so the
    /// robot reacts within one tick; `Stop` only clears the latch.
    pub async fn apply(&self, command: ControlCommand) {
        let mode = command.mode();
        debug!("Command latch set to {:?}", mode);
        *self.latch.lock() = mode;

        if let Some(direction) = mode {
            if self.session.is_ready() {
                send_frame(&self.session, &self.seq, direction).await;
            }
        }
    }

    /// Currently latched direction, if any
    pub fn current(&self) -> Option<Direction> {
        *self.latch.lock()
    }

    /// Sequence number of the last frame sent
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Start the broadcast loop; idempotent
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Command broadcaster already running");
            return;
        }

        let session = self.session.clone();
        let latch = self.latch.clone();
        let seq = self.seq.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(BROADCAST_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                interval.tick().await;

                let Some(direction) = *latch.lock() else {
                    continue;
                };
                if !session.is_ready() {
                    continue;
                }

                send_frame(&session, &seq, direction).await;
            }
            debug!("Command broadcast loop finished");
        });

        *self.handle.lock() = Some(handle);
        info!("Command broadcaster started ({:?} period)", BROADCAST_INTERVAL);
    }

    /// Stop the loop and clear the latch; waits briefly for the task
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.latch.lock() = None;

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!("Command broadcaster did not stop in time");
            }
        }
        info!("Command broadcaster stopped");
    }
}

/// Consume the next sequence number and push one frame out.
///
/// The counter is only advanced for frames that actually go to the
/// transport; send failures are logged, never surfaced.
async fn send_frame(session: &RtcChannelSession, seq: &AtomicU64, direction: Direction) {
    let seq_id = seq.fetch_add(1, Ordering::SeqCst) + 1;
    let frame = ControlFrame::new(seq_id, direction);
    if let Err(e) = session.send(&frame.encode()).await {
        warn!("Failed to send command frame {}: {}", seq_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::rtc::{Credentials, RtcTransport, TransportEvent};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl RtcTransport for RecordingTransport {
        async fn connect(&self, _creds: &Credentials) -> Result<()> {
            Ok(())
        }

        async fn create_data_channel(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, data: &[u8]) -> Result<()> {
            self.sent.lock().push(data.to_vec());
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Session over a recording transport, optionally driven to ready
    fn recording_session(
        ready: bool,
    ) -> (Arc<RtcChannelSession>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport { sent: sent.clone() });
        let (tx, rx) = mpsc::unbounded_channel();
        let session = RtcChannelSession::new(transport, rx);
        if ready {
            tx.send(TransportEvent::Connected).unwrap();
            tx.send(TransportEvent::PeerJoined(50000)).unwrap();
        }
        // keep the sender alive so the pump stays up
        std::mem::forget(tx);
        (session, sent)
    }

    fn decode_frames(sent: &Mutex<Vec<Vec<u8>>>) -> Vec<ControlFrame> {
        sent.lock()
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_latched_command_repeats_with_monotonic_seq() {
        let (session, sent) = recording_session(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let broadcaster = CommandBroadcaster::new(session);
        broadcaster.start();
        broadcaster
            .apply(ControlCommand::Drive(Direction::Forward))
            .await;

        tokio::time::sleep(Duration::from_millis(550)).await;
        broadcaster.stop().await;

        let frames = decode_frames(&sent);
        assert!(frames.len() >= 4, "expected repeated frames, got {}", frames.len());
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.seq_id, i as u64 + 1);
            assert_eq!(frame.mode, Direction::Forward.mode_code());
            assert_eq!(frame.version, 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_command_sends_one_frame_immediately() {
        let (session, sent) = recording_session(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // loop not started: only the immediate frame can appear
        let broadcaster = CommandBroadcaster::new(session);
        broadcaster
            .apply(ControlCommand::Drive(Direction::RotateRight))
            .await;

        let frames = decode_frames(&sent);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].seq_id, 1);
        assert_eq!(frames[0].mode, Direction::RotateRight.mode_code());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_command_ceases_frames() {
        let (session, sent) = recording_session(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let broadcaster = CommandBroadcaster::new(session);
        broadcaster.start();
        broadcaster
            .apply(ControlCommand::Drive(Direction::RotateLeft))
            .await;
        tokio::time::sleep(Duration::from_millis(350)).await;

        broadcaster.apply(ControlCommand::Stop).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let count_at_stop = sent.lock().len();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sent.lock().len(), count_at_stop);
        assert_eq!(broadcaster.current(), None);

        broadcaster.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_frames_while_session_not_ready() {
        let (session, sent) = recording_session(false);

        let broadcaster = CommandBroadcaster::new(session);
        broadcaster.start();
        broadcaster
            .apply(ControlCommand::Drive(Direction::UTurn))
            .await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        broadcaster.stop().await;

        assert!(sent.lock().is_empty());
        // sequence numbers are only consumed by frames that went out
        assert_eq!(broadcaster.last_seq(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_change_takes_effect_next_tick() {
        let (session, sent) = recording_session(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let broadcaster = CommandBroadcaster::new(session);
        broadcaster.start();
        broadcaster
            .apply(ControlCommand::Drive(Direction::Forward))
            .await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        broadcaster
            .apply(ControlCommand::Drive(Direction::RotateRight))
            .await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        broadcaster.stop().await;

        let frames = decode_frames(&sent);
        assert!(frames.iter().any(|f| f.mode == Direction::Forward.mode_code()));
        assert!(frames.iter().any(|f| f.mode == Direction::RotateRight.mode_code()));
        // sequence stays monotonic across the direction change
        for pair in frames.windows(2) {
            assert_eq!(pair[1].seq_id, pair[0].seq_id + 1);
        }
    }
}
