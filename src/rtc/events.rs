//! Transport lifecycle events
//!
//! Transport implementations report lifecycle changes as messages on a
//! channel rather than mutating session state from their own callbacks; the
//! session's event pump is the single place state transitions happen.

/// A lifecycle event reported by the realtime transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection reached the connected state
    Connected,
    /// The connection was lost or closed
    Disconnected,
    /// The connection recovered after a transient loss
    Reconnected,
    /// A remote principal joined the channel
    PeerJoined(u32),
    /// A remote principal left the channel
    PeerLeft(u32),
    /// The transport reported a stream-level error code
    StreamError(i32),
}
