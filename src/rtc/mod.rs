//! Realtime transport integration
//!
//! The robot's command channel rides on a vendor realtime connection. This
//! module keeps all of the lifecycle handling in one place:
//!
//! - `credentials`: parsing of the UID-scoped connection grant
//! - `events`: the narrow transport event vocabulary
//! - `transport`: the `RtcTransport` seam and the WebRTC-backed implementation
//! - `session`: the connection state machine and reliable send primitive

pub mod credentials;
pub mod events;
pub mod session;
pub mod transport;

pub use credentials::Credentials;
pub use events::TransportEvent;
pub use session::{ConnectionFlags, RtcChannelSession, SessionState};
pub use transport::{PeerTransport, RtcTransport};
