//! Robot motion command handling
//!
//! - `command`: direction tokens, mode codes and the wire frame format
//! - `broadcaster`: fixed-cadence re-transmission of the latched command

pub mod broadcaster;
pub mod command;

pub use broadcaster::CommandBroadcaster;
pub use command::{ControlCommand, ControlFrame, Direction};
