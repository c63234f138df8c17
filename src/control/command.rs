//! Command vocabulary and wire frame format
//!
//! Mode codes were captured from the vendor's own client traffic on the
//! reliable data stream; the `x`/`y` vector is a reserved field the robot
//! currently ignores, always sent as `1.0`/`0.0`.

use serde::{Deserialize, Serialize};

/// Wire protocol version understood by the robot
pub const FRAME_VERSION: u32 = 2;

/// A motion primitive the robot can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    RotateLeft,
    RotateRight,
    UTurn,
}

impl Direction {
    /// Integer mode code transmitted on the wire
    pub fn mode_code(self) -> u32 {
        match self {
            Self::UTurn => 16,
            Self::Forward => 17,
            Self::RotateLeft => 18,
            Self::RotateRight => 19,
        }
    }

    /// Semantic token used by the control bridge API
    pub fn token(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::RotateLeft => "rotate_left",
            Self::RotateRight => "rotate_right",
            Self::UTurn => "u_turn",
        }
    }
}

/// A parsed `/control` request: either drive in a direction or stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Drive(Direction),
    Stop,
}

impl ControlCommand {
    /// Parse a direction token from the viewer UI.
    ///
    /// Accepts both the UI-level tokens (`up`/`down`/`left`/`right`/`none`)
    /// and the semantic tokens, as the viewer may send either.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "up" | "forward" => Some(Self::Drive(Direction::Forward)),
            "down" | "u_turn" => Some(Self::Drive(Direction::UTurn)),
            "left" | "rotate_left" => Some(Self::Drive(Direction::RotateLeft)),
            "right" | "rotate_right" => Some(Self::Drive(Direction::RotateRight)),
            "none" | "stop" => Some(Self::Stop),
            _ => None,
        }
    }

    /// Latched mode for the broadcaster (`None` clears the latch)
    pub fn mode(self) -> Option<Direction> {
        match self {
            Self::Drive(d) => Some(d),
            Self::Stop => None,
        }
    }

    /// Semantic token echoed back in the bridge response
    pub fn token(self) -> &'static str {
        match self {
            Self::Drive(d) => d.token(),
            Self::Stop => "stop",
        }
    }
}

/// One command message on the reliable data channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    pub seq_id: u64,
    /// Epoch milliseconds at send time
    pub timestamp: i64,
    pub mode: u32,
    pub version: u32,
    pub x: f64,
    pub y: f64,
}

impl ControlFrame {
    /// Build a frame for the given sequence number and direction
    pub fn new(seq_id: u64, direction: Direction) -> Self {
        Self {
            seq_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            mode: direction.mode_code(),
            version: FRAME_VERSION,
            x: 1.0,
            y: 0.0,
        }
    }

    /// Compact JSON encoding as sent on the wire
    pub fn encode(&self) -> Vec<u8> {
        // serde_json never fails on this shape
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes() {
        assert_eq!(Direction::UTurn.mode_code(), 16);
        assert_eq!(Direction::Forward.mode_code(), 17);
        assert_eq!(Direction::RotateLeft.mode_code(), 18);
        assert_eq!(Direction::RotateRight.mode_code(), 19);
    }

    #[test]
    fn test_token_mapping() {
        assert_eq!(
            ControlCommand::from_token("up"),
            Some(ControlCommand::Drive(Direction::Forward))
        );
        assert_eq!(
            ControlCommand::from_token("down"),
            Some(ControlCommand::Drive(Direction::UTurn))
        );
        assert_eq!(
            ControlCommand::from_token("left"),
            Some(ControlCommand::Drive(Direction::RotateLeft))
        );
        assert_eq!(
            ControlCommand::from_token("right"),
            Some(ControlCommand::Drive(Direction::RotateRight))
        );
        assert_eq!(ControlCommand::from_token("none"), Some(ControlCommand::Stop));
        assert_eq!(ControlCommand::from_token("stop"), Some(ControlCommand::Stop));
        assert_eq!(ControlCommand::from_token("sideways"), None);
    }

    #[test]
    fn test_semantic_tokens_accepted() {
        assert_eq!(
            ControlCommand::from_token("rotate_left"),
            Some(ControlCommand::Drive(Direction::RotateLeft))
        );
        assert_eq!(
            ControlCommand::from_token("u_turn"),
            Some(ControlCommand::Drive(Direction::UTurn))
        );
    }

    #[test]
    fn test_frame_encoding() {
        let frame = ControlFrame::new(7, Direction::Forward);
        let encoded = frame.encode();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["seq_id"], 7);
        assert_eq!(value["mode"], 17);
        assert_eq!(value["version"], 2);
        assert_eq!(value["x"], 1.0);
        assert_eq!(value["y"], 0.0);
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        // compact encoding, no spaces
        assert!(!encoded.contains(&b' '));
    }
}
