//! Romo Bridge - remote control bridge for DJI Romo robots
//!
//! Connects to the robot's realtime channel for joystick command traffic
//! and serves a local viewer page for the live camera stream, glued
//! together by the vendor's device-management API.

pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod orchestrator;
pub mod rtc;
pub mod state;
pub mod web;

pub use error::{AppError, Result};
