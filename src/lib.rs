//! Relay control engine for a networked antenna switch: hotspot layout,
//! contact state, the UDP controller link and macro playback.

pub mod comms;
pub mod config;
pub mod controller;
pub mod error;
pub mod hal;
pub mod hotspot;
pub mod interaction;
pub mod link;
pub mod macros;
pub mod store;
pub mod types;

pub use controller::SwitchController;
pub use link::{RelayLink, StatusEvent, StatusKind};
