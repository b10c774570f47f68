use std::time::Duration;
use thiserror::Error;

use crate::types::{MacroSlot, RelayId};

/// Failures on the controller link. These never leave `RelayLink`; they are
/// rendered into status events at its boundary.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failure: no network params!")]
    NotConfigured,

    #[error("failure: timeout on read!")]
    Timeout(Duration),

    #[error("failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed reply: {0}")]
    MalformedReply(#[from] std::str::Utf8Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("hotspot for relay {0} is missing one or more points")]
    IncompleteHotspot(RelayId),

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("profile '{0}' already exists")]
    DuplicateProfile(String),

    #[error("no configuration draft is open")]
    NoDraft,

    #[error("relay id {0} is out of range")]
    InvalidRelay(u8),
}

#[derive(Debug, Error, PartialEq)]
pub enum MacroError {
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("macro {slot} is not set for profile '{profile}'")]
    EmptySlot { profile: String, slot: MacroSlot },

    #[error("macro number {0} is out of range")]
    SlotOutOfRange(usize),
}
