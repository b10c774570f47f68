use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConfigError, MacroError};

/// Highest relay id a controller board can address.
pub const MAX_RELAYS: u8 = 16;

/// Number of macro slots per profile.
pub const MAX_MACROS: usize = 6;

/// Identifies one physical relay on the controller (1..=MAX_RELAYS).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RelayId(pub(crate) u8);

impl RelayId {
    pub fn new(id: u8) -> Option<Self> {
        (1..=MAX_RELAYS).contains(&id).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for RelayId {
    type Error = ConfigError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id).ok_or(ConfigError::InvalidRelay(id))
    }
}

impl From<RelayId> for u8 {
    fn from(relay: RelayId) -> u8 {
        relay.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactState {
    Energized,   // Common -> NO
    DeEnergized, // Common -> NC
}

impl ContactState {
    pub fn toggled(self) -> Self {
        match self {
            ContactState::Energized => ContactState::DeEnergized,
            ContactState::DeEnergized => ContactState::Energized,
        }
    }
}

impl Default for ContactState {
    fn default() -> Self {
        ContactState::DeEnergized
    }
}

impl fmt::Display for ContactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactState::Energized => f.write_str("energized"),
            ContactState::DeEnergized => f.write_str("de-energized"),
        }
    }
}

/// Contact state of every relay in one profile, ordered by relay id.
pub type RelayStates = BTreeMap<RelayId, ContactState>;

/// Pixel coordinate on the layout image.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Address of the remote relay controller.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum LinkStatus {
    Unconfigured, // No endpoint supplied yet
    Offline,
    Online,
}

/// Zero-based macro slot within a profile.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct MacroSlot(pub(crate) usize);

impl MacroSlot {
    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_MACROS).then_some(Self(index))
    }

    /// Converts an operator-facing 1-based macro number.
    pub fn from_number(number: usize) -> Option<Self> {
        number.checked_sub(1).and_then(Self::new)
    }

    pub fn number(self) -> usize {
        self.0 + 1
    }
}

impl TryFrom<usize> for MacroSlot {
    type Error = MacroError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::new(index).ok_or(MacroError::SlotOutOfRange(index))
    }
}

impl From<MacroSlot> for usize {
    fn from(slot: MacroSlot) -> usize {
        slot.0
    }
}

impl fmt::Display for MacroSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Saved snapshot of a profile's contact states.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Macro {
    pub label: String,
    pub states: RelayStates,
}
