use log::debug;
use std::collections::HashMap;

use crate::types::{ContactState, RelayId, RelayStates};

/// Authoritative contact state of every relay, per profile.
///
/// `set` is the single mutation path: click toggles and macro replay both go
/// through it.
#[derive(Debug, Default, Clone)]
pub struct RelayStateStore {
    profiles: HashMap<String, RelayStates>,
}

impl RelayStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: HashMap<String, RelayStates>) -> Self {
        Self { profiles }
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.contains_key(profile)
    }

    pub fn create_profile(&mut self, profile: &str) {
        self.profiles.entry(profile.to_string()).or_default();
    }

    pub fn remove_profile(&mut self, profile: &str) -> Option<RelayStates> {
        self.profiles.remove(profile)
    }

    /// Creates a de-energized entry for a newly configured relay. An existing
    /// entry is left untouched.
    pub fn ensure_relay(&mut self, profile: &str, relay: RelayId) {
        self.profiles
            .entry(profile.to_string())
            .or_default()
            .entry(relay)
            .or_insert(ContactState::DeEnergized);
    }

    pub fn remove_relay(&mut self, profile: &str, relay: RelayId) {
        if let Some(states) = self.profiles.get_mut(profile) {
            states.remove(&relay);
        }
    }

    pub fn contains(&self, profile: &str, relay: RelayId) -> bool {
        self.profiles
            .get(profile)
            .is_some_and(|states| states.contains_key(&relay))
    }

    /// # Panics
    /// If the relay has no entry in the profile.
    pub fn get(&self, profile: &str, relay: RelayId) -> ContactState {
        *self.entry(profile, relay)
    }

    /// # Panics
    /// If the relay has no entry in the profile.
    pub fn set(&mut self, profile: &str, relay: RelayId, state: ContactState) {
        let entry = self.entry_mut(profile, relay);
        if *entry != state {
            debug!("Profile '{}' relay {} -> {}", profile, relay, state);
        }
        *entry = state;
    }

    /// # Panics
    /// If the relay has no entry in the profile.
    pub fn toggle(&mut self, profile: &str, relay: RelayId) -> ContactState {
        let next = self.get(profile, relay).toggled();
        self.set(profile, relay, next);
        next
    }

    /// Deep copy of a profile's states, ordered by relay id.
    pub fn snapshot(&self, profile: &str) -> RelayStates {
        self.profiles.get(profile).cloned().unwrap_or_default()
    }

    pub fn profiles(&self) -> &HashMap<String, RelayStates> {
        &self.profiles
    }

    fn entry(&self, profile: &str, relay: RelayId) -> &ContactState {
        self.profiles
            .get(profile)
            .and_then(|states| states.get(&relay))
            .unwrap_or_else(|| panic!("relay {} has no contact state in profile '{}'", relay, profile))
    }

    fn entry_mut(&mut self, profile: &str, relay: RelayId) -> &mut ContactState {
        self.profiles
            .get_mut(profile)
            .and_then(|states| states.get_mut(&relay))
            .unwrap_or_else(|| panic!("relay {} has no contact state in profile '{}'", relay, profile))
    }
}
