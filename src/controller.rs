use log::{info, warn};
use std::collections::HashMap;

use crate::comms::ExternalCommand;
use crate::config::{ConfigSession, SessionState, Settings};
use crate::error::{ConfigError, MacroError};
use crate::hotspot::{ContactLine, HotspotField, HotspotIndex};
use crate::interaction::{InteractionStateMachine, Mode, Output, PointerEvent};
use crate::link::RelayLink;
use crate::macros::MacroPlayer;
use crate::store::RelayStateStore;
use crate::types::{ContactState, LinkStatus, MacroSlot, Point, RelayId, RelayStates};

/// Owns the engine pieces and routes presentation inputs through them.
pub struct SwitchController {
    settings: ConfigSession<Settings>,
    window: [i32; 4],
    active: Option<String>,
    index: HotspotIndex,
    store: RelayStateStore,
    machine: InteractionStateMachine,
    link: RelayLink,
    player: MacroPlayer,
}

impl SwitchController {
    pub fn new(settings: Settings, state: SessionState, link: RelayLink) -> Self {
        let mut relays: HashMap<String, RelayStates> = state.relays.into_iter().collect();
        relays.retain(|profile, _| settings.profiles.contains_key(profile));
        let mut store = RelayStateStore::from_profiles(relays);
        sync_store(&mut store, &settings);

        let mut macros: HashMap<_, _> = state.macros.into_iter().collect();
        macros.retain(|profile, _| settings.profiles.contains_key(profile));
        let player = MacroPlayer::new(macros, settings.timing.macro_pacing());

        let active = state
            .template
            .filter(|name| settings.profiles.contains_key(name))
            .or_else(|| settings.profiles.keys().next().cloned());
        let index = build_index(&settings, active.as_deref());

        let mut machine = InteractionStateMachine::new();
        machine.set_mode(Mode::Running);

        Self {
            settings: ConfigSession::new(settings),
            window: state.window,
            active,
            index,
            store,
            machine,
            link,
            player,
        }
    }

    /// Points the link at the configured controller and brings it online if
    /// it answers.
    pub async fn start(&mut self) -> bool {
        match self.settings.committed().network.endpoint() {
            Some(endpoint) => {
                self.link.configure(endpoint).await;
                self.check_link().await
            }
            None => {
                warn!("Controller network settings are not configured");
                false
            }
        }
    }

    pub fn settings(&self) -> &Settings {
        self.settings.committed()
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.machine.mode()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.machine.set_mode(mode);
    }

    pub fn link(&self) -> &RelayLink {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut RelayLink {
        &mut self.link
    }

    pub fn store(&self) -> &RelayStateStore {
        &self.store
    }

    pub fn index(&self) -> &HotspotIndex {
        &self.index
    }

    pub fn macros(&self) -> &MacroPlayer {
        &self.player
    }

    pub fn set_window(&mut self, geometry: [i32; 4]) {
        self.window = geometry;
    }

    /// Current contact states of the active profile.
    pub fn relay_states(&self) -> RelayStates {
        self.active
            .as_deref()
            .map(|profile| self.store.snapshot(profile))
            .unwrap_or_default()
    }

    /// Switch-position lines for every configured relay of the active profile.
    pub fn contact_lines(&self) -> Vec<Output> {
        let Some(profile) = self.active.as_deref() else {
            return Vec::new();
        };
        self.index
            .relays()
            .filter_map(|relay| {
                let state = self.store.get(profile, relay);
                self.index
                    .contact_line(relay, state)
                    .map(|line| Output::ContactLine { relay, line })
            })
            .collect()
    }

    /// Makes another profile active. The hotspots and state map swap together.
    pub fn select_profile(&mut self, name: &str) -> Result<Vec<Output>, ConfigError> {
        let settings = self.settings.committed();
        settings.profile(name)?;
        let index = build_index(settings, Some(name));
        self.index = index;
        self.active = Some(name.to_string());
        info!("Active profile '{}'", name);
        Ok(self.contact_lines())
    }

    /// One liveness check; a link found offline gets a single probe-based
    /// recovery attempt.
    pub async fn check_link(&mut self) -> bool {
        let states = self.relay_states();
        self.link.is_online(&states).await
    }

    pub async fn pointer(&mut self, event: PointerEvent) -> Vec<Output> {
        let profile = self.active.clone().unwrap_or_default();
        let outputs = self.machine.handle(event, &profile, &self.index, &mut self.store);
        for output in &outputs {
            if let Output::SetRelay { relay, state } = *output {
                self.send_relay(relay, state).await;
            }
        }
        outputs
    }

    /// Sets a relay on request from the presentation layer.
    pub async fn request_set_relay(
        &mut self,
        relay: RelayId,
        state: ContactState,
    ) -> Result<Vec<Output>, ConfigError> {
        let profile = self
            .active
            .clone()
            .ok_or_else(|| ConfigError::UnknownProfile(String::new()))?;
        if !self.store.contains(&profile, relay) {
            return Err(ConfigError::InvalidRelay(relay.get()));
        }
        self.store.set(&profile, relay, state);
        let mut outputs = Vec::with_capacity(2);
        if let Some(line) = self.index.contact_line(relay, state) {
            outputs.push(Output::ContactLine { relay, line });
        }
        outputs.push(Output::SetRelay { relay, state });
        self.send_relay(relay, state).await;
        Ok(outputs)
    }

    /// De-energizes every relay of the active profile.
    pub async fn reset_relays(&mut self) -> Vec<Output> {
        let Some(profile) = self.active.clone() else {
            return Vec::new();
        };
        let relays: Vec<RelayId> = self.store.snapshot(&profile).into_keys().collect();
        for relay in &relays {
            self.store.set(&profile, *relay, ContactState::DeEnergized);
        }
        // A successful recovery replays the reset states already.
        if self.link.status() == LinkStatus::Offline && self.check_link().await {
            return self.contact_lines();
        }
        self.link.reset_relays(relays).await;
        self.contact_lines()
    }

    pub fn save_macro(&mut self, slot: MacroSlot, label: &str) -> Result<(), MacroError> {
        let profile = self
            .active
            .clone()
            .ok_or_else(|| MacroError::UnknownProfile(String::new()))?;
        self.player.save(&self.store, &profile, slot, label)
    }

    pub async fn execute_macro(&mut self, slot: MacroSlot) -> Result<Vec<Output>, MacroError> {
        let profile = self
            .active
            .clone()
            .ok_or_else(|| MacroError::UnknownProfile(String::new()))?;
        if self.player.get(&profile, slot).is_none() {
            return Err(MacroError::EmptySlot { profile, slot });
        }
        if self.link.status() == LinkStatus::Offline {
            self.check_link().await;
        }

        let mut outputs = Vec::new();
        self.player
            .execute(&profile, slot, &mut self.store, &self.index, &mut self.link, |o| {
                outputs.push(o)
            })
            .await?;
        Ok(outputs)
    }

    pub async fn handle_external(&mut self, cmd: ExternalCommand) -> Result<Vec<Output>, MacroError> {
        match cmd {
            ExternalCommand::Switch(slot) => self.execute_macro(slot).await,
        }
    }

    /// Enters configuration mode with a fresh draft of the settings.
    pub fn begin_configuration(&mut self) -> &mut Settings {
        self.machine.set_mode(Mode::Configuring);
        self.settings.begin()
    }

    pub fn draft_mut(&mut self) -> Result<&mut Settings, ConfigError> {
        self.settings.draft_mut()
    }

    /// Applies a configuration-mode mark to the active profile's draft.
    /// Returns whether the relay's hotspot is now complete.
    pub fn apply_mark(
        &mut self,
        relay: RelayId,
        field: HotspotField,
        point: Point,
    ) -> Result<bool, ConfigError> {
        let profile = self
            .active
            .clone()
            .ok_or_else(|| ConfigError::UnknownProfile(String::new()))?;
        let draft = self.settings.draft_mut()?.mark(&profile, relay, field, point)?;
        Ok(draft.is_complete())
    }

    /// Removes a relay's hotspot from the active profile's draft. Its stored
    /// contact state is kept.
    pub fn delete_hotspot(&mut self, relay: RelayId) -> Result<bool, ConfigError> {
        let profile = self
            .active
            .clone()
            .ok_or_else(|| ConfigError::UnknownProfile(String::new()))?;
        let removed = self.settings.draft_mut()?.remove_hotspot(&profile, relay)?;
        Ok(removed.is_some())
    }

    /// Makes the draft the live configuration and returns to running mode.
    pub async fn commit_configuration(&mut self) -> Result<(), ConfigError> {
        let previous_endpoint = self.settings.committed().network.endpoint();
        let committed = self.settings.commit()?.clone();

        let removed: Vec<String> = self
            .store
            .profiles()
            .keys()
            .filter(|name| !committed.profiles.contains_key(*name))
            .cloned()
            .collect();
        for name in removed {
            info!("Dropping state and macros of deleted profile '{}'", name);
            self.store.remove_profile(&name);
            self.player.remove_profile(&name);
        }
        sync_store(&mut self.store, &committed);

        if self
            .active
            .as_ref()
            .is_some_and(|name| !committed.profiles.contains_key(name))
        {
            self.active = None;
        }
        if self.active.is_none() {
            self.active = committed.profiles.keys().next().cloned();
        }
        self.index = build_index(&committed, self.active.as_deref());
        self.player = MacroPlayer::new(self.player.macros().clone(), committed.timing.macro_pacing());
        self.link.set_timing(committed.timing.link_timing());

        let endpoint = committed.network.endpoint();
        if endpoint != previous_endpoint {
            match endpoint {
                Some(endpoint) => {
                    self.link.configure(endpoint).await;
                    self.check_link().await;
                }
                None => self.link.unconfigure(),
            }
        }
        self.machine.set_mode(Mode::Running);
        Ok(())
    }

    pub fn discard_configuration(&mut self) {
        self.settings.discard();
        self.machine.set_mode(Mode::Running);
    }

    /// State to persist between sessions.
    pub fn session_state(&self) -> SessionState {
        SessionState {
            template: self.active.clone(),
            window: self.window,
            relays: self
                .store
                .profiles()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            macros: self
                .player
                .macros()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub async fn shutdown(&mut self) {
        self.link.shutdown().await;
    }

    async fn send_relay(&mut self, relay: RelayId, state: ContactState) {
        // A successful recovery replays every relay, this one included.
        if self.link.status() == LinkStatus::Offline && self.check_link().await {
            return;
        }
        self.link.set_relay(relay, state).await;
    }
}

fn sync_store(store: &mut RelayStateStore, settings: &Settings) {
    for (name, profile) in &settings.profiles {
        store.create_profile(name);
        for relay in profile.complete_relays() {
            store.ensure_relay(name, relay);
        }
    }
}

fn build_index(settings: &Settings, profile: Option<&str>) -> HotspotIndex {
    profile
        .and_then(|name| settings.profiles.get(name))
        .map(|p| HotspotIndex::from_drafts(&p.hotspots))
        .unwrap_or_default()
}

/// Helper used by tests and the CLI to render a contact line.
pub fn describe_line(relay: RelayId, line: &ContactLine) -> String {
    format!(
        "relay {}: ({}, {}) -> ({}, {})",
        relay, line.from.x, line.from.y, line.to.x, line.to.y
    )
}
