use anyhow::{Context, Result};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::hotspot::{HotspotDraft, HotspotField};
use crate::link::LinkTiming;
use crate::macros::ProfileMacros;
use crate::types::{Endpoint, Point, RelayId, RelayStates};

pub const DEFAULT_SETTINGS_PATH: &str = "settings/antswitch.yaml";
pub const DEFAULT_STATE_PATH: &str = "settings/antswitch-state.yaml";

/// Operator configuration: controller address, profiles and their hotspots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkConfig,
    /// Where the presentation layer finds profile background images.
    pub templates_dir: Option<PathBuf>,
    pub profiles: BTreeMap<String, ProfileConfig>,
    pub external: ExternalConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl NetworkConfig {
    /// `None` until both host and port are set.
    pub fn endpoint(&self) -> Option<Endpoint> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) if !host.trim().is_empty() => Some(Endpoint::new(host.trim(), port)),
            _ => None,
        }
    }
}

/// One switching layout: background image plus relay hotspots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Background image drawn under the hotspots by the presentation layer.
    pub image: Option<PathBuf>,
    pub hotspots: BTreeMap<RelayId, HotspotDraft>,
}

impl ProfileConfig {
    /// Relays whose hotspot has all five points.
    pub fn complete_relays(&self) -> impl Iterator<Item = RelayId> + '_ {
        self.hotspots
            .iter()
            .filter(|(_, draft)| draft.is_complete())
            .map(|(relay, _)| *relay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:10002".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub probe_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub macro_pacing_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 500,
            reply_timeout_ms: 5_000,
            macro_pacing_ms: 300,
            poll_interval_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn link_timing(&self) -> LinkTiming {
        LinkTiming {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
        }
    }

    pub fn macro_pacing(&self) -> Duration {
        Duration::from_millis(self.macro_pacing_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Settings {
    pub fn profile(&self, name: &str) -> Result<&ProfileConfig, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    pub fn set_endpoint(&mut self, host: Option<String>, port: Option<u16>) {
        self.network = NetworkConfig { host, port };
    }

    pub fn add_profile(&mut self, name: &str, image: Option<PathBuf>) -> Result<(), ConfigError> {
        if self.profiles.contains_key(name) {
            return Err(ConfigError::DuplicateProfile(name.to_string()));
        }
        self.profiles.insert(
            name.to_string(),
            ProfileConfig {
                image,
                hotspots: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn remove_profile(&mut self, name: &str) -> Result<ProfileConfig, ConfigError> {
        self.profiles
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Records one configuration-mode mark against a relay's hotspot.
    pub fn mark(
        &mut self,
        profile: &str,
        relay: RelayId,
        field: HotspotField,
        point: Point,
    ) -> Result<&HotspotDraft, ConfigError> {
        let config = self
            .profiles
            .get_mut(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;
        let draft = config.hotspots.entry(relay).or_default();
        draft.set(field, point);
        debug!("Profile '{}' relay {} {:?} = ({}, {})", profile, relay, field, point.x, point.y);
        Ok(&*draft)
    }

    pub fn remove_hotspot(&mut self, profile: &str, relay: RelayId) -> Result<Option<HotspotDraft>, ConfigError> {
        let config = self
            .profiles
            .get_mut(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;
        Ok(config.hotspots.remove(&relay))
    }
}

/// Runtime state persisted between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub template: Option<String>,
    /// x, y, width, height
    pub window: [i32; 4],
    pub relays: BTreeMap<String, RelayStates>,
    pub macros: BTreeMap<String, ProfileMacros>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            template: None,
            window: [300, 300, 300, 500],
            relays: BTreeMap::new(),
            macros: BTreeMap::new(),
        }
    }
}

/// A committed value and an optional draft being edited. Edits only become
/// visible through `commit`.
#[derive(Debug, Clone)]
pub struct ConfigSession<T> {
    committed: T,
    draft: Option<T>,
}

impl<T: Clone> ConfigSession<T> {
    pub fn new(committed: T) -> Self {
        Self {
            committed,
            draft: None,
        }
    }

    pub fn committed(&self) -> &T {
        &self.committed
    }

    pub fn is_editing(&self) -> bool {
        self.draft.is_some()
    }

    /// Opens a draft copied from the committed value, replacing any open draft.
    pub fn begin(&mut self) -> &mut T {
        self.draft.insert(self.committed.clone())
    }

    pub fn draft_mut(&mut self) -> Result<&mut T, ConfigError> {
        self.draft.as_mut().ok_or(ConfigError::NoDraft)
    }

    pub fn commit(&mut self) -> Result<&T, ConfigError> {
        let draft = self.draft.take().ok_or(ConfigError::NoDraft)?;
        self.committed = draft;
        Ok(&self.committed)
    }

    /// Drops the draft. Returns false when none was open.
    pub fn discard(&mut self) -> bool {
        self.draft.take().is_some()
    }
}

/// Loads a YAML document; `None` when the file does not exist yet.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    info!("Loaded {}", path.display());
    Ok(Some(value))
}

pub fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let contents = serde_yaml::to_string(value)?;
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Saved {}", path.display());
    Ok(())
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    Ok(load_yaml(path)?.unwrap_or_default())
}

pub fn load_state(path: &Path) -> Result<SessionState> {
    Ok(load_yaml(path)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContactState, Macro, MacroSlot};

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.add_profile("default", Some("default.png".into())).unwrap();
        settings.set_endpoint(Some("192.168.1.177".into()), Some(8888));
        for (field, point) in [
            (HotspotField::TopLeft, Point::new(10, 10)),
            (HotspotField::BottomRight, Point::new(40, 40)),
            (HotspotField::Common, Point::new(12, 25)),
            (HotspotField::NormallyOpen, Point::new(38, 15)),
            (HotspotField::NormallyClosed, Point::new(38, 35)),
        ] {
            settings.mark("default", RelayId(1), field, point).unwrap();
        }
        settings
            .mark("default", RelayId(2), HotspotField::TopLeft, Point::new(50, 10))
            .unwrap();
        settings
    }

    #[test]
    fn test_endpoint_requires_host_and_port() {
        let mut network = NetworkConfig::default();
        assert_eq!(network.endpoint(), None);
        network.host = Some("10.0.0.5".into());
        assert_eq!(network.endpoint(), None);
        network.port = Some(8888);
        assert_eq!(network.endpoint(), Some(Endpoint::new("10.0.0.5", 8888)));
        network.host = Some("  ".into());
        assert_eq!(network.endpoint(), None);
    }

    #[test]
    fn test_complete_relays_excludes_partial_hotspots() {
        let settings = settings();
        let relays: Vec<_> = settings.profile("default").unwrap().complete_relays().collect();
        assert_eq!(relays, vec![RelayId(1)]);
    }

    #[test]
    fn test_profile_errors() {
        let mut settings = settings();
        assert_eq!(
            settings.add_profile("default", None),
            Err(ConfigError::DuplicateProfile("default".into()))
        );
        assert!(matches!(
            settings.mark("vhf", RelayId(1), HotspotField::Common, Point::new(0, 0)),
            Err(ConfigError::UnknownProfile(_))
        ));
        assert!(settings.remove_profile("default").is_ok());
        assert!(settings.profile("default").is_err());
    }

    #[test]
    fn test_draft_commit_and_discard() {
        let mut session = ConfigSession::new(settings());
        assert_eq!(session.draft_mut().unwrap_err(), ConfigError::NoDraft);

        session.begin().set_endpoint(Some("10.0.0.9".into()), Some(9999));
        assert_eq!(session.committed().network.port, Some(8888));
        assert!(session.discard());
        assert!(!session.is_editing());
        assert_eq!(session.committed().network.port, Some(8888));

        session.begin();
        session.draft_mut().unwrap().add_profile("vhf", None).unwrap();
        let committed = session.commit().unwrap();
        assert!(committed.profiles.contains_key("vhf"));
        assert_eq!(session.commit().unwrap_err(), ConfigError::NoDraft);
    }

    #[test]
    fn test_settings_and_state_round_trip_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("nested").join("settings.yaml");
        let state_path = dir.path().join("state.yaml");

        let settings = settings();
        save_yaml(&settings_path, &settings).unwrap();
        assert_eq!(load_settings(&settings_path).unwrap(), settings);

        let mut state = SessionState::default();
        state.template = Some("default".into());
        let mut relays = RelayStates::new();
        relays.insert(RelayId(1), ContactState::Energized);
        relays.insert(RelayId(2), ContactState::DeEnergized);
        state.relays.insert("default".into(), relays.clone());
        let mut macros = ProfileMacros::new();
        macros.insert(MacroSlot(0), Macro { label: "dipole".into(), states: relays });
        state.macros.insert("default".into(), macros);

        save_yaml(&state_path, &state).unwrap();
        assert_eq!(load_state(&state_path).unwrap(), state);
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.external.enabled);
        let state = load_state(&dir.path().join("absent-state.yaml")).unwrap();
        assert_eq!(state.window, [300, 300, 300, 500]);
    }

    #[test]
    fn test_hotspot_for_relay_zero_fails_to_load() {
        let yaml = "profiles:\n  default:\n    hotspots:\n      0:\n        top_left: {x: 1, y: 1}\n";
        assert!(serde_yaml::from_str::<Settings>(yaml).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, yaml).unwrap();
        assert!(load_settings(&path).is_err());

        let yaml = "profiles:\n  default:\n    hotspots:\n      4:\n        top_left: {x: 1, y: 1}\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.profile("default").unwrap().hotspots.contains_key(&RelayId(4)));
    }

    #[test]
    fn test_remove_hotspot() {
        let mut settings = settings();
        let removed = settings.remove_hotspot("default", RelayId(1)).unwrap();
        assert!(removed.is_some_and(|draft| draft.is_complete()));
        assert_eq!(settings.remove_hotspot("default", RelayId(1)).unwrap(), None);
        assert_eq!(settings.profile("default").unwrap().complete_relays().count(), 0);
        assert!(matches!(
            settings.remove_hotspot("vhf", RelayId(1)),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "network:\n  host: 192.168.1.177\n  port: 8888\ntiming:\n  macro_pacing_ms: 100\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.network.endpoint(), Some(Endpoint::new("192.168.1.177", 8888)));
        assert_eq!(settings.timing.macro_pacing(), Duration::from_millis(100));
        assert_eq!(settings.timing.probe_timeout_ms, 500);
    }
}
