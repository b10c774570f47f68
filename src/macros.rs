use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::MacroError;
use crate::hotspot::HotspotIndex;
use crate::interaction::Output;
use crate::link::RelayControl;
use crate::store::RelayStateStore;
use crate::types::{Macro, MacroSlot};

/// Delay between relays during playback, so the controller is not flooded
/// and relays do not all actuate at once.
pub const MACRO_PACING: Duration = Duration::from_millis(300);

pub type ProfileMacros = BTreeMap<MacroSlot, Macro>;

/// Saved relay snapshots per profile and their paced playback.
#[derive(Debug, Clone)]
pub struct MacroPlayer {
    macros: HashMap<String, ProfileMacros>,
    pacing: Duration,
}

impl MacroPlayer {
    pub fn new(macros: HashMap<String, ProfileMacros>, pacing: Duration) -> Self {
        Self { macros, pacing }
    }

    pub fn macros(&self) -> &HashMap<String, ProfileMacros> {
        &self.macros
    }

    pub fn get(&self, profile: &str, slot: MacroSlot) -> Option<&Macro> {
        self.macros.get(profile).and_then(|slots| slots.get(&slot))
    }

    pub fn remove_profile(&mut self, profile: &str) {
        self.macros.remove(profile);
    }

    /// Copies the profile's current contact states into `slot`.
    pub fn save(
        &mut self,
        store: &RelayStateStore,
        profile: &str,
        slot: MacroSlot,
        label: &str,
    ) -> Result<(), MacroError> {
        if !store.has_profile(profile) {
            return Err(MacroError::UnknownProfile(profile.to_string()));
        }
        let saved = Macro {
            label: label.to_string(),
            states: store.snapshot(profile),
        };
        info!(
            "Saved macro {} '{}' for profile '{}' ({} relays)",
            slot,
            label,
            profile,
            saved.states.len()
        );
        self.macros
            .entry(profile.to_string())
            .or_default()
            .insert(slot, saved);
        Ok(())
    }

    /// Replays a saved snapshot in ascending relay order. Each relay goes
    /// through the store, then the display, then the controller. A failed send
    /// does not stop the sequence. Returns the number of relays replayed.
    pub async fn execute<R>(
        &self,
        profile: &str,
        slot: MacroSlot,
        store: &mut RelayStateStore,
        index: &HotspotIndex,
        relays: &mut R,
        mut display: impl FnMut(Output),
    ) -> Result<usize, MacroError>
    where
        R: RelayControl + ?Sized,
    {
        let saved = self
            .get(profile, slot)
            .ok_or_else(|| MacroError::EmptySlot {
                profile: profile.to_string(),
                slot,
            })?
            .states
            .clone();
        info!("Executing macro {} for profile '{}'", slot, profile);

        let mut replayed = 0;
        for (relay, state) in saved {
            if !store.contains(profile, relay) {
                warn!("Macro {} names relay {} which is not configured, skipping", slot, relay);
                continue;
            }
            if replayed > 0 {
                sleep(self.pacing).await;
            }
            store.set(profile, relay, state);
            if let Some(line) = index.contact_line(relay, state) {
                display(Output::ContactLine { relay, line });
            }
            relays.set_relay(relay, state).await;
            replayed += 1;
        }
        Ok(replayed)
    }
}

impl Default for MacroPlayer {
    fn default() -> Self {
        Self::new(HashMap::new(), MACRO_PACING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::Hotspot;
    use crate::types::{ContactState, Point, RelayId};
    use async_trait::async_trait;
    use tokio::time::Instant;

    const PROFILE: &str = "default";

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(Instant, RelayId, ContactState)>,
    }

    #[async_trait]
    impl RelayControl for Recorder {
        async fn set_relay(&mut self, relay: RelayId, state: ContactState) {
            self.sent.push((Instant::now(), relay, state));
        }
    }

    fn store_with(relays: &[u8]) -> RelayStateStore {
        let mut store = RelayStateStore::new();
        for id in relays {
            store.ensure_relay(PROFILE, RelayId(*id));
        }
        store
    }

    fn index_with(relays: &[u8]) -> HotspotIndex {
        let mut index = HotspotIndex::new();
        for id in relays {
            let x = *id as i32 * 50;
            index.insert(
                RelayId(*id),
                Hotspot {
                    top_left: Point::new(x, 0),
                    bottom_right: Point::new(x + 40, 40),
                    common: Point::new(x + 5, 20),
                    normally_open: Point::new(x + 35, 5),
                    normally_closed: Point::new(x + 35, 35),
                },
            );
        }
        index
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_in_ascending_order_with_pacing() {
        let mut store = store_with(&[2, 5]);
        store.set(PROFILE, RelayId(2), ContactState::Energized);
        let index = index_with(&[2, 5]);
        let mut player = MacroPlayer::default();
        player.save(&store, PROFILE, MacroSlot(0), "dipole").unwrap();

        store.set(PROFILE, RelayId(2), ContactState::DeEnergized);
        store.set(PROFILE, RelayId(5), ContactState::Energized);

        let mut recorder = Recorder::default();
        let mut lines = Vec::new();
        let replayed = player
            .execute(PROFILE, MacroSlot(0), &mut store, &index, &mut recorder, |o| lines.push(o))
            .await
            .unwrap();

        assert_eq!(replayed, 2);
        let order: Vec<_> = recorder.sent.iter().map(|(_, r, s)| (*r, *s)).collect();
        assert_eq!(
            order,
            vec![(RelayId(2), ContactState::Energized), (RelayId(5), ContactState::DeEnergized)]
        );
        assert!(recorder.sent[1].0 - recorder.sent[0].0 >= MACRO_PACING);
        assert_eq!(store.get(PROFILE, RelayId(2)), ContactState::Energized);
        assert_eq!(store.get(PROFILE, RelayId(5)), ContactState::DeEnergized);
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_then_execute_leaves_states_unchanged() {
        let mut store = store_with(&[1, 3, 4]);
        store.set(PROFILE, RelayId(3), ContactState::Energized);
        let before = store.snapshot(PROFILE);
        let index = index_with(&[1, 3, 4]);
        let mut player = MacroPlayer::default();
        player.save(&store, PROFILE, MacroSlot(2), "beam").unwrap();

        let mut recorder = Recorder::default();
        player
            .execute(PROFILE, MacroSlot(2), &mut store, &index, &mut recorder, |_| {})
            .await
            .unwrap();

        assert_eq!(store.snapshot(PROFILE), before);
        let ids: Vec<_> = recorder.sent.iter().map(|(_, r, _)| *r).collect();
        assert_eq!(ids, vec![RelayId(1), RelayId(3), RelayId(4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saved_macro_is_not_affected_by_later_changes() {
        let mut store = store_with(&[1]);
        let mut player = MacroPlayer::default();
        player.save(&store, PROFILE, MacroSlot(0), "").unwrap();
        store.toggle(PROFILE, RelayId(1));

        let saved = player.get(PROFILE, MacroSlot(0)).unwrap();
        assert_eq!(saved.states[&RelayId(1)], ContactState::DeEnergized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_slot_is_an_error() {
        let mut store = store_with(&[1]);
        let player = MacroPlayer::default();
        let mut recorder = Recorder::default();
        let err = player
            .execute(PROFILE, MacroSlot(4), &mut store, &HotspotIndex::new(), &mut recorder, |_| {})
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MacroError::EmptySlot { profile: PROFILE.to_string(), slot: MacroSlot(4) }
        );
        assert!(recorder.sent.is_empty());
    }

    #[test]
    fn test_save_for_unknown_profile_fails() {
        let store = RelayStateStore::new();
        let mut player = MacroPlayer::default();
        assert_eq!(
            player.save(&store, "missing", MacroSlot(0), "x"),
            Err(MacroError::UnknownProfile("missing".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_relay_is_skipped() {
        let mut store = store_with(&[1, 2]);
        let mut player = MacroPlayer::default();
        player.save(&store, PROFILE, MacroSlot(0), "").unwrap();
        store.remove_relay(PROFILE, RelayId(1));

        let mut recorder = Recorder::default();
        let replayed = player
            .execute(PROFILE, MacroSlot(0), &mut store, &HotspotIndex::new(), &mut recorder, |_| {})
            .await
            .unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(recorder.sent[0].1, RelayId(2));
    }
}
