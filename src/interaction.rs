use log::debug;

use crate::hotspot::{ContactLine, HotspotIndex};
use crate::store::RelayStateStore;
use crate::types::{ContactState, Point, RelayId};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Mode {
    #[default]
    Undefined,
    Configuring,
    Running,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Button {
    Primary,
    Secondary,
    Middle,
}

/// Raw pointer input from the presentation layer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PointerEvent {
    Move(Point),
    Press { at: Point, button: Button },
}

/// What a pointer event produced, in the order it must be acted on.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Output {
    /// Cursor position while configuring.
    Position(Point),
    /// Primary click while configuring; the configuration UI decides which
    /// hotspot field it fills.
    Mark(Point),
    Highlight {
        relay: RelayId,
        top_left: Point,
        bottom_right: Point,
    },
    ClearHighlight,
    ContactLine { relay: RelayId, line: ContactLine },
    /// Send the relay command to the controller.
    SetRelay { relay: RelayId, state: ContactState },
}

#[derive(Debug, Default)]
pub struct InteractionStateMachine {
    mode: Mode,
}

impl InteractionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            debug!("Interaction mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    /// Classifies a pointer event for the current mode. A running-mode click
    /// updates `store` before the returned `SetRelay` is sent, so the drawn and
    /// logical state agree whatever happens on the wire.
    pub fn handle(
        &self,
        event: PointerEvent,
        profile: &str,
        index: &HotspotIndex,
        store: &mut RelayStateStore,
    ) -> Vec<Output> {
        match (self.mode, event) {
            (Mode::Undefined, _) => Vec::new(),

            (Mode::Configuring, PointerEvent::Move(at)) => vec![Output::Position(at)],
            (Mode::Configuring, PointerEvent::Press { at, button: Button::Primary }) => {
                vec![Output::Mark(at)]
            }
            (Mode::Configuring, PointerEvent::Press { .. }) => Vec::new(),

            (Mode::Running, PointerEvent::Move(at)) => {
                let highlight = index
                    .locate(at)
                    .and_then(|relay| index.get(relay).map(|h| (relay, h)))
                    .map(|(relay, h)| Output::Highlight {
                        relay,
                        top_left: h.top_left,
                        bottom_right: h.bottom_right,
                    });
                vec![highlight.unwrap_or(Output::ClearHighlight)]
            }
            (Mode::Running, PointerEvent::Press { at, button: Button::Primary }) => {
                let Some(relay) = index.locate(at) else {
                    return Vec::new();
                };
                let state = store.toggle(profile, relay);
                let mut outputs = Vec::with_capacity(2);
                if let Some(line) = index.contact_line(relay, state) {
                    outputs.push(Output::ContactLine { relay, line });
                }
                outputs.push(Output::SetRelay { relay, state });
                outputs
            }
            (Mode::Running, PointerEvent::Press { .. }) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::Hotspot;

    const PROFILE: &str = "default";

    fn setup() -> (HotspotIndex, RelayStateStore) {
        let mut index = HotspotIndex::new();
        index.insert(
            RelayId(1),
            Hotspot {
                top_left: Point::new(10, 10),
                bottom_right: Point::new(40, 40),
                common: Point::new(12, 25),
                normally_open: Point::new(38, 15),
                normally_closed: Point::new(38, 35),
            },
        );
        let mut store = RelayStateStore::new();
        store.ensure_relay(PROFILE, RelayId(1));
        (index, store)
    }

    fn press(x: i32, y: i32) -> PointerEvent {
        PointerEvent::Press { at: Point::new(x, y), button: Button::Primary }
    }

    #[test]
    fn test_undefined_mode_ignores_everything() {
        let (index, mut store) = setup();
        let machine = InteractionStateMachine::new();
        assert_eq!(machine.mode(), Mode::Undefined);
        assert!(machine.handle(press(20, 20), PROFILE, &index, &mut store).is_empty());
        assert!(machine
            .handle(PointerEvent::Move(Point::new(20, 20)), PROFILE, &index, &mut store)
            .is_empty());
        assert_eq!(store.get(PROFILE, RelayId(1)), ContactState::DeEnergized);
    }

    #[test]
    fn test_configuring_reports_positions_and_marks() {
        let (index, mut store) = setup();
        let mut machine = InteractionStateMachine::new();
        machine.set_mode(Mode::Configuring);

        let moved = machine.handle(PointerEvent::Move(Point::new(20, 20)), PROFILE, &index, &mut store);
        assert_eq!(moved, vec![Output::Position(Point::new(20, 20))]);

        let marked = machine.handle(press(20, 20), PROFILE, &index, &mut store);
        assert_eq!(marked, vec![Output::Mark(Point::new(20, 20))]);

        let right = PointerEvent::Press { at: Point::new(20, 20), button: Button::Secondary };
        assert!(machine.handle(right, PROFILE, &index, &mut store).is_empty());

        // configuring never toggles relays
        assert_eq!(store.get(PROFILE, RelayId(1)), ContactState::DeEnergized);
    }

    #[test]
    fn test_running_highlights_hotspot_under_pointer() {
        let (index, mut store) = setup();
        let mut machine = InteractionStateMachine::new();
        machine.set_mode(Mode::Running);

        let inside = machine.handle(PointerEvent::Move(Point::new(10, 40)), PROFILE, &index, &mut store);
        assert_eq!(
            inside,
            vec![Output::Highlight {
                relay: RelayId(1),
                top_left: Point::new(10, 10),
                bottom_right: Point::new(40, 40),
            }]
        );

        let outside = machine.handle(PointerEvent::Move(Point::new(90, 90)), PROFILE, &index, &mut store);
        assert_eq!(outside, vec![Output::ClearHighlight]);
    }

    #[test]
    fn test_click_toggles_then_draws_then_sends() {
        let (index, mut store) = setup();
        let mut machine = InteractionStateMachine::new();
        machine.set_mode(Mode::Running);

        let outputs = machine.handle(press(20, 20), PROFILE, &index, &mut store);

        assert_eq!(store.get(PROFILE, RelayId(1)), ContactState::Energized);
        assert_eq!(
            outputs,
            vec![
                Output::ContactLine {
                    relay: RelayId(1),
                    line: index.contact_line(RelayId(1), ContactState::Energized).unwrap(),
                },
                Output::SetRelay { relay: RelayId(1), state: ContactState::Energized },
            ]
        );

        let outputs = machine.handle(press(20, 20), PROFILE, &index, &mut store);
        assert_eq!(store.get(PROFILE, RelayId(1)), ContactState::DeEnergized);
        assert_eq!(
            outputs[1],
            Output::SetRelay { relay: RelayId(1), state: ContactState::DeEnergized }
        );
    }

    #[test]
    fn test_click_outside_hotspots_does_nothing() {
        let (index, mut store) = setup();
        let mut machine = InteractionStateMachine::new();
        machine.set_mode(Mode::Running);

        assert!(machine.handle(press(100, 100), PROFILE, &index, &mut store).is_empty());
        let middle = PointerEvent::Press { at: Point::new(20, 20), button: Button::Middle };
        assert!(machine.handle(middle, PROFILE, &index, &mut store).is_empty());
        assert_eq!(store.get(PROFILE, RelayId(1)), ContactState::DeEnergized);
    }
}
