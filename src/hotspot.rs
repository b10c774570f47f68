//! Hotspot geometry: point-to-relay resolution and the contact line drawn for
//! a relay's current state.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::types::{ContactState, Point, RelayId};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotspotField {
    TopLeft,
    BottomRight,
    Common,
    NormallyOpen,
    NormallyClosed,
}

/// A hotspot as edited in configuration mode. Any point may still be unset.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotDraft {
    pub top_left: Option<Point>,
    pub bottom_right: Option<Point>,
    pub common: Option<Point>,
    pub normally_open: Option<Point>,
    pub normally_closed: Option<Point>,
}

impl HotspotDraft {
    pub fn set(&mut self, field: HotspotField, point: Point) {
        let slot = match field {
            HotspotField::TopLeft => &mut self.top_left,
            HotspotField::BottomRight => &mut self.bottom_right,
            HotspotField::Common => &mut self.common,
            HotspotField::NormallyOpen => &mut self.normally_open,
            HotspotField::NormallyClosed => &mut self.normally_closed,
        };
        *slot = Some(point);
    }

    pub fn is_complete(&self) -> bool {
        self.top_left.is_some()
            && self.bottom_right.is_some()
            && self.common.is_some()
            && self.normally_open.is_some()
            && self.normally_closed.is_some()
    }

    /// Converts to a usable hotspot. The rectangle corners are normalised so
    /// that marks made in any diagonal order still yield TopLeft <= BottomRight.
    pub fn complete(&self, relay: RelayId) -> Result<Hotspot, ConfigError> {
        match (
            self.top_left,
            self.bottom_right,
            self.common,
            self.normally_open,
            self.normally_closed,
        ) {
            (Some(a), Some(b), Some(common), Some(normally_open), Some(normally_closed)) => {
                Ok(Hotspot {
                    top_left: Point::new(a.x.min(b.x), a.y.min(b.y)),
                    bottom_right: Point::new(a.x.max(b.x), a.y.max(b.y)),
                    common,
                    normally_open,
                    normally_closed,
                })
            }
            _ => Err(ConfigError::IncompleteHotspot(relay)),
        }
    }
}

impl From<Hotspot> for HotspotDraft {
    fn from(h: Hotspot) -> Self {
        Self {
            top_left: Some(h.top_left),
            bottom_right: Some(h.bottom_right),
            common: Some(h.common),
            normally_open: Some(h.normally_open),
            normally_closed: Some(h.normally_closed),
        }
    }
}

/// A complete hotspot: clickable rectangle plus the three contact points.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Hotspot {
    pub top_left: Point,
    pub bottom_right: Point,
    pub common: Point,
    pub normally_open: Point,
    pub normally_closed: Point,
}

impl Hotspot {
    /// Inclusive on all four edges.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.top_left.x
            && p.y >= self.top_left.y
            && p.x <= self.bottom_right.x
            && p.y <= self.bottom_right.y
    }

    pub fn overlaps(&self, other: &Hotspot) -> bool {
        self.top_left.x <= other.bottom_right.x
            && other.top_left.x <= self.bottom_right.x
            && self.top_left.y <= other.bottom_right.y
            && other.top_left.y <= self.bottom_right.y
    }

    pub fn contact_line(&self, state: ContactState) -> ContactLine {
        let to = match state {
            ContactState::Energized => self.normally_open,
            ContactState::DeEnergized => self.normally_closed,
        };
        ContactLine {
            from: self.common,
            to,
        }
    }
}

/// Switch-position line from the common contact to the closed contact.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ContactLine {
    pub from: Point,
    pub to: Point,
}

/// Relay hotspots of one profile. Only complete hotspots are admitted.
#[derive(Debug, Default, Clone)]
pub struct HotspotIndex {
    hotspots: BTreeMap<RelayId, Hotspot>,
}

impl HotspotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from configured drafts, skipping incomplete ones.
    pub fn from_drafts<'a>(drafts: impl IntoIterator<Item = (&'a RelayId, &'a HotspotDraft)>) -> Self {
        let mut index = Self::new();
        for (relay, draft) in drafts {
            match draft.complete(*relay) {
                Ok(hotspot) => index.insert(*relay, hotspot),
                Err(e) => warn!("Ignoring hotspot: {}", e),
            }
        }
        index
    }

    pub fn is_complete(draft: &HotspotDraft) -> bool {
        draft.is_complete()
    }

    pub fn insert(&mut self, relay: RelayId, hotspot: Hotspot) {
        for (other_id, other) in &self.hotspots {
            if *other_id != relay && other.overlaps(&hotspot) {
                warn!(
                    "Hotspot for relay {} overlaps relay {}; clicks resolve to the lower id",
                    relay, other_id
                );
            }
        }
        self.hotspots.insert(relay, hotspot);
    }

    pub fn get(&self, relay: RelayId) -> Option<&Hotspot> {
        self.hotspots.get(&relay)
    }

    pub fn relays(&self) -> impl Iterator<Item = RelayId> + '_ {
        self.hotspots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.hotspots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotspots.is_empty()
    }

    /// First hotspot containing `p`. Iteration is in ascending relay id, so
    /// overlapping hotspots resolve to the smallest id.
    pub fn locate(&self, p: Point) -> Option<RelayId> {
        self.hotspots
            .iter()
            .find(|(_, h)| h.contains(p))
            .map(|(id, _)| *id)
    }

    /// `None` when the relay has no hotspot in this profile.
    pub fn contact_line(&self, relay: RelayId, state: ContactState) -> Option<ContactLine> {
        self.hotspots.get(&relay).map(|h| h.contact_line(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotspot(x: i32, y: i32, w: i32, h: i32) -> Hotspot {
        Hotspot {
            top_left: Point::new(x, y),
            bottom_right: Point::new(x + w, y + h),
            common: Point::new(x + 1, y + 1),
            normally_open: Point::new(x + w - 1, y + 1),
            normally_closed: Point::new(x + w - 1, y + h - 1),
        }
    }

    fn index() -> HotspotIndex {
        let mut index = HotspotIndex::new();
        index.insert(RelayId(1), hotspot(10, 10, 20, 20));
        index.insert(RelayId(2), hotspot(50, 10, 20, 20));
        index.insert(RelayId(3), hotspot(10, 50, 20, 20));
        index
    }

    #[test]
    fn test_contact_line_follows_state() {
        let index = index();
        for relay in index.relays().collect::<Vec<_>>() {
            let h = *index.get(relay).unwrap();
            assert_eq!(
                index.contact_line(relay, ContactState::DeEnergized),
                Some(ContactLine { from: h.common, to: h.normally_closed })
            );
            assert_eq!(
                index.contact_line(relay, ContactState::Energized),
                Some(ContactLine { from: h.common, to: h.normally_open })
            );
        }
        assert_eq!(index.contact_line(RelayId(9), ContactState::Energized), None);
    }

    #[test]
    fn test_locate_inside_and_outside() {
        let index = index();
        assert_eq!(index.locate(Point::new(20, 20)), Some(RelayId(1)));
        assert_eq!(index.locate(Point::new(60, 25)), Some(RelayId(2)));
        assert_eq!(index.locate(Point::new(15, 65)), Some(RelayId(3)));
        assert_eq!(index.locate(Point::new(40, 40)), None);
        assert_eq!(index.locate(Point::new(-5, 0)), None);
    }

    #[test]
    fn test_locate_edges_are_inclusive() {
        let index = index();
        assert_eq!(index.locate(Point::new(10, 10)), Some(RelayId(1)));
        assert_eq!(index.locate(Point::new(30, 30)), Some(RelayId(1)));
        assert_eq!(index.locate(Point::new(31, 30)), None);
        assert_eq!(index.locate(Point::new(30, 9)), None);
    }

    #[test]
    fn test_overlap_resolves_to_lowest_id() {
        let mut index = HotspotIndex::new();
        index.insert(RelayId(5), hotspot(0, 0, 100, 100));
        index.insert(RelayId(2), hotspot(40, 40, 100, 100));
        assert_eq!(index.locate(Point::new(50, 50)), Some(RelayId(2)));
        assert_eq!(index.locate(Point::new(10, 10)), Some(RelayId(5)));
    }

    #[test]
    fn test_incomplete_draft_is_rejected() {
        let mut draft = HotspotDraft::default();
        draft.set(HotspotField::TopLeft, Point::new(0, 0));
        draft.set(HotspotField::BottomRight, Point::new(10, 10));
        draft.set(HotspotField::Common, Point::new(1, 1));
        draft.set(HotspotField::NormallyOpen, Point::new(9, 1));
        assert!(!HotspotIndex::is_complete(&draft));
        assert_eq!(
            draft.complete(RelayId(4)),
            Err(ConfigError::IncompleteHotspot(RelayId(4)))
        );

        draft.set(HotspotField::NormallyClosed, Point::new(9, 9));
        assert!(HotspotIndex::is_complete(&draft));
        assert!(draft.complete(RelayId(4)).is_ok());
    }

    #[test]
    fn test_from_drafts_skips_incomplete() {
        let mut drafts = BTreeMap::new();
        drafts.insert(RelayId(1), HotspotDraft::from(hotspot(0, 0, 10, 10)));
        let mut partial = HotspotDraft::default();
        partial.set(HotspotField::TopLeft, Point::new(50, 50));
        drafts.insert(RelayId(2), partial);

        let index = HotspotIndex::from_drafts(&drafts);
        assert_eq!(index.len(), 1);
        assert_eq!(index.locate(Point::new(5, 5)), Some(RelayId(1)));
        assert_eq!(index.locate(Point::new(50, 50)), None);
    }

    #[test]
    fn test_corners_are_normalised() {
        let mut draft = HotspotDraft::from(hotspot(0, 0, 10, 10));
        draft.set(HotspotField::TopLeft, Point::new(20, 20));
        draft.set(HotspotField::BottomRight, Point::new(5, 8));
        let h = draft.complete(RelayId(1)).unwrap();
        assert_eq!(h.top_left, Point::new(5, 8));
        assert_eq!(h.bottom_right, Point::new(20, 20));
    }
}
