//! # Meeting Zone Detection
//!
//! Static named regions of a space's floor. Entering one prompts the client to
//! join that room's call, leaving it prompts a hang-up. Detection is a pure
//! function of position; the caller keeps the previous result per connection
//! and only reacts to changes, so crossings produce events and ordinary
//! movement ticks do not.

use crate::types::Position;
use serde::{Deserialize, Serialize};

/// Rectangle on the x/z floor plane. Height is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneRegion {
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl ZoneRegion {
    /// Inclusive on every edge.
    pub fn contains(&self, position: Position) -> bool {
        position.x >= self.min_x
            && position.x <= self.max_x
            && position.z >= self.min_z
            && position.z <= self.max_z
    }
}

/// A named call room occupying a region of the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingZone {
    pub room_id: String,
    pub region: ZoneRegion,
}

/// Ordered zone geometry of one space.
///
/// Order is priority: when regions overlap the first configured zone wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneMap {
    zones: Vec<MeetingZone>,
}

impl ZoneMap {
    pub fn new(zones: Vec<MeetingZone>) -> Self {
        Self { zones }
    }

    pub fn zones(&self) -> &[MeetingZone] {
        &self.zones
    }

    /// Room id of the zone containing `position`, if any.
    pub fn detect(&self, position: Position) -> Option<&str> {
        self.zones
            .iter()
            .find(|zone| zone.region.contains(position))
            .map(|zone| zone.room_id.as_str())
    }

    /// Checks region ordering and room id uniqueness.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for zone in &self.zones {
            if zone.room_id.trim().is_empty() {
                return Err("meeting zone room_id cannot be empty".to_string());
            }
            if !seen.insert(zone.room_id.as_str()) {
                return Err(format!("duplicate meeting zone '{}'", zone.room_id));
            }
            let r = zone.region;
            if !(r.min_x <= r.max_x && r.min_z <= r.max_z) {
                return Err(format!("meeting zone '{}' has inverted bounds", zone.room_id));
            }
        }
        Ok(())
    }
}

/// A change in the zone a connection stands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneTransition {
    Entered(String),
    Exited(String),
}

/// Edge detection between two consecutive detections.
///
/// Moving straight from one zone into another yields the exit before the enter.
pub fn zone_transitions(previous: Option<&str>, current: Option<&str>) -> Vec<ZoneTransition> {
    if previous == current {
        return Vec::new();
    }
    let mut transitions = Vec::with_capacity(2);
    if let Some(left) = previous {
        transitions.push(ZoneTransition::Exited(left.to_string()));
    }
    if let Some(entered) = current {
        transitions.push(ZoneTransition::Entered(entered.to_string()));
    }
    transitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(room_id: &str, min_x: f64, max_x: f64, min_z: f64, max_z: f64) -> MeetingZone {
        MeetingZone {
            room_id: room_id.to_string(),
            region: ZoneRegion { min_x, max_x, min_z, max_z },
        }
    }

    fn office() -> ZoneMap {
        ZoneMap::new(vec![
            zone("room1", 10.0, 20.0, 10.0, 20.0),
            zone("room2", 30.0, 40.0, 10.0, 20.0),
        ])
    }

    #[test]
    fn detects_zone_by_floor_coordinates() {
        let map = office();
        assert_eq!(map.detect(Position::new(15.0, 0.0, 15.0)), Some("room1"));
        assert_eq!(map.detect(Position::new(35.0, 99.0, 12.0)), Some("room2"));
        assert_eq!(map.detect(Position::new(25.0, 0.0, 15.0)), None);
        // Edges are inside.
        assert_eq!(map.detect(Position::new(10.0, 0.0, 20.0)), Some("room1"));
    }

    #[test]
    fn overlapping_zones_resolve_to_first_configured() {
        let map = ZoneMap::new(vec![
            zone("big", 0.0, 100.0, 0.0, 100.0),
            zone("small", 10.0, 20.0, 10.0, 20.0),
        ]);
        assert_eq!(map.detect(Position::new(15.0, 0.0, 15.0)), Some("big"));
    }

    #[test]
    fn transitions_only_on_change() {
        assert!(zone_transitions(None, None).is_empty());
        assert!(zone_transitions(Some("room1"), Some("room1")).is_empty());
        assert_eq!(
            zone_transitions(None, Some("room1")),
            vec![ZoneTransition::Entered("room1".into())]
        );
        assert_eq!(
            zone_transitions(Some("room1"), None),
            vec![ZoneTransition::Exited("room1".into())]
        );
        assert_eq!(
            zone_transitions(Some("room1"), Some("room2")),
            vec![
                ZoneTransition::Exited("room1".into()),
                ZoneTransition::Entered("room2".into()),
            ]
        );
    }

    #[test]
    fn walking_through_a_room_emits_one_enter_and_one_exit() {
        let map = office();
        let path = [0.0, 5.0, 12.0, 14.0, 16.0, 18.0, 25.0];
        let mut previous: Option<String> = None;
        let mut events = Vec::new();
        for x in path {
            let current = map.detect(Position::new(x, 0.0, 15.0)).map(str::to_string);
            events.extend(zone_transitions(previous.as_deref(), current.as_deref()));
            previous = current;
        }
        assert_eq!(
            events,
            vec![
                ZoneTransition::Entered("room1".into()),
                ZoneTransition::Exited("room1".into()),
            ]
        );
    }

    #[test]
    fn duplicate_room_ids_fail_validation() {
        let map = ZoneMap::new(vec![zone("a", 0.0, 1.0, 0.0, 1.0), zone("a", 2.0, 3.0, 2.0, 3.0)]);
        assert!(map.validate().is_err());
        assert!(office().validate().is_ok());
    }
}
