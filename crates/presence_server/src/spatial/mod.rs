//! Static space geometry: floor bounds and meeting zones.
//!
//! Geometry is injected configuration, loaded once and never mutated. Spaces
//! without an explicit entry use the default bounds and have no zones.

pub mod bounds;
pub mod zones;

pub use bounds::FloorBounds;
pub use zones::{zone_transitions, MeetingZone, ZoneMap, ZoneRegion, ZoneTransition};

use crate::types::{Position, SpaceId};
use std::collections::HashMap;

/// Geometry of a single configured space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpaceGeometry {
    pub bounds: FloorBounds,
    pub zones: ZoneMap,
}

/// Geometry lookup for every space the server knows about.
#[derive(Debug, Clone, Default)]
pub struct SpaceCatalog {
    default_bounds: FloorBounds,
    spaces: HashMap<SpaceId, SpaceGeometry>,
}

impl SpaceCatalog {
    pub fn new(default_bounds: FloorBounds) -> Self {
        Self {
            default_bounds,
            spaces: HashMap::new(),
        }
    }

    pub fn with_space(mut self, space_id: SpaceId, geometry: SpaceGeometry) -> Self {
        self.spaces.insert(space_id, geometry);
        self
    }

    pub fn bounds_for(&self, space_id: &SpaceId) -> &FloorBounds {
        self.spaces
            .get(space_id)
            .map(|g| &g.bounds)
            .unwrap_or(&self.default_bounds)
    }

    /// Meeting zone at `position` within `space_id`.
    pub fn detect_zone(&self, space_id: &SpaceId, position: Position) -> Option<&str> {
        self.spaces.get(space_id)?.zones.detect(position)
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.default_bounds.validate()?;
        for (space_id, geometry) in &self.spaces {
            geometry
                .bounds
                .validate()
                .map_err(|e| format!("space '{space_id}': {e}"))?;
            geometry
                .zones
                .validate()
                .map_err(|e| format!("space '{space_id}': {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_spaces_fall_back_to_default_bounds_and_no_zones() {
        let catalog = SpaceCatalog::new(FloorBounds::default());
        let space = SpaceId::from("nowhere");
        assert_eq!(catalog.bounds_for(&space), &FloorBounds::default());
        assert_eq!(catalog.detect_zone(&space, Position::default()), None);
    }

    #[test]
    fn configured_space_uses_its_own_geometry() {
        let bounds = FloorBounds {
            min_x: 0.0,
            max_x: 50.0,
            min_y: 0.0,
            max_y: 5.0,
            min_z: 0.0,
            max_z: 50.0,
        };
        let zones = ZoneMap::new(vec![MeetingZone {
            room_id: "standup".into(),
            region: ZoneRegion { min_x: 0.0, max_x: 5.0, min_z: 0.0, max_z: 5.0 },
        }]);
        let catalog = SpaceCatalog::new(FloorBounds::default())
            .with_space("hq".into(), SpaceGeometry { bounds, zones });

        let hq = SpaceId::from("hq");
        assert_eq!(catalog.bounds_for(&hq), &bounds);
        assert_eq!(catalog.detect_zone(&hq, Position::new(1.0, 0.0, 1.0)), Some("standup"));
        assert!(catalog.validate().is_ok());
    }
}
