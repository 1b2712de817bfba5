//! Position codec: validating and clamping positions against floor bounds.

use crate::error::PresenceError;
use crate::types::Position;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounds of a space's walkable volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloorBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Default for FloorBounds {
    fn default() -> Self {
        Self {
            min_x: -1000.0,
            max_x: 1000.0,
            min_y: -100.0,
            max_y: 100.0,
            min_z: -1000.0,
            max_z: 1000.0,
        }
    }
}

impl FloorBounds {
    /// Checks that every axis is finite and ordered.
    pub fn validate(&self) -> Result<(), String> {
        let axes = [
            ("x", self.min_x, self.max_x),
            ("y", self.min_y, self.max_y),
            ("z", self.min_z, self.max_z),
        ];
        for (axis, min, max) in axes {
            if !min.is_finite() || !max.is_finite() {
                return Err(format!("bounds on {axis} must be finite"));
            }
            if min > max {
                return Err(format!("min_{axis} must not exceed max_{axis}"));
            }
        }
        Ok(())
    }

    pub fn contains(&self, position: Position) -> bool {
        (self.min_x..=self.max_x).contains(&position.x)
            && (self.min_y..=self.max_y).contains(&position.y)
            && (self.min_z..=self.max_z).contains(&position.z)
    }

    /// Clamps a finite position into the bounds.
    pub fn clamp(&self, position: Position) -> Position {
        Position {
            x: position.x.clamp(self.min_x, self.max_x),
            y: position.y.clamp(self.min_y, self.max_y),
            z: position.z.clamp(self.min_z, self.max_z),
        }
    }

    /// Out-of-range positions are corrected rather than rejected; only
    /// non-finite coordinates fail.
    pub fn sanitize(&self, position: Position) -> Result<Position, PresenceError> {
        if !position.is_finite() {
            return Err(PresenceError::Validation(format!(
                "non-finite position ({}, {}, {})",
                position.x, position.y, position.z
            )));
        }
        Ok(self.clamp(position))
    }
}
