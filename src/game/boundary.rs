//! Boundary geometry - per-team containment squares and scale correction
//!
//! The host positions a border by its center in unscaled coordinates but
//! applies a world's coordinate scale to distances, so sizes handed to it
//! must already be divided by that scale. [`compute_boundary`] is the only
//! place this asymmetry is encoded.

use serde::{Deserialize, Serialize};

use crate::host::{Location, WorldKey};

use super::quadrant::Quadrant;

/// Center and size of a quadrant boundary as the host expects them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryGeometry {
    pub center_x: f64,
    pub center_z: f64,
    /// Edge length, already divided by the world's coordinate scale
    pub size: f64,
}

/// Compute the boundary for a quadrant.
///
/// The center sits `configured_size / 2 + axis_buffer_offset` out from the
/// origin on each axis and is never scaled. The size is divided by
/// `coordinate_scale`.
pub fn compute_boundary(
    quadrant: Quadrant,
    configured_size: f64,
    axis_buffer_offset: f64,
    coordinate_scale: f64,
) -> BoundaryGeometry {
    let offset = configured_size / 2.0 + axis_buffer_offset;
    BoundaryGeometry {
        center_x: offset * quadrant.x_sign(),
        center_z: offset * quadrant.z_sign(),
        size: configured_size / coordinate_scale,
    }
}

/// Shift a raw location so that the host's native inside test gives the
/// right answer in a scaled world.
///
/// In a scaled world the host compares an unscaled center against scaled
/// positions. Adding `center - sign * size / 2 - sign * axis_buffer_offset /
/// coordinate_scale` on each axis lines the two up again. With a scale of 1
/// the raw location is returned unchanged.
pub fn shifted_test_location(
    raw: &Location,
    center: (f64, f64),
    size: f64,
    axis_buffer_offset: f64,
    coordinate_scale: f64,
    quadrant: Quadrant,
) -> Location {
    if coordinate_scale == 1.0 {
        return raw.clone();
    }
    let (center_x, center_z) = center;
    let x_shift = center_x
        - quadrant.x_sign() * size / 2.0
        - quadrant.x_sign() * axis_buffer_offset / coordinate_scale;
    let z_shift = center_z
        - quadrant.z_sign() * size / 2.0
        - quadrant.z_sign() * axis_buffer_offset / coordinate_scale;
    raw.with_horizontal(raw.x + x_shift, raw.z + z_shift)
}

/// Size of the world-wide border that encloses all four quadrants
pub fn global_border_size(
    configured_size: f64,
    axis_buffer_offset: f64,
    coordinate_scale: f64,
) -> f64 {
    (configured_size * 2.0 + axis_buffer_offset * 2.0) / coordinate_scale
}

/// Damage for one penalty tick.
///
/// Every full `damage_buffer` of distance past the edge costs
/// `damage_per_hit`.
pub fn penalty_damage(damage_per_hit: f64, distance_outside: f64, damage_buffer: f64) -> f64 {
    if damage_buffer <= 0.0 || distance_outside <= 0.0 {
        return 0.0;
    }
    damage_per_hit * (distance_outside / damage_buffer).floor()
}

/// Damage and warning values copied onto every boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundarySettings {
    pub damage_per_hit: f64,
    pub damage_buffer: f64,
    pub warning_distance: u32,
    pub warning_time_secs: u32,
}

impl Default for BoundarySettings {
    fn default() -> Self {
        Self {
            damage_per_hit: 0.5,
            damage_buffer: 5.0,
            warning_distance: 5,
            warning_time_secs: 15,
        }
    }
}

/// A personal border assigned to one entity during the prep phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualBoundary {
    /// Unique per assignment; a replacement always gets a new id
    pub id: u64,
    pub world: WorldKey,
    pub quadrant: Quadrant,
    pub center_x: f64,
    pub center_z: f64,
    pub size: f64,
    pub coordinate_scale: f64,
    pub axis_buffer_offset: f64,
    pub damage_per_hit: f64,
    pub damage_buffer: f64,
    pub warning_distance: u32,
    pub warning_time_secs: u32,
}

impl VirtualBoundary {
    pub fn new(
        id: u64,
        world: WorldKey,
        quadrant: Quadrant,
        geometry: BoundaryGeometry,
        coordinate_scale: f64,
        axis_buffer_offset: f64,
        settings: BoundarySettings,
    ) -> Self {
        Self {
            id,
            world,
            quadrant,
            center_x: geometry.center_x,
            center_z: geometry.center_z,
            size: geometry.size,
            coordinate_scale,
            axis_buffer_offset,
            damage_per_hit: settings.damage_per_hit,
            damage_buffer: settings.damage_buffer,
            warning_distance: settings.warning_distance,
            warning_time_secs: settings.warning_time_secs,
        }
    }

    /// Location to feed into [`contains`](Self::contains) for a raw position
    pub fn test_location(&self, raw: &Location) -> Location {
        shifted_test_location(
            raw,
            (self.center_x, self.center_z),
            self.size,
            self.axis_buffer_offset,
            self.coordinate_scale,
            self.quadrant,
        )
    }

    /// The host's inside test: a square of edge `size` around the center
    pub fn contains(&self, test: &Location) -> bool {
        let half = self.size / 2.0;
        (test.x - self.center_x).abs() <= half && (test.z - self.center_z).abs() <= half
    }

    /// Euclidean distance from a test location to the nearest edge
    pub fn distance_outside(&self, test: &Location) -> f64 {
        let half = self.size / 2.0;
        let dx = ((test.x - self.center_x).abs() - half).max(0.0);
        let dz = ((test.z - self.center_z).abs() - half).max(0.0);
        dx.hypot(dz)
    }

    /// Penalty for one tick at this test location
    pub fn penalty_at(&self, test: &Location) -> f64 {
        penalty_damage(self.damage_per_hit, self.distance_outside(test), self.damage_buffer)
    }
}
