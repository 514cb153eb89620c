//! Prep-phase guards for things that could cross a quadrant line without
//! an entity walking over it

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BoundaryConfig;
use crate::host::{Dimension, EntityId, Host, Location, WorldKey};

use super::boundary::{compute_boundary, VirtualBoundary};
use super::phase::{MatchPhase, PhaseMachine};
use super::quadrant::{quadrant_of, Quadrant};

/// Whether the host should let a cancellable event through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventVerdict {
    Allow,
    Cancel,
}

impl EventVerdict {
    pub fn cancel_if(condition: bool) -> Self {
        if condition {
            EventVerdict::Cancel
        } else {
            EventVerdict::Allow
        }
    }
}

pub struct PrepGuards {
    host: Host,
    phase: Arc<PhaseMachine>,
    boundary: BoundaryConfig,
    ignored_worlds: HashSet<WorldKey>,
    allow_end_during_prep: bool,
}

impl PrepGuards {
    pub fn new(
        host: Host,
        phase: Arc<PhaseMachine>,
        boundary: BoundaryConfig,
        ignored_worlds: impl IntoIterator<Item = WorldKey>,
        allow_end_during_prep: bool,
    ) -> Self {
        Self {
            host,
            phase,
            boundary,
            ignored_worlds: ignored_worlds.into_iter().collect(),
            allow_end_during_prep,
        }
    }

    fn in_prep(&self) -> bool {
        self.phase.current_phase() == MatchPhase::Prep
    }

    /// Portal use; only End-bound portals are ever refused
    pub fn portal(&self, entity: EntityId, destination: &WorldKey) -> EventVerdict {
        let into_end = self.host.worlds.dimension_of(destination) == Some(Dimension::End);
        let verdict =
            EventVerdict::cancel_if(self.in_prep() && into_end && !self.allow_end_during_prep);
        if verdict == EventVerdict::Cancel {
            debug!(
                entity_id = %entity,
                destination = %destination,
                "End portal blocked during prep"
            );
        }
        verdict
    }

    /// Projectile impact or explosion at `current` for something launched
    /// from `origin`
    pub fn crossing(&self, origin: Option<&Location>, current: &Location) -> EventVerdict {
        let Some(origin) = origin else {
            return EventVerdict::Allow;
        };
        EventVerdict::cancel_if(self.in_prep() && quadrant_of(origin) != quadrant_of(current))
    }

    /// Piston movement; refused when the piston sits in no team's quadrant.
    ///
    /// Each quadrant is tested the way a player standing on the piston
    /// would be, scale shift included.
    pub fn piston(&self, piston: &Location) -> EventVerdict {
        if !self.in_prep() || self.ignored_worlds.contains(&piston.world) {
            return EventVerdict::Allow;
        }
        let Some(scale) = self.host.worlds.coordinate_scale_of(&piston.world) else {
            return EventVerdict::Allow;
        };
        let inside_any = Quadrant::ALL.into_iter().any(|quadrant| {
            let boundary = VirtualBoundary::new(
                0,
                piston.world.clone(),
                quadrant,
                compute_boundary(
                    quadrant,
                    self.boundary.size,
                    self.boundary.axis_buffer_offset,
                    scale,
                ),
                scale,
                self.boundary.axis_buffer_offset,
                self.boundary.settings(),
            );
            boundary.contains(&boundary.test_location(piston))
        });
        EventVerdict::cancel_if(!inside_any)
    }
}
