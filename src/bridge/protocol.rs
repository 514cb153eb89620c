//! Bridge protocol message definitions
//! One JSON object per line in each direction

use serde::{Deserialize, Serialize};

use crate::game::guards::EventVerdict;
use crate::game::phase::{MatchPhase, PhaseChange, TransitionCause};
use crate::game::quadrant::Quadrant;
use crate::host::{Dimension, EntityId, HostEffect, Location, WorldKey};

/// Messages read from the host side
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMsg {
    /// Register or replace a world
    AddWorld {
        world: WorldKey,
        dimension: Dimension,
        #[serde(default = "default_scale")]
        coordinate_scale: f64,
    },

    /// World was unloaded
    UnloadWorld { world: WorldKey },

    /// Entity came online
    Join {
        entity: EntityId,
        location: Location,
        #[serde(default)]
        team: Option<Quadrant>,
        #[serde(default)]
        game_master: bool,
    },

    /// Entity went offline
    Quit { entity: EntityId },

    /// Team membership changed
    SetTeam {
        entity: EntityId,
        team: Option<Quadrant>,
    },

    Move { entity: EntityId, to: Location },

    Death { entity: EntityId },

    Respawn { entity: EntityId, location: Location },

    /// Entity arrived in another world
    WorldChange { entity: EntityId, location: Location },

    /// Cancellable: entity is about to use a portal
    Portal {
        entity: EntityId,
        destination: WorldKey,
    },

    /// Cancellable: projectile landed
    ProjectileHit {
        #[serde(default)]
        origin: Option<Location>,
        location: Location,
    },

    /// Cancellable: entity exploded
    Explosion {
        #[serde(default)]
        origin: Option<Location>,
        location: Location,
    },

    /// Cancellable: piston is about to move blocks
    Piston { location: Location },

    /// Advance to the next phase, now or after a countdown
    Transition {
        #[serde(default)]
        delay_secs: Option<u64>,
    },

    /// Stop a running countdown
    CancelTransition,

    /// Jump straight to a phase
    SetState { state: MatchPhase },

    GetState,

    /// Global border command, e.g. `["set", "500", "30"]`
    Border { args: Vec<String> },
}

fn default_scale() -> f64 {
    1.0
}

/// Messages written back to the host side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMsg {
    /// Answer to a cancellable event
    Verdict { verdict: EventVerdict },

    /// The match phase changed
    PhaseChanged {
        from: MatchPhase,
        to: MatchPhase,
        cause: TransitionCause,
    },

    /// A countdown started
    TransitionScheduled { from: MatchPhase, delay_secs: u64 },

    /// A countdown was stopped before it ran out
    TransitionCancelled { state: MatchPhase },

    State { state: MatchPhase },

    /// Border command feedback
    Border { lines: Vec<String> },

    /// Something the host should now do
    Effect { effect: HostEffect },

    Error { code: String, message: String },
}

impl OutboundMsg {
    pub fn error(code: &str, message: impl ToString) -> Self {
        OutboundMsg::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<&PhaseChange> for OutboundMsg {
    fn from(change: &PhaseChange) -> Self {
        OutboundMsg::PhaseChanged {
            from: change.from,
            to: change.to,
            cause: change.cause,
        }
    }
}
