//! Host contracts - the services the match core calls into
//!
//! The core never talks to a concrete game server. World queries, entity
//! control, team membership and audience feedback all go through the traits
//! below; the server adapter (or [`memory::MemoryHost`]) implements them.

pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::boundary::VirtualBoundary;
use crate::game::quadrant::Quadrant;

/// Identifier of a player or other entity in the host
pub type EntityId = Uuid;

/// Namespaced world key, e.g. `minecraft:overworld`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldKey(pub String);

impl WorldKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for WorldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A position inside a world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: WorldKey,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: WorldKey, x: f64, y: f64, z: f64) -> Self {
        Self { world, x, y, z }
    }

    /// Same location with the horizontal axes replaced
    pub fn with_horizontal(&self, x: f64, z: f64) -> Self {
        Self {
            world: self.world.clone(),
            x,
            y: self.y,
            z,
        }
    }
}

/// World environment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Overworld,
    Nether,
    /// High-altitude dimension; boundaries there are never enforced
    End,
}

/// Entity game mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Survival,
    Adventure,
    Creative,
    Spectator,
}

/// World-wide hard border managed by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalBorder {
    pub center_x: f64,
    pub center_z: f64,
    pub size: f64,
    pub damage_amount: f64,
    pub damage_buffer: f64,
    pub warning_time_secs: u32,
    pub warning_distance: u32,
}

impl Default for GlobalBorder {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_z: 0.0,
            size: 59_999_968.0,
            damage_amount: 0.2,
            damage_buffer: 5.0,
            warning_time_secs: 15,
            warning_distance: 5,
        }
    }
}

/// Sounds the core asks the host to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// Battle phase begins
    RaidHorn,
    /// Post-game music
    Credits,
    /// A team has won
    TeamWon,
    /// A team has been knocked out
    TeamEliminated,
}

/// Progress bar shown to everyone during a scheduled transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressBar {
    pub title: String,
    pub progress: f32,
}

/// Something the core asked the host to do, as reported to an outside
/// adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEffect {
    Damage {
        entity: EntityId,
        amount: f64,
    },
    Kill {
        entity: EntityId,
    },
    GameMode {
        entity: EntityId,
        mode: GameMode,
    },
    /// Personal border shown, replaced or (with `None`) removed
    Boundary {
        entity: EntityId,
        boundary: Option<VirtualBoundary>,
    },
    Broadcast {
        message: String,
    },
    Cue {
        cue: Cue,
    },
    StopMusic,
    ShowProgress {
        bar: ProgressBar,
    },
    HideProgress,
    WorldRules {
        world: WorldKey,
        pvp: bool,
        hardcore: bool,
    },
    Border {
        world: WorldKey,
        border: GlobalBorder,
        #[serde(default)]
        transition_secs: Option<u64>,
    },
}

/// World-level queries and controls
pub trait WorldService: Send + Sync {
    fn worlds(&self) -> Vec<WorldKey>;
    fn is_loaded(&self, world: &WorldKey) -> bool;
    fn dimension_of(&self, world: &WorldKey) -> Option<Dimension>;
    /// Distance multiplier the host applies in this world (8.0 in the nether)
    fn coordinate_scale_of(&self, world: &WorldKey) -> Option<f64>;
    fn set_world_rules(&self, world: &WorldKey, pvp: bool, hardcore: bool);
    fn global_border(&self, world: &WorldKey) -> Option<GlobalBorder>;
    /// Replace a world's border, optionally resizing over `transition`
    fn set_global_border(
        &self,
        world: &WorldKey,
        border: GlobalBorder,
        transition: Option<Duration>,
    );
}

/// Per-entity queries and controls
pub trait EntityService: Send + Sync {
    fn online_entities(&self) -> Vec<EntityId>;
    fn is_online(&self, entity: EntityId) -> bool;
    fn is_alive(&self, entity: EntityId) -> bool;
    fn location_of(&self, entity: EntityId) -> Option<Location>;
    fn game_mode_of(&self, entity: EntityId) -> Option<GameMode>;
    fn set_game_mode(&self, entity: EntityId, mode: GameMode);
    fn is_game_master(&self, entity: EntityId) -> bool;
    /// Show (or remove, with `None`) the entity's personal border
    fn set_virtual_boundary(&self, entity: EntityId, boundary: Option<&VirtualBoundary>);
    fn damage(&self, entity: EntityId, amount: f64);
    fn kill(&self, entity: EntityId);
}

/// Team membership, owned by the host's scoreboard
pub trait TeamService: Send + Sync {
    fn team_of(&self, entity: EntityId) -> Option<Quadrant>;

    fn display_name(&self, quadrant: Quadrant) -> String {
        quadrant.to_string()
    }
}

/// Audience feedback
pub trait Announcer: Send + Sync {
    fn broadcast(&self, message: &str);
    fn play_cue(&self, cue: Cue);
    fn stop_music(&self);
    fn show_progress(&self, bar: &ProgressBar);
    fn hide_progress(&self);
}

/// Bundle of host services handed to every component
#[derive(Clone)]
pub struct Host {
    pub worlds: Arc<dyn WorldService>,
    pub entities: Arc<dyn EntityService>,
    pub teams: Arc<dyn TeamService>,
    pub announcer: Arc<dyn Announcer>,
}

impl Host {
    /// Build the bundle from one object implementing every contract
    pub fn from_shared<H>(host: Arc<H>) -> Self
    where
        H: WorldService + EntityService + TeamService + Announcer + 'static,
    {
        Self {
            worlds: host.clone(),
            entities: host.clone(),
            teams: host.clone(),
            announcer: host,
        }
    }
}
