//! In-memory host used by the binary's bridge and by tests
//!
//! Keeps every entity and world in plain maps. Every call the core makes
//! into the host is published as a [`HostEffect`] for whoever subscribed.
//! A recording host (the test double) also keeps damage, announcements,
//! sounds and progress bars in logs that tests can inspect.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::game::boundary::VirtualBoundary;
use crate::game::quadrant::Quadrant;

use super::{
    Announcer, Cue, Dimension, EntityId, EntityService, GameMode, GlobalBorder, HostEffect,
    Location, ProgressBar, TeamService, WorldKey, WorldService,
};

pub const OVERWORLD: &str = "minecraft:overworld";
pub const NETHER: &str = "minecraft:the_nether";
pub const THE_END: &str = "minecraft:the_end";

const MAX_HEALTH: f64 = 20.0;
const EFFECT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct EntityState {
    location: Location,
    online: bool,
    alive: bool,
    health: f64,
    game_mode: GameMode,
    game_master: bool,
    team: Option<Quadrant>,
    boundary: Option<VirtualBoundary>,
}

#[derive(Debug, Clone)]
struct WorldState {
    dimension: Dimension,
    coordinate_scale: f64,
    loaded: bool,
    pvp: bool,
    hardcore: bool,
    border: GlobalBorder,
    last_border_transition: Option<Duration>,
}

impl WorldState {
    fn new(dimension: Dimension, coordinate_scale: f64) -> Self {
        Self {
            dimension,
            coordinate_scale,
            loaded: true,
            pvp: false,
            hardcore: false,
            border: GlobalBorder::default(),
            last_border_transition: None,
        }
    }
}

/// Host double backed by in-process maps
pub struct MemoryHost {
    entities: RwLock<HashMap<EntityId, EntityState>>,
    worlds: RwLock<BTreeMap<WorldKey, WorldState>>,
    effects_tx: broadcast::Sender<HostEffect>,
    recording: bool,
    damage_log: Mutex<Vec<(EntityId, f64)>>,
    announcements: Mutex<Vec<String>>,
    cues: Mutex<Vec<Cue>>,
    music_stops: Mutex<usize>,
    progress: Mutex<Option<ProgressBar>>,
    progress_history: Mutex<Vec<ProgressBar>>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Recording host with the three vanilla worlds loaded
    pub fn new() -> Self {
        Self::with_vanilla_worlds(true)
    }

    /// Recording host with no worlds at all
    pub fn empty() -> Self {
        Self::build(true)
    }

    /// Vanilla worlds, effects only. Nothing is logged, so a long-running
    /// process does not grow.
    pub fn live() -> Self {
        Self::with_vanilla_worlds(false)
    }

    fn with_vanilla_worlds(recording: bool) -> Self {
        let host = Self::build(recording);
        host.add_world(WorldKey::new(OVERWORLD), Dimension::Overworld, 1.0);
        host.add_world(WorldKey::new(NETHER), Dimension::Nether, 8.0);
        host.add_world(WorldKey::new(THE_END), Dimension::End, 1.0);
        host
    }

    fn build(recording: bool) -> Self {
        let (effects_tx, _) = broadcast::channel(EFFECT_CAPACITY);
        Self {
            entities: RwLock::new(HashMap::new()),
            worlds: RwLock::new(BTreeMap::new()),
            effects_tx,
            recording,
            damage_log: Mutex::new(Vec::new()),
            announcements: Mutex::new(Vec::new()),
            cues: Mutex::new(Vec::new()),
            music_stops: Mutex::new(0),
            progress: Mutex::new(None),
            progress_history: Mutex::new(Vec::new()),
        }
    }

    /// Every effect from now on
    pub fn effects(&self) -> broadcast::Receiver<HostEffect> {
        self.effects_tx.subscribe()
    }

    fn publish(&self, effect: HostEffect) {
        // No subscribers is fine
        let _ = self.effects_tx.send(effect);
    }

    pub fn add_world(&self, key: WorldKey, dimension: Dimension, coordinate_scale: f64) {
        self.worlds
            .write()
            .insert(key, WorldState::new(dimension, coordinate_scale));
    }

    pub fn unload_world(&self, key: &WorldKey) {
        if let Some(world) = self.worlds.write().get_mut(key) {
            world.loaded = false;
        }
    }

    /// Bring an entity online at `location`, creating it if unknown
    pub fn join(&self, entity: EntityId, location: Location) {
        let mut entities = self.entities.write();
        entities
            .entry(entity)
            .and_modify(|state| {
                state.online = true;
                state.location = location.clone();
            })
            .or_insert_with(|| EntityState {
                location,
                online: true,
                alive: true,
                health: MAX_HEALTH,
                game_mode: GameMode::Survival,
                game_master: false,
                team: None,
                boundary: None,
            });
    }

    /// Create an online entity on a team and return its id
    pub fn spawn_entity(&self, team: Option<Quadrant>, location: Location) -> EntityId {
        let id = Uuid::new_v4();
        self.join(id, location);
        self.set_team(id, team);
        id
    }

    pub fn set_team(&self, entity: EntityId, team: Option<Quadrant>) {
        self.update(entity, |state| state.team = team);
    }

    pub fn set_game_master(&self, entity: EntityId, game_master: bool) {
        self.update(entity, |state| state.game_master = game_master);
    }

    pub fn move_to(&self, entity: EntityId, location: Location) {
        self.update(entity, |state| state.location = location);
    }

    pub fn disconnect(&self, entity: EntityId) {
        self.update(entity, |state| state.online = false);
    }

    pub fn mark_dead(&self, entity: EntityId) {
        self.update(entity, |state| {
            state.alive = false;
            state.health = 0.0;
        });
    }

    pub fn respawn(&self, entity: EntityId, location: Location) {
        self.update(entity, |state| {
            state.alive = true;
            state.health = MAX_HEALTH;
            state.location = location;
        });
    }

    pub fn health(&self, entity: EntityId) -> Option<f64> {
        self.entities.read().get(&entity).map(|s| s.health)
    }

    /// Total damage dealt to an entity
    pub fn damage_taken(&self, entity: EntityId) -> f64 {
        self.damage_events(entity).iter().sum()
    }

    /// Individual damage amounts, in order
    pub fn damage_events(&self, entity: EntityId) -> Vec<f64> {
        self.damage_log
            .lock()
            .iter()
            .filter(|(id, _)| *id == entity)
            .map(|(_, amount)| *amount)
            .collect()
    }

    pub fn boundary_of(&self, entity: EntityId) -> Option<VirtualBoundary> {
        self.entities
            .read()
            .get(&entity)
            .and_then(|s| s.boundary.clone())
    }

    pub fn announcements(&self) -> Vec<String> {
        self.announcements.lock().clone()
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().clone()
    }

    pub fn music_stops(&self) -> usize {
        *self.music_stops.lock()
    }

    /// Currently visible progress bar
    pub fn progress(&self) -> Option<ProgressBar> {
        self.progress.lock().clone()
    }

    pub fn progress_history(&self) -> Vec<ProgressBar> {
        self.progress_history.lock().clone()
    }

    /// `(pvp, hardcore)` for a world
    pub fn world_rules(&self, world: &WorldKey) -> Option<(bool, bool)> {
        self.worlds.read().get(world).map(|w| (w.pvp, w.hardcore))
    }

    pub fn last_border_transition(&self, world: &WorldKey) -> Option<Duration> {
        self.worlds
            .read()
            .get(world)
            .and_then(|w| w.last_border_transition)
    }

    fn update(&self, entity: EntityId, f: impl FnOnce(&mut EntityState)) {
        if let Some(state) = self.entities.write().get_mut(&entity) {
            f(state);
        }
    }
}

impl WorldService for MemoryHost {
    fn worlds(&self) -> Vec<WorldKey> {
        self.worlds.read().keys().cloned().collect()
    }

    fn is_loaded(&self, world: &WorldKey) -> bool {
        self.worlds.read().get(world).is_some_and(|w| w.loaded)
    }

    fn dimension_of(&self, world: &WorldKey) -> Option<Dimension> {
        self.worlds.read().get(world).map(|w| w.dimension)
    }

    fn coordinate_scale_of(&self, world: &WorldKey) -> Option<f64> {
        self.worlds
            .read()
            .get(world)
            .filter(|w| w.loaded)
            .map(|w| w.coordinate_scale)
    }

    fn set_world_rules(&self, world: &WorldKey, pvp: bool, hardcore: bool) {
        if let Some(state) = self.worlds.write().get_mut(world) {
            state.pvp = pvp;
            state.hardcore = hardcore;
        }
        self.publish(HostEffect::WorldRules {
            world: world.clone(),
            pvp,
            hardcore,
        });
    }

    fn global_border(&self, world: &WorldKey) -> Option<GlobalBorder> {
        self.worlds.read().get(world).map(|w| w.border.clone())
    }

    fn set_global_border(
        &self,
        world: &WorldKey,
        border: GlobalBorder,
        transition: Option<Duration>,
    ) {
        if let Some(state) = self.worlds.write().get_mut(world) {
            state.border = border.clone();
            state.last_border_transition = transition;
        }
        self.publish(HostEffect::Border {
            world: world.clone(),
            border,
            transition_secs: transition.map(|t| t.as_secs()),
        });
    }
}

impl EntityService for MemoryHost {
    fn online_entities(&self) -> Vec<EntityId> {
        self.entities
            .read()
            .iter()
            .filter(|(_, s)| s.online)
            .map(|(id, _)| *id)
            .collect()
    }

    fn is_online(&self, entity: EntityId) -> bool {
        self.entities.read().get(&entity).is_some_and(|s| s.online)
    }

    fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.read().get(&entity).is_some_and(|s| s.alive)
    }

    fn location_of(&self, entity: EntityId) -> Option<Location> {
        self.entities.read().get(&entity).map(|s| s.location.clone())
    }

    fn game_mode_of(&self, entity: EntityId) -> Option<GameMode> {
        self.entities.read().get(&entity).map(|s| s.game_mode)
    }

    fn set_game_mode(&self, entity: EntityId, mode: GameMode) {
        self.update(entity, |state| state.game_mode = mode);
        self.publish(HostEffect::GameMode { entity, mode });
    }

    fn is_game_master(&self, entity: EntityId) -> bool {
        self.entities
            .read()
            .get(&entity)
            .is_some_and(|s| s.game_master)
    }

    fn set_virtual_boundary(&self, entity: EntityId, boundary: Option<&VirtualBoundary>) {
        let boundary = boundary.cloned();
        self.update(entity, |state| state.boundary = boundary.clone());
        self.publish(HostEffect::Boundary { entity, boundary });
    }

    fn damage(&self, entity: EntityId, amount: f64) {
        if self.recording {
            self.damage_log.lock().push((entity, amount));
        }
        self.update(entity, |state| {
            state.health = (state.health - amount).max(0.0);
        });
        self.publish(HostEffect::Damage { entity, amount });
    }

    fn kill(&self, entity: EntityId) {
        self.mark_dead(entity);
        self.publish(HostEffect::Kill { entity });
    }
}

impl TeamService for MemoryHost {
    fn team_of(&self, entity: EntityId) -> Option<Quadrant> {
        self.entities.read().get(&entity).and_then(|s| s.team)
    }
}

impl Announcer for MemoryHost {
    fn broadcast(&self, message: &str) {
        if self.recording {
            self.announcements.lock().push(message.to_string());
        }
        self.publish(HostEffect::Broadcast {
            message: message.to_string(),
        });
    }

    fn play_cue(&self, cue: Cue) {
        if self.recording {
            self.cues.lock().push(cue);
        }
        self.publish(HostEffect::Cue { cue });
    }

    fn stop_music(&self) {
        *self.music_stops.lock() += 1;
        self.publish(HostEffect::StopMusic);
    }

    fn show_progress(&self, bar: &ProgressBar) {
        *self.progress.lock() = Some(bar.clone());
        if self.recording {
            self.progress_history.lock().push(bar.clone());
        }
        self.publish(HostEffect::ShowProgress { bar: bar.clone() });
    }

    fn hide_progress(&self) {
        *self.progress.lock() = None;
        self.publish(HostEffect::HideProgress);
    }
}
