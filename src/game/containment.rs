//! Prep-phase containment
//!
//! During prep every teamed entity carries a [`VirtualBoundary`] around its
//! team's quadrant. Stepping outside starts a penalty task that damages the
//! entity once per tick until it returns, leaves, or the boundary goes away.
//!
//! Boundaries and tasks live in two concurrent maps keyed by entity. A task
//! is only ever created through a vacant map entry, so an entity never has
//! more than one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::BoundaryConfig;
use crate::host::{Dimension, EntityId, Host, Location, WorldKey};
use crate::util::time::TICK_DURATION;

use super::boundary::{compute_boundary, VirtualBoundary};
use super::phase::{MatchPhase, PhaseChange, PhaseMachine, PhaseObserver};

/// Where an entity stands with respect to containment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentState {
    NoBoundary,
    InBounds,
    OutOfBounds,
}

struct PenaltyHandle {
    serial: u64,
    boundary_id: u64,
    handle: JoinHandle<()>,
}

enum Tick {
    Continue,
    Stop,
}

struct Shared {
    host: Host,
    phase: Arc<PhaseMachine>,
    config: BoundaryConfig,
    ignored_worlds: HashSet<WorldKey>,
    boundaries: DashMap<EntityId, VirtualBoundary>,
    tasks: DashMap<EntityId, PenaltyHandle>,
    next_boundary_id: AtomicU64,
    next_serial: AtomicU64,
}

/// Assigns quadrant boundaries and runs penalty tasks
#[derive(Clone)]
pub struct ContainmentEnforcer {
    shared: Arc<Shared>,
}

impl ContainmentEnforcer {
    pub fn new(
        host: Host,
        phase: Arc<PhaseMachine>,
        config: BoundaryConfig,
        ignored_worlds: impl IntoIterator<Item = WorldKey>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                host,
                phase,
                config,
                ignored_worlds: ignored_worlds.into_iter().collect(),
                boundaries: DashMap::new(),
                tasks: DashMap::new(),
                next_boundary_id: AtomicU64::new(1),
                next_serial: AtomicU64::new(1),
            }),
        }
    }

    /// Bring boundaries in line with the current phase (used at startup)
    pub fn resume(&self) {
        if self.shared.phase.current_phase() == MatchPhase::Prep {
            self.assign_all();
        } else {
            self.clear_all();
        }
    }

    pub fn state_of(&self, entity: EntityId) -> ContainmentState {
        if self.shared.tasks.contains_key(&entity) {
            ContainmentState::OutOfBounds
        } else if self.shared.boundaries.contains_key(&entity) {
            ContainmentState::InBounds
        } else {
            ContainmentState::NoBoundary
        }
    }

    pub fn boundary_of(&self, entity: EntityId) -> Option<VirtualBoundary> {
        self.shared.boundaries.get(&entity).map(|b| b.value().clone())
    }

    /// Number of live penalty tasks
    pub fn active_penalties(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Give every online entity the boundary it should have right now
    pub fn assign_all(&self) {
        let entities = self.shared.host.entities.online_entities();
        info!(count = entities.len(), "Assigning quadrant boundaries");
        for entity in entities {
            self.refresh(entity);
        }
    }

    /// Drop every boundary and stop every penalty task
    pub fn clear_all(&self) {
        let entities: Vec<EntityId> = self
            .shared
            .boundaries
            .iter()
            .map(|e| *e.key())
            .chain(self.shared.tasks.iter().map(|e| *e.key()))
            .collect();
        for entity in entities {
            self.clear(entity);
        }
    }

    /// Recompute one entity's boundary (join, respawn, world change)
    pub fn refresh(&self, entity: EntityId) {
        if self.shared.phase.current_phase() != MatchPhase::Prep {
            self.clear(entity);
            return;
        }
        match self.shared.boundary_for(entity) {
            Some(boundary) => self.assign(entity, boundary),
            None => self.clear(entity),
        }
    }

    /// Entity moved; start a penalty task if it left its boundary
    pub fn on_move(&self, entity: EntityId, location: &Location) {
        if self.shared.phase.current_phase() != MatchPhase::Prep {
            return;
        }
        let Some(boundary) = self.boundary_of(entity) else {
            return;
        };
        if boundary.world != location.world {
            return;
        }
        if !boundary.contains(&boundary.test_location(location)) {
            self.shared.start_penalty(entity, boundary.id);
        }
    }

    /// Entity left the server
    pub fn on_quit(&self, entity: EntityId) {
        self.cancel(entity);
        self.shared.boundaries.remove(&entity);
    }

    /// A world went away; everyone bounded in it loses their boundary
    pub fn on_world_unloaded(&self, world: &WorldKey) {
        let affected: Vec<EntityId> = self
            .shared
            .boundaries
            .iter()
            .filter(|e| &e.value().world == world)
            .map(|e| *e.key())
            .collect();
        for entity in affected {
            self.clear(entity);
        }
    }

    /// Stop an entity's penalty task. Safe to call repeatedly.
    pub fn cancel(&self, entity: EntityId) {
        self.shared.cancel(entity);
    }

    fn assign(&self, entity: EntityId, boundary: VirtualBoundary) {
        self.cancel(entity);
        debug!(
            entity_id = %entity,
            quadrant = %boundary.quadrant,
            world = %boundary.world,
            "Boundary assigned"
        );
        self.shared
            .host
            .entities
            .set_virtual_boundary(entity, Some(&boundary));
        self.shared.boundaries.insert(entity, boundary);

        if let Some(location) = self.shared.host.entities.location_of(entity) {
            self.on_move(entity, &location);
        }
    }

    fn clear(&self, entity: EntityId) {
        self.cancel(entity);
        if self.shared.boundaries.remove(&entity).is_some() {
            self.shared.host.entities.set_virtual_boundary(entity, None);
        }
    }
}

impl Shared {
    fn boundary_for(&self, entity: EntityId) -> Option<VirtualBoundary> {
        let location = self.host.entities.location_of(entity)?;
        let quadrant = self.host.teams.team_of(entity)?;
        let world = location.world;

        if self.ignored_worlds.contains(&world) {
            return None;
        }
        match self.host.worlds.dimension_of(&world) {
            Some(Dimension::End) => return None,
            Some(_) => {}
            None => {
                warn!(entity_id = %entity, world = %world, "Unknown world, boundary skipped");
                return None;
            }
        }
        let scale = match self.host.worlds.coordinate_scale_of(&world) {
            Some(scale) if self.host.worlds.is_loaded(&world) => scale,
            _ => {
                warn!(entity_id = %entity, world = %world, "World not loaded, boundary skipped");
                return None;
            }
        };

        let geometry = compute_boundary(
            quadrant,
            self.config.size,
            self.config.axis_buffer_offset,
            scale,
        );
        Some(VirtualBoundary::new(
            self.next_boundary_id.fetch_add(1, Ordering::Relaxed),
            world,
            quadrant,
            geometry,
            scale,
            self.config.axis_buffer_offset,
            self.config.settings(),
        ))
    }

    fn start_penalty(self: &Arc<Self>, entity: EntityId, boundary_id: u64) {
        match self.tasks.entry(entity) {
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
                let shared = Arc::clone(self);
                let handle = tokio::spawn(shared.run_penalty(entity, boundary_id, serial));
                debug!(entity_id = %entity, "Out of bounds, penalty started");
                slot.insert(PenaltyHandle {
                    serial,
                    boundary_id,
                    handle,
                });
            }
        }
    }

    async fn run_penalty(self: Arc<Self>, entity: EntityId, boundary_id: u64, serial: u64) {
        let mut ticker = interval_at(Instant::now() + TICK_DURATION, TICK_DURATION);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Tick::Stop = self.penalty_tick(entity, boundary_id) {
                break;
            }
        }

        self.tasks.remove_if(&entity, |_, task| task.serial == serial);
    }

    fn penalty_tick(&self, entity: EntityId, boundary_id: u64) -> Tick {
        if self.phase.current_phase() != MatchPhase::Prep {
            return Tick::Stop;
        }
        if !self.host.entities.is_online(entity) {
            return Tick::Stop;
        }
        let Some(boundary) = self.boundaries.get(&entity).map(|b| b.value().clone()) else {
            return Tick::Stop;
        };
        if boundary.id != boundary_id {
            return Tick::Stop;
        }
        if !self.host.worlds.is_loaded(&boundary.world) {
            if self
                .boundaries
                .remove_if(&entity, |_, b| b.id == boundary_id)
                .is_some()
            {
                self.host.entities.set_virtual_boundary(entity, None);
                warn!(
                    entity_id = %entity,
                    world = %boundary.world,
                    "World unloaded, boundary dropped"
                );
            }
            return Tick::Stop;
        }
        let Some(location) = self.host.entities.location_of(entity) else {
            return Tick::Stop;
        };
        if location.world != boundary.world {
            return Tick::Stop;
        }

        let test = boundary.test_location(&location);
        if boundary.contains(&test) {
            debug!(entity_id = %entity, "Back inside boundary");
            return Tick::Stop;
        }

        let damage = boundary.penalty_at(&test);
        if damage > 0.0 {
            debug!(entity_id = %entity, damage, "Boundary penalty");
            self.host.entities.damage(entity, damage);
        }
        Tick::Continue
    }

    fn cancel(&self, entity: EntityId) {
        if let Some((_, task)) = self.tasks.remove(&entity) {
            task.handle.abort();
            debug!(entity_id = %entity, boundary_id = task.boundary_id, "Penalty cancelled");
        }
    }
}

impl PhaseObserver for ContainmentEnforcer {
    fn on_phase_changed(&self, change: &PhaseChange) {
        if change.to == MatchPhase::Prep {
            self.assign_all();
        } else {
            self.clear_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::phase::TransitionCause;
    use crate::game::quadrant::Quadrant;
    use crate::host::memory::{MemoryHost, NETHER, OVERWORLD, THE_END};
    use crate::host::EntityService;
    use crate::store::MemoryPhaseStore;
    use std::time::Duration;

    struct Fixture {
        host: Arc<MemoryHost>,
        machine: Arc<PhaseMachine>,
        enforcer: Arc<ContainmentEnforcer>,
    }

    impl Fixture {
        fn new(phase: MatchPhase, config: BoundaryConfig) -> Self {
            let host = Arc::new(MemoryHost::new());
            let machine = Arc::new(PhaseMachine::load(
                Arc::new(MemoryPhaseStore::with_phase(phase)),
                true,
            ));
            let enforcer = Arc::new(ContainmentEnforcer::new(
                Host::from_shared(host.clone()),
                machine.clone(),
                config,
                [WorldKey::new("quadwars:lobby")],
            ));
            let observer: Arc<dyn PhaseObserver> = enforcer.clone();
            machine.subscribe(&observer);
            Self {
                host,
                machine,
                enforcer,
            }
        }

        fn small() -> Self {
            Self::new(
                MatchPhase::Prep,
                BoundaryConfig {
                    size: 1000.0,
                    axis_buffer_offset: 128.0,
                    damage_per_hit: 0.5,
                    damage_buffer: 4.0,
                    ..BoundaryConfig::default()
                },
            )
        }

        fn join(&self, team: Option<Quadrant>, location: Location) -> EntityId {
            let id = self.host.spawn_entity(team, location);
            self.enforcer.refresh(id);
            id
        }

        fn walk(&self, entity: EntityId, location: Location) {
            self.host.move_to(entity, location.clone());
            self.enforcer.on_move(entity, &location);
        }
    }

    fn overworld(x: f64, z: f64) -> Location {
        Location::new(WorldKey::new(OVERWORLD), x, 64.0, z)
    }

    async fn ticks(n: u32) {
        // Land between firings
        tokio::time::sleep(crate::util::time::ticks(n) + Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn entering_prep_assigns_every_team_its_quadrant() {
        let fx = Fixture::new(MatchPhase::Pregame, BoundaryConfig::default());
        let ids: Vec<(Quadrant, EntityId)> = Quadrant::ALL
            .into_iter()
            .map(|q| {
                let spot = overworld(q.x_sign() * 300.0, q.z_sign() * 300.0);
                (q, fx.host.spawn_entity(Some(q), spot))
            })
            .collect();

        fx.machine.advance(TransitionCause::Command).unwrap();

        for (quadrant, id) in ids {
            let boundary = fx.host.boundary_of(id).unwrap();
            assert_eq!(boundary.quadrant, quadrant);
            assert_eq!(boundary.center_x, 5128.0 * quadrant.x_sign());
            assert_eq!(boundary.center_z, 5128.0 * quadrant.z_sign());
            assert_eq!(boundary.size, 10_000.0);
            assert_eq!(fx.enforcer.state_of(id), ContainmentState::InBounds);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fifty_out_costs_six_on_first_tick() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::NE), overworld(700.0, 700.0));
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::InBounds);

        fx.walk(id, overworld(1178.0, 628.0));
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::OutOfBounds);
        assert!(fx.host.damage_events(id).is_empty());

        ticks(1).await;
        assert_eq!(fx.host.damage_events(id), vec![6.0]);

        ticks(2).await;
        assert_eq!(fx.host.damage_events(id), vec![6.0, 6.0, 6.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn quitting_mid_penalty_stops_damage() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::NE), overworld(700.0, 700.0));
        fx.walk(id, overworld(1178.0, 628.0));
        ticks(1).await;
        assert_eq!(fx.host.damage_events(id).len(), 1);

        fx.host.disconnect(id);
        fx.enforcer.on_quit(id);
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::NoBoundary);
        assert_eq!(fx.enforcer.active_penalties(), 0);

        ticks(40).await;
        assert_eq!(fx.host.damage_events(id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_inside_ends_the_penalty() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::NE), overworld(700.0, 700.0));
        fx.walk(id, overworld(1178.0, 628.0));
        ticks(1).await;

        fx.host.move_to(id, overworld(700.0, 700.0));
        ticks(1).await;
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::InBounds);
        assert_eq!(fx.enforcer.active_penalties(), 0);

        ticks(10).await;
        assert_eq!(fx.host.damage_events(id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn just_outside_costs_nothing_but_keeps_watching() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::NE), overworld(700.0, 700.0));
        fx.walk(id, overworld(1130.0, 700.0));
        ticks(3).await;
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::OutOfBounds);
        assert!(fx.host.damage_events(id).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_moves_start_one_task() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::NE), overworld(700.0, 700.0));
        fx.host.move_to(id, overworld(1500.0, 700.0));

        let moves: Vec<_> = (0..16)
            .map(|i| {
                let enforcer = fx.enforcer.clone();
                tokio::spawn(async move {
                    enforcer.on_move(id, &overworld(1500.0 + f64::from(i), 700.0));
                })
            })
            .collect();
        for m in moves {
            m.await.unwrap();
        }

        assert_eq!(fx.enforcer.active_penalties(), 1);

        fx.enforcer.cancel(id);
        fx.enforcer.cancel(id);
        assert_eq!(fx.enforcer.active_penalties(), 0);
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::InBounds);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_prep_clears_everything() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::NE), overworld(700.0, 700.0));
        fx.walk(id, overworld(1178.0, 628.0));

        fx.machine.advance(TransitionCause::Command).unwrap();

        assert_eq!(fx.enforcer.state_of(id), ContainmentState::NoBoundary);
        assert!(fx.host.boundary_of(id).is_none());
        ticks(20).await;
        assert!(fx.host.damage_events(id).is_empty());

        // Moves outside prep are ignored
        fx.walk(id, overworld(5000.0, 5000.0));
        assert_eq!(fx.enforcer.active_penalties(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unloaded_world_drops_the_boundary() {
        let fx = Fixture::small();
        let nether = WorldKey::new(NETHER);
        let id = fx.join(Some(Quadrant::NE), Location::new(nether.clone(), 100.0, 64.0, 100.0));
        assert_eq!(fx.host.boundary_of(id).unwrap().size, 125.0);

        fx.walk(id, Location::new(nether.clone(), 900.0, 64.0, 100.0));
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::OutOfBounds);

        fx.host.unload_world(&nether);
        ticks(1).await;
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::NoBoundary);
        assert!(fx.host.boundary_of(id).is_none());
        assert!(fx.host.damage_events(id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn world_change_replaces_boundary_and_task() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::NE), overworld(700.0, 700.0));
        fx.walk(id, overworld(1178.0, 628.0));
        let first = fx.enforcer.boundary_of(id).unwrap().id;

        fx.host
            .move_to(id, Location::new(WorldKey::new(NETHER), 50.0, 64.0, 50.0));
        fx.enforcer.refresh(id);

        let second = fx.enforcer.boundary_of(id).unwrap();
        assert_ne!(second.id, first);
        assert_eq!(second.coordinate_scale, 8.0);
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::InBounds);
        ticks(5).await;
        assert!(fx.host.damage_events(id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn teamless_end_and_ignored_entities_are_unbounded() {
        let fx = Fixture::small();
        let loner = fx.join(None, overworld(10.0, 10.0));
        let ender = fx.join(
            Some(Quadrant::SW),
            Location::new(WorldKey::new(THE_END), 0.0, 64.0, 0.0),
        );
        fx.host
            .add_world(WorldKey::new("quadwars:lobby"), Dimension::Overworld, 1.0);
        let lobby = fx.join(
            Some(Quadrant::SE),
            Location::new(WorldKey::new("quadwars:lobby"), 0.0, 64.0, 0.0),
        );
        let lost = fx.join(
            Some(Quadrant::NW),
            Location::new(WorldKey::new("custom:missing"), 0.0, 64.0, 0.0),
        );

        for id in [loner, ender, lobby, lost] {
            assert_eq!(fx.enforcer.state_of(id), ContainmentState::NoBoundary);
            assert!(fx.host.boundary_of(id).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn joining_outside_starts_penalty_immediately() {
        let fx = Fixture::small();
        let id = fx.join(Some(Quadrant::SW), overworld(100.0, 100.0));
        assert_eq!(fx.enforcer.state_of(id), ContainmentState::OutOfBounds);
        ticks(1).await;
        assert!(fx.host.damage_taken(id) > 0.0);
        assert!(fx.host.health(id).unwrap() < 20.0);
        assert!(fx.host.is_online(id));
    }
}
