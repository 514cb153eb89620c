//! Event coordinator - routes host events through the match components
//!
//! Events are handled one at a time, in arrival order. Within an event the
//! order is fixed: elimination is evaluated before a death turns the player
//! into a spectator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::host::{EntityId, Location, WorldKey};

use super::containment::ContainmentEnforcer;
use super::elimination::EliminationEvaluator;
use super::guards::{EventVerdict, PrepGuards};
use super::rules::PlayerRules;

/// Everything the host reports to the match core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Join { entity: EntityId },
    Quit { entity: EntityId },
    Move { entity: EntityId, to: Location },
    Death { entity: EntityId },
    Respawn { entity: EntityId },
    WorldChange { entity: EntityId },
    TeamChange { entity: EntityId },
    WorldUnload { world: WorldKey },
    PortalAttempt { entity: EntityId, destination: WorldKey },
    ProjectileHit { origin: Option<Location>, location: Location },
    Explosion { origin: Option<Location>, location: Location },
    PistonMove { piston: Location },
}

/// An event waiting in the coordinator queue
#[derive(Debug)]
pub struct QueuedEvent {
    pub event: HostEvent,
    pub reply: Option<oneshot::Sender<EventVerdict>>,
}

pub struct MatchCoordinator {
    containment: Arc<ContainmentEnforcer>,
    players: Arc<PlayerRules>,
    elimination: EliminationEvaluator,
    guards: PrepGuards,
}

impl MatchCoordinator {
    pub fn new(
        containment: Arc<ContainmentEnforcer>,
        players: Arc<PlayerRules>,
        elimination: EliminationEvaluator,
        guards: PrepGuards,
    ) -> Self {
        Self {
            containment,
            players,
            elimination,
            guards,
        }
    }

    /// Handle one event. Non-cancellable events always return `Allow`.
    pub fn handle(&self, event: &HostEvent) -> EventVerdict {
        debug!(event = ?event, "Host event");
        match event {
            HostEvent::Join { entity } => {
                if self.players.kill_if_needed(*entity) {
                    self.died(*entity);
                }
                self.containment.refresh(*entity);
            }
            HostEvent::Quit { entity } => {
                let killed = self.players.kill_if_needed(*entity);
                self.containment.on_quit(*entity);
                self.elimination.on_departure(*entity);
                if killed {
                    self.players.on_death_or_respawn(*entity);
                }
            }
            HostEvent::Move { entity, to } => self.containment.on_move(*entity, to),
            HostEvent::Death { entity } => self.died(*entity),
            HostEvent::Respawn { entity } => {
                self.players.on_death_or_respawn(*entity);
                self.containment.refresh(*entity);
            }
            HostEvent::WorldChange { entity } | HostEvent::TeamChange { entity } => {
                self.containment.refresh(*entity)
            }
            HostEvent::WorldUnload { world } => self.containment.on_world_unloaded(world),
            HostEvent::PortalAttempt {
                entity,
                destination,
            } => return self.guards.portal(*entity, destination),
            HostEvent::ProjectileHit { origin, location }
            | HostEvent::Explosion { origin, location } => {
                return self.guards.crossing(origin.as_ref(), location)
            }
            HostEvent::PistonMove { piston } => return self.guards.piston(piston),
        }
        EventVerdict::Allow
    }

    fn died(&self, entity: EntityId) {
        self.elimination.on_departure(entity);
        self.players.on_death_or_respawn(entity);
    }

    /// Drain the queue until every sender is gone
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<QueuedEvent>) {
        info!("Event coordinator started");
        while let Some(queued) = rx.recv().await {
            let verdict = self.handle(&queued.event);
            if let Some(reply) = queued.reply {
                // Caller may have stopped waiting
                let _ = reply.send(verdict);
            }
        }
        info!("Event coordinator stopped");
    }
}
