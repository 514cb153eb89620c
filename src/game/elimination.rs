//! Last-team-standing detection
//!
//! Runs on deaths and departures during battle. A team survives while at
//! least one member is online, alive, and in survival mode.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::host::{Cue, EntityId, GameMode, Host};

use super::phase::{MatchPhase, PhaseMachine, TransitionCause};
use super::quadrant::Quadrant;

/// Result of evaluating one death or departure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "team", rename_all = "snake_case")]
pub enum EliminationOutcome {
    /// Not in battle, or elimination disabled
    Inactive,
    /// Nothing changed at team level
    Continuing,
    Eliminated(Quadrant),
    Winner(Quadrant),
    /// Nobody left; match is stuck until an administrator steps in
    NoSurvivors,
}

pub struct EliminationEvaluator {
    host: Host,
    phase: Arc<PhaseMachine>,
    /// Elimination only ends the match in hardcore games
    enabled: bool,
}

impl EliminationEvaluator {
    pub fn new(host: Host, phase: Arc<PhaseMachine>, enabled: bool) -> Self {
        Self {
            host,
            phase,
            enabled,
        }
    }

    /// Teams with at least one surviving member, ignoring `excluding`
    pub fn surviving_teams(&self, excluding: Option<EntityId>) -> BTreeSet<Quadrant> {
        let entities = &self.host.entities;
        entities
            .online_entities()
            .into_iter()
            .filter(|id| Some(*id) != excluding)
            .filter(|id| entities.is_alive(*id))
            .filter(|id| entities.game_mode_of(*id) == Some(GameMode::Survival))
            .filter_map(|id| self.host.teams.team_of(id))
            .collect()
    }

    /// `subject` died or left the server
    pub fn on_departure(&self, subject: EntityId) -> EliminationOutcome {
        if !self.enabled || self.phase.current_phase() != MatchPhase::Battle {
            return EliminationOutcome::Inactive;
        }

        let after = self.surviving_teams(Some(subject));
        let subject_team = self.host.teams.team_of(subject);
        let subject_was_playing =
            self.host.entities.game_mode_of(subject) == Some(GameMode::Survival);

        let mut before = after.clone();
        if let (Some(team), true) = (subject_team, subject_was_playing) {
            before.insert(team);
        }

        match after.len() {
            0 => {
                warn!(entity_id = %subject, "No surviving teams, match left in battle");
                EliminationOutcome::NoSurvivors
            }
            1 => {
                let Some(&winner) = after.iter().next() else {
                    return EliminationOutcome::Continuing;
                };
                let name = self.host.teams.display_name(winner);
                info!(team = %winner, "Team won");
                self.host.announcer.broadcast(&format!("Team {name} has won!"));
                self.host.announcer.play_cue(Cue::TeamWon);
                if let Err(e) = self
                    .phase
                    .request_transition(MatchPhase::PostGame, TransitionCause::LastTeamStanding)
                {
                    warn!(error = %e, "Could not end battle after win");
                }
                EliminationOutcome::Winner(winner)
            }
            _ => match subject_team {
                Some(team) if before.contains(&team) && !after.contains(&team) => {
                    let name = self.host.teams.display_name(team);
                    info!(team = %team, remaining = after.len(), "Team eliminated");
                    self.host
                        .announcer
                        .broadcast(&format!("{name} has been eliminated!"));
                    self.host.announcer.play_cue(Cue::TeamEliminated);
                    EliminationOutcome::Eliminated(team)
                }
                _ => EliminationOutcome::Continuing,
            },
        }
    }
}
