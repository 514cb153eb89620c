//! Application state shared with the bridge

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::game::containment::ContainmentEnforcer;
use crate::game::coordinator::MatchCoordinator;
use crate::game::elimination::EliminationEvaluator;
use crate::game::guards::PrepGuards;
use crate::game::phase::{PhaseMachine, PhaseObserver};
use crate::game::rules::{PlayerRules, WorldRules};
use crate::host::Host;
use crate::store::PhaseStore;

/// Shared application state
///
/// Owns every phase observer; the phase machine only holds weak references,
/// so dropping the last `AppState` unsubscribes them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub host: Host,
    pub phase: Arc<PhaseMachine>,
    pub containment: Arc<ContainmentEnforcer>,
    pub player_rules: Arc<PlayerRules>,
    pub world_rules: Arc<WorldRules>,
    pub coordinator: Arc<MatchCoordinator>,
}

impl AppState {
    /// Wire every component together. Must run inside a Tokio runtime.
    pub fn new(config: Config, host: Host, store: Arc<dyn PhaseStore>) -> Self {
        let config = Arc::new(config);

        // Battle only ends by elimination in hardcore games
        let phase = Arc::new(PhaseMachine::load(store, config.rules.hardcore));

        let containment = Arc::new(ContainmentEnforcer::new(
            host.clone(),
            phase.clone(),
            config.boundary.clone(),
            config.rules.ignored_worlds.iter().cloned(),
        ));
        let player_rules = Arc::new(PlayerRules::new(
            host.clone(),
            config.rules.clone(),
            phase.clone(),
        ));
        let world_rules = Arc::new(WorldRules::new(
            host.clone(),
            config.rules.clone(),
            config.boundary.clone(),
            phase.clone(),
        ));

        for observer in [
            containment.clone() as Arc<dyn PhaseObserver>,
            world_rules.clone() as Arc<dyn PhaseObserver>,
            player_rules.clone() as Arc<dyn PhaseObserver>,
        ] {
            phase.subscribe(&observer);
        }

        let coordinator = Arc::new(MatchCoordinator::new(
            containment.clone(),
            player_rules.clone(),
            EliminationEvaluator::new(host.clone(), phase.clone(), config.rules.hardcore),
            PrepGuards::new(
                host.clone(),
                phase.clone(),
                config.boundary.clone(),
                config.rules.ignored_worlds.iter().cloned(),
                config.rules.allow_end_during_prep,
            ),
        ));

        world_rules.init_global_borders();
        world_rules.resume();
        containment.resume();
        info!(phase = %phase.current_phase(), "Match state restored");

        Self {
            config,
            host,
            phase,
            containment,
            player_rules,
            world_rules,
            coordinator,
        }
    }
}
