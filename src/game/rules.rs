//! Phase-driven player and world rules, plus the global border commands

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{BoundaryConfig, RuleConfig};
use crate::host::{Cue, EntityId, GameMode, GlobalBorder, Host, WorldKey};

use super::boundary::global_border_size;
use super::phase::{MatchPhase, PhaseChange, PhaseMachine, PhaseObserver};

/// Game modes, sounds and hardcore consequences for players
pub struct PlayerRules {
    host: Host,
    rules: RuleConfig,
    phase: Arc<PhaseMachine>,
}

impl PlayerRules {
    pub fn new(host: Host, rules: RuleConfig, phase: Arc<PhaseMachine>) -> Self {
        Self { host, rules, phase }
    }

    /// Dead or respawning players become spectators once battle has begun
    pub fn on_death_or_respawn(&self, entity: EntityId) {
        let phase = self.phase.current_phase();
        if self.rules.hardcore && matches!(phase, MatchPhase::Battle | MatchPhase::PostGame) {
            self.host.entities.set_game_mode(entity, GameMode::Spectator);
        }
    }

    /// Kill a player who leaves or arrives mid-battle. Returns whether it did.
    pub fn kill_if_needed(&self, entity: EntityId) -> bool {
        let kill = self.rules.hardcore
            && self.rules.kill_on_quit
            && self.phase.current_phase() == MatchPhase::Battle
            && !self.host.entities.is_game_master(entity);
        if kill {
            info!(entity_id = %entity, "Killing player who left or joined mid-battle");
            self.host.entities.kill(entity);
        }
        kill
    }
}

impl PhaseObserver for PlayerRules {
    fn on_phase_changed(&self, change: &PhaseChange) {
        let entities = &self.host.entities;
        let online = entities.online_entities();

        match change.to {
            MatchPhase::Pregame | MatchPhase::Prep => {}
            MatchPhase::Battle => {
                self.host.announcer.play_cue(Cue::RaidHorn);
                for &entity in &online {
                    entities.set_game_mode(entity, GameMode::Survival);
                }
            }
            MatchPhase::PostGame => {
                self.host.announcer.stop_music();
                self.host.announcer.play_cue(Cue::Credits);
                for &entity in &online {
                    if entities.game_mode_of(entity) == Some(GameMode::Survival) {
                        entities.set_game_mode(entity, GameMode::Adventure);
                    }
                }
            }
        }

        for entity in online {
            if entities.is_game_master(entity) && self.host.teams.team_of(entity).is_none() {
                entities.set_game_mode(entity, GameMode::Spectator);
            }
        }
    }
}

/// One `border` administration command
#[derive(Debug, Clone, PartialEq)]
pub enum BorderCommand {
    Set { size: f64, over: Option<Duration> },
    Add { delta: f64, over: Option<Duration> },
    DamageAmount(f64),
    DamageBuffer(f64),
    WarningTime(u32),
    WarningDistance(u32),
    Get,
}

impl BorderCommand {
    /// Parse whitespace-split arguments, e.g. `["set", "500", "30"]`
    pub fn parse(args: &[&str]) -> Result<Self, BorderCommandError> {
        match args {
            ["set", size, rest @ ..] if rest.len() <= 1 => Ok(BorderCommand::Set {
                size: number(size)?,
                over: rest.first().map(|s| seconds(s)).transpose()?,
            }),
            ["add", delta, rest @ ..] if rest.len() <= 1 => Ok(BorderCommand::Add {
                delta: number(delta)?,
                over: rest.first().map(|s| seconds(s)).transpose()?,
            }),
            ["damage", "amount", value] => Ok(BorderCommand::DamageAmount(number(value)?)),
            ["damage", "buffer", value] => Ok(BorderCommand::DamageBuffer(number(value)?)),
            ["warning", "time", value] => Ok(BorderCommand::WarningTime(whole(value)?)),
            ["warning", "distance", value] => Ok(BorderCommand::WarningDistance(whole(value)?)),
            ["get"] => Ok(BorderCommand::Get),
            _ => Err(BorderCommandError::Usage(args.join(" "))),
        }
    }
}

fn number(raw: &str) -> Result<f64, BorderCommandError> {
    raw.parse()
        .map_err(|_| BorderCommandError::InvalidNumber(raw.to_string()))
}

fn whole(raw: &str) -> Result<u32, BorderCommandError> {
    raw.parse()
        .map_err(|_| BorderCommandError::InvalidNumber(raw.to_string()))
}

fn seconds(raw: &str) -> Result<Duration, BorderCommandError> {
    whole(raw).map(|secs| Duration::from_secs(u64::from(secs)))
}

/// Border command failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BorderCommandError {
    #[error("World border can only be changed during the battle phase.")]
    NotBattle,

    #[error("Unknown border command: {0}")]
    Usage(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),
}

/// PvP/hardcore toggles and the world-wide border
pub struct WorldRules {
    host: Host,
    rules: RuleConfig,
    boundary: BoundaryConfig,
    phase: Arc<PhaseMachine>,
}

impl WorldRules {
    pub fn new(
        host: Host,
        rules: RuleConfig,
        boundary: BoundaryConfig,
        phase: Arc<PhaseMachine>,
    ) -> Self {
        Self {
            host,
            rules,
            boundary,
            phase,
        }
    }

    fn managed_worlds(&self) -> Vec<WorldKey> {
        self.host
            .worlds
            .worlds()
            .into_iter()
            .filter(|w| !self.rules.is_ignored(w))
            .collect()
    }

    fn scale_of(&self, world: &WorldKey) -> f64 {
        self.host.worlds.coordinate_scale_of(world).unwrap_or(1.0)
    }

    /// Apply the rules for the current phase (used at startup)
    pub fn resume(&self) {
        self.apply_world_rules(self.phase.current_phase());
    }

    /// Center every managed world's border on the origin, sized to fit all
    /// four quadrants
    pub fn init_global_borders(&self) {
        for world in self.managed_worlds() {
            let current = self.host.worlds.global_border(&world).unwrap_or_default();
            let size = global_border_size(
                self.boundary.size,
                self.boundary.axis_buffer_offset,
                self.scale_of(&world),
            );
            debug!(world = %world, size, "Global border initialised");
            self.host.worlds.set_global_border(
                &world,
                GlobalBorder {
                    center_x: 0.0,
                    center_z: 0.0,
                    size,
                    ..current
                },
                None,
            );
        }
    }

    /// Run a border command against every managed world. Returns one
    /// feedback line per world (or per setting).
    pub fn border_command(
        &self,
        command: &BorderCommand,
    ) -> Result<Vec<String>, BorderCommandError> {
        if self.phase.current_phase() != MatchPhase::Battle {
            return Err(BorderCommandError::NotBattle);
        }

        let mut feedback = Vec::new();
        for world in self.managed_worlds() {
            let Some(mut border) = self.host.worlds.global_border(&world) else {
                continue;
            };
            let scale = self.scale_of(&world);
            let original = border.size;
            let mut over = None;

            match command {
                BorderCommand::Set { size, over: duration } => {
                    border.size = size / scale;
                    over = *duration;
                }
                BorderCommand::Add { delta, over: duration } => {
                    border.size = original + delta / scale;
                    over = *duration;
                }
                BorderCommand::DamageAmount(amount) => border.damage_amount = *amount,
                BorderCommand::DamageBuffer(buffer) => border.damage_buffer = *buffer,
                BorderCommand::WarningTime(secs) => border.warning_time_secs = *secs,
                BorderCommand::WarningDistance(distance) => border.warning_distance = *distance,
                BorderCommand::Get => {
                    feedback.push(format!(
                        "{world}: The world border is currently {original} block(s) wide"
                    ));
                    continue;
                }
            }

            let line = match (command, over) {
                (BorderCommand::Set { .. } | BorderCommand::Add { .. }, Some(over)) => {
                    if border.size > original {
                        format!(
                            "{world}: Growing the world border to {} blocks wide over {} seconds",
                            border.size,
                            over.as_secs()
                        )
                    } else if border.size < original {
                        format!(
                            "{world}: Shrinking the world border to {} block(s) wide over {} second(s)",
                            border.size,
                            over.as_secs()
                        )
                    } else {
                        format!("{world}: Nothing changed. The world border is already that size")
                    }
                }
                (BorderCommand::Set { .. } | BorderCommand::Add { .. }, None) => {
                    format!("{world}: Set the world border to {} block(s) wide", border.size)
                }
                _ => String::new(),
            };
            if !line.is_empty() {
                feedback.push(line);
            }

            self.host.worlds.set_global_border(&world, border, over);
        }

        match command {
            BorderCommand::DamageAmount(amount) => {
                feedback.push(format!(
                    "Set the world border damage to {amount} per block each second"
                ));
            }
            BorderCommand::DamageBuffer(buffer) => {
                feedback.push(format!("Set the world border damage buffer to {buffer} block(s)"));
            }
            BorderCommand::WarningTime(secs) => {
                feedback.push(format!("Set the world border warning time to {secs} second(s)"));
            }
            BorderCommand::WarningDistance(distance) => {
                feedback.push(format!(
                    "Set the world border warning distance to {distance} block(s)"
                ));
            }
            _ => {}
        }

        info!(command = ?command, "Border command applied");
        Ok(feedback)
    }

    fn apply_world_rules(&self, phase: MatchPhase) {
        let battle = phase == MatchPhase::Battle;
        for world in self.managed_worlds() {
            self.host.worlds.set_world_rules(&world, battle, battle);
        }
    }
}

impl PhaseObserver for WorldRules {
    fn on_phase_changed(&self, change: &PhaseChange) {
        self.apply_world_rules(change.to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::phase::TransitionCause;
    use crate::game::quadrant::Quadrant;
    use crate::host::memory::{MemoryHost, NETHER, OVERWORLD};
    use crate::host::{Dimension, EntityService, Location, WorldService};
    use crate::store::MemoryPhaseStore;

    fn machine(phase: MatchPhase) -> Arc<PhaseMachine> {
        Arc::new(PhaseMachine::load(
            Arc::new(MemoryPhaseStore::with_phase(phase)),
            true,
        ))
    }

    fn spot() -> Location {
        Location::new(WorldKey::new(OVERWORLD), 0.0, 64.0, 0.0)
    }

    fn player_rules(
        phase: MatchPhase,
    ) -> (Arc<MemoryHost>, Arc<PhaseMachine>, Arc<dyn PhaseObserver>) {
        let host = Arc::new(MemoryHost::new());
        let machine = machine(phase);
        let rules: Arc<dyn PhaseObserver> = Arc::new(PlayerRules::new(
            Host::from_shared(host.clone()),
            RuleConfig::default(),
            machine.clone(),
        ));
        machine.subscribe(&rules);
        (host, machine, rules)
    }

    fn world_rules(phase: MatchPhase) -> (Arc<MemoryHost>, Arc<PhaseMachine>, Arc<WorldRules>) {
        let host = Arc::new(MemoryHost::new());
        host.add_world(WorldKey::new("quadwars:lobby"), Dimension::Overworld, 1.0);
        let machine = machine(phase);
        let rules = Arc::new(WorldRules::new(
            Host::from_shared(host.clone()),
            RuleConfig::default(),
            BoundaryConfig::default(),
            machine.clone(),
        ));
        (host, machine, rules)
    }

    #[test]
    fn battle_sounds_horn_and_makes_everyone_survival() {
        let (host, machine, _rules) = player_rules(MatchPhase::Prep);
        let id = host.spawn_entity(Some(Quadrant::NE), spot());
        host.set_game_mode(id, GameMode::Adventure);

        machine.advance(TransitionCause::Command).unwrap();

        assert_eq!(host.cues(), vec![Cue::RaidHorn]);
        assert_eq!(host.game_mode_of(id), Some(GameMode::Survival));
    }

    #[test]
    fn post_game_plays_credits_and_retires_survivors() {
        let (host, machine, _rules) = player_rules(MatchPhase::Battle);
        let survivor = host.spawn_entity(Some(Quadrant::NE), spot());
        let spectator = host.spawn_entity(Some(Quadrant::SW), spot());
        host.set_game_mode(spectator, GameMode::Spectator);

        machine.set_phase(MatchPhase::PostGame).unwrap();

        assert_eq!(host.music_stops(), 1);
        assert_eq!(host.cues(), vec![Cue::Credits]);
        assert_eq!(host.game_mode_of(survivor), Some(GameMode::Adventure));
        assert_eq!(host.game_mode_of(spectator), Some(GameMode::Spectator));
    }

    #[test]
    fn teamless_game_masters_spectate() {
        let (host, machine, _rules) = player_rules(MatchPhase::Pregame);
        let gm = host.spawn_entity(None, spot());
        host.set_game_master(gm, true);
        let teamed_gm = host.spawn_entity(Some(Quadrant::SE), spot());
        host.set_game_master(teamed_gm, true);

        machine.advance(TransitionCause::Command).unwrap();

        assert_eq!(host.game_mode_of(gm), Some(GameMode::Spectator));
        assert_eq!(host.game_mode_of(teamed_gm), Some(GameMode::Survival));
    }

    #[test]
    fn hardcore_deaths_spectate_and_quitters_die() {
        let host = Arc::new(MemoryHost::new());
        let rules = PlayerRules::new(
            Host::from_shared(host.clone()),
            RuleConfig::default(),
            machine(MatchPhase::Battle),
        );
        let player = host.spawn_entity(Some(Quadrant::NE), spot());
        let gm = host.spawn_entity(None, spot());
        host.set_game_master(gm, true);

        rules.on_death_or_respawn(player);
        assert_eq!(host.game_mode_of(player), Some(GameMode::Spectator));

        assert!(rules.kill_if_needed(player));
        assert!(!host.is_alive(player));
        assert!(!rules.kill_if_needed(gm));
        assert!(host.is_alive(gm));
    }

    #[test]
    fn soft_rules_leave_players_alone() {
        let host = Arc::new(MemoryHost::new());
        let rules = PlayerRules::new(
            Host::from_shared(host.clone()),
            RuleConfig {
                hardcore: false,
                ..RuleConfig::default()
            },
            machine(MatchPhase::Battle),
        );
        let player = host.spawn_entity(Some(Quadrant::NE), spot());
        rules.on_death_or_respawn(player);
        assert_eq!(host.game_mode_of(player), Some(GameMode::Survival));
        assert!(!rules.kill_if_needed(player));
    }

    #[test]
    fn pvp_and_hardcore_follow_battle() {
        let (host, machine, rules) = world_rules(MatchPhase::Prep);
        let observer: Arc<dyn PhaseObserver> = rules.clone();
        machine.subscribe(&observer);
        let overworld = WorldKey::new(OVERWORLD);
        let lobby = WorldKey::new("quadwars:lobby");

        machine.advance(TransitionCause::Command).unwrap();
        assert_eq!(host.world_rules(&overworld), Some((true, true)));
        assert_eq!(host.world_rules(&lobby), Some((false, false)));

        machine.set_phase(MatchPhase::PostGame).unwrap();
        assert_eq!(host.world_rules(&overworld), Some((false, false)));
    }

    #[test]
    fn global_borders_enclose_every_quadrant() {
        let (host, _machine, rules) = world_rules(MatchPhase::Pregame);
        rules.init_global_borders();

        let overworld = host.global_border(&WorldKey::new(OVERWORLD)).unwrap();
        assert_eq!((overworld.center_x, overworld.center_z), (0.0, 0.0));
        assert_eq!(overworld.size, 20_256.0);
        assert_eq!(host.global_border(&WorldKey::new(NETHER)).unwrap().size, 2532.0);
        assert_eq!(
            host.global_border(&WorldKey::new("quadwars:lobby")).unwrap(),
            GlobalBorder::default()
        );
    }

    #[test]
    fn border_commands_need_battle() {
        let (_host, _machine, rules) = world_rules(MatchPhase::Prep);
        assert_eq!(
            rules.border_command(&BorderCommand::Get),
            Err(BorderCommandError::NotBattle)
        );
    }

    #[test]
    fn border_sizes_are_divided_by_scale() {
        let (host, _machine, rules) = world_rules(MatchPhase::Battle);
        rules.init_global_borders();

        let feedback = rules
            .border_command(&BorderCommand::parse(&["set", "800", "30"]).unwrap())
            .unwrap();
        assert_eq!(feedback.len(), 3);
        assert_eq!(host.global_border(&WorldKey::new(OVERWORLD)).unwrap().size, 800.0);
        assert_eq!(host.global_border(&WorldKey::new(NETHER)).unwrap().size, 100.0);
        assert_eq!(
            host.last_border_transition(&WorldKey::new(OVERWORLD)),
            Some(Duration::from_secs(30))
        );

        rules
            .border_command(&BorderCommand::parse(&["add", "-80"]).unwrap())
            .unwrap();
        assert_eq!(host.global_border(&WorldKey::new(NETHER)).unwrap().size, 90.0);
        assert_eq!(host.last_border_transition(&WorldKey::new(NETHER)), None);

        rules
            .border_command(&BorderCommand::parse(&["damage", "amount", "1.5"]).unwrap())
            .unwrap();
        assert_eq!(
            host.global_border(&WorldKey::new(OVERWORLD)).unwrap().damage_amount,
            1.5
        );
    }

    #[test]
    fn border_command_parsing() {
        assert_eq!(
            BorderCommand::parse(&["warning", "distance", "12"]).unwrap(),
            BorderCommand::WarningDistance(12)
        );
        assert_eq!(
            BorderCommand::parse(&["set", "abc"]),
            Err(BorderCommandError::InvalidNumber("abc".into()))
        );
        assert!(matches!(
            BorderCommand::parse(&["set", "1", "2", "3"]),
            Err(BorderCommandError::Usage(_))
        ));
        assert!(matches!(
            BorderCommand::parse(&["damage", "speed", "3"]),
            Err(BorderCommandError::Usage(_))
        ));
    }
}
