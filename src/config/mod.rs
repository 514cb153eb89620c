//! Configuration module - environment variable parsing

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::game::boundary::BoundarySettings;
use crate::host::WorldKey;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Where the current phase is persisted
    pub phase_state_path: PathBuf,
    pub boundary: BoundaryConfig,
    pub rules: RuleConfig,
}

/// Quadrant boundary dimensions and penalties
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryConfig {
    /// Edge length of each team's square
    pub size: f64,
    /// Gap between the axes and each square
    pub axis_buffer_offset: f64,
    pub damage_per_hit: f64,
    pub damage_buffer: f64,
    pub warning_distance: u32,
    pub warning_time_secs: u32,
}

impl BoundaryConfig {
    pub fn settings(&self) -> BoundarySettings {
        BoundarySettings {
            damage_per_hit: self.damage_per_hit,
            damage_buffer: self.damage_buffer,
            warning_distance: self.warning_distance,
            warning_time_secs: self.warning_time_secs,
        }
    }
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        let settings = BoundarySettings::default();
        Self {
            size: 10_000.0,
            axis_buffer_offset: 128.0,
            damage_per_hit: settings.damage_per_hit,
            damage_buffer: settings.damage_buffer,
            warning_distance: settings.warning_distance,
            warning_time_secs: settings.warning_time_secs,
        }
    }
}

/// Match rules
#[derive(Clone, Debug, PartialEq)]
pub struct RuleConfig {
    /// Worlds the match never touches (lobbies and the like)
    pub ignored_worlds: Vec<WorldKey>,
    pub allow_end_during_prep: bool,
    /// Deaths are final and battle only ends by elimination
    pub hardcore: bool,
    /// Kill players who leave or join mid-battle (hardcore only)
    pub kill_on_quit: bool,
}

impl RuleConfig {
    pub fn is_ignored(&self, world: &WorldKey) -> bool {
        self.ignored_worlds.contains(world)
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            ignored_worlds: vec![WorldKey::new("quadwars:lobby")],
            allow_end_during_prep: false,
            hardcore: true,
            kill_on_quit: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = BoundaryConfig::default();
        let boundary = BoundaryConfig {
            size: parse_or(&lookup, "BOUNDARY_SIZE", defaults.size)?,
            axis_buffer_offset: parse_or(
                &lookup,
                "AXIS_BUFFER_OFFSET",
                defaults.axis_buffer_offset,
            )?,
            damage_per_hit: parse_or(&lookup, "BOUNDARY_DAMAGE_PER_HIT", defaults.damage_per_hit)?,
            damage_buffer: parse_or(&lookup, "BOUNDARY_DAMAGE_BUFFER", defaults.damage_buffer)?,
            warning_distance: parse_or(
                &lookup,
                "BOUNDARY_WARNING_DISTANCE",
                defaults.warning_distance,
            )?,
            warning_time_secs: parse_or(
                &lookup,
                "BOUNDARY_WARNING_TIME",
                defaults.warning_time_secs,
            )?,
        };

        if !(boundary.size.is_finite() && boundary.size > 0.0) {
            return Err(ConfigError::OutOfRange("BOUNDARY_SIZE"));
        }
        if !(boundary.axis_buffer_offset.is_finite() && boundary.axis_buffer_offset >= 0.0) {
            return Err(ConfigError::OutOfRange("AXIS_BUFFER_OFFSET"));
        }
        if !(boundary.damage_buffer.is_finite() && boundary.damage_buffer > 0.0) {
            return Err(ConfigError::OutOfRange("BOUNDARY_DAMAGE_BUFFER"));
        }
        if !(boundary.damage_per_hit.is_finite() && boundary.damage_per_hit >= 0.0) {
            return Err(ConfigError::OutOfRange("BOUNDARY_DAMAGE_PER_HIT"));
        }

        let rule_defaults = RuleConfig::default();
        let ignored_worlds = match lookup("IGNORED_WORLDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(WorldKey::new)
                .collect(),
            None => rule_defaults.ignored_worlds,
        };
        let rules = RuleConfig {
            ignored_worlds,
            allow_end_during_prep: parse_or(
                &lookup,
                "ALLOW_END_DURING_PREP",
                rule_defaults.allow_end_during_prep,
            )?,
            hardcore: parse_or(&lookup, "HARDCORE", rule_defaults.hardcore)?,
            kill_on_quit: parse_or(&lookup, "KILL_ON_QUIT", rule_defaults.kill_on_quit)?,
        };

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            phase_state_path: lookup("PHASE_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("game-state.json")),
            boundary,
            rules,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            phase_state_path: PathBuf::from("game-state.json"),
            boundary: BoundaryConfig::default(),
            rules: RuleConfig::default(),
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Environment variable out of range: {0}")]
    OutOfRange(&'static str),
}
