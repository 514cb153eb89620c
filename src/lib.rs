//! QuadWars match server
//!
//! Runs the phase cycle of a four-team quadrant elimination match:
//! - Pregame → Prep → Battle → PostGame, persisted across restarts
//! - Per-player quadrant containment with damage ticks during prep
//! - Last-team-standing detection during battle
//! - World rules, border commands and prep-phase guards

pub mod app;
pub mod bridge;
pub mod config;
pub mod game;
pub mod host;
pub mod store;
pub mod util;
