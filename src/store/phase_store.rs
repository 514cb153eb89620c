//! Phase persistence - a single key-value record holding the current phase

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::game::phase::MatchPhase;

/// Record written on every transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub game_state: MatchPhase,
    pub updated_at: DateTime<Utc>,
}

/// Storage for the current phase
pub trait PhaseStore: Send + Sync {
    /// Saved phase, or `None` if nothing has been written yet
    fn load(&self) -> Result<Option<MatchPhase>, StoreError>;
    fn save(&self, phase: MatchPhase) -> Result<(), StoreError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FilePhaseStore {
    path: PathBuf,
}

impl FilePhaseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PhaseStore for FilePhaseStore {
    fn load(&self) -> Result<Option<MatchPhase>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let record: PhaseRecord = serde_json::from_str(&raw)?;
        Ok(Some(record.game_state))
    }

    fn save(&self, phase: MatchPhase) -> Result<(), StoreError> {
        let record = PhaseRecord {
            game_state: phase,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write then rename so a crash never leaves a half-written record
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryPhaseStore {
    phase: Mutex<Option<MatchPhase>>,
    writes: AtomicUsize,
}

impl MemoryPhaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(phase: MatchPhase) -> Self {
        Self {
            phase: Mutex::new(Some(phase)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful saves
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Option<MatchPhase> {
        *self.phase.lock()
    }
}

impl PhaseStore for MemoryPhaseStore {
    fn load(&self) -> Result<Option<MatchPhase>, StoreError> {
        Ok(*self.phase.lock())
    }

    fn save(&self, phase: MatchPhase) -> Result<(), StoreError> {
        *self.phase.lock() = Some(phase);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Phase store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Phase store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed phase record: {0}")]
    Parse(#[from] serde_json::Error),
}
