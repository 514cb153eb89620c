//! Match phase state machine
//!
//! Owns the current [`MatchPhase`]. Every change goes through
//! [`PhaseMachine::request_transition`], which holds the single in-flight
//! lock across validate → persist → notify, so subscribers always observe
//! the new phase before the request returns.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{error, info, warn};

use crate::host::{Announcer, ProgressBar};
use crate::store::PhaseStore;
use crate::util::time::{progress, PROGRESS_INTERVAL};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPhase {
    /// Teams are being picked
    Pregame,
    /// Teams are held inside their own quadrants
    Prep,
    /// Borders are down, last team standing wins
    Battle,
    /// Match is over
    PostGame,
}

impl MatchPhase {
    pub const ALL: [MatchPhase; 4] = [
        MatchPhase::Pregame,
        MatchPhase::Prep,
        MatchPhase::Battle,
        MatchPhase::PostGame,
    ];

    /// Next phase in the cycle
    pub const fn successor(self) -> Self {
        match self {
            MatchPhase::Pregame => MatchPhase::Prep,
            MatchPhase::Prep => MatchPhase::Battle,
            MatchPhase::Battle => MatchPhase::PostGame,
            MatchPhase::PostGame => MatchPhase::Pregame,
        }
    }

    /// Canonical persisted name
    pub const fn as_str(self) -> &'static str {
        match self {
            MatchPhase::Pregame => "PREGAME",
            MatchPhase::Prep => "PREP",
            MatchPhase::Battle => "BATTLE",
            MatchPhase::PostGame => "POST_GAME",
        }
    }

    /// Progress bar title while counting down out of this phase
    pub const fn countdown_title(self) -> &'static str {
        match self {
            MatchPhase::Pregame => "Prep Phase Starts",
            MatchPhase::Prep => "Battle Phase Starts",
            MatchPhase::Battle => "Battle Phase Ends",
            MatchPhase::PostGame => "End of Post-Game Phase",
        }
    }

    const fn to_index(self) -> u8 {
        match self {
            MatchPhase::Pregame => 0,
            MatchPhase::Prep => 1,
            MatchPhase::Battle => 2,
            MatchPhase::PostGame => 3,
        }
    }

    const fn from_index(index: u8) -> Self {
        match index {
            1 => MatchPhase::Prep,
            2 => MatchPhase::Battle,
            3 => MatchPhase::PostGame,
            _ => MatchPhase::Pregame,
        }
    }
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised phase name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown match phase: {0}")]
pub struct UnknownPhase(pub String);

impl FromStr for MatchPhase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        MatchPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

/// Why a transition was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Administrator asked for the next phase
    Command,
    /// A scheduled countdown ran out
    Timer,
    /// Only one team is left alive
    LastTeamStanding,
    /// Administrator forced a specific phase
    Override,
}

/// Phase-changed notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub from: MatchPhase,
    pub to: MatchPhase,
    pub cause: TransitionCause,
    pub at: DateTime<Utc>,
}

/// Transition rejections
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("A transition is already in progress")]
    AlreadyInProgress,

    #[error("Cannot move from {from} to {to}")]
    NotSuccessor { from: MatchPhase, to: MatchPhase },

    #[error("Battle phase ends when only one team is left alive")]
    WinOnly,
}

/// Receives phase changes synchronously, in the requesting call
pub trait PhaseObserver: Send + Sync {
    fn on_phase_changed(&self, change: &PhaseChange);
}

/// The match phase state machine
pub struct PhaseMachine {
    current: AtomicU8,
    in_flight: AtomicBool,
    /// Battle only ends through elimination
    win_only: bool,
    store: Arc<dyn PhaseStore>,
    observers: RwLock<Vec<Weak<dyn PhaseObserver>>>,
    changes_tx: broadcast::Sender<PhaseChange>,
    countdown: Mutex<Option<Countdown>>,
}

/// A running countdown task and where its progress bar is shown
struct Countdown {
    handle: JoinHandle<()>,
    announcer: Arc<dyn Announcer>,
}

impl PhaseMachine {
    /// Start in the persisted phase, falling back to pregame
    pub fn load(store: Arc<dyn PhaseStore>, win_only: bool) -> Self {
        let initial = match store.load() {
            Ok(Some(phase)) => phase,
            Ok(None) => {
                info!("No saved match phase, starting in pregame");
                if let Err(e) = store.save(MatchPhase::Pregame) {
                    error!(error = %e, "Could not save default match phase");
                }
                MatchPhase::Pregame
            }
            Err(e) => {
                error!(error = %e, "Could not read saved match phase, starting in pregame");
                MatchPhase::Pregame
            }
        };
        info!(phase = %initial, win_only, "Phase machine ready");

        let (changes_tx, _) = broadcast::channel(64);
        Self {
            current: AtomicU8::new(initial.to_index()),
            in_flight: AtomicBool::new(false),
            win_only,
            store,
            observers: RwLock::new(Vec::new()),
            changes_tx,
            countdown: Mutex::new(None),
        }
    }

    pub fn current_phase(&self) -> MatchPhase {
        MatchPhase::from_index(self.current.load(Ordering::SeqCst))
    }

    pub fn is_win_only(&self) -> bool {
        self.win_only
    }

    /// Whether a transition (immediate or scheduled) holds the lock
    pub fn is_transition_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Register an observer. Only a weak reference is kept; the caller owns it.
    pub fn subscribe(&self, observer: &Arc<dyn PhaseObserver>) {
        let mut observers = self.observers.write();
        observers.retain(|o| o.strong_count() > 0);
        observers.push(Arc::downgrade(observer));
    }

    /// Channel copy of every change, for collaborators outside the core
    pub fn changes(&self) -> broadcast::Receiver<PhaseChange> {
        self.changes_tx.subscribe()
    }

    /// Move to `target`. Returns the change once every observer has seen it.
    pub fn request_transition(
        &self,
        target: MatchPhase,
        cause: TransitionCause,
    ) -> Result<PhaseChange, TransitionError> {
        let _lock = TransitionLock::acquire(&self.in_flight)?;
        let from = self.current_phase();
        self.check_legal(from, target, cause)?;
        Ok(self.apply(from, target, cause))
    }

    /// Move to the next phase in the cycle
    pub fn advance(&self, cause: TransitionCause) -> Result<PhaseChange, TransitionError> {
        self.request_transition(self.current_phase().successor(), cause)
    }

    /// Administrative override: jump straight to `target`
    pub fn set_phase(&self, target: MatchPhase) -> Result<PhaseChange, TransitionError> {
        self.request_transition(target, TransitionCause::Override)
    }

    /// Advance after `delay`, showing a countdown bar.
    ///
    /// The in-flight lock is taken now and held until the countdown
    /// finishes or is cancelled with [`PhaseMachine::cancel_scheduled`].
    /// Every other request, the override included, is refused meanwhile.
    pub fn schedule_transition(
        self: &Arc<Self>,
        delay: Duration,
        announcer: Arc<dyn Announcer>,
    ) -> Result<(), TransitionError> {
        let lock = ScheduledLock::acquire(Arc::clone(self))?;
        let from = self.current_phase();
        if from == MatchPhase::Battle && self.win_only {
            return Err(TransitionError::WinOnly);
        }

        let title = from.countdown_title();
        info!(phase = %from, delay_secs = delay.as_secs(), "Transition scheduled");

        let bar = Arc::clone(&announcer);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval_at(started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
            announcer.show_progress(&ProgressBar {
                title: title.to_string(),
                progress: 0.0,
            });

            loop {
                ticker.tick().await;
                let done = progress(started.elapsed(), delay);
                if done >= 1.0 {
                    break;
                }
                announcer.show_progress(&ProgressBar {
                    title: title.to_string(),
                    progress: done,
                });
            }
            announcer.hide_progress();

            let machine = &lock.0;
            let from = machine.current_phase();
            let to = from.successor();
            match machine.check_legal(from, to, TransitionCause::Timer) {
                Ok(()) => {
                    machine.apply(from, to, TransitionCause::Timer);
                }
                Err(e) => warn!(error = %e, "Scheduled transition dropped"),
            }
        });
        *self.countdown.lock() = Some(Countdown {
            handle,
            announcer: bar,
        });
        Ok(())
    }

    /// Stop a running countdown. Returns `false` if none was running.
    ///
    /// Resolves once the countdown task is gone and the in-flight lock is
    /// free again.
    pub async fn cancel_scheduled(&self) -> bool {
        let Some(countdown) = self.countdown.lock().take() else {
            return false;
        };
        countdown.handle.abort();
        match countdown.handle.await {
            Err(e) if e.is_cancelled() => {
                countdown.announcer.hide_progress();
                info!("Scheduled transition cancelled");
                true
            }
            _ => false,
        }
    }

    fn check_legal(
        &self,
        from: MatchPhase,
        to: MatchPhase,
        cause: TransitionCause,
    ) -> Result<(), TransitionError> {
        match cause {
            TransitionCause::Override => Ok(()),
            TransitionCause::LastTeamStanding => {
                if from == MatchPhase::Battle && to == MatchPhase::PostGame {
                    Ok(())
                } else {
                    Err(TransitionError::NotSuccessor { from, to })
                }
            }
            TransitionCause::Command | TransitionCause::Timer => {
                if to != from.successor() {
                    Err(TransitionError::NotSuccessor { from, to })
                } else if from == MatchPhase::Battle && self.win_only {
                    Err(TransitionError::WinOnly)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Caller must hold the in-flight lock
    fn apply(&self, from: MatchPhase, to: MatchPhase, cause: TransitionCause) -> PhaseChange {
        self.current.store(to.to_index(), Ordering::SeqCst);

        if let Err(e) = self.store.save(to) {
            error!(error = %e, phase = %to, "Could not save game state");
        }

        let change = PhaseChange {
            from,
            to,
            cause,
            at: Utc::now(),
        };
        info!(from = %from, to = %to, cause = ?cause, "Match phase changed");

        let observers: Vec<Arc<dyn PhaseObserver>> =
            self.observers.read().iter().filter_map(Weak::upgrade).collect();
        for observer in observers {
            observer.on_phase_changed(&change);
        }

        // No receivers is fine
        let _ = self.changes_tx.send(change.clone());
        change
    }
}

/// Borrowed in-flight lock for immediate transitions
struct TransitionLock<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TransitionLock<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, TransitionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self { flag })
            .map_err(|_| TransitionError::AlreadyInProgress)
    }
}

impl Drop for TransitionLock<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owned in-flight lock carried by a countdown task
struct ScheduledLock(Arc<PhaseMachine>);

impl ScheduledLock {
    fn acquire(machine: Arc<PhaseMachine>) -> Result<Self, TransitionError> {
        machine
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransitionError::AlreadyInProgress)?;
        Ok(Self(machine))
    }
}

impl Drop for ScheduledLock {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}
