//! Match core: geometry, phases, containment and elimination

pub mod boundary;
pub mod containment;
pub mod coordinator;
pub mod elimination;
pub mod guards;
pub mod phase;
pub mod quadrant;
pub mod rules;

pub use containment::{ContainmentEnforcer, ContainmentState};
pub use coordinator::{HostEvent, MatchCoordinator, QueuedEvent};
pub use elimination::{EliminationEvaluator, EliminationOutcome};
pub use guards::{EventVerdict, PrepGuards};
pub use phase::{
    MatchPhase, PhaseChange, PhaseMachine, PhaseObserver, TransitionCause, TransitionError,
};
pub use quadrant::Quadrant;
