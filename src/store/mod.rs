//! Durable match state

pub mod phase_store;

pub use phase_store::{FilePhaseStore, MemoryPhaseStore, PhaseRecord, PhaseStore, StoreError};
