//! Core traits and data structures for the belief-tree POMDP solver
//!
//! This crate provides the fundamental abstractions shared by the solver and
//! by problem implementations:
//! - `Model`: the black-box POMDP simulator capability
//! - `PomdpState` / `PomdpObservation`: bounds on the opaque value types
//! - `StatePool` / `StateInfo`: interning of visited states with change flags
//! - `Histories` / `HistorySequence` / `HistoryEntry`: the append-only
//!   trajectory log
//! - `StateIndex`: swappable spatial index over state coordinates
//! - `HistoryCorrector`: revision of trajectories after a model change

pub mod corrector;
pub mod flags;
pub mod histories;
pub mod ids;
pub mod index;
pub mod model;
pub mod pool;
pub mod primitives;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use corrector::{HistoryCorrector, ReplayCorrector, Revision};
pub use flags::ChangeFlags;
pub use histories::{Histories, HistoryEntry, HistorySequence};
pub use ids::{EntryRef, NodeId, SequenceId, StateId};
pub use index::{LinearStateIndex, StateIndex};
pub use model::{Model, ObservationResolution, SolverParameters, StepResult};
pub use pool::{StateInfo, StatePool};
pub use primitives::{PomdpObservation, PomdpState};
