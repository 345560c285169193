//! Online POMDP solver over a sample-based belief tree.
//!
//! The solver incrementally builds a tree of belief nodes rooted at the
//! current belief. Each trial samples a particle from the start belief and
//! descends the tree, selecting actions by UCB where every action has been
//! tried and otherwise evaluating the node with one of two competing
//! rollout heuristics; the trial's discounted return is then backed up into
//! the action statistics of every node it visited.
//!
//! # Overview
//!
//! 1. **Selection**: at each belief node, pick the action maximizing
//!    `Q(a) + c * sqrt(ln N / n(a))` over the tried, legal actions
//! 2. **Rollout**: at a node with untried actions, take the next untried
//!    action once, then estimate the leaf with either the model's state
//!    heuristic or a greedy descent through a nearby explored subtree
//! 3. **Backup**: propagate discounted returns from the trajectory's tail
//!    into the Q-statistics of every visited node
//! 4. **Adaptation**: shift probability mass toward whichever rollout
//!    heuristic produced more root improvement per unit of compute time
//!
//! When the model's dynamics change mid-run, the change propagator walks
//! every affected history sequence, undoes its backups, has a
//! `HistoryCorrector` revise it, re-links it into the belief tree, and
//! either re-backs it up or continues searching from its tail.
//!
//! The [`Agent`] interleaves planning and execution: improve the policy at
//! the current belief, act greedily, observe, advance the belief.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha20Rng;
//! use sbt::{Agent, Solver};
//!
//! let model = /* any solver_core::Model */;
//! let mut rng = ChaCha20Rng::seed_from_u64(42);
//! let mut agent = Agent::new(Solver::new(model));
//! let result = agent.run_sim(100, &[], &mut rng)?;
//! println!("discounted return: {}", result.discounted_return);
//! ```

pub mod agent;
pub mod mapping;
pub mod node;
pub mod search;
pub mod tree;

mod changes;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use agent::{Agent, SimulationResult, StepRecord};
pub use mapping::{ActionEntry, ActionMapping, ObservationMapping};
pub use node::BeliefNode;
pub use search::{RolloutMode, Solver, SolverError};
pub use tree::BeliefTree;

// The ids live in solver-core so history entries can name their owning
// belief node without a dependency cycle.
pub use solver_core::{EntryRef, NodeId, SequenceId, StateId};
