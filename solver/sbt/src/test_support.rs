//! Deterministic chain-world model shared by the solver tests.
//!
//! Fully observable walk along 0..length with the goal at the right end and
//! reward 1 for reaching it. With discount 0.5 every quantity the solver
//! computes is a dyadic rational, so backup arithmetic is exact and the
//! backup/undo identity can be asserted bitwise.

use std::convert::Infallible;

use rand_chacha::ChaCha20Rng;

use solver_core::{Model, PomdpObservation, PomdpState, SolverParameters, StepResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainState(pub u32);

impl PomdpState for ChainState {
    fn distance_to(&self, other: &Self) -> f64 {
        (self.0 as f64 - other.0 as f64).abs()
    }

    fn coordinates(&self) -> Vec<f64> {
        vec![self.0 as f64]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainAction {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainObservation(pub u32);

impl PomdpObservation for ChainObservation {
    fn distance_to(&self, other: &Self) -> f64 {
        (self.0 as f64 - other.0 as f64).abs()
    }
}

#[derive(Debug, Clone)]
pub struct ChainModel {
    pub length: u32,
    pub params: SolverParameters,
    /// Scheduled changes: at each `(time, position)` the state at
    /// `position` is deleted.
    pub deletions: Vec<(u64, u32)>,
}

impl ChainModel {
    pub fn new(length: u32) -> Self {
        Self {
            length,
            params: SolverParameters::for_testing()
                .with_discount(0.5)
                .with_value_bounds(0.0, 1.0),
            deletions: Vec::new(),
        }
    }

    pub fn with_params(length: u32, params: SolverParameters) -> Self {
        Self {
            length,
            params,
            deletions: Vec::new(),
        }
    }

    fn goal(&self) -> u32 {
        self.length - 1
    }
}

impl Model for ChainModel {
    type State = ChainState;
    type Action = ChainAction;
    type Observation = ChainObservation;
    type TransitionParameters = ();
    type Error = Infallible;

    fn parameters(&self) -> SolverParameters {
        self.params.clone()
    }

    fn all_actions(&self) -> Vec<ChainAction> {
        vec![ChainAction::Left, ChainAction::Right]
    }

    fn sample_initial_state(&mut self, _rng: &mut ChaCha20Rng) -> ChainState {
        ChainState(0)
    }

    fn is_terminal(&self, state: &ChainState) -> bool {
        state.0 == self.goal()
    }

    fn generate_step(
        &mut self,
        state: &ChainState,
        action: &ChainAction,
        _rng: &mut ChaCha20Rng,
    ) -> StepResult<Self> {
        // The goal absorbs.
        if state.0 == self.goal() {
            return StepResult {
                action: *action,
                transition_parameters: None,
                observation: ChainObservation(state.0),
                reward: 0.0,
                next_state: *state,
                is_terminal: true,
            };
        }
        let next = match action {
            ChainAction::Left => state.0.saturating_sub(1),
            ChainAction::Right => (state.0 + 1).min(self.goal()),
        };
        let is_terminal = next == self.goal();
        StepResult {
            action: *action,
            transition_parameters: None,
            observation: ChainObservation(next),
            reward: if is_terminal { 1.0 } else { 0.0 },
            next_state: ChainState(next),
            is_terminal,
        }
    }

    fn heuristic_value(&self, state: &ChainState) -> f64 {
        0.5_f64.powi((self.goal() - state.0.min(self.goal())) as i32)
    }

    fn default_value(&self) -> f64 {
        0.0
    }

    fn generate_particles(
        &mut self,
        _action: &ChainAction,
        observation: &ChainObservation,
        prior_particles: &[ChainState],
        _rng: &mut ChaCha20Rng,
    ) -> Vec<ChainState> {
        if prior_particles.is_empty() {
            return Vec::new();
        }
        vec![ChainState(observation.0)]
    }

    fn generate_particles_uninformed(
        &mut self,
        _action: &ChainAction,
        observation: &ChainObservation,
        _rng: &mut ChaCha20Rng,
    ) -> Vec<ChainState> {
        vec![ChainState(observation.0)]
    }

    fn update(&mut self, time: u64, pool: &mut solver_core::StatePool<Self>) {
        for &(at, position) in &self.deletions {
            if at == time {
                if let Some(id) = pool.lookup(&ChainState(position)) {
                    pool.set_change_flags(id, solver_core::ChangeFlags::DELETED);
                }
            }
        }
    }
}
