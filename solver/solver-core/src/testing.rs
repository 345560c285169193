//! A tiny deterministic line-world model for unit tests.

use std::convert::Infallible;

use rand_chacha::ChaCha20Rng;

use crate::model::{Model, SolverParameters, StepResult};
use crate::primitives::{PomdpObservation, PomdpState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineState(pub u32);

impl PomdpState for LineState {
    fn distance_to(&self, other: &Self) -> f64 {
        (self.0 as f64 - other.0 as f64).abs()
    }

    fn coordinates(&self) -> Vec<f64> {
        vec![self.0 as f64]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineAction {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineObservation(pub u32);

impl PomdpObservation for LineObservation {
    fn distance_to(&self, other: &Self) -> f64 {
        (self.0 as f64 - other.0 as f64).abs()
    }
}

/// Fully observable walk along 0..length with the goal at the right end.
/// Stepping onto the goal yields reward 1 and terminates; everything else
/// is deterministic, so dyadic discounts keep all arithmetic exact.
#[derive(Debug, Clone)]
pub struct LineModel {
    pub length: u32,
}

impl LineModel {
    pub fn new(length: u32) -> Self {
        Self { length }
    }

    fn goal(&self) -> u32 {
        self.length - 1
    }
}

impl Model for LineModel {
    type State = LineState;
    type Action = LineAction;
    type Observation = LineObservation;
    type TransitionParameters = ();
    type Error = Infallible;

    fn parameters(&self) -> SolverParameters {
        SolverParameters::for_testing()
            .with_discount(0.5)
            .with_value_bounds(0.0, 1.0)
    }

    fn all_actions(&self) -> Vec<LineAction> {
        vec![LineAction::Left, LineAction::Right]
    }

    fn sample_initial_state(&mut self, _rng: &mut ChaCha20Rng) -> LineState {
        LineState(0)
    }

    fn is_terminal(&self, state: &LineState) -> bool {
        state.0 == self.goal()
    }

    fn generate_step(
        &mut self,
        state: &LineState,
        action: &LineAction,
        _rng: &mut ChaCha20Rng,
    ) -> StepResult<Self> {
        // The goal absorbs.
        if state.0 == self.goal() {
            return StepResult {
                action: *action,
                transition_parameters: None,
                observation: LineObservation(state.0),
                reward: 0.0,
                next_state: *state,
                is_terminal: true,
            };
        }
        let next = match action {
            LineAction::Left => state.0.saturating_sub(1),
            LineAction::Right => (state.0 + 1).min(self.goal()),
        };
        let is_terminal = next == self.goal();
        StepResult {
            action: *action,
            transition_parameters: None,
            observation: LineObservation(next),
            reward: if is_terminal { 1.0 } else { 0.0 },
            next_state: LineState(next),
            is_terminal,
        }
    }

    fn heuristic_value(&self, state: &LineState) -> f64 {
        0.5_f64.powi((self.goal() - state.0.min(self.goal())) as i32)
    }

    fn default_value(&self) -> f64 {
        0.0
    }

    fn generate_particles(
        &mut self,
        _action: &LineAction,
        observation: &LineObservation,
        prior_particles: &[LineState],
        _rng: &mut ChaCha20Rng,
    ) -> Vec<LineState> {
        if prior_particles.is_empty() {
            return Vec::new();
        }
        vec![LineState(observation.0)]
    }

    fn generate_particles_uninformed(
        &mut self,
        _action: &LineAction,
        observation: &LineObservation,
        _rng: &mut ChaCha20Rng,
    ) -> Vec<LineState> {
        vec![LineState(observation.0)]
    }
}
