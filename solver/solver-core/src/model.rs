//! The black-box model capability consumed by the solver.
//!
//! A `Model` is a generative POMDP simulator: it samples initial states,
//! steps state/action pairs stochastically, scores leaves heuristically,
//! replenishes particles, and — when its dynamics change mid-run — flags
//! the affected interned states through the state pool.

use std::hash::Hash;
use std::path::Path;
use std::{error, fmt};

use rand_chacha::ChaCha20Rng;

use crate::corrector::{HistoryCorrector, ReplayCorrector};
use crate::index::{LinearStateIndex, StateIndex};
use crate::pool::StatePool;
use crate::primitives::{PomdpObservation, PomdpState};

/// Result of a single simulated step.
pub struct StepResult<M: Model> {
    /// The action that was executed (echoed back by the model).
    pub action: M::Action,

    /// Model-specific parameters of the sampled transition, if any.
    pub transition_parameters: Option<M::TransitionParameters>,

    /// The observation received after the transition.
    pub observation: M::Observation,

    /// Immediate reward for the step.
    pub reward: f64,

    /// The successor state.
    pub next_state: M::State,

    /// Whether the successor state is terminal.
    pub is_terminal: bool,
}

impl<M: Model> Clone for StepResult<M> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            transition_parameters: self.transition_parameters.clone(),
            observation: self.observation.clone(),
            reward: self.reward,
            next_state: self.next_state.clone(),
            is_terminal: self.is_terminal,
        }
    }
}

impl<M: Model> fmt::Debug for StepResult<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepResult")
            .field("action", &self.action)
            .field("observation", &self.observation)
            .field("reward", &self.reward)
            .field("next_state", &self.next_state)
            .field("is_terminal", &self.is_terminal)
            .finish()
    }
}

/// How the observation mapping groups observations into child belief nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObservationResolution {
    /// Enumerated observations, matched by equality.
    Exact,
    /// Continuous observations, matched to the first child within
    /// `max_distance` in creation order.
    Nearest { max_distance: f64 },
}

/// Search parameters supplied by the model.
#[derive(Debug, Clone)]
pub struct SolverParameters {
    /// POMDP discount factor, in (0, 1).
    pub discount: f64,

    /// Exploration coefficient `c` in the UCB action score
    /// `Q(a) + c * sqrt(ln N / n(a))`. Scales with the reward magnitude
    /// since Q-values are not normalized.
    pub ucb_coefficient: f64,

    /// Exploration coefficient of the adaptive rollout-heuristic mixing;
    /// also its uniform-exploration floor (each heuristic keeps at least
    /// `eta / 2` unnormalized weight).
    pub heuristic_explore_coefficient: f64,

    /// Number of search trials per improvement call.
    pub max_trials: u32,

    /// Maximum absolute depth of any history entry.
    pub maximum_depth: usize,

    /// Maximum number of belief nodes scanned per nearest-neighbor lookup.
    pub max_nn_comparisons: usize,

    /// Largest acceptable inter-belief distance for a nearest neighbor;
    /// 0 disables the policy rollout entirely.
    pub max_nn_distance: f64,

    /// Target particle count when replenishing a depleted belief.
    pub n_particles: usize,

    /// Lower bound on achievable values, for normalization.
    pub min_value: f64,

    /// Upper bound on achievable values; normalizes the root improvement
    /// in the heuristic mixing update. Must be positive.
    pub max_value: f64,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            discount: 0.95,
            ucb_coefficient: 2.0,
            heuristic_explore_coefficient: 0.2,
            max_trials: 500,
            maximum_depth: 90,
            max_nn_comparisons: 1000,
            max_nn_distance: 1.0,
            n_particles: 1000,
            min_value: 0.0,
            max_value: 1.0,
        }
    }
}

impl SolverParameters {
    /// Create a fast configuration for tests.
    pub fn for_testing() -> Self {
        Self {
            max_trials: 50,
            maximum_depth: 10,
            n_particles: 100,
            max_nn_comparisons: 50,
            ..Self::default()
        }
    }

    /// Builder pattern: set the discount factor.
    pub fn with_discount(mut self, discount: f64) -> Self {
        self.discount = discount;
        self
    }

    /// Builder pattern: set the UCB exploration coefficient.
    pub fn with_ucb_coefficient(mut self, c: f64) -> Self {
        self.ucb_coefficient = c;
        self
    }

    /// Builder pattern: set the number of trials per improvement call.
    pub fn with_max_trials(mut self, trials: u32) -> Self {
        self.max_trials = trials;
        self
    }

    /// Builder pattern: set the depth cutoff.
    pub fn with_maximum_depth(mut self, depth: usize) -> Self {
        self.maximum_depth = depth;
        self
    }

    /// Builder pattern: set the nearest-neighbor distance threshold.
    pub fn with_max_nn_distance(mut self, distance: f64) -> Self {
        self.max_nn_distance = distance;
        self
    }

    /// Builder pattern: set the replenishment particle target.
    pub fn with_n_particles(mut self, n: usize) -> Self {
        self.n_particles = n;
        self
    }

    /// Builder pattern: set the achievable value bounds.
    pub fn with_value_bounds(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }
}

/// A generative POMDP simulator.
///
/// The solver depends only on this capability set; concrete problems
/// implement it with their own state, action, and observation types.
/// `'static` keeps the model usable behind the boxed factories it hands
/// out (state index, history corrector).
pub trait Model: Sized + 'static {
    /// Hidden environment state.
    type State: PomdpState;

    /// Agent action. The model declares a finite enumerated action set.
    type Action: Clone + fmt::Debug + Eq + Hash;

    /// Observation emitted after each transition.
    type Observation: PomdpObservation;

    /// Model-specific record of a sampled transition.
    type TransitionParameters: Clone + fmt::Debug;

    /// Error produced when loading model inputs (change files, maps).
    type Error: error::Error + Send + Sync + 'static;

    /// Search parameters for this problem instance.
    fn parameters(&self) -> SolverParameters;

    /// The full action set, in the order action mappings should offer
    /// untried actions.
    fn all_actions(&self) -> Vec<Self::Action>;

    /// How child belief nodes are keyed by observation.
    fn observation_resolution(&self) -> ObservationResolution {
        ObservationResolution::Exact
    }

    /// Sample a state from the initial belief.
    fn sample_initial_state(&mut self, rng: &mut ChaCha20Rng) -> Self::State;

    /// Whether the given state is terminal.
    fn is_terminal(&self, state: &Self::State) -> bool;

    /// Sample one step of the dynamics. Stochastic; repeated calls with the
    /// same inputs may differ.
    fn generate_step(
        &mut self,
        state: &Self::State,
        action: &Self::Action,
        rng: &mut ChaCha20Rng,
    ) -> StepResult<Self>;

    /// Rough value estimate for a state, used when rollouts bottom out
    /// without policy information.
    fn heuristic_value(&self, state: &Self::State) -> f64;

    /// Conservative lower bound used for freshly generated particles.
    fn default_value(&self) -> f64;

    /// Generate successor particles consistent with `(action, observation)`
    /// given the previous belief's particles. May return an empty vector
    /// when the prior is incompatible with the observation.
    fn generate_particles(
        &mut self,
        action: &Self::Action,
        observation: &Self::Observation,
        prior_particles: &[Self::State],
        rng: &mut ChaCha20Rng,
    ) -> Vec<Self::State>;

    /// Generate successor particles from an uninformed prior. Fallback for
    /// when [`Model::generate_particles`] comes up empty.
    fn generate_particles_uninformed(
        &mut self,
        action: &Self::Action,
        observation: &Self::Observation,
        rng: &mut ChaCha20Rng,
    ) -> Vec<Self::State>;

    /// Human-readable rendering of a state for diagnostics.
    fn render_state(&self, state: &Self::State) -> String {
        format!("{state:?}")
    }

    /// Create the spatial index backing the state pool.
    fn create_state_index(&self) -> Box<dyn StateIndex> {
        Box::new(LinearStateIndex::new())
    }

    /// Create the history corrector used after model changes.
    fn create_history_corrector(&self) -> Box<dyn HistoryCorrector<Self>> {
        Box::new(ReplayCorrector)
    }

    /// Load scheduled model changes from a file, returning the sorted list
    /// of time steps at which changes occur.
    fn load_changes(&mut self, _path: &Path) -> Result<Vec<u64>, Self::Error> {
        Ok(Vec::new())
    }

    /// Apply the changes scheduled for `time`: mutate the model's own
    /// dynamics and flag every affected interned state in the pool.
    fn update(&mut self, _time: u64, _pool: &mut StatePool<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let params = SolverParameters::default();
        assert!((params.discount - 0.95).abs() < 1e-12);
        assert_eq!(params.max_trials, 500);
        assert_eq!(params.maximum_depth, 90);
    }

    #[test]
    fn test_builder_pattern() {
        let params = SolverParameters::default()
            .with_discount(0.5)
            .with_max_trials(10)
            .with_value_bounds(-200.0, 10.0);

        assert!((params.discount - 0.5).abs() < 1e-12);
        assert_eq!(params.max_trials, 10);
        assert!((params.min_value - (-200.0)).abs() < 1e-12);
        assert!((params.max_value - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_testing_preset_is_small() {
        let params = SolverParameters::for_testing();
        assert!(params.max_trials <= 50);
        assert!(params.maximum_depth <= 10);
    }
}
