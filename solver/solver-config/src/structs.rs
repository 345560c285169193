//! Configuration struct definitions.
//!
//! All config structs with serde deserialization support and default values.

use serde::Deserialize;

use solver_core::SolverParameters;

use crate::defaults;

// Serde default functions (required for #[serde(default = "...")])

fn d_discount() -> f64 {
    defaults::DISCOUNT
}
fn d_map_path() -> String {
    defaults::MAP_PATH.into()
}
fn d_move_cost() -> f64 {
    defaults::MOVE_COST
}
fn d_tag_reward() -> f64 {
    defaults::TAG_REWARD
}
fn d_failed_tag_penalty() -> f64 {
    defaults::FAILED_TAG_PENALTY
}
fn d_opponent_stay() -> f64 {
    defaults::OPPONENT_STAY_PROBABILITY
}
fn d_n_particles() -> usize {
    defaults::N_PARTICLES
}
fn d_max_trials() -> u32 {
    defaults::MAX_TRIALS
}
fn d_max_nn_comparisons() -> usize {
    defaults::MAX_NN_COMPARISONS
}
fn d_ucb_coefficient() -> f64 {
    defaults::UCB_COEFFICIENT
}
fn d_heuristic_explore() -> f64 {
    defaults::HEURISTIC_EXPLORE_COEFFICIENT
}
fn d_depth_threshold() -> f64 {
    defaults::DEPTH_THRESHOLD
}
fn d_nn_distance_threshold() -> f64 {
    defaults::NN_DISTANCE_THRESHOLD
}

/// The full solver configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverConfig {
    #[serde(default)]
    pub problem: ProblemConfig,
    #[serde(default)]
    pub tag: TagConfig,
    #[serde(default)]
    pub sbt: SbtConfig,
}

/// Problem-level settings shared by every model.
#[derive(Debug, Clone, Deserialize)]
pub struct ProblemConfig {
    #[serde(default = "d_discount")]
    pub discount: f64,

    #[serde(default = "d_map_path")]
    pub map_path: String,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            discount: d_discount(),
            map_path: d_map_path(),
        }
    }
}

/// Reward and dynamics constants of the Tag problem.
#[derive(Debug, Clone, Deserialize)]
pub struct TagConfig {
    #[serde(default = "d_move_cost")]
    pub move_cost: f64,

    #[serde(default = "d_tag_reward")]
    pub tag_reward: f64,

    #[serde(default = "d_failed_tag_penalty")]
    pub failed_tag_penalty: f64,

    #[serde(default = "d_opponent_stay")]
    pub opponent_stay_probability: f64,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            move_cost: d_move_cost(),
            tag_reward: d_tag_reward(),
            failed_tag_penalty: d_failed_tag_penalty(),
            opponent_stay_probability: d_opponent_stay(),
        }
    }
}

/// Search settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SbtConfig {
    #[serde(default = "d_n_particles")]
    pub n_particles: usize,

    #[serde(default = "d_max_trials")]
    pub max_trials: u32,

    #[serde(default = "d_max_nn_comparisons")]
    pub max_nn_comparisons: usize,

    #[serde(default = "d_ucb_coefficient")]
    pub ucb_coefficient: f64,

    #[serde(default = "d_heuristic_explore")]
    pub heuristic_explore_coefficient: f64,

    /// Discount cutoff: search stops at the depth where the accrued
    /// discount falls below this threshold.
    #[serde(default = "d_depth_threshold")]
    pub depth_threshold: f64,

    #[serde(default = "d_nn_distance_threshold")]
    pub nn_distance_threshold: f64,
}

impl Default for SbtConfig {
    fn default() -> Self {
        Self {
            n_particles: d_n_particles(),
            max_trials: d_max_trials(),
            max_nn_comparisons: d_max_nn_comparisons(),
            ucb_coefficient: d_ucb_coefficient(),
            heuristic_explore_coefficient: d_heuristic_explore(),
            depth_threshold: d_depth_threshold(),
            nn_distance_threshold: d_nn_distance_threshold(),
        }
    }
}

impl SbtConfig {
    /// Depth at which the accrued discount falls below the threshold.
    pub fn maximum_depth(&self, discount: f64) -> usize {
        if !(0.0..1.0).contains(&discount) || !(0.0..1.0).contains(&self.depth_threshold) {
            return 1;
        }
        (self.depth_threshold.ln() / discount.ln()).ceil().max(1.0) as usize
    }

    /// Bridge into the solver's parameter struct. Value bounds stay at
    /// their defaults; models overwrite them with problem-specific bounds.
    pub fn to_parameters(&self, discount: f64) -> SolverParameters {
        SolverParameters {
            discount,
            ucb_coefficient: self.ucb_coefficient,
            heuristic_explore_coefficient: self.heuristic_explore_coefficient,
            max_trials: self.max_trials,
            maximum_depth: self.maximum_depth(discount),
            max_nn_comparisons: self.max_nn_comparisons,
            max_nn_distance: self.nn_distance_threshold,
            n_particles: self.n_particles,
            ..SolverParameters::default()
        }
    }
}
