//! Default configuration values.
//!
//! Single source of truth for every default used across the solver
//! workspace.

// Problem defaults
pub const DISCOUNT: f64 = 0.95;
pub const MAP_PATH: &str = "maps/default.txt";

// Tag defaults
pub const MOVE_COST: f64 = 1.0;
pub const TAG_REWARD: f64 = 10.0;
pub const FAILED_TAG_PENALTY: f64 = 10.0;
pub const OPPONENT_STAY_PROBABILITY: f64 = 0.2;

// Search defaults
pub const N_PARTICLES: usize = 1000;
pub const MAX_TRIALS: u32 = 500;
pub const MAX_NN_COMPARISONS: usize = 1000;
pub const UCB_COEFFICIENT: f64 = 200.0;
pub const HEURISTIC_EXPLORE_COEFFICIENT: f64 = 0.2;
pub const DEPTH_THRESHOLD: f64 = 0.01;
pub const NN_DISTANCE_THRESHOLD: f64 = 1.0;
