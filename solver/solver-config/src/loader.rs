//! Configuration loading logic.
//!
//! Handles loading config from files and applying environment variable
//! overrides.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::SolverConfig;

/// Standard locations to search for solver.toml
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "solver.toml",    // Current directory
    "../solver.toml", // Parent directory (when running from a subdirectory)
    "/etc/solver/solver.toml",
];

/// Load the solver configuration from solver.toml.
///
/// Searches in the following order:
/// 1. Path specified by the SOLVER_CONFIG environment variable
/// 2. Current directory (solver.toml)
/// 3. Parent directory (../solver.toml)
/// 4. /etc/solver/solver.toml
///
/// After loading, environment variable overrides are applied.
pub fn load_config() -> SolverConfig {
    if let Ok(path) = std::env::var("SOLVER_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("Loading config from SOLVER_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "SOLVER_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading config from {}", path.display());
            return load_from_path(&path);
        }
    }

    debug!("No solver.toml found, using built-in defaults");
    apply_env_overrides(SolverConfig::default())
}

/// Load configuration from a specific path.
pub fn load_from_path(path: &PathBuf) -> SolverConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(SolverConfig::default())
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(SolverConfig::default())
        }
    }
}

/// Macro to reduce env override boilerplate
macro_rules! env_override {
    // String field
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v;
        }
    };
    // Parseable field (u32, usize, f64, etc.)
    ($config:expr, $section:ident . $field:ident, $key:expr, parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
}

/// Apply environment variable overrides to a configuration.
///
/// Environment variables follow the pattern: SOLVER_<SECTION>_<KEY>
pub fn apply_env_overrides(mut config: SolverConfig) -> SolverConfig {
    // Problem
    env_override!(config, problem.discount, "SOLVER_PROBLEM_DISCOUNT", parse);
    env_override!(config, problem.map_path, "SOLVER_PROBLEM_MAP_PATH");

    // Tag
    env_override!(config, tag.move_cost, "SOLVER_TAG_MOVE_COST", parse);
    env_override!(config, tag.tag_reward, "SOLVER_TAG_TAG_REWARD", parse);
    env_override!(
        config,
        tag.failed_tag_penalty,
        "SOLVER_TAG_FAILED_TAG_PENALTY",
        parse
    );
    env_override!(
        config,
        tag.opponent_stay_probability,
        "SOLVER_TAG_OPPONENT_STAY_PROBABILITY",
        parse
    );

    // Search
    env_override!(config, sbt.n_particles, "SOLVER_SBT_N_PARTICLES", parse);
    env_override!(config, sbt.max_trials, "SOLVER_SBT_MAX_TRIALS", parse);
    env_override!(
        config,
        sbt.max_nn_comparisons,
        "SOLVER_SBT_MAX_NN_COMPARISONS",
        parse
    );
    env_override!(
        config,
        sbt.ucb_coefficient,
        "SOLVER_SBT_UCB_COEFFICIENT",
        parse
    );
    env_override!(
        config,
        sbt.heuristic_explore_coefficient,
        "SOLVER_SBT_HEURISTIC_EXPLORE_COEFFICIENT",
        parse
    );
    env_override!(
        config,
        sbt.depth_threshold,
        "SOLVER_SBT_DEPTH_THRESHOLD",
        parse
    );
    env_override!(
        config,
        sbt.nn_distance_threshold,
        "SOLVER_SBT_NN_DISTANCE_THRESHOLD",
        parse
    );

    config
}
