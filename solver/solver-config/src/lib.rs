//! Central configuration for the belief-tree solver.
//!
//! Configuration is loaded from a `solver.toml` file with per-field
//! defaults and environment-variable overrides, so partial files and bare
//! environments both work:
//!
//! ```toml
//! [problem]
//! discount = 0.95
//! map_path = "maps/default.txt"
//!
//! [sbt]
//! max_trials = 500
//! ```
//!
//! Environment overrides follow the pattern `SOLVER_<SECTION>_<KEY>`,
//! e.g. `SOLVER_SBT_MAX_TRIALS=100`.

pub mod defaults;
pub mod loader;
pub mod structs;

pub use loader::{load_config, load_from_path, CONFIG_SEARCH_PATHS};
pub use structs::{ProblemConfig, SbtConfig, SolverConfig, TagConfig};
