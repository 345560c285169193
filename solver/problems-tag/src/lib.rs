//! Grid Tag pursuit POMDP
//!
//! A robot chases a fleeing opponent on a grid with walls. The robot sees
//! its own cell and whether the opponent shares it; tagging a co-located
//! opponent ends the episode with a reward, tagging thin air is penalized,
//! and every move costs a little. This crate is the in-repo reference
//! problem for the belief-tree solver.
//!
//! # Usage
//!
//! ```rust,ignore
//! use problems_tag::{TagModel, TagOptions};
//! use solver_core::SolverParameters;
//!
//! let map = "3 3\n...\n.X.\n...\n";
//! let model = TagModel::from_map_str(map, TagOptions::default(),
//!     SolverParameters::default()).unwrap();
//! ```
//!
//! Maps are plain text: a `rows cols` header, then one row per line with
//! `X` for walls and anything else for empty cells.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::{debug, warn};

use solver_config::SolverConfig;
use solver_core::{
    ChangeFlags, Model, PomdpObservation, PomdpState, SolverParameters, StatePool, StepResult,
};

/// Errors raised while loading Tag inputs.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed map: {0}")]
    MalformedMap(String),

    #[error("malformed changes file at line {line}: {reason}")]
    MalformedChanges { line: usize, reason: String },
}

/// A cell position, row-major from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridPosition {
    pub row: i64,
    pub col: i64,
}

impl GridPosition {
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    /// Manhattan distance.
    pub fn distance(&self, other: &Self) -> i64 {
        (self.row - other.row).abs() + (self.col - other.col).abs()
    }
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Hidden state: both positions plus whether the opponent has been tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagState {
    pub robot: GridPosition,
    pub opponent: GridPosition,
    pub tagged: bool,
}

impl PomdpState for TagState {
    fn distance_to(&self, other: &Self) -> f64 {
        (self.robot.distance(&other.robot)
            + self.opponent.distance(&other.opponent)
            + i64::from(self.tagged != other.tagged)) as f64
    }

    fn coordinates(&self) -> Vec<f64> {
        vec![
            self.robot.row as f64,
            self.robot.col as f64,
            self.opponent.row as f64,
            self.opponent.col as f64,
            f64::from(u8::from(self.tagged)),
        ]
    }
}

/// The five Tag actions, in the order untried actions are offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagAction {
    North,
    East,
    South,
    West,
    Tag,
}

impl TagAction {
    pub const ALL: [TagAction; 5] = [
        TagAction::North,
        TagAction::East,
        TagAction::South,
        TagAction::West,
        TagAction::Tag,
    ];
}

/// What the robot perceives: its own cell, and whether the opponent is in
/// the same cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagObservation {
    pub position: GridPosition,
    pub seen: bool,
}

impl PomdpObservation for TagObservation {
    fn distance_to(&self, other: &Self) -> f64 {
        (self.position.distance(&other.position) + i64::from(self.seen != other.seen)) as f64
    }
}

/// Record of how a sampled transition unfolded.
#[derive(Debug, Clone, Copy)]
pub struct TagTransition {
    pub opponent_stayed: bool,
}

/// Reward and dynamics constants.
#[derive(Debug, Clone)]
pub struct TagOptions {
    pub move_cost: f64,
    pub tag_reward: f64,
    pub failed_tag_penalty: f64,
    pub opponent_stay_probability: f64,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            move_cost: 1.0,
            tag_reward: 10.0,
            failed_tag_penalty: 10.0,
            opponent_stay_probability: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Empty,
    Wall,
}

/// One scheduled map edit: a rectangle of cells turning into walls.
#[derive(Debug, Clone, Copy)]
struct TagChange {
    min: GridPosition,
    max: GridPosition,
}

/// The Tag POMDP.
#[derive(Debug)]
pub struct TagModel {
    rows: i64,
    cols: i64,
    cells: Vec<Vec<Cell>>,
    empty_cells: Vec<GridPosition>,
    options: TagOptions,
    params: SolverParameters,
    changes: BTreeMap<u64, Vec<TagChange>>,
}

impl TagModel {
    /// Parse a map and build the model. The value bounds of `params` are
    /// overwritten with the bounds implied by the reward constants.
    pub fn from_map_str(
        map: &str,
        options: TagOptions,
        params: SolverParameters,
    ) -> Result<Self, TagError> {
        let mut lines = map.lines();
        let header = lines
            .next()
            .ok_or_else(|| TagError::MalformedMap("empty map".into()))?;
        let mut dims = header.split_whitespace();
        let rows: i64 = dims
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| TagError::MalformedMap("bad row count".into()))?;
        let cols: i64 = dims
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| TagError::MalformedMap("bad column count".into()))?;
        if rows <= 0 || cols <= 0 {
            return Err(TagError::MalformedMap(format!(
                "non-positive dimensions {rows} x {cols}"
            )));
        }

        let mut cells = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            let line = lines.next().ok_or_else(|| {
                TagError::MalformedMap(format!("missing row {row} of {rows}"))
            })?;
            if (line.chars().count() as i64) < cols {
                return Err(TagError::MalformedMap(format!(
                    "row {row} shorter than {cols} columns"
                )));
            }
            cells.push(
                line.chars()
                    .take(cols as usize)
                    .map(|c| if c == 'X' { Cell::Wall } else { Cell::Empty })
                    .collect(),
            );
        }

        let discount = params.discount;
        let min_value = -options.failed_tag_penalty / (1.0 - discount);
        let max_value = options.tag_reward;
        let params = params.with_value_bounds(min_value, max_value);

        let mut model = Self {
            rows,
            cols,
            cells,
            empty_cells: Vec::new(),
            options,
            params,
            changes: BTreeMap::new(),
        };
        model.rebuild_empty_cells();
        if model.empty_cells.is_empty() {
            return Err(TagError::MalformedMap("map has no empty cells".into()));
        }
        debug!(
            rows = model.rows,
            cols = model.cols,
            empty = model.empty_cells.len(),
            "constructed Tag model"
        );
        Ok(model)
    }

    /// Build the model from the central configuration, reading the map
    /// from `problem.map_path`.
    pub fn from_config(config: &SolverConfig) -> Result<Self, TagError> {
        let path = &config.problem.map_path;
        let map = std::fs::read_to_string(path).map_err(|source| TagError::Io {
            path: path.clone(),
            source,
        })?;
        let options = TagOptions {
            move_cost: config.tag.move_cost,
            tag_reward: config.tag.tag_reward,
            failed_tag_penalty: config.tag.failed_tag_penalty,
            opponent_stay_probability: config.tag.opponent_stay_probability,
        };
        let params = config.sbt.to_parameters(config.problem.discount);
        Self::from_map_str(&map, options, params)
    }

    pub fn options(&self) -> &TagOptions {
        &self.options
    }

    fn rebuild_empty_cells(&mut self) {
        self.empty_cells.clear();
        for row in 0..self.rows {
            for col in 0..self.cols {
                if self.cells[row as usize][col as usize] == Cell::Empty {
                    self.empty_cells.push(GridPosition::new(row, col));
                }
            }
        }
    }

    fn is_valid(&self, position: GridPosition) -> bool {
        position.row >= 0
            && position.row < self.rows
            && position.col >= 0
            && position.col < self.cols
            && self.cells[position.row as usize][position.col as usize] == Cell::Empty
    }

    /// Where a mover ends up: the adjacent cell for a movement action if it
    /// is on the map and not a wall, otherwise the current cell. `Tag` is
    /// not a move.
    fn moved_position(&self, from: GridPosition, action: TagAction) -> GridPosition {
        let candidate = match action {
            TagAction::North => GridPosition::new(from.row - 1, from.col),
            TagAction::East => GridPosition::new(from.row, from.col + 1),
            TagAction::South => GridPosition::new(from.row + 1, from.col),
            TagAction::West => GridPosition::new(from.row, from.col - 1),
            TagAction::Tag => from,
        };
        if self.is_valid(candidate) {
            candidate
        } else {
            from
        }
    }

    /// Candidate flight moves for the opponent, biased away from the
    /// robot. Moves away from the robot appear twice, so they are twice as
    /// likely when the opponent runs.
    fn opponent_actions(robot: GridPosition, opponent: GridPosition) -> Vec<TagAction> {
        let mut actions = Vec::with_capacity(4);
        if robot.row > opponent.row {
            actions.extend([TagAction::North, TagAction::North]);
        } else if robot.row < opponent.row {
            actions.extend([TagAction::South, TagAction::South]);
        } else {
            actions.extend([TagAction::North, TagAction::South]);
        }
        if robot.col > opponent.col {
            actions.extend([TagAction::West, TagAction::West]);
        } else if robot.col < opponent.col {
            actions.extend([TagAction::East, TagAction::East]);
        } else {
            actions.extend([TagAction::East, TagAction::West]);
        }
        actions
    }

    /// Sample the opponent's move. Returns the new position and whether
    /// the opponent stayed put.
    fn move_opponent(
        &self,
        robot: GridPosition,
        opponent: GridPosition,
        rng: &mut ChaCha20Rng,
    ) -> (GridPosition, bool) {
        if rng.gen::<f64>() < self.options.opponent_stay_probability {
            return (opponent, true);
        }
        let actions = Self::opponent_actions(robot, opponent);
        let action = actions[rng.gen_range(0..actions.len())];
        let moved = self.moved_position(opponent, action);
        (moved, moved == opponent)
    }

    fn reward_for(&self, state: &TagState, action: &TagAction) -> f64 {
        match action {
            TagAction::Tag if state.robot == state.opponent => self.options.tag_reward,
            TagAction::Tag => -self.options.failed_tag_penalty,
            _ => -self.options.move_cost,
        }
    }

    fn make_observation(state: &TagState) -> TagObservation {
        TagObservation {
            position: state.robot,
            seen: state.robot == state.opponent,
        }
    }

    fn sample_uniform_state(&self, rng: &mut ChaCha20Rng) -> TagState {
        let robot = self.empty_cells[rng.gen_range(0..self.empty_cells.len())];
        let opponent = self.empty_cells[rng.gen_range(0..self.empty_cells.len())];
        TagState {
            robot,
            opponent,
            tagged: false,
        }
    }
}

impl Model for TagModel {
    type State = TagState;
    type Action = TagAction;
    type Observation = TagObservation;
    type TransitionParameters = TagTransition;
    type Error = TagError;

    fn parameters(&self) -> SolverParameters {
        self.params.clone()
    }

    fn all_actions(&self) -> Vec<TagAction> {
        TagAction::ALL.to_vec()
    }

    fn sample_initial_state(&mut self, rng: &mut ChaCha20Rng) -> TagState {
        self.sample_uniform_state(rng)
    }

    fn is_terminal(&self, state: &TagState) -> bool {
        state.tagged
    }

    fn generate_step(
        &mut self,
        state: &TagState,
        action: &TagAction,
        rng: &mut ChaCha20Rng,
    ) -> StepResult<Self> {
        let reward = self.reward_for(state, action);

        let (next_state, transition) = if state.tagged {
            (*state, TagTransition { opponent_stayed: true })
        } else if *action == TagAction::Tag && state.robot == state.opponent {
            (
                TagState {
                    tagged: true,
                    ..*state
                },
                TagTransition { opponent_stayed: true },
            )
        } else {
            let (opponent, opponent_stayed) = self.move_opponent(state.robot, state.opponent, rng);
            let robot = self.moved_position(state.robot, *action);
            (
                TagState {
                    robot,
                    opponent,
                    tagged: false,
                },
                TagTransition { opponent_stayed },
            )
        };

        StepResult {
            action: *action,
            transition_parameters: Some(transition),
            observation: Self::make_observation(&next_state),
            reward,
            next_state,
            is_terminal: next_state.tagged,
        }
    }

    fn heuristic_value(&self, state: &TagState) -> f64 {
        if state.tagged {
            return 0.0;
        }
        let discount = self.params.discount;
        let distance = state.robot.distance(&state.opponent);
        let n_steps = if distance == 0 {
            0.0
        } else {
            distance as f64 / self.options.opponent_stay_probability
        };
        let final_discount = discount.powf(n_steps);
        -self.options.move_cost * (1.0 - final_discount) / (1.0 - discount)
            + final_discount * self.options.tag_reward
    }

    fn default_value(&self) -> f64 {
        self.params.min_value
    }

    fn generate_particles(
        &mut self,
        action: &TagAction,
        observation: &TagObservation,
        prior_particles: &[TagState],
        rng: &mut ChaCha20Rng,
    ) -> Vec<TagState> {
        if observation.seen {
            return vec![TagState {
                robot: observation.position,
                opponent: observation.position,
                tagged: *action == TagAction::Tag,
            }];
        }

        // Weight successor states by how many enumerated opponent flights
        // reach them from prior particles consistent with the observation.
        let mut weights: BTreeMap<TagState, f64> = BTreeMap::new();
        let mut total_weight = 0.0;
        for prior in prior_particles {
            if self.moved_position(prior.robot, *action) != observation.position {
                continue;
            }
            let flights = Self::opponent_actions(prior.robot, prior.opponent);
            let feasible: Vec<GridPosition> = flights
                .iter()
                .map(|&a| self.moved_position(prior.opponent, a))
                .filter(|&p| p != observation.position)
                .collect();
            if feasible.is_empty() {
                continue;
            }
            let factor = 1.0 / feasible.len() as f64;
            for opponent in feasible {
                let successor = TagState {
                    robot: observation.position,
                    opponent,
                    tagged: false,
                };
                *weights.entry(successor).or_insert(0.0) += factor;
                total_weight += factor;
            }
        }
        if total_weight == 0.0 {
            return Vec::new();
        }

        // Resample proportionally to the accumulated weights.
        let scale = self.params.n_particles as f64 / total_weight;
        let mut particles = Vec::new();
        for (state, weight) in weights {
            let proportion = weight * scale;
            let mut count = proportion.floor() as usize;
            if rng.gen::<f64>() <= proportion - count as f64 {
                count += 1;
            }
            particles.extend(std::iter::repeat(state).take(count));
        }
        particles
    }

    fn generate_particles_uninformed(
        &mut self,
        action: &TagAction,
        observation: &TagObservation,
        rng: &mut ChaCha20Rng,
    ) -> Vec<TagState> {
        if observation.seen {
            return vec![TagState {
                robot: observation.position,
                opponent: observation.position,
                tagged: *action == TagAction::Tag,
            }];
        }

        // Rejection-sample uniform predecessors until enough successors
        // reproduce the observation.
        let target = self.params.n_particles;
        let mut particles = Vec::with_capacity(target);
        let max_attempts = target.saturating_mul(200).max(1000);
        for _ in 0..max_attempts {
            if particles.len() >= target {
                break;
            }
            let state = self.sample_uniform_state(rng);
            let result = self.generate_step(&state, action, rng);
            if result.observation == *observation {
                particles.push(result.next_state);
            }
        }
        if particles.is_empty() {
            warn!(
                observation = ?observation,
                "rejection sampling produced no particles"
            );
        }
        particles
    }

    fn render_state(&self, state: &TagState) -> String {
        let mut out = String::new();
        for row in 0..self.rows {
            for col in 0..self.cols {
                let here = GridPosition::new(row, col);
                let c = if here == state.robot && here == state.opponent {
                    '#'
                } else if here == state.robot {
                    'r'
                } else if here == state.opponent {
                    'o'
                } else if self.cells[row as usize][col as usize] == Cell::Wall {
                    'X'
                } else {
                    '.'
                };
                out.push(c);
            }
            out.push('\n');
        }
        out
    }

    fn load_changes(&mut self, path: &Path) -> Result<Vec<u64>, TagError> {
        let text = std::fs::read_to_string(path).map_err(|source| TagError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut lines = text.lines().enumerate();
        while let Some((line_no, line)) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }
            // Header: `<tag> <time> <tag> <nChanges>`.
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let (time, n_changes) = match tokens.as_slice() {
                [_, time, _, count] => {
                    let time = time.parse::<u64>().map_err(|_| TagError::MalformedChanges {
                        line: line_no + 1,
                        reason: format!("bad change time {time:?}"),
                    })?;
                    let count =
                        count.parse::<usize>().map_err(|_| TagError::MalformedChanges {
                            line: line_no + 1,
                            reason: format!("bad change count {count:?}"),
                        })?;
                    (time, count)
                }
                _ => {
                    return Err(TagError::MalformedChanges {
                        line: line_no + 1,
                        reason: "expected `<tag> <time> <tag> <nChanges>`".into(),
                    })
                }
            };

            let block = self.changes.entry(time).or_default();
            for _ in 0..n_changes {
                let (line_no, line) = lines.next().ok_or_else(|| TagError::MalformedChanges {
                    line: line_no + 1,
                    reason: "truncated change block".into(),
                })?;
                let tokens: Vec<&str> = line.split_whitespace().collect();
                match tokens.as_slice() {
                    ["ADD", "Obstacle", _id, r0, c0, r1, c1] => {
                        let parse = |t: &str| {
                            t.parse::<i64>().map_err(|_| TagError::MalformedChanges {
                                line: line_no + 1,
                                reason: format!("bad rectangle coordinate {t:?}"),
                            })
                        };
                        let min = GridPosition::new(parse(r0)?, parse(c0)?);
                        let max = GridPosition::new(parse(r1)?, parse(c1)?);
                        block.push(TagChange { min, max });
                    }
                    [op, ..] if *op != "ADD" => {
                        warn!(line = line_no + 1, operation = %op, "skipping unknown change operation");
                    }
                    [_, kind, ..] => {
                        warn!(line = line_no + 1, kind = %kind, "skipping unknown area type");
                    }
                    [] => {
                        return Err(TagError::MalformedChanges {
                            line: line_no + 1,
                            reason: "empty change line".into(),
                        })
                    }
                    [_] => {
                        warn!(line = line_no + 1, "skipping malformed change line");
                    }
                }
            }
        }
        Ok(self.changes.keys().copied().collect())
    }

    fn update(&mut self, time: u64, pool: &mut StatePool<Self>) {
        let Some(changes) = self.changes.get(&time).cloned() else {
            return;
        };
        for change in changes {
            debug!(
                min = %change.min,
                max = %change.max,
                "adding obstacle"
            );
            for row in change.min.row..=change.max.row {
                for col in change.min.col..=change.max.col {
                    if row >= 0 && row < self.rows && col >= 0 && col < self.cols {
                        self.cells[row as usize][col as usize] = Cell::Wall;
                    }
                }
            }

            // Any interned state standing in the rectangle is gone. State
            // coordinates are [robot.row, robot.col, opp.row, opp.col, tagged].
            let inf = f64::INFINITY;
            let (r0, c0) = (change.min.row as f64, change.min.col as f64);
            let (r1, c1) = (change.max.row as f64, change.max.col as f64);
            let robot_hits = pool.query_box(&[r0, c0, -inf, -inf, -inf], &[r1, c1, inf, inf, inf]);
            let opponent_hits =
                pool.query_box(&[-inf, -inf, r0, c0, -inf], &[inf, inf, r1, c1, inf]);
            for id in robot_hits.into_iter().chain(opponent_hits) {
                pool.set_change_flags(id, ChangeFlags::DELETED);
            }
        }
        self.rebuild_empty_cells();
    }
}

#[cfg(test)]
mod tests;
