//! Swappable spatial index over interned state coordinates.
//!
//! Models use box queries to find the states affected by a change. The
//! reference implementation is a linear scan; a model wanting an R-tree (or
//! any other spatial structure) supplies its own through
//! `Model::create_state_index`.

use std::fmt::Debug;

use crate::ids::StateId;

/// Range-queryable index over state coordinate vectors.
pub trait StateIndex: Debug {
    /// Record a newly interned state at the given coordinates.
    fn insert(&mut self, id: StateId, point: &[f64]);

    /// All states whose coordinates fall inside the axis-aligned box
    /// `[lower, upper]` (inclusive). Unconstrained dimensions are passed as
    /// infinities.
    fn query_box(&self, lower: &[f64], upper: &[f64]) -> Vec<StateId>;
}

/// Linear-scan index. Adequate for the state counts the solver interns in
/// a single run; swappable for anything faster.
#[derive(Debug, Default)]
pub struct LinearStateIndex {
    points: Vec<(StateId, Vec<f64>)>,
}

impl LinearStateIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateIndex for LinearStateIndex {
    fn insert(&mut self, id: StateId, point: &[f64]) {
        self.points.push((id, point.to_vec()));
    }

    fn query_box(&self, lower: &[f64], upper: &[f64]) -> Vec<StateId> {
        self.points
            .iter()
            .filter(|(_, point)| {
                point.iter().enumerate().all(|(d, v)| {
                    lower.get(d).map_or(true, |lo| lo <= v)
                        && upper.get(d).map_or(true, |hi| v <= hi)
                })
            })
            .map(|(id, _)| *id)
            .collect()
    }
}
