//! Action and observation mappings of a belief node.
//!
//! The action mapping carries per-action visit statistics and the
//! round-robin queue of untried actions; each action entry owns the
//! observation mapping that keys its child belief nodes. Observation
//! mappings come in two shapes: enumerated (matched by equality) and
//! approximate (matched to the nearest child within a distance threshold).

use std::collections::{HashMap, VecDeque};

use solver_core::{Model, NodeId, ObservationResolution, PomdpObservation};

/// Statistics and children for one action of a belief node.
#[derive(Debug)]
pub struct ActionEntry<M: Model> {
    pub action: M::Action,

    /// Number of backed-up trials through this action.
    pub visits: i64,

    /// Sum of backed-up discounted returns. `mean_q` is undefined until
    /// the first visit.
    pub total_q: f64,

    /// Whether the action is currently admissible.
    pub legal: bool,

    /// Child belief nodes keyed by observation.
    pub children: ObservationMapping<M>,
}

impl<M: Model> ActionEntry<M> {
    /// Mean backed-up return; 0 before the first visit.
    #[inline]
    pub fn mean_q(&self) -> f64 {
        if self.visits <= 0 {
            0.0
        } else {
            self.total_q / self.visits as f64
        }
    }
}

/// Per-node action statistics over the model's enumerated action set.
#[derive(Debug)]
pub struct ActionMapping<M: Model> {
    entries: Vec<ActionEntry<M>>,
    by_action: HashMap<M::Action, usize>,
    untried: VecDeque<usize>,
    total_visits: i64,
}

impl<M: Model> ActionMapping<M> {
    /// Build the mapping over the full action set, in the order untried
    /// actions should be offered.
    pub fn new(actions: Vec<M::Action>, resolution: ObservationResolution) -> Self {
        let by_action = actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), i))
            .collect();
        let untried = (0..actions.len()).collect();
        let entries = actions
            .into_iter()
            .map(|action| ActionEntry {
                action,
                visits: 0,
                total_q: 0.0,
                legal: true,
                children: ObservationMapping::new(resolution),
            })
            .collect();
        Self {
            entries,
            by_action,
            untried,
            total_visits: 0,
        }
    }

    #[inline]
    pub fn has_action_to_try(&self) -> bool {
        !self.untried.is_empty()
    }

    /// Hand out the next untried action. Each action is offered exactly
    /// once over the node's lifetime.
    pub fn next_action_to_try(&mut self) -> Option<M::Action> {
        self.untried
            .pop_front()
            .map(|i| self.entries[i].action.clone())
    }

    /// UCB action selection over the tried, legal actions. Ties break
    /// toward the earlier action in declared order.
    pub fn search_action(&self, ucb_coefficient: f64) -> Option<M::Action> {
        let total = self.total_visits.max(1) as f64;
        let log_total = total.ln();
        let mut best: Option<(&ActionEntry<M>, f64)> = None;
        for entry in &self.entries {
            if !entry.legal || entry.visits == 0 {
                continue;
            }
            let score =
                entry.mean_q() + ucb_coefficient * (log_total / entry.visits as f64).sqrt();
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((entry, score));
            }
        }
        best.map(|(entry, _)| entry.action.clone())
    }

    /// Greedy argmax of mean Q over the tried, legal actions.
    pub fn best_entry(&self) -> Option<&ActionEntry<M>> {
        let mut best: Option<&ActionEntry<M>> = None;
        for entry in &self.entries {
            if !entry.legal || entry.visits == 0 {
                continue;
            }
            if best.map_or(true, |b| entry.mean_q() > b.mean_q()) {
                best = Some(entry);
            }
        }
        best
    }

    /// O(1) running-statistics update: add `delta_total` to the Q-sum and
    /// `delta_count` to the visit count of `action`.
    pub fn update_q(&mut self, action: &M::Action, delta_total: f64, delta_count: i64) {
        let idx = self.by_action[action];
        let entry = &mut self.entries[idx];
        entry.total_q += delta_total;
        entry.visits += delta_count;
        self.total_visits += delta_count;
    }

    /// Mark an action (il)legal for UCB and greedy selection.
    pub fn set_legal(&mut self, action: &M::Action, legal: bool) {
        let idx = self.by_action[action];
        self.entries[idx].legal = legal;
    }

    pub fn entry(&self, action: &M::Action) -> Option<&ActionEntry<M>> {
        self.by_action.get(action).map(|&i| &self.entries[i])
    }

    pub fn entry_mut(&mut self, action: &M::Action) -> Option<&mut ActionEntry<M>> {
        self.by_action.get(action).copied().map(|i| &mut self.entries[i])
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActionEntry<M>> {
        self.entries.iter()
    }

    /// Total visit count across all actions.
    #[inline]
    pub fn total_visits(&self) -> i64 {
        self.total_visits
    }
}

/// Observation-keyed children of one action.
#[derive(Debug)]
pub struct ObservationMapping<M: Model> {
    resolution: ObservationResolution,
    children: Vec<(M::Observation, NodeId)>,
}

impl<M: Model> ObservationMapping<M> {
    pub fn new(resolution: ObservationResolution) -> Self {
        Self {
            resolution,
            children: Vec::new(),
        }
    }

    /// Resolve an observation to an existing child.
    ///
    /// Enumerated mappings match by equality. Approximate mappings return
    /// the nearest child within the distance threshold; equidistant
    /// candidates resolve to the first-created child, so matching is
    /// deterministic for a fixed tree.
    pub fn get(&self, observation: &M::Observation) -> Option<NodeId> {
        match self.resolution {
            ObservationResolution::Exact => self
                .children
                .iter()
                .find(|(o, _)| o == observation)
                .map(|(_, id)| *id),
            ObservationResolution::Nearest { max_distance } => {
                let mut best: Option<(f64, NodeId)> = None;
                for (o, id) in &self.children {
                    let d = o.distance_to(observation);
                    if best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, *id));
                    }
                }
                best.filter(|&(d, _)| d <= max_distance).map(|(_, id)| id)
            }
        }
    }

    /// Record a new child under its representative observation. The caller
    /// checks `get` first; insertion is the only mutating operation.
    pub fn insert(&mut self, observation: M::Observation, node: NodeId) {
        self.children.push((observation, node));
    }

    pub fn children(&self) -> impl Iterator<Item = (&M::Observation, NodeId)> {
        self.children.iter().map(|(o, id)| (o, *id))
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ChainAction, ChainModel, ChainObservation};

    fn mapping() -> ActionMapping<ChainModel> {
        ActionMapping::new(
            vec![ChainAction::Left, ChainAction::Right],
            ObservationResolution::Exact,
        )
    }

    #[test]
    fn test_every_action_offered_exactly_once() {
        let mut m = mapping();
        let mut offered = Vec::new();
        while m.has_action_to_try() {
            offered.push(m.next_action_to_try().unwrap());
        }
        assert_eq!(offered, vec![ChainAction::Left, ChainAction::Right]);
        assert!(m.next_action_to_try().is_none());
    }

    #[test]
    fn test_search_action_requires_visits() {
        let m = mapping();
        assert!(m.search_action(2.0).is_none());
    }

    #[test]
    fn test_ucb_prefers_undervisited() {
        let mut m = mapping();
        m.update_q(&ChainAction::Left, 10.0, 10); // mean 1.0, heavily visited
        m.update_q(&ChainAction::Right, 0.9, 1); // mean 0.9, one visit

        // With a large exploration coefficient the single-visit action wins.
        assert_eq!(m.search_action(10.0), Some(ChainAction::Right));
        // With no exploration bonus the greedy action wins.
        assert_eq!(m.search_action(0.0), Some(ChainAction::Left));
    }

    #[test]
    fn test_ucb_tie_breaks_toward_declared_order() {
        let mut m = mapping();
        m.update_q(&ChainAction::Left, 1.0, 1);
        m.update_q(&ChainAction::Right, 1.0, 1);
        assert_eq!(m.search_action(1.0), Some(ChainAction::Left));
    }

    #[test]
    fn test_update_q_accounting() {
        let mut m = mapping();
        m.update_q(&ChainAction::Left, 3.0, 1);
        m.update_q(&ChainAction::Left, 5.0, 1);
        m.update_q(&ChainAction::Left, -2.0, 0); // delta-only rewrite

        let entry = m.entry(&ChainAction::Left).unwrap();
        assert_eq!(entry.visits, 2);
        assert!((entry.total_q - 6.0).abs() < 1e-12);
        assert!((entry.mean_q() - 3.0).abs() < 1e-12);
        assert_eq!(m.total_visits(), 2);
    }

    #[test]
    fn test_illegal_actions_are_skipped() {
        let mut m = mapping();
        m.update_q(&ChainAction::Left, 5.0, 1);
        m.update_q(&ChainAction::Right, 1.0, 1);
        m.set_legal(&ChainAction::Left, false);

        assert_eq!(m.search_action(0.0), Some(ChainAction::Right));
        assert_eq!(
            m.best_entry().map(|e| e.action),
            Some(ChainAction::Right)
        );
    }

    #[test]
    fn test_exact_observation_matching() {
        let mut m: ObservationMapping<ChainModel> =
            ObservationMapping::new(ObservationResolution::Exact);
        m.insert(ChainObservation(1), NodeId(1));
        m.insert(ChainObservation(2), NodeId(2));

        assert_eq!(m.get(&ChainObservation(2)), Some(NodeId(2)));
        assert_eq!(m.get(&ChainObservation(3)), None);
    }

    #[test]
    fn test_nearest_observation_matching() {
        let mut m: ObservationMapping<ChainModel> =
            ObservationMapping::new(ObservationResolution::Nearest { max_distance: 2.0 });
        m.insert(ChainObservation(0), NodeId(1));
        m.insert(ChainObservation(4), NodeId(2));

        // Nearest within the threshold wins.
        assert_eq!(m.get(&ChainObservation(3)), Some(NodeId(2)));
        // Equidistant candidates resolve to the first-created child.
        assert_eq!(m.get(&ChainObservation(2)), Some(NodeId(1)));
        // Out of range of everything.
        assert_eq!(m.get(&ChainObservation(9)), None);
    }
}
