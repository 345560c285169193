//! Belief nodes: a particle set plus per-action search statistics.

use rand::Rng;
use rand_chacha::ChaCha20Rng;

use solver_core::{EntryRef, Model, NodeId};

use crate::mapping::{ActionEntry, ActionMapping};

/// One node of the belief tree.
///
/// The particle list holds references to the history entries whose
/// trajectories pass through this belief; every referenced entry's owning
/// node is this one. Timing fields drive the nearest-neighbor staleness
/// test: a node is only re-compared against neighbors that gained particles
/// since its last comparison.
#[derive(Debug)]
pub struct BeliefNode<M: Model> {
    id: NodeId,

    /// Monotonic creation time, seconds since solver start.
    pub t_created: f64,

    /// Monotonic time a particle was last added.
    pub t_last_particle: f64,

    /// Monotonic time of the last nearest-neighbor comparison sweep.
    pub t_nn_comp: f64,

    /// Cached nearest-neighbor candidate from the last sweep.
    pub nn_cache: Option<NodeId>,

    particles: Vec<EntryRef>,

    actions: ActionMapping<M>,

    /// Cached greedy action index and its mean Q, refreshed on every
    /// statistics update.
    cached_best: Option<(M::Action, f64)>,
}

impl<M: Model> BeliefNode<M> {
    pub(crate) fn new(id: NodeId, actions: ActionMapping<M>, now: f64) -> Self {
        Self {
            id,
            t_created: now,
            t_last_particle: now,
            t_nn_comp: -1.0,
            nn_cache: None,
            particles: Vec::new(),
            actions,
            cached_best: None,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn n_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> impl Iterator<Item = EntryRef> + '_ {
        self.particles.iter().copied()
    }

    /// Register a history entry as a particle of this belief.
    pub fn add_particle(&mut self, entry: EntryRef, now: f64) {
        self.particles.push(entry);
        self.t_last_particle = now;
    }

    /// Remove a particle, preserving insertion order so uniform sampling
    /// stays reproducible under a fixed seed.
    pub fn remove_particle(&mut self, entry: EntryRef) {
        if let Some(pos) = self.particles.iter().position(|&p| p == entry) {
            self.particles.remove(pos);
        }
    }

    /// Uniformly sample one particle. `None` on an empty belief.
    pub fn sample_particle(&self, rng: &mut ChaCha20Rng) -> Option<EntryRef> {
        if self.particles.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.particles.len());
        Some(self.particles[index])
    }

    #[inline]
    pub fn has_action_to_try(&self) -> bool {
        self.actions.has_action_to_try()
    }

    pub fn next_action_to_try(&mut self) -> Option<M::Action> {
        self.actions.next_action_to_try()
    }

    /// UCB action selection over tried, legal actions.
    pub fn search_action(&self, ucb_coefficient: f64) -> Option<M::Action> {
        self.actions.search_action(ucb_coefficient)
    }

    /// Greedy best action by mean Q; `None` before any backup.
    pub fn best_action(&self) -> Option<&M::Action> {
        self.cached_best.as_ref().map(|(a, _)| a)
    }

    /// Mean Q of the greedy best action; 0 before any backup.
    pub fn best_mean_q(&self) -> f64 {
        self.cached_best.as_ref().map_or(0.0, |&(_, q)| q)
    }

    /// Fold a backed-up return delta into the action statistics and refresh
    /// the greedy cache.
    pub fn update_q(&mut self, action: &M::Action, delta_total: f64, delta_count: i64) {
        self.actions.update_q(action, delta_total, delta_count);
        self.cached_best = self
            .actions
            .best_entry()
            .map(|e| (e.action.clone(), e.mean_q()));
    }

    /// Resolve the child belief node reached by `(action, observation)`,
    /// without creating it.
    pub fn child(&self, action: &M::Action, observation: &M::Observation) -> Option<NodeId> {
        self.actions
            .entry(action)
            .and_then(|entry| entry.children.get(observation))
    }

    pub fn action_entry(&self, action: &M::Action) -> Option<&ActionEntry<M>> {
        self.actions.entry(action)
    }

    pub fn action_entries(&self) -> impl Iterator<Item = &ActionEntry<M>> {
        self.actions.entries()
    }

    /// Total visit count across all actions.
    pub fn total_visits(&self) -> i64 {
        self.actions.total_visits()
    }

    pub(crate) fn actions_mut(&mut self) -> &mut ActionMapping<M> {
        &mut self.actions
    }
}
