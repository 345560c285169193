//! The solver: UCB descent, rollouts, backup, and adaptive heuristic mixing.

use std::time::Instant;

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use solver_core::{
    EntryRef, Histories, HistoryCorrector, Model, NodeId, PomdpState, SequenceId,
    SolverParameters, StateId, StatePool, StepResult,
};

use crate::tree::BeliefTree;

/// Errors that abort the current run.
///
/// Recoverable degeneracies (no acceptable nearest neighbor, empty
/// prior-aware particle generation) never surface here; they are logged and
/// fall back to the uninformed path.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("belief node {0} has no particles")]
    EmptyBelief(NodeId),

    #[error("belief node {0} has no action to recommend")]
    NoActionAvailable(NodeId),

    #[error("failed to generate replacement particles for belief node {0}")]
    ParticleDepletion(NodeId),

    #[error("current simulation state was deleted by a model change")]
    CurrentStateDeleted,
}

/// The two competing rollout heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutMode {
    /// One model step, then the model's state-value heuristic.
    RandomHeuristic = 0,
    /// Greedy descent through the subtree of a nearby explored belief.
    PolicyNeighbor = 1,
}

/// Online POMDP solver over a sample-based belief tree.
///
/// Owns the model, the state pool, the history store, and the belief tree.
/// All stochastic decisions draw from the single `ChaCha20Rng` passed into
/// each call, in a fixed order (particle draw, then the model's own draws
/// inside each step, then the rollout-mode Bernoulli draw), so seeded runs
/// are reproducible.
pub struct Solver<M: Model> {
    model: M,
    params: SolverParameters,
    pool: StatePool<M>,
    histories: Histories<M>,
    tree: BeliefTree<M>,
    corrector: Box<dyn HistoryCorrector<M>>,
    start: Instant,
    last_rollout: RolloutMode,
    heuristic_weight: [f64; 2],
    heuristic_probability: [f64; 2],
    heuristic_use_count: [u64; 2],
    time_used_per_heuristic: [f64; 2],
}

impl<M: Model> Solver<M> {
    /// Build a solver around a model, reading its parameters, action set,
    /// and factories once.
    pub fn new(model: M) -> Self {
        let params = model.parameters();
        let pool = StatePool::new(model.create_state_index());
        let corrector = model.create_history_corrector();
        let tree = BeliefTree::new(model.all_actions(), model.observation_resolution(), 0.0);
        Self {
            model,
            params,
            pool,
            histories: Histories::new(),
            tree,
            corrector,
            start: Instant::now(),
            last_rollout: RolloutMode::RandomHeuristic,
            heuristic_weight: [1.0, 1.0],
            heuristic_probability: [0.5, 0.5],
            heuristic_use_count: [1, 1],
            time_used_per_heuristic: [1.0, 1.0],
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn parameters(&self) -> &SolverParameters {
        &self.params
    }

    pub fn tree(&self) -> &BeliefTree<M> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BeliefTree<M> {
        &mut self.tree
    }

    pub fn pool(&self) -> &StatePool<M> {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut StatePool<M> {
        &mut self.pool
    }

    pub fn histories(&self) -> &Histories<M> {
        &self.histories
    }

    pub(crate) fn histories_mut(&mut self) -> &mut Histories<M> {
        &mut self.histories
    }

    /// Current mixing probabilities of the two rollout heuristics.
    pub fn heuristic_probabilities(&self) -> [f64; 2] {
        self.heuristic_probability
    }

    /// How often each rollout heuristic has been used (initialized to 1).
    pub fn heuristic_use_counts(&self) -> [u64; 2] {
        self.heuristic_use_count
    }

    /// Monotonic seconds since solver construction.
    pub(crate) fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Let the model apply its scheduled change for `time`, flagging
    /// affected states in the pool.
    pub fn apply_model_update(&mut self, time: u64) {
        let Self { model, pool, .. } = self;
        model.update(time, pool);
    }

    /// Seed the root belief by searching from freshly sampled initial
    /// states, one trial per sampled state.
    pub fn build_initial_policy(&mut self, rng: &mut ChaCha20Rng) {
        let max_trials = self.params.max_trials;
        let maximum_depth = self.params.maximum_depth;
        for _ in 0..max_trials {
            let state = self.model.sample_initial_state(rng);
            let state_id = self.pool.create_or_get(state);
            self.single_search(self.tree.root(), state_id, 0, maximum_depth, rng);
        }
    }

    /// Improve the policy at `start_node` by `max_trials` search trials,
    /// each from a uniformly sampled particle of that belief.
    pub fn improve(
        &mut self,
        start_node: NodeId,
        max_trials: u32,
        maximum_depth: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<(), SolverError> {
        if self.tree.get(start_node).n_particles() == 0 {
            return Err(SolverError::EmptyBelief(start_node));
        }
        for _ in 0..max_trials {
            let Some(particle) = self.tree.get(start_node).sample_particle(rng) else {
                break;
            };
            let entry = self.histories.entry(particle);
            let state_id = entry.state;
            let depth = self
                .histories
                .sequence(particle.sequence)
                .absolute_depth(particle.index());
            self.single_search(start_node, state_id, depth, maximum_depth, rng);
        }
        Ok(())
    }

    /// Start a fresh one-entry history sequence at `node` and continue the
    /// search from it.
    pub fn single_search(
        &mut self,
        node: NodeId,
        state: StateId,
        start_depth: usize,
        maximum_depth: usize,
        rng: &mut ChaCha20Rng,
    ) {
        let sequence = self.histories.add_new(start_depth);
        let discount = self.params.discount.powi(start_depth as i32);
        let index = self.append_entry(sequence, state, discount);
        self.register_entry(EntryRef::new(sequence, index), node);
        self.continue_search(sequence, maximum_depth, rng);
    }

    /// UCB-plus-rollout descent extending `sequence` from its tail entry.
    ///
    /// At each step: if the current node still has untried actions, perform
    /// one rollout and stop; otherwise select by UCB and keep descending
    /// until the depth cutoff or a terminal step. Finishes with a backup
    /// and, after a rollout, the heuristic mixing update.
    pub(crate) fn continue_search(
        &mut self,
        sequence: SequenceId,
        maximum_depth: usize,
        rng: &mut ChaCha20Rng,
    ) {
        let discount_factor = self.params.discount;

        let (mut entry_index, start_depth) = {
            let seq = self.histories.sequence(sequence);
            (seq.last_index(), seq.start_depth)
        };
        let mut node = self
            .histories
            .sequence(sequence)
            .entry(entry_index)
            .node
            .expect("tail entry is registered to a belief node");
        let mut current_discount = self.histories.sequence(sequence).entry(entry_index).discount;

        let root_node = self
            .histories
            .sequence(sequence)
            .entry(0)
            .node
            .expect("root entry is registered to a belief node");
        let initial_root_q = self.tree.get(root_node).best_mean_q();

        let mut rollout_used = false;
        let mut done = false;
        // Absolute depth of the entry the next iteration will create.
        let mut depth = start_depth + entry_index + 1;

        while !done && depth <= maximum_depth {
            let result: StepResult<M>;
            let mut rollout_q = 0.0;

            if self.tree.get(node).has_action_to_try() {
                let (step, q) = self.rollout(node, sequence, entry_index, current_discount, rng);
                result = step;
                rollout_q = q;
                rollout_used = true;
                done = true;
            } else {
                let Some(action) = self.tree.get(node).search_action(self.params.ucb_coefficient)
                else {
                    warn!(node = %node, "no legal tried action to search; stopping trial");
                    break;
                };
                let state = self
                    .pool
                    .state(self.histories.sequence(sequence).entry(entry_index).state)
                    .clone();
                result = self.model.generate_step(&state, &action, rng);
                done = result.is_terminal;
            }

            {
                let seq = self.histories.sequence_mut(sequence);
                seq.terminal = result.is_terminal;
                let entry = seq.entry_mut(entry_index);
                entry.reward = result.reward;
                entry.action = Some(result.action.clone());
                entry.observation = Some(result.observation.clone());
                entry.transition_parameters = result.transition_parameters.clone();
            }

            let next_state = self.pool.create_or_get(result.next_state);
            current_discount *= discount_factor;
            let next_index = self.append_entry(sequence, next_state, current_discount);
            let now = self.now();
            let child = self
                .tree
                .create_or_get_child(node, &result.action, &result.observation, now);
            self.register_entry(EntryRef::new(sequence, next_index), child);

            if rollout_used {
                self.histories
                    .sequence_mut(sequence)
                    .entry_mut(next_index)
                    .total_discounted_reward = rollout_q;
            }

            entry_index = next_index;
            node = child;
            depth += 1;
        }

        self.backup(sequence);
        if rollout_used {
            let improvement = self.tree.get(root_node).best_mean_q() - initial_root_q;
            self.update_heuristic_probabilities(improvement);
        }
    }

    /// One rollout from `node`: take the next untried action, then estimate
    /// the remainder with one of the two heuristics.
    ///
    /// The mode is drawn from a Bernoulli over the current mixing
    /// probabilities; a policy-neighbor draw with no acceptable neighbor
    /// falls back to the random heuristic. The returned q-value is already
    /// multiplied by `start_discount * discount`, and 0 when the sampled
    /// step was terminal.
    fn rollout(
        &mut self,
        node: NodeId,
        sequence: SequenceId,
        entry_index: usize,
        start_discount: f64,
        rng: &mut ChaCha20Rng,
    ) -> (StepResult<M>, f64) {
        let discount_factor = self.params.discount;
        let action = self
            .tree
            .get_mut(node)
            .next_action_to_try()
            .expect("rollout requires an untried action");
        let state = self
            .pool
            .state(self.histories.sequence(sequence).entry(entry_index).state)
            .clone();
        let result = self.model.generate_step(&state, &action, rng);

        let p_random = self.heuristic_probability[RolloutMode::RandomHeuristic as usize];
        let mut mode = if rng.gen_bool(p_random.clamp(0.0, 1.0)) {
            RolloutMode::RandomHeuristic
        } else {
            RolloutMode::PolicyNeighbor
        };

        let started = Instant::now();
        let mut q_value = 0.0;
        if mode == RolloutMode::PolicyNeighbor {
            match self.get_nn_belief(node) {
                None => {
                    trace!(node = %node, "no acceptable neighbor; falling back to random heuristic");
                    mode = RolloutMode::RandomHeuristic;
                }
                Some(neighbor) => {
                    if !result.is_terminal {
                        let start = self.tree.get(neighbor).child(&action, &result.observation);
                        q_value = self.rollout_policy(start, result.next_state.clone(), rng)
                            * start_discount
                            * discount_factor;
                    }
                }
            }
        }
        if mode == RolloutMode::RandomHeuristic && !result.is_terminal {
            q_value =
                self.model.heuristic_value(&result.next_state) * start_discount * discount_factor;
        }

        self.time_used_per_heuristic[mode as usize] += started.elapsed().as_secs_f64();
        self.heuristic_use_count[mode as usize] += 1;
        self.last_rollout = mode;
        (result, q_value)
    }

    /// Greedy descent through a previously explored subtree: follow
    /// best actions until a terminal step, a missing child, an empty
    /// belief, or a node with nothing backed up yet.
    fn rollout_policy(
        &mut self,
        start: Option<NodeId>,
        mut state: M::State,
        rng: &mut ChaCha20Rng,
    ) -> f64 {
        let discount_factor = self.params.discount;
        let mut node = start;
        let mut total = 0.0;
        let mut discount = 1.0;
        while let Some(id) = node {
            if self.tree.get(id).n_particles() == 0 {
                break;
            }
            let Some(action) = self.tree.get(id).best_action().cloned() else {
                break;
            };
            let result = self.model.generate_step(&state, &action, rng);
            total += discount * result.reward;
            if result.is_terminal {
                break;
            }
            node = self.tree.get(id).child(&action, &result.observation);
            state = result.next_state;
            discount *= discount_factor;
        }
        total
    }

    /// Approximate nearest neighbor of `b` in belief space.
    ///
    /// Scans at most `max_nn_comparisons` nodes, skipping any that gained
    /// no particles since `b`'s last sweep, and caches the winner. Returns
    /// `None` when the best distance found exceeds `max_nn_distance`.
    fn get_nn_belief(&mut self, b: NodeId) -> Option<NodeId> {
        // A non-positive threshold disables neighbor lookups entirely,
        // even for beliefs at distance exactly zero.
        if self.params.max_nn_distance <= 0.0 {
            return None;
        }
        let t_comp = self.tree.get(b).t_nn_comp;
        let mut min_distance = f64::INFINITY;
        let mut nearest = self.tree.get(b).nn_cache;
        let mut tried = 0usize;

        for candidate in self.tree.node_ids() {
            if tried >= self.params.max_nn_comparisons {
                break;
            }
            if candidate != b && t_comp < self.tree.get(candidate).t_last_particle {
                let d = self.belief_distance(b, candidate);
                if d < min_distance {
                    min_distance = d;
                    nearest = Some(candidate);
                }
            }
            tried += 1;
        }

        let now = self.now();
        let node = self.tree.get_mut(b);
        node.t_nn_comp = now;
        node.nn_cache = nearest;
        if min_distance > self.params.max_nn_distance {
            None
        } else {
            nearest
        }
    }

    /// Mean state-to-state distance over the particle cross product of two
    /// beliefs. Not a metric; infinite when either belief is empty.
    pub fn belief_distance(&self, a: NodeId, b: NodeId) -> f64 {
        let mut total = 0.0;
        let mut count = 0u64;
        for pa in self.tree.get(a).particles() {
            let sa = self.pool.state(self.histories.entry(pa).state);
            for pb in self.tree.get(b).particles() {
                let sb = self.pool.state(self.histories.entry(pb).state);
                total += sa.distance_to(sb);
                count += 1;
            }
        }
        if count == 0 {
            f64::INFINITY
        } else {
            total / count as f64
        }
    }

    /// Propagate discounted returns from the tail of `sequence` into the
    /// action statistics of every node it visited.
    ///
    /// Entries already backed up contribute only the delta between their
    /// new and old totals (with no visit-count change), so re-backing up a
    /// revised sequence is an O(1)-per-entry statistics rewrite.
    pub fn backup(&mut self, sequence: SequenceId) {
        let len = self.histories.sequence(sequence).len();
        if len == 0 {
            return;
        }

        let mut index = len - 1;
        let mut total = {
            let entry = self.histories.sequence_mut(sequence).entry_mut(index);
            if entry.action.is_none() {
                entry.total_discounted_reward
            } else {
                entry.total_discounted_reward = entry.discount * entry.reward;
                entry.total_discounted_reward
            }
        };

        while index > 0 {
            index -= 1;
            let (node, action, delta_total, delta_count);
            {
                let entry = self.histories.sequence_mut(sequence).entry_mut(index);
                let new_total = entry.discount * entry.reward + total;
                if entry.backed_up {
                    delta_total = new_total - entry.total_discounted_reward;
                    delta_count = 0;
                } else {
                    delta_total = new_total;
                    delta_count = 1;
                    entry.backed_up = true;
                }
                entry.total_discounted_reward = new_total;
                total = new_total;
                node = entry.node.expect("backed-up entry is registered to a node");
                action = entry
                    .action
                    .clone()
                    .expect("non-tail entries carry an action");
            }
            self.tree.get_mut(node).update_q(&action, delta_total, delta_count);
        }
    }

    /// Subtract a sequence's previously backed-up totals from its nodes'
    /// action statistics. Only the change propagator calls this.
    pub fn undo_backup(&mut self, sequence: SequenceId) {
        let len = self.histories.sequence(sequence).len();
        if len < 2 {
            return;
        }
        for index in (0..len - 1).rev() {
            let (node, action, total);
            {
                let entry = self.histories.sequence_mut(sequence).entry_mut(index);
                if !entry.backed_up {
                    error!(sequence = %sequence, index, "backup not yet done; cannot undo");
                    continue;
                }
                entry.backed_up = false;
                total = entry.total_discounted_reward;
                node = entry.node.expect("backed-up entry is registered to a node");
                action = entry
                    .action
                    .clone()
                    .expect("non-tail entries carry an action");
            }
            self.tree.get_mut(node).update_q(&action, -total, -1);
        }
    }

    /// Exponential-weights update of the rollout-heuristic mixing.
    ///
    /// Rewards the heuristic used in the last rollout in proportion to the
    /// root-value improvement per unit of compute time, with a uniform
    /// exploration floor of `eta / 2`.
    fn update_heuristic_probabilities(&mut self, improvement: f64) {
        let improvement = improvement.max(0.0);
        let eta = self.params.heuristic_explore_coefficient;
        let used = self.last_rollout as usize;

        self.heuristic_weight[used] *= (eta * (improvement / self.params.max_value)
            / (2.0 * self.heuristic_probability[used]))
            .exp();

        let total_weight: f64 = self.heuristic_weight.iter().sum();
        let mut total_probability = 0.0;
        for i in 0..2 {
            self.heuristic_probability[i] = ((1.0 - eta) * self.heuristic_weight[i] / total_weight
                + eta / 2.0)
                * self.heuristic_use_count[i] as f64
                / self.time_used_per_heuristic[i];
            total_probability += self.heuristic_probability[i];
        }
        for p in &mut self.heuristic_probability {
            *p /= total_probability;
        }
    }

    /// Replenish the particles of the belief reached by
    /// `(action, observation)` at execution step `time_step`.
    ///
    /// Tries belief-conditioned generation first; when the prior is
    /// incompatible with the observation, falls back to the model's
    /// uninformed generator. Each generated particle gets a fresh
    /// one-entry history sequence registered under the child.
    pub fn add_child(
        &mut self,
        node: NodeId,
        action: &M::Action,
        observation: &M::Observation,
        time_step: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<NodeId, SolverError> {
        warn!(node = %node, "replenishing particles for a depleted belief");
        let now = self.now();
        let child = self.tree.create_or_get_child(node, action, observation, now);

        let prior: Vec<M::State> = self
            .tree
            .get(node)
            .particles()
            .map(|p| self.pool.state(self.histories.entry(p).state).clone())
            .collect();

        let mut particles = self.model.generate_particles(action, observation, &prior, rng);
        if particles.is_empty() {
            warn!(node = %node, "prior-aware particle generation failed; using uninformed prior");
            particles = self
                .model
                .generate_particles_uninformed(action, observation, rng);
        }
        if particles.is_empty() {
            return Err(SolverError::ParticleDepletion(child));
        }

        let start_depth = time_step + 1;
        let discount = self.params.discount.powi(start_depth as i32);
        for state in particles {
            let state_id = self.pool.create_or_get(state);
            let sequence = self.histories.add_new(start_depth);
            let index = self.append_entry(sequence, state_id, discount);
            self.register_entry(EntryRef::new(sequence, index), child);
            self.backup(sequence);
        }
        debug!(
            node = %child,
            particles = self.tree.get(child).n_particles(),
            "belief repopulated"
        );
        Ok(child)
    }

    /// Append an entry to a sequence and establish its state
    /// back-reference.
    pub(crate) fn append_entry(
        &mut self,
        sequence: SequenceId,
        state: StateId,
        discount: f64,
    ) -> usize {
        let index = self.histories.sequence_mut(sequence).append(state, discount);
        self.pool.add_entry_ref(state, EntryRef::new(sequence, index));
        index
    }

    /// Register an entry as a particle of `node`, moving it out of its
    /// previous node if it had one.
    pub(crate) fn register_entry(&mut self, entry: EntryRef, node: NodeId) {
        let previous = self.histories.entry(entry).node;
        if let Some(old) = previous {
            if old == node {
                return;
            }
            self.tree.get_mut(old).remove_particle(entry);
        }
        self.histories.entry_mut(entry).node = Some(node);
        let now = self.now();
        self.tree.get_mut(node).add_particle(entry, now);
    }

    /// Delete a whole sequence, tearing down every back-reference it
    /// established.
    pub(crate) fn delete_sequence(&mut self, sequence: SequenceId) {
        let Some(seq) = self.histories.remove(sequence) else {
            return;
        };
        for (index, entry) in seq.entries().enumerate() {
            let entry_ref = EntryRef::new(sequence, index);
            self.pool.remove_entry_ref(entry.state, entry_ref);
            if let Some(node) = entry.node {
                self.tree.get_mut(node).remove_particle(entry_ref);
            }
        }
    }

    /// Run the model-level revision of one sequence through the history
    /// corrector, then apply any truncation it reported.
    pub(crate) fn revise_sequence(&mut self, sequence: SequenceId, rng: &mut ChaCha20Rng) {
        let revision = self.corrector.revise(
            &mut self.model,
            &mut self.pool,
            self.histories.sequence_mut(sequence),
            rng,
        );
        if let Some(new_tail) = revision.truncate_after {
            let removed = self
                .histories
                .sequence_mut(sequence)
                .truncate_after(new_tail);
            for (offset, entry) in removed.into_iter().enumerate() {
                let entry_ref = EntryRef::new(sequence, new_tail + 1 + offset);
                self.pool.remove_entry_ref(entry.state, entry_ref);
                if let Some(node) = entry.node {
                    self.tree.get_mut(node).remove_particle(entry_ref);
                }
            }
        }
    }
}
