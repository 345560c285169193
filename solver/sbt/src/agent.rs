//! The simulation loop: alternate policy improvement and execution.

use std::time::{Duration, Instant};

use rand_chacha::ChaCha20Rng;
use tracing::{debug, error, info};

use solver_core::{ChangeFlags, Model, NodeId, StepResult};

use crate::search::{Solver, SolverError};

/// One executed step of a simulation.
#[derive(Debug)]
pub struct StepRecord<M: Model> {
    pub action: M::Action,
    pub observation: M::Observation,
    pub reward: f64,
}

/// Trajectory and timing summary of a simulation run.
#[derive(Debug)]
pub struct SimulationResult<M: Model> {
    /// Sum of per-step rewards discounted by execution time.
    pub discounted_return: f64,

    /// Visited states, starting with the initial state; one longer than
    /// `steps`.
    pub states: Vec<M::State>,

    /// Executed actions with their observations and rewards.
    pub steps: Vec<StepRecord<M>>,

    /// Wall time spent applying model changes.
    pub change_time: Duration,

    /// Wall time spent improving the policy.
    pub improve_time: Duration,
}

/// Runs the simulation: improve the policy at the current belief, act,
/// observe, advance the belief.
pub struct Agent<M: Model> {
    solver: Solver<M>,
    current_belief: NodeId,
}

impl<M: Model> Agent<M> {
    pub fn new(solver: Solver<M>) -> Self {
        let current_belief = solver.tree().root();
        Self {
            solver,
            current_belief,
        }
    }

    pub fn solver(&self) -> &Solver<M> {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut Solver<M> {
        &mut self.solver
    }

    pub fn current_belief(&self) -> NodeId {
        self.current_belief
    }

    /// Run up to `n_steps` of interleaved planning and execution.
    ///
    /// `change_times` is the sorted schedule returned by
    /// `Model::load_changes`; at each listed step the model is updated and
    /// the changes are propagated before planning. Fails if the current
    /// simulated state is deleted by a change, or if a belief ever ends up
    /// without particles or actions.
    pub fn run_sim(
        &mut self,
        n_steps: usize,
        change_times: &[u64],
        rng: &mut ChaCha20Rng,
    ) -> Result<SimulationResult<M>, SolverError> {
        let params = self.solver.parameters().clone();

        let initial = self.solver.model_mut().sample_initial_state(rng);
        debug!(state = %self.solver.model().render_state(&initial), "initial state");

        let mut result = SimulationResult {
            discounted_return: 0.0,
            states: vec![initial.clone()],
            steps: Vec::new(),
            change_time: Duration::ZERO,
            improve_time: Duration::ZERO,
        };

        // Seed the root belief on the first run.
        if self.solver.tree().get(self.current_belief).n_particles() == 0 {
            self.solver.build_initial_policy(rng);
        }

        let mut state = initial;
        let mut current_discount = 1.0;
        let mut changes = change_times.iter().copied().peekable();

        for time_step in 0..n_steps {
            debug!(time_step, "simulation step");
            let state_id = self.solver.pool_mut().create_or_get(state.clone());

            if changes.peek() == Some(&(time_step as u64)) {
                let change_time = changes.next().expect("peeked");
                info!(time = change_time, "model changing");
                let started = Instant::now();

                self.solver.apply_model_update(change_time);
                if self
                    .solver
                    .pool()
                    .get(state_id)
                    .change_flags()
                    .contains(ChangeFlags::DELETED)
                {
                    return Err(SolverError::CurrentStateDeleted);
                }
                for visited in &result.states {
                    let deleted = self
                        .solver
                        .pool()
                        .lookup(visited)
                        .map(|id| {
                            self.solver
                                .pool()
                                .get(id)
                                .change_flags()
                                .contains(ChangeFlags::DELETED)
                        })
                        .unwrap_or(false);
                    if deleted {
                        error!(
                            state = %self.solver.model().render_state(visited),
                            "simulation history passes through a deleted state"
                        );
                    }
                }
                self.solver.apply_changes(rng);
                self.solver.pool_mut().reset_affected_states();

                result.change_time += started.elapsed();
                info!(elapsed = ?started.elapsed(), "changes complete");
            }

            let started = Instant::now();
            self.solver
                .improve(self.current_belief, params.max_trials, params.maximum_depth, rng)?;
            result.improve_time += started.elapsed();

            let step = self.simulate_one_step(&state, rng)?;

            result.steps.push(StepRecord {
                action: step.action.clone(),
                observation: step.observation.clone(),
                reward: step.reward,
            });
            result.states.push(step.next_state.clone());
            result.discounted_return += current_discount * step.reward;
            current_discount *= params.discount;
            debug!(
                reward = step.reward,
                total = result.discounted_return,
                "step executed"
            );

            if step.is_terminal {
                info!(time_step, "reached a terminal state");
                break;
            }

            // Advance the belief, replenishing particles if the child
            // belief is empty or missing.
            let child = self
                .solver
                .tree()
                .get(self.current_belief)
                .child(&step.action, &step.observation);
            self.current_belief = match child {
                Some(node) if self.solver.tree().get(node).n_particles() > 0 => node,
                _ => self.solver.add_child(
                    self.current_belief,
                    &step.action,
                    &step.observation,
                    time_step,
                    rng,
                )?,
            };
            state = step.next_state;
        }

        Ok(result)
    }

    /// Execute one greedy step from the current belief: sample a particle
    /// for diagnostics, pick the best known action (or the first untried
    /// one when nothing has been backed up yet), and step the model.
    fn simulate_one_step(
        &mut self,
        state: &M::State,
        rng: &mut ChaCha20Rng,
    ) -> Result<StepResult<M>, SolverError> {
        let belief = self.current_belief;
        let particle = self
            .solver
            .tree()
            .get(belief)
            .sample_particle(rng)
            .ok_or(SolverError::EmptyBelief(belief))?;
        let sampled_state = self
            .solver
            .pool()
            .state(self.solver.histories().entry(particle).state);
        debug!(
            particle = %self.solver.model().render_state(sampled_state),
            "sampled belief particle"
        );

        let action = match self.solver.tree().get(belief).best_action().cloned() {
            Some(action) => action,
            None => self
                .solver
                .tree_mut()
                .get_mut(belief)
                .next_action_to_try()
                .ok_or(SolverError::NoActionAvailable(belief))?,
        };

        let result = self.solver.model_mut().generate_step(state, &action, rng);
        debug!(
            action = ?result.action,
            reward = result.reward,
            observation = ?result.observation,
            "action executed"
        );
        Ok(result)
    }
}
