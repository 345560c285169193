//! Revision of history sequences after a model change.
//!
//! Once the change propagator has spread flags across the affected
//! sequences and undone their backups, a `HistoryCorrector` brings each
//! sequence back in line with the new dynamics. The corrector works at the
//! model level only — states, rewards, observations; re-linking entries to
//! belief nodes and truncating dropped entries stay with the propagator,
//! which owns the belief tree.

use rand_chacha::ChaCha20Rng;
use tracing::trace;

use crate::histories::HistorySequence;
use crate::ids::EntryRef;
use crate::model::Model;
use crate::pool::StatePool;

/// What a revision changed about a sequence's shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct Revision {
    /// Entries after this index became unreachable (the sequence turned
    /// terminal earlier than recorded) and must be dropped by the caller.
    pub truncate_after: Option<usize>,
}

/// Capability for revising flagged history sequences under a changed model.
pub trait HistoryCorrector<M: Model>: std::fmt::Debug {
    /// Revise one affected sequence in place. Sets
    /// `sequence.invalid_links_start` to the earliest entry whose link to
    /// the following belief node may now be wrong.
    fn revise(
        &self,
        model: &mut M,
        pool: &mut StatePool<M>,
        sequence: &mut HistorySequence<M>,
        rng: &mut ChaCha20Rng,
    ) -> Revision;
}

/// Model-agnostic corrector that replays a sequence through
/// `Model::generate_step` from its earliest changed entry, keeping the
/// recorded actions and regenerating everything downstream of them.
///
/// Models whose transitions must be replayed exactly (for instance by
/// re-applying recorded transition parameters) supply their own corrector
/// through `Model::create_history_corrector`.
#[derive(Debug, Default)]
pub struct ReplayCorrector;

impl<M: Model> HistoryCorrector<M> for ReplayCorrector {
    fn revise(
        &self,
        model: &mut M,
        pool: &mut StatePool<M>,
        sequence: &mut HistorySequence<M>,
        rng: &mut ChaCha20Rng,
    ) -> Revision {
        let first_changed = (0..sequence.len()).find(|&i| !sequence.entry(i).flags.is_empty());
        let Some(start) = first_changed else {
            return Revision::default();
        };

        let mut revised_from = None;
        let mut truncate_after = None;

        for i in start..sequence.len().saturating_sub(1) {
            let Some(action) = sequence.entry(i).action.clone() else {
                break;
            };
            let state = pool.state(sequence.entry(i).state).clone();
            let result = model.generate_step(&state, &action, rng);

            {
                let entry = sequence.entry_mut(i);
                entry.reward = result.reward;
                entry.observation = Some(result.observation);
                entry.transition_parameters = result.transition_parameters;
            }
            revised_from.get_or_insert(i);

            // Re-intern the successor and keep the back-references exact.
            let successor = EntryRef::new(sequence.id(), i + 1);
            let new_state = pool.create_or_get(result.next_state);
            let old_state = sequence.entry(i + 1).state;
            if old_state != new_state {
                pool.remove_entry_ref(old_state, successor);
                pool.add_entry_ref(new_state, successor);
                sequence.entry_mut(i + 1).state = new_state;
            }

            if result.is_terminal {
                sequence.terminal = true;
                let tail = sequence.entry_mut(i + 1);
                tail.action = None;
                tail.observation = None;
                tail.transition_parameters = None;
                tail.total_discounted_reward = 0.0;
                if i + 1 < sequence.last_index() {
                    truncate_after = Some(i + 1);
                }
                break;
            }
            if i + 1 == sequence.last_index() {
                // The former tail regenerated non-terminal; the propagator
                // will continue the search from it.
                sequence.terminal = false;
            }
        }

        trace!(
            sequence = %sequence.id(),
            revised_from = ?revised_from,
            truncate_after = ?truncate_after,
            "revised history sequence"
        );
        sequence.invalid_links_start = revised_from;
        Revision { truncate_after }
    }
}
