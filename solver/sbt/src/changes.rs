//! Propagation of model changes through the histories and the belief tree.
//!
//! The model flags affected states in the pool; this module spreads those
//! flags onto every history entry visiting a flagged state, undoes the
//! affected backups, deletes sequences whose root entry is gone, has the
//! history corrector revise the rest, re-links revised entries into the
//! belief tree, and finally re-backs up terminal sequences and regrows the
//! non-terminal ones.

use std::collections::BTreeSet;

use rand_chacha::ChaCha20Rng;
use tracing::info;

use solver_core::{ChangeFlags, EntryRef, Model, SequenceId};

use crate::search::Solver;

impl<M: Model> Solver<M> {
    /// Apply the change flags currently set in the state pool to the
    /// search graph. A no-op when nothing is flagged.
    pub fn apply_changes(&mut self, rng: &mut ChaCha20Rng) {
        let mut affected: BTreeSet<SequenceId> = BTreeSet::new();

        let flagged: Vec<_> = self.pool().affected_states().collect();
        for state in flagged {
            let flags = self.pool().get(state).change_flags();
            let refs: Vec<EntryRef> = self.pool().get(state).entry_refs().collect();
            for entry_ref in refs {
                let index = entry_ref.index();
                let seq = self.histories_mut().sequence_mut(entry_ref.sequence);
                seq.set_change_flags(index, flags);
                if flags.contains(ChangeFlags::DELETED) && index > 0 {
                    seq.set_change_flags(index - 1, ChangeFlags::TRANSITION);
                }
                if flags.contains(ChangeFlags::OBSERVATION_BEFORE) && index > 0 {
                    seq.set_change_flags(index - 1, ChangeFlags::OBSERVATION);
                }
                affected.insert(entry_ref.sequence);
            }
        }

        if affected.is_empty() {
            return;
        }
        info!(sequences = affected.len(), "updating affected histories");

        // Undo all affected backups, dropping any sequence whose root
        // entry no longer exists.
        let mut remaining = Vec::with_capacity(affected.len());
        for sequence in affected {
            self.undo_backup(sequence);
            let root_deleted = self
                .histories()
                .sequence(sequence)
                .entry(0)
                .flags
                .contains(ChangeFlags::DELETED);
            if root_deleted {
                self.delete_sequence(sequence);
            } else {
                remaining.push(sequence);
            }
        }

        // Revise the survivors under the new model.
        for &sequence in &remaining {
            self.revise_sequence(sequence, rng);
        }

        // Re-link, clear flags, and either re-back up or keep searching.
        let maximum_depth = self.parameters().maximum_depth;
        for sequence in remaining {
            self.fix_links(sequence);
            self.histories_mut().sequence_mut(sequence).reset_change_flags();
            if self.histories().sequence(sequence).terminal {
                self.backup(sequence);
            } else {
                self.continue_search(sequence, maximum_depth, rng);
            }
        }
    }

    /// Reattach a revised sequence's entries to belief nodes from its
    /// first invalid link onward.
    pub(crate) fn fix_links(&mut self, sequence: SequenceId) {
        let Some(start) = self.histories().sequence(sequence).invalid_links_start else {
            return;
        };
        let len = self.histories().sequence(sequence).len();
        for index in start..len.saturating_sub(1) {
            let (node, action, observation) = {
                let entry = self.histories().sequence(sequence).entry(index);
                (
                    entry.node.expect("linked entry is registered to a node"),
                    entry.action.clone().expect("non-tail entries carry an action"),
                    entry
                        .observation
                        .clone()
                        .expect("non-tail entries carry an observation"),
                )
            };
            let now = self.now();
            let child = self
                .tree_mut()
                .create_or_get_child(node, &action, &observation, now);
            self.register_entry(EntryRef::new(sequence, index + 1), child);
        }
        self.histories_mut().sequence_mut(sequence).invalid_links_start = None;
    }
}
