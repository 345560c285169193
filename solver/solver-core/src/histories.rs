//! Append-only log of simulated trajectories.
//!
//! A `HistorySequence` records one trial from a past belief node down to a
//! leaf. Entries are appended during search and never deleted individually;
//! a sequence whose root entry becomes invalid is deleted whole. Entries
//! reference their state and owning belief node by id.

use std::collections::HashMap;

use crate::flags::ChangeFlags;
use crate::ids::{EntryRef, NodeId, SequenceId, StateId};
use crate::model::Model;

/// One step of a simulated trajectory.
#[derive(Debug)]
pub struct HistoryEntry<M: Model> {
    /// Interned state visited at this step.
    pub state: StateId,

    /// Discount accrued at this step's absolute depth (gamma^depth).
    pub discount: f64,

    /// Immediate reward of the transition out of this entry.
    pub reward: f64,

    /// Action taken from this entry. `None` on the tail entry.
    pub action: Option<M::Action>,

    /// Observation received after the action. `None` on the tail entry.
    pub observation: Option<M::Observation>,

    /// Model-specific transition record, when the model produces one.
    pub transition_parameters: Option<M::TransitionParameters>,

    /// Belief node this entry is registered to as a particle.
    pub node: Option<NodeId>,

    /// Discounted return from this entry to the end of the sequence.
    pub total_discounted_reward: f64,

    /// Whether this entry's return has been added to its node's
    /// action statistics.
    pub backed_up: bool,

    /// Pending change flags set by the change propagator.
    pub flags: ChangeFlags,
}

/// One simulated trajectory.
#[derive(Debug)]
pub struct HistorySequence<M: Model> {
    id: SequenceId,

    /// Absolute depth of the first entry.
    pub start_depth: usize,

    entries: Vec<HistoryEntry<M>>,

    /// Whether the trajectory ended in a terminal state.
    pub terminal: bool,

    /// Earliest entry whose link to the following belief node may be stale
    /// after a revision. `None` when all links are valid.
    pub invalid_links_start: Option<usize>,

    combined_flags: ChangeFlags,
}

impl<M: Model> HistorySequence<M> {
    fn new(id: SequenceId, start_depth: usize) -> Self {
        Self {
            id,
            start_depth,
            entries: Vec::new(),
            terminal: false,
            invalid_links_start: None,
            combined_flags: ChangeFlags::default(),
        }
    }

    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.entries.len() - 1
    }

    /// Absolute depth of the entry at `index`.
    pub fn absolute_depth(&self, index: usize) -> usize {
        self.start_depth + index
    }

    pub fn entry(&self, index: usize) -> &HistoryEntry<M> {
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut HistoryEntry<M> {
        &mut self.entries[index]
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<M>> {
        self.entries.iter()
    }

    /// Append a fresh entry visiting `state` at the given accrued discount.
    /// Returns its index. The caller establishes the state and node
    /// back-references.
    pub fn append(&mut self, state: StateId, discount: f64) -> usize {
        self.entries.push(HistoryEntry {
            state,
            discount,
            reward: 0.0,
            action: None,
            observation: None,
            transition_parameters: None,
            node: None,
            total_discounted_reward: 0.0,
            backed_up: false,
            flags: ChangeFlags::default(),
        });
        self.entries.len() - 1
    }

    /// Drop every entry after `new_tail`, returning the removed entries so
    /// the caller can tear down their back-references.
    pub fn truncate_after(&mut self, new_tail: usize) -> Vec<HistoryEntry<M>> {
        self.entries.split_off(new_tail + 1)
    }

    /// Merge flags into the entry at `index` and the sequence aggregate.
    pub fn set_change_flags(&mut self, index: usize, flags: ChangeFlags) {
        self.entries[index].flags |= flags;
        self.combined_flags |= flags;
    }

    pub fn combined_flags(&self) -> ChangeFlags {
        self.combined_flags
    }

    /// Clear all change flags after propagation.
    pub fn reset_change_flags(&mut self) {
        for entry in &mut self.entries {
            entry.flags = ChangeFlags::default();
        }
        self.combined_flags = ChangeFlags::default();
    }
}

/// Owner of all history sequences.
#[derive(Debug, Default)]
pub struct Histories<M: Model> {
    sequences: HashMap<SequenceId, HistorySequence<M>>,
    next_id: u64,
}

impl<M: Model> Histories<M> {
    pub fn new() -> Self {
        Self {
            sequences: HashMap::new(),
            next_id: 0,
        }
    }

    /// Start a new empty sequence at the given absolute depth.
    pub fn add_new(&mut self, start_depth: usize) -> SequenceId {
        let id = SequenceId(self.next_id);
        self.next_id += 1;
        self.sequences.insert(id, HistorySequence::new(id, start_depth));
        id
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn contains(&self, id: SequenceId) -> bool {
        self.sequences.contains_key(&id)
    }

    /// Look up a sequence. Panics if it was deleted; sequence ids are only
    /// ever held by structures torn down together with the sequence.
    pub fn sequence(&self, id: SequenceId) -> &HistorySequence<M> {
        &self.sequences[&id]
    }

    pub fn sequence_mut(&mut self, id: SequenceId) -> &mut HistorySequence<M> {
        self.sequences
            .get_mut(&id)
            .expect("history sequence was deleted while still referenced")
    }

    pub fn entry(&self, entry: EntryRef) -> &HistoryEntry<M> {
        self.sequence(entry.sequence).entry(entry.index())
    }

    pub fn entry_mut(&mut self, entry: EntryRef) -> &mut HistoryEntry<M> {
        self.sequence_mut(entry.sequence).entry_mut(entry.index())
    }

    /// Remove a whole sequence, handing it back for back-reference teardown.
    pub fn remove(&mut self, id: SequenceId) -> Option<HistorySequence<M>> {
        self.sequences.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistorySequence<M>> {
        self.sequences.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LineAction, LineModel};

    #[test]
    fn test_append_and_depth() {
        let mut histories: Histories<LineModel> = Histories::new();
        let id = histories.add_new(3);
        let seq = histories.sequence_mut(id);

        assert_eq!(seq.append(StateId(0), 0.125), 0);
        assert_eq!(seq.append(StateId(1), 0.0625), 1);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.last_index(), 1);
        assert_eq!(seq.absolute_depth(1), 4);
    }

    #[test]
    fn test_change_flag_aggregation() {
        let mut histories: Histories<LineModel> = Histories::new();
        let id = histories.add_new(0);
        let seq = histories.sequence_mut(id);
        seq.append(StateId(0), 1.0);
        seq.append(StateId(1), 0.5);

        seq.set_change_flags(0, ChangeFlags::TRANSITION);
        seq.set_change_flags(1, ChangeFlags::DELETED);
        assert!(seq
            .combined_flags()
            .contains(ChangeFlags::TRANSITION | ChangeFlags::DELETED));

        seq.reset_change_flags();
        assert!(seq.combined_flags().is_empty());
        assert!(seq.entry(1).flags.is_empty());
    }

    #[test]
    fn test_truncate_after_returns_removed_entries() {
        let mut histories: Histories<LineModel> = Histories::new();
        let id = histories.add_new(0);
        let seq = histories.sequence_mut(id);
        for i in 0..4 {
            seq.append(StateId(i), 1.0);
        }
        seq.entry_mut(1).action = Some(LineAction::Right);

        let removed = seq.truncate_after(1);
        assert_eq!(seq.len(), 2);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].state, StateId(2));
    }

    #[test]
    fn test_sequence_ids_are_unique() {
        let mut histories: Histories<LineModel> = Histories::new();
        let a = histories.add_new(0);
        let b = histories.add_new(0);
        assert_ne!(a, b);

        histories.remove(a);
        let c = histories.add_new(0);
        assert_ne!(b, c);
        assert!(!histories.contains(a));
        assert!(histories.contains(c));
    }
}
