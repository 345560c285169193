//! Interning pool for visited states.
//!
//! Every state the solver encounters is interned exactly once and addressed
//! by `StateId` afterwards. Each `StateInfo` carries the change flags set by
//! model updates and the exact set of history entries that visit the state,
//! which is what the change propagator walks.

use std::collections::{BTreeSet, HashMap};

use crate::flags::ChangeFlags;
use crate::ids::{EntryRef, StateId};
use crate::index::StateIndex;
use crate::model::Model;
use crate::primitives::PomdpState;

/// An interned state together with its solver-side bookkeeping.
#[derive(Debug)]
pub struct StateInfo<M: Model> {
    id: StateId,
    state: M::State,
    flags: ChangeFlags,
    used_in: BTreeSet<EntryRef>,
}

impl<M: Model> StateInfo<M> {
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn state(&self) -> &M::State {
        &self.state
    }

    pub fn change_flags(&self) -> ChangeFlags {
        self.flags
    }

    /// History entries currently visiting this state, in deterministic order.
    pub fn entry_refs(&self) -> impl Iterator<Item = EntryRef> + '_ {
        self.used_in.iter().copied()
    }

    pub fn reference_count(&self) -> usize {
        self.used_in.len()
    }
}

/// Pool of all interned states, backed by a swappable spatial index.
#[derive(Debug)]
pub struct StatePool<M: Model> {
    infos: Vec<StateInfo<M>>,
    ids_by_state: HashMap<M::State, StateId>,
    index: Box<dyn StateIndex>,
    affected: BTreeSet<StateId>,
}

impl<M: Model> StatePool<M> {
    pub fn new(index: Box<dyn StateIndex>) -> Self {
        Self {
            infos: Vec::new(),
            ids_by_state: HashMap::new(),
            index,
            affected: BTreeSet::new(),
        }
    }

    /// Intern a state, returning the existing id if it was seen before.
    pub fn create_or_get(&mut self, state: M::State) -> StateId {
        if let Some(&id) = self.ids_by_state.get(&state) {
            return id;
        }
        let id = StateId(self.infos.len() as u32);
        self.index.insert(id, &state.coordinates());
        self.ids_by_state.insert(state.clone(), id);
        self.infos.push(StateInfo {
            id,
            state,
            flags: ChangeFlags::default(),
            used_in: BTreeSet::new(),
        });
        id
    }

    /// Look up the id of an already interned state.
    pub fn lookup(&self, state: &M::State) -> Option<StateId> {
        self.ids_by_state.get(state).copied()
    }

    pub fn get(&self, id: StateId) -> &StateInfo<M> {
        &self.infos[id.0 as usize]
    }

    pub fn state(&self, id: StateId) -> &M::State {
        &self.infos[id.0 as usize].state
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateInfo<M>> {
        self.infos.iter()
    }

    /// Flag a state as affected by a model change. Called by
    /// `Model::update`, typically on the results of a box query.
    pub fn set_change_flags(&mut self, id: StateId, flags: ChangeFlags) {
        if flags.is_empty() {
            return;
        }
        self.infos[id.0 as usize].flags |= flags;
        self.affected.insert(id);
    }

    /// States flagged since the last reset, in deterministic order.
    pub fn affected_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.affected.iter().copied()
    }

    /// Clear all change flags after propagation.
    pub fn reset_affected_states(&mut self) {
        for id in std::mem::take(&mut self.affected) {
            self.infos[id.0 as usize].flags = ChangeFlags::default();
        }
    }

    /// Box query over state coordinates through the backing index.
    pub fn query_box(&self, lower: &[f64], upper: &[f64]) -> Vec<StateId> {
        self.index.query_box(lower, upper)
    }

    /// Record that a history entry visits this state.
    pub fn add_entry_ref(&mut self, id: StateId, entry: EntryRef) {
        self.infos[id.0 as usize].used_in.insert(entry);
    }

    /// Remove a history entry's visit record.
    pub fn remove_entry_ref(&mut self, id: StateId, entry: EntryRef) {
        self.infos[id.0 as usize].used_in.remove(&entry);
    }
}
