//! Change flags attached to states and history entries when the model is
//! updated mid-run.

use bitflags::bitflags;

bitflags! {
    /// What a model update invalidated about a state or history entry.
    ///
    /// The empty set means unchanged. `OBSERVATION_BEFORE` marks an entry
    /// whose *incoming* observation may now be wrong; the change propagator
    /// translates it into `OBSERVATION` on the preceding entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChangeFlags: u8 {
        /// The state no longer exists under the new model.
        const DELETED = 1 << 0;
        /// The transition out of this entry may have changed.
        const TRANSITION = 1 << 1;
        /// The reward recorded at this entry may have changed.
        const REWARD = 1 << 2;
        /// The observation recorded at this entry may have changed.
        const OBSERVATION = 1 << 3;
        /// The observation leading into this entry may have changed.
        const OBSERVATION_BEFORE = 1 << 4;
    }
}
