//! State generator contract and the reachable-state index.

use ahash::RandomState;
use pmc_values::ValueRing;
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::trace;

/// Compact state identifier assigned during exploration.
pub type StateId = usize;

/// Ids at or above this offset denote pseudo-states: reserved slots for
/// states whose canonical fingerprint is not yet known. They never survive
/// into a built matrix; a final rewrite pass replaces them with real ids.
pub const PSEUDO_STATE_OFFSET: StateId = usize::MAX >> 1;

/// One nondeterministic choice of a state: a distribution over successors.
#[derive(Clone, Debug)]
pub struct Choice<V> {
    /// Whether the outgoing values are exit rates (Markovian) rather than
    /// probabilities.
    pub markovian: bool,
    pub transitions: Vec<(StateId, V)>,
}

/// The full behavior of one state. Deterministic models have exactly one
/// choice per state; MDPs and Markov automata may have several.
#[derive(Clone, Debug)]
pub struct StateBehavior<V> {
    pub choices: SmallVec<[Choice<V>; 1]>,
}

impl<V> StateBehavior<V> {
    pub fn new() -> Self {
        Self {
            choices: SmallVec::new(),
        }
    }

    /// A single probabilistic choice.
    pub fn deterministic(transitions: Vec<(StateId, V)>) -> Self {
        let mut behavior = Self::new();
        behavior.choices.push(Choice {
            markovian: false,
            transitions,
        });
        behavior
    }

    /// A single Markovian (rate) choice.
    pub fn markovian(transitions: Vec<(StateId, V)>) -> Self {
        let mut behavior = Self::new();
        behavior.choices.push(Choice {
            markovian: true,
            transitions,
        });
        behavior
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

impl<V> Default for StateBehavior<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The external model: fault tree, program, or any other source of state
/// behavior. The explorer owns id assignment; the generator only ever sees
/// fingerprints and the [`IdAllocator`] handed to it.
pub trait StateGenerator {
    type Value: ValueRing;

    /// Registers the initial states and returns their ids.
    fn initial_states(&mut self, ids: &mut IdAllocator<'_>) -> Vec<StateId>;

    /// Prepares the generator to expand the state with the given fingerprint.
    fn load(&mut self, fingerprint: &[u8]);

    /// Expands the loaded state.
    fn expand(&mut self, ids: &mut IdAllocator<'_>) -> StateBehavior<Self::Value>;

    /// Whether every state has exactly one choice.
    fn is_deterministic_model(&self) -> bool;

    /// For models that coalesce all absorbing failed states into one: the
    /// behavior of that merged state (a probability-one self-loop). The
    /// returned behavior must have exactly one choice with one transition.
    fn create_merge_failed(&mut self, ids: &mut IdAllocator<'_>) -> Option<StateBehavior<Self::Value>> {
        let _ = ids;
        None
    }

    /// Rates of the failures still possible from the loaded state, used to
    /// bound the behavior of states whose expansion was skipped.
    fn pending_rates(&self) -> Vec<Self::Value> {
        Vec::new()
    }
}

/// Bijective mapping between opaque state fingerprints and compact ids.
///
/// Real ids are dense, starting at zero, in discovery order; pseudo-ids live
/// in the reserved high range and are tracked separately until instantiated.
pub struct StateIndex {
    ids: HashMap<Vec<u8>, StateId, RandomState>,
    fingerprints: Vec<Vec<u8>>,
    pseudo: Vec<(Option<StateId>, Vec<u8>)>,
}

impl StateIndex {
    pub fn new() -> Self {
        Self {
            ids: HashMap::with_hasher(RandomState::with_seeds(7, 11, 13, 17)),
            fingerprints: Vec::new(),
            pseudo: Vec::new(),
        }
    }

    /// Number of real (instantiated) states.
    pub fn state_count(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn fingerprint(&self, id: StateId) -> &[u8] {
        &self.fingerprints[id]
    }

    pub fn id_of(&self, fingerprint: &[u8]) -> Option<StateId> {
        self.ids.get(fingerprint).copied()
    }

    /// Allocates an id that is not backed by a fingerprint (the merged
    /// failed state).
    pub fn allocate_unindexed(&mut self) -> StateId {
        let id = self.fingerprints.len();
        self.fingerprints.push(Vec::new());
        id
    }

    fn add_real(&mut self, fingerprint: &[u8]) -> StateId {
        let id = self.fingerprints.len();
        self.fingerprints.push(fingerprint.to_vec());
        self.ids.insert(fingerprint.to_vec(), id);
        id
    }

    /// The real id every pseudo slot resolved to. Panics if any slot is
    /// still pending; callers instantiate pending slots before building.
    pub fn pseudo_resolutions(&self) -> Vec<StateId> {
        self.pseudo
            .iter()
            .map(|(resolved, _)| resolved.expect("pseudo state was never instantiated"))
            .collect()
    }

    pub fn pseudo_count(&self) -> usize {
        self.pseudo.len()
    }

    /// Fingerprint of the first pseudo slot at or after `from` that has not
    /// been instantiated yet.
    pub fn next_pending_pseudo(&self, from: usize) -> Option<(usize, Vec<u8>)> {
        self.pseudo
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, (resolved, _))| resolved.is_none())
            .map(|(slot, (_, fingerprint))| (slot, fingerprint.clone()))
    }

    /// Drops all pseudo bookkeeping after the rewrite pass.
    pub fn clear_pseudo(&mut self) {
        self.pseudo.clear();
    }
}

impl Default for StateIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Handed to the generator during expansion; translates fingerprints to ids
/// and records newly discovered states for the exploration queue.
pub struct IdAllocator<'a> {
    index: &'a mut StateIndex,
    discovered: &'a mut Vec<StateId>,
}

impl<'a> IdAllocator<'a> {
    pub fn new(index: &'a mut StateIndex, discovered: &'a mut Vec<StateId>) -> Self {
        Self { index, discovered }
    }

    /// Looks up or creates the id for a canonical fingerprint. If the
    /// fingerprint was previously only reserved as a pseudo-state, the real
    /// state is instantiated now and scheduled for exploration.
    pub fn get_or_add(&mut self, fingerprint: &[u8]) -> StateId {
        match self.index.ids.get(fingerprint).copied() {
            Some(id) if id >= PSEUDO_STATE_OFFSET => {
                let slot = id - PSEUDO_STATE_OFFSET;
                let real = self.index.add_real(fingerprint);
                self.index.pseudo[slot].0 = Some(real);
                self.discovered.push(real);
                trace!(slot, id = real, "instantiated pseudo state");
                real
            }
            Some(id) => id,
            None => {
                let id = self.index.add_real(fingerprint);
                self.discovered.push(id);
                id
            }
        }
    }

    /// Looks up the id for a fingerprint that has been normalized by a state
    /// symmetry but whose canonical form is not yet confirmed. Unknown
    /// fingerprints receive a reserved pseudo-id instead of a real one.
    pub fn get_or_reserve(&mut self, fingerprint: &[u8]) -> StateId {
        match self.index.ids.get(fingerprint).copied() {
            Some(id) => id,
            None => {
                let slot = self.index.pseudo.len();
                let id = PSEUDO_STATE_OFFSET + slot;
                self.index.pseudo.push((None, fingerprint.to_vec()));
                self.index.ids.insert(fingerprint.to_vec(), id);
                trace!(slot, "reserved pseudo state");
                id
            }
        }
    }
}
