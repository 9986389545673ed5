//! Check tasks, models, and results: the contract with the front end.

use crate::error::CheckError;
use pmc_storage::{BitSet, SparseMatrix};
use pmc_values::ValueRing;
use std::collections::HashMap;

/// The property to check. State formulas (`phi`/`psi`/targets) arrive fully
/// resolved as bit sets over the state space; property parsing belongs to
/// the front end.
#[derive(Clone, Debug)]
pub enum PropertyKind {
    /// `P(phi U psi)`.
    Until { phi: BitSet, psi: BitSet },
    /// `P(phi U<=bound psi)`.
    BoundedUntil { phi: BitSet, psi: BitSet, bound: u64 },
    /// `P(F target)`.
    Reachability { target: BitSet },
    /// Expected accumulated reward until reaching `target`.
    ReachabilityReward {
        target: BitSet,
        reward_model: Option<String>,
    },
    /// `P(F target | F condition)`.
    Conditional { target: BitSet, condition: BitSet },
    /// Long-run fraction of time spent in `psi` states.
    LongRunAverage { psi: BitSet },
    /// Long-run average reward.
    LongRunReward { reward_model: Option<String> },
}

/// One unit of work handed to the checker.
#[derive(Clone, Debug)]
pub struct CheckTask {
    pub property: PropertyKind,
    /// Restrict the computation (and the meaningful result entries) to the
    /// initial states.
    pub only_initial_states: bool,
}

/// Result of a successful check. Quantitative vectors are indexed by state
/// id; when the task was restricted to initial states, only the entries of
/// initial states are meaningful and all others are zero.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckResult<V> {
    Quantitative(Vec<V>),
    Qualitative(BitSet),
}

impl<V> CheckResult<V> {
    pub fn as_quantitative(&self) -> Option<&[V]> {
        match self {
            CheckResult::Quantitative(values) => Some(values),
            CheckResult::Qualitative(_) => None,
        }
    }

    pub fn as_qualitative(&self) -> Option<&BitSet> {
        match self {
            CheckResult::Quantitative(_) => None,
            CheckResult::Qualitative(states) => Some(states),
        }
    }
}

/// An explicit-state model: the transition matrix plus the state sets and
/// reward vectors the solvers consume.
#[derive(Clone, Debug)]
pub struct ExplicitModel<V> {
    pub transitions: SparseMatrix<V>,
    pub initial_states: BitSet,
    /// Named state-reward vectors, each of state-space length.
    pub reward_models: HashMap<String, Vec<V>>,
}

impl<V: ValueRing> ExplicitModel<V> {
    pub fn new(transitions: SparseMatrix<V>, initial_states: BitSet) -> Self {
        Self {
            transitions,
            initial_states,
            reward_models: HashMap::new(),
        }
    }

    pub fn with_reward_model(mut self, name: &str, rewards: Vec<V>) -> Self {
        self.reward_models.insert(name.to_owned(), rewards);
        self
    }

    pub fn state_count(&self) -> usize {
        self.transitions.group_count()
    }

    /// The backward-transition view of the matrix.
    pub fn backward_transitions(&self) -> SparseMatrix<V> {
        self.transitions.transpose()
    }

    pub(crate) fn reward_model(&self, name: &Option<String>) -> Result<&[V], CheckError> {
        match name {
            Some(name) => self.reward_models.get(name).map(Vec::as_slice).ok_or_else(|| {
                CheckError::InvalidArgument(format!("unknown reward model '{name}'"))
            }),
            None => match self.reward_models.len() {
                1 => Ok(self.reward_models.values().next().unwrap()),
                0 => Err(CheckError::InvalidArgument(
                    "model has no reward model".to_owned(),
                )),
                _ => Err(CheckError::InvalidArgument(
                    "reward model name required, model has several".to_owned(),
                )),
            },
        }
    }

    /// The single initial state, for algorithms that require exactly one.
    pub(crate) fn unique_initial_state(&self) -> Result<usize, CheckError> {
        if self.initial_states.count() != 1 {
            return Err(CheckError::InvalidArgument(
                "model is required to have exactly one initial state".to_owned(),
            ));
        }
        Ok(self.initial_states.next_set(0))
    }
}
