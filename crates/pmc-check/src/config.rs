//! Solver configuration and cooperative cancellation.

use crate::error::CheckError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Order in which maybe states are fed to the eliminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EliminationOrder {
    /// Ascending BFS distance from the initial states.
    Forward,
    /// Descending BFS distance from the initial states.
    ForwardReversed,
    /// Ascending BFS distance to the target (via the backward matrix).
    Backward,
    /// Descending BFS distance to the target.
    BackwardReversed,
    /// Uniformly random permutation drawn from the configured seed.
    Random,
    /// Sorted once by the complexity-aware penalty.
    StaticPenalty,
    /// Reordered after every elimination by the complexity-aware penalty.
    DynamicPenalty,
    /// Reordered after every elimination by the fan-in/fan-out product.
    RegularExpression,
}

impl EliminationOrder {
    pub(crate) fn needs_distances(self) -> bool {
        matches!(
            self,
            Self::Forward | Self::ForwardReversed | Self::Backward | Self::BackwardReversed
        )
    }

    pub(crate) fn needs_forward_distances(self) -> bool {
        matches!(self, Self::Forward | Self::ForwardReversed)
    }

    pub(crate) fn needs_reversed_distances(self) -> bool {
        matches!(self, Self::ForwardReversed | Self::BackwardReversed)
    }

    pub(crate) fn is_penalty_based(self) -> bool {
        matches!(
            self,
            Self::StaticPenalty | Self::DynamicPenalty | Self::RegularExpression
        )
    }

    pub(crate) fn is_static(self) -> bool {
        self.needs_distances() || self == Self::StaticPenalty
    }
}

/// Plain elimination versus SCC-recursive elimination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EliminationMethod {
    /// One priority queue over all maybe states.
    State,
    /// Recursively decompose SCCs down to `maximal_scc_size`, eliminating
    /// interiors before entry states.
    Hybrid,
}

/// Configuration snapshot passed into each solver entry point.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub elimination_order: EliminationOrder,
    pub elimination_method: EliminationMethod,
    /// Base-case size for the Hybrid recursion.
    pub maximal_scc_size: u64,
    /// In Hybrid mode, defer all entry states to one global final round
    /// instead of eliminating them per SCC.
    pub eliminate_entry_states_last: bool,
    /// Emit phase timings.
    pub show_statistics: bool,
    /// Seed for the Random elimination order; the only source of
    /// nondeterminism in the core.
    pub random_seed: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            elimination_order: EliminationOrder::Forward,
            elimination_method: EliminationMethod::State,
            maximal_scc_size: 20,
            eliminate_entry_states_last: true,
            show_statistics: false,
            random_seed: 0,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), CheckError> {
        if self.elimination_method == EliminationMethod::Hybrid && self.maximal_scc_size == 0 {
            return Err(CheckError::InvalidSetting(
                "hybrid elimination requires a positive maximal SCC size".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Cooperative cancellation token, polled between major phases. Cancelling
/// unwinds the running check with [`CheckError::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<(), CheckError> {
        if self.is_cancelled() {
            Err(CheckError::Cancelled)
        } else {
            Ok(())
        }
    }
}
