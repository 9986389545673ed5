//! State-space exploration.
//!
//! The [`Explorer`] drives an external [`StateGenerator`] over the reachable
//! state space and materializes a sparse transition matrix, assigning compact
//! state ids through a fingerprint table. It supports bounded approximation
//! (skipping expansion of unpromising states and patching their rows with
//! sound bounds afterwards), reserved pseudo-ids for states whose canonical
//! form is not yet known, and iterative refinement that re-enters with the
//! persisted id table.

pub mod explorer;
pub mod generator;

pub use explorer::{
    ApproximationHeuristic, ExploreConfig, ExploreError, ExploredModel, Explorer,
};
pub use generator::{
    Choice, IdAllocator, StateBehavior, StateGenerator, StateId, StateIndex, PSEUDO_STATE_OFFSET,
};
