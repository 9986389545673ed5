//! Probabilistic model checking by state elimination.
//!
//! The [`Checker`] answers until probabilities, bounded-until probabilities,
//! reachability rewards, conditional probabilities and long-run averages
//! over an [`ExplicitModel`], exactly (over the scalar ring) rather than
//! iteratively: maybe states are removed one by one while their probability
//! mass is redistributed. The [`game`] module contributes the qualitative
//! attractor analysis for two-player stochastic games.
//!
//! Everything is single-threaded and deterministic; the only source of
//! nondeterminism is the explicit seed of the random elimination order.

pub mod config;
pub mod eliminator;
pub mod error;
pub mod game;
mod longrun;
pub mod queue;
pub mod reachability;
pub mod task;

pub use config::{CancellationToken, CoreConfig, EliminationMethod, EliminationOrder};
pub use eliminator::{ConditionalTag, EliminationMode, StateEliminator};
pub use error::CheckError;
pub use queue::{create_state_priority_queue, PenaltyFunction, StatePriorityQueue};
pub use reachability::Checker;
pub use task::{CheckResult, CheckTask, ExplicitModel, PropertyKind};
