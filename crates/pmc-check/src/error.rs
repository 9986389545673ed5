//! Check errors.

use thiserror::Error;

/// Typed fault surfaced by a failed check. No partial result is observable
/// on the error path.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The property is outside the supported fragment or semantically
    /// ill-defined (e.g. conditioning on a zero-probability event).
    #[error("invalid property: {0}")]
    InvalidProperty(String),

    /// The model and task do not fit together: inconsistent row sums,
    /// missing reward model, wrong number of initial states.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration value is not supported by the selected algorithm.
    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// Broken internal invariant; should never fire under correct inputs.
    #[error("internal invariant violated: {0}")]
    Unexpected(String),

    /// The cooperative cancellation token was triggered.
    #[error("check cancelled")]
    Cancelled,
}
