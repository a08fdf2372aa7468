//! Error types for wanbench-types.

use thiserror::Error;

/// Errors raised while parsing or constructing profile values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// Bandwidth string could not be parsed.
    #[error("invalid bandwidth: {0:?}")]
    InvalidRate(String),

    /// Duration string could not be parsed.
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    /// Loss rate string could not be parsed.
    #[error("invalid loss rate: {0:?}")]
    InvalidLossRate(String),

    /// Loss rate is outside [0, 1].
    #[error("loss rate out of range [0, 1]: {0}")]
    LossRateOutOfRange(String),

    /// A profile must run the workload for a non-zero duration.
    #[error("test duration must be greater than zero")]
    ZeroTestDuration,

    /// Profile label or dataset directory name is malformed.
    #[error("invalid profile label {label:?}: {reason}")]
    InvalidLabel {
        /// The offending label.
        label: String,
        /// What was wrong with it.
        reason: String,
    },
}
