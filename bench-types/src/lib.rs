//! # wanbench-types
//!
//! Data model shared by every wanbench crate.
//!
//! - [`NetworkConditionProfile`], [`Rate`], [`LossRate`] - Impairment profiles
//! - [`CellKey`], [`RevisionDescriptor`] - Matrix cell identity
//! - [`RunRecord`], [`RunOutcome`], [`FailureReason`], [`Metrics`] - Run results
//! - [`ProfileError`] - Parse and validation errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod profile;
mod record;

pub use error::ProfileError;
pub use profile::{
    duration_str, format_duration, parse_duration, LossRate, NetworkConditionProfile, Rate,
    DATASET_DIR_PREFIX,
};
pub use record::{
    metric_names, CellKey, FailureReason, MetricValue, Metrics, RevisionDescriptor, RunOutcome,
    RunRecord,
};
