//! # wanbench-core
//!
//! Pure logic for wanbench (no I/O, instant tests).
//!
//! ## Design Philosophy
//!
//! Everything here takes values and returns values:
//! - [`stats`] - mean and linear-interpolated percentiles
//! - [`aggregate`] - grouping run records into summary records
//! - [`matrix`] - the experiment plan and its progress state
//!
//! Containers, kernel impairment and disk access live in `wanbench-harness`,
//! which drives the state defined here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod matrix;
pub mod stats;

pub use aggregate::{summarize, GroupField, GroupKey, SummaryRecord};
pub use matrix::{ExperimentMatrixState, MatrixPlan};
pub use stats::{mean, percentile, MetricSummary};
