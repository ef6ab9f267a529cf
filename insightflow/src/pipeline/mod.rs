//! Pipeline building and execution.
//!
//! This module provides:
//! - [`PipelineBuilder`], which validates a stage list at construction
//! - [`Pipeline`], which runs the stages in order against a [`crate::context::RunContext`]
//! - [`RunOutcome`], the partial-or-complete result of a run
//! - [`analyst`], the standard five-stage dataset analysis pipeline

pub mod analyst;
mod builder;
mod orchestrator;
mod outcome;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use orchestrator::Pipeline;
pub use outcome::{RunOutcome, StageView};
