//! Core domain model types for insightflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage, run and output-kind status enums
//! - The immutable per-stage result record
//! - Artifacts discovered by the sandbox

mod artifact;
mod result;
mod status;

pub use artifact::{Artifact, ArtifactKind};
pub use result::StageResult;
pub use status::{OutputKind, RunStatus, StageStatus};
