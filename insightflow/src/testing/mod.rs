//! Testing utilities for insightflow pipelines.
//!
//! This module provides:
//! - Scripted and never-answering completion backends
//! - Assertions over run outcomes

mod assertions;
mod mocks;

pub use assertions::{
    assert_artifact_names, assert_completed, assert_failed_at, assert_gated_at,
    assert_stage_status,
};
pub use mocks::{PendingBackend, ScriptedBackend};
