//! Run lifecycle events.
//!
//! The orchestrator reports progress through the [`EventSink`] carried by
//! each `RunContext`. Every payload includes the `run_id`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run started.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Every stage finished `Ok` or `Skipped`.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A gate rejected a stage result.
pub const PIPELINE_GATED: &str = "pipeline.gated";
/// A stage error ended the run.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A stage is about to call its agent.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage produced an `Ok` result.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage's condition was false.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage produced a `Failed` result.
pub const STAGE_FAILED: &str = "stage.failed";
/// Synthesized code ran to exit, timeout or cancellation.
pub const SANDBOX_COMPLETED: &str = "sandbox.completed";
/// Synthesized code could not be started.
pub const SANDBOX_LAUNCH_FAILED: &str = "sandbox.launch_failed";
