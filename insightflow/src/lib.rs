//! # Insightflow
//!
//! Orchestrates a fixed sequence of LLM-backed stages over a tabular dataset:
//! clean, validate, relate, synthesize chart code, summarize insights.
//!
//! - **Stages as data**: each [`stages::StageSpec`] binds one agent, a prompt
//!   template over earlier stage outputs, and what to extract from the reply
//! - **Gates**: a stage may halt the run when its structured output fails a check
//! - **Resilient extraction**: JSON or fenced code is recovered from free text
//!   as a tagged found / not-found value
//! - **Sandboxed execution**: synthesized code runs as a child process under a
//!   timeout, and the files it writes are collected as artifacts
//! - **Partial results**: a run always returns what it produced, whatever
//!   stopped it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use insightflow::prelude::*;
//!
//! let config = PipelineConfig::from_env()?;
//! let backend = build_backend(&config.backend, config.agent_timeout())?;
//! let pipeline = analyst_pipeline(backend, config)?;
//!
//! let run = pipeline
//!     .run_context()
//!     .with_dataset(DatasetSummary::new(250, ["age", "income"]).with_source("data/input.csv"));
//! let outcome = pipeline.run(&run).await;
//!
//! let html = render_html(&ReportOutline::standard().build(&outcome, run.dataset()));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod agent;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod dataset;
pub mod errors;
pub mod events;
pub mod extract;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod sandbox;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(feature = "http")]
    pub use crate::agent::build_backend;
    pub use crate::agent::{Agent, CompletionBackend, CompletionRequest, GenerationParams, Persona};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{BackendConfig, PipelineConfig, SandboxConfig};
    pub use crate::context::{PipelineContext, PromptTemplate, RunContext};
    pub use crate::core::{Artifact, ArtifactKind, OutputKind, RunStatus, StageResult, StageStatus};
    pub use crate::dataset::DatasetSummary;
    pub use crate::errors::{
        BackendError, ConfigError, InsightflowError, OutputConflictError,
        PipelineValidationError, SandboxError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::extract::{extract, ExtractedValue, ExtractionResult, Extractor};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::analyst::analyst_pipeline;
    pub use crate::pipeline::{Pipeline, PipelineBuilder, RunOutcome};
    pub use crate::report::{render_html, Report, ReportOutline};
    pub use crate::sandbox::{Sandbox, SandboxExecutionReport, SandboxOutcome};
    pub use crate::stages::{Gate, StageCondition, StageSpec};
}
