//! Run state: the per-run context, the stage result store and prompt templates.

mod pipeline_context;
mod run;
mod template;

pub use pipeline_context::PipelineContext;
pub use run::RunContext;
pub use template::{PromptTemplate, TemplateScope, DATASET_ROOT};
