//! The value returned by a pipeline run.

use crate::context::PipelineContext;
use crate::core::{Artifact, RunStatus, StageResult, StageStatus};
use crate::sandbox::SandboxOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Everything a run produced, returned even when it stopped early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// The run id.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// How the run ended.
    pub status: RunStatus,
    /// Results of every stage that ran or was skipped by its condition.
    pub context: PipelineContext,
    /// What happened to synthesized code.
    #[serde(default)]
    pub sandbox: SandboxOutcome,
    /// Every declared stage, in execution order.
    pub stage_order: Vec<String>,
}

/// One declared stage as a report sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageView<'a> {
    /// Stage name.
    pub name: &'a str,
    /// Recorded status, or `Skipped` if the stage never ran.
    pub status: StageStatus,
    /// The recorded result, if any.
    pub result: Option<&'a StageResult>,
}

impl StageView<'_> {
    /// Text a report should show for this stage, if any.
    ///
    /// Parsed output wins over raw text; blank text counts as none.
    #[must_use]
    pub fn display_text(&self) -> Option<String> {
        let result = self.result?;
        let text = match &result.parsed {
            Some(parsed) => parsed.to_prompt_text(),
            None => result.raw_text.clone(),
        };
        (!text.trim().is_empty()).then_some(text)
    }
}

impl RunOutcome {
    /// Returns true if every stage finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    /// Returns the result recorded for `stage`.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.context.get(stage)
    }

    /// Returns one view per declared stage, synthesizing `Skipped` for
    /// stages the run never reached.
    #[must_use]
    pub fn stage_views(&self) -> Vec<StageView<'_>> {
        self.stage_order
            .iter()
            .map(|name| {
                let result = self.context.get(name);
                StageView {
                    name,
                    status: result.map_or(StageStatus::Skipped, |r| r.status),
                    result,
                }
            })
            .collect()
    }

    /// Returns every artifact the sandbox discovered.
    #[must_use]
    pub fn artifacts(&self) -> BTreeSet<Artifact> {
        self.sandbox.artifacts()
    }
}
