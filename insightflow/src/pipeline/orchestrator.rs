//! Sequential execution of a validated pipeline.

use super::RunOutcome;
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, RunContext, TemplateScope};
use crate::core::{RunStatus, StageResult};
use crate::errors::{BackendError, OutputConflictError};
use crate::events::{
    PIPELINE_COMPLETED, PIPELINE_FAILED, PIPELINE_GATED, PIPELINE_STARTED, SANDBOX_COMPLETED,
    SANDBOX_LAUNCH_FAILED, STAGE_COMPLETED, STAGE_FAILED, STAGE_SKIPPED, STAGE_STARTED,
};
use crate::extract::{ExtractedValue, ExtractionResult, Extractor};
use crate::observability::{run_span, stage_span};
use crate::sandbox::{Sandbox, SandboxOutcome};
use crate::stages::{GateVerdict, StageSpec};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// A validated, immutable sequence of stages.
///
/// Built by [`super::PipelineBuilder`]. One pipeline can serve many runs;
/// each run brings its own [`RunContext`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageSpec>,
    config: PipelineConfig,
    extractor: Extractor,
}

/// Mutable state owned by one run.
#[derive(Default)]
struct RunState {
    context: PipelineContext,
    executions: BTreeMap<String, String>,
    sandbox: SandboxOutcome,
}

enum StageStep {
    Continue,
    Stop(RunStatus),
}

enum CallError {
    Backend(BackendError),
    Cancelled(String),
}

impl CallError {
    fn message(&self) -> String {
        match self {
            Self::Backend(e) => e.to_string(),
            Self::Cancelled(reason) => cancelled_message(reason),
        }
    }
}

fn cancelled_message(reason: &str) -> String {
    format!("cancelled: {reason}")
}

fn millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl Pipeline {
    pub(super) fn new(
        name: String,
        stages: Vec<StageSpec>,
        config: PipelineConfig,
        extractor: Extractor,
    ) -> Self {
        Self {
            name,
            stages,
            config,
            extractor,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Creates a fresh run context rooted at the configured output directory.
    #[must_use]
    pub fn run_context(&self) -> RunContext {
        RunContext::from_config(&self.config)
    }

    /// Executes every stage in order.
    ///
    /// Never fails: gate rejections, stage errors and cancellation are
    /// reported through [`RunOutcome::status`] alongside every result
    /// recorded up to that point.
    pub async fn run(&self, run: &RunContext) -> RunOutcome {
        let span = run_span(&self.name, &run.run_id().to_string());
        self.drive(run).instrument(span).await
    }

    async fn drive(&self, run: &RunContext) -> RunOutcome {
        let started = Instant::now();
        let mut state = RunState::default();

        info!(
            pipeline = %self.name,
            stages = self.stages.len(),
            workdir = %run.workdir().display(),
            "Pipeline run started"
        );
        run.emit(
            PIPELINE_STARTED,
            json!({ "pipeline": self.name, "stages": self.stage_names() }),
        )
        .await;

        let mut status = RunStatus::Completed;
        for (index, spec) in self.stages.iter().enumerate() {
            let step = self
                .run_stage(spec, run, &mut state)
                .instrument(stage_span(&spec.name, index))
                .await;

            match step {
                Ok(StageStep::Continue) => {}
                Ok(StageStep::Stop(stop)) => {
                    status = stop;
                    break;
                }
                Err(conflict) => {
                    status = RunStatus::StageError {
                        stage: conflict.stage.clone(),
                        message: conflict.to_string(),
                    };
                    break;
                }
            }
        }

        let duration_ms = millis(started);
        match &status {
            RunStatus::GatedStop { stage, reason } => {
                info!(stage = %stage, reason = %reason, duration_ms, "Pipeline stopped by gate");
                run.emit(
                    PIPELINE_GATED,
                    json!({ "stage": stage, "reason": reason, "duration_ms": duration_ms }),
                )
                .await;
            }
            RunStatus::StageError { stage, message } => {
                warn!(stage = %stage, error = %message, duration_ms, "Pipeline failed");
                run.emit(
                    PIPELINE_FAILED,
                    json!({ "stage": stage, "error": message, "duration_ms": duration_ms }),
                )
                .await;
            }
            _ => {
                info!(stages = state.context.len(), duration_ms, "Pipeline completed");
                run.emit(PIPELINE_COMPLETED, json!({ "duration_ms": duration_ms }))
                    .await;
            }
        }

        RunOutcome {
            run_id: run.run_id(),
            pipeline: self.name.clone(),
            status,
            context: state.context,
            sandbox: state.sandbox,
            stage_order: self.stages.iter().map(|s| s.name.clone()).collect(),
        }
    }

    async fn run_stage(
        &self,
        spec: &StageSpec,
        run: &RunContext,
        state: &mut RunState,
    ) -> Result<StageStep, OutputConflictError> {
        let started_at = Utc::now();
        let timer = Instant::now();

        if run.is_cancelled() {
            let reason = run.token().reason().unwrap_or_default();
            return self
                .fail(spec, run, state, String::new(), cancelled_message(&reason), started_at)
                .await;
        }

        if let Some(condition) = &spec.condition {
            if !condition.evaluate(&state.context) {
                debug!(stage = %spec.name, condition = %condition.description(), "Stage condition not met");
                state
                    .context
                    .insert(StageResult::skipped(&spec.name, condition.description()))?;
                run.emit(
                    STAGE_SKIPPED,
                    json!({ "stage": spec.name, "reason": condition.description() }),
                )
                .await;
                return Ok(StageStep::Continue);
            }
        }

        run.emit(STAGE_STARTED, json!({ "stage": spec.name })).await;

        let prompt = spec.template.render(&TemplateScope {
            context: &state.context,
            dataset: run.dataset(),
            executions: &state.executions,
        });
        let context = dependency_context(spec, state);

        let raw = match self.call_agent(spec, &prompt, &context, run.token()).await {
            Ok(raw) => raw,
            Err(e) => {
                return self
                    .fail(spec, run, state, String::new(), e.message(), started_at)
                    .await;
            }
        };

        let parsed = match self.extractor.extract(&raw, spec.expects) {
            ExtractionResult::Found { value, method } => {
                debug!(stage = %spec.name, method = ?method, "Extracted stage output");
                Some(value)
            }
            ExtractionResult::NotFound { kind, reason } => {
                let message = format!("{kind} extraction failed: {reason}");
                if spec.required {
                    return self.fail(spec, run, state, raw, message, started_at).await;
                }
                warn!(stage = %spec.name, reason = %reason, "Optional stage produced no {kind}");
                None
            }
        };

        let result = StageResult::ok(&spec.name, raw, parsed, started_at);

        if spec.execute_code {
            if let Some(code) = result.code() {
                self.execute(spec, code, run, state).await;
            }
            if state.sandbox.report().is_some_and(|r| r.cancelled) {
                let reason = run.token().reason().unwrap_or_default();
                return self
                    .fail(spec, run, state, result.raw_text, cancelled_message(&reason), started_at)
                    .await;
            }
        }

        let verdict = spec.gate.as_ref().map(|gate| gate.evaluate(&result));
        state.context.insert(result)?;

        let duration_ms = millis(timer);
        info!(stage = %spec.name, duration_ms, "Stage completed");
        run.emit(
            STAGE_COMPLETED,
            json!({ "stage": spec.name, "duration_ms": duration_ms }),
        )
        .await;

        match verdict {
            Some(GateVerdict::Reject(reason)) => {
                info!(stage = %spec.name, reason = %reason, "Gate rejected stage output");
                Ok(StageStep::Stop(RunStatus::GatedStop {
                    stage: spec.name.clone(),
                    reason,
                }))
            }
            Some(GateVerdict::Pass) | None => Ok(StageStep::Continue),
        }
    }

    async fn call_agent(
        &self,
        spec: &StageSpec,
        prompt: &str,
        context: &BTreeMap<String, String>,
        token: &CancellationToken,
    ) -> Result<String, CallError> {
        let timeout = self.config.agent_timeout();
        let call = tokio::time::timeout(timeout, spec.agent.complete(prompt, context));

        tokio::select! {
            biased;
            reason = token.cancelled() => Err(CallError::Cancelled(reason)),
            outcome = call => match outcome {
                Ok(reply) => reply.map_err(CallError::Backend),
                Err(_) => Err(CallError::Backend(BackendError::Timeout {
                    seconds: timeout.as_secs(),
                })),
            },
        }
    }

    /// Runs a code stage's output. Launch failures are recorded, not raised.
    async fn execute(&self, spec: &StageSpec, code: &str, run: &RunContext, state: &mut RunState) {
        let sandbox =
            Sandbox::new(self.config.sandbox.clone()).with_producer(run.produced_by(&spec.name));

        let outcome = match sandbox
            .run_cancellable(code, run.workdir(), self.config.sandbox.timeout(), run.token())
            .await
        {
            Ok(report) => {
                run.emit(
                    SANDBOX_COMPLETED,
                    json!({
                        "stage": spec.name,
                        "exit_status": report.exit_status,
                        "timed_out": report.timed_out,
                        "cancelled": report.cancelled,
                        "artifacts": report.artifact_names(),
                        "code_sha256": report.code_sha256,
                    }),
                )
                .await;
                SandboxOutcome::Executed {
                    stage: spec.name.clone(),
                    report: Box::new(report),
                }
            }
            Err(e) => {
                warn!(stage = %spec.name, error = %e, "Sandbox could not launch code");
                run.emit(
                    SANDBOX_LAUNCH_FAILED,
                    json!({ "stage": spec.name, "error": e.to_string() }),
                )
                .await;
                SandboxOutcome::LaunchFailed {
                    stage: spec.name.clone(),
                    error: e.to_string(),
                }
            }
        };

        state.executions.insert(spec.name.clone(), outcome.summary());
        state.sandbox = outcome;
    }

    async fn fail(
        &self,
        spec: &StageSpec,
        run: &RunContext,
        state: &mut RunState,
        raw: String,
        message: String,
        started_at: DateTime<Utc>,
    ) -> Result<StageStep, OutputConflictError> {
        warn!(stage = %spec.name, error = %message, "Stage failed");
        state
            .context
            .insert(StageResult::failed(&spec.name, raw, &message, started_at))?;
        run.emit(STAGE_FAILED, json!({ "stage": spec.name, "error": message }))
            .await;
        Ok(StageStep::Stop(RunStatus::StageError {
            stage: spec.name.clone(),
            message,
        }))
    }
}

/// Dependency outputs the template does not place itself, keyed by stage.
fn dependency_context(spec: &StageSpec, state: &RunState) -> BTreeMap<String, String> {
    let referenced = spec.template.referenced_stages();
    spec.depends_on
        .iter()
        .filter(|dep| !referenced.contains(*dep))
        .filter_map(|dep| {
            let result = state.context.get(dep)?;
            let mut text = result
                .parsed
                .as_ref()
                .map(ExtractedValue::to_prompt_text)
                .unwrap_or_default();
            if let Some(execution) = state.executions.get(dep) {
                if !text.is_empty() {
                    text.push_str("\n\n");
                }
                text.push_str(execution);
            }
            Some((dep.clone(), text))
        })
        .collect()
}
