//! End-to-end runs of the orchestrator against scripted backends.

use super::analyst::{self, analyst_pipeline};
use super::{PipelineBuilder, RunOutcome};
use crate::agent::{Agent, CompletionBackend, Persona};
use crate::config::{PipelineConfig, SandboxConfig};
use crate::context::RunContext;
use crate::core::{OutputKind, RunStatus, StageStatus};
use crate::dataset::DatasetSummary;
use crate::errors::BackendError;
use crate::events::CollectingEventSink;
use crate::report::{render_html, ReportOutline, NO_DATA};
use crate::sandbox::SandboxOutcome;
use crate::stages::{Gate, StageCondition, StageSpec};
use crate::testing::{
    assert_artifact_names, assert_completed, assert_failed_at, assert_gated_at, assert_stage_status,
    PendingBackend, ScriptedBackend,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CLEAN_REPLY: &str =
    r#"{"steps": [{"column": "age", "action": "fill with mean", "reason": "12 nulls"}]}"#;
const RELATE_REPLY: &str = r#"[{"x": "age", "y": "income", "type": "scatter"}]"#;
const CODE_REPLY: &str = "Here is the script:\n```python\nprintf 'PNG' > chart.png\necho saved chart\n```\nRun it as-is.";
const INSIGHTS_REPLY: &str = r#"{"patterns": ["income rises with age"], "correlations": [], "distributions": []}"#;

fn dataset() -> DatasetSummary {
    DatasetSummary::new(250, ["age", "income", "city"])
        .with_preview("age income city\n 34  52000 Oslo")
        .with_source("data/input.csv")
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::default()
        .with_output_dir(dir.path())
        .with_sandbox(
            SandboxConfig::new()
                .with_interpreter("sh", Vec::<String>::new())
                .with_script_name("analysis.sh")
                .with_timeout_secs(30),
        )
}

fn happy_backend() -> ScriptedBackend {
    backend_with_code(CODE_REPLY)
}

fn backend_with_code(code_reply: &str) -> ScriptedBackend {
    ScriptedBackend::new()
        .respond_to("Data Cleaner", CLEAN_REPLY)
        .respond_to(
            "Dataset Validator",
            "Verdict:\n{\"decision\": \"YES\", \"reason\": \"250 rows, few nulls\"}",
        )
        .respond_to("You are Analyst", RELATE_REPLY)
        .respond_to("Code Generator", code_reply)
        .respond_to("Insights Agent", INSIGHTS_REPLY)
}

fn visualization_status(outcome: &RunOutcome, run: &RunContext) -> (Option<String>, Option<String>) {
    let report = ReportOutline::standard().build(outcome, run.dataset());
    let section = report.section("Visualization Run").unwrap();
    (section.status.clone(), section.body.clone())
}

async fn run_analyst(
    backend: Arc<dyn CompletionBackend>,
    config: PipelineConfig,
) -> (RunOutcome, RunContext) {
    let pipeline = analyst_pipeline(backend, config).unwrap();
    let run = pipeline.run_context().with_dataset(dataset());
    (pipeline.run(&run).await, run)
}

fn prompt_for(backend: &ScriptedBackend, key: &str) -> String {
    backend
        .calls()
        .into_iter()
        .find(|c| c.system.contains(key))
        .map(|c| c.prompt)
        .unwrap_or_default()
}

#[cfg(unix)]
#[tokio::test]
async fn test_full_run_executes_chart_code() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(happy_backend());
    let (outcome, run) = run_analyst(backend.clone(), config(&dir)).await;

    assert_completed(&outcome);
    assert_artifact_names(&outcome, &["chart.png"]);
    assert_eq!(outcome.context.stage_names(), analyst::STAGES.to_vec());
    assert!(outcome.context.iter().all(|r| r.status == StageStatus::Ok));

    let report = outcome.sandbox.report().expect("code ran");
    assert_eq!(report.exit_status, Some(0));
    assert!(!report.timed_out);
    assert_eq!(report.artifact_names(), vec!["chart.png"]);
    assert_eq!(report.stdout, "saved chart\n");
    assert!(report.script_path.starts_with(dir.path().canonicalize().unwrap()));

    let artifact = outcome.artifacts().into_iter().next().unwrap();
    assert_eq!(artifact.produced_by, run.produced_by("codegen"));
    assert!(artifact.path.starts_with(run.workdir().canonicalize().unwrap()));

    let relate_prompt = prompt_for(&backend, "You are Analyst");
    assert!(relate_prompt.contains("The validator said: 250 rows, few nulls"));
    assert!(relate_prompt.contains("Columns: age, income, city"));
    assert!(relate_prompt.contains("### clean"));

    let codegen_prompt = prompt_for(&backend, "Code Generator");
    assert!(codegen_prompt.contains("from 'data/input.csv'"));
    assert!(codegen_prompt.contains("\"x\": \"age\""));

    let insights_prompt = prompt_for(&backend, "Insights Agent");
    assert!(insights_prompt.contains("Artifacts: chart.png"));
    assert!(insights_prompt.contains("saved chart"));
}

#[tokio::test]
async fn test_validator_no_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_to("Data Cleaner", CLEAN_REPLY)
            .respond_to(
                "Dataset Validator",
                r#"{"decision": "NO", "reason": "80% of income is missing"}"#,
            )
            .respond_to("You are Analyst", RELATE_REPLY),
    );
    let (outcome, _) = run_analyst(backend.clone(), config(&dir)).await;

    assert_eq!(
        outcome.status,
        RunStatus::GatedStop {
            stage: "validate".into(),
            reason: "80% of income is missing".into(),
        }
    );
    assert_eq!(outcome.context.stage_names(), vec!["clean", "validate"]);
    assert_eq!(backend.calls_for("You are Analyst"), 0);
    assert_eq!(outcome.sandbox, SandboxOutcome::NotRun);

    let views: Vec<_> = outcome.stage_views().iter().map(|v| (v.name.to_string(), v.status)).collect();
    assert_eq!(
        views,
        vec![
            ("clean".to_string(), StageStatus::Ok),
            ("validate".to_string(), StageStatus::Ok),
            ("relate".to_string(), StageStatus::Skipped),
            ("codegen".to_string(), StageStatus::Skipped),
            ("insights".to_string(), StageStatus::Skipped),
        ]
    );

    let report = ReportOutline::standard().build(&outcome, Some(&dataset()));
    for title in [
        "3. Identified Column Relations",
        "4. Generated Visualization Code",
        "5. Data Insights",
    ] {
        let section = report.section(title).unwrap();
        assert_eq!(section.status.as_deref(), Some("Skipped"));
        assert_eq!(section.body, None);
    }
    let html = render_html(&report);
    assert_eq!(html.matches(NO_DATA).count(), 4);
    assert!(html.contains("80% of income is missing"));
}

#[tokio::test]
async fn test_gate_at_position_k_runs_exactly_k_stages() {
    let names = ["s1", "s2", "s3", "s4"];

    for k in 1..=names.len() {
        let mut backend = ScriptedBackend::new();
        for (i, name) in names.iter().enumerate() {
            let reply = if i + 1 == k { r#"{"go": "no"}"# } else { r#"{"go": "yes"}"# };
            backend = backend.respond_to(format!("role-{name}."), reply);
        }
        let backend: Arc<dyn CompletionBackend> = Arc::new(backend);

        let mut builder = PipelineBuilder::new("gates");
        let mut previous: Option<&str> = None;
        for name in names {
            let agent = Agent::new(
                name,
                Persona::new(format!("role-{name}"), "Answer", ""),
                backend.clone(),
            );
            let mut spec = StageSpec::new(name, agent, "Proceed?")
                .expects(OutputKind::Json)
                .with_gate(Gate::field_equals("go", "yes"));
            if let Some(prev) = previous {
                spec = spec.with_dependency(prev);
            }
            builder.add_stage(spec).unwrap();
            previous = Some(name);
        }

        let dir = tempfile::tempdir().unwrap();
        let pipeline = builder.build().unwrap();
        let outcome = pipeline.run(&RunContext::new(dir.path())).await;

        assert_eq!(outcome.context.len(), k, "gate at position {k}");
        assert!(outcome.status.is_gated());
        assert_eq!(
            outcome.status,
            RunStatus::GatedStop {
                stage: names[k - 1].to_string(),
                reason: "go was 'no', expected 'yes'".to_string(),
            }
        );
    }
}

#[tokio::test]
async fn test_backend_error_ends_run_with_partial_context() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_to("Data Cleaner", CLEAN_REPLY)
            .respond_to("Dataset Validator", r#"{"decision": "YES", "reason": "ok"}"#)
            .fail_for(
                "You are Analyst",
                BackendError::Status {
                    status: 500,
                    body: "upstream exploded".into(),
                },
            ),
    );
    let (outcome, _) = run_analyst(backend.clone(), config(&dir)).await;

    assert_eq!(
        outcome.status,
        RunStatus::StageError {
            stage: "relate".into(),
            message: "Backend returned status 500: upstream exploded".into(),
        }
    );
    assert_eq!(outcome.context.len(), 3);
    let relate = outcome.result("relate").unwrap();
    assert_eq!(relate.status, StageStatus::Failed);
    assert_eq!(backend.calls_for("Code Generator"), 0);
}

#[tokio::test]
async fn test_required_extraction_miss_fails_stage() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_to("Data Cleaner", CLEAN_REPLY)
            .respond_to("Dataset Validator", "Looks usable to me, go ahead."),
    );

    let (outcome, _) = run_analyst(backend, config(&dir)).await;

    let message = assert_failed_at(&outcome, "validate");
    assert!(message.starts_with("json extraction failed"), "{message}");

    let validate = outcome.result("validate").unwrap();
    assert_eq!(validate.status, StageStatus::Failed);
    assert_eq!(validate.raw_text, "Looks usable to me, go ahead.");
}

#[tokio::test]
async fn test_optional_extraction_miss_continues() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_to("Data Cleaner", "Just drop the rows with missing income.")
            .respond_to("Dataset Validator", r#"{"decision": "NO", "reason": "stop here"}"#),
    );

    let (outcome, _) = run_analyst(backend.clone(), config(&dir)).await;

    let clean = outcome.result("clean").unwrap();
    assert_eq!(clean.status, StageStatus::Ok);
    assert!(clean.parsed.is_none());
    assert_eq!(assert_gated_at(&outcome, "validate"), "stop here");

    let validate_prompt = prompt_for(&backend, "Dataset Validator");
    assert!(validate_prompt.contains("Proposed cleaning steps:\n\n"));
    assert!(!validate_prompt.contains("drop the rows"));
}

#[tokio::test]
async fn test_condition_false_skips_stage() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn CompletionBackend> = Arc::new(
        ScriptedBackend::new()
            .respond_to("role-list.", "[]")
            .respond_to("role-chart.", "should not be asked")
            .respond_to("role-wrap.", "done"),
    );
    let agent = |name: &str| {
        Agent::new(name, Persona::new(format!("role-{name}"), "Answer", ""), backend.clone())
    };

    let pipeline = PipelineBuilder::new("conditional")
        .stage(StageSpec::new("list", agent("list"), "List relations").expects(OutputKind::Json))
        .unwrap()
        .stage(
            StageSpec::new("chart", agent("chart"), "Chart {{list}}")
                .depends_on(["list"])
                .with_condition(StageCondition::json_non_empty("list")),
        )
        .unwrap()
        .stage(StageSpec::new("wrap", agent("wrap"), "Wrap up {{chart}}").depends_on(["chart"]))
        .unwrap()
        .build()
        .unwrap();

    let outcome = pipeline.run(&RunContext::new(dir.path())).await;

    assert_completed(&outcome);
    assert_stage_status(&outcome, "chart", StageStatus::Skipped);
    let chart = outcome.result("chart").unwrap();
    assert_eq!(chart.error.as_deref(), Some("list is non-empty"));
    assert_eq!(outcome.result("wrap").unwrap().raw_text, "done");
}

#[tokio::test]
async fn test_cancellation_interrupts_agent_call() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(PendingBackend::new());
    let pipeline = analyst_pipeline(backend.clone(), config(&dir)).unwrap();
    let run = pipeline.run_context();

    let canceller = {
        let token = run.token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel("user abort");
        })
    };

    let started = Instant::now();
    let outcome = pipeline.run(&run).await;
    canceller.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        outcome.status,
        RunStatus::StageError {
            stage: "clean".into(),
            message: "cancelled: user abort".into(),
        }
    );
    assert_eq!(outcome.context.len(), 1);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(happy_backend());
    let pipeline = analyst_pipeline(backend.clone(), config(&dir)).unwrap();
    let run = pipeline.run_context();
    run.cancel("shutdown");

    let outcome = pipeline.run(&run).await;

    assert_eq!(
        outcome.status,
        RunStatus::StageError {
            stage: "clean".into(),
            message: "cancelled: shutdown".into(),
        }
    );
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_agent_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir).with_agent_timeout_secs(1);
    let (outcome, _) = run_analyst(Arc::new(PendingBackend::new()), config).await;

    assert_eq!(
        outcome.status,
        RunStatus::StageError {
            stage: "clean".into(),
            message: "Backend call timed out after 1s".into(),
        }
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_codegen_timeout_still_reaches_insights() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir).with_sandbox(
        SandboxConfig::new()
            .with_interpreter("sh", Vec::<String>::new())
            .with_script_name("analysis.sh")
            .with_timeout_secs(1),
    );
    let backend = Arc::new(backend_with_code(
        "```python\nprintf 'PNG' > early.png\nsleep 30\n```",
    ));
    let started = Instant::now();
    let (outcome, run) = run_analyst(backend.clone(), config).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_completed(&outcome);
    assert_eq!(outcome.context.stage_names(), analyst::STAGES.to_vec());
    assert_stage_status(&outcome, "codegen", StageStatus::Ok);
    assert_artifact_names(&outcome, &["early.png"]);

    let report = outcome.sandbox.report().expect("code ran");
    assert!(report.timed_out);
    assert_eq!(report.exit_status, None);
    assert!(prompt_for(&backend, "Insights Agent").contains("Execution: timed out after"));

    let (status, body) = visualization_status(&outcome, &run);
    assert_eq!(status.as_deref(), Some("Timed out"));
    assert!(body.unwrap().contains("Artifacts: early.png"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_codegen_nonzero_exit_still_reaches_insights() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend_with_code(
        "```python\necho 'KeyError: income_usd' >&2\nexit 1\n```",
    ));
    let (outcome, run) = run_analyst(backend.clone(), config(&dir)).await;

    assert_completed(&outcome);
    assert_eq!(outcome.context.stage_names(), analyst::STAGES.to_vec());
    assert!(outcome.artifacts().is_empty());

    let report = outcome.sandbox.report().expect("code ran");
    assert_eq!(report.exit_status, Some(1));
    assert!(!report.timed_out);
    assert_eq!(report.stderr, "KeyError: income_usd\n");

    let insights_prompt = prompt_for(&backend, "Insights Agent");
    assert!(insights_prompt.contains("Execution: exit status 1"));
    assert!(insights_prompt.contains("KeyError: income_usd"));

    let (status, body) = visualization_status(&outcome, &run);
    assert_eq!(status.as_deref(), Some("Exit status 1"));
    assert!(body.unwrap().contains("--- stderr ---\nKeyError: income_usd"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_during_sandbox_fails_codegen() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend_with_code("```python\nsleep 30\n```"));
    let pipeline = analyst_pipeline(backend.clone(), config(&dir)).unwrap();
    let run = pipeline.run_context().with_dataset(dataset());

    let canceller = {
        let token = run.token().clone();
        let backend = backend.clone();
        tokio::spawn(async move {
            while backend.calls_for("Code Generator") == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel("user abort");
        })
    };

    let started = Instant::now();
    let outcome = pipeline.run(&run).await;
    canceller.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    let message = assert_failed_at(&outcome, "codegen");
    assert_eq!(message, "cancelled: user abort");
    assert_eq!(outcome.context.stage_names(), vec!["clean", "validate", "relate", "codegen"]);
    assert_eq!(backend.calls_for("Insights Agent"), 0);
    assert!(outcome.sandbox.report().expect("code ran").cancelled);

    let report = ReportOutline::standard().build(&outcome, run.dataset());
    let section = report.section("Visualization Run").unwrap();
    assert_eq!(section.status.as_deref(), Some("Cancelled"));
    let insights = report.section("5. Data Insights").unwrap();
    assert_eq!(insights.status.as_deref(), Some("Skipped"));
    assert_eq!(insights.body, None);
}

#[tokio::test]
async fn test_launch_failure_is_recorded_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir).with_sandbox(
        SandboxConfig::new().with_interpreter("/nonexistent/python9", Vec::<String>::new()),
    );
    let backend = Arc::new(happy_backend());
    let (outcome, _) = run_analyst(backend.clone(), config).await;

    assert_completed(&outcome);
    assert!(matches!(
        &outcome.sandbox,
        SandboxOutcome::LaunchFailed { stage, .. } if stage == "codegen"
    ));
    assert!(outcome.artifacts().is_empty());
    assert!(prompt_for(&backend, "Insights Agent").contains("Execution could not start"));
}

#[tokio::test]
async fn test_event_order_for_gated_run() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_to("Data Cleaner", CLEAN_REPLY)
            .respond_to("Dataset Validator", r#"{"decision": "NO", "reason": "no"}"#),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let pipeline = analyst_pipeline(backend, config(&dir)).unwrap();
    let run = pipeline
        .run_context()
        .with_dataset(dataset())
        .with_event_sink(sink.clone());

    pipeline.run(&run).await;

    assert_eq!(
        sink.names(),
        vec![
            "pipeline.started",
            "stage.started",
            "stage.completed",
            "stage.started",
            "stage.completed",
            "pipeline.gated",
        ]
    );
    let (_, data) = &sink.events()[0];
    assert_eq!(
        data.as_ref().unwrap()["run_id"],
        serde_json::Value::String(run.run_id().to_string())
    );
}
