//! Test assertions for run outcomes.

use crate::core::{RunStatus, StageStatus};
use crate::pipeline::RunOutcome;

/// Asserts that the run finished every stage.
pub fn assert_completed(outcome: &RunOutcome) {
    assert!(
        outcome.status.is_completed(),
        "Expected completed run, got status: {}",
        outcome.status
    );
}

/// Asserts that a gate on `stage` stopped the run, returning the reason.
pub fn assert_gated_at<'a>(outcome: &'a RunOutcome, stage: &str) -> &'a str {
    match &outcome.status {
        RunStatus::GatedStop { stage: gated, reason } if gated == stage => reason,
        other => panic!("Expected gated stop at '{stage}', got status: {other}"),
    }
}

/// Asserts that `stage` ended the run with an error, returning the message.
pub fn assert_failed_at<'a>(outcome: &'a RunOutcome, stage: &str) -> &'a str {
    match &outcome.status {
        RunStatus::StageError { stage: failed, message } if failed == stage => message,
        other => panic!("Expected stage error at '{stage}', got status: {other}"),
    }
}

/// Asserts the recorded (or synthesized) status of a stage.
pub fn assert_stage_status(outcome: &RunOutcome, stage: &str, expected: StageStatus) {
    let views = outcome.stage_views();
    let Some(view) = views.iter().find(|v| v.name == stage) else {
        panic!(
            "Stage '{stage}' is not declared. Stages: {:?}",
            outcome.stage_order
        );
    };
    assert_eq!(
        view.status, expected,
        "Expected status {expected} for stage '{stage}', got {}",
        view.status
    );
}

/// Asserts the file names of every discovered artifact, in path order.
pub fn assert_artifact_names(outcome: &RunOutcome, expected: &[&str]) {
    let names: Vec<String> = outcome
        .artifacts()
        .iter()
        .filter_map(|a| a.file_name().map(str::to_string))
        .collect();
    assert_eq!(names, expected, "Unexpected artifacts");
}
