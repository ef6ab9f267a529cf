//! What a sandbox run produced.

use crate::core::Artifact;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Marker separating stdout from stderr in merged output.
pub const STDERR_MARKER: &str = "--- stderr ---";

/// Appended to a captured stream that hit the capture limit.
pub const TRUNCATED_MARKER: &str = "[output truncated]";

/// The immutable record of one execution of synthesized code.
///
/// A non-zero exit, a timeout and a cancellation are all ordinary reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxExecutionReport {
    /// Exit code; `None` if the process was killed by a signal.
    pub exit_status: Option<i32>,
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// The wall-clock timeout elapsed and the process was killed.
    pub timed_out: bool,
    /// The run was cancelled and the process was killed.
    pub cancelled: bool,
    /// Files that appeared during the run.
    pub artifacts: BTreeSet<Artifact>,
    /// Wall-clock time from spawn to reap.
    pub duration: Duration,
    /// Where the code was written.
    pub script_path: PathBuf,
    /// Hex SHA-256 of the executed code.
    pub code_sha256: String,
    /// Why the post-run artifact scan failed; `artifacts` is empty then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_error: Option<String>,
}

impl SandboxExecutionReport {
    /// Returns true if the code ran to a zero exit.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0) && !self.timed_out && !self.cancelled
    }

    /// Merges stdout and stderr, separated by [`STDERR_MARKER`] when stderr is non-empty.
    #[must_use]
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(STDERR_MARKER);
            out.push('\n');
            out.push_str(&self.stderr);
        }
        out
    }

    /// Returns artifact file names in path order.
    #[must_use]
    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter_map(|a| a.file_name().map(str::to_string))
            .collect()
    }

    /// A short textual summary for prompts and reports.
    #[must_use]
    pub fn summary(&self) -> String {
        let status = if self.timed_out {
            format!("timed out after {:.1}s", self.duration.as_secs_f64())
        } else if self.cancelled {
            "cancelled".to_string()
        } else {
            match self.exit_status {
                Some(code) => format!("exit status {code}"),
                None => "killed by signal".to_string(),
            }
        };

        let artifacts = if let Some(error) = &self.snapshot_error {
            format!("unavailable ({error})")
        } else if self.artifacts.is_empty() {
            "none".to_string()
        } else {
            self.artifact_names().join(", ")
        };

        let mut text = format!("Execution: {status}\nArtifacts: {artifacts}");
        let output = self.combined_output();
        if !output.trim().is_empty() {
            text.push_str("\nOutput:\n");
            text.push_str(output.trim_end());
        }
        text
    }
}

/// What happened to a code stage's sandbox execution within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SandboxOutcome {
    /// No code stage produced code to run.
    #[default]
    NotRun,
    /// The code ran (to exit, timeout or cancellation).
    Executed {
        /// The stage whose code ran.
        stage: String,
        /// The execution report.
        report: Box<SandboxExecutionReport>,
    },
    /// The code could not be written or started.
    LaunchFailed {
        /// The stage whose code failed to start.
        stage: String,
        /// Why.
        error: String,
    },
}

impl SandboxOutcome {
    /// Returns the report, if the code ran.
    #[must_use]
    pub fn report(&self) -> Option<&SandboxExecutionReport> {
        match self {
            Self::Executed { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }

    /// Returns the stage the outcome belongs to.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::NotRun => None,
            Self::Executed { stage, .. } | Self::LaunchFailed { stage, .. } => Some(stage),
        }
    }

    /// Returns all artifacts, empty unless the code ran.
    #[must_use]
    pub fn artifacts(&self) -> BTreeSet<Artifact> {
        self.report().map(|r| r.artifacts.clone()).unwrap_or_default()
    }

    /// Text used for `{{stage.execution}}` and the report.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::NotRun => String::new(),
            Self::Executed { report, .. } => report.summary(),
            Self::LaunchFailed { error, .. } => format!("Execution could not start: {error}"),
        }
    }
}
