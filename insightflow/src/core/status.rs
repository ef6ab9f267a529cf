//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a stage expects to recover from its agent's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// A JSON object or array.
    Json,
    /// A fenced source code block.
    Code,
    /// The raw text itself.
    Text,
}

impl Default for OutputKind {
    fn default() -> Self {
        Self::Text
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Code => write!(f, "code"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// The execution status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Ok,
    /// Stage failed.
    Failed,
    /// Stage did not run.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if downstream stages may consume this result.
    #[must_use]
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Ok | Self::Skipped)
    }
}

/// The state of a pipeline run.
///
/// `Pending → Running → (GatedStop | StageError | Completed)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not started.
    Pending,
    /// A stage is executing.
    Running {
        /// The executing stage.
        stage: String,
    },
    /// A gate rejected the stage output; no later stage ran.
    GatedStop {
        /// The gated stage.
        stage: String,
        /// Why the gate rejected.
        reason: String,
    },
    /// A stage failed or the run was cancelled.
    StageError {
        /// The failing stage.
        stage: String,
        /// The failure message.
        message: String,
    },
    /// Every stage finished.
    Completed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running { stage } => write!(f, "running[{stage}]"),
            Self::GatedStop { stage, reason } => write!(f, "gated_stop[{stage}]: {reason}"),
            Self::StageError { stage, message } => write!(f, "stage_error[{stage}]: {message}"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::GatedStop { .. } | Self::StageError { .. } | Self::Completed
        )
    }

    /// Returns true if every stage finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if a gate ended the run.
    #[must_use]
    pub fn is_gated(&self) -> bool {
        matches!(self, Self::GatedStop { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Ok.to_string(), "ok");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_dependency_satisfaction() {
        assert!(StageStatus::Ok.satisfies_dependency());
        assert!(StageStatus::Skipped.satisfies_dependency());
        assert!(!StageStatus::Failed.satisfies_dependency());
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running { stage: "clean".into() }.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::GatedStop { stage: "validate".into(), reason: "no".into() }.is_gated());
    }

    #[test]
    fn test_run_status_serialize() {
        let status = RunStatus::GatedStop {
            stage: "validate".into(),
            reason: "too many missing values".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "gated_stop");
        assert_eq!(json["stage"], "validate");
    }

    #[test]
    fn test_output_kind_serialize() {
        let json = serde_json::to_string(&OutputKind::Code).unwrap();
        assert_eq!(json, r#""code""#);
    }
}
