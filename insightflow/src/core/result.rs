//! The immutable record of one stage execution.

use super::StageStatus;
use crate::extract::ExtractedValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of executing (or skipping) one stage.
///
/// Created once per execution and never mutated; a re-run produces a new
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,
    /// The agent's verbatim response (empty if the agent was never called).
    pub raw_text: String,
    /// The structured payload recovered from `raw_text`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ExtractedValue>,
    /// Stage status.
    pub status: StageStatus,
    /// Error or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    /// Creates a successful result.
    #[must_use]
    pub fn ok(
        stage_name: impl Into<String>,
        raw_text: impl Into<String>,
        parsed: Option<ExtractedValue>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            raw_text: raw_text.into(),
            parsed,
            status: StageStatus::Ok,
            error: None,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Creates a failed result, keeping whatever raw text was received.
    #[must_use]
    pub fn failed(
        stage_name: impl Into<String>,
        raw_text: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            raw_text: raw_text.into(),
            parsed: None,
            status: StageStatus::Failed,
            error: Some(error.into()),
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skipped(stage_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            stage_name: stage_name.into(),
            raw_text: String::new(),
            parsed: None,
            status: StageStatus::Skipped,
            error: Some(reason.into()),
            started_at: now,
            ended_at: now,
        }
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }

    /// Returns the parsed JSON payload, if the stage produced one.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.parsed.as_ref().and_then(ExtractedValue::as_json)
    }

    /// Returns the parsed code payload, if the stage produced one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.parsed.as_ref().and_then(ExtractedValue::as_code)
    }
}
