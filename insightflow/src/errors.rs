//! Error types for the insightflow pipeline.
//!
//! Construction problems surface as [`PipelineValidationError`] with a
//! stable [`ContractErrorInfo`] code. Runtime failures are split by layer:
//! [`BackendError`] for agent calls, [`SandboxError`] for failures to even
//! launch synthesized code, [`ConfigError`] for configuration loading.
//! Extraction misses and gate rejections are ordinary values, not errors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The umbrella error type for insightflow operations.
#[derive(Debug, Error)]
pub enum InsightflowError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage result was recorded twice.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),

    /// An agent backend call failed.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The sandbox could not launch the synthesized code.
    #[error("{0}")]
    Sandbox(#[from] SandboxError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for InsightflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-MISSING_DEP").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition is rejected at construction.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Returns the fix hint, falling back to the default suggestion for the code.
    #[must_use]
    pub fn suggestion(&self) -> Option<&str> {
        let info = self.error_info.as_ref()?;
        info.fix_hint
            .as_deref()
            .or_else(|| ContractSuggestions::get(&info.code))
    }
}

/// Error raised when a second result is recorded for the same stage.
#[derive(Debug, Clone, Error)]
#[error("Output conflict for stage '{stage}': {message}")]
pub struct OutputConflictError {
    /// The stage name.
    pub stage: String,
    /// Additional message.
    pub message: String,
}

impl OutputConflictError {
    /// Creates a new output conflict error.
    #[must_use]
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Failure of a text-completion backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The request never produced an HTTP response.
    #[error("Backend transport failure: {0}")]
    Transport(String),

    /// The backend did not answer in time.
    #[error("Backend call timed out after {seconds}s")]
    Timeout {
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// Credentials were missing or rejected.
    #[error("Backend rejected credentials: {0}")]
    Auth(String),

    /// Rate limit or quota exhausted.
    #[error("Backend quota exceeded: {0}")]
    Quota(String),

    /// Any other non-success HTTP status.
    #[error("Backend returned status {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The (truncated) response body.
        body: String,
    },

    /// The response could not be decoded or had no content.
    #[error("Backend returned an invalid response: {0}")]
    InvalidResponse(String),

    /// The prompt was empty after template substitution.
    #[error("Prompt is empty after template substitution")]
    EmptyPrompt,
}

impl BackendError {
    /// Maps an HTTP status and body into the matching variant.
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > 512 {
            let mut cut = 512;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        match status {
            401 | 403 => Self::Auth(body),
            402 | 429 => Self::Quota(body),
            _ => Self::Status { status, body },
        }
    }
}

/// The sandbox could not prepare or launch the synthesized code.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The working directory could not be created or scanned.
    #[error("Cannot prepare sandbox directory {path}: {source}")]
    Workdir {
        /// The directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The script file could not be written.
    #[error("Cannot write script {path}: {source}")]
    WriteScript {
        /// The script path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The interpreter process could not be spawned.
    #[error("Cannot launch interpreter '{interpreter}': {source}")]
    Launch {
        /// The interpreter command.
        interpreter: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or killing the child failed.
    #[error("Lost track of sandbox process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Configuration could not be loaded or was invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document was malformed.
    #[error("Invalid config: {0}")]
    Parse(String),

    /// An environment override had an invalid value.
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv {
        /// The environment variable.
        key: String,
        /// The offending value.
        value: String,
    },
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-004-MISSING_DEP" => Some(
                "Ensure all dependencies reference stages declared earlier in the pipeline. \
                 Check for typos in stage names.",
            ),
            "CONTRACT-004-DUPLICATE" => Some("Every stage in a pipeline needs a unique name."),
            "CONTRACT-004-SELF_DEP" => Some("A stage cannot consume its own output."),
            "CONTRACT-004-TEMPLATE_REF" => Some(
                "Add the referenced stage to depends_on, or remove the placeholder from the template.",
            ),
            "CONTRACT-004-GATE_EXPECTS" => {
                Some("Gates inspect parsed JSON; declare the gated stage with expects = json.")
            }
            "CONTRACT-004-EMPTY" => Some("Add at least one stage to the pipeline before building."),
            "CONTRACT-004-RESERVED_NAME" => {
                Some("Rename the stage; `dataset` is the template root for the dataset summary.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "relate");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"relate".to_string()));
    }

    #[test]
    fn test_validation_error_code() {
        let err = PipelineValidationError::new("bad")
            .with_error_info(ContractErrorInfo::new("CONTRACT-004-EMPTY", "empty"));
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
        assert_eq!(PipelineValidationError::new("plain").code(), None);
    }

    #[test]
    fn test_suggestion_falls_back_to_defaults() {
        let err = PipelineValidationError::new("self")
            .with_error_info(ContractErrorInfo::new("CONTRACT-004-SELF_DEP", "self"));
        assert_eq!(err.suggestion(), Some("A stage cannot consume its own output."));

        let hinted = PipelineValidationError::new("dup").with_error_info(
            ContractErrorInfo::new("CONTRACT-004-DUPLICATE", "dup").with_fix_hint("rename it"),
        );
        assert_eq!(hinted.suggestion(), Some("rename it"));
        assert_eq!(PipelineValidationError::new("plain").suggestion(), None);
    }

    #[test]
    fn test_backend_error_from_status() {
        assert!(matches!(BackendError::from_status(401, "nope"), BackendError::Auth(_)));
        assert!(matches!(BackendError::from_status(429, "slow down"), BackendError::Quota(_)));
        assert_eq!(
            BackendError::from_status(500, "boom"),
            BackendError::Status { status: 500, body: "boom".to_string() }
        );
    }

    #[test]
    fn test_backend_error_truncates_body() {
        let body = "é".repeat(600);
        match BackendError::from_status(500, body) {
            BackendError::Status { body, .. } => assert!(body.len() <= 512),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: InsightflowError = BackendError::EmptyPrompt.into();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get("CONTRACT-004-TEMPLATE_REF").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }
}
