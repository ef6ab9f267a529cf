//! Pipeline configuration.
//!
//! Configuration is loaded from JSON with serde defaults for every field,
//! then optionally overridden from `INSIGHTFLOW_*` environment variables.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable selecting the backend provider.
pub const ENV_BACKEND: &str = "INSIGHTFLOW_BACKEND";
/// Environment variable overriding the backend base URL.
pub const ENV_BASE_URL: &str = "INSIGHTFLOW_BASE_URL";
/// Environment variable overriding the model name.
pub const ENV_MODEL: &str = "INSIGHTFLOW_MODEL";
/// Environment variable carrying the API key.
pub const ENV_API_KEY: &str = "INSIGHTFLOW_API_KEY";
/// Fallback API key variable for Groq-hosted models.
pub const ENV_GROQ_API_KEY: &str = "GROQ_API_KEY";
/// Environment variable overriding the per-call agent timeout.
pub const ENV_AGENT_TIMEOUT: &str = "INSIGHTFLOW_AGENT_TIMEOUT_SECS";
/// Environment variable overriding the sandbox timeout.
pub const ENV_SANDBOX_TIMEOUT: &str = "INSIGHTFLOW_SANDBOX_TIMEOUT_SECS";
/// Environment variable overriding the output directory.
pub const ENV_OUTPUT_DIR: &str = "INSIGHTFLOW_OUTPUT_DIR";
/// Environment variable overriding the sandbox interpreter.
pub const ENV_INTERPRETER: &str = "INSIGHTFLOW_INTERPRETER";

/// Which completion backend to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum BackendConfig {
    /// A local Ollama server.
    Ollama {
        /// Server base URL.
        #[serde(default = "default_ollama_url")]
        base_url: String,
        /// Model name.
        #[serde(default = "default_ollama_model")]
        model: String,
    },
    /// Any OpenAI-compatible chat completions API.
    OpenaiCompatible {
        /// API base URL, without the `/chat/completions` suffix.
        #[serde(default = "default_openai_url")]
        base_url: String,
        /// Model name.
        #[serde(default = "default_openai_model")]
        model: String,
        /// Bearer token.
        #[serde(default, skip_serializing)]
        api_key: Option<String>,
    },
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3".to_string()
}

fn default_openai_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_openai_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::ollama()
    }
}

impl BackendConfig {
    /// A local Ollama backend with default URL and model.
    #[must_use]
    pub fn ollama() -> Self {
        Self::Ollama {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }

    /// An OpenAI-compatible backend with default URL and model.
    #[must_use]
    pub fn openai_compatible(api_key: Option<String>) -> Self {
        Self::OpenaiCompatible {
            base_url: default_openai_url(),
            model: default_openai_model(),
            api_key,
        }
    }

    /// Returns the provider tag.
    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Ollama { .. } => "ollama",
            Self::OpenaiCompatible { .. } => "openai_compatible",
        }
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::Ollama { model, .. } | Self::OpenaiCompatible { model, .. } => model,
        }
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match self {
            Self::Ollama { base_url, .. } | Self::OpenaiCompatible { base_url, .. } => base_url,
        }
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, name: impl Into<String>) -> Self {
        match &mut self {
            Self::Ollama { model, .. } | Self::OpenaiCompatible { model, .. } => *model = name.into(),
        }
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        match &mut self {
            Self::Ollama { base_url, .. } | Self::OpenaiCompatible { base_url, .. } => {
                *base_url = url.into();
            }
        }
        self
    }
}

/// How synthesized code is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter command.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Arguments placed before the script path.
    #[serde(default)]
    pub args: Vec<String>,
    /// File name the code is written to inside the working directory.
    #[serde(default = "default_script_name")]
    pub script_name: String,
    /// Wall-clock timeout in seconds.
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    /// Extensions (without dot, lowercase) counted as artifacts.
    #[serde(default = "default_artifact_extensions")]
    pub artifact_extensions: Vec<String>,
    /// How long to wait for pipe readers after the child is reaped.
    #[serde(default = "default_reader_grace")]
    pub reader_grace_ms: u64,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script_name() -> String {
    "analysis.py".to_string()
}

fn default_sandbox_timeout() -> u64 {
    30
}

fn default_artifact_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "svg", "pdf", "html", "csv", "json"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_reader_grace() -> u64 {
    500
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            script_name: default_script_name(),
            timeout_secs: default_sandbox_timeout(),
            artifact_extensions: default_artifact_extensions(),
            reader_grace_ms: default_reader_grace(),
        }
    }
}

impl SandboxConfig {
    /// Creates a sandbox configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interpreter and its leading arguments.
    #[must_use]
    pub fn with_interpreter(
        mut self,
        interpreter: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.interpreter = interpreter.into();
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the script file name.
    #[must_use]
    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    /// Sets the timeout in seconds.
    #[must_use]
    pub fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    /// Replaces the artifact extension set.
    #[must_use]
    pub fn with_artifact_extensions(mut self, exts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.artifact_extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Gets the timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Gets the reader grace period as a Duration.
    #[must_use]
    pub fn reader_grace(&self) -> Duration {
        Duration::from_millis(self.reader_grace_ms)
    }

    /// Returns true if `path` has one of the artifact extensions.
    #[must_use]
    pub fn is_artifact(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.artifact_extensions
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(ext))
            })
    }
}

/// Top-level configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name used in logs and events.
    #[serde(default = "default_name")]
    pub name: String,
    /// Per-call agent timeout in seconds.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    /// Root under which each run gets its own working directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Completion backend.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Code execution settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

fn default_name() -> String {
    "insightflow".to_string()
}

fn default_agent_timeout() -> u64 {
    120
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            agent_timeout_secs: default_agent_timeout(),
            output_dir: default_output_dir(),
            backend: BackendConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Builds a configuration from defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies `INSIGHTFLOW_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`, keyed by environment variable name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY).or_else(|| lookup(ENV_GROQ_API_KEY));

        if let Some(provider) = lookup(ENV_BACKEND) {
            self.backend = match provider.trim().to_ascii_lowercase().as_str() {
                "ollama" => BackendConfig::ollama(),
                "openai" | "openai_compatible" | "groq" => BackendConfig::openai_compatible(None),
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: ENV_BACKEND.to_string(),
                        value: provider,
                    })
                }
            };
        }
        if let BackendConfig::OpenaiCompatible { api_key: slot, .. } = &mut self.backend {
            if api_key.is_some() {
                *slot = api_key;
            }
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.backend = self.backend.with_base_url(url);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.backend = self.backend.with_model(model);
        }
        if let Some(secs) = parse_secs(&lookup, ENV_AGENT_TIMEOUT)? {
            self.agent_timeout_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, ENV_SANDBOX_TIMEOUT)? {
            self.sandbox.timeout_secs = secs;
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(interpreter) = lookup(ENV_INTERPRETER) {
            self.sandbox.interpreter = interpreter;
        }

        Ok(self)
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the agent timeout in seconds.
    #[must_use]
    pub fn with_agent_timeout_secs(mut self, seconds: u64) -> Self {
        self.agent_timeout_secs = seconds;
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the sandbox configuration.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Gets the agent timeout as a Duration.
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Returns the working directory for a run.
    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.output_dir.join(run_id)
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Some(secs)),
            _ => Err(ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        },
    }
}
