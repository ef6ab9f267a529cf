//! LLM-backed agents.
//!
//! An [`Agent`] binds an immutable [`Persona`] to a [`CompletionBackend`].
//! It is a pure request/response wrapper: no state survives between calls
//! and no retries are attempted.

#[cfg(feature = "http")]
mod http;
mod persona;

#[cfg(feature = "http")]
pub use http::{build_backend, OllamaBackend, OpenAiCompatibleBackend};
pub use persona::Persona;

use crate::errors::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Optional sampling parameters forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A single text-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The persona framing sent as the system message.
    pub system: String,
    /// The user message: rendered prompt plus context sections.
    pub prompt: String,
    /// Sampling parameters.
    #[serde(default)]
    pub params: GenerationParams,
}

/// A text-completion backend (local model server, hosted API, test double).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Returns a short identifier of the model behind this backend.
    fn model(&self) -> &str;

    /// Sends the request and returns the raw response text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError>;
}

/// A persona bound to a backend.
#[derive(Clone)]
pub struct Agent {
    id: String,
    persona: Persona,
    backend: Arc<dyn CompletionBackend>,
    params: GenerationParams,
}

impl Agent {
    /// Creates a new agent.
    #[must_use]
    pub fn new(id: impl Into<String>, persona: Persona, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            id: id.into(),
            persona,
            backend,
            params: GenerationParams::default(),
        }
    }

    /// Sets the sampling parameters.
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Returns the agent id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the persona.
    #[must_use]
    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Sends `prompt` plus `context` to the backend and returns its text verbatim.
    ///
    /// Every context entry is appended to the prompt as its own section.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::EmptyPrompt`] without calling the backend if
    /// the prompt is blank, otherwise whatever the backend reports.
    pub async fn complete(
        &self,
        prompt: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<String, BackendError> {
        if prompt.trim().is_empty() {
            return Err(BackendError::EmptyPrompt);
        }

        let request = CompletionRequest {
            system: self.persona.system_prompt(),
            prompt: compose_prompt(prompt, context),
            params: self.params.clone(),
        };

        debug!(
            agent = %self.id,
            model = %self.backend.model(),
            prompt_chars = request.prompt.len(),
            context_keys = context.len(),
            "Sending completion request"
        );

        self.backend.complete(request).await
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.persona.role)
            .field("model", &self.backend.model())
            .finish()
    }
}

fn compose_prompt(prompt: &str, context: &BTreeMap<String, String>) -> String {
    let mut composed = prompt.trim_end().to_string();
    for (key, value) in context {
        composed.push_str("\n\n### ");
        composed.push_str(key);
        composed.push('\n');
        if value.trim().is_empty() {
            composed.push_str("(no output)");
        } else {
            composed.push_str(value.trim_end());
        }
    }
    composed
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::function;

    fn persona() -> Persona {
        Persona::new(
            "Validate dataset usability",
            "Return JSON {decision, reason}",
            "A strict dataset gatekeeper.",
        )
        .with_name("Dataset Validator")
    }

    #[tokio::test]
    async fn test_complete_returns_backend_text_verbatim() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_model().return_const("mock".to_string());
        backend
            .expect_complete()
            .with(function(|req: &CompletionRequest| {
                req.system.contains("Validate dataset usability") && req.prompt.starts_with("Check it")
            }))
            .times(1)
            .returning(|_| Ok("  {\"decision\": \"YES\"}  ".to_string()));

        let agent = Agent::new("validator", persona(), Arc::new(backend));
        let text = agent.complete("Check it", &BTreeMap::new()).await.unwrap();
        assert_eq!(text, "  {\"decision\": \"YES\"}  ");
    }

    #[tokio::test]
    async fn test_empty_prompt_never_reaches_backend() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_model().return_const("mock".to_string());
        backend.expect_complete().never();

        let agent = Agent::new("validator", persona(), Arc::new(backend));
        let err = agent.complete("  \n ", &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err, BackendError::EmptyPrompt);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_model().return_const("mock".to_string());
        backend
            .expect_complete()
            .returning(|_| Err(BackendError::Quota("daily limit".into())));

        let agent = Agent::new("validator", persona(), Arc::new(backend));
        let err = agent.complete("go", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::Quota(_)));
    }

    #[test]
    fn test_compose_prompt_sections() {
        let mut context = BTreeMap::new();
        context.insert("clean".to_string(), "drop nulls\n".to_string());
        context.insert("validate".to_string(), String::new());

        let composed = compose_prompt("Find relations.\n", &context);
        assert_eq!(
            composed,
            "Find relations.\n\n### clean\ndrop nulls\n\n### validate\n(no output)"
        );
    }

    #[test]
    fn test_agent_debug_hides_backend() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_model().return_const("llama3".to_string());
        let agent = Agent::new("v", persona(), Arc::new(backend));
        let debug = format!("{agent:?}");
        assert!(debug.contains("llama3"));
        assert!(debug.contains("Validate dataset usability"));
    }
}
