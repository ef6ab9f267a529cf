//! HTTP completion backends.

use super::{CompletionBackend, CompletionRequest};
use crate::config::BackendConfig;
use crate::errors::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn messages(request: &CompletionRequest) -> Vec<ChatMessage<'_>> {
    vec![
        ChatMessage {
            role: "system",
            content: &request.system,
        },
        ChatMessage {
            role: "user",
            content: &request.prompt,
        },
    ]
}

fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Transport(e.to_string()))
}

fn map_send_error(err: &reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout {
            seconds: timeout.as_secs(),
        }
    } else {
        BackendError::Transport(err.to_string())
    }
}

async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
    timeout: Duration,
) -> Result<Value, BackendError> {
    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| map_send_error(&e, timeout))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::from_status(status.as_u16(), body));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| BackendError::InvalidResponse(format!("response is not JSON: {e}")))
}

fn content_at(content: Option<&str>, path: &str) -> Result<String, BackendError> {
    match content {
        Some(text) => Ok(text.to_string()),
        None => Err(BackendError::InvalidResponse(format!("missing {path} in response"))),
    }
}

/// A backend talking to an Ollama server's `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    base_url: String,
    model: String,
    timeout: Duration,
    client: Client,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl OllamaBackend {
    /// Creates a backend for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            client: build_client(timeout)?,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> OllamaChatRequest<'a> {
        let params = &request.params;
        let options = (params.temperature.is_some() || params.max_tokens.is_some()).then(|| {
            OllamaOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            }
        });
        OllamaChatRequest {
            model: &self.model,
            messages: messages(request),
            stream: false,
            options,
        }
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError> {
        let url = self.endpoint();
        debug!(url = %url, model = %self.model, "Calling Ollama");
        let value = post_json(&self.client, &url, None, &self.body(&request), self.timeout).await?;
        content_at(value.pointer("/message/content").and_then(Value::as_str), "message.content")
    }
}

/// A backend for any OpenAI-compatible `/chat/completions` API (Groq, LiteLLM, vLLM).
#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    client: Client,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleBackend {
    /// Creates a backend for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout,
            client: build_client(timeout)?,
        })
    }

    /// Returns true if an API key is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> OpenAiChatRequest<'a> {
        OpenAiChatRequest {
            model: &self.model,
            messages: messages(request),
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
        }
    }
}

impl std::fmt::Debug for OpenAiCompatibleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.has_api_key())
            .finish()
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError> {
        let url = self.endpoint();
        debug!(url = %url, model = %self.model, "Calling chat completions API");
        let value = post_json(
            &self.client,
            &url,
            self.api_key.as_deref(),
            &self.body(&request),
            self.timeout,
        )
        .await?;
        content_at(
            value.pointer("/choices/0/message/content").and_then(Value::as_str),
            "choices[0].message.content",
        )
    }
}

/// Builds the backend selected by `config`.
///
/// # Errors
///
/// Returns [`BackendError::Auth`] if an OpenAI-compatible backend has no
/// API key, or [`BackendError::Transport`] if the HTTP client cannot be built.
pub fn build_backend(
    config: &BackendConfig,
    timeout: Duration,
) -> Result<Arc<dyn CompletionBackend>, BackendError> {
    match config {
        BackendConfig::Ollama { base_url, model } => {
            Ok(Arc::new(OllamaBackend::new(base_url, model, timeout)?))
        }
        BackendConfig::OpenaiCompatible {
            base_url,
            model,
            api_key,
        } => {
            if api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                return Err(BackendError::Auth(format!(
                    "no API key configured for {base_url}"
                )));
            }
            Ok(Arc::new(OpenAiCompatibleBackend::new(
                base_url,
                model,
                api_key.clone(),
                timeout,
            )?))
        }
    }
}
