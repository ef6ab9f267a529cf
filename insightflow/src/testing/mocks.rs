//! Test backends.

use crate::agent::{CompletionBackend, CompletionRequest};
use crate::errors::BackendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
struct Script {
    key: String,
    replies: VecDeque<Result<String, BackendError>>,
}

/// A backend that answers from canned replies keyed by persona role.
///
/// A request matches a script when its system message contains the key.
/// Replies for a key are consumed in order; the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<Vec<Script>>,
    fallback: Mutex<Option<Result<String, BackendError>>>,
    calls: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    /// Creates a backend with no scripts; unmatched requests get an
    /// [`BackendError::InvalidResponse`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for requests whose persona mentions `key`.
    #[must_use]
    pub fn respond_to(self, key: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push(key.into(), Ok(reply.into()));
        self
    }

    /// Queues an error for requests whose persona mentions `key`.
    #[must_use]
    pub fn fail_for(self, key: impl Into<String>, error: BackendError) -> Self {
        self.push(key.into(), Err(error));
        self
    }

    /// Sets the reply for requests no script matches.
    #[must_use]
    pub fn with_fallback(self, reply: impl Into<String>) -> Self {
        *self.fallback.lock() = Some(Ok(reply.into()));
        self
    }

    /// Delays every reply.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    /// Returns the number of requests received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns how many requests matched `key`.
    #[must_use]
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|r| r.system.contains(key)).count()
    }

    fn push(&self, key: String, reply: Result<String, BackendError>) {
        let mut scripts = self.scripts.lock();
        match scripts.iter_mut().find(|s| s.key == key) {
            Some(script) => script.replies.push_back(reply),
            None => scripts.push(Script {
                key,
                replies: VecDeque::from([reply]),
            }),
        }
    }

    fn next_reply(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let mut scripts = self.scripts.lock();
        if let Some(script) = scripts.iter_mut().find(|s| request.system.contains(&s.key)) {
            let reply = if script.replies.len() > 1 {
                script.replies.pop_front()
            } else {
                script.replies.front().cloned()
            };
            if let Some(reply) = reply {
                return reply;
            }
        }
        drop(scripts);

        self.fallback.lock().clone().unwrap_or_else(|| {
            Err(BackendError::InvalidResponse(
                "no scripted reply for this persona".to_string(),
            ))
        })
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError> {
        let reply = self.next_reply(&request);
        self.calls.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

/// A backend that never answers.
#[derive(Debug, Default)]
pub struct PendingBackend {
    calls: AtomicUsize,
}

impl PendingBackend {
    /// Creates a pending backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of requests that started.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for PendingBackend {
    fn model(&self) -> &str {
        "pending"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Err(BackendError::Transport("pending backend resumed".to_string()))
    }
}
