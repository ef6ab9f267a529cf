//! Per-run execution context.

use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::dataset::DatasetSummary;
use crate::events::{EventSink, NoOpEventSink};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a single run carries: identity, cancellation, event sink,
/// working directory and the dataset summary.
///
/// Constructed once per run and passed down to the orchestrator and the
/// sandbox. Nothing here is process-global.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    token: Arc<CancellationToken>,
    events: Arc<dyn EventSink>,
    workdir: PathBuf,
    dataset: Option<DatasetSummary>,
}

impl RunContext {
    /// Creates a context whose working directory is `<output_root>/<run id>`.
    #[must_use]
    pub fn new(output_root: impl AsRef<Path>) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            token: Arc::new(CancellationToken::new()),
            events: Arc::new(NoOpEventSink),
            workdir: output_root.as_ref().join(run_id.to_string()),
            dataset: None,
        }
    }

    /// Creates a context rooted at the configured output directory.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.output_dir)
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Shares an existing cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Sets the dataset summary.
    #[must_use]
    pub fn with_dataset(mut self, dataset: DatasetSummary) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Overrides the working directory.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Returns the working directory.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Returns the dataset summary, if any.
    #[must_use]
    pub fn dataset(&self) -> Option<&DatasetSummary> {
        self.dataset.as_ref()
    }

    /// Requests cancellation of this run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the `produced_by` tag for artifacts of `stage`.
    #[must_use]
    pub fn produced_by(&self, stage: &str) -> String {
        format!("{stage}@{}", self.run_id)
    }

    /// Emits an event whose payload is `fields` plus the run id.
    pub async fn emit(&self, event_type: &str, fields: Value) {
        self.events.emit(event_type, Some(self.payload(fields))).await;
    }

    fn payload(&self, fields: Value) -> Value {
        let mut map = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        map.insert("run_id".to_string(), Value::String(self.run_id.to_string()));
        Value::Object(map)
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.is_cancelled())
            .field("workdir", &self.workdir)
            .field("dataset", &self.dataset.as_ref().map(|d| (d.rows, d.columns)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use serde_json::json;

    #[test]
    fn test_workdir_is_per_run() {
        let a = RunContext::new("outputs");
        let b = RunContext::new("outputs");
        assert_ne!(a.run_id(), b.run_id());
        assert_ne!(a.workdir(), b.workdir());
        assert_eq!(a.workdir(), Path::new("outputs").join(a.run_id().to_string()));
    }

    #[test]
    fn test_from_config() {
        let config = PipelineConfig::default().with_output_dir("/tmp/insightflow");
        let ctx = RunContext::from_config(&config);
        assert!(ctx.workdir().starts_with("/tmp/insightflow"));
    }

    #[test]
    fn test_produced_by() {
        let ctx = RunContext::new("out");
        assert_eq!(ctx.produced_by("codegen"), format!("codegen@{}", ctx.run_id()));
    }

    #[test]
    fn test_shared_token() {
        let token = Arc::new(CancellationToken::new());
        let ctx = RunContext::new("out").with_cancellation_token(token.clone());
        token.cancel("stop");
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_emit_adds_run_id() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = RunContext::new("out").with_event_sink(sink.clone());

        ctx.emit("stage.started", json!({"stage": "clean"})).await;
        ctx.emit("pipeline.started", Value::Null).await;

        let events = sink.events();
        let first = events[0].1.as_ref().unwrap();
        assert_eq!(first["stage"], "clean");
        assert_eq!(first["run_id"], ctx.run_id().to_string());
        assert_eq!(events[1].1.as_ref().unwrap()["run_id"], ctx.run_id().to_string());
    }
}
