//! Run conditions for optional stages.

use crate::context::PipelineContext;
use crate::core::StageStatus;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type ConditionFn = dyn Fn(&PipelineContext) -> bool + Send + Sync;

/// Decides, from the results so far, whether a stage runs or is skipped.
#[derive(Clone)]
pub struct StageCondition {
    description: String,
    predicate: Arc<ConditionFn>,
}

impl StageCondition {
    /// Creates a condition from a predicate.
    #[must_use]
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&PipelineContext) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Runs only if `stage` finished `Ok`.
    #[must_use]
    pub fn stage_ok(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self::new(format!("{stage} is ok"), move |ctx| {
            ctx.get(&stage).is_some_and(|r| r.status == StageStatus::Ok)
        })
    }

    /// Runs only if `stage` produced parsed output.
    #[must_use]
    pub fn has_output(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self::new(format!("{stage} has output"), move |ctx| {
            ctx.get(&stage).is_some_and(|r| r.parsed.is_some())
        })
    }

    /// Runs only if `stage` produced a non-empty JSON array or object.
    #[must_use]
    pub fn json_non_empty(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self::new(format!("{stage} is non-empty"), move |ctx| {
            match ctx.get(&stage).and_then(|r| r.json()) {
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::Object(map)) => !map.is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            }
        })
    }

    /// Returns the description, used as the skip reason.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluates the condition.
    #[must_use]
    pub fn evaluate(&self, context: &PipelineContext) -> bool {
        (self.predicate)(context)
    }
}

impl fmt::Debug for StageCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageCondition")
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageResult;
    use crate::extract::ExtractedValue;
    use chrono::Utc;
    use serde_json::json;

    fn ctx_with(stage: &str, parsed: Option<Value>) -> PipelineContext {
        let mut ctx = PipelineContext::new();
        ctx.insert(StageResult::ok(stage, "raw", parsed.map(ExtractedValue::Json), Utc::now()))
            .unwrap();
        ctx
    }

    #[test]
    fn test_stage_ok() {
        let cond = StageCondition::stage_ok("relate");
        assert!(cond.evaluate(&ctx_with("relate", None)));
        assert!(!cond.evaluate(&PipelineContext::new()));
    }

    #[test]
    fn test_has_output() {
        let cond = StageCondition::has_output("relate");
        assert!(!cond.evaluate(&ctx_with("relate", None)));
        assert!(cond.evaluate(&ctx_with("relate", Some(json!([])))));
    }

    #[test]
    fn test_json_non_empty() {
        let cond = StageCondition::json_non_empty("relate");
        assert!(!cond.evaluate(&ctx_with("relate", Some(json!([])))));
        assert!(cond.evaluate(&ctx_with("relate", Some(json!([{"x": "a", "y": "b"}])))));
        assert_eq!(cond.description(), "relate is non-empty");
    }
}
