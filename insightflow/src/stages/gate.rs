//! Gates: predicates that may halt a run after a stage.

use crate::core::StageResult;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Outcome of evaluating a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// The run may continue.
    Pass,
    /// The run stops with this reason.
    Reject(String),
}

impl GateVerdict {
    /// Returns true if the gate passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

type GateFn = dyn Fn(&Value) -> GateVerdict + Send + Sync;

/// A predicate over a stage's parsed JSON output.
///
/// A stage without parsed JSON always fails its gate.
#[derive(Clone)]
pub struct Gate {
    description: String,
    check: Arc<GateFn>,
}

impl Gate {
    /// Creates a gate from an arbitrary predicate.
    #[must_use]
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> GateVerdict + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Passes when `field` is a string equal to `expected`, ignoring case
    /// and surrounding whitespace.
    ///
    /// On rejection the reason is the output's own `reason` field when it
    /// has one.
    #[must_use]
    pub fn field_equals(field: impl Into<String>, expected: impl Into<String>) -> Self {
        let field = field.into();
        let expected = expected.into();
        let description = format!("{field} == {expected}");

        Self::new(description, move |value| {
            let actual = value.get(&field).map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            });
            match actual {
                Some(actual) if actual.eq_ignore_ascii_case(expected.trim()) => GateVerdict::Pass,
                actual => {
                    let stated = value
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|r| !r.is_empty());
                    let reason = match (stated, actual) {
                        (Some(reason), _) => reason.to_string(),
                        (None, Some(actual)) => format!("{field} was '{actual}', expected '{expected}'"),
                        (None, None) => format!("output has no '{field}' field"),
                    };
                    GateVerdict::Reject(reason)
                }
            }
        })
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluates the gate against a stage result.
    #[must_use]
    pub fn evaluate(&self, result: &StageResult) -> GateVerdict {
        match result.json() {
            Some(value) => (self.check)(value),
            None => GateVerdict::Reject(format!(
                "no structured output to check ({})",
                self.description
            )),
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate").field("description", &self.description).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractedValue;
    use chrono::Utc;
    use serde_json::json;

    fn result(parsed: Option<Value>) -> StageResult {
        StageResult::ok("validate", "raw", parsed.map(ExtractedValue::Json), Utc::now())
    }

    #[test]
    fn test_field_equals_pass_case_insensitive() {
        let gate = Gate::field_equals("decision", "YES");
        assert!(gate.evaluate(&result(Some(json!({"decision": " yes "})))).passed());
    }

    #[test]
    fn test_field_equals_reject_uses_reason() {
        let gate = Gate::field_equals("decision", "YES");
        let verdict = gate.evaluate(&result(Some(json!({
            "decision": "NO",
            "reason": "80% of rows are empty"
        }))));
        assert_eq!(verdict, GateVerdict::Reject("80% of rows are empty".to_string()));
    }

    #[test]
    fn test_field_equals_reject_without_reason() {
        let gate = Gate::field_equals("decision", "YES");
        assert_eq!(
            gate.evaluate(&result(Some(json!({"decision": "MAYBE"})))),
            GateVerdict::Reject("decision was 'MAYBE', expected 'YES'".to_string())
        );
        assert_eq!(
            gate.evaluate(&result(Some(json!({"verdict": "YES"})))),
            GateVerdict::Reject("output has no 'decision' field".to_string())
        );
    }

    #[test]
    fn test_missing_parse_rejects() {
        let gate = Gate::field_equals("decision", "YES");
        assert!(!gate.evaluate(&result(None)).passed());
    }

    #[test]
    fn test_custom_gate() {
        let gate = Gate::new("at least one relation", |v| {
            if v.as_array().is_some_and(|a| !a.is_empty()) {
                GateVerdict::Pass
            } else {
                GateVerdict::Reject("no relations found".into())
            }
        });
        assert!(gate.evaluate(&result(Some(json!([{"x": "a"}])))).passed());
        assert!(!gate.evaluate(&result(Some(json!([])))).passed());
        assert_eq!(gate.description(), "at least one relation");
    }
}
