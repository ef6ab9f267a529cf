//! Prompt templates with `{{stage}}` placeholders.
//!
//! Supported placeholders:
//!
//! | placeholder            | expands to                                          |
//! |------------------------|-----------------------------------------------------|
//! | `{{stage}}`            | the stage's parsed payload as prompt text           |
//! | `{{stage.parsed}}`     | same as `{{stage}}`                                 |
//! | `{{stage.raw}}`        | the stage's verbatim response                       |
//! | `{{stage.execution}}`  | sandbox output of a code stage                      |
//! | `{{stage.a.b}}`        | a field of the stage's parsed JSON                  |
//! | `{{dataset}}`          | the dataset summary                                 |
//! | `{{dataset.rows}}`     | one summary field                                   |
//!
//! Anything that resolves to nothing (a skipped stage, an extraction miss,
//! an absent field) expands to the empty string.

use super::PipelineContext;
use crate::dataset::DatasetSummary;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

/// Name of the reserved dataset root.
pub const DATASET_ROOT: &str = "dataset";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)((?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
            .expect("valid placeholder regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Accessor {
    Parsed,
    Raw,
    Execution,
    Field(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Dataset(Option<String>),
    Stage { stage: String, accessor: Accessor },
}

/// What a template is rendered against.
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    /// Results produced so far in this run.
    pub context: &'a PipelineContext,
    /// The dataset summary, if the run has one.
    pub dataset: Option<&'a DatasetSummary>,
    /// Sandbox output per code stage.
    pub executions: &'a BTreeMap<String, String>,
}

/// A parsed prompt template.
#[derive(Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses a template. Text that is not a well-formed placeholder is kept literally.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut segments = Vec::new();
        let mut cursor = 0;

        for caps in placeholder().captures_iter(&source) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > cursor {
                segments.push(Segment::Literal(source[cursor..whole.start()].to_string()));
            }
            cursor = whole.end();

            let root = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let path: Vec<String> = caps
                .get(2)
                .map_or("", |m| m.as_str())
                .split('.')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();

            segments.push(if root == DATASET_ROOT {
                Segment::Dataset(path.first().cloned())
            } else {
                let accessor = match path.as_slice() {
                    [] => Accessor::Parsed,
                    [one] if one == "parsed" => Accessor::Parsed,
                    [one] if one == "raw" => Accessor::Raw,
                    [one] if one == "execution" => Accessor::Execution,
                    _ => Accessor::Field(path),
                };
                Segment::Stage {
                    stage: root,
                    accessor,
                }
            });
        }

        if cursor < source.len() {
            segments.push(Segment::Literal(source[cursor..].to_string()));
        }

        Self { source, segments }
    }

    /// Returns the template source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the stage names the template references.
    #[must_use]
    pub fn referenced_stages(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Stage { stage, .. } => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns true if the template references the dataset.
    #[must_use]
    pub fn references_dataset(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Dataset(_)))
    }

    /// Returns true if the template has no placeholders.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Substitutes every placeholder.
    #[must_use]
    pub fn render(&self, scope: &TemplateScope<'_>) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Dataset(field) => out.push_str(&render_dataset(scope.dataset, field.as_deref())),
                Segment::Stage { stage, accessor } => out.push_str(&render_stage(scope, stage, accessor)),
            }
        }
        out
    }
}

fn render_dataset(dataset: Option<&DatasetSummary>, field: Option<&str>) -> String {
    match (dataset, field) {
        (None, _) => String::new(),
        (Some(d), None) => d.to_prompt_text(),
        (Some(d), Some(f)) => d.field(f).unwrap_or_default(),
    }
}

fn render_stage(scope: &TemplateScope<'_>, stage: &str, accessor: &Accessor) -> String {
    if let Accessor::Execution = accessor {
        return scope.executions.get(stage).cloned().unwrap_or_default();
    }

    let Some(result) = scope.context.get(stage) else {
        return String::new();
    };

    match accessor {
        Accessor::Raw => result.raw_text.clone(),
        Accessor::Parsed => result
            .parsed
            .as_ref()
            .map(crate::extract::ExtractedValue::to_prompt_text)
            .unwrap_or_default(),
        Accessor::Field(path) => result
            .json()
            .and_then(|value| lookup(value, path))
            .map(value_text)
            .unwrap_or_default(),
        Accessor::Execution => String::new(),
    }
}

fn lookup<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptTemplate")
            .field("source", &self.source)
            .field("stages", &self.referenced_stages())
            .finish()
    }
}

impl From<&str> for PromptTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for PromptTemplate {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageResult;
    use crate::extract::ExtractedValue;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context() -> PipelineContext {
        let mut ctx = PipelineContext::new();
        ctx.insert(StageResult::ok(
            "validate",
            "Verdict: {\"decision\": \"YES\", \"reason\": \"enough rows\"}",
            Some(ExtractedValue::Json(json!({
                "decision": "YES",
                "reason": "enough rows",
                "checks": [{"name": "nulls", "passed": true}]
            }))),
            Utc::now(),
        ))
        .unwrap();
        ctx.insert(StageResult::ok("relate", "no json here", None, Utc::now())).unwrap();
        ctx.insert(StageResult::skipped("clean", "condition false")).unwrap();
        ctx
    }

    fn render(template: &str, ctx: &PipelineContext, dataset: Option<&DatasetSummary>) -> String {
        let executions = BTreeMap::from([("codegen".to_string(), "exit 0".to_string())]);
        PromptTemplate::new(template).render(&TemplateScope {
            context: ctx,
            dataset,
            executions: &executions,
        })
    }

    #[test]
    fn test_stage_field_and_raw() {
        let ctx = context();
        assert_eq!(
            render("Decision={{validate.decision}} because {{ validate.reason }}", &ctx, None),
            "Decision=YES because enough rows"
        );
        assert_eq!(render("{{validate.raw}}", &ctx, None), ctx.get("validate").unwrap().raw_text);
        assert_eq!(render("{{validate.checks.0.passed}}", &ctx, None), "true");
    }

    #[test]
    fn test_parsed_is_pretty_json() {
        let ctx = context();
        let rendered = render("{{validate}}", &ctx, None);
        assert!(rendered.starts_with("{\n  \"checks\""));
        assert_eq!(rendered, render("{{validate.parsed}}", &ctx, None));
    }

    #[test]
    fn test_missing_values_are_empty() {
        let ctx = context();
        assert_eq!(render("[{{relate}}]", &ctx, None), "[]");
        assert_eq!(render("[{{clean}}]", &ctx, None), "[]");
        assert_eq!(render("[{{insights}}]", &ctx, None), "[]");
        assert_eq!(render("[{{validate.nope}}]", &ctx, None), "[]");
        assert_eq!(render("[{{dataset}}]", &ctx, None), "[]");
    }

    #[test]
    fn test_dataset_and_execution() {
        let ctx = PipelineContext::new();
        let dataset = DatasetSummary::new(10, ["a", "b"]);
        assert_eq!(
            render("{{dataset.rows}} rows: {{dataset.column_names}}", &ctx, Some(&dataset)),
            "10 rows: a, b"
        );
        assert_eq!(render("{{codegen.execution}}", &ctx, None), "exit 0");
    }

    #[test]
    fn test_non_placeholders_stay_literal() {
        let ctx = PipelineContext::new();
        let source = "Return [{'x':'col','y':'col'}] or {{ not valid! }} {{";
        assert_eq!(render(source, &ctx, None), source);
        assert!(PromptTemplate::new(source).is_static());
    }

    #[test]
    fn test_referenced_stages() {
        let template = PromptTemplate::new("{{clean}} {{validate.reason}} {{dataset}} {{codegen.execution}}");
        assert_eq!(
            template.referenced_stages().into_iter().collect::<Vec<_>>(),
            vec!["clean", "codegen", "validate"]
        );
        assert!(template.references_dataset());
        assert!(!template.is_static());
    }
}
