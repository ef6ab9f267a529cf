//! Run reports.
//!
//! A [`ReportOutline`] lists sections and where each one's content comes
//! from; [`ReportOutline::build`] turns a [`RunOutcome`] into a [`Report`]
//! where every section exists even when the run stopped early, and
//! [`render_html`] renders it with escaped content. Styling is left to
//! whoever embeds the HTML.

use crate::core::StageStatus;
use crate::dataset::DatasetSummary;
use crate::pipeline::{analyst, RunOutcome};
use crate::sandbox::SandboxOutcome;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Placeholder shown for a section without content.
pub const NO_DATA: &str = "No data available";

/// Where a section's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "stage", rename_all = "snake_case")]
pub enum SectionSource {
    /// The dataset preview.
    DatasetPreview,
    /// A stage's output.
    Stage(String),
    /// The sandbox run of synthesized code.
    Execution,
}

/// One rendered section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    /// Heading.
    pub title: String,
    /// Status label, for stage and execution sections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Error or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Content; `None` renders as [`NO_DATA`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A report ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Document title.
    pub title: String,
    /// How the run ended.
    pub status: String,
    /// Sections in outline order.
    pub sections: Vec<ReportSection>,
}

impl Report {
    /// Finds a section by title.
    #[must_use]
    pub fn section(&self, title: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.title == title)
    }
}

/// The list of sections a report shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutline {
    title: String,
    sections: Vec<(String, SectionSource)>,
}

impl ReportOutline {
    /// Creates an empty outline.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            sections: Vec::new(),
        }
    }

    /// Appends a section.
    #[must_use]
    pub fn section(mut self, title: impl Into<String>, source: SectionSource) -> Self {
        self.sections.push((title.into(), source));
        self
    }

    /// Appends a section showing `stage`'s output.
    #[must_use]
    pub fn stage(self, title: impl Into<String>, stage: impl Into<String>) -> Self {
        self.section(title, SectionSource::Stage(stage.into()))
    }

    /// The outline for [`analyst::analyst_pipeline`].
    #[must_use]
    pub fn standard() -> Self {
        Self::new("Data Analysis Report")
            .section("Dataset Preview (First 10 Rows)", SectionSource::DatasetPreview)
            .stage("1. Data Cleaning Steps", analyst::CLEAN)
            .stage("2. Dataset Validation Result", analyst::VALIDATE)
            .stage("3. Identified Column Relations", analyst::RELATE)
            .stage("4. Generated Visualization Code", analyst::CODEGEN)
            .section("Visualization Run", SectionSource::Execution)
            .stage("5. Data Insights", analyst::INSIGHTS)
    }

    /// Builds a report. Every section is present whatever the run status.
    #[must_use]
    pub fn build(&self, outcome: &RunOutcome, dataset: Option<&DatasetSummary>) -> Report {
        let views = outcome.stage_views();
        let sections = self
            .sections
            .iter()
            .map(|(title, source)| match source {
                SectionSource::DatasetPreview => ReportSection {
                    title: title.clone(),
                    status: None,
                    note: None,
                    body: dataset.map(|d| d.preview.clone()).and_then(non_blank),
                },
                SectionSource::Stage(stage) => {
                    let view = views.iter().find(|v| v.name == stage.as_str());
                    ReportSection {
                        title: title.clone(),
                        status: Some(status_label(view.map_or(StageStatus::Skipped, |v| v.status))),
                        note: view.and_then(|v| v.result).and_then(|r| r.error.clone()),
                        body: view.and_then(|v| v.display_text()),
                    }
                }
                SectionSource::Execution => execution_section(title, &outcome.sandbox),
            })
            .collect();

        Report {
            title: self.title.clone(),
            status: outcome.status.to_string(),
            sections,
        }
    }
}

impl Default for ReportOutline {
    fn default() -> Self {
        Self::standard()
    }
}

fn execution_section(title: &str, sandbox: &SandboxOutcome) -> ReportSection {
    let (status, note) = match sandbox {
        SandboxOutcome::NotRun => ("Not run".to_string(), None),
        SandboxOutcome::Executed { report, .. } => {
            let status = if report.timed_out {
                "Timed out".to_string()
            } else if report.cancelled {
                "Cancelled".to_string()
            } else {
                match report.exit_status {
                    Some(code) => format!("Exit status {code}"),
                    None => "Killed".to_string(),
                }
            };
            (status, None)
        }
        SandboxOutcome::LaunchFailed { error, .. } => ("Launch failed".to_string(), Some(error.clone())),
    };

    ReportSection {
        title: title.to_string(),
        status: Some(status),
        note,
        body: match sandbox {
            SandboxOutcome::Executed { report, .. } => non_blank(report.summary()),
            _ => None,
        },
    }
}

fn status_label(status: StageStatus) -> String {
    let label = match status {
        StageStatus::Ok => "Ok",
        StageStatus::Failed => "Failed",
        StageStatus::Skipped => "Skipped",
    };
    label.to_string()
}

fn non_blank(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

/// Escapes `&`, `<` and `>`.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Renders a report as a standalone HTML document.
#[must_use]
pub fn render_html(report: &Report) -> String {
    let mut html = String::new();
    let title = escape_html(&report.title);
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<p class=\"run-status\">{}</p>\n",
        escape_html(&report.status)
    );

    for section in &report.sections {
        let _ = writeln!(html, "<h2>{}</h2>", escape_html(&section.title));
        if let Some(status) = &section.status {
            let _ = writeln!(html, "<p class=\"status\">{}</p>", escape_html(status));
        }
        if let Some(note) = &section.note {
            let _ = writeln!(html, "<p class=\"note\">{}</p>", escape_html(note));
        }
        match &section.body {
            Some(body) => {
                let _ = writeln!(html, "<pre><code>{}</code></pre>", escape_html(body));
            }
            None => {
                let _ = writeln!(html, "<p><em>{NO_DATA}</em></p>");
            }
        }
    }

    html.push_str("</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::core::{RunStatus, StageResult};
    use crate::extract::ExtractedValue;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn gated_outcome() -> RunOutcome {
        let mut context = PipelineContext::new();
        context
            .insert(StageResult::ok(
                "clean",
                "{}",
                Some(ExtractedValue::Json(serde_json::json!({"steps": []}))),
                Utc::now(),
            ))
            .unwrap();
        context
            .insert(StageResult::ok(
                "validate",
                "",
                Some(ExtractedValue::Json(
                    serde_json::json!({"decision": "NO", "reason": "x < y & z"}),
                )),
                Utc::now(),
            ))
            .unwrap();
        RunOutcome {
            run_id: Uuid::new_v4(),
            pipeline: "insightflow".into(),
            status: RunStatus::GatedStop {
                stage: "validate".into(),
                reason: "x < y & z".into(),
            },
            context,
            sandbox: SandboxOutcome::NotRun,
            stage_order: analyst::STAGES.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_escape_order() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
        assert_eq!(escape_html("&lt;"), "&amp;lt;");
    }

    #[test]
    fn test_gated_report_keeps_every_section() {
        let dataset = DatasetSummary::new(3, ["a", "b"]).with_preview("a b\n1 2");
        let report = ReportOutline::standard().build(&gated_outcome(), Some(&dataset));

        assert_eq!(report.sections.len(), 7);
        assert_eq!(report.section("Dataset Preview (First 10 Rows)").unwrap().body.as_deref(), Some("a b\n1 2"));

        let relate = report.section("3. Identified Column Relations").unwrap();
        assert_eq!(relate.status.as_deref(), Some("Skipped"));
        assert_eq!(relate.body, None);

        let run = report.section("Visualization Run").unwrap();
        assert_eq!(run.status.as_deref(), Some("Not run"));

        let validate = report.section("2. Dataset Validation Result").unwrap();
        assert_eq!(validate.status.as_deref(), Some("Ok"));
        assert!(validate.body.as_deref().unwrap().contains("\"decision\": \"NO\""));
    }

    #[test]
    fn test_render_html() {
        let report = ReportOutline::standard().build(&gated_outcome(), None);
        let html = render_html(&report);

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h2>Dataset Preview (First 10 Rows)</h2>\n<p><em>No data available</em></p>"));
        assert!(html.contains("<h2>5. Data Insights</h2>\n<p class=\"status\">Skipped</p>\n<p><em>No data available</em></p>"));
        assert!(html.contains("x &lt; y &amp; z"));
        assert!(!html.contains("x < y"));
        assert_eq!(html.matches(NO_DATA).count(), 5);
    }

    #[test]
    fn test_custom_outline() {
        let outline = ReportOutline::new("Mine").stage("Cleaning", "clean").stage("Unknown", "nope");
        let report = outline.build(&gated_outcome(), None);
        assert_eq!(report.title, "Mine");
        assert_eq!(report.sections[1].status.as_deref(), Some("Skipped"));
    }
}
