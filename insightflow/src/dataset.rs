//! The dataset boundary.
//!
//! Loading and profiling a table happens outside this crate; stages only
//! ever see this summary.

use serde::{Deserialize, Serialize};

/// Shape and preview of the dataset under analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Number of data rows.
    pub rows: usize,
    /// Number of columns.
    pub columns: usize,
    /// Column names in table order.
    pub column_names: Vec<String>,
    /// A rendered preview of the first rows.
    #[serde(default)]
    pub preview: String,
    /// Where synthesized code can load the table from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl DatasetSummary {
    /// Creates a summary; `columns` is taken from `column_names`.
    #[must_use]
    pub fn new(rows: usize, column_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let column_names: Vec<String> = column_names.into_iter().map(Into::into).collect();
        Self {
            rows,
            columns: column_names.len(),
            column_names,
            preview: String::new(),
            source: None,
        }
    }

    /// Sets the preview text.
    #[must_use]
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = preview.into();
        self
    }

    /// Sets the source location (a path or URL).
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns a single field as text, for `{{dataset.<field>}}` placeholders.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "rows" => Some(self.rows.to_string()),
            "columns" => Some(self.columns.to_string()),
            "column_names" => Some(self.column_names.join(", ")),
            "preview" => Some(self.preview.clone()),
            "source" => self.source.clone(),
            _ => None,
        }
    }

    /// Renders the summary as prompt text.
    #[must_use]
    pub fn to_prompt_text(&self) -> String {
        let mut text = format!(
            "Rows: {}\nColumns: {}\nColumn names: {}",
            self.rows,
            self.columns,
            self.column_names.join(", ")
        );
        if !self.preview.trim().is_empty() {
            text.push_str("\n\nPreview:\n");
            text.push_str(self.preview.trim_end());
        }
        text
    }
}
