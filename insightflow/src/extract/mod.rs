//! Recovery of structured payloads from free-text model responses.
//!
//! Model output is never guaranteed to be well-formed, so extraction
//! returns a tagged [`ExtractionResult`] rather than an error: a miss is an
//! ordinary outcome every caller has to handle.
//!
//! ```
//! use insightflow::core::OutputKind;
//! use insightflow::extract::extract;
//!
//! let result = extract("Verdict: {\"decision\": \"YES\"} -- done", OutputKind::Json);
//! assert!(result.is_found());
//! assert_eq!(result.json().unwrap()["decision"], "YES");
//! ```

mod code;
mod json;

use crate::core::OutputKind;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use code::DEFAULT_CODE_LANGUAGES;

/// A payload recovered from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtractedValue {
    /// A parsed JSON document.
    Json(serde_json::Value),
    /// A source code block.
    Code {
        /// The fence's language marker, if any.
        language: Option<String>,
        /// The code itself.
        source: String,
    },
    /// Plain text.
    Text(String),
}

impl ExtractedValue {
    /// Returns the kind of payload.
    #[must_use]
    pub fn kind(&self) -> OutputKind {
        match self {
            Self::Json(_) => OutputKind::Json,
            Self::Code { .. } => OutputKind::Code,
            Self::Text(_) => OutputKind::Text,
        }
    }

    /// Returns the JSON value, if this is one.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the code source, if this is code.
    #[must_use]
    pub fn as_code(&self) -> Option<&str> {
        match self {
            Self::Code { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Renders the payload as prompt-ready text.
    ///
    /// JSON is pretty-printed, code and text are returned as-is.
    #[must_use]
    pub fn to_prompt_text(&self) -> String {
        match self {
            Self::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Self::Code { source, .. } => source.clone(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// How a payload was recovered, from most to least certain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// An embedded JSON region parsed as-is.
    Strict,
    /// A JSON region parsed after lenient repair.
    Lenient,
    /// A fenced block tagged with a target language.
    Fenced,
    /// An untagged fenced block.
    FencedUntagged,
    /// A target-language fence that was never closed.
    FencedUnterminated,
    /// The whole response, which contained no prose.
    Verbatim,
    /// Text passthrough.
    Passthrough,
}

/// Why nothing was recovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExtractionMiss {
    /// The response was empty or whitespace.
    Empty,
    /// No `{` or `[` appeared in the response.
    NoJsonCandidate,
    /// Every JSON region ran off the end of the response.
    Truncated {
        /// Deepest nesting left open.
        unclosed: usize,
    },
    /// Balanced regions existed but none parsed, even leniently.
    Unparseable {
        /// Number of regions tried.
        candidates: usize,
    },
    /// Fences existed but none carried a target language or no tag.
    NoCodeBlock,
    /// No fence, and the text reads as prose rather than code.
    ProseWithoutFence,
}

impl fmt::Display for ExtractionMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "response was empty"),
            Self::NoJsonCandidate => write!(f, "no JSON object or array in response"),
            Self::Truncated { unclosed } => {
                write!(f, "JSON appears truncated ({unclosed} unclosed brackets)")
            }
            Self::Unparseable { candidates } => {
                write!(f, "{candidates} JSON-like regions found but none parsed")
            }
            Self::NoCodeBlock => write!(f, "no fenced block in a recognised language"),
            Self::ProseWithoutFence => write!(f, "response is prose without a code fence"),
        }
    }
}

/// The outcome of an extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    /// A payload was recovered.
    Found {
        /// The payload.
        value: ExtractedValue,
        /// How it was recovered.
        method: ExtractionMethod,
    },
    /// Nothing usable was found.
    NotFound {
        /// The kind that was sought.
        kind: OutputKind,
        /// Diagnostic reason.
        reason: ExtractionMiss,
    },
}

impl ExtractionResult {
    /// Returns true if a payload was recovered.
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    /// Returns the kind that was sought or found.
    #[must_use]
    pub fn kind(&self) -> OutputKind {
        match self {
            Self::Found { value, .. } => value.kind(),
            Self::NotFound { kind, .. } => *kind,
        }
    }

    /// Returns the recovered payload, if any.
    #[must_use]
    pub fn value(&self) -> Option<&ExtractedValue> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::NotFound { .. } => None,
        }
    }

    /// Consumes the result, returning the payload if any.
    #[must_use]
    pub fn into_value(self) -> Option<ExtractedValue> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::NotFound { .. } => None,
        }
    }

    /// Returns the recovered JSON value, if any.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.value().and_then(ExtractedValue::as_json)
    }

    /// Returns the recovered code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.value().and_then(ExtractedValue::as_code)
    }

    /// Returns the miss reason, if nothing was found.
    #[must_use]
    pub fn miss(&self) -> Option<&ExtractionMiss> {
        match self {
            Self::Found { .. } => None,
            Self::NotFound { reason, .. } => Some(reason),
        }
    }
}

/// Extracts payloads, configured with the code languages to look for.
#[derive(Debug, Clone)]
pub struct Extractor {
    code_languages: Vec<String>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LANGUAGES.iter().copied())
    }
}

impl Extractor {
    /// Creates an extractor accepting the given fence language markers.
    #[must_use]
    pub fn new(code_languages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            code_languages: code_languages
                .into_iter()
                .map(|l| l.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns the accepted fence language markers.
    #[must_use]
    pub fn code_languages(&self) -> &[String] {
        &self.code_languages
    }

    /// Extracts a payload of the expected kind from `raw`.
    #[must_use]
    pub fn extract(&self, raw: &str, expect: OutputKind) -> ExtractionResult {
        match expect {
            OutputKind::Json => json::extract_json(raw),
            OutputKind::Code => code::extract_code(raw, &self.code_languages),
            OutputKind::Text => ExtractionResult::Found {
                value: ExtractedValue::Text(raw.to_string()),
                method: ExtractionMethod::Passthrough,
            },
        }
    }
}

/// Extracts a payload using the default extractor.
#[must_use]
pub fn extract(raw: &str, expect: OutputKind) -> ExtractionResult {
    Extractor::default().extract(raw, expect)
}
