//! Fenced code block recovery.

use super::{ExtractedValue, ExtractionMethod, ExtractionMiss, ExtractionResult};
use crate::core::OutputKind;
use regex::Regex;
use std::sync::OnceLock;

/// Fence markers accepted for synthesized analysis code.
pub const DEFAULT_CODE_LANGUAGES: &[&str] = &["python", "py", "python3"];

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+#.\-]*)[^\n]*\n(.*?)```")
            .expect("valid fenced block regex")
    })
}

fn open_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+#.\-]*)[^\n]*\n(.*)\z").expect("valid open fence regex")
    })
}

fn prose_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^\s*(?:here is|here's|here are|sure\b|certainly|of course|below is|the following|this (?:code|script|will)|explanation|note:|i have|i've|i will|let me|in this)",
        )
        .expect("valid prose marker regex")
    })
}

/// A line with at least one construct prose rarely has.
fn code_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[=(\[{]|^#|:$|^(?:import|from|def|class|for|while|if|elif|else|try|except|with|return|raise|print)\b",
        )
        .expect("valid code line regex")
    })
}

/// A plain sentence: four or more words ending in `.`, `!` or `?`.
fn sentence_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][\w'’,;\-]*(?:\s+[\w'’,;\-]+){3,}[.!?]$").expect("valid sentence regex")
    })
}

/// Unfenced text counts as code only when no line opens like prose, some
/// line looks like code, and sentences are not the majority.
fn reads_as_prose(raw: &str) -> bool {
    if prose_marker().is_match(raw) {
        return true;
    }
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if !lines.iter().any(|line| code_line().is_match(line)) {
        return true;
    }
    let sentences = lines.iter().filter(|line| sentence_line().is_match(line)).count();
    sentences * 2 > lines.len()
}

pub(super) fn extract_code(raw: &str, languages: &[String]) -> ExtractionResult {
    let not_found = |reason| ExtractionResult::NotFound {
        kind: OutputKind::Code,
        reason,
    };

    if raw.trim().is_empty() {
        return not_found(ExtractionMiss::Empty);
    }

    let wanted = |tag: &str| languages.iter().any(|l| l.eq_ignore_ascii_case(tag));
    let mut untagged: Option<String> = None;

    for caps in fenced_block().captures_iter(raw) {
        let tag = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        if wanted(tag) {
            return found(Some(tag), body, ExtractionMethod::Fenced);
        }
        if tag.is_empty() && untagged.is_none() {
            untagged = Some(body.to_string());
        }
    }

    if let Some(body) = untagged {
        return found(None, &body, ExtractionMethod::FencedUntagged);
    }

    if raw.contains("```") {
        // A response cut off mid-block still carries usable code.
        if let Some(caps) = open_fence().captures(raw) {
            let tag = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());
            if wanted(tag) && !body.contains("```") && !body.trim().is_empty() {
                return found(Some(tag), body, ExtractionMethod::FencedUnterminated);
            }
        }
        return not_found(ExtractionMiss::NoCodeBlock);
    }

    if reads_as_prose(raw) {
        return not_found(ExtractionMiss::ProseWithoutFence);
    }

    ExtractionResult::Found {
        value: ExtractedValue::Code {
            language: None,
            source: raw.to_string(),
        },
        method: ExtractionMethod::Verbatim,
    }
}

fn found(tag: Option<&str>, body: &str, method: ExtractionMethod) -> ExtractionResult {
    ExtractionResult::Found {
        value: ExtractedValue::Code {
            language: tag.map(str::to_ascii_lowercase),
            source: body.trim_end_matches(['\n', '\r']).to_string(),
        },
        method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn langs() -> Vec<String> {
        DEFAULT_CODE_LANGUAGES.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_prefers_target_language_over_earlier_fence() {
        let raw = "Install first:\n```bash\npip install pandas\n```\nThen run:\n```python\nprint('hi')\n```\n";
        let result = extract_code(raw, &langs());
        assert_eq!(result.code(), Some("print('hi')"));
    }

    #[test]
    fn test_untagged_fence_fallback() {
        let raw = "Here you go:\n```\nx = 1\n```";
        let result = extract_code(raw, &langs());
        assert!(matches!(
            result,
            ExtractionResult::Found { method: ExtractionMethod::FencedUntagged, .. }
        ));
        assert_eq!(result.code(), Some("x = 1"));
    }

    #[test]
    fn test_unterminated_fence() {
        let raw = "```python\nimport os\nprint(os.getcwd())\n";
        let result = extract_code(raw, &langs());
        assert_eq!(result.code(), Some("import os\nprint(os.getcwd())"));
    }

    #[test]
    fn test_other_language_only() {
        let raw = "```bash\nls -la\n```";
        assert_eq!(extract_code(raw, &langs()).miss(), Some(&ExtractionMiss::NoCodeBlock));
    }

    #[test]
    fn test_plain_sentences_are_prose() {
        for raw in [
            "The chart below plots age against income for every city.",
            "Age and income move together.\nIncome rises with age in most cities!",
            "plot age vs income",
            "Average age: 34",
        ] {
            assert_eq!(
                extract_code(raw, &langs()).miss(),
                Some(&ExtractionMiss::ProseWithoutFence),
                "input: {raw}"
            );
        }
    }

    #[test]
    fn test_code_with_docstring_sentence_is_code() {
        let raw = "def plot(df):\n    Draw every city on one chart.\n    df.plot()\n";
        assert!(!reads_as_prose(raw));
        assert!(extract_code(raw, &langs()).code().is_some());
        assert!(!reads_as_prose("x = 1"));
        assert!(!reads_as_prose("plt.savefig('chart.png')"));
    }

    #[test]
    fn test_case_insensitive_tag() {
        let raw = "```Python\nprint(1)\n```";
        match extract_code(raw, &langs()) {
            ExtractionResult::Found { value: ExtractedValue::Code { language, .. }, .. } => {
                assert_eq!(language.as_deref(), Some("python"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
