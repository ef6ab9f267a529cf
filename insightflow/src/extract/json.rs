//! Bracket-balanced JSON recovery.

use super::{ExtractedValue, ExtractionMethod, ExtractionMiss, ExtractionResult};
use crate::core::OutputKind;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

/// Upper bound on bytes scanned per pass, summed over all candidates.
const SCAN_BUDGET_BYTES: usize = 8 * 1024 * 1024;

enum Scan {
    /// Byte index of the closing bracket.
    Closed(usize),
    /// Ran off the end with this many brackets open.
    Unclosed(usize),
    /// Byte index of a closer that did not match its opener.
    Mismatched(usize),
}

impl Scan {
    /// Bytes walked from `start` to reach this result.
    fn span(&self, start: usize, text_len: usize) -> usize {
        match *self {
            Self::Closed(end) | Self::Mismatched(end) => end + 1 - start,
            Self::Unclosed(_) => text_len - start,
        }
    }
}

/// Scans from the bracket at `start` to its matching closer.
///
/// String literals delimited by any of `quotes` are skipped, honouring
/// backslash escapes.
fn scan_balanced(text: &str, start: usize, quotes: &[char]) -> Scan {
    let mut closers: Vec<char> = Vec::new();
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }

        match c {
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(c) {
                    return Scan::Mismatched(start + offset);
                }
                if closers.is_empty() {
                    return Scan::Closed(start + offset);
                }
            }
            q if quotes.contains(&q) => in_string = Some(q),
            _ => {}
        }
    }

    Scan::Unclosed(closers.len())
}

fn candidate_starts(text: &str) -> Vec<usize> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .map(|(i, _)| i)
        .collect()
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

#[derive(Default)]
struct Pass {
    examined: usize,
    closed: usize,
    deepest_unclosed: usize,
    /// First candidate that parsed to `[]` or `{}`.
    empty: Option<Value>,
}

/// Tries every candidate in order and returns the first non-empty value.
///
/// Empty containers are remembered rather than returned, so a stray `[ ]`
/// in prose does not hide the real document after it.
fn first_value<F>(raw: &str, starts: &[usize], quotes: &[char], parse: F) -> (Option<Value>, Pass)
where
    F: Fn(&str) -> Option<Value>,
{
    let mut pass = Pass::default();
    let mut budget = SCAN_BUDGET_BYTES;

    for &start in starts {
        if budget == 0 {
            debug!(examined = pass.examined, "JSON scan budget exhausted");
            break;
        }
        let scan = scan_balanced(raw, start, quotes);
        pass.examined += 1;
        budget = budget.saturating_sub(scan.span(start, raw.len()));

        match scan {
            Scan::Closed(end) => {
                pass.closed += 1;
                match parse(&raw[start..=end]) {
                    Some(value) if is_empty_container(&value) => {
                        pass.empty.get_or_insert(value);
                    }
                    Some(value) => return (Some(value), pass),
                    None => {}
                }
            }
            Scan::Unclosed(depth) => pass.deepest_unclosed = pass.deepest_unclosed.max(depth),
            Scan::Mismatched(_) => {}
        }
    }

    (None, pass)
}

pub(super) fn extract_json(raw: &str) -> ExtractionResult {
    let not_found = |reason| ExtractionResult::NotFound {
        kind: OutputKind::Json,
        reason,
    };

    if raw.trim().is_empty() {
        return not_found(ExtractionMiss::Empty);
    }

    let starts = candidate_starts(raw);
    if starts.is_empty() {
        return not_found(ExtractionMiss::NoJsonCandidate);
    }

    let found = |value, method| ExtractionResult::Found {
        value: ExtractedValue::Json(value),
        method,
    };

    // Every candidate gets a strict attempt before any repair is tried.
    let (value, strict) = first_value(raw, &starts, &['"'], |region| serde_json::from_str(region).ok());
    if let Some(value) = value {
        return found(value, ExtractionMethod::Strict);
    }

    let (value, lenient) = first_value(raw, &starts, &['"', '\''], |region| {
        serde_json::from_str(&relax(region)).ok()
    });
    if let Some(value) = value {
        return found(value, ExtractionMethod::Lenient);
    }

    if let Some(value) = strict.empty {
        return found(value, ExtractionMethod::Strict);
    }
    if let Some(value) = lenient.empty {
        return found(value, ExtractionMethod::Lenient);
    }

    if strict.closed == 0 && strict.deepest_unclosed > 0 {
        not_found(ExtractionMiss::Truncated {
            unclosed: strict.deepest_unclosed,
        })
    } else {
        not_found(ExtractionMiss::Unparseable {
            candidates: strict.examined,
        })
    }
}

fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"))
}

fn bare_words() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_\-]*(?:[ \t]+[A-Za-z_][A-Za-z0-9_\-]*)*")
            .expect("valid bare word regex")
    })
}

/// Repairs the usual ways models get JSON almost right.
///
/// Single-quoted strings become double-quoted, bare keys and word values
/// are quoted, Python literals are mapped, trailing commas are dropped.
/// Text inside string literals is never rewritten.
fn relax(candidate: &str) -> String {
    let mut out = String::with_capacity(candidate.len() + 16);
    let mut outside = String::new();
    let mut chars = candidate.chars();

    while let Some(c) = chars.next() {
        if c != '"' && c != '\'' {
            outside.push(c);
            continue;
        }

        out.push_str(&repair_outside(&std::mem::take(&mut outside)));
        out.push('"');
        let quote = c;
        while let Some(s) = chars.next() {
            match s {
                '\\' => {
                    if let Some(next) = chars.next() {
                        if next == '\'' {
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(next);
                        }
                    }
                }
                '"' if quote == '\'' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                s if s == quote => break,
                s => out.push(s),
            }
        }
        out.push('"');
    }

    out.push_str(&repair_outside(&outside));
    trailing_comma().replace_all(&out, "$1").into_owned()
}

fn repair_outside(segment: &str) -> String {
    bare_words()
        .replace_all(segment, |caps: &Captures<'_>| {
            let word = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            // Exponents and other number tails such as the `e-3` in `1e-3`.
            let glued = segment[..start]
                .chars()
                .next_back()
                .is_some_and(|p| p.is_ascii_alphanumeric() || p == '.');
            if glued {
                return word.to_string();
            }
            match word {
                "true" | "True" => "true".to_string(),
                "false" | "False" => "false".to_string(),
                "null" | "None" => "null".to_string(),
                _ => format!("\"{word}\""),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_skips_brackets_in_strings() {
        let text = r#"{"a": "}{]["}"#;
        assert!(matches!(scan_balanced(text, 0, &['"']), Scan::Closed(end) if end == text.len() - 1));
    }

    #[test]
    fn test_scan_mismatched() {
        assert!(matches!(scan_balanced("{]", 0, &['"']), Scan::Mismatched(1)));
    }

    #[test]
    fn test_scan_unclosed_depth() {
        assert!(matches!(scan_balanced("{\"a\": [1, 2", 0, &['"']), Scan::Unclosed(2)));
    }

    fn strict_json(result: &ExtractionResult) -> Option<&Value> {
        match result {
            ExtractionResult::Found {
                value: ExtractedValue::Json(value),
                method: ExtractionMethod::Strict,
            } => Some(value),
            _ => None,
        }
    }

    #[test]
    fn test_document_after_many_bracketed_lines() {
        let raw = format!("{}{{\"decision\": \"YES\"}}", "- [x] item\n".repeat(300));
        let result = extract_json(&raw);
        assert_eq!(strict_json(&result), Some(&json!({"decision": "YES"})));
    }

    #[test]
    fn test_empty_checkbox_does_not_win() {
        let raw = "- [ ] double-check outliers\n{\"decision\": \"NO\", \"reason\": \"sparse\"}";
        let result = extract_json(raw);
        assert_eq!(strict_json(&result), Some(&json!({"decision": "NO", "reason": "sparse"})));

        let only_empty = extract_json("Nothing to clean: []");
        assert_eq!(strict_json(&only_empty), Some(&json!([])));
    }

    #[test]
    fn test_relax_python_dict() {
        let repaired = relax("[{'x': 'age', 'y': 'income', 'type': 'scatter',}]");
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!([{"x": "age", "y": "income", "type": "scatter"}]));
    }

    #[test]
    fn test_relax_bare_keys_and_values() {
        let repaired = relax("{decision: NO, reason: too many missing values, retry: False}");
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(
            value,
            json!({"decision": "NO", "reason": "too many missing values", "retry": false})
        );
    }

    #[test]
    fn test_relax_keeps_string_contents() {
        let repaired = relax(r#"{'note': "it's None of True"}"#);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["note"], "it's None of True");
    }

    #[test]
    fn test_relax_keeps_numbers() {
        let repaired = relax("{'rows': 120, 'ratio': 1e-3, 'neg': -4}");
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["rows"], 120);
        assert_eq!(value["neg"], -4);
    }
}
