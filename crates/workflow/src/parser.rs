//! Response parsing: backend text to a JSON result, tolerating malformed output.
//!
//! Structured extraction is tried first: a fenced `json` block, then the first
//! balanced top-level object, then the span from the first `{` to the last
//! `}`. When none of those yields an object, an invocation-specific heuristic
//! runs over the plain text. If that also comes back empty the result is
//! `{rawContent, parseError: true}`. Parsing never fails.

use pke_core::invocation::Invocation;
use regex_lite::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

/// Which path produced a parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    Structured,
    Heuristic,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub value: Value,
    pub mode: ParseMode,
}

impl ParsedResponse {
    /// Neither structured nor heuristic parsing produced anything.
    pub fn is_parse_error(&self) -> bool {
        self.mode == ParseMode::Raw
    }
}

/// Parse backend output for `invocation`.
pub fn parse_response(text: &str, invocation: Invocation) -> ParsedResponse {
    if let Some(object) = extract_json_object(text) {
        return ParsedResponse {
            value: Value::Object(object),
            mode: ParseMode::Structured,
        };
    }

    if let Some(value) = heuristic(text, invocation) {
        return ParsedResponse {
            value,
            mode: ParseMode::Heuristic,
        };
    }

    ParsedResponse {
        value: json!({ "rawContent": text, "parseError": true }),
        mode: ParseMode::Raw,
    }
}

/// The first JSON object found in `text`, if any.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let candidates = [
        fenced_json_block(text),
        balanced_object(text),
        outer_braces(text),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate.trim()) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let lower = text.to_ascii_lowercase();
    let open = lower.find("```json")?;
    let body_start = open + "```json".len();
    let body_len = text[body_start..].find("```")?;
    Some(&text[body_start..body_start + body_len])
}

/// The first `{...}` whose braces balance, ignoring braces inside strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

// ── Heuristics ──────────────────────────────────────────────────────────────

static OBJECTIVE_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*(?:[-*]+\s*)?(?:(?:objective\s+)?LO\s*\d+|objective\s+\d+|\d+[.)])(?:\*\*)?\s*[:.)\-]?\s*(?:\*\*)?\s*(.+?)\s*$",
    )
    .ok()
});

/// Invocation-specific extraction from plain text. `None` when nothing usable
/// was found.
pub fn heuristic(text: &str, invocation: Invocation) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match invocation {
        Invocation::Description => Some(json!({
            "description": trimmed,
            "assistanceTier": "full",
        })),
        Invocation::Objectives => {
            let objectives = extract_objectives(trimmed);
            (!objectives.is_empty()).then(|| json!({ "learningObjectives": objectives }))
        }
        Invocation::Structure => Some(json!({
            "topics": [{ "title": "Course Content", "subtopics": [] }],
            "rawContent": text,
        })),
        Invocation::FullBuild => Some(json!({
            "topics": [],
            "assessments": [],
            "rawContent": text,
        })),
        Invocation::TemplateMapping => Some(json!({
            "analysis": text,
            "fields": [],
            "mappings": [],
        })),
    }
}

/// Numbered or labelled objective lines, re-coded LO1..LOn in order.
fn extract_objectives(text: &str) -> Vec<Value> {
    let Some(pattern) = OBJECTIVE_LINE.as_ref() else {
        return Vec::new();
    };
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().replace('*', "").trim().to_string())
        .filter(|t| !t.is_empty())
        .enumerate()
        .map(|(i, t)| json!({ "code": format!("LO{}", i + 1), "text": t }))
        .collect()
}
