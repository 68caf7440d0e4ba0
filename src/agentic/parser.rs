//! Extraction of tool-call directives from free-form model output.
//!
//! Directives are JSON objects carrying an `agentType` field, normally inside
//! ```` ```tool ```` fences. Models that emit bare JSON lines are still
//! understood through a fallback scan of the whole text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::directive::ToolCallDirective;

// The closing fence is optional so a stream cut off mid-block still parses.
static TOOL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```tool[ \t]*\n([\s\S]*?)(?:```|\z)").expect("tool block regex")
});

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run regex"));

/// Split model output into the user-visible text and the directives it
/// carries. Never fails: anything that does not parse is left alone.
pub fn parse_tool_calls(text: &str) -> (String, Vec<ToolCallDirective>) {
    let (clean, calls) = extract_tool_blocks(text);
    if !calls.is_empty() {
        return (clean, calls);
    }

    let calls = extract_directives(&normalize_fullwidth(text));
    if calls.is_empty() {
        return (text.to_string(), Vec::new());
    }
    debug!(count = calls.len(), "directives found outside tool fences");

    let kept: Vec<&str> = text
        .split('\n')
        .filter(|line| {
            let norm = normalize_fullwidth(line.trim());
            norm.is_empty() || extract_directives(&norm).is_empty()
        })
        .collect();
    (kept.join("\n").trim().to_string(), calls)
}

fn extract_tool_blocks(text: &str) -> (String, Vec<ToolCallDirective>) {
    let mut calls = Vec::new();
    for caps in TOOL_BLOCK.captures_iter(text) {
        let body = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if body.is_empty() {
            continue;
        }
        calls.extend(extract_directives(&normalize_fullwidth(body)));
    }
    let stripped = TOOL_BLOCK.replace_all(text, "");
    let clean = BLANK_RUNS.replace_all(stripped.trim(), "\n\n").into_owned();
    (clean, calls)
}

/// Map the full-width punctuation models like to slip into JSON onto ASCII.
pub fn normalize_fullwidth(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '｛' => '{',
            '｝' => '}',
            '：' => ':',
            '，' => ',',
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// Every top-level brace-balanced object in `text` that parses and carries a
/// non-empty string `agentType`.
///
/// Depth counting looks at raw characters only; braces inside string values
/// count too.
pub fn extract_directives(text: &str) -> Vec<ToolCallDirective> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start: Option<usize> = None;

    for (i, ch) in text.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth != 0 {
                    continue;
                }
                let Some(s) = start.take() else {
                    continue;
                };
                let candidate = text[s..=i].trim();
                if candidate == "{}" || candidate == "{ }" {
                    continue;
                }
                if let Some(Value::Object(map)) = parse_lenient(candidate) {
                    found.push(map);
                }
            }
            _ => {}
        }
    }

    found
        .into_iter()
        .filter(|map| {
            map.get("agentType")
                .and_then(Value::as_str)
                .is_some_and(|t| !t.is_empty())
        })
        .map(ToolCallDirective)
        .collect()
}

fn parse_lenient(candidate: &str) -> Option<Value> {
    json5::from_str::<Value>(candidate)
        .ok()
        .or_else(|| serde_json::from_str(candidate).ok())
}
