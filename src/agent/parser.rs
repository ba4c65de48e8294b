//! Tool-call extraction from AI responses.
//!
//! Two paths:
//!
//! **Native** — the provider answered with function-call objects; each is
//! converted directly and keeps its call ID so the tool result can be threaded
//! back in the provider's expected format.
//!
//! **Text** — the response body contains JSON, in one of many shapes the
//! models actually produce.  Ordered strategies run until one yields a call;
//! the balanced-object scan is then merged in additively so multi-call
//! outputs are not lost.  All results are deduplicated by `(action, params)`.

use serde_json::Value;
use std::sync::LazyLock;

use regex::Regex;

use crate::ai::types::NativeToolCall;

// ─── ParsedCall ───────────────────────────────────────────────────────────────

/// A tool invocation extracted from an AI response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    /// Tool ID as emitted by the model (validated/corrected downstream).
    pub action: String,
    pub params: Value,
    pub reasoning: Option<String>,
    /// Present on the native path; echoed back in the tool-result message.
    pub native_tool_call_id: Option<String>,
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Parse all tool calls from an AI response.
pub fn parse_tool_calls(
    content: &str,
    native_tool_calls: &[NativeToolCall],
    used_native_tools: bool,
) -> Vec<ParsedCall> {
    if used_native_tools {
        return native_tool_calls.iter().filter_map(convert_native).collect();
    }
    parse_text(content)
}

fn convert_native(call: &NativeToolCall) -> Option<ParsedCall> {
    // `arguments` may be a JSON string (OpenAI) or an object (some providers).
    let params = match &call.arguments {
        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Object(Default::default())),
        other => other.clone(),
    };
    let reasoning = params
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(ParsedCall {
        action: call.name.clone(),
        params,
        reasoning,
        native_tool_call_id: call.id.clone(),
    })
}

// ─── Text path ────────────────────────────────────────────────────────────────

static FENCED_TOOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```tool\s*\n(.*?)```").unwrap_or_else(|e| panic!("tool fence regex: {e}"))
});

static FENCED_ANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*\n(.*?)```").unwrap_or_else(|e| panic!("fence regex: {e}"))
});

static FLAT_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{[^{}]*"action"\s*:\s*"[^"]+"[^{}]*\}"#)
        .unwrap_or_else(|e| panic!("flat regex: {e}"))
});

fn parse_text(content: &str) -> Vec<ParsedCall> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let strategies: [fn(&str) -> Vec<ParsedCall>; 8] = [
        whole_response_object,
        scan_balanced_objects,
        fenced_tool_blocks,
        fenced_generic_blocks,
        flat_regex_objects,
        balanced_around_action,
        unclosed_fence_recovery,
        double_escape_recovery,
    ];

    let mut calls: Vec<ParsedCall> = Vec::new();
    for strategy in strategies {
        let found = strategy(trimmed);
        if !found.is_empty() {
            calls = found;
            break;
        }
    }
    if calls.is_empty() {
        return calls;
    }

    // Additive scan: a model that fenced one call and inlined another should
    // not lose the second one.
    for extra in scan_balanced_objects(trimmed) {
        if !calls.iter().any(|c| same_call(c, &extra)) {
            calls.push(extra);
        }
    }
    dedup(calls)
}

fn same_call(a: &ParsedCall, b: &ParsedCall) -> bool {
    a.action == b.action && a.params == b.params
}

fn dedup(calls: Vec<ParsedCall>) -> Vec<ParsedCall> {
    let mut out: Vec<ParsedCall> = Vec::new();
    for call in calls {
        if !out.iter().any(|c| same_call(c, &call)) {
            out.push(call);
        }
    }
    out
}

/// Interpret a JSON value as a tool call: an object with a string `action`.
fn call_from_value(value: &Value) -> Option<ParsedCall> {
    let action = value.get("action")?.as_str()?.trim();
    if action.is_empty() {
        return None;
    }
    Some(ParsedCall {
        action: action.to_string(),
        params: value
            .get("params")
            .cloned()
            .unwrap_or(Value::Object(Default::default())),
        reasoning: value
            .get("reasoning")
            .and_then(Value::as_str)
            .map(str::to_string),
        native_tool_call_id: None,
    })
}

/// Strategy 1: the entire response is one JSON object with `action`.
fn whole_response_object(text: &str) -> Vec<ParsedCall> {
    serde_json::from_str::<Value>(text)
        .ok()
        .as_ref()
        .and_then(call_from_value)
        .into_iter()
        .collect()
}

/// Strategy 2: every balanced top-level JSON object containing `action`.
fn scan_balanced_objects(text: &str) -> Vec<ParsedCall> {
    dedup(
        balanced_objects(text)
            .iter()
            .filter_map(|s| serde_json::from_str::<Value>(s).ok())
            .filter_map(|v| call_from_value(&v))
            .collect(),
    )
}

/// Strategy 3: fenced ```tool blocks.
fn fenced_tool_blocks(text: &str) -> Vec<ParsedCall> {
    FENCED_TOOL
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .flat_map(|m| scan_balanced_objects(m.as_str()))
        .collect()
}

/// Strategy 4: fenced ```json and plain ``` blocks.
fn fenced_generic_blocks(text: &str) -> Vec<ParsedCall> {
    FENCED_ANY
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .flat_map(|m| scan_balanced_objects(m.as_str()))
        .collect()
}

/// Strategy 5: flat (non-nested) JSON objects with an `"action"` key.
fn flat_regex_objects(text: &str) -> Vec<ParsedCall> {
    FLAT_ACTION
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter_map(|v| call_from_value(&v))
        .collect()
}

/// Strategy 6: balanced-brace extraction around an `"action"` occurrence.
fn balanced_around_action(text: &str) -> Vec<ParsedCall> {
    let Some(action_pos) = text.find("\"action\"") else {
        return Vec::new();
    };
    // Walk back to the opening brace that encloses the occurrence.
    let mut depth = 0i32;
    let mut start = None;
    for (i, ch) in text[..action_pos].char_indices().rev() {
        match ch {
            '}' => depth += 1,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                    break;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    let Some(start) = start else {
        return Vec::new();
    };
    balanced_objects(&text[start..])
        .first()
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .as_ref()
        .and_then(call_from_value)
        .into_iter()
        .collect()
}

/// Strategy 7: a fence opens but never closes — take the balanced object from
/// the fragment.
fn unclosed_fence_recovery(text: &str) -> Vec<ParsedCall> {
    let Some(fence_pos) = text.rfind("```") else {
        return Vec::new();
    };
    let fragment = &text[fence_pos + 3..];
    // A closed fence was already handled by strategies 3/4.
    if fragment.contains("```") {
        return Vec::new();
    }
    let body = fragment
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
        .trim_start();
    scan_balanced_objects(body)
}

/// Strategy 8: the model double-escaped its JSON — unescape and retry.
fn double_escape_recovery(text: &str) -> Vec<ParsedCall> {
    if !text.contains("\\\"") {
        return Vec::new();
    }
    let unescaped = text
        .replace("\\\\", "\\")
        .replace("\\\"", "\"")
        .replace("\\n", "\n")
        .replace("\\t", "\t");
    let direct = whole_response_object(unescaped.trim());
    if !direct.is_empty() {
        return direct;
    }
    scan_balanced_objects(&unescaped)
}

/// Extract all top-level balanced `{…}` substrings, honouring JSON string
/// literals and escapes.
fn balanced_objects(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let start = i;
        let mut end = None;
        for (offset, &b) in bytes[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + offset + 1);
                        break;
                    }
                }
                _ => {}
            }
        }
        match end {
            Some(end) => {
                out.push(text[start..end].to_string());
                i = end;
            }
            None => break, // unbalanced tail
        }
    }
    out
}

// ─── Meta-talk detection ──────────────────────────────────────────────────────

/// `true` when the response only talks *about* calling tools instead of
/// emitting a call.  Used by the loop's early-iteration correction path.
pub fn is_meta_talk(text: &str) -> bool {
    let lower = text.to_lowercase();
    if lower.len() > 600 {
        return false;
    }
    let mentions_tooling = [
        "tool call",
        "tool_call",
        "call the tool",
        "use the tool",
        "invoke the",
        "i will use",
        "i'll use",
        "let me call",
    ]
    .iter()
    .any(|phrase| lower.contains(phrase));
    mentions_tooling && balanced_objects(text).is_empty()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
