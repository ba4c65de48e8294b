//! Tool-result summarization for prompt feedback.
//!
//! Raw tool results can be enormous; everything fed back into the
//! conversation is capped (default ≤ 800 characters) while keeping the parts
//! the model actually needs to continue.

use serde_json::Value;

/// Default feedback cap in characters.
pub const MAX_SUMMARY_CHARS: usize = 800;

/// Per-field cap inside object results.
const MAX_FIELD_CHARS: usize = 200;

/// Items shown from array results.
const MAX_ARRAY_ITEMS: usize = 3;

/// Characters of provider response text included in file-first summaries.
const FILE_RESPONSE_CHARS: usize = 300;

/// Summarize a tool result for the feedback message.
pub fn summarize_tool_result(tool_id: &str, result: &Value, max_chars: usize) -> String {
    // File-producing tools get a file-first summary.
    if let Some(files) = result.get("createdFiles").and_then(Value::as_array) {
        return summarize_files(tool_id, result, files);
    }

    match result {
        Value::String(s) => truncate_with_note(s, max_chars),
        Value::Array(items) => summarize_array(items),
        Value::Object(_) => {
            let compact = truncate_object_fields(result);
            let rendered = compact.to_string();
            truncate_with_note(&rendered, max_chars)
        }
        other => other.to_string(),
    }
}

fn summarize_files(_tool_id: &str, result: &Value, files: &[Value]) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("Created {} file(s):", files.len()));
    for file in files {
        let name = file.get("name").and_then(Value::as_str).unwrap_or("?");
        let size = file.get("sizeHuman").and_then(Value::as_str).unwrap_or("?");
        let path = file.get("fullPath").and_then(Value::as_str).unwrap_or("?");
        let mime = file.get("mimeType").and_then(Value::as_str).unwrap_or("?");
        let delivered = file
            .get("autoDelivered")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        lines.push(format!(
            "- {name} ({size}, {mime}) at {path}{}",
            if delivered { " [auto-delivered]" } else { "" }
        ));
    }
    if let Some(response) = result.get("response").and_then(Value::as_str) {
        let head: String = response.chars().take(FILE_RESPONSE_CHARS).collect();
        lines.push(format!("Provider output: {head}"));
    }
    lines.push(
        "Auto-delivered files have already reached the user; do not call media-send tools for them."
            .to_string(),
    );
    lines.join("\n")
}

fn summarize_array(items: &[Value]) -> String {
    let shown = items.len().min(MAX_ARRAY_ITEMS);
    let head: Vec<String> = items
        .iter()
        .take(shown)
        .map(|item| {
            let rendered = item.to_string();
            truncate_plain(&rendered, MAX_FIELD_CHARS)
        })
        .collect();
    let mut out = format!("[{} items] First {}: {}", items.len(), shown, head.join(", "));
    if items.len() > shown {
        out.push_str(&format!(" … and {} more", items.len() - shown));
    }
    out
}

/// Cap long string fields and long arrays inside an object result.
fn truncate_object_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let trimmed = match v {
                    Value::String(s) if s.chars().count() > MAX_FIELD_CHARS => {
                        Value::String(truncate_plain(s, MAX_FIELD_CHARS))
                    }
                    Value::Array(items) if items.len() > MAX_ARRAY_ITEMS => Value::Array(
                        items
                            .iter()
                            .take(MAX_ARRAY_ITEMS)
                            .map(truncate_object_fields)
                            .collect(),
                    ),
                    other => truncate_object_fields(other),
                };
                out.insert(k.clone(), trimmed);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn truncate_plain(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{head}…")
}

fn truncate_with_note(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{head} [truncated, {total} chars total]")
}
