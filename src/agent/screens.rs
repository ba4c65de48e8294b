//! Response integrity screens for outbound `respond` text.
//!
//! Two boolean classifiers: error-shaped output (provider errors, stack
//! traces, network failures leaking into a user-facing message) and
//! placeholder-shaped output (template text the model forgot to fill in).
//! The placeholder list is a conservative floor, not a complete grammar.

use std::sync::LazyLock;

use regex::Regex;

static ERROR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)insufficient credits",
        r#""?statusCode"?\s*[:=]\s*[45]\d\d"#,
        r#""error"\s*:\s*\{"#,
        r"openrouter\.ai/settings/credits",
        r"(?i)running migrations?",
        r"(?i)rate.?limit(ed| exceeded| reached)",
        r"(?i)too many requests",
        r"(?m)^\s*at\s+\S+\s+\(.+:\d+:\d+\)", // stack frame
        r"(?i)socket hang up",
        r"\bECONNRESET\b",
        r"\bETIMEDOUT\b",
        r"\bECONNREFUSED\b",
        r"\bENOENT\b",
        r"\bEACCES\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("error screen regex {p}: {e}")))
    .collect()
});

static PLACEHOLDER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\[insert[^\]]*\]",
        r"(?i)\[actual[^\]]*\]",
        r"(?i)\[timestamp\]",
        r"(?i)\[data here\]",
        r"(?i)\[message content\]",
        r"(?i)\[placeholder[^\]]*\]",
        r"(?i)\[fill in[^\]]*\]",
        r"(?i)\[replace with[^\]]*\]",
        r"(?i)\[todo[^\]]*\]",
        r"\{\{\s*[\w.]+\s*\}\}",
        r"(?i)\[from tool results?\]",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("placeholder regex {p}: {e}")))
    .collect()
});

/// `true` when the text looks like error output rather than a real message.
pub fn is_error_shaped(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if ERROR_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
        return true;
    }
    // A whole-response JSON error object also counts.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.get("error").is_some() {
            return true;
        }
        if value
            .get("statusCode")
            .and_then(serde_json::Value::as_i64)
            .is_some_and(|code| code >= 400)
        {
            return true;
        }
        if value
            .get("code")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|code| code == "ECONNREFUSED")
        {
            return true;
        }
    }
    false
}

/// `true` when the text still contains unfilled template markers.
pub fn is_placeholder_shaped(text: &str) -> bool {
    PLACEHOLDER_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Corrective user message fed back after a placeholder block.
pub const PLACEHOLDER_CORRECTION: &str = "Your message contained template placeholders. Use data \
     tools first, then respond with the actual results; never send template text.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_are_flagged() {
        for text in [
            "Insufficient credits. Visit openrouter.ai/settings/credits to top up.",
            r#"{"error": {"message": "upstream failed"}, "statusCode": 502}"#,
            "request failed: socket hang up",
            "connect ECONNREFUSED 127.0.0.1:8080",
            "Rate limit exceeded, retry in 20s",
            "statusCode: 429",
        ] {
            assert!(is_error_shaped(text), "{text:?} should be error-shaped");
        }
    }

    #[test]
    fn stack_traces_are_flagged() {
        let trace = "TypeError: x is undefined\n    at run (/app/loop.js:42:13)";
        assert!(is_error_shaped(trace));
    }

    #[test]
    fn whole_json_error_object_is_flagged() {
        assert!(is_error_shaped(r#"{"statusCode": 404, "message": "not found"}"#));
        assert!(is_error_shaped(r#"{"code": "ECONNREFUSED"}"#));
        assert!(!is_error_shaped(r#"{"summary": "3 emails today"}"#));
    }

    #[test]
    fn normal_messages_pass() {
        for text in [
            "You have 3 unread emails; two are from the supplier.",
            "Done! The report was sent to your inbox.",
            "The error rate dropped after the fix.", // mentions "error" in prose only
        ] {
            assert!(!is_error_shaped(text), "{text:?} should pass");
        }
    }

    #[test]
    fn placeholders_are_flagged() {
        for text in [
            "Here is your summary: [Insert summary here]",
            "Report generated at [timestamp]",
            "Dear {{ name }}, your order shipped.",
            "Results: [from tool results]",
            "[TODO: fill this in]",
            "The totals are [actual numbers].",
        ] {
            assert!(is_placeholder_shaped(text), "{text:?} should be flagged");
        }
    }

    #[test]
    fn bracketed_prose_is_not_a_placeholder() {
        for text in [
            "Your meeting [rescheduled from Monday] is at 3pm.",
            "I checked all three inboxes.",
        ] {
            assert!(!is_placeholder_shaped(text), "{text:?} should pass");
        }
    }
}
