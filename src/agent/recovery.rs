//! Recovery wrapper around tool execution.
//!
//! Transient failures are retried with backoff; a persistent failure may be
//! retried once more on a configured alternative tool.  Failures come back
//! enriched with a taxonomy so the loop can feed actionable hints to the AI.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{ToolContext, ToolOutcome, ToolRegistry};

/// Retries on the original tool for transient errors.
const MAX_RETRIES: u32 = 2;

const BASE_DELAY_MS: u64 = 250;

// ─── Error taxonomy ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    RateLimit,
    Network,
    NotFound,
    InvalidParams,
    PermissionDenied,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::NotFound => "not_found",
            Self::InvalidParams => "invalid_params",
            Self::PermissionDenied => "permission_denied",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimit | Self::Network)
    }

    /// Hint fed back to the AI alongside the failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Timeout => "The operation timed out; try a narrower request.",
            Self::RateLimit => "The service is rate-limited; try again later or use another tool.",
            Self::Network => "A network error occurred; the service may be briefly unreachable.",
            Self::NotFound => "The requested item does not exist; verify the identifier.",
            Self::InvalidParams => "Check the parameter names and values against the tool's contract.",
            Self::PermissionDenied => "This operation is not permitted for the current agent.",
            Self::Unknown => "Consider an alternative tool or rephrase the request.",
        }
    }
}

/// Classify an error string into the taxonomy.
pub fn classify_error(error: &str) -> ErrorType {
    let lower = error.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("etimedout") {
        ErrorType::Timeout
    } else if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
        ErrorType::RateLimit
    } else if lower.contains("econnrefused")
        || lower.contains("econnreset")
        || lower.contains("network")
        || lower.contains("socket hang up")
        || lower.contains("503")
        || lower.contains("502")
    {
        ErrorType::Network
    } else if lower.contains("not found") || lower.contains("404") || lower.contains("no such") {
        ErrorType::NotFound
    } else if lower.contains("invalid") || lower.contains("missing param") || lower.contains("required param") {
        ErrorType::InvalidParams
    } else if lower.contains("permission") || lower.contains("denied") || lower.contains("forbidden") || lower.contains("401") || lower.contains("403") {
        ErrorType::PermissionDenied
    } else {
        ErrorType::Unknown
    }
}

/// Alternatives tried (and suggested) per tool.
pub fn alternative_tools(tool_id: &str) -> &'static [&'static str] {
    match tool_id {
        "searchWeb" => &["queryKnowledge"],
        "queryKnowledge" => &["searchWeb"],
        "sendWhatsApp" => &["sendEmail", "sendTelegram"],
        "sendTelegram" => &["sendEmail", "sendWhatsApp"],
        "sendEmail" => &["sendWhatsApp"],
        "searchMessages" => &["getMessages"],
        _ => &[],
    }
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryInfo {
    pub error_type: ErrorType,
    pub suggestion: String,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub outcome: ToolOutcome,
    pub attempts: u32,
    pub recovery_applied: bool,
    /// Set when an alternative tool produced the final result.
    pub used_alternative_tool: Option<String>,
    /// Present on failure.
    pub recovery: Option<RecoveryInfo>,
}

// ─── execute_with_recovery ────────────────────────────────────────────────────

/// Execute `tool_id` with retries and alternative-tool fallback.
pub async fn execute_with_recovery(
    registry: &Arc<ToolRegistry>,
    tool_id: &str,
    params: Value,
    ctx: &ToolContext,
) -> RecoveryOutcome {
    let mut attempts = 0u32;
    let mut last_error = String::new();

    if let Some(tool) = registry.get(tool_id) {
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(
                    BASE_DELAY_MS * 2u64.saturating_pow(attempt - 1),
                ))
                .await;
            }
            attempts += 1;
            match tool.execute(params.clone(), ctx).await {
                Ok(outcome) if outcome.success => {
                    return RecoveryOutcome {
                        outcome,
                        attempts,
                        recovery_applied: attempt > 0,
                        used_alternative_tool: None,
                        recovery: None,
                    };
                }
                Ok(outcome) => {
                    last_error = outcome.error.unwrap_or_else(|| "tool failed".to_string());
                }
                Err(e) => last_error = e,
            }
            if !classify_error(&last_error).is_transient() {
                break;
            }
        }
    } else {
        last_error = format!("tool \"{tool_id}\" is not registered");
    }

    // One shot on the first available alternative.
    for alt_id in alternative_tools(tool_id) {
        let Some(alt) = registry.get(alt_id) else { continue };
        attempts += 1;
        if let Ok(outcome) = alt.execute(params.clone(), ctx).await {
            if outcome.success {
                return RecoveryOutcome {
                    outcome,
                    attempts,
                    recovery_applied: true,
                    used_alternative_tool: Some((*alt_id).to_string()),
                    recovery: None,
                };
            }
        }
        break;
    }

    let error_type = classify_error(&last_error);
    RecoveryOutcome {
        outcome: ToolOutcome::err(last_error),
        attempts,
        recovery_applied: attempts > 1,
        used_alternative_tool: None,
        recovery: Some(RecoveryInfo {
            error_type,
            suggestion: error_type.suggestion().to_string(),
            alternatives: alternative_tools(tool_id)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }),
    }
}
