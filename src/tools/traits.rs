use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── ToolOutcome ──────────────────────────────────────────────────────────────

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    /// Structured result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Human-readable error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// `true` when the tool deferred its work and returned a tracking token.
    pub fn is_async(&self) -> bool {
        self.result
            .as_ref()
            .and_then(|r| r.get("async"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn tracking_id(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("trackingId"))
            .and_then(Value::as_str)
    }
}

// ─── ToolContext ──────────────────────────────────────────────────────────────

/// Ambient context supplied to every tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolContext {
    pub agentic_id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub account_id: Option<String>,
    pub external_id: Option<String>,
    pub platform: Option<String>,
    pub sender: Option<String>,
    /// Depth of the orchestration chain (0 = top-level agent).
    pub orchestration_depth: u32,
    /// The original trigger context, verbatim.
    pub trigger_context: Value,
}

impl ToolContext {
    pub fn new(agentic_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            agentic_id: agentic_id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

// ─── ToolCategory ─────────────────────────────────────────────────────────────

/// Coarse grouping used by skill gating and reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Communication,
    Analysis,
    Automation,
    Integration,
    Management,
}

// ─── Tool trait ───────────────────────────────────────────────────────────────

/// A capability the reasoning loop can invoke.
///
/// Implementations are black boxes behind the uniform contract; the runtime
/// never inspects their internals, only the [`ToolOutcome`].  Implementations
/// must be `Send + Sync` so they can be held in a shared `Arc<dyn Tool>`
/// registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (camelCase), e.g. `"searchWeb"`.
    fn id(&self) -> &str;

    /// Human-readable description shown in the prompt's tool list.
    fn description(&self) -> &str;

    /// Required parameter names.
    fn required_params(&self) -> &[&str] {
        &[]
    }

    /// Optional parameter names.
    fn optional_params(&self) -> &[&str] {
        &[]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Automation
    }

    /// Execute the tool with the given parameters and ambient context.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutcome, String>;
}

// ─── ToolInfo ─────────────────────────────────────────────────────────────────

/// Summary of a registered tool, used by the prompt builder, the validator,
/// and native function-call schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub id: String,
    pub description: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub category: ToolCategory,
}

impl ToolInfo {
    /// One line of the compact tool list: `id(required, [optional]) - description`.
    pub fn prompt_line(&self) -> String {
        let mut args: Vec<String> = self.required_params.clone();
        args.extend(self.optional_params.iter().map(|p| format!("[{p}]")));
        format!("{}({}) - {}", self.id, args.join(", "), self.description)
    }

    /// Convert to the native function-calling schema.
    pub fn to_native_spec(&self) -> crate::ai::types::NativeToolSpec {
        let mut properties = serde_json::Map::new();
        for p in self.required_params.iter().chain(self.optional_params.iter()) {
            properties.insert(p.clone(), serde_json::json!({"type": "string"}));
        }
        crate::ai::types::NativeToolSpec {
            name: self.id.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": self.required_params,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_async_detection() {
        let sync = ToolOutcome::ok(serde_json::json!({"message": "done"}));
        assert!(!sync.is_async());

        let deferred = ToolOutcome::ok(serde_json::json!({"async": true, "trackingId": "t-9"}));
        assert!(deferred.is_async());
        assert_eq!(deferred.tracking_id(), Some("t-9"));
    }

    #[test]
    fn prompt_line_format() {
        let info = ToolInfo {
            id: "sendEmail".to_string(),
            description: "Send an email".to_string(),
            required_params: vec!["to".to_string(), "message".to_string()],
            optional_params: vec!["subject".to_string()],
            category: ToolCategory::Communication,
        };
        assert_eq!(
            info.prompt_line(),
            "sendEmail(to, message, [subject]) - Send an email"
        );
    }
}
