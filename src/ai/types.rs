use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Native function-calling declaration forwarded to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters: serde_json::Value,
}

/// A native function call returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToolCall {
    /// Provider-assigned call ID, echoed back in the tool-result message.
    pub id: Option<String>,
    pub name: String,
    /// May arrive as a JSON string (OpenAI style) or an object; consumers must
    /// handle both.
    pub arguments: serde_json::Value,
}

/// Per-request tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Marks agent-runtime traffic for the router's accounting.
    #[serde(default)]
    pub is_agentic: bool,
}

/// Request routed to the AI provider layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    /// Free-text description of the task, used for routing.
    pub task: String,
    pub messages: Vec<Message>,
    pub user_id: String,
    /// Native tool declarations; empty when text-format tool calling is used.
    #[serde(default)]
    pub tools: Vec<NativeToolSpec>,
    /// Routing directive: complexity tier name (trivial..critical).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_tier: Option<String>,
    /// Routing directive: pin a specific provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_provider: Option<String>,
    #[serde(default)]
    pub options: RequestOptions,
}

impl AiRequest {
    pub fn new(task: impl Into<String>, user_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            task: task.into(),
            messages,
            user_id: user_id.into(),
            tools: Vec::new(),
            force_tier: None,
            force_provider: None,
            options: RequestOptions::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<NativeToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_force_tier(mut self, tier: impl Into<String>) -> Self {
        self.force_tier = Some(tier.into());
        self
    }

    pub fn with_force_provider(mut self, provider: impl Into<String>) -> Self {
        self.force_provider = Some(provider.into());
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A file produced by a CLI-backed provider alongside its text output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub name: String,
    pub full_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Response from the AI provider layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    /// Present when the provider answered with native function calls.
    #[serde(default)]
    pub native_tool_calls: Vec<NativeToolCall>,
    pub used_native_tools: bool,
    /// Provider finish reason (e.g. "stop", "tool_calls", "length").
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub provider: String,
    pub model: String,
    /// Files generated by CLI-backed providers, auto-delivered downstream.
    #[serde(default)]
    pub output_files: Vec<OutputFile>,
}

impl AiResponse {
    /// Minimal text response, used widely in tests.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            native_tool_calls: Vec::new(),
            used_native_tools: false,
            finish_reason: Some("stop".to_string()),
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            }),
            provider: "test".to_string(),
            model: "test-model".to_string(),
            output_files: Vec::new(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.usage.as_ref().map_or(0, |u| u64::from(u.total_tokens))
    }
}
