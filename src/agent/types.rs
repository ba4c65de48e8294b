//! Shared types for a reasoning run: triggers, contexts, action records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ─── Trigger ──────────────────────────────────────────────────────────────────

/// What started a reasoning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    WakeUp,
    IncomingMessage,
    TaskResponseReceived,
    AgentStatusChanges,
    OrchestratedTask,
    Consultation,
    Schedule,
    PeriodicThink,
    Heartbeat,
    ApprovalResume,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WakeUp => "wake_up",
            Self::IncomingMessage => "incoming_message",
            Self::TaskResponseReceived => "task_response_received",
            Self::AgentStatusChanges => "agent_status_changes",
            Self::OrchestratedTask => "orchestrated_task",
            Self::Consultation => "consultation",
            Self::Schedule => "schedule",
            Self::PeriodicThink => "periodic_think",
            Self::Heartbeat => "heartbeat",
            Self::ApprovalResume => "approval_resume",
        }
    }
}

// ─── TriggerContext ───────────────────────────────────────────────────────────

/// Last-task hint used in the incoming-message prompt's task-state block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentHint {
    NewIntent,
    Acknowledgement,
    PossibleFollowup,
}

/// Everything the trigger carries into the run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerContext {
    /// Sender display name for incoming messages.
    pub sender: Option<String>,
    /// Whether the sender is the agent's master contact.
    pub sender_is_master: bool,
    /// The raw message text (or a preview of it).
    pub preview: Option<String>,
    /// Quoted/replied-to content, if the platform supplied it.
    pub quoted_content: Option<String>,
    /// Short conversation history window, oldest first.
    pub history: Vec<String>,
    pub platform: Option<String>,
    pub account_id: Option<String>,
    pub external_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Media-only messages skip memory search and get the media playbook.
    pub media_only: bool,
    /// Status of the agent's last task, for the task-state block.
    pub last_task_completed: Option<bool>,
    pub intent_hint: Option<IntentHint>,
    /// Set when a parent agent delegated this run (sub-agent override).
    pub sub_agent_override: bool,
    pub orchestration_depth: u32,
    /// Schedule-provided custom prompt, if any.
    pub custom_prompt: Option<String>,
    /// Approval-resume: the approved payload (possibly modified).
    pub approved_payload: Option<serde_json::Value>,
    /// Approval-resume: the pre-executed tool's result, injected into the
    /// first user message so AI tokens are not spent re-invoking it.
    pub approval_tool_result: Option<serde_json::Value>,
    /// Anything else the caller wants tools to see, verbatim.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Synchronous sink for incremental `respond` deliveries.
pub type ResponderSink = Arc<dyn Fn(&str) + Send + Sync>;

// ─── ActionRecord ─────────────────────────────────────────────────────────────

/// Terminal status of one tool call inside a run.
///
/// `Executed` is the canonical success value; `"success"` is accepted as a
/// legacy alias when reading audit rows but is never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Executed,
    Failed,
    QueuedForApproval,
    AsyncStarted,
    BlockedErrorContent,
    BlockedPlaceholderText,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::QueuedForApproval => "queued_for_approval",
            Self::AsyncStarted => "async_started",
            Self::BlockedErrorContent => "blocked_error_content",
            Self::BlockedPlaceholderText => "blocked_placeholder_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executed" | "success" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            "queued_for_approval" => Some(Self::QueuedForApproval),
            "async_started" => Some(Self::AsyncStarted),
            "blocked_error_content" => Some(Self::BlockedErrorContent),
            "blocked_placeholder_text" => Some(Self::BlockedPlaceholderText),
            _ => None,
        }
    }
}

/// One persisted record per tool call the loop handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub tool: String,
    pub params: serde_json::Value,
    pub status: ActionStatus,
    pub result_summary: Option<String>,
    pub reasoning: Option<String>,
    /// `respond` messages that passed the integrity screens and were delivered
    /// through the incremental sink.
    #[serde(default)]
    pub sent_immediately: bool,
    /// Tracking token for async tools.
    pub tracking_id: Option<String>,
}

impl ActionRecord {
    pub fn new(tool: impl Into<String>, params: serde_json::Value, status: ActionStatus) -> Self {
        Self {
            tool: tool.into(),
            params,
            status,
            result_summary: None,
            reasoning: None,
            sent_immediately: false,
            tracking_id: None,
        }
    }
}
