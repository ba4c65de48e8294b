use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// All events that flow through the runtime event bus.
///
/// WebSocket/dashboard emission is a subscriber concern; publishing is always
/// best-effort and must never abort the reasoning path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// A reasoning run has passed the entry gates and is about to iterate.
    ReasoningStart {
        agent_id: String,
        trigger: String,
        tier: String,
    },
    /// One loop iteration is starting.
    ReasoningStep {
        agent_id: String,
        iteration: u32,
    },
    ReasoningComplete {
        agent_id: String,
        iterations: u32,
        actions: usize,
        tokens_used: u64,
    },
    AgenticError {
        agent_id: String,
        message: String,
    },
    /// Pause/resume/interrupt register changes.
    AgenticStatusChanged {
        agent_id: String,
        status: String,
    },
    ToolStart {
        agent_id: String,
        tool: String,
        params: serde_json::Value,
    },
    ToolResult {
        agent_id: String,
        tool: String,
        success: bool,
        summary: String,
    },
    ApprovalQueued {
        approval_id: String,
        agent_id: String,
        tool: String,
    },
    ApprovalResolved {
        approval_id: String,
        approved: bool,
    },
    ScheduleFired {
        schedule_id: String,
        agent_id: String,
        action_type: String,
    },
    JobFinished {
        schedule_id: String,
        status: String,
        duration_ms: i64,
    },
    BudgetThreshold {
        agent_id: String,
        ratio: f64,
        exceeded: bool,
    },
    NotificationDispatched {
        notification_id: String,
        channel: String,
        delivered: bool,
    },
    SystemReady,
    SystemError {
        message: String,
    },
}

/// Selects which event variants a subscriber is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ReasoningStart,
    ReasoningStep,
    ReasoningComplete,
    AgenticError,
    AgenticStatusChanged,
    ToolStart,
    ToolResult,
    ApprovalQueued,
    ApprovalResolved,
    ScheduleFired,
    JobFinished,
    BudgetThreshold,
    NotificationDispatched,
    SystemReady,
    SystemError,
    /// Matches every variant.
    All,
}

impl EventType {
    /// Returns true if this filter matches `event`.
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            Self::All => true,
            Self::ReasoningStart => matches!(event, AppEvent::ReasoningStart { .. }),
            Self::ReasoningStep => matches!(event, AppEvent::ReasoningStep { .. }),
            Self::ReasoningComplete => matches!(event, AppEvent::ReasoningComplete { .. }),
            Self::AgenticError => matches!(event, AppEvent::AgenticError { .. }),
            Self::AgenticStatusChanged => matches!(event, AppEvent::AgenticStatusChanged { .. }),
            Self::ToolStart => matches!(event, AppEvent::ToolStart { .. }),
            Self::ToolResult => matches!(event, AppEvent::ToolResult { .. }),
            Self::ApprovalQueued => matches!(event, AppEvent::ApprovalQueued { .. }),
            Self::ApprovalResolved => matches!(event, AppEvent::ApprovalResolved { .. }),
            Self::ScheduleFired => matches!(event, AppEvent::ScheduleFired { .. }),
            Self::JobFinished => matches!(event, AppEvent::JobFinished { .. }),
            Self::BudgetThreshold => matches!(event, AppEvent::BudgetThreshold { .. }),
            Self::NotificationDispatched => {
                matches!(event, AppEvent::NotificationDispatched { .. })
            }
            Self::SystemReady => matches!(event, AppEvent::SystemReady),
            Self::SystemError => matches!(event, AppEvent::SystemError { .. }),
        }
    }
}

/// A set of event types used for filtering subscriptions.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn new(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn matches(&self, event: &AppEvent) -> bool {
        self.event_types.iter().any(|t| t.matches(event))
    }
}

/// Central pub/sub bus for runtime events.
///
/// All returned `Receiver`s receive every published event; callers are
/// responsible for filtering if they subscribed via [`subscribe_filtered`].
pub trait EventBus: Send + Sync {
    /// Publish an event to all active subscribers.
    fn publish(&self, event: AppEvent) -> Result<(), String>;

    /// Subscribe to all events.
    fn subscribe(&self) -> broadcast::Receiver<AppEvent>;

    /// Subscribe to events, pre-scoped to the given filter.
    ///
    /// The returned receiver still carries all events; the filter is provided
    /// as documentation / future optimisation surface.  Consumers should call
    /// [`EventFilter::matches`] to discard unwanted events.
    fn subscribe_filtered(&self, filter: EventFilter) -> broadcast::Receiver<AppEvent>;
}
