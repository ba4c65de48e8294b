pub mod agent;
pub mod ai;
pub mod channels;
pub mod config;
pub mod event_bus;
pub mod memory;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types across
/// the Colony codebase.
///
/// ```rust
/// use colony::prelude::*;
/// ```
pub mod prelude {
    // AI router seam
    pub use crate::ai::router::AiRouter;
    pub use crate::ai::types::{AiRequest, AiResponse, Message, MessageRole, NativeToolCall};

    // Tool system
    pub use crate::tools::{Tool, ToolContext, ToolOutcome, ToolRegistry};

    // Agent runtime
    pub use crate::agent::classifier::{TaskClassifier, Tier};
    pub use crate::agent::loop_::{AgentReasoningLoop, RunOutcome};
    pub use crate::agent::types::{ActionRecord, ActionStatus, Trigger, TriggerContext};

    // Memory subsystem
    pub use crate::memory::traits::{Memory, MemoryEntry, MemoryType};

    // Event bus
    pub use crate::event_bus::{AppEvent, EventBus, TokioBroadcastBus};

    // Scheduler
    pub use crate::scheduler::engine::Scheduler;

    // Storage
    pub use crate::store::{Store, StoreError};

    // Configuration
    pub use crate::config::{RuntimeConfig, load_default_config};

    // Channel abstraction
    pub use crate::channels::{Channel, ChannelManager};
}
