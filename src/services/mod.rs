pub mod approval;
pub mod collaboration;
pub mod comms;
pub mod cost;
pub mod notifier;
pub mod reflection;

pub use approval::ApprovalService;
pub use collaboration::CollaborationProtocol;
pub use comms::AgentComms;
pub use cost::CostTracker;
pub use notifier::MasterNotificationService;
pub use reflection::ReflectionService;
