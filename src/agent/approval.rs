//! Tool-level approval policy.
//!
//! Autonomy sets the default stance; the outbound-contact and
//! master-authority overrides then apply in both directions: a non-master
//! trigger forces approval onto those tools regardless of autonomy, and a
//! master trigger bypasses approval for them.

use super::types::TriggerContext;
use crate::store::agents::{AgenticProfile, Autonomy};

/// Tools that auto-execute under semi-autonomous operation.
///
/// Read-only AI/analysis, read-only platform data access, internal planning,
/// internal schedule/task/goal CRUD, memory/reflection, diagnostics, and
/// workspace file generation.  Never outbound messaging, scope mutation,
/// cross-agent delegation, or approval-request creation.
pub const SAFE_TOOLS: &[&str] = &[
    "respond",
    "done",
    "silent",
    "getConversations",
    "getMessages",
    "getTasks",
    "searchMessages",
    "searchWeb",
    "queryKnowledge",
    "generatePlan",
    "requestHumanInput",
    "createTask",
    "updateTask",
    "createSchedule",
    "updateGoal",
    "saveMemory",
    "searchMemory",
    "runDiagnostics",
    "generateFile",
    "summarizeThread",
    "compareEntities",
    "deepResearch",
    "scheduleFollowUp",
    "draftDocument",
    "chainTools",
    "queryPhoneStatus",
    "listLocalAgents",
];

/// Outbound messaging tools covered by the outbound-contact rule.
pub const OUTBOUND_CONTACT_TOOLS: &[&str] = &[
    "sendWhatsApp",
    "sendWhatsAppMedia",
    "sendEmail",
    "sendTelegram",
    "sendTelegramMedia",
    "broadcastTeam",
];

/// Scope-mutating tools covered by the master-authority rule.
pub const MASTER_AUTHORITY_TOOLS: &[&str] =
    &["addContactToScope", "removeContactFromScope", "addGroupToScope"];

pub struct ApprovalGate;

impl ApprovalGate {
    /// Decide whether this tool call must be queued for human approval.
    pub fn needs_approval(
        profile: &AgenticProfile,
        tool_id: &str,
        trigger_context: &TriggerContext,
    ) -> bool {
        let outbound = OUTBOUND_CONTACT_TOOLS.contains(&tool_id);
        let master_authority = MASTER_AUTHORITY_TOOLS.contains(&tool_id);

        // Overrides beat the autonomy default in both directions.
        if outbound || master_authority {
            return !trigger_context.sender_is_master;
        }

        match profile.autonomy {
            Autonomy::Autonomous => profile
                .require_approval_for
                .iter()
                .any(|id| id == tool_id),
            Autonomy::SemiAutonomous => !SAFE_TOOLS.contains(&tool_id),
            Autonomy::Supervised => true,
        }
    }
}
