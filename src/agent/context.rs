//! System-prompt and user-message assembly.
//!
//! Section order is deterministic and the system prompt is never truncated —
//! conversation messages are the only thing the loop ever trims.

use serde::{Deserialize, Serialize};

use super::classifier::Tier;
use super::types::{IntentHint, Trigger, TriggerContext};
use crate::memory::MemoryEntry;
use crate::store::agents::AgenticProfile;
use crate::store::schedules::AgenticSchedule;
use crate::store::skills::Skill;
use crate::store::tasks::AgenticTask;
use crate::tools::ToolInfo;

/// Characters of the raw message used in the memory-search query.
pub const MEMORY_QUERY_PREVIEW_CHARS: usize = 100;

// ─── Device descriptors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAgentDescriptor {
    pub name: String,
    pub online: bool,
    pub installed_tools: Vec<String>,
    pub capabilities: Vec<String>,
    pub mcp_servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileAgentDescriptor {
    pub name: String,
    pub online: bool,
    pub battery_percent: Option<u8>,
    pub connectivity: Option<String>,
    pub gps: Option<String>,
}

// ─── Inputs / output ──────────────────────────────────────────────────────────

/// Everything the assembler needs, loaded by the caller.
#[derive(Debug, Clone, Default)]
pub struct ContextInputs {
    pub goals: Vec<String>,
    pub skills: Vec<Skill>,
    pub team_size: i64,
    pub active_tasks: Vec<AgenticTask>,
    pub completed_tasks: Vec<AgenticTask>,
    pub schedules: Vec<AgenticSchedule>,
    pub monitoring_sources: Vec<String>,
    /// `(library_id, name)` pairs the AI should prefer over web search.
    pub knowledge_libraries: Vec<(String, String)>,
    pub memories: Vec<MemoryEntry>,
    pub tools: Vec<ToolInfo>,
    pub local_agents: Vec<LocalAgentDescriptor>,
    pub mobile_agents: Vec<MobileAgentDescriptor>,
    pub tier: Tier,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub user_message: String,
}

// ─── ContextAssembler ─────────────────────────────────────────────────────────

pub struct ContextAssembler;

impl ContextAssembler {
    /// Build the memory-search query for an incoming message: sender plus the
    /// head of the raw text.  Media-only messages skip memory search.
    pub fn memory_query(ctx: &TriggerContext) -> Option<String> {
        if ctx.media_only {
            return None;
        }
        let preview = ctx.preview.as_deref()?;
        let head: String = preview.chars().take(MEMORY_QUERY_PREVIEW_CHARS).collect();
        match &ctx.sender {
            Some(sender) => Some(format!("{sender} {head}")),
            None => Some(head),
        }
    }

    pub fn build(
        profile: &AgenticProfile,
        trigger: Trigger,
        ctx: &TriggerContext,
        inputs: &ContextInputs,
    ) -> AssembledContext {
        AssembledContext {
            system_prompt: Self::system_prompt(profile, inputs),
            user_message: Self::user_message(profile, trigger, ctx),
        }
    }

    // ── System prompt ─────────────────────────────────────────────────────────

    fn system_prompt(profile: &AgenticProfile, inputs: &ContextInputs) -> String {
        let mut sections: Vec<String> = Vec::new();

        // 1. Personality.
        if profile.system_prompt.trim().is_empty() {
            sections.push(format!(
                "You are {}, an autonomous agent in the role: {}.",
                profile.name,
                if profile.role.is_empty() { "assistant" } else { &profile.role }
            ));
        } else {
            sections.push(profile.system_prompt.clone());
        }

        // 2. Agent context.
        let mut agent_ctx = String::from("## Your current state\n");
        if !inputs.goals.is_empty() {
            agent_ctx.push_str("Active goals:\n");
            for goal in &inputs.goals {
                agent_ctx.push_str(&format!("- {goal}\n"));
            }
        }
        if !inputs.skills.is_empty() {
            agent_ctx.push_str("Skills:\n");
            for skill in &inputs.skills {
                agent_ctx.push_str(&format!(
                    "- {}: {} (level {})\n",
                    skill.category.as_str(),
                    level_name(skill.current_level),
                    skill.current_level
                ));
            }
        }
        agent_ctx.push_str(&format!("Team size: {}\n", inputs.team_size));
        if !inputs.active_tasks.is_empty() {
            agent_ctx.push_str(
                "Active tasks (copy the exact ID when updating a task):\n",
            );
            for task in &inputs.active_tasks {
                agent_ctx.push_str(&format!(
                    "- [{}] {} ({})\n",
                    task.id,
                    task.title,
                    task.status.as_str()
                ));
            }
        }
        if !inputs.completed_tasks.is_empty() {
            agent_ctx.push_str(&format!(
                "Recently completed tasks: {}\n",
                inputs
                    .completed_tasks
                    .iter()
                    .map(|t| t.title.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            ));
        }
        if !inputs.schedules.is_empty() {
            agent_ctx.push_str("Active schedules:\n");
            for schedule in &inputs.schedules {
                agent_ctx.push_str(&format!(
                    "- [{}] {} ({})\n",
                    schedule.id,
                    schedule.action_type,
                    schedule.schedule_type.as_str()
                ));
            }
        }
        if !inputs.monitoring_sources.is_empty() {
            agent_ctx.push_str(&format!(
                "Monitoring sources: {}\n",
                inputs.monitoring_sources.join(", ")
            ));
        }
        if !inputs.knowledge_libraries.is_empty() {
            agent_ctx.push_str(
                "Knowledge libraries (prefer queryKnowledge over searchWeb for these):\n",
            );
            for (id, name) in &inputs.knowledge_libraries {
                agent_ctx.push_str(&format!("- [{id}] {name}\n"));
            }
        }
        if let Some(master) = &profile.master_contact_name {
            agent_ctx.push_str(&format!(
                "Master contact: {master} (reach via {})\n",
                profile.notification_channel
            ));
        }
        let band = familiarity_band(profile.interaction_count);
        agent_ctx.push_str(&format!(
            "Relationship familiarity: {} — {}\n",
            band,
            familiarity_tone(band)
        ));
        sections.push(agent_ctx);

        // 3. Recent memories.
        if !inputs.memories.is_empty() {
            let mut mem = String::from("## Relevant memories\n");
            for entry in &inputs.memories {
                mem.push_str(&format!(
                    "- ({}) {}\n",
                    entry.memory_type,
                    entry.summary.as_deref().unwrap_or(&entry.content)
                ));
            }
            sections.push(mem);
        }

        // 4. Available tools + output format.
        let mut tools = String::from("## Available tools\n");
        for info in &inputs.tools {
            tools.push_str(&format!("{}\n", info.prompt_line()));
        }
        tools.push_str(
            "\n## Output format\nEmit exactly one tool call per response, as JSON in a fenced block:\n```tool\n{\"action\":\"<toolId>\",\"params\":{...},\"reasoning\":\"...\"}\n```\nUse `done` when finished and `silent` when no user-facing message is needed.\n",
        );
        tools.push_str(tier_instructions(inputs.tier));
        sections.push(tools);

        // 5. Local agents.
        if !inputs.local_agents.is_empty() {
            let mut local = String::from("## Local agents (connected devices)\n");
            for device in &inputs.local_agents {
                local.push_str(&format!(
                    "- {} [{}]: tools {}; capabilities {}; MCP {}\n",
                    device.name,
                    if device.online { "online" } else { "offline" },
                    device.installed_tools.join(", "),
                    device.capabilities.join(", "),
                    device.mcp_servers.join(", "),
                ));
            }
            local.push_str(
                "Use executeOnLocalAgent for work that must run on the user's device; prefer server-side tools otherwise.\n",
            );
            sections.push(local);
        }

        // 6. Mobile agents.
        if !inputs.mobile_agents.is_empty() {
            let mut mobile = String::from("## Mobile agents (paired phones)\n");
            for device in &inputs.mobile_agents {
                if device.online {
                    mobile.push_str(&format!(
                        "- {} [online] battery {}%, {}, GPS {}\n",
                        device.name,
                        device.battery_percent.unwrap_or(0),
                        device.connectivity.as_deref().unwrap_or("unknown"),
                        device.gps.as_deref().unwrap_or("unavailable"),
                    ));
                } else {
                    mobile.push_str(&format!("- {} [offline]\n", device.name));
                }
            }
            mobile.push_str("Use querySms / queryNotifications for on-phone data.\n");
            sections.push(mobile);
        }

        sections.join("\n")
    }

    // ── User message ──────────────────────────────────────────────────────────

    fn user_message(profile: &AgenticProfile, trigger: Trigger, ctx: &TriggerContext) -> String {
        match trigger {
            Trigger::IncomingMessage => Self::incoming_message_prompt(profile, ctx),
            Trigger::WakeUp => "You have been woken up. Review your state and decide whether \
                 anything needs attention. Use `silent` if nothing does."
                .to_string(),
            Trigger::TaskResponseReceived => format!(
                "A task you delegated has received a response:\n{}\nDecide the next step.",
                ctx.preview.as_deref().unwrap_or("(no content)")
            ),
            Trigger::AgentStatusChanges => format!(
                "An agent you coordinate changed status: {}",
                ctx.preview.as_deref().unwrap_or("(unspecified)")
            ),
            Trigger::OrchestratedTask => format!(
                "You were delegated this sub-task by your parent agent:\n{}",
                ctx.preview.as_deref().unwrap_or("(no description)")
            ),
            Trigger::Consultation => format!(
                "A peer agent is consulting you. Answer their question directly:\n{}",
                ctx.preview.as_deref().unwrap_or("(no question)")
            ),
            Trigger::Schedule => match &ctx.custom_prompt {
                Some(prompt) => prompt.clone(),
                None => "A scheduled job fired. Perform its action and use `silent` unless \
                     something needs the user's attention."
                    .to_string(),
            },
            Trigger::PeriodicThink => "Periodic thinking time: review goals, tasks, and recent \
                 activity. Record useful conclusions with saveMemory; use `silent` if no outward \
                 action is needed."
                .to_string(),
            Trigger::Heartbeat => "Heartbeat check-in. Verify monitored sources and pending work. \
                 Respond only if something requires attention; otherwise use `silent`."
                .to_string(),
            Trigger::ApprovalResume => {
                let result = ctx
                    .approval_tool_result
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "(result unavailable)".to_string());
                format!(
                    "Your queued action was approved and has already been executed. Result:\n{result}\nDo not re-invoke the tool; summarize the outcome and finish with `done`."
                )
            }
        }
    }

    fn incoming_message_prompt(profile: &AgenticProfile, ctx: &TriggerContext) -> String {
        let mut out = String::new();
        let sender = ctx.sender.as_deref().unwrap_or("Unknown sender");
        out.push_str(&format!(
            "New message from {sender}{}.\n",
            if ctx.sender_is_master {
                " (your master contact)"
            } else {
                ""
            }
        ));
        if let Some(quoted) = &ctx.quoted_content {
            out.push_str(&format!("They replied to: \"{quoted}\"\n"));
        }
        if !ctx.history.is_empty() {
            out.push_str("Recent conversation:\n");
            for line in &ctx.history {
                out.push_str(&format!("  {line}\n"));
            }
        }
        // Task-state block.
        out.push_str(&format!(
            "Task state: last task {}; intent hint: {}.\n",
            match ctx.last_task_completed {
                Some(true) => "completed",
                Some(false) => "pending",
                None => "none",
            },
            match ctx.intent_hint {
                Some(IntentHint::NewIntent) => "new_intent",
                Some(IntentHint::Acknowledgement) => "acknowledgement",
                Some(IntentHint::PossibleFollowup) => "possible_followup",
                None => "new_intent",
            }
        ));
        out.push_str(&format!(
            "Message:\n{}\n",
            ctx.preview.as_deref().unwrap_or("(media attachment)")
        ));
        if ctx.media_only {
            out.push_str(
                "The message is media-only. Process the attachment first (describe, transcribe, \
                 or extract as appropriate), then respond with what you found.\n",
            );
        } else {
            out.push_str(&format!(
                "Respond as {} would: gather what you need with tools, then use `respond` with \
                 the actual answer and finish with `done`.\n",
                profile.name
            ));
        }
        out
    }
}

// ─── Familiarity / levels ─────────────────────────────────────────────────────

fn familiarity_band(interaction_count: i64) -> &'static str {
    match interaction_count {
        n if n < 10 => "new",
        n if n < 50 => "developing",
        n if n < 200 => "established",
        _ => "deep",
    }
}

fn familiarity_tone(band: &str) -> &'static str {
    match band {
        "new" => "be precise and slightly formal; earn trust",
        "developing" => "be warm but still explicit about what you are doing",
        "established" => "be concise; shared context can be assumed",
        _ => "be direct and personal; long-running context is shared",
    }
}

fn level_name(level: i64) -> &'static str {
    match level {
        1 => "novice",
        2 => "competent",
        3 => "proficient",
        _ => "expert",
    }
}

fn tier_instructions(tier: Tier) -> &'static str {
    match tier {
        Tier::Trivial | Tier::Simple => {
            "\nThis is a simple request: answer in at most a couple of tool calls, then `done`.\n"
        }
        Tier::Moderate => {
            "\nWork step by step: gather data first, respond with real results, then `done`.\n"
        }
        Tier::Complex | Tier::Critical => {
            "\nThis is a complex request: consider generatePlan before acting, verify \
             intermediate results, and keep the user informed with `respond`.\n"
        }
    }
}
