//! Decides which tool IDs are exposed to an agent for one reasoning cycle.
//!
//! Selection narrows by complexity tier, widens by connected platforms and
//! devices, applies skill gates per category, and finishes with the autonomy
//! permission filter.  The returned order is the order tools appear in the
//! prompt.

use std::collections::HashMap;

use crate::agent::classifier::Tier;
use crate::store::agents::Autonomy;
use crate::store::skills::SkillCategory;

// ─── Static tool sets ─────────────────────────────────────────────────────────

/// Always available, every tier.
const CORE_TOOLS: &[&str] = &["respond", "done", "silent", "saveMemory", "searchMemory"];

/// Lightweight read tools added to the reduced (trivial/simple) baseline.
const LIGHT_READ_TOOLS: &[&str] = &["getConversations", "getMessages", "getTasks"];

/// The rest of the always-available set for moderate and above.
const FULL_EXTRA_TOOLS: &[&str] = &[
    "searchMessages",
    "searchWeb",
    "queryKnowledge",
    "generatePlan",
    "requestHumanInput",
    "createTask",
    "updateTask",
    "createSchedule",
    "updateGoal",
    "generateFile",
    "runDiagnostics",
];

const ORCHESTRATION_TOOLS: &[&str] = &["orchestrate", "createSpecialist"];

const LOCAL_AGENT_TOOLS: &[&str] = &["executeOnLocalAgent", "listLocalAgents"];

const MOBILE_AGENT_TOOLS: &[&str] = &["queryPhoneStatus", "querySms", "queryNotifications"];

/// Platform → outbound send tools.
fn platform_send_tools(platform: &str) -> &'static [&'static str] {
    match platform {
        "whatsapp" => &["sendWhatsApp", "sendWhatsAppMedia"],
        "email" => &["sendEmail"],
        "telegram" => &["sendTelegram", "sendTelegramMedia"],
        "team" => &["broadcastTeam"],
        _ => &[],
    }
}

/// CLI provider → prompt tool.
fn cli_tool(provider: &str) -> Option<&'static str> {
    match provider {
        "claude" => Some("claudePrompt"),
        "gemini" => Some("geminiPrompt"),
        "codex" => Some("codexPrompt"),
        _ => None,
    }
}

/// Skill-gated tools per category, cumulative across levels (index = level − 1).
fn skill_tools(category: SkillCategory) -> &'static [&'static [&'static str]] {
    match category {
        SkillCategory::Communication => &[
            &[],
            &["scheduleFollowUp"],
            &["draftDocument"],
            &["broadcastTeam"],
        ],
        SkillCategory::Analysis => &[
            &[],
            &["summarizeThread"],
            &["compareEntities"],
            &["deepResearch"],
        ],
        SkillCategory::Automation => &[
            &[],
            &["createSchedule"],
            &["chainTools"],
            &["createWorkflow"],
        ],
        SkillCategory::Integration => &[
            &[],
            &["queryKnowledge"],
            &["syncPlatformData"],
            &["registerWebhook"],
        ],
        SkillCategory::Management => &[
            &[],
            &["assignTask"],
            &["reviewTeamTasks"],
            &["delegateToAgent"],
        ],
    }
}

/// Tools a supervised agent never sees regardless of tier — scope mutation and
/// cross-agent fan-out stay behind explicit human action.
const SUPERVISED_EXCLUDED: &[&str] = &[
    "addContactToScope",
    "removeContactFromScope",
    "addGroupToScope",
    "orchestrate",
    "createSpecialist",
    "delegateToAgent",
];

// ─── SelectorInput ────────────────────────────────────────────────────────────

/// Everything the selector needs to know about this cycle.
#[derive(Debug, Clone, Default)]
pub struct SelectorInput {
    pub tier: Tier,
    pub autonomy: Autonomy,
    pub orchestration_depth: u32,
    pub can_create_children: bool,
    /// Platforms with an active monitoring source.
    pub monitored_platforms: Vec<String>,
    /// Platforms with a connected account on any linked platform agent.
    pub connected_platforms: Vec<String>,
    pub local_devices_online: usize,
    pub mobile_devices_paired: usize,
    pub authenticated_cli_providers: Vec<String>,
    /// Current level per skill category (missing = level 1).
    pub skill_levels: HashMap<SkillCategory, i64>,
}

// ─── ToolSelector ─────────────────────────────────────────────────────────────

pub struct ToolSelector;

impl ToolSelector {
    /// Produce the ordered tool-ID list exposed this cycle.
    pub fn select(input: &SelectorInput) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |id: &str, out: &mut Vec<String>| {
            if !out.iter().any(|existing| existing == id) {
                out.push(id.to_string());
            }
        };

        for id in CORE_TOOLS {
            push(id, &mut out);
        }
        for id in LIGHT_READ_TOOLS {
            push(id, &mut out);
        }
        if !matches!(input.tier, Tier::Trivial | Tier::Simple) {
            for id in FULL_EXTRA_TOOLS {
                push(id, &mut out);
            }
        }

        if input.orchestration_depth == 0 && input.can_create_children {
            for id in ORCHESTRATION_TOOLS {
                push(id, &mut out);
            }
        }

        for platform in input
            .monitored_platforms
            .iter()
            .chain(input.connected_platforms.iter())
        {
            for id in platform_send_tools(platform) {
                push(id, &mut out);
            }
        }

        if input.local_devices_online > 0 {
            for id in LOCAL_AGENT_TOOLS {
                push(id, &mut out);
            }
        }
        if input.mobile_devices_paired > 0 {
            for id in MOBILE_AGENT_TOOLS {
                push(id, &mut out);
            }
        }

        for provider in &input.authenticated_cli_providers {
            if let Some(id) = cli_tool(provider) {
                push(id, &mut out);
            }
        }

        for category in SkillCategory::all() {
            let level = input.skill_levels.get(&category).copied().unwrap_or(1);
            let tiers = skill_tools(category);
            for tier_tools in tiers.iter().take(level.clamp(1, 4) as usize) {
                for id in *tier_tools {
                    push(id, &mut out);
                }
            }
        }

        // Final restriction: autonomy permission filter.
        if input.autonomy == Autonomy::Supervised {
            out.retain(|id| !SUPERVISED_EXCLUDED.contains(&id.as_str()));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(tier: Tier) -> SelectorInput {
        SelectorInput {
            tier,
            autonomy: Autonomy::Autonomous,
            ..Default::default()
        }
    }

    #[test]
    fn simple_tier_gets_reduced_baseline() {
        let tools = ToolSelector::select(&base_input(Tier::Simple));
        assert!(tools.contains(&"respond".to_string()));
        assert!(tools.contains(&"getMessages".to_string()));
        assert!(
            !tools.contains(&"generatePlan".to_string()),
            "full set is withheld below moderate"
        );
    }

    #[test]
    fn moderate_tier_gets_full_set() {
        let tools = ToolSelector::select(&base_input(Tier::Moderate));
        assert!(tools.contains(&"generatePlan".to_string()));
        assert!(tools.contains(&"searchWeb".to_string()));
    }

    #[test]
    fn orchestration_requires_depth_zero_and_children_flag() {
        let mut input = base_input(Tier::Complex);
        input.can_create_children = true;
        input.orchestration_depth = 0;
        assert!(ToolSelector::select(&input).contains(&"orchestrate".to_string()));

        input.orchestration_depth = 1;
        assert!(!ToolSelector::select(&input).contains(&"orchestrate".to_string()));

        input.orchestration_depth = 0;
        input.can_create_children = false;
        assert!(!ToolSelector::select(&input).contains(&"orchestrate".to_string()));
    }

    #[test]
    fn outbound_tools_follow_platform_presence() {
        let mut input = base_input(Tier::Moderate);
        assert!(!ToolSelector::select(&input).contains(&"sendWhatsApp".to_string()));

        input.monitored_platforms = vec!["whatsapp".to_string()];
        let tools = ToolSelector::select(&input);
        assert!(tools.contains(&"sendWhatsApp".to_string()));
        assert!(tools.contains(&"sendWhatsAppMedia".to_string()));

        input.monitored_platforms.clear();
        input.connected_platforms = vec!["email".to_string()];
        assert!(ToolSelector::select(&input).contains(&"sendEmail".to_string()));
    }

    #[test]
    fn device_and_cli_gating() {
        let mut input = base_input(Tier::Moderate);
        input.local_devices_online = 1;
        input.mobile_devices_paired = 0;
        input.authenticated_cli_providers = vec!["claude".to_string(), "unknown".to_string()];

        let tools = ToolSelector::select(&input);
        assert!(tools.contains(&"executeOnLocalAgent".to_string()));
        assert!(!tools.contains(&"querySms".to_string()));
        assert!(tools.contains(&"claudePrompt".to_string()));
        assert!(!tools.contains(&"codexPrompt".to_string()));
    }

    #[test]
    fn skill_tools_are_monotonic_across_levels() {
        let mut input = base_input(Tier::Moderate);
        input.skill_levels.insert(SkillCategory::Analysis, 2);
        let level2 = ToolSelector::select(&input);
        assert!(level2.contains(&"summarizeThread".to_string()));
        assert!(!level2.contains(&"deepResearch".to_string()));

        input.skill_levels.insert(SkillCategory::Analysis, 4);
        let level4 = ToolSelector::select(&input);
        assert!(level4.contains(&"summarizeThread".to_string()), "lower levels retained");
        assert!(level4.contains(&"deepResearch".to_string()));
    }

    #[test]
    fn supervised_filter_strips_orchestration() {
        let mut input = base_input(Tier::Complex);
        input.autonomy = Autonomy::Supervised;
        input.can_create_children = true;
        let tools = ToolSelector::select(&input);
        assert!(!tools.contains(&"orchestrate".to_string()));
        assert!(!tools.contains(&"createSpecialist".to_string()));
        assert!(tools.contains(&"respond".to_string()));
    }
}
