//! Post-cycle reflection: learnings, skill XP, level changes, decay.
//!
//! Invoked fire-and-forget after every non-trivial reasoning cycle.  Nothing
//! here may abort or slow the main path — all store/memory writes are
//! best-effort.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::agent::types::{ActionRecord, ActionStatus};
use crate::memory::{Memory, MemoryEntry, MemoryType};
use crate::store::Store;
use crate::store::skills::{MAX_LEVEL, SkillCategory};

/// XP for each successful tool use counted during reflection.
const XP_PER_SUCCESS: i64 = 5;

/// XP for a single successful call, awarded inline by the loop.
const MICRO_XP: i64 = 1;

/// Days of inactivity before decay starts.
const DECAY_AFTER_DAYS: i64 = 14;

/// XP loss per inactive week beyond the grace period.
const DECAY_RATE_PER_WEEK: f64 = 0.05;

/// Total decay cap.
const DECAY_CAP: f64 = 0.50;

/// Map a tool ID to the skill category it exercises.
pub fn category_for_tool(tool_id: &str) -> SkillCategory {
    let lower = tool_id.to_lowercase();
    if lower.starts_with("send")
        || lower == "respond"
        || lower.starts_with("broadcast")
        || lower.contains("followup")
        || lower.contains("follow_up")
    {
        SkillCategory::Communication
    } else if lower.starts_with("search")
        || lower.starts_with("query")
        || lower.contains("summarize")
        || lower.contains("compare")
        || lower.contains("research")
        || lower.contains("analy")
    {
        SkillCategory::Analysis
    } else if lower.contains("schedule")
        || lower.contains("workflow")
        || lower.contains("generate")
        || lower.contains("chain")
    {
        SkillCategory::Automation
    } else if lower.contains("localagent")
        || lower.contains("prompt")
        || lower.contains("sync")
        || lower.contains("webhook")
        || lower.contains("phone")
        || lower.contains("sms")
    {
        SkillCategory::Integration
    } else {
        SkillCategory::Management
    }
}

// ─── Input ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReflectionInput {
    pub agent_id: String,
    pub user_id: String,
    pub trigger: String,
    pub iterations: u32,
    pub actions: Vec<ActionRecord>,
    pub recovery_applied: bool,
}

impl ReflectionInput {
    fn executed(&self) -> Vec<&ActionRecord> {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Executed)
            .collect()
    }

    fn failed(&self) -> Vec<&ActionRecord> {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Failed)
            .collect()
    }

    fn unique_tools(&self) -> usize {
        self.actions
            .iter()
            .map(|a| a.tool.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

// ─── ReflectionService ────────────────────────────────────────────────────────

pub struct ReflectionService {
    store: Store,
    memory: Arc<dyn Memory>,
}

impl ReflectionService {
    pub fn new(store: Store, memory: Arc<dyn Memory>) -> Arc<Self> {
        Arc::new(Self { store, memory })
    }

    /// Quality gate: which cycles deserve durable memories.
    pub fn should_create_memories(input: &ReflectionInput) -> bool {
        if !input.failed().is_empty() || input.recovery_applied {
            return true;
        }
        if input.actions.len() < 3 || input.iterations < 2 {
            return false;
        }
        input.actions.len() >= 4 && input.unique_tools() >= 2
    }

    /// Single-call XP award used by the loop on each successful execution.
    pub fn award_micro_xp(&self, agent_id: &str, tool_id: &str) {
        let category = category_for_tool(tool_id);
        if let Err(e) = self.award_xp(agent_id, category, MICRO_XP) {
            debug!("micro-XP award failed for {agent_id}/{tool_id}: {e}");
        }
    }

    /// Full post-cycle analysis.
    pub async fn reflect(&self, input: ReflectionInput) {
        if input.actions.len() < 2 {
            return; // trivial cycles are not reflected on
        }

        let gate = Self::should_create_memories(&input);

        // Tool usage analysis → XP.
        let mut per_tool: HashMap<&str, (u32, u32)> = HashMap::new();
        for action in &input.actions {
            let entry = per_tool.entry(action.tool.as_str()).or_default();
            match action.status {
                ActionStatus::Executed => entry.0 += 1,
                ActionStatus::Failed => entry.1 += 1,
                _ => {}
            }
        }
        for (tool, (successes, _)) in &per_tool {
            if *successes > 0 {
                let category = category_for_tool(tool);
                if let Err(e) =
                    self.award_xp(&input.agent_id, category, XP_PER_SUCCESS * i64::from(*successes))
                {
                    warn!("XP award failed for {tool}: {e}");
                }
            }
        }

        // Failure analysis — always recorded when failures happened.
        let failed = input.failed();
        if !failed.is_empty() {
            let failed_tools: Vec<&str> = failed.iter().map(|a| a.tool.as_str()).collect();
            let importance = (0.5 + 0.1 * failed.len() as f64).min(0.9);
            self.remember(
                &input.agent_id,
                MemoryType::Learning,
                format!(
                    "Trigger {} saw failures in: {}",
                    input.trigger,
                    failed_tools.join(", ")
                ),
                importance,
            )
            .await;
        }

        // Efficiency analysis.
        let executed = input.executed();
        if input.iterations > 5 && executed.len() < 3 {
            self.remember(
                &input.agent_id,
                MemoryType::Learning,
                format!(
                    "Inefficient cycle: {} iterations produced only {} executed tools on trigger {}",
                    input.iterations,
                    executed.len(),
                    input.trigger
                ),
                0.6,
            )
            .await;
        }

        // Successful tool-chain pattern.
        if gate && executed.len() >= 3 {
            let chain: Vec<&str> = executed.iter().map(|a| a.tool.as_str()).collect();
            self.remember(
                &input.agent_id,
                MemoryType::Decision,
                format!(
                    "Approach that worked for {}: {}",
                    input.trigger,
                    chain.join(", ")
                ),
                0.7,
            )
            .await;
        }

        // Level-up pass over every touched category, then decay.
        self.check_level_ups(&input.agent_id);
        self.apply_decay(&input.agent_id);
    }

    fn award_xp(&self, agent_id: &str, category: SkillCategory, amount: i64) -> Result<(), String> {
        let skill = self
            .store
            .get_or_create_skill(agent_id, category)
            .map_err(|e| e.to_string())?;
        self.store
            .update_skill(&skill.id, skill.xp + amount, skill.current_level, true)
            .map_err(|e| e.to_string())?;
        self.store
            .log_skill_event(agent_id, category, "xp_award", None, None, amount)
            .map_err(|e| e.to_string())
    }

    /// Promote any skill whose XP clears the next threshold.
    pub fn check_level_ups(&self, agent_id: &str) {
        let Ok(skills) = self.store.list_skills(agent_id) else { return };
        for skill in skills {
            let Some(threshold) = skill.next_threshold() else { continue };
            if skill.xp >= threshold && skill.current_level < MAX_LEVEL {
                let new_level = skill.current_level + 1;
                if self
                    .store
                    .update_skill(&skill.id, skill.xp, new_level, false)
                    .is_ok()
                {
                    let _ = self.store.log_skill_event(
                        agent_id,
                        skill.category,
                        "level_up",
                        Some(skill.current_level),
                        Some(new_level),
                        0,
                    );
                }
            }
        }
    }

    /// Weekly decay for idle skills: `5% × (inactive_weeks − 2)` of current XP,
    /// capped at 50 %.  Level-down when XP falls below the prior threshold.
    pub fn apply_decay(&self, agent_id: &str) {
        let Ok(skills) = self.store.list_skills(agent_id) else { return };
        let now = Utc::now();
        for skill in skills {
            let Some(last_used) = skill
                .last_used_at
                .as_deref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            else {
                continue;
            };
            let idle_days = (now - last_used.with_timezone(&Utc)).num_days();
            if idle_days < DECAY_AFTER_DAYS {
                continue;
            }
            let idle_weeks = idle_days / 7;
            let ratio =
                (DECAY_RATE_PER_WEEK * (idle_weeks - 2).max(0) as f64).min(DECAY_CAP);
            if ratio <= 0.0 {
                continue;
            }
            let loss = (skill.xp as f64 * ratio) as i64;
            if loss == 0 {
                continue;
            }
            let new_xp = skill.xp - loss;
            let mut new_level = skill.current_level;
            if new_xp < skill.previous_threshold() && new_level > 1 {
                new_level -= 1;
                let _ = self.store.log_skill_event(
                    agent_id,
                    skill.category,
                    "level_down",
                    Some(skill.current_level),
                    Some(new_level),
                    -loss,
                );
            }
            if self
                .store
                .update_skill(&skill.id, new_xp, new_level, false)
                .is_ok()
            {
                let _ = self.store.log_skill_event(
                    agent_id,
                    skill.category,
                    "decay",
                    None,
                    None,
                    -loss,
                );
            }
        }
    }

    async fn remember(
        &self,
        agent_id: &str,
        memory_type: MemoryType,
        content: String,
        importance: f64,
    ) {
        let entry = MemoryEntry {
            id: String::new(),
            agent_id: agent_id.to_string(),
            memory_type,
            content,
            summary: None,
            importance,
            valence: 0.0,
            related_entity: None,
            session_id: None,
            access_count: 0,
            expires_at: None,
            tags: vec!["reflection".to_string()],
            score: 0.0,
            created_at: String::new(),
        };
        if let Err(e) = self.memory.store(entry).await {
            warn!("reflection memory write failed for {agent_id}: {e}");
        }
    }
}
