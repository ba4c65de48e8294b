//! Action handlers dispatched by the scheduler.
//!
//! Handlers are thin: most build a synthetic trigger context and delegate
//! into the reasoning loop.  `health_summary`, `check_messages`, and
//! `review_tasks` aggregate directly without AI involvement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::loop_::AgentReasoningLoop;
use crate::agent::types::{Trigger, TriggerContext};
use crate::services::notifier::MasterNotificationService;
use crate::store::Store;
use crate::store::notifications::NotificationType;
use crate::store::schedules::AgenticSchedule;
use crate::store::tasks::TaskStatus;

/// What a handler reports back to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionResult {
    pub summary: String,
    pub tokens_used: u64,
    pub provider: Option<String>,
    pub model: Option<String>,
}

pub struct ActionHandlers {
    store: Store,
    loop_: Arc<AgentReasoningLoop>,
    notifier: Arc<MasterNotificationService>,
}

impl ActionHandlers {
    pub fn new(
        store: Store,
        loop_: Arc<AgentReasoningLoop>,
        notifier: Arc<MasterNotificationService>,
    ) -> Arc<Self> {
        Arc::new(Self { store, loop_, notifier })
    }

    /// Dispatch one schedule firing.
    pub async fn handle(&self, schedule: &AgenticSchedule) -> Result<ActionResult, String> {
        match schedule.action_type.as_str() {
            "check_messages" => self.check_messages(schedule),
            "review_tasks" => self.review_tasks(schedule),
            "health_summary" => self.health_summary(schedule).await,
            "send_report" => {
                self.delegate(
                    schedule,
                    Trigger::Schedule,
                    Some(
                        "Compose the scheduled status report (tasks, messages, notable events) \
                         and deliver it to your master contact.",
                    ),
                )
                .await
            }
            "update_knowledge" => {
                self.delegate(
                    schedule,
                    Trigger::Schedule,
                    Some(
                        "Review recent conversations and results; store anything durable with \
                         saveMemory. Use silent if nothing is worth keeping.",
                    ),
                )
                .await
            }
            "custom_prompt" => {
                let prompt = schedule
                    .custom_prompt
                    .clone()
                    .ok_or_else(|| "custom_prompt schedule has no prompt configured".to_string())?;
                self.delegate(schedule, Trigger::Schedule, Some(&prompt)).await
            }
            "self_reflect" => self.delegate(schedule, Trigger::PeriodicThink, None).await,
            "reasoning_cycle" => {
                self.delegate(schedule, Trigger::Schedule, schedule.custom_prompt.as_deref())
                    .await
            }
            "follow_up_check_in" => {
                self.delegate(
                    schedule,
                    Trigger::Schedule,
                    Some(
                        "Check for conversations awaiting your follow-up and send any promised \
                         check-ins. Use silent if none are due.",
                    ),
                )
                .await
            }
            "proactive_outreach" => {
                self.delegate(
                    schedule,
                    Trigger::Schedule,
                    Some(
                        "Review your goals and recent context; if a proactive update would help \
                         the user, prepare it. Use silent otherwise.",
                    ),
                )
                .await
            }
            other => Err(format!("unknown action type \"{other}\"")),
        }
    }

    /// Run the reasoning loop with a synthetic trigger context.
    async fn delegate(
        &self,
        schedule: &AgenticSchedule,
        trigger: Trigger,
        prompt: Option<&str>,
    ) -> Result<ActionResult, String> {
        let ctx = TriggerContext {
            custom_prompt: prompt.map(str::to_string),
            extra: schedule.action_config.clone(),
            ..Default::default()
        };
        let outcome = self.loop_.run(&schedule.agent_id, trigger, ctx, None).await?;
        Ok(ActionResult {
            summary: if outcome.silent {
                "completed silently".to_string()
            } else if outcome.final_thought.is_empty() {
                format!("{} action(s)", outcome.actions.len())
            } else {
                outcome.final_thought
            },
            tokens_used: outcome.tokens_used,
            provider: None,
            model: None,
        })
    }

    /// Read-only: unread inbox counts.
    fn check_messages(&self, schedule: &AgenticSchedule) -> Result<ActionResult, String> {
        let unread = self
            .store
            .unread_count(&schedule.agent_id)
            .map_err(|e| e.to_string())?;
        Ok(ActionResult {
            summary: format!("{unread} unread message(s)"),
            ..Default::default()
        })
    }

    /// Read-only: task status aggregation.
    fn review_tasks(&self, schedule: &AgenticSchedule) -> Result<ActionResult, String> {
        let tasks = self
            .store
            .list_agent_tasks(&schedule.agent_id, true)
            .map_err(|e| e.to_string())?;
        let open = tasks.iter().filter(|t| !t.status.is_terminal()).count();
        let blocked = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked)
            .count();
        Ok(ActionResult {
            summary: format!(
                "{} task(s): {} open, {} blocked",
                tasks.len(),
                open,
                blocked
            ),
            ..Default::default()
        })
    }

    /// Aggregates counts directly and notifies the master contact.
    async fn health_summary(&self, schedule: &AgenticSchedule) -> Result<ActionResult, String> {
        let profile = self
            .store
            .get_agent(&schedule.agent_id)
            .map_err(|e| e.to_string())?;
        let unread = self.store.unread_count(&profile.id).unwrap_or(0);
        let tasks = self.store.list_agent_tasks(&profile.id, false).unwrap_or_default();
        let activity = self.store.count_activity(&profile.id).unwrap_or(0);

        let summary = format!(
            "{}: {} open task(s), {} unread message(s), {} activity record(s), ${:.2} of ${:.2} daily budget used",
            profile.name,
            tasks.len(),
            unread,
            activity,
            profile.daily_budget_used,
            profile.daily_budget_usd
        );
        let _ = self
            .notifier
            .notify(
                &profile.user_id,
                &profile.id,
                NotificationType::DailyReport,
                "Health summary",
                &summary,
                &profile.notification_channel,
                profile.master_contact_id.as_deref(),
                None,
            )
            .await;
        Ok(ActionResult {
            summary,
            ..Default::default()
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::ActionHandlers;
    use crate::agent::loop_::AgentReasoningLoop;
    use crate::ai::router::AiRouter;
    use crate::channels::ChannelManager;
    use crate::channels::manager::test_support::RecordingChannel;
    use crate::config::{BudgetConfig, LoopConfig};
    use crate::memory::SqliteMemoryStore;
    use crate::services::{
        ApprovalService, CostTracker, MasterNotificationService, ReflectionService,
    };
    use crate::store::Store;
    use crate::tools::ToolRegistry;
    use crate::tools::registry::test_support::StubTool;

    /// Fully-wired handlers over an in-memory store and a scripted router.
    pub fn handlers_fixture(store: Store, ai: Arc<dyn AiRouter>) -> Arc<ActionHandlers> {
        let memory = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool::ok(
            "respond",
            serde_json::json!({"message": "ok"}),
        )));
        registry.register(Arc::new(StubTool::ok(
            "saveMemory",
            serde_json::json!({"saved": true}),
        )));
        let registry = Arc::new(registry);

        let mut channels = ChannelManager::new();
        channels.register(Arc::new(RecordingChannel::new("email")));
        let notifier = Arc::new(MasterNotificationService::new(
            store.clone(),
            Arc::new(channels),
            None,
        ));
        let approvals = ApprovalService::new(store.clone(), Arc::clone(&notifier), None);
        let reflection = ReflectionService::new(store.clone(), memory.clone());
        let cost = CostTracker::new(
            store.clone(),
            Arc::clone(&notifier),
            None,
            BudgetConfig::default(),
        );

        let loop_ = Arc::new(AgentReasoningLoop::new(
            store.clone(),
            memory,
            ai,
            registry,
            approvals,
            reflection,
            cost,
            LoopConfig::default(),
        ));
        ActionHandlers::new(store, loop_, notifier)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::handlers_fixture;
    use super::*;
    use crate::agent::loop_::test_support::ScriptedRouter;
    use crate::ai::types::AiResponse;
    use crate::store::agents::AgenticProfile;
    use crate::store::tasks::AgenticTask;

    fn setup() -> (Store, String) {
        let store = Store::in_memory().unwrap();
        let profile = AgenticProfile::new("u1", "Atlas");
        store.insert_agent(&profile).unwrap();
        (store, profile.id)
    }

    #[tokio::test]
    async fn check_messages_is_read_only() {
        let (store, agent_id) = setup();
        let handlers = handlers_fixture(store.clone(), ScriptedRouter::new(vec![]));
        let schedule = AgenticSchedule::interval("u1", &agent_id, "check_messages", 5);

        let result = handlers.handle(&schedule).await.unwrap();
        assert_eq!(result.summary, "0 unread message(s)");
        assert_eq!(result.tokens_used, 0, "no AI involvement");
    }

    #[tokio::test]
    async fn review_tasks_aggregates_counts() {
        let (store, agent_id) = setup();
        let mut open = AgenticTask::new("u1", "open");
        open.agent_id = Some(agent_id.clone());
        let mut blocked = AgenticTask::new("u1", "blocked");
        blocked.agent_id = Some(agent_id.clone());
        blocked.status = TaskStatus::Blocked;
        store.insert_task(&open).unwrap();
        store.insert_task(&blocked).unwrap();

        let handlers = handlers_fixture(store.clone(), ScriptedRouter::new(vec![]));
        let schedule = AgenticSchedule::interval("u1", &agent_id, "review_tasks", 5);
        let result = handlers.handle(&schedule).await.unwrap();
        assert!(result.summary.contains("2 task(s)"));
        assert!(result.summary.contains("1 blocked"));
    }

    #[tokio::test]
    async fn custom_prompt_delegates_to_loop() {
        let (store, agent_id) = setup();
        let handlers = handlers_fixture(
            store.clone(),
            ScriptedRouter::new(vec![AiResponse::text(
                "```tool\n{\"action\":\"done\",\"reasoning\":\"prompt handled\"}\n```",
            )]),
        );
        let mut schedule = AgenticSchedule::interval("u1", &agent_id, "custom_prompt", 5);
        schedule.custom_prompt = Some("Summarize the backlog".to_string());

        let result = handlers.handle(&schedule).await.unwrap();
        assert_eq!(result.summary, "prompt handled");
        assert!(result.tokens_used > 0);
    }

    #[tokio::test]
    async fn custom_prompt_without_prompt_fails() {
        let (store, agent_id) = setup();
        let handlers = handlers_fixture(store.clone(), ScriptedRouter::new(vec![]));
        let schedule = AgenticSchedule::interval("u1", &agent_id, "custom_prompt", 5);
        assert!(handlers.handle(&schedule).await.is_err());
    }

    #[tokio::test]
    async fn unknown_action_type_is_an_error() {
        let (store, agent_id) = setup();
        let handlers = handlers_fixture(store.clone(), ScriptedRouter::new(vec![]));
        let schedule = AgenticSchedule::interval("u1", &agent_id, "paint_the_shed", 5);
        let err = handlers.handle(&schedule).await.unwrap_err();
        assert!(err.contains("paint_the_shed"));
    }

    #[tokio::test]
    async fn health_summary_aggregates_and_notifies() {
        let (store, agent_id) = setup();
        let handlers = handlers_fixture(store.clone(), ScriptedRouter::new(vec![]));
        let schedule = AgenticSchedule::interval("u1", &agent_id, "health_summary", 60);

        let result = handlers.handle(&schedule).await.unwrap();
        assert!(result.summary.contains("open task(s)"));
        assert_eq!(
            store.list_notifications_for_agent(&agent_id, 10).unwrap().len(),
            1
        );
    }
}
