//! Plan-driven execution.
//!
//! Two entry routes, both behind the `generatePlan` tool being exposed this
//! cycle:
//!
//! - **Auto-decomposition** — the decomposer detects a decomposable request
//!   and asks the AI for a plan JSON directly.
//! - **Plan-driven mode** — the AI is offered one chance to call
//!   `generatePlan`; declining falls back to the reactive loop.
//!
//! Steps execute serially in declared order with mini reactive loops sharing
//! the global AI semaphore; `parallel_groups` is persisted for observability.
//! A failed step triggers a one-shot continue/abort decision by the AI.

use serde_json::json;
use tracing::{debug, warn};

use super::classifier::{Classification, Tier};
use super::decomposer::{Plan, PlanStep, TaskDecomposer, extract_plan_json};
use super::loop_::{AgentReasoningLoop, CallOutcome, RunOutcome};
use super::parser::parse_tool_calls;
use super::screens::{is_error_shaped, is_placeholder_shaped};
use super::types::{ActionRecord, ActionStatus, ResponderSink, TriggerContext};
use crate::agent::context::AssembledContext;
use crate::ai::types::{AiRequest, Message};
use crate::memory::{MemoryEntry, MemoryType};
use crate::store::activity::ActivitySource;
use crate::store::agents::AgenticProfile;
use crate::store::tasks::{AgenticTask, TaskStatus};

/// Iterations allowed per plan step.
const MAX_STEP_ITERATIONS: u32 = 3;

/// Result of executing one step.
struct StepResult {
    step_id: String,
    title: String,
    summary: String,
    status: TaskStatus,
}

pub(crate) struct PlanDrivenLoop<'a> {
    loop_: &'a AgentReasoningLoop,
}

impl<'a> PlanDrivenLoop<'a> {
    pub fn new(loop_: &'a AgentReasoningLoop) -> Self {
        Self { loop_ }
    }

    /// Try both plan routes.  `Ok(None)` means "fall back to the reactive
    /// loop"; an executed plan returns its full outcome.
    #[allow(clippy::too_many_arguments)]
    pub async fn try_plan(
        &self,
        profile: &AgenticProfile,
        ctx: &TriggerContext,
        assembled: &AssembledContext,
        classification: &Classification,
        tier: Tier,
        text: &str,
        available: &[String],
        responder: Option<ResponderSink>,
    ) -> Result<Option<RunOutcome>, String> {
        if !available.iter().any(|id| id == "generatePlan") {
            return Ok(None);
        }

        let mut tokens_used = 0u64;

        // Route 1: auto-decomposition.
        let mut plan: Option<Plan> = None;
        if TaskDecomposer::should_decompose(classification, tier, text) {
            let request =
                TaskDecomposer::decompose_request(text, &assembled.system_prompt, &profile.user_id);
            match self.loop_.ai_call(profile, request, "plan_decomposition").await {
                Ok(response) => {
                    tokens_used += response.total_tokens();
                    plan = extract_plan_json(&response.content)
                        .and_then(TaskDecomposer::finalize);
                }
                Err(e) => debug!("auto-decomposition call failed: {e}"),
            }
        }

        // Route 2: plan-driven mode — the AI must call generatePlan itself.
        if plan.is_none() {
            let request = AiRequest::new(
                "plan mode",
                &profile.user_id,
                vec![
                    Message::system(assembled.system_prompt.clone()),
                    Message::user(format!(
                        "{}\n\nIf this request needs multiple distinct steps, call generatePlan \
                         with the plan JSON as its params (goal, steps[], synthesis_step). If a \
                         single pass is enough, answer without calling generatePlan.",
                        assembled.user_message
                    )),
                ],
            )
            .with_force_tier(tier.floor_simple().as_str());
            let response = match self.loop_.ai_call(profile, request, "plan_mode").await {
                Ok(r) => r,
                Err(e) => {
                    debug!("plan-mode call failed, falling back to reactive: {e}");
                    return Ok(None);
                }
            };
            tokens_used += response.total_tokens();
            let calls = parse_tool_calls(
                &response.content,
                &response.native_tool_calls,
                response.used_native_tools,
            );
            plan = calls
                .iter()
                .find(|c| c.action == "generatePlan" || c.action == "createPlan")
                .and_then(|c| {
                    serde_json::from_value::<Plan>(c.params.clone())
                        .ok()
                        .or_else(|| extract_plan_json(&c.params.to_string()))
                })
                .and_then(TaskDecomposer::finalize);
        }

        let Some(plan) = plan else {
            return Ok(None); // AI declined to plan
        };
        if plan.steps.len() < 2 {
            return Ok(None);
        }

        self.execute(profile, ctx, assembled, plan, tokens_used, responder)
            .await
            .map(Some)
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    async fn execute(
        &self,
        profile: &AgenticProfile,
        ctx: &TriggerContext,
        assembled: &AssembledContext,
        plan: Plan,
        mut tokens_used: u64,
        responder: Option<ResponderSink>,
    ) -> Result<RunOutcome, String> {
        let store = &self.loop_.store;

        // Persist the plan as a root task plus one row per step.
        let mut root = AgenticTask::new(&profile.user_id, plan.goal.clone());
        root.agent_id = Some(profile.id.clone());
        root.task_type = "plan_root".to_string();
        root.status = TaskStatus::InProgress;
        root.description = serde_json::json!({
            "execution_order": &plan.execution_order,
            "parallel_groups": &plan.parallel_groups,
        })
        .to_string();
        store.insert_task(&root).map_err(|e| e.to_string())?;

        let mut step_task_ids: Vec<(String, String)> = Vec::new();
        for step in &plan.steps {
            let mut task = AgenticTask::new(&profile.user_id, step.title.clone());
            task.agent_id = Some(profile.id.clone());
            task.description = step.description.clone();
            task.task_type = if step.step_type == "human_input" {
                "human_input".to_string()
            } else {
                "plan_step".to_string()
            };
            task.parent_task_id = Some(root.id.clone());
            store.insert_task(&task).map_err(|e| e.to_string())?;
            step_task_ids.push((step.id.clone(), task.id));
        }

        // One short acknowledgment before the work starts.
        if let Some(sink) = &responder {
            sink(&format!(
                "On it — working through {} steps, I'll report back.",
                plan.steps.len()
            ));
        }

        let mut actions: Vec<ActionRecord> = Vec::new();
        let mut iterations = 0u32;
        let mut total_responds = 0u32;
        let mut step_results: Vec<StepResult> = Vec::new();
        let mut aborted = false;

        for step_id in &plan.execution_order {
            let Some(step) = plan.step(step_id) else { continue };
            let task_id = step_task_ids
                .iter()
                .find(|(id, _)| id == step_id)
                .map(|(_, task_id)| task_id.clone())
                .unwrap_or_default();

            if step.step_type == "human_input" {
                let result = self
                    .run_human_input_step(profile, ctx, step, &task_id, &mut actions, &mut total_responds, &responder)
                    .await;
                let _ = store.update_task_status(&task_id, TaskStatus::Blocked, Some(&result));
                step_results.push(StepResult {
                    step_id: step.id.clone(),
                    title: step.title.clone(),
                    summary: format!("BLOCKED awaiting {result}"),
                    status: TaskStatus::Blocked,
                });
                continue;
            }

            let (summary, step_tokens, step_iterations, succeeded) = self
                .run_step(
                    profile,
                    ctx,
                    assembled,
                    step,
                    &step_results,
                    &mut actions,
                    &mut total_responds,
                    &responder,
                )
                .await;
            tokens_used += step_tokens;
            iterations += step_iterations;

            let status = if succeeded { TaskStatus::Completed } else { TaskStatus::Failed };
            let _ = store.update_task_status(&task_id, status, Some(&summary));
            step_results.push(StepResult {
                step_id: step.id.clone(),
                title: step.title.clone(),
                summary,
                status,
            });

            let remaining = plan
                .execution_order
                .iter()
                .skip_while(|id| *id != step_id)
                .skip(1)
                .count();
            if !succeeded && remaining > 0 {
                let (decision_tokens, abort) = self
                    .continue_or_abort(profile, step, step_results.last().map(|r| r.summary.as_str()).unwrap_or(""))
                    .await;
                tokens_used += decision_tokens;
                if abort {
                    if let Some(sink) = &responder {
                        sink(&format!(
                            "I hit a problem at \"{}\" and stopped the remaining steps.",
                            step.title
                        ));
                    }
                    // Remaining steps are cancelled.
                    for pending_id in plan
                        .execution_order
                        .iter()
                        .skip_while(|id| *id != step_id)
                        .skip(1)
                    {
                        if let Some((_, task_id)) =
                            step_task_ids.iter().find(|(id, _)| id == pending_id)
                        {
                            let _ = store.update_task_status(
                                task_id,
                                TaskStatus::Cancelled,
                                Some("cancelled after earlier step failed"),
                            );
                        }
                    }
                    aborted = true;
                    break;
                }
            }
        }

        // Synthesis.
        let (final_thought, synthesis_tokens) = self
            .synthesize(profile, assembled, &plan, &step_results, &mut actions, &mut total_responds, &responder)
            .await;
        tokens_used += synthesis_tokens;
        iterations += 1;

        let blocked = step_results.iter().any(|r| r.status == TaskStatus::Blocked);
        let root_status = if aborted {
            TaskStatus::Cancelled
        } else if blocked {
            TaskStatus::Blocked
        } else {
            TaskStatus::Completed
        };
        let _ = store.update_task_status(&root.id, root_status, Some(&final_thought));

        let memory_entry = MemoryEntry {
            id: String::new(),
            agent_id: profile.id.clone(),
            memory_type: MemoryType::PlanExecution,
            content: format!(
                "Plan \"{}\": {} — steps: {}",
                plan.goal,
                root_status.as_str(),
                step_results
                    .iter()
                    .map(|r| format!("{} ({})", r.title, r.status.as_str()))
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            summary: None,
            importance: 0.6,
            valence: 0.0,
            related_entity: Some(root.id.clone()),
            session_id: None,
            access_count: 0,
            expires_at: None,
            tags: vec!["plan".to_string()],
            score: 0.0,
            created_at: String::new(),
        };
        if let Err(e) = self.loop_.memory.store(memory_entry).await {
            warn!("plan memory write failed: {e}");
        }
        let _ = store.log_activity(
            &profile.id,
            ActivitySource::Agent,
            &format!("Plan: {}", plan.goal),
            root_status.as_str(),
            Some(&final_thought),
        );

        Ok(RunOutcome {
            actions,
            iterations,
            tokens_used,
            final_thought,
            silent: false,
            plan_id: Some(root.id),
        })
    }

    /// Human-input steps ask once via `requestHumanInput`, then block.
    #[allow(clippy::too_many_arguments)]
    async fn run_human_input_step(
        &self,
        profile: &AgenticProfile,
        ctx: &TriggerContext,
        step: &PlanStep,
        task_id: &str,
        actions: &mut Vec<ActionRecord>,
        total_responds: &mut u32,
        responder: &Option<ResponderSink>,
    ) -> String {
        let call = super::parser::ParsedCall {
            action: "requestHumanInput".to_string(),
            params: json!({"question": step.description, "taskId": task_id}),
            reasoning: Some(format!("step \"{}\" needs a human answer", step.title)),
            native_tool_call_id: None,
        };
        let available = vec!["requestHumanInput".to_string()];
        match self
            .loop_
            .handle_parsed_call(profile, ctx, &call, &available, actions, responder, total_responds)
            .await
        {
            CallOutcome::Handled { record, .. } => {
                let ok = record.status == ActionStatus::Executed;
                actions.push(record);
                if ok {
                    if let Some(sink) = responder {
                        sink(&format!("I need your input on: {}", step.description));
                    }
                    "human input".to_string()
                } else {
                    "human input (request failed)".to_string()
                }
            }
            _ => "human input (request failed)".to_string(),
        }
    }

    /// Mini reactive loop for one step.  Returns
    /// `(summary, tokens, iterations, succeeded)`.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        profile: &AgenticProfile,
        ctx: &TriggerContext,
        assembled: &AssembledContext,
        step: &PlanStep,
        previous: &[StepResult],
        actions: &mut Vec<ActionRecord>,
        total_responds: &mut u32,
        responder: &Option<ResponderSink>,
    ) -> (String, u64, u32, bool) {
        let mut prior = String::new();
        if !previous.is_empty() {
            prior = format!(
                "\nResults so far:\n{}",
                previous
                    .iter()
                    .map(|r| format!("- {}: {}", r.title, compact(&r.summary, 160)))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
        }
        let mut messages = vec![
            Message::system(assembled.system_prompt.clone()),
            Message::user(format!(
                "Current plan step: {}\n{}{prior}\nComplete this step with tool calls; finish \
                 it with `done` and a one-line summary as the reasoning.",
                step.title, step.description
            )),
        ];

        let available = self.loop_.registry.ids();
        let mut tokens = 0u64;
        let mut iterations = 0u32;
        let mut executed_any = false;

        while iterations < MAX_STEP_ITERATIONS {
            iterations += 1;
            let request = self.loop_.build_request(profile, &messages, &[]);
            let response = match self.loop_.ai_call(profile, request, "plan_step").await {
                Ok(r) => r,
                Err(e) => return (format!("step failed: {e}"), tokens, iterations, false),
            };
            tokens += response.total_tokens();

            let calls = parse_tool_calls(
                &response.content,
                &response.native_tool_calls,
                response.used_native_tools,
            );
            if calls.is_empty() {
                // Plain text completes the step.
                let text = response.content.trim().to_string();
                return (compact(&text, 300), tokens, iterations, !text.is_empty());
            }

            messages.push(Message::assistant(response.content.clone()));
            for call in calls {
                match self
                    .loop_
                    .handle_parsed_call(profile, ctx, &call, &available, actions, responder, total_responds)
                    .await
                {
                    CallOutcome::Done { reasoning } => {
                        return (
                            reasoning.unwrap_or_else(|| "step complete".to_string()),
                            tokens,
                            iterations,
                            true,
                        );
                    }
                    CallOutcome::Silent { .. } => {
                        return ("step complete".to_string(), tokens, iterations, true);
                    }
                    CallOutcome::Invalid { error } => {
                        messages.push(Message::user(error));
                    }
                    CallOutcome::Handled { record, feedback, .. } => {
                        executed_any |= record.status == ActionStatus::Executed;
                        actions.push(record);
                        messages.push(Message::user(feedback));
                    }
                }
            }
        }

        (
            "step ran out of iterations".to_string(),
            tokens,
            iterations,
            executed_any,
        )
    }

    /// One-shot continue/abort decision after a failed step.
    async fn continue_or_abort(
        &self,
        profile: &AgenticProfile,
        step: &PlanStep,
        failure_summary: &str,
    ) -> (u64, bool) {
        let request = AiRequest::new(
            "plan recovery decision",
            &profile.user_id,
            vec![Message::user(format!(
                "Plan step \"{}\" failed: {failure_summary}\nRemaining steps may still be \
                 useful. Reply with exactly one word: CONTINUE or ABORT.",
                step.title
            ))],
        )
        .with_force_tier(Tier::Simple.as_str());
        match self.loop_.ai_call(profile, request, "plan_decision").await {
            Ok(response) => {
                let abort = response.content.to_uppercase().contains("ABORT");
                (response.total_tokens(), abort)
            }
            // Indeterminate decision: keep going, the synthesis will explain.
            Err(_) => (0, false),
        }
    }

    /// Final synthesis: enumerate step results, ask for a respond + done pair.
    #[allow(clippy::too_many_arguments)]
    async fn synthesize(
        &self,
        profile: &AgenticProfile,
        assembled: &AssembledContext,
        plan: &Plan,
        results: &[StepResult],
        actions: &mut Vec<ActionRecord>,
        total_responds: &mut u32,
        responder: &Option<ResponderSink>,
    ) -> (String, u64) {
        let listing = results
            .iter()
            .map(|r| format!("- {} [{}]: {}", r.title, r.status.as_str(), compact(&r.summary, 200)))
            .collect::<Vec<_>>()
            .join("\n");
        let request = AiRequest::new(
            "plan synthesis",
            &profile.user_id,
            vec![
                Message::system(assembled.system_prompt.clone()),
                Message::user(format!(
                    "The plan \"{}\" finished. Step results:\n{listing}\n\nSend the user one \
                     clear summary with `respond`, then `done`.",
                    plan.goal
                )),
            ],
        );
        let response = match self.loop_.ai_call(profile, request, "plan_synthesis").await {
            Ok(r) => r,
            Err(e) => {
                let fallback = format!("Plan finished with {} step(s).", results.len());
                warn!("synthesis call failed: {e}");
                return (fallback, 0);
            }
        };
        let tokens = response.total_tokens();

        let calls = parse_tool_calls(
            &response.content,
            &response.native_tool_calls,
            response.used_native_tools,
        );
        let mut final_thought = String::new();
        for call in &calls {
            if call.action == "respond" {
                if let Some(message) = call.params.get("message").and_then(|m| m.as_str()) {
                    if is_error_shaped(message) || is_placeholder_shaped(message) {
                        continue;
                    }
                    if let Some(sink) = responder {
                        sink(message);
                        *total_responds += 1;
                    }
                    let mut record = ActionRecord::new(
                        "respond",
                        call.params.clone(),
                        ActionStatus::Executed,
                    );
                    record.sent_immediately = responder.is_some();
                    actions.push(record);
                    final_thought = message.to_string();
                }
            } else if call.action == "done" {
                if final_thought.is_empty() {
                    final_thought = call.reasoning.clone().unwrap_or_default();
                }
            }
        }
        if final_thought.is_empty() {
            let text = response.content.trim();
            final_thought = if text.is_empty() || is_error_shaped(text) {
                format!("Plan \"{}\" finished.", plan.goal)
            } else {
                compact(text, 400)
            };
        }
        (final_thought, tokens)
    }
}

fn compact(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::agent::loop_::test_support::ScriptedRouter;
    use crate::agent::loop_::{AgentReasoningLoop, EnvironmentProbe};
    use crate::agent::types::Trigger;
    use crate::ai::types::AiResponse;
    use crate::channels::ChannelManager;
    use crate::channels::manager::test_support::RecordingChannel;
    use crate::config::{BudgetConfig, LoopConfig};
    use crate::memory::SqliteMemoryStore;
    use crate::services::{
        ApprovalService, CostTracker, MasterNotificationService, ReflectionService,
    };
    use crate::store::Store;
    use crate::store::agents::{AgenticProfile, Autonomy};
    use crate::tools::ToolRegistry;
    use crate::tools::registry::test_support::StubTool;
    use async_trait::async_trait;
    use serde_json::json;

    struct EmailProbe;

    #[async_trait]
    impl EnvironmentProbe for EmailProbe {
        async fn monitored_platforms(&self, _agent_id: &str) -> Vec<String> {
            vec!["email".to_string()]
        }
    }

    struct Fixture {
        store: Store,
        loop_: AgentReasoningLoop,
        profile: AgenticProfile,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Fixture {
        fn new(responses: Vec<AiResponse>) -> Self {
            let store = Store::in_memory().unwrap();
            let memory = Arc::new(SqliteMemoryStore::in_memory().unwrap());

            let mut registry = ToolRegistry::new();
            registry.register(Arc::new(StubTool::ok("respond", json!({"message": "ok"}))));
            registry.register(Arc::new(StubTool::ok("searchWeb", json!("results for step"))));
            registry.register(Arc::new(StubTool::ok("generatePlan", json!({"noted": true}))));
            registry.register(Arc::new(StubTool::ok(
                "requestHumanInput",
                json!({"requested": true}),
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
            let cost = CostTracker::new(store.clone(), notifier, None, BudgetConfig::default());

            let mut profile = AgenticProfile::new("u1", "Atlas");
            profile.autonomy = Autonomy::SemiAutonomous;
            profile.master_contact_id = Some("c-master".to_string());
            store.insert_agent(&profile).unwrap();

            let loop_ = AgentReasoningLoop::new(
                store.clone(),
                memory,
                ScriptedRouter::new(responses),
                registry,
                approvals,
                reflection,
                cost,
                LoopConfig::default(),
            )
            .with_probe(Arc::new(EmailProbe));

            Self {
                store,
                loop_,
                profile,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn responder(&self) -> ResponderSink {
            let sent = Arc::clone(&self.sent);
            Arc::new(move |message: &str| {
                if let Ok(mut sink) = sent.lock() {
                    sink.push(message.to_string());
                }
            })
        }
    }

    fn plan_call() -> AiResponse {
        AiResponse::text(
            r#"```tool
{"action": "generatePlan", "params": {
  "goal": "compare suppliers and report",
  "steps": [
    {"id": "s1", "title": "Research supplier X", "description": "look up X", "can_parallelize": true},
    {"id": "s2", "title": "Research supplier Y", "description": "look up Y", "can_parallelize": true},
    {"id": "s3", "title": "Compare and summarize", "description": "compare X and Y", "depends_on": ["s1", "s2"]}
  ],
  "synthesis_step": {"description": "summarize findings"}
}}
```"#,
        )
    }

    fn step_done(summary: &str) -> AiResponse {
        AiResponse::text(format!(
            "```tool\n{{\"action\":\"done\",\"reasoning\":\"{summary}\"}}\n```"
        ))
    }

    fn synthesis_response() -> AiResponse {
        AiResponse::text(
            r#"```tool
{"action": "respond", "params": {"message": "Supplier X is cheaper; summary sent."}}
```
```tool
{"action": "done", "reasoning": "plan complete"}
```"#,
        )
    }

    // The multi-step request used throughout; moderate+ with plan signals.
    const REQUEST: &str =
        "Research supplier X and also supplier Y, then compare prices and email me a summary";

    #[tokio::test]
    async fn plan_driven_multi_step_executes_and_synthesizes() {
        let fixture = Fixture::new(vec![
            // Auto-decomposition path answers with the plan JSON directly.
            AiResponse::text(
                r#"{"goal": "compare suppliers and report", "steps": [
                    {"id": "s1", "title": "Research supplier X", "can_parallelize": true},
                    {"id": "s2", "title": "Research supplier Y", "can_parallelize": true},
                    {"id": "s3", "title": "Compare and summarize", "depends_on": ["s1", "s2"]}
                ], "synthesis_step": {"description": "summarize"}}"#,
            ),
            step_done("X looked up"),
            step_done("Y looked up"),
            step_done("compared"),
            synthesis_response(),
        ]);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                TriggerContext {
                    sender: Some("Boss".to_string()),
                    sender_is_master: true,
                    preview: Some(REQUEST.to_string()),
                    ..Default::default()
                },
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        let plan_id = outcome.plan_id.expect("plan executed");
        let root = fixture.store.get_task(&plan_id).unwrap();
        assert_eq!(root.status, TaskStatus::Completed);
        assert_eq!(root.task_type, "plan_root");

        let steps = fixture.store.list_plan_steps(&plan_id).unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.status == TaskStatus::Completed));

        // Acknowledgment plus synthesis respond both delivered.
        let sent = fixture.sent.lock().unwrap();
        assert!(sent.len() >= 2, "ack + summary, got {sent:?}");
        assert!(sent.last().unwrap().contains("Supplier X is cheaper"));
        assert_eq!(outcome.final_thought, "Supplier X is cheaper; summary sent.");
    }

    #[tokio::test]
    async fn declined_plan_falls_back_to_reactive() {
        // Neither route produces a plan; reactive loop finishes with done.
        let fixture = Fixture::new(vec![
            AiResponse::text("no plan JSON here"), // auto-decomposition declined
            AiResponse::text("A single pass is enough."), // plan-mode declined
            AiResponse::text("```tool\n{\"action\":\"done\",\"reasoning\":\"handled reactively\"}\n```"),
        ]);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                TriggerContext {
                    sender_is_master: true,
                    preview: Some(REQUEST.to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert!(outcome.plan_id.is_none());
        assert_eq!(outcome.final_thought, "handled reactively");
    }

    #[tokio::test]
    async fn plan_mode_call_produces_plan() {
        // Auto-decomposition declines, then the AI calls generatePlan.
        let fixture = Fixture::new(vec![
            AiResponse::text("not decomposable after all"),
            plan_call(),
            step_done("X done"),
            step_done("Y done"),
            step_done("compared"),
            synthesis_response(),
        ]);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                TriggerContext {
                    sender_is_master: true,
                    preview: Some(REQUEST.to_string()),
                    ..Default::default()
                },
                Some(fixture.responder()),
            )
            .await
            .unwrap();
        assert!(outcome.plan_id.is_some());
    }

    #[tokio::test]
    async fn failed_step_with_abort_cancels_remaining() {
        let fixture = Fixture::new(vec![
            AiResponse::text(
                r#"{"goal": "g", "steps": [
                    {"id": "s1", "title": "First"},
                    {"id": "s2", "title": "Second", "depends_on": ["s1"]}
                ], "synthesis_step": {"description": "d"}}"#,
            ),
            // Step 1 burns its three iterations with unusable output.
            AiResponse::text("```tool\n{\"action\":\"launchRocketship\",\"params\":{}}\n```"),
            AiResponse::text("```tool\n{\"action\":\"launchRocketship\",\"params\":{}}\n```"),
            AiResponse::text("```tool\n{\"action\":\"launchRocketship\",\"params\":{}}\n```"),
            AiResponse::text("ABORT"),
            synthesis_response(),
        ]);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                TriggerContext {
                    sender_is_master: true,
                    preview: Some(REQUEST.to_string()),
                    ..Default::default()
                },
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        let plan_id = outcome.plan_id.unwrap();
        let steps = fixture.store.list_plan_steps(&plan_id).unwrap();
        let second = steps.iter().find(|s| s.title == "Second").unwrap();
        assert_eq!(second.status, TaskStatus::Cancelled);
        assert_eq!(
            fixture.store.get_task(&plan_id).unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn human_input_step_blocks_plan() {
        let fixture = Fixture::new(vec![
            AiResponse::text(
                r#"{"goal": "g", "steps": [
                    {"id": "s1", "title": "Gather data"},
                    {"id": "s2", "title": "Ask which format", "step_type": "human_input", "depends_on": ["s1"]}
                ], "synthesis_step": {"description": "d"}}"#,
            ),
            step_done("gathered"),
            synthesis_response(),
        ]);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                TriggerContext {
                    sender_is_master: true,
                    preview: Some(REQUEST.to_string()),
                    ..Default::default()
                },
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        let plan_id = outcome.plan_id.unwrap();
        let steps = fixture.store.list_plan_steps(&plan_id).unwrap();
        let blocked = steps.iter().find(|s| s.title == "Ask which format").unwrap();
        assert_eq!(blocked.status, TaskStatus::Blocked);
        assert_eq!(
            fixture.store.get_task(&plan_id).unwrap().status,
            TaskStatus::Blocked,
            "root reflects the blocked step"
        );
        assert!(
            fixture
                .sent
                .lock()
                .unwrap()
                .iter()
                .any(|m| m.contains("I need your input")),
            "the human was asked"
        );
    }
}
