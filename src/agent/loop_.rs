//! The agent reasoning loop.
//!
//! # Algorithm
//!
//! ```text
//! trigger ──► lock (per agent:trigger) ──► rate limit ──► profile + checkpoint
//!       │
//!       ▼
//! classify ──► budgets ──► assemble context ──► select tools
//!       │
//!       ├─► fast-path greeting?  single AI call ──► respond ──► return
//!       ├─► decomposable?        plan executor  ──► synthesize ──► return
//!       ▼
//! reactive loop:
//!   AI call ──► parse ──► validate ──► approval gate
//!     queued  → approval row + feedback, continue
//!     execute → recovery wrapper → feedback (≤800 chars) → micro-XP
//!   checkpoint each iteration; hard timeout via outer race
//!       │
//!       ▼
//! done/silent/budget ──► synthesis net ──► reflection (fire-and-forget)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use super::approval::ApprovalGate;
use super::checkpoint;
use super::classifier::{TaskClassifier, Tier};
use super::context::{
    AssembledContext, ContextAssembler, ContextInputs, LocalAgentDescriptor,
    MobileAgentDescriptor,
};
use super::control::{ControlRegisters, INTERRUPTED_THOUGHT};
use super::parser::{ParsedCall, is_meta_talk, parse_tool_calls};
use super::plan::PlanDrivenLoop;
use super::rate_limit::RateLimiter;
use super::recovery::execute_with_recovery;
use super::screens::{PLACEHOLDER_CORRECTION, is_error_shaped, is_placeholder_shaped};
use super::summarize::{MAX_SUMMARY_CHARS, summarize_tool_result};
use super::types::{ActionRecord, ActionStatus, ResponderSink, Trigger, TriggerContext};
use super::validator::{ToolCallValidator, Validation};
use crate::ai::router::AiRouter;
use crate::ai::types::{AiRequest, AiResponse, Message, MessageRole, NativeToolSpec, RequestOptions};
use crate::config::LoopConfig;
use crate::event_bus::{AppEvent, EventBus};
use crate::memory::Memory;
use crate::services::approval::ApprovalService;
use crate::services::cost::{CostTracker, UsageEvent};
use crate::services::reflection::{ReflectionInput, ReflectionService};
use crate::store::Store;
use crate::store::activity::ActivitySource;
use crate::store::agents::AgenticProfile;
use crate::tools::{SelectorInput, ToolContext, ToolRegistry, ToolSelector};

/// Pause register poll interval.
const PAUSE_POLL_MS: u64 = 500;

/// Head/tail conversation split: first kept, last kept, middle tool results kept.
const TRUNCATE_KEEP_HEAD: usize = 3;
const TRUNCATE_KEEP_TAIL: usize = 5;
const TRUNCATE_KEEP_TOOL_RESULTS: usize = 4;
const TOOL_RESULT_RESUMMARY_CHARS: usize = 300;

/// Checkpoint reminder cadence (tool executions).
const REMINDER_EVERY_TOOLS: usize = 3;

// ─── EnvironmentProbe ─────────────────────────────────────────────────────────

/// Runtime facts the loop cannot derive from the store: connected platforms,
/// the device fleet, CLI provider auth, knowledge libraries, RAG snippets.
/// The concrete providers live outside this crate.
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    async fn monitored_platforms(&self, _agent_id: &str) -> Vec<String> {
        Vec::new()
    }
    async fn connected_platforms(&self, _agent_id: &str) -> Vec<String> {
        Vec::new()
    }
    async fn local_agents(&self, _user_id: &str) -> Vec<LocalAgentDescriptor> {
        Vec::new()
    }
    async fn mobile_agents(&self, _user_id: &str) -> Vec<MobileAgentDescriptor> {
        Vec::new()
    }
    async fn knowledge_libraries(&self, _user_id: &str) -> Vec<(String, String)> {
        Vec::new()
    }
    /// RAG snippets for mid-loop enrichment; best-effort.
    async fn rag_snippets(&self, _user_id: &str, _keywords: &[String]) -> Vec<String> {
        Vec::new()
    }
    async fn authenticated_cli_providers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Probe that reports an empty environment.
pub struct NullProbe;

#[async_trait]
impl EnvironmentProbe for NullProbe {}

// ─── RunOutcome ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub actions: Vec<ActionRecord>,
    pub iterations: u32,
    pub tokens_used: u64,
    pub final_thought: String,
    pub silent: bool,
    pub plan_id: Option<String>,
}

impl RunOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            final_thought: reason.to_string(),
            ..Default::default()
        }
    }
}

/// How one parsed call was handled — shared between the reactive loop and the
/// plan executor's mini loops.
pub(crate) enum CallOutcome {
    Done { reasoning: Option<String> },
    Silent { reasoning: Option<String> },
    Invalid { error: String },
    Handled { record: ActionRecord, feedback: String, responded: bool },
}

// ─── AgentReasoningLoop ───────────────────────────────────────────────────────

pub struct AgentReasoningLoop {
    pub(crate) store: Store,
    pub(crate) memory: Arc<dyn Memory>,
    pub(crate) ai: Arc<dyn AiRouter>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) approvals: Arc<ApprovalService>,
    pub(crate) reflection: Arc<ReflectionService>,
    pub(crate) cost: Arc<CostTracker>,
    pub(crate) config: LoopConfig,
    control: Arc<ControlRegisters>,
    rate_limiter: Arc<RateLimiter>,
    probe: Arc<dyn EnvironmentProbe>,
    bus: Option<Arc<dyn EventBus>>,
}

impl AgentReasoningLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        memory: Arc<dyn Memory>,
        ai: Arc<dyn AiRouter>,
        registry: Arc<ToolRegistry>,
        approvals: Arc<ApprovalService>,
        reflection: Arc<ReflectionService>,
        cost: Arc<CostTracker>,
        config: LoopConfig,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.max_cycles_per_hour));
        Self {
            store,
            memory,
            ai,
            registry,
            approvals,
            reflection,
            cost,
            config,
            control: Arc::new(ControlRegisters::new(None)),
            rate_limiter,
            probe: Arc::new(NullProbe),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.control = Arc::new(ControlRegisters::new(Some(Arc::clone(&bus))));
        self.bus = Some(bus);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Shared pause/interrupt registers (for the control surface).
    pub fn control(&self) -> Arc<ControlRegisters> {
        Arc::clone(&self.control)
    }

    pub fn rate_limit_status(&self, agent_id: &str) -> super::rate_limit::RateLimitStatus {
        self.rate_limiter.status(agent_id)
    }

    fn emit(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }

    // ── Entry path ────────────────────────────────────────────────────────────

    #[tracing::instrument(
        name = "agent.run",
        skip_all,
        fields(agent = %agent_id, trigger = trigger.as_str())
    )]
    pub async fn run(
        &self,
        agent_id: &str,
        trigger: Trigger,
        ctx: TriggerContext,
        responder: Option<ResponderSink>,
    ) -> Result<RunOutcome, String> {
        let lock_key = format!("{agent_id}:{}", trigger.as_str());

        if self.control.is_locked(&lock_key) {
            if trigger == Trigger::IncomingMessage {
                // New messages are worth a short wait for the running turn.
                let deadline =
                    Instant::now() + Duration::from_secs(self.config.lock_wait_secs);
                while self.control.is_locked(&lock_key) && Instant::now() < deadline {
                    sleep(Duration::from_secs(self.config.lock_poll_secs)).await;
                }
                if self.control.is_locked(&lock_key) {
                    return Ok(RunOutcome::skipped(
                        "Busy: still handling the previous message",
                    ));
                }
            } else {
                return Ok(RunOutcome::skipped("Skipped: concurrent run"));
            }
        }

        if !self.rate_limiter.try_acquire(agent_id) {
            return Ok(RunOutcome::skipped("Skipped: rate limit"));
        }

        if !self.control.try_lock(&lock_key) {
            return Ok(RunOutcome::skipped("Skipped: concurrent run"));
        }

        let hard_timeout = Duration::from_millis(self.config.timeout_ms);
        let result = timeout(
            hard_timeout,
            self.run_inner(agent_id, trigger, ctx, responder.clone()),
        )
        .await;
        self.control.unlock(&lock_key);

        match result {
            Ok(Ok(outcome)) => {
                self.complete_run(agent_id, trigger, &outcome);
                Ok(outcome)
            }
            Ok(Err(error)) => {
                self.fail_run(agent_id, &error);
                Err(error)
            }
            Err(_elapsed) => {
                let error =
                    format!("Reasoning run timed out after {} ms", self.config.timeout_ms);
                self.fail_run(agent_id, &error);
                // The apology goes out exactly once, from here.
                if let Some(sink) = &responder {
                    sink("I'm sorry — that took longer than expected and I had to stop. Please try again.");
                }
                Err(error)
            }
        }
    }

    fn complete_run(&self, agent_id: &str, trigger: Trigger, outcome: &RunOutcome) {
        if let Err(e) = self.store.complete_checkpoint(agent_id) {
            warn!("checkpoint completion failed for {agent_id}: {e}");
        }
        if trigger == Trigger::IncomingMessage {
            let _ = self.store.increment_interaction_count(agent_id);
        }
        let _ = self.store.log_activity(
            agent_id,
            ActivitySource::Agent,
            &format!("Reasoning cycle ({})", trigger.as_str()),
            "success",
            Some(&format!(
                "{} actions, {} iterations",
                outcome.actions.len(),
                outcome.iterations
            )),
        );
        self.emit(AppEvent::ReasoningComplete {
            agent_id: agent_id.to_string(),
            iterations: outcome.iterations,
            actions: outcome.actions.len(),
            tokens_used: outcome.tokens_used,
        });

        // Fire-and-forget reflection for non-trivial cycles.
        if outcome.actions.len() >= 2 {
            let reflection = Arc::clone(&self.reflection);
            let input = ReflectionInput {
                agent_id: agent_id.to_string(),
                user_id: String::new(),
                trigger: trigger.as_str().to_string(),
                iterations: outcome.iterations,
                actions: outcome.actions.clone(),
                recovery_applied: false,
            };
            tokio::spawn(async move { reflection.reflect(input).await });
        }
    }

    fn fail_run(&self, agent_id: &str, error: &str) {
        if let Err(e) = self.store.fail_checkpoint(agent_id) {
            warn!("checkpoint failure marker failed for {agent_id}: {e}");
        }
        self.emit(AppEvent::AgenticError {
            agent_id: agent_id.to_string(),
            message: error.to_string(),
        });
        let _ = self.store.log_activity(
            agent_id,
            ActivitySource::Agent,
            "Reasoning cycle",
            "error",
            Some(error),
        );
    }

    // ── Inner run ─────────────────────────────────────────────────────────────

    async fn run_inner(
        &self,
        agent_id: &str,
        trigger: Trigger,
        mut ctx: TriggerContext,
        responder: Option<ResponderSink>,
    ) -> Result<RunOutcome, String> {
        let profile = self
            .store
            .get_agent(agent_id)
            .map_err(|e| format!("agent not found: {e}"))?;

        // Budget integrity limit.  The exceeded notification itself is sent by
        // the cost tracker at the moment of crossing, not here.
        if profile.daily_budget_usd > 0.0
            && profile.daily_budget_used >= profile.daily_budget_usd
        {
            return Ok(RunOutcome::skipped("Skipped: daily budget exceeded"));
        }

        let restored = checkpoint::apply_entry_policy(&self.store, agent_id, trigger);

        // Approval resume: pre-execute the approved tool once, outside the
        // loop, so no AI tokens are spent re-invoking it.
        let mut pre_actions: Vec<ActionRecord> = Vec::new();
        if trigger == Trigger::ApprovalResume {
            if let Some(record) = self.pre_execute_approved(&profile, &mut ctx).await {
                pre_actions.push(record);
            }
        }

        let text = ctx
            .preview
            .clone()
            .or_else(|| ctx.custom_prompt.clone())
            .unwrap_or_default();
        let classification = TaskClassifier::classify(&text);
        let raw_tier = classification.tier;
        let (tier, upgrade_reason) =
            TaskClassifier::adjust_for_trigger(&classification, trigger, &text);
        if let Some(reason) = &upgrade_reason {
            debug!("tier upgraded to {}: {reason}", tier.as_str());
        }
        let (max_iterations, max_tool_calls) =
            TaskClassifier::iteration_budget(tier, &self.config);

        self.emit(AppEvent::ReasoningStart {
            agent_id: agent_id.to_string(),
            trigger: trigger.as_str().to_string(),
            tier: tier.as_str().to_string(),
        });

        // Context assembly.
        let inputs = self.gather_inputs(&profile, &ctx, tier).await;
        let available: Vec<String> = inputs.tools.iter().map(|t| t.id.clone()).collect();
        let native_specs: Vec<NativeToolSpec> =
            inputs.tools.iter().map(|t| t.to_native_spec()).collect();
        let assembled = ContextAssembler::build(&profile, trigger, &ctx, &inputs);

        // Fast-path greeting bypass.
        if raw_tier == Tier::Trivial
            && trigger == Trigger::IncomingMessage
            && !ctx.sub_agent_override
        {
            let preview = strip_enrichment(text.as_str());
            if TaskClassifier::is_greeting(preview) {
                if let Some(outcome) = self
                    .fast_path_greeting(&profile, &ctx, preview, responder.clone())
                    .await
                {
                    return Ok(outcome);
                }
            }
        }

        // Plan-driven paths for substantial incoming messages.
        if !ctx.sub_agent_override
            && trigger == Trigger::IncomingMessage
            && tier >= Tier::Moderate
        {
            let planner = PlanDrivenLoop::new(self);
            if let Some(outcome) = planner
                .try_plan(
                    &profile,
                    &ctx,
                    &assembled,
                    &classification,
                    tier,
                    &text,
                    &available,
                    responder.clone(),
                )
                .await?
            {
                return Ok(outcome);
            }
        }

        self.reactive_loop(ReactiveArgs {
            profile: &profile,
            trigger,
            ctx: &ctx,
            assembled,
            available,
            native_specs,
            tier,
            max_iterations,
            max_tool_calls,
            start_iteration: restored.iteration,
            start_tokens: restored.tokens_used,
            mut_actions: {
                let mut actions = restored.actions;
                actions.extend(pre_actions);
                actions
            },
            responder,
        })
        .await
    }

    async fn pre_execute_approved(
        &self,
        profile: &AgenticProfile,
        ctx: &mut TriggerContext,
    ) -> Option<ActionRecord> {
        let payload = ctx.approved_payload.clone()?;
        let tool = payload.get("tool")?.as_str()?.to_string();
        let params = payload.get("params").cloned().unwrap_or(json!({}));

        let tool_ctx = self.tool_context(profile, ctx);
        let result = execute_with_recovery(&self.registry, &tool, params.clone(), &tool_ctx).await;
        let status = if result.outcome.success {
            ActionStatus::Executed
        } else {
            ActionStatus::Failed
        };
        let summary = match &result.outcome.result {
            Some(value) => summarize_tool_result(&tool, value, MAX_SUMMARY_CHARS),
            None => result.outcome.error.clone().unwrap_or_default(),
        };
        ctx.approval_tool_result = Some(json!({
            "tool": tool,
            "success": result.outcome.success,
            "result": summary,
        }));

        let _ = self.store.log_tool_execution(
            &profile.id,
            &tool,
            &params,
            status.as_str(),
            Some(&summary),
        );
        let mut record = ActionRecord::new(tool, params, status);
        record.result_summary = Some(summary);
        Some(record)
    }

    async fn gather_inputs(
        &self,
        profile: &AgenticProfile,
        ctx: &TriggerContext,
        tier: Tier,
    ) -> ContextInputs {
        let skills = self.store.list_skills(&profile.id).unwrap_or_default();
        let active_tasks = self.store.list_agent_tasks(&profile.id, false).unwrap_or_default();
        let schedules = self.store.list_agent_schedules(&profile.id).unwrap_or_default();
        let team_size = self.store.count_team_members(&profile.user_id).unwrap_or(0);

        let memories = match ContextAssembler::memory_query(ctx) {
            Some(query) => self
                .memory
                .recall(&profile.id, &query, 5)
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let monitored = self.probe.monitored_platforms(&profile.id).await;
        let connected = self.probe.connected_platforms(&profile.id).await;
        let local_agents = self.probe.local_agents(&profile.user_id).await;
        let mobile_agents = self.probe.mobile_agents(&profile.user_id).await;
        let knowledge_libraries = self.probe.knowledge_libraries(&profile.user_id).await;
        let cli_providers = self.probe.authenticated_cli_providers().await;

        let selector_input = SelectorInput {
            tier,
            autonomy: profile.autonomy,
            orchestration_depth: ctx.orchestration_depth,
            can_create_children: profile.can_create_children,
            monitored_platforms: monitored.clone(),
            connected_platforms: connected,
            local_devices_online: local_agents.iter().filter(|d| d.online).count(),
            mobile_devices_paired: mobile_agents.len(),
            authenticated_cli_providers: cli_providers,
            skill_levels: skills.iter().map(|s| (s.category, s.current_level)).collect(),
        };
        let tool_ids = ToolSelector::select(&selector_input);
        let tools = self.registry.list_by_ids(&tool_ids);

        ContextInputs {
            goals: Vec::new(),
            skills,
            team_size,
            active_tasks,
            completed_tasks: Vec::new(),
            schedules,
            monitoring_sources: monitored,
            knowledge_libraries,
            memories,
            tools,
            local_agents,
            mobile_agents,
            tier,
        }
    }

    // ── Fast path ─────────────────────────────────────────────────────────────

    async fn fast_path_greeting(
        &self,
        profile: &AgenticProfile,
        ctx: &TriggerContext,
        preview: &str,
        responder: Option<ResponderSink>,
    ) -> Option<RunOutcome> {
        let personality = if profile.system_prompt.trim().is_empty() {
            format!("You are {}.", profile.name)
        } else {
            profile.system_prompt.clone()
        };
        let system = format!(
            "{personality}\nReply warmly and briefly to the greeting. Either emit a `respond` \
             tool call with your message, or just write the message."
        );
        let sender = ctx.sender.as_deref().unwrap_or("someone");
        let request = AiRequest::new(
            "greeting",
            &profile.user_id,
            vec![
                Message::system(system),
                Message::user(format!("{sender} says: {preview}")),
            ],
        )
        .with_force_tier(Tier::Simple.as_str());

        let response = match self.ai_call(profile, request, "greeting").await {
            Ok(r) => r,
            Err(e) => {
                debug!("fast-path greeting failed, falling through: {e}");
                return None;
            }
        };

        let calls = parse_tool_calls(
            &response.content,
            &response.native_tool_calls,
            response.used_native_tools,
        );
        let message = calls
            .iter()
            .find(|c| c.action == "respond")
            .and_then(|c| c.params.get("message").and_then(|m| m.as_str()))
            .map(str::to_string)
            .or_else(|| {
                let text = response.content.trim();
                (!text.is_empty() && !is_error_shaped(text)).then(|| text.to_string())
            })?;

        if is_error_shaped(&message) || is_placeholder_shaped(&message) {
            return None;
        }
        if let Some(sink) = &responder {
            sink(&message);
        }
        let mut record = ActionRecord::new(
            "respond",
            json!({"message": message}),
            ActionStatus::Executed,
        );
        record.sent_immediately = true;
        let _ = self.store.log_tool_execution(
            &profile.id,
            "respond",
            &record.params,
            record.status.as_str(),
            Some("fast-path greeting"),
        );
        Some(RunOutcome {
            actions: vec![record],
            iterations: 1,
            tokens_used: response.total_tokens(),
            final_thought: message,
            silent: false,
            plan_id: None,
        })
    }

    // ── Reactive loop ─────────────────────────────────────────────────────────

    async fn reactive_loop(&self, args: ReactiveArgs<'_>) -> Result<RunOutcome, String> {
        let ReactiveArgs {
            profile,
            trigger,
            ctx,
            assembled,
            available,
            native_specs,
            tier,
            max_iterations,
            max_tool_calls,
            start_iteration,
            start_tokens,
            mut_actions: mut actions,
            responder,
        } = args;

        let mut messages = vec![
            Message::system(assembled.system_prompt.clone()),
            Message::user(assembled.user_message.clone()),
        ];
        let mut iteration = start_iteration;
        let mut tokens_used = start_tokens;
        let mut tool_call_count = actions.len() as u32;
        let mut final_thought = String::new();
        let mut silent = false;
        let mut total_responds = 0u32;
        let mut previous_iteration_respond_only = false;

        'outer: while iteration < max_iterations {
            iteration += 1;

            // Pause is a busy-wait; interrupt exits at the boundary.
            while self.control.is_paused(&profile.id) {
                sleep(Duration::from_millis(PAUSE_POLL_MS)).await;
            }
            if self.control.take_interrupt(&profile.id) {
                final_thought = INTERRUPTED_THOUGHT.to_string();
                break;
            }

            self.emit(AppEvent::ReasoningStep {
                agent_id: profile.id.clone(),
                iteration,
            });
            checkpoint::save_iteration(
                &self.store,
                &profile.id,
                &profile.user_id,
                trigger,
                ctx,
                iteration,
                tokens_used,
                &actions,
                tier,
            );

            // RAG enrichment from the second iteration on; never fatal.
            if iteration >= 2 {
                let keywords = extract_keywords(&messages, 8);
                if !keywords.is_empty() {
                    let snippets = self.probe.rag_snippets(&profile.user_id, &keywords).await;
                    if !snippets.is_empty() {
                        let insert_at = messages.len().saturating_sub(1);
                        messages.insert(
                            insert_at,
                            Message::system(format!(
                                "Possibly relevant knowledge:\n{}",
                                snippets.join("\n---\n")
                            )),
                        );
                    }
                }
            }

            truncate_conversation(&mut messages);

            let mut request = self.build_request(profile, &messages, &native_specs);
            if request.force_provider.is_none() {
                // Routing floor: trivial work still rides the `simple` tier.
                request = request.with_force_tier(tier.floor_simple().as_str());
            }
            let response = match self.ai_call(profile, request, "reasoning").await {
                Ok(r) => r,
                Err(e) => {
                    if e.starts_with("All providers failed")
                        && iteration == 1
                        && trigger == Trigger::IncomingMessage
                    {
                        if let Some(sink) = &responder {
                            sink("I'm experiencing technical difficulties right now. Please try again in a moment.");
                        }
                        final_thought =
                            "Provider failure on first iteration; user informed".to_string();
                        break;
                    }
                    warn!("AI call failed on iteration {iteration}: {e}");
                    messages.push(Message::user(format!(
                        "The previous AI request failed ({e}). Continue with the task."
                    )));
                    continue;
                }
            };
            tokens_used += response.total_tokens();

            let calls = parse_tool_calls(
                &response.content,
                &response.native_tool_calls,
                response.used_native_tools,
            );

            if calls.is_empty() {
                let content = response.content.trim().to_string();
                if content.contains("<<SILENT>>") {
                    silent = true;
                    break;
                }
                if response.finish_reason.as_deref() == Some("stop")
                    && !native_specs.is_empty()
                    && response.used_native_tools
                {
                    final_thought = content;
                    break;
                }
                if is_meta_talk(&content) && iteration <= 2 {
                    messages.push(Message::assistant(content));
                    messages.push(Message::user(
                        "You described a tool call instead of making one. Emit the JSON tool \
                         call itself, nothing else."
                            .to_string(),
                    ));
                    continue;
                }
                if is_error_shaped(&content) {
                    debug!("discarding error-shaped final text");
                    break;
                }
                final_thought = content;
                break;
            }

            messages.push(Message::assistant(response.content.clone()));

            let mut iteration_respond_only = calls.len() == 1
                && calls
                    .first()
                    .is_some_and(|c| c.action == "respond" || c.action == "respondToUser");
            let mut terminate_after_iteration = false;

            for call in calls {
                // `done`/`silent` are terminals, not tool executions; they are
                // honoured even with the tool budget spent.
                let is_terminal = call.action == "done" || call.action == "silent";
                if !is_terminal && tool_call_count >= max_tool_calls {
                    debug!("tool-call budget exhausted at {tool_call_count}");
                    break 'outer;
                }

                let handled = self
                    .handle_parsed_call(profile, ctx, &call, &available, &actions, &responder, &mut total_responds)
                    .await;
                match handled {
                    CallOutcome::Done { reasoning } => {
                        final_thought = reasoning.unwrap_or_default();
                        break 'outer;
                    }
                    CallOutcome::Silent { reasoning } => {
                        final_thought = reasoning.unwrap_or_default();
                        silent = true;
                        break 'outer;
                    }
                    CallOutcome::Invalid { error } => {
                        messages.push(Message::user(error));
                        iteration_respond_only = false;
                        break; // retry on the next outer iteration
                    }
                    CallOutcome::Handled { record, feedback, responded } => {
                        tool_call_count += 1;
                        if record.tool != "respond" {
                            iteration_respond_only = false;
                        }
                        if responded && total_responds >= self.config.max_responds_per_run {
                            terminate_after_iteration = true;
                        }
                        actions.push(record);
                        messages.push(Message::user(feedback));

                        let executed = actions
                            .iter()
                            .filter(|a| a.status == ActionStatus::Executed)
                            .count();
                        if executed > 0 && executed % REMINDER_EVERY_TOOLS == 0 {
                            messages.push(Message::user(checkpoint_reminder(
                                &assembled.user_message,
                                &actions,
                            )));
                        }
                    }
                }
            }

            if terminate_after_iteration {
                debug!("respond cap reached; terminating run");
                break;
            }
            if iteration_respond_only && previous_iteration_respond_only {
                debug!("consecutive respond-only iterations; terminating run");
                break;
            }
            previous_iteration_respond_only = iteration_respond_only;
        }

        // Synthesis safety net.
        if final_thought.is_empty() && !silent {
            let executed: Vec<&str> = actions
                .iter()
                .filter(|a| a.status == ActionStatus::Executed && a.tool != "respond")
                .map(|a| a.tool.as_str())
                .collect();
            if !executed.is_empty() {
                final_thought = format!(
                    "Completed {} action(s): {}",
                    executed.len(),
                    executed.join(", ")
                );
            }
        }

        Ok(RunOutcome {
            actions,
            iterations: iteration,
            tokens_used,
            final_thought,
            silent,
            plan_id: None,
        })
    }

    // ── Shared per-call handling ──────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn handle_parsed_call(
        &self,
        profile: &AgenticProfile,
        ctx: &TriggerContext,
        call: &ParsedCall,
        available: &[String],
        actions_so_far: &[ActionRecord],
        responder: &Option<ResponderSink>,
        total_responds: &mut u32,
    ) -> CallOutcome {
        if call.action == "done" {
            return CallOutcome::Done { reasoning: call.reasoning.clone() };
        }
        if call.action == "silent" {
            return CallOutcome::Silent { reasoning: call.reasoning.clone() };
        }

        let validated = match ToolCallValidator::validate(call, available) {
            Validation::Valid(corrected) => corrected,
            Validation::Invalid { error } => return CallOutcome::Invalid { error },
        };

        let executed_list = || {
            actions_so_far
                .iter()
                .map(|a| a.tool.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        // Approval gate.
        if ApprovalGate::needs_approval(profile, &validated.action, ctx) {
            let deadline_present = validated.params.get("deadline").is_some();
            match self.approvals.create_tool_approval(
                profile,
                &validated.action,
                validated.params.clone(),
                validated.reasoning.clone(),
                None,
                ctx,
                deadline_present,
            ) {
                Ok(request) => {
                    let mut record = ActionRecord::new(
                        validated.action.clone(),
                        validated.params.clone(),
                        ActionStatus::QueuedForApproval,
                    );
                    record.reasoning = validated.reasoning.clone();
                    let _ = self.store.log_tool_execution(
                        &profile.id,
                        &validated.action,
                        &validated.params,
                        ActionStatus::QueuedForApproval.as_str(),
                        Some(&request.id),
                    );
                    let feedback = format!(
                        "Tool \"{}\" requires approval and was queued (request {}). The master \
                         contact has been notified; do not retry it. [Tools executed so far: {}]",
                        validated.action,
                        request.id,
                        executed_list()
                    );
                    return CallOutcome::Handled { record, feedback, responded: false };
                }
                Err(error) => {
                    let record = ActionRecord::new(
                        validated.action.clone(),
                        validated.params.clone(),
                        ActionStatus::Failed,
                    );
                    let feedback = format!(
                        "Tool \"{}\" could not be queued for approval: {error}. [Tools executed so far: {}]",
                        validated.action,
                        executed_list()
                    );
                    return CallOutcome::Handled { record, feedback, responded: false };
                }
            }
        }

        // Outbound `respond` runs through the integrity screens before any
        // delivery.
        if validated.action == "respond" {
            if let Some(message) = validated.params.get("message").and_then(|m| m.as_str()) {
                let blocked = if is_error_shaped(message) {
                    Some((
                        ActionStatus::BlockedErrorContent,
                        "Your message looked like raw error output and was not sent. Produce a \
                         real, user-facing message instead."
                            .to_string(),
                    ))
                } else if is_placeholder_shaped(message) {
                    Some((
                        ActionStatus::BlockedPlaceholderText,
                        PLACEHOLDER_CORRECTION.to_string(),
                    ))
                } else {
                    None
                };
                if let Some((status, feedback)) = blocked {
                    let record =
                        ActionRecord::new("respond", validated.params.clone(), status);
                    let _ = self.store.log_tool_execution(
                        &profile.id,
                        "respond",
                        &validated.params,
                        status.as_str(),
                        None,
                    );
                    return CallOutcome::Handled { record, feedback, responded: false };
                }
            }
        }

        // Execute through the recovery wrapper.
        self.emit(AppEvent::ToolStart {
            agent_id: profile.id.clone(),
            tool: validated.action.clone(),
            params: validated.params.clone(),
        });
        let tool_ctx = self.tool_context(profile, ctx);
        let result =
            execute_with_recovery(&self.registry, &validated.action, validated.params.clone(), &tool_ctx)
                .await;

        let summary = match (&result.outcome.result, &result.outcome.error) {
            (Some(value), _) => summarize_tool_result(&validated.action, value, MAX_SUMMARY_CHARS),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        self.emit(AppEvent::ToolResult {
            agent_id: profile.id.clone(),
            tool: validated.action.clone(),
            success: result.outcome.success,
            summary: summary.clone(),
        });

        // Async tools detach immediately.
        if result.outcome.success && result.outcome.is_async() {
            let mut record = ActionRecord::new(
                validated.action.clone(),
                validated.params.clone(),
                ActionStatus::AsyncStarted,
            );
            record.tracking_id = result.outcome.tracking_id().map(str::to_string);
            record.result_summary = Some(summary.clone());
            let _ = self.store.log_tool_execution(
                &profile.id,
                &validated.action,
                &validated.params,
                ActionStatus::AsyncStarted.as_str(),
                Some(&summary),
            );
            let feedback = format!(
                "Tool \"{}\" started in the background (tracking {}). It does not need waiting \
                 — continue with the rest of the task. [Tools executed so far: {}]",
                validated.action,
                record.tracking_id.as_deref().unwrap_or("unknown"),
                executed_list()
            );
            return CallOutcome::Handled { record, feedback, responded: false };
        }

        let status = if result.outcome.success {
            ActionStatus::Executed
        } else {
            ActionStatus::Failed
        };
        let mut record =
            ActionRecord::new(validated.action.clone(), validated.params.clone(), status);
        record.reasoning = validated.reasoning.clone();
        record.result_summary = Some(summary.clone());

        let mut responded = false;
        if result.outcome.success && validated.action == "respond" {
            let message = result
                .outcome
                .result
                .as_ref()
                .and_then(|r| r.get("message"))
                .and_then(|m| m.as_str())
                .or_else(|| validated.params.get("message").and_then(|m| m.as_str()));
            if let (Some(message), Some(sink)) = (message, responder) {
                sink(message);
                *total_responds += 1;
                record.sent_immediately = true;
                responded = true;
            }
        }

        let _ = self.store.log_tool_execution(
            &profile.id,
            &validated.action,
            &validated.params,
            status.as_str(),
            Some(&summary),
        );
        if result.outcome.success {
            self.reflection.award_micro_xp(&profile.id, &validated.action);
        }

        let feedback = if result.outcome.success {
            format!(
                "Tool \"{}\" executed successfully. Result: {}. [Tools executed so far: {}]",
                validated.action,
                summary,
                executed_list()
            )
        } else {
            let recovery = result.recovery.as_ref();
            format!(
                "Tool \"{}\" failed [{}]: {}. Suggestion: {} Available alternative tools: {}. [Tools executed so far: {}]",
                validated.action,
                recovery.map_or("unknown", |r| r.error_type.as_str()),
                summary,
                recovery.map_or("", |r| r.suggestion.as_str()),
                recovery.map_or(String::new(), |r| r.alternatives.join(", ")),
                executed_list()
            )
        };
        CallOutcome::Handled { record, feedback, responded }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    pub(crate) fn tool_context(&self, profile: &AgenticProfile, ctx: &TriggerContext) -> ToolContext {
        ToolContext {
            agentic_id: profile.id.clone(),
            user_id: profile.user_id.clone(),
            conversation_id: ctx.conversation_id.clone(),
            account_id: ctx.account_id.clone(),
            external_id: ctx.external_id.clone(),
            platform: ctx.platform.clone(),
            sender: ctx.sender.clone(),
            orchestration_depth: ctx.orchestration_depth,
            trigger_context: serde_json::to_value(ctx).unwrap_or(serde_json::Value::Null),
        }
    }

    pub(crate) fn build_request(
        &self,
        profile: &AgenticProfile,
        messages: &[Message],
        native_specs: &[NativeToolSpec],
    ) -> AiRequest {
        let mut request = AiRequest::new(
            "agent reasoning",
            &profile.user_id,
            messages.to_vec(),
        )
        .with_tools(native_specs.to_vec())
        .with_options(RequestOptions {
            temperature: profile.temperature.map(|t| t as f32),
            max_tokens: profile.max_tokens,
            model: profile.ai_model.clone(),
            is_agentic: true,
        });
        request = match &profile.ai_provider {
            Some(provider) => request.with_force_provider(provider.clone()),
            None => request,
        };
        request
    }

    /// One routed AI call with usage accounting; tier is floored at `simple`.
    pub(crate) async fn ai_call(
        &self,
        profile: &AgenticProfile,
        mut request: AiRequest,
        request_type: &str,
    ) -> Result<AiResponse, String> {
        if request.force_provider.is_none() && request.force_tier.is_none() {
            request = request.with_force_tier(Tier::Simple.as_str());
        }
        let response = self.ai.process(request).await?;
        let usage = response.usage.clone().unwrap_or_default();
        self.cost
            .record_usage(UsageEvent {
                agent_id: profile.id.clone(),
                user_id: profile.user_id.clone(),
                request_type: request_type.to_string(),
                provider: response.provider.clone(),
                model: response.model.clone(),
                input_tokens: i64::from(usage.prompt_tokens),
                output_tokens: i64::from(usage.completion_tokens),
                task_id: None,
                conversation_id: None,
                source: Some("reasoning_loop".to_string()),
            })
            .await;
        Ok(response)
    }
}

struct ReactiveArgs<'a> {
    profile: &'a AgenticProfile,
    trigger: Trigger,
    ctx: &'a TriggerContext,
    assembled: AssembledContext,
    available: Vec<String>,
    native_specs: Vec<NativeToolSpec>,
    tier: Tier,
    max_iterations: u32,
    max_tool_calls: u32,
    start_iteration: u32,
    start_tokens: u64,
    mut_actions: Vec<ActionRecord>,
    responder: Option<ResponderSink>,
}

// ─── Free helpers ─────────────────────────────────────────────────────────────

/// Strip the enriched-data suffix platforms append to previews.
fn strip_enrichment(preview: &str) -> &str {
    match preview.find("\n\n[") {
        Some(pos) => preview[..pos].trim(),
        None => preview.trim(),
    }
}

/// Keyword-ish tokens from the last two user/assistant messages.
fn extract_keywords(messages: &[Message], limit: usize) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for message in messages
        .iter()
        .rev()
        .filter(|m| m.role != MessageRole::System)
        .take(2)
    {
        for token in message
            .content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 3)
        {
            let lower = token.to_lowercase();
            if !keywords.contains(&lower) {
                keywords.push(lower);
            }
            if keywords.len() >= limit {
                return keywords;
            }
        }
    }
    keywords
}

/// Head-tail truncation of the conversation (never the system prompt).
/// Keeps the first 3 and last 5 conversation messages and up to 4 tool-result
/// messages from the trimmed middle, replaced by a single marker.
fn truncate_conversation(messages: &mut Vec<Message>) {
    // messages[0] is the system prompt.
    let conversation_len = messages.len().saturating_sub(1);
    if conversation_len <= TRUNCATE_KEEP_HEAD + TRUNCATE_KEEP_TAIL + 1 {
        return;
    }

    let head_end = 1 + TRUNCATE_KEEP_HEAD;
    let tail_start = messages.len() - TRUNCATE_KEEP_TAIL;
    let middle: Vec<Message> = messages[head_end..tail_start].to_vec();

    let mut preserved: Vec<Message> = Vec::new();
    for message in &middle {
        if preserved.len() >= TRUNCATE_KEEP_TOOL_RESULTS {
            break;
        }
        if message.content.starts_with("Tool \"") {
            let mut kept = message.clone();
            if kept.content.chars().count() > TOOL_RESULT_RESUMMARY_CHARS {
                let head: String =
                    kept.content.chars().take(TOOL_RESULT_RESUMMARY_CHARS).collect();
                kept.content = format!("{head}…");
            }
            preserved.push(kept);
        }
    }

    let trimmed = middle.len() - preserved.len();
    let marker = Message::system(format!(
        "[{trimmed} earlier message(s) trimmed; {} tool result(s) preserved]",
        preserved.len()
    ));

    let mut rebuilt: Vec<Message> = Vec::with_capacity(
        head_end + 1 + preserved.len() + TRUNCATE_KEEP_TAIL,
    );
    rebuilt.extend_from_slice(&messages[..head_end]);
    rebuilt.push(marker);
    rebuilt.extend(preserved);
    rebuilt.extend_from_slice(&messages[tail_start..]);
    *messages = rebuilt;
}

/// Mid-loop reminder inserted after every third executed tool.
fn checkpoint_reminder(original_request: &str, actions: &[ActionRecord]) -> String {
    let used: Vec<String> = actions
        .iter()
        .map(|a| format!("{} ({})", a.tool, a.status.as_str()))
        .collect();
    format!(
        "Progress check. Original request:\n{original_request}\nTools already used: {}.\nDo not \
         repeat tools with the same parameters; when you have enough, use respond with the \
         answer and then done.",
        used.join(", ")
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedRouter;
    use super::*;
    use std::sync::Mutex;

    use crate::channels::ChannelManager;
    use crate::channels::manager::test_support::RecordingChannel;
    use crate::config::BudgetConfig;
    use crate::memory::SqliteMemoryStore;
    use crate::services::MasterNotificationService;
    use crate::store::agents::Autonomy;
    use crate::tools::registry::test_support::StubTool;

    struct FailingRouter;

    #[async_trait]
    impl AiRouter for FailingRouter {
        async fn process(&self, _request: AiRequest) -> Result<AiResponse, String> {
            Err("All providers failed. Last error: 503".to_string())
        }

        fn router_name(&self) -> &str {
            "failing"
        }
    }

    /// Probe reporting one monitored platform so outbound send tools are
    /// selected in tests.
    struct EmailProbe;

    #[async_trait]
    impl EnvironmentProbe for EmailProbe {
        async fn monitored_platforms(&self, _agent_id: &str) -> Vec<String> {
            vec!["email".to_string()]
        }
    }

    // ── Fixture ───────────────────────────────────────────────────────────────

    struct Fixture {
        store: Store,
        loop_: AgentReasoningLoop,
        profile: AgenticProfile,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Fixture {
        fn new(ai: Arc<dyn AiRouter>, autonomy: Autonomy) -> Self {
            let store = Store::in_memory().unwrap();
            let memory = Arc::new(SqliteMemoryStore::in_memory().unwrap());

            let mut registry = ToolRegistry::new();
            registry.register(Arc::new(StubTool::ok("respond", json!({"message": "ok"}))));
            registry.register(Arc::new(StubTool::ok(
                "getMessages",
                json!([{"from": "a", "text": "one"}, {"from": "b", "text": "two"}]),
            )));
            registry.register(Arc::new(StubTool::ok("searchWeb", json!("found 3 results"))));
            registry.register(Arc::new(StubTool::ok("sendEmail", json!({"sent": true}))));
            registry.register(Arc::new(StubTool::ok("saveMemory", json!({"saved": true}))));
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
                notifier,
                None,
                BudgetConfig::default(),
            );

            let mut profile = AgenticProfile::new("u1", "Atlas");
            profile.autonomy = autonomy;
            profile.master_contact_id = Some("c-master".to_string());
            profile.master_contact_name = Some("Boss".to_string());
            store.insert_agent(&profile).unwrap();

            let loop_ = AgentReasoningLoop::new(
                store.clone(),
                memory,
                ai,
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

        fn message_ctx(&self, preview: &str, from_master: bool) -> TriggerContext {
            TriggerContext {
                sender: Some("Boss".to_string()),
                sender_is_master: from_master,
                preview: Some(preview.to_string()),
                ..Default::default()
            }
        }
    }

    fn respond_call(message: &str) -> AiResponse {
        AiResponse::text(format!(
            "```tool\n{{\"action\":\"respond\",\"params\":{{\"message\":\"{message}\"}}}}\n```"
        ))
    }

    fn tool_call(action: &str, params: serde_json::Value) -> AiResponse {
        AiResponse::text(format!(
            "```tool\n{}\n```",
            json!({"action": action, "params": params})
        ))
    }

    fn done_call(reason: &str) -> AiResponse {
        AiResponse::text(format!(
            "```tool\n{{\"action\":\"done\",\"reasoning\":\"{reason}\"}}\n```"
        ))
    }

    // ── Scenarios ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fast_path_greeting_single_call() {
        let ai = ScriptedRouter::new(vec![respond_call("Good morning! How can I help?")]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                fixture.message_ctx("Hi", true),
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.actions.len(), 1);
        assert_eq!(outcome.actions[0].tool, "respond");
        assert!(outcome.actions[0].sent_immediately);
        assert!(outcome.tokens_used > 0);
        assert_eq!(fixture.sent.lock().unwrap().len(), 1);
        // No approval was queued.
        assert!(fixture.store.list_pending_approvals("u1", 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn reactive_happy_path_reads_then_responds() {
        let ai = ScriptedRouter::new(vec![
            tool_call("getMessages", json!({"limit": 10})),
            respond_call("You have 2 unread messages."),
            done_call("summarized"),
        ]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                fixture.message_ctx("Please summarize today's unread messages", true),
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        let tools: Vec<&str> = outcome.actions.iter().map(|a| a.tool.as_str()).collect();
        assert_eq!(tools, vec!["getMessages", "respond"]);
        assert!(outcome.actions.iter().all(|a| a.status == ActionStatus::Executed));
        assert_eq!(outcome.final_thought, "summarized");
        assert_eq!(fixture.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outbound_tool_from_non_master_is_queued() {
        let ai = ScriptedRouter::new(vec![
            tool_call("sendEmail", json!({"to": "john@x.com", "message": "invoice"})),
            done_call("queued"),
        ]);
        let fixture = Fixture::new(ai, Autonomy::Autonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                fixture.message_ctx("Please email John about the invoice", false),
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        let queued: Vec<&ActionRecord> = outcome
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::QueuedForApproval)
            .collect();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].tool, "sendEmail");

        let pending = fixture.store.list_pending_approvals("u1", 10, 0).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action_payload["tool"], "sendEmail");
        // The email tool itself never ran.
        assert_eq!(
            fixture.store.count_tool_executions(&fixture.profile.id, "sendEmail").unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn outbound_tool_from_master_bypasses_approval() {
        let ai = ScriptedRouter::new(vec![
            tool_call("sendEmail", json!({"to": "john@x.com", "message": "hi"})),
            done_call("sent"),
        ]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                fixture.message_ctx("Email John for me", true),
                None,
            )
            .await
            .unwrap();

        assert!(outcome
            .actions
            .iter()
            .any(|a| a.tool == "sendEmail" && a.status == ActionStatus::Executed));
        assert!(fixture.store.list_pending_approvals("u1", 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_resume_pre_executes_without_reinvocation() {
        let ai = ScriptedRouter::new(vec![done_call("confirmed to user")]);
        let fixture = Fixture::new(ai, Autonomy::Autonomous);

        let ctx = TriggerContext {
            approved_payload: Some(json!({
                "tool": "sendEmail",
                "params": {"to": "john@x.com", "body": "Updated"}
            })),
            ..Default::default()
        };
        let outcome = fixture
            .loop_
            .run(&fixture.profile.id.clone(), Trigger::ApprovalResume, ctx, None)
            .await
            .unwrap();

        // Pre-executed exactly once, before any AI iteration.
        assert_eq!(
            fixture.store.count_tool_executions(&fixture.profile.id, "sendEmail").unwrap(),
            1
        );
        assert!(outcome
            .actions
            .iter()
            .any(|a| a.tool == "sendEmail" && a.status == ActionStatus::Executed));
        assert_eq!(outcome.final_thought, "confirmed to user");
    }

    #[tokio::test]
    async fn silent_marker_ends_run_silently() {
        let ai = ScriptedRouter::new(vec![AiResponse::text("<<SILENT>> nothing to report")]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::Heartbeat,
                TriggerContext::default(),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.silent);
    }

    #[tokio::test]
    async fn provider_failure_first_iteration_sends_apology() {
        let fixture = Fixture::new(Arc::new(FailingRouter), Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                fixture.message_ctx("Please check the backlog status now", false),
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        let sent = fixture.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("technical difficulties"));
        assert!(outcome.actions.is_empty());
    }

    #[tokio::test]
    async fn respond_cap_limits_deliveries() {
        let ai = ScriptedRouter::new(vec![
            respond_call("update one"),
            respond_call("update two"),
            respond_call("update three"),
            done_call("should not be reached"),
        ]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                // Non-greeting text so the fast path does not swallow the run.
                fixture.message_ctx("Keep me posted while you work on the report", true),
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        assert!(
            fixture.sent.lock().unwrap().len() <= 2,
            "MAX_RESPONDS_PER_RUN bounds deliveries"
        );
        assert!(outcome.iterations <= 3);
    }

    #[tokio::test]
    async fn async_tool_detaches_and_loop_continues() {
        let fixture = Fixture::new(ScriptedRouter::new(vec![]), Autonomy::SemiAutonomous);
        // The fixture registry is behind an Arc; this run needs its own tool
        // set with an async tool in it.
        let outcome = {
            let mut registry = ToolRegistry::new();
            registry.register(Arc::new(StubTool::ok(
                "generateFile",
                json!({"async": true, "trackingId": "bg-42"}),
            )));
            let loop_ = AgentReasoningLoop::new(
                fixture.store.clone(),
                Arc::new(SqliteMemoryStore::in_memory().unwrap()),
                ScriptedRouter::new(vec![
                    tool_call("generateFile", json!({"format": "pdf"})),
                    done_call("file generating in background"),
                ]),
                Arc::new(registry),
                Arc::clone(&fixture.loop_.approvals),
                Arc::clone(&fixture.loop_.reflection),
                Arc::clone(&fixture.loop_.cost),
                LoopConfig::default(),
            );
            loop_
                .run(
                    &fixture.profile.id.clone(),
                    Trigger::Schedule,
                    TriggerContext {
                        custom_prompt: Some("generate the weekly pdf report".to_string()),
                        ..Default::default()
                    },
                    None,
                )
                .await
                .unwrap()
        };

        let async_record = outcome
            .actions
            .iter()
            .find(|a| a.status == ActionStatus::AsyncStarted)
            .expect("async action recorded");
        assert_eq!(async_record.tracking_id.as_deref(), Some("bg-42"));
        assert_eq!(outcome.final_thought, "file generating in background");
    }

    #[tokio::test]
    async fn placeholder_respond_is_blocked_then_corrected() {
        let ai = ScriptedRouter::new(vec![
            respond_call("Here is your summary: [Insert summary here]"),
            respond_call("You have 3 unread emails from the supplier."),
            done_call("real summary sent"),
        ]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                fixture.message_ctx("Please summarize my unread emails for me", true),
                Some(fixture.responder()),
            )
            .await
            .unwrap();

        assert!(outcome
            .actions
            .iter()
            .any(|a| a.status == ActionStatus::BlockedPlaceholderText));
        let sent = fixture.sent.lock().unwrap();
        assert_eq!(sent.len(), 1, "only the real message went out");
        assert!(sent[0].contains("3 unread emails"));
        // The executed-respond screen invariant: no executed respond carries
        // placeholder text.
        for action in &outcome.actions {
            if action.tool == "respond" && action.status == ActionStatus::Executed {
                let message = action.params["message"].as_str().unwrap_or("");
                assert!(!message.contains("[Insert"), "screened: {message}");
            }
        }
    }

    #[tokio::test]
    async fn bounded_work_invariant() {
        // Endless tool emission; budgets must stop the run.
        let responses: Vec<AiResponse> = (0..20)
            .map(|i| tool_call("searchWeb", json!({"query": format!("q{i}")})))
            .collect();
        let ai = ScriptedRouter::new(responses);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::Schedule,
                TriggerContext {
                    custom_prompt: Some("research everything".to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        // "research everything" classifies moderate → (8, 6).
        let (max_iterations, max_tool_calls) =
            TaskClassifier::iteration_budget(Tier::Moderate, &LoopConfig::default());
        assert!(outcome.iterations <= max_iterations);
        assert!(outcome.actions.len() <= max_tool_calls as usize);
    }

    #[tokio::test]
    async fn meta_talk_gets_corrected_then_proceeds() {
        let ai = ScriptedRouter::new(vec![
            AiResponse::text("I will use the tool call format to respond to this."),
            done_call("recovered"),
        ]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::IncomingMessage,
                fixture.message_ctx("Please check the unread queue for me", true),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.final_thought, "recovered");
        assert!(outcome.iterations >= 2, "correction consumed an iteration");
    }

    #[tokio::test]
    async fn schedule_trigger_resumes_checkpoint() {
        let ai = ScriptedRouter::new(vec![done_call("resumed fine")]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);
        let ctx = TriggerContext {
            custom_prompt: Some("research the supplier backlog".to_string()),
            ..Default::default()
        };

        // Simulate a crashed prior run at iteration 2 with one action.
        checkpoint::save_iteration(
            &fixture.store,
            &fixture.profile.id,
            "u1",
            Trigger::Schedule,
            &ctx,
            2,
            500,
            &[ActionRecord::new("searchWeb", json!({}), ActionStatus::Executed)],
            Tier::Moderate,
        );

        let outcome = fixture
            .loop_
            .run(&fixture.profile.id.clone(), Trigger::Schedule, ctx, None)
            .await
            .unwrap();

        assert!(outcome.iterations >= 3, "resumed past the saved iteration");
        assert!(outcome.tokens_used >= 500, "restored token count carries over");
        assert!(outcome.actions.iter().any(|a| a.tool == "searchWeb"));
    }

    #[tokio::test]
    async fn concurrent_non_message_run_is_skipped() {
        let ai = ScriptedRouter::new(vec![]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);
        let lock_key = format!("{}:schedule", fixture.profile.id);
        assert!(fixture.loop_.control().try_lock(&lock_key));

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::Schedule,
                TriggerContext::default(),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.final_thought.contains("Skipped"));
        assert_eq!(outcome.iterations, 0);
    }

    #[tokio::test]
    async fn exhausted_budget_short_circuits() {
        let ai = ScriptedRouter::new(vec![done_call("should not run")]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);
        {
            let conn = fixture.store.lock().unwrap();
            conn.execute(
                "UPDATE agents SET daily_budget_usd = 1.0, daily_budget_used = 1.5 WHERE id = ?1",
                rusqlite::params![fixture.profile.id],
            )
            .unwrap();
        }

        let outcome = fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::Heartbeat,
                TriggerContext::default(),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.final_thought.contains("budget"));
        assert_eq!(outcome.iterations, 0, "no AI call was made");
    }

    #[tokio::test]
    async fn unknown_agent_is_fatal() {
        let ai = ScriptedRouter::new(vec![]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);
        let err = fixture
            .loop_
            .run("ghost", Trigger::Heartbeat, TriggerContext::default(), None)
            .await
            .unwrap_err();
        assert!(err.contains("agent not found"));
    }

    #[tokio::test]
    async fn every_run_accounts_usage() {
        let ai = ScriptedRouter::new(vec![done_call("ok")]);
        let fixture = Fixture::new(ai, Autonomy::SemiAutonomous);

        fixture
            .loop_
            .run(
                &fixture.profile.id.clone(),
                Trigger::Heartbeat,
                TriggerContext::default(),
                None,
            )
            .await
            .unwrap();

        let usage = fixture.store.list_usage(&fixture.profile.id, 10).unwrap();
        assert_eq!(usage.len(), 1, "one AI call → one usage row");
    }

    // ── Unit helpers ──────────────────────────────────────────────────────────

    #[test]
    fn truncation_keeps_head_tail_and_tool_results() {
        let mut messages = vec![Message::system("sys")];
        for i in 0..20 {
            if i % 4 == 0 {
                messages.push(Message::user(format!("Tool \"searchWeb\" executed successfully. Result {i}")));
            } else {
                messages.push(Message::user(format!("chatter {i}")));
            }
        }
        let original_len = messages.len();
        truncate_conversation(&mut messages);
        assert!(messages.len() < original_len);
        assert_eq!(messages[0].content, "sys", "system prompt untouched");
        assert!(
            messages.iter().any(|m| m.content.contains("trimmed")),
            "marker inserted"
        );
        let preserved = messages
            .iter()
            .filter(|m| m.content.starts_with("Tool \""))
            .count();
        assert!(preserved >= 1 && preserved <= TRUNCATE_KEEP_TOOL_RESULTS + 2);
        // Tail kept verbatim.
        assert!(messages.last().unwrap().content.contains("19"));
    }

    #[test]
    fn short_conversations_are_never_truncated() {
        let mut messages = vec![Message::system("sys")];
        for i in 0..6 {
            messages.push(Message::user(format!("m{i}")));
        }
        let before = messages.len();
        truncate_conversation(&mut messages);
        assert_eq!(messages.len(), before);
    }

    #[test]
    fn enrichment_suffix_is_stripped() {
        assert_eq!(strip_enrichment("Hi\n\n[Enriched: location data]"), "Hi");
        assert_eq!(strip_enrichment("Hello there"), "Hello there");
    }

    #[test]
    fn keyword_extraction_caps_and_dedups() {
        let messages = vec![
            Message::system("ignored entirely"),
            Message::user("compare supplier pricing pricing supplier for northwind deliveries"),
        ];
        let keywords = extract_keywords(&messages, 8);
        assert!(keywords.len() <= 8);
        assert_eq!(
            keywords.iter().filter(|k| k.as_str() == "supplier").count(),
            1,
            "deduplicated"
        );
        assert!(!keywords.contains(&"for".to_string()), "short tokens dropped");
    }
}
