//! Per-request cost accounting and daily-budget enforcement.
//!
//! Pricing is a substring table over the model name (USD per million tokens,
//! input/output).  `:free`, local, and CLI-backed models cost nothing.  Every
//! recorded request writes exactly one usage row and increments the agent's
//! spent daily budget exactly once; crossing the warning (default 80 %) or
//! exceeded (100 %) threshold emits a hierarchy-log row and a master
//! notification.

use std::sync::Arc;

use tracing::warn;

use super::notifier::MasterNotificationService;
use crate::config::BudgetConfig;
use crate::event_bus::{AppEvent, EventBus};
use crate::store::notifications::NotificationType;
use crate::store::usage::{UsageLog, UsageSummary};
use crate::store::{Store, new_id, now_rfc3339};

/// `(model substring, usd per 1M input tokens, usd per 1M output tokens)`.
const PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4", 30.00, 60.00),
    ("o3-mini", 1.10, 4.40),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-haiku", 0.25, 1.25),
    ("claude-sonnet", 3.00, 15.00),
    ("claude-opus", 15.00, 75.00),
    ("gemini-flash", 0.10, 0.40),
    ("gemini-pro", 1.25, 5.00),
    ("deepseek", 0.27, 1.10),
    ("llama", 0.20, 0.20),
    ("mistral", 0.25, 0.25),
];

/// Fallback when no substring matches.
const DEFAULT_PRICING: (f64, f64) = (1.0, 3.0);

/// Model-name markers that always cost zero.
const FREE_MARKERS: &[&str] = &[":free", "ollama", "local", "cli"];

/// Compute the USD cost for one request.
pub fn model_cost(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let lower = model.to_lowercase();
    if FREE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return 0.0;
    }
    let (price_in, price_out) = PRICING
        .iter()
        .find(|(substr, _, _)| lower.contains(substr))
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(DEFAULT_PRICING);
    (input_tokens as f64 / 1e6) * price_in + (output_tokens as f64 / 1e6) * price_out
}

// ─── CostTracker ──────────────────────────────────────────────────────────────

pub struct CostTracker {
    store: Store,
    notifier: Arc<MasterNotificationService>,
    bus: Option<Arc<dyn EventBus>>,
    config: BudgetConfig,
}

/// One request's accounting input.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub agent_id: String,
    pub user_id: String,
    pub request_type: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub task_id: Option<String>,
    pub conversation_id: Option<String>,
    pub source: Option<String>,
}

impl CostTracker {
    pub fn new(
        store: Store,
        notifier: Arc<MasterNotificationService>,
        bus: Option<Arc<dyn EventBus>>,
        config: BudgetConfig,
    ) -> Arc<Self> {
        Arc::new(Self { store, notifier, bus, config })
    }

    /// Record one AI request: usage row, budget increment, threshold checks.
    /// Returns the computed cost.  Never fails the caller's main path — any
    /// store error is logged and swallowed.
    pub async fn record_usage(&self, event: UsageEvent) -> f64 {
        let cost = model_cost(&event.model, event.input_tokens, event.output_tokens);
        let usage = UsageLog {
            id: new_id(),
            agent_id: event.agent_id.clone(),
            user_id: event.user_id.clone(),
            request_type: event.request_type,
            provider: event.provider,
            model: event.model,
            input_tokens: event.input_tokens,
            output_tokens: event.output_tokens,
            total_tokens: event.input_tokens + event.output_tokens,
            cost_usd: cost,
            task_id: event.task_id,
            conversation_id: event.conversation_id,
            source: event.source,
            created_at: now_rfc3339(),
        };
        if let Err(e) = self.store.insert_usage_log(&usage) {
            warn!("usage log write failed for {}: {e}", event.agent_id);
            return cost;
        }

        let (used, budget) = match self.store.add_daily_budget_used(&event.agent_id, cost) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("budget increment failed for {}: {e}", event.agent_id);
                return cost;
            }
        };
        if budget <= 0.0 {
            return cost; // no budget configured
        }

        let before = (used - cost) / budget;
        let after = used / budget;
        if before < 1.0 && after >= 1.0 {
            self.emit_threshold(&event.agent_id, &event.user_id, after, true).await;
        } else if before < self.config.warning_ratio && after >= self.config.warning_ratio {
            self.emit_threshold(&event.agent_id, &event.user_id, after, false).await;
        }
        cost
    }

    async fn emit_threshold(&self, agent_id: &str, user_id: &str, ratio: f64, exceeded: bool) {
        let event_type = if exceeded { "budget_exceeded" } else { "budget_warning" };
        if let Err(e) = self.store.log_hierarchy_event(
            agent_id,
            user_id,
            event_type,
            serde_json::json!({"ratio": ratio}),
        ) {
            warn!("hierarchy log write failed: {e}");
        }
        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::BudgetThreshold {
                agent_id: agent_id.to_string(),
                ratio,
                exceeded,
            });
        }

        let profile = match self.store.get_agent(agent_id) {
            Ok(p) => p,
            Err(_) => return,
        };
        let (notification_type, title) = if exceeded {
            (NotificationType::BudgetExceeded, "Daily budget exceeded")
        } else {
            (NotificationType::BudgetWarning, "Daily budget warning")
        };
        let _ = self
            .notifier
            .notify(
                user_id,
                agent_id,
                notification_type,
                title,
                &format!(
                    "{} has used {:.0}% of its daily budget (${:.2} of ${:.2}).",
                    profile.name,
                    ratio * 100.0,
                    profile.daily_budget_used,
                    profile.daily_budget_usd
                ),
                &profile.notification_channel,
                profile.master_contact_id.as_deref(),
                None,
            )
            .await;
    }

    pub fn usage_summary(
        &self,
        agent_id: &str,
        start: &str,
        end: &str,
    ) -> Result<UsageSummary, String> {
        self.store
            .summarize_usage(agent_id, start, end)
            .map_err(|e| e.to_string())
    }

    /// Daily maintenance call; usage-log history is untouched.
    pub fn reset_daily_budgets(&self) -> Result<usize, String> {
        self.store.reset_daily_budgets().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelManager;
    use crate::channels::manager::test_support::RecordingChannel;
    use crate::store::agents::AgenticProfile;

    fn tracker() -> (Arc<CostTracker>, Store, Arc<RecordingChannel>) {
        let store = Store::in_memory().unwrap();
        let channel = Arc::new(RecordingChannel::new("email"));
        let mut manager = ChannelManager::new();
        manager.register(channel.clone());
        let notifier = Arc::new(MasterNotificationService::new(
            store.clone(),
            Arc::new(manager),
            None,
        ));
        (
            CostTracker::new(store.clone(), notifier, None, BudgetConfig::default()),
            store,
            channel,
        )
    }

    fn event(agent_id: &str, model: &str, input: i64, output: i64) -> UsageEvent {
        UsageEvent {
            agent_id: agent_id.to_string(),
            user_id: "u1".to_string(),
            request_type: "reasoning".to_string(),
            provider: "router".to_string(),
            model: model.to_string(),
            input_tokens: input,
            output_tokens: output,
            task_id: None,
            conversation_id: None,
            source: None,
        }
    }

    #[test]
    fn pricing_table_and_free_markers() {
        // 1M input + 1M output of gpt-4o = 2.50 + 10.00
        assert!((model_cost("openai/gpt-4o", 1_000_000, 1_000_000) - 12.5).abs() < 1e-9);
        assert_eq!(model_cost("meta/llama-3.1:free", 1_000_000, 1_000_000), 0.0);
        assert_eq!(model_cost("ollama/qwen2.5", 500_000, 500_000), 0.0);
        // Unknown model falls back to (1, 3).
        assert!((model_cost("mystery-model", 1_000_000, 1_000_000) - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn record_writes_row_and_increments_budget_once() {
        let (tracker, store, _) = tracker();
        let mut profile = AgenticProfile::new("u1", "Atlas");
        profile.daily_budget_usd = 10.0;
        store.insert_agent(&profile).unwrap();

        let cost = tracker
            .record_usage(event(&profile.id, "gpt-4o", 1_000_000, 0))
            .await;
        assert!((cost - 2.5).abs() < 1e-9);

        let rows = store.list_usage(&profile.id, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].cost_usd - 2.5).abs() < 1e-9);

        let loaded = store.get_agent(&profile.id).unwrap();
        assert!((loaded.daily_budget_used - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exceeded_crossing_notifies_and_logs_hierarchy() {
        let (tracker, store, channel) = tracker();
        let mut profile = AgenticProfile::new("u1", "Atlas");
        profile.daily_budget_usd = 1.0;
        profile.daily_budget_used = 0.99;
        profile.master_contact_id = Some("c1".to_string());
        store.insert_agent(&profile).unwrap();

        // 20k input tokens of gpt-4o = $0.05 → crosses 100%.
        tracker
            .record_usage(event(&profile.id, "gpt-4o", 20_000, 0))
            .await;

        let loaded = store.get_agent(&profile.id).unwrap();
        assert!((loaded.daily_budget_used - 1.04).abs() < 1e-6);
        assert_eq!(
            store
                .count_hierarchy_events(&profile.id, "budget_exceeded")
                .unwrap(),
            1
        );
        assert_eq!(channel.count(), 1, "master was notified");
        let body = &channel.deliveries.lock().unwrap()[0].1;
        assert!(body.contains("Daily budget exceeded"), "body: {body}");
    }

    #[tokio::test]
    async fn warning_crossing_fires_once_at_eighty_percent() {
        let (tracker, store, channel) = tracker();
        let mut profile = AgenticProfile::new("u1", "Atlas");
        profile.daily_budget_usd = 1.0;
        profile.daily_budget_used = 0.70;
        store.insert_agent(&profile).unwrap();

        // $0.15 → 85%, crosses the 80% warning.
        tracker
            .record_usage(event(&profile.id, "gpt-4o", 60_000, 0))
            .await;
        assert_eq!(
            store
                .count_hierarchy_events(&profile.id, "budget_warning")
                .unwrap(),
            1
        );
        // Master contact missing → notification attempted but channel target None is fine.
        assert!(channel.count() <= 1);

        // A further small request inside 80–100% does not re-fire the warning.
        tracker
            .record_usage(event(&profile.id, "gpt-4o", 4_000, 0))
            .await;
        assert_eq!(
            store
                .count_hierarchy_events(&profile.id, "budget_warning")
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn zero_budget_skips_threshold_machinery() {
        let (tracker, store, _) = tracker();
        let profile = AgenticProfile::new("u1", "Atlas");
        store.insert_agent(&profile).unwrap();

        tracker
            .record_usage(event(&profile.id, "gpt-4o", 1_000_000, 0))
            .await;
        assert_eq!(
            store
                .count_hierarchy_events(&profile.id, "budget_exceeded")
                .unwrap(),
            0
        );
    }
}
