//! Checkpoint policy helpers used by the reasoning loop.
//!
//! The loop saves best-effort checkpoints each iteration; the policy here
//! decides what happens to an existing checkpoint when a new run starts.

use tracing::warn;

use super::types::{ActionRecord, Trigger, TriggerContext};
use crate::agent::classifier::Tier;
use crate::store::Store;
use crate::store::checkpoints::Checkpoint;

/// State restored from a prior crashed run.
#[derive(Debug, Default)]
pub struct RestoredState {
    pub iteration: u32,
    pub tokens_used: u64,
    pub actions: Vec<ActionRecord>,
}

/// Apply the entry-path checkpoint policy.
///
/// On `incoming_message` the existing checkpoint is cleared — each new message
/// is an independent task.  For every other trigger an active checkpoint is
/// restored (iteration, tokens, action records); the system prompt is rebuilt
/// fresh by the caller.
pub fn apply_entry_policy(store: &Store, agent_id: &str, trigger: Trigger) -> RestoredState {
    if trigger == Trigger::IncomingMessage {
        if let Err(e) = store.clear_checkpoint(agent_id) {
            warn!("checkpoint clear failed for {agent_id}: {e}");
        }
        return RestoredState::default();
    }

    match store.load_checkpoint(agent_id) {
        Ok(Some(checkpoint)) => RestoredState {
            iteration: checkpoint.iteration,
            tokens_used: checkpoint.tokens_used,
            actions: serde_json::from_value(checkpoint.action_records).unwrap_or_default(),
        },
        Ok(None) => RestoredState::default(),
        Err(e) => {
            warn!("checkpoint load failed for {agent_id}: {e}");
            RestoredState::default()
        }
    }
}

/// Best-effort per-iteration save; failures never abort the run.
#[allow(clippy::too_many_arguments)]
pub fn save_iteration(
    store: &Store,
    agent_id: &str,
    user_id: &str,
    trigger: Trigger,
    trigger_context: &TriggerContext,
    iteration: u32,
    tokens_used: u64,
    actions: &[ActionRecord],
    tier: Tier,
) {
    let checkpoint = Checkpoint {
        agent_id: agent_id.to_string(),
        user_id: user_id.to_string(),
        trigger_kind: trigger.as_str().to_string(),
        trigger_context: serde_json::to_value(trigger_context)
            .unwrap_or(serde_json::Value::Null),
        iteration,
        action_records: serde_json::to_value(actions).unwrap_or(serde_json::Value::Null),
        tokens_used,
        tier: tier.as_str().to_string(),
        status: "active".to_string(),
        updated_at: String::new(),
    };
    if let Err(e) = store.save_checkpoint(&checkpoint) {
        warn!("checkpoint save failed for {agent_id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::ActionStatus;

    fn saved_state(store: &Store, iteration: u32) {
        let actions = vec![ActionRecord::new(
            "searchWeb",
            serde_json::json!({"query": "x"}),
            ActionStatus::Executed,
        )];
        save_iteration(
            store,
            "a1",
            "u1",
            Trigger::Schedule,
            &TriggerContext::default(),
            iteration,
            321,
            &actions,
            Tier::Moderate,
        );
    }

    #[test]
    fn non_message_trigger_restores() {
        let store = Store::in_memory().unwrap();
        saved_state(&store, 4);

        let restored = apply_entry_policy(&store, "a1", Trigger::Schedule);
        assert_eq!(restored.iteration, 4);
        assert_eq!(restored.tokens_used, 321);
        assert_eq!(restored.actions.len(), 1);
        assert_eq!(restored.actions[0].tool, "searchWeb");
    }

    #[test]
    fn incoming_message_never_resumes() {
        let store = Store::in_memory().unwrap();
        saved_state(&store, 4);

        let restored = apply_entry_policy(&store, "a1", Trigger::IncomingMessage);
        assert_eq!(restored.iteration, 0);
        assert!(restored.actions.is_empty());
        // And the stale checkpoint is gone for the next trigger too.
        assert!(store.load_checkpoint("a1").unwrap().is_none());
    }
}
