//! Per-agent reasoning checkpoints for crash recovery.
//!
//! Checkpoints are opaque to the AI; they only let a run that was killed
//! mid-iteration resume.  They are not transactional with tool side effects —
//! the tool-executions log remains the audit trail for what actually ran.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, now_rfc3339};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub agent_id: String,
    pub user_id: String,
    pub trigger_kind: String,
    pub trigger_context: serde_json::Value,
    pub iteration: u32,
    /// Serialized action records accumulated so far.
    pub action_records: serde_json::Value,
    pub tokens_used: u64,
    pub tier: String,
    /// `active`, `completed`, or `failed`.
    pub status: String,
    pub updated_at: String,
}

fn row_to_checkpoint(row: &Row<'_>) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        agent_id: row.get("agent_id")?,
        user_id: row.get("user_id")?,
        trigger_kind: row.get("trigger_kind")?,
        trigger_context: serde_json::from_str(&row.get::<_, String>("trigger_context")?)
            .unwrap_or(serde_json::Value::Null),
        iteration: row.get::<_, i64>("iteration")? as u32,
        action_records: serde_json::from_str(&row.get::<_, String>("action_records")?)
            .unwrap_or(serde_json::Value::Null),
        tokens_used: row.get::<_, i64>("tokens_used")? as u64,
        tier: row.get("tier")?,
        status: row.get("status")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    /// Upsert the agent's single checkpoint row.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO checkpoints (agent_id, user_id, trigger_kind, trigger_context,
                                     iteration, action_records, tokens_used, tier,
                                     status, updated_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,'active',?9)
            ON CONFLICT(agent_id) DO UPDATE SET
                user_id = excluded.user_id,
                trigger_kind = excluded.trigger_kind,
                trigger_context = excluded.trigger_context,
                iteration = excluded.iteration,
                action_records = excluded.action_records,
                tokens_used = excluded.tokens_used,
                tier = excluded.tier,
                status = 'active',
                updated_at = excluded.updated_at
            "#,
            params![
                checkpoint.agent_id,
                checkpoint.user_id,
                checkpoint.trigger_kind,
                checkpoint.trigger_context.to_string(),
                i64::from(checkpoint.iteration),
                checkpoint.action_records.to_string(),
                checkpoint.tokens_used as i64,
                checkpoint.tier,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load the agent's checkpoint if one is active.
    pub fn load_checkpoint(&self, agent_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT * FROM checkpoints WHERE agent_id = ?1 AND status = 'active'",
                params![agent_id],
                row_to_checkpoint,
            )
            .ok())
    }

    /// Normal completion: the checkpoint is spent.
    pub fn complete_checkpoint(&self, agent_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE checkpoints SET status = 'completed', updated_at = ?1 WHERE agent_id = ?2",
            params![now_rfc3339(), agent_id],
        )?;
        Ok(())
    }

    /// Failure marker — the next run decides whether to resume or discard.
    pub fn fail_checkpoint(&self, agent_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE checkpoints SET status = 'failed', updated_at = ?1 WHERE agent_id = ?2",
            params![now_rfc3339(), agent_id],
        )?;
        Ok(())
    }

    /// Each new incoming message is an independent task: drop whatever was
    /// in flight.
    pub fn clear_checkpoint(&self, agent_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE agent_id = ?1",
            params![agent_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(agent_id: &str, iteration: u32) -> Checkpoint {
        Checkpoint {
            agent_id: agent_id.to_string(),
            user_id: "u1".to_string(),
            trigger_kind: "schedule".to_string(),
            trigger_context: serde_json::json!({}),
            iteration,
            action_records: serde_json::json!([]),
            tokens_used: 100,
            tier: "moderate".to_string(),
            status: "active".to_string(),
            updated_at: now_rfc3339(),
        }
    }

    #[test]
    fn save_load_round_trip_upserts() {
        let store = Store::in_memory().unwrap();
        store.save_checkpoint(&checkpoint("a1", 1)).unwrap();
        store.save_checkpoint(&checkpoint("a1", 4)).unwrap();

        let loaded = store.load_checkpoint("a1").unwrap().unwrap();
        assert_eq!(loaded.iteration, 4, "second save overwrites");
    }

    #[test]
    fn completed_checkpoint_is_not_loaded() {
        let store = Store::in_memory().unwrap();
        store.save_checkpoint(&checkpoint("a1", 1)).unwrap();
        store.complete_checkpoint("a1").unwrap();
        assert!(store.load_checkpoint("a1").unwrap().is_none());
    }

    #[test]
    fn clear_removes_row() {
        let store = Store::in_memory().unwrap();
        store.save_checkpoint(&checkpoint("a1", 1)).unwrap();
        store.clear_checkpoint("a1").unwrap();
        assert!(store.load_checkpoint("a1").unwrap().is_none());
    }
}
