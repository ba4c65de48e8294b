//! Activity log and the tool-executions audit trail.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

/// Source of an activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    Agent,
    Scheduler,
    System,
}

impl ActivitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Scheduler => "scheduler",
            Self::System => "system",
        }
    }
}

impl Store {
    pub fn log_activity(
        &self,
        agent_id: &str,
        source: ActivitySource,
        title: &str,
        status: &str,
        details: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO activity_log (id, agent_id, source, title, status, details, started_at, completed_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
            params![
                new_id(),
                agent_id,
                source.as_str(),
                title,
                status,
                details,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count_activity(&self, agent_id: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE agent_id = ?1",
            params![agent_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Audit trail for every auto-executed tool call.  `status` accepts
    /// `success` as a legacy alias of `executed` on read; only canonical
    /// values are written here.
    pub fn log_tool_execution(
        &self,
        agent_id: &str,
        tool: &str,
        params_json: &serde_json::Value,
        status: &str,
        result_summary: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tool_executions (id, agent_id, tool, params, status, result_summary, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                new_id(),
                agent_id,
                tool,
                params_json.to_string(),
                status,
                result_summary,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count_tool_executions(&self, agent_id: &str, tool: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM tool_executions WHERE agent_id = ?1 AND tool = ?2",
            params![agent_id, tool],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_and_tool_logs_accumulate() {
        let store = Store::in_memory().unwrap();
        store
            .log_activity("a1", ActivitySource::Agent, "Reasoning cycle", "success", None)
            .unwrap();
        store
            .log_tool_execution(
                "a1",
                "respond",
                &serde_json::json!({"message": "hi"}),
                "executed",
                Some("sent"),
            )
            .unwrap();

        assert_eq!(store.count_activity("a1").unwrap(), 1);
        assert_eq!(store.count_tool_executions("a1", "respond").unwrap(), 1);
    }
}
