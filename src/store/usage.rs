//! Usage log (one row per AI request) and the hierarchy event log.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub request_type: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub task_id: Option<String>,
    pub conversation_id: Option<String>,
    pub source: Option<String>,
    pub created_at: String,
}

/// Aggregated usage figures for a window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsageSummary {
    pub request_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub by_model: Vec<(String, i64, f64)>,
    pub by_type: Vec<(String, i64, f64)>,
    pub daily: Vec<(String, i64, f64)>,
}

fn row_to_usage(row: &Row<'_>) -> rusqlite::Result<UsageLog> {
    Ok(UsageLog {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        user_id: row.get("user_id")?,
        request_type: row.get("request_type")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        total_tokens: row.get("total_tokens")?,
        cost_usd: row.get("cost_usd")?,
        task_id: row.get("task_id")?,
        conversation_id: row.get("conversation_id")?,
        source: row.get("source")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn insert_usage_log(&self, usage: &UsageLog) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO usage_log (id, agent_id, user_id, request_type, provider,
                model, input_tokens, output_tokens, total_tokens, cost_usd,
                task_id, conversation_id, source, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
            "#,
            params![
                usage.id,
                usage.agent_id,
                usage.user_id,
                usage.request_type,
                usage.provider,
                usage.model,
                usage.input_tokens,
                usage.output_tokens,
                usage.total_tokens,
                usage.cost_usd,
                usage.task_id,
                usage.conversation_id,
                usage.source,
                usage.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_usage(&self, agent_id: &str, limit: usize) -> Result<Vec<UsageLog>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM usage_log WHERE agent_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, limit as i64], row_to_usage)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Aggregate usage for an agent between two RFC-3339 bounds (inclusive
    /// start, exclusive end).
    pub fn summarize_usage(
        &self,
        agent_id: &str,
        start: &str,
        end: &str,
    ) -> Result<UsageSummary, StoreError> {
        let conn = self.lock()?;
        let mut summary: UsageSummary = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(input_tokens),0), COALESCE(SUM(output_tokens),0),
                   COALESCE(SUM(total_tokens),0), COALESCE(SUM(cost_usd),0)
            FROM usage_log WHERE agent_id = ?1 AND created_at >= ?2 AND created_at < ?3
            "#,
            params![agent_id, start, end],
            |row| {
                Ok(UsageSummary {
                    request_count: row.get(0)?,
                    input_tokens: row.get(1)?,
                    output_tokens: row.get(2)?,
                    total_tokens: row.get(3)?,
                    cost_usd: row.get(4)?,
                    ..Default::default()
                })
            },
        )?;

        let mut by_model = conn.prepare(
            "SELECT model, COUNT(*), COALESCE(SUM(cost_usd),0) FROM usage_log WHERE agent_id = ?1 AND created_at >= ?2 AND created_at < ?3 GROUP BY model ORDER BY 3 DESC",
        )?;
        summary.by_model = by_model
            .query_map(params![agent_id, start, end], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_type = conn.prepare(
            "SELECT request_type, COUNT(*), COALESCE(SUM(cost_usd),0) FROM usage_log WHERE agent_id = ?1 AND created_at >= ?2 AND created_at < ?3 GROUP BY request_type",
        )?;
        summary.by_type = by_type
            .query_map(params![agent_id, start, end], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut daily = conn.prepare(
            "SELECT substr(created_at, 1, 10), COUNT(*), COALESCE(SUM(cost_usd),0) FROM usage_log WHERE agent_id = ?1 AND created_at >= ?2 AND created_at < ?3 GROUP BY 1 ORDER BY 1",
        )?;
        summary.daily = daily
            .query_map(params![agent_id, start, end], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(summary)
    }

    /// Append a hierarchy event (budget crossings, child creation, …).
    pub fn log_hierarchy_event(
        &self,
        agent_id: &str,
        user_id: &str,
        event_type: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO hierarchy_log (id, agent_id, user_id, event_type, details, created_at) VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                new_id(),
                agent_id,
                user_id,
                event_type,
                details.to_string(),
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn count_hierarchy_events(
        &self,
        agent_id: &str,
        event_type: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM hierarchy_log WHERE agent_id = ?1 AND event_type = ?2",
            params![agent_id, event_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(agent: &str, model: &str, cost: f64, created_at: &str) -> UsageLog {
        UsageLog {
            id: new_id(),
            agent_id: agent.to_string(),
            user_id: "u1".to_string(),
            request_type: "reasoning".to_string(),
            provider: "openrouter".to_string(),
            model: model.to_string(),
            input_tokens: 100,
            output_tokens: 50,
            total_tokens: 150,
            cost_usd: cost,
            task_id: None,
            conversation_id: None,
            source: None,
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn summary_aggregates_by_model_and_day() {
        let store = Store::in_memory().unwrap();
        store
            .insert_usage_log(&usage("a1", "gpt-4o", 0.10, "2026-03-01T10:00:00+00:00"))
            .unwrap();
        store
            .insert_usage_log(&usage("a1", "gpt-4o", 0.20, "2026-03-01T11:00:00+00:00"))
            .unwrap();
        store
            .insert_usage_log(&usage("a1", "claude", 0.30, "2026-03-02T10:00:00+00:00"))
            .unwrap();
        // Outside the window.
        store
            .insert_usage_log(&usage("a1", "gpt-4o", 9.0, "2026-04-01T10:00:00+00:00"))
            .unwrap();

        let summary = store
            .summarize_usage("a1", "2026-03-01T00:00:00+00:00", "2026-03-03T00:00:00+00:00")
            .unwrap();
        assert_eq!(summary.request_count, 3);
        assert!((summary.cost_usd - 0.60).abs() < 1e-9);
        assert_eq!(summary.by_model.len(), 2);
        assert_eq!(summary.daily.len(), 2);
        assert_eq!(summary.daily[0].0, "2026-03-01");
    }
}
