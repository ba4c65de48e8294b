//! Job history — one row per executed schedule firing.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
    pub id: String,
    pub schedule_id: String,
    pub agent_id: String,
    pub action_type: String,
    pub scheduled_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub input_data: Option<String>,
    pub output_data: Option<String>,
    pub result_summary: Option<String>,
    pub tokens_used: i64,
    pub provider: Option<String>,
    pub model: Option<String>,
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobHistory> {
    Ok(JobHistory {
        id: row.get("id")?,
        schedule_id: row.get("schedule_id")?,
        agent_id: row.get("agent_id")?,
        action_type: row.get("action_type")?,
        scheduled_at: row.get("scheduled_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        duration_ms: row.get("duration_ms")?,
        status: JobStatus::parse(&row.get::<_, String>("status")?),
        error_message: row.get("error_message")?,
        input_data: row.get("input_data")?,
        output_data: row.get("output_data")?,
        result_summary: row.get("result_summary")?,
        tokens_used: row.get("tokens_used")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
    })
}

impl Store {
    /// Insert a fresh `running` row at job launch; returns its ID.
    pub fn start_job_history(
        &self,
        schedule_id: &str,
        agent_id: &str,
        action_type: &str,
        scheduled_at: Option<&str>,
    ) -> Result<String, StoreError> {
        let id = new_id();
        let now = now_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO job_history (id, schedule_id, agent_id, action_type, scheduled_at, started_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running')
            "#,
            params![id, schedule_id, agent_id, action_type, scheduled_at, now],
        )?;
        Ok(id)
    }

    /// Terminal update for a job row.
    #[allow(clippy::too_many_arguments)]
    pub fn finish_job_history(
        &self,
        id: &str,
        status: JobStatus,
        duration_ms: i64,
        result_summary: Option<&str>,
        error_message: Option<&str>,
        tokens_used: i64,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE job_history
            SET status = ?1, completed_at = ?2, duration_ms = ?3,
                result_summary = ?4, error_message = ?5, tokens_used = ?6,
                provider = ?7, model = ?8
            WHERE id = ?9
            "#,
            params![
                status.as_str(),
                now_rfc3339(),
                duration_ms,
                result_summary,
                error_message,
                tokens_used,
                provider,
                model,
                id
            ],
        )?;
        Ok(())
    }

    /// Restart recovery: any row still `running` belonged to a previous
    /// process and is rewritten to `failed`.
    pub fn fail_orphaned_jobs(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE job_history SET status = 'failed', error_message = ?1, completed_at = ?2 WHERE status = 'running'",
            params!["Server restarted while job was running", now_rfc3339()],
        )?;
        Ok(n)
    }

    pub fn get_job_history(&self, id: &str) -> Result<JobHistory, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM job_history WHERE id = ?1",
            params![id],
            row_to_job,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("job {id}")),
            other => StoreError::Sqlite(other),
        })
    }

    pub fn list_job_history_for_schedule(
        &self,
        schedule_id: &str,
        limit: usize,
    ) -> Result<Vec<JobHistory>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM job_history WHERE schedule_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![schedule_id, limit as i64], row_to_job)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
