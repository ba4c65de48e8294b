//! Recurring job specifications driven by the scheduler.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Cron,
    Interval,
    Once,
    Event,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::Once => "once",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cron" => Self::Cron,
            "interval" => Self::Interval,
            "event" => Self::Event,
            _ => Self::Once,
        }
    }
}

/// A recurring job specification.
///
/// Invariants: `Cron` rows carry a cron expression; `Interval` rows carry a
/// positive `interval_minutes`; `Once` deactivates itself after its first run;
/// `Once`/`Event` rows have `next_run_at = NULL` after firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticSchedule {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub name: String,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_minutes: Option<i64>,
    pub action_type: String,
    /// Opaque JSON forwarded to the action handler.
    pub action_config: serde_json::Value,
    pub custom_prompt: Option<String>,
    pub next_run_at: Option<String>,
    pub last_run_at: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl AgenticSchedule {
    pub fn interval(
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        action_type: impl Into<String>,
        minutes: i64,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            name: String::new(),
            schedule_type: ScheduleType::Interval,
            cron_expression: None,
            interval_minutes: Some(minutes),
            action_type: action_type.into(),
            action_config: serde_json::json!({}),
            custom_prompt: None,
            next_run_at: None,
            last_run_at: None,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn cron(
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        action_type: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        let mut s = Self::interval(user_id, agent_id, action_type, 0);
        s.schedule_type = ScheduleType::Cron;
        s.interval_minutes = None;
        s.cron_expression = Some(expression.into());
        s
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<AgenticSchedule> {
    Ok(AgenticSchedule {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        agent_id: row.get("agent_id")?,
        name: row.get("name")?,
        schedule_type: ScheduleType::parse(&row.get::<_, String>("schedule_type")?),
        cron_expression: row.get("cron_expression")?,
        interval_minutes: row.get("interval_minutes")?,
        action_type: row.get("action_type")?,
        action_config: serde_json::from_str(&row.get::<_, String>("action_config")?)
            .unwrap_or(serde_json::Value::Null),
        custom_prompt: row.get("custom_prompt")?,
        next_run_at: row.get("next_run_at")?,
        last_run_at: row.get("last_run_at")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn insert_schedule(&self, schedule: &AgenticSchedule) -> Result<(), StoreError> {
        if schedule.schedule_type == ScheduleType::Cron && schedule.cron_expression.is_none() {
            return Err(StoreError::InvalidData(
                "cron schedule requires a cron expression".to_string(),
            ));
        }
        if schedule.schedule_type == ScheduleType::Interval
            && schedule.interval_minutes.is_none_or(|m| m <= 0)
        {
            return Err(StoreError::InvalidData(
                "interval schedule requires interval_minutes > 0".to_string(),
            ));
        }
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO schedules (
                id, user_id, agent_id, name, schedule_type, cron_expression,
                interval_minutes, action_type, action_config, custom_prompt,
                next_run_at, last_run_at, is_active, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
            "#,
            params![
                schedule.id,
                schedule.user_id,
                schedule.agent_id,
                schedule.name,
                schedule.schedule_type.as_str(),
                schedule.cron_expression,
                schedule.interval_minutes,
                schedule.action_type,
                schedule.action_config.to_string(),
                schedule.custom_prompt,
                schedule.next_run_at,
                schedule.last_run_at,
                schedule.is_active as i64,
                schedule.created_at,
                schedule.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_schedule(&self, id: &str) -> Result<AgenticSchedule, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM schedules WHERE id = ?1",
            params![id],
            row_to_schedule,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("schedule {id}"))
            }
            other => StoreError::Sqlite(other),
        })
    }

    /// Due, active schedules whose owning agent is active/running, ordered by
    /// `next_run_at`, capped at `limit`.
    pub fn list_due_schedules(
        &self,
        now: &str,
        limit: usize,
    ) -> Result<Vec<AgenticSchedule>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.* FROM schedules s
            JOIN agents a ON a.id = s.agent_id
            WHERE s.is_active = 1
              AND s.next_run_at IS NOT NULL
              AND s.next_run_at <= ?1
              AND a.status IN ('active','running')
            ORDER BY s.next_run_at
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![now, limit as i64], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active schedules whose `next_run_at` is already in the past (restart
    /// backlog), ordered oldest first.
    pub fn list_past_due_schedules(&self, now: &str) -> Result<Vec<AgenticSchedule>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM schedules WHERE is_active = 1 AND next_run_at IS NOT NULL AND next_run_at < ?1 ORDER BY next_run_at",
        )?;
        let rows = stmt.query_map(params![now], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active schedules listed for an agent's context section.
    pub fn list_agent_schedules(&self, agent_id: &str) -> Result<Vec<AgenticSchedule>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM schedules WHERE agent_id = ?1 AND is_active = 1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![agent_id], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_schedule_next_run(
        &self,
        id: &str,
        next_run_at: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE schedules SET next_run_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![next_run_at, now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Post-firing bookkeeping: stamp `last_run_at`, recompute `next_run_at`,
    /// and deactivate `once` schedules.
    pub fn complete_schedule_run(
        &self,
        id: &str,
        next_run_at: Option<&str>,
        deactivate: bool,
    ) -> Result<(), StoreError> {
        let now = now_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE schedules SET last_run_at = ?1, next_run_at = ?2, is_active = CASE WHEN ?3 THEN 0 ELSE is_active END, updated_at = ?1 WHERE id = ?4",
            params![now, next_run_at, deactivate, id],
        )?;
        Ok(())
    }

    /// Restart recovery: give active interval schedules with a NULL
    /// `next_run_at` a fresh one (`now + interval_minutes`).
    pub fn backfill_interval_next_runs(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now();
        let mut stmt = conn.prepare(
            "SELECT id, interval_minutes FROM schedules WHERE is_active = 1 AND schedule_type = 'interval' AND next_run_at IS NULL",
        )?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0))))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut updated = 0;
        for (id, minutes) in rows {
            if minutes <= 0 {
                continue;
            }
            let next = (now + chrono::Duration::minutes(minutes)).to_rfc3339();
            conn.execute(
                "UPDATE schedules SET next_run_at = ?1 WHERE id = ?2",
                params![next, id],
            )?;
            updated += 1;
        }
        Ok(updated)
    }
}
