//! Agentic tasks, including plan steps (tasks with a parent plan task).

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assigned" => Self::Assigned,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "blocked" => Self::Blocked,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticTask {
    pub id: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: String,
    /// `standard` for ordinary tasks, `delegated` / `plan_step` / `plan_root`
    /// for plan-derived rows.
    pub task_type: String,
    pub due_at: Option<String>,
    pub assignee_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub ai_summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AgenticTask {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            agent_id: None,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: "normal".to_string(),
            task_type: "standard".to_string(),
            due_at: None,
            assignee_id: None,
            parent_task_id: None,
            ai_summary: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<AgenticTask> {
    Ok(AgenticTask {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        agent_id: row.get("agent_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::parse(&row.get::<_, String>("status")?),
        priority: row.get("priority")?,
        task_type: row.get("task_type")?,
        due_at: row.get("due_at")?,
        assignee_id: row.get("assignee_id")?,
        parent_task_id: row.get("parent_task_id")?,
        ai_summary: row.get("ai_summary")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn insert_task(&self, task: &AgenticTask) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO tasks (
                id, user_id, agent_id, title, description, status, priority,
                task_type, due_at, assignee_id, parent_task_id, ai_summary,
                created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
            "#,
            params![
                task.id,
                task.user_id,
                task.agent_id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority,
                task.task_type,
                task.due_at,
                task.assignee_id,
                task.parent_task_id,
                task.ai_summary,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<AgenticTask, StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("task {id}"))
                }
                other => StoreError::Sqlite(other),
            })
    }

    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        ai_summary: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tasks SET status = ?1, ai_summary = COALESCE(?2, ai_summary), updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), ai_summary, now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Active (non-terminal) tasks for an agent, most recent first.
    pub fn list_agent_tasks(
        &self,
        agent_id: &str,
        include_completed: bool,
    ) -> Result<Vec<AgenticTask>, StoreError> {
        let conn = self.lock()?;
        let sql = if include_completed {
            "SELECT * FROM tasks WHERE agent_id = ?1 ORDER BY updated_at DESC"
        } else {
            "SELECT * FROM tasks WHERE agent_id = ?1 AND status NOT IN ('completed','cancelled','failed') ORDER BY updated_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![agent_id], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All plan-step tasks under a root plan task, in insertion order.
    pub fn list_plan_steps(&self, root_task_id: &str) -> Result<Vec<AgenticTask>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE parent_task_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![root_task_id], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_round_trip() {
        let store = Store::in_memory().unwrap();
        let mut task = AgenticTask::new("u1", "Summarize inbox");
        task.agent_id = Some("a1".to_string());
        store.insert_task(&task).unwrap();

        let loaded = store.get_task(&task.id).unwrap();
        assert_eq!(loaded.title, "Summarize inbox");
        assert_eq!(loaded.status, TaskStatus::Pending);
    }

    #[test]
    fn status_update_sets_summary() {
        let store = Store::in_memory().unwrap();
        let task = AgenticTask::new("u1", "t");
        store.insert_task(&task).unwrap();

        store
            .update_task_status(&task.id, TaskStatus::Completed, Some("done in 2 steps"))
            .unwrap();
        let loaded = store.get_task(&task.id).unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.ai_summary.as_deref(), Some("done in 2 steps"));
    }

    #[test]
    fn active_listing_excludes_terminal() {
        let store = Store::in_memory().unwrap();
        let mut open = AgenticTask::new("u1", "open");
        open.agent_id = Some("a1".to_string());
        let mut done = AgenticTask::new("u1", "done");
        done.agent_id = Some("a1".to_string());
        done.status = TaskStatus::Completed;
        store.insert_task(&open).unwrap();
        store.insert_task(&done).unwrap();

        let active = store.list_agent_tasks("a1", false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "open");

        let all = store.list_agent_tasks("a1", true).unwrap();
        assert_eq!(all.len(), 2);
    }
}
