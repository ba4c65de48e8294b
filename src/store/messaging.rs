//! Directed agent-to-agent messages and their threads.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMessageType {
    TaskDelegation,
    TaskUpdate,
    ContextShare,
    Request,
    Response,
    Notification,
    Handoff,
    Coordination,
}

impl AgentMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskDelegation => "task_delegation",
            Self::TaskUpdate => "task_update",
            Self::ContextShare => "context_share",
            Self::Request => "request",
            Self::Response => "response",
            Self::Notification => "notification",
            Self::Handoff => "handoff",
            Self::Coordination => "coordination",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "task_delegation" => Self::TaskDelegation,
            "task_update" => Self::TaskUpdate,
            "context_share" => Self::ContextShare,
            "response" => Self::Response,
            "notification" => Self::Notification,
            "handoff" => Self::Handoff,
            "coordination" => Self::Coordination,
            _ => Self::Request,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMessageStatus {
    Pending,
    Delivered,
    Read,
    Acknowledged,
    Responded,
    Failed,
    Expired,
}

impl AgentMessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Acknowledged => "acknowledged",
            Self::Responded => "responded",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            "acknowledged" => Self::Acknowledged,
            "responded" => Self::Responded,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub user_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message_type: AgentMessageType,
    pub subject: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub priority: String,
    pub status: AgentMessageStatus,
    pub acknowledged_at: Option<String>,
    pub responded_at: Option<String>,
    pub task_id: Option<String>,
    pub deadline_at: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub user_id: String,
    /// Stable key: sorted participant IDs joined with `:` (plus task ID for
    /// task threads).
    pub participant_key: String,
    pub participants: Vec<String>,
    pub subject: String,
    pub thread_type: String,
    pub task_id: Option<String>,
    pub context: Option<String>,
    pub is_active: bool,
    pub last_message_at: Option<String>,
    pub message_count: i64,
    pub created_at: String,
}

/// Build the stable thread key from a participant set.
pub fn thread_key(participants: &[String], task_id: Option<&str>) -> String {
    let mut sorted: Vec<&str> = participants.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    match task_id {
        Some(t) => format!("{}#{t}", sorted.join(":")),
        None => sorted.join(":"),
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<AgentMessage> {
    Ok(AgentMessage {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        sender_id: row.get("sender_id")?,
        receiver_id: row.get("receiver_id")?,
        message_type: AgentMessageType::parse(&row.get::<_, String>("message_type")?),
        subject: row.get("subject")?,
        content: row.get("content")?,
        metadata: serde_json::from_str(&row.get::<_, String>("metadata")?)
            .unwrap_or(serde_json::Value::Null),
        reply_to: row.get("reply_to")?,
        thread_id: row.get("thread_id")?,
        priority: row.get("priority")?,
        status: AgentMessageStatus::parse(&row.get::<_, String>("status")?),
        acknowledged_at: row.get("acknowledged_at")?,
        responded_at: row.get("responded_at")?,
        task_id: row.get("task_id")?,
        deadline_at: row.get("deadline_at")?,
        expires_at: row.get("expires_at")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_thread(row: &Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        participant_key: row.get("participant_key")?,
        participants: serde_json::from_str(&row.get::<_, String>("participants")?)
            .unwrap_or_default(),
        subject: row.get("subject")?,
        thread_type: row.get("thread_type")?,
        task_id: row.get("task_id")?,
        context: row.get("context")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        last_message_at: row.get("last_message_at")?,
        message_count: row.get("message_count")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    /// Find the thread for a participant set, creating it on first use.
    pub fn get_or_create_thread(
        &self,
        user_id: &str,
        participants: &[String],
        task_id: Option<&str>,
        subject: &str,
        thread_type: &str,
    ) -> Result<Thread, StoreError> {
        let key = thread_key(participants, task_id);
        let conn = self.lock()?;
        let existing = conn
            .query_row(
                "SELECT * FROM threads WHERE participant_key = ?1",
                params![key],
                row_to_thread,
            )
            .ok();
        if let Some(thread) = existing {
            return Ok(thread);
        }

        let thread = Thread {
            id: new_id(),
            user_id: user_id.to_string(),
            participant_key: key,
            participants: participants.to_vec(),
            subject: subject.to_string(),
            thread_type: thread_type.to_string(),
            task_id: task_id.map(str::to_string),
            context: None,
            is_active: true,
            last_message_at: None,
            message_count: 0,
            created_at: now_rfc3339(),
        };
        conn.execute(
            r#"
            INSERT INTO threads (id, user_id, participant_key, participants, subject,
                                 thread_type, task_id, context, is_active, last_message_at,
                                 message_count, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,1,NULL,0,?9)
            "#,
            params![
                thread.id,
                thread.user_id,
                thread.participant_key,
                serde_json::to_string(&thread.participants)
                    .unwrap_or_else(|_| "[]".into()),
                thread.subject,
                thread.thread_type,
                thread.task_id,
                thread.context,
                thread.created_at,
            ],
        )?;
        Ok(thread)
    }

    /// Insert a message and bump its thread's counters in the same write lock.
    pub fn insert_agent_message(&self, message: &AgentMessage) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO agent_messages (
                id, user_id, sender_id, receiver_id, message_type, subject, content,
                metadata, reply_to, thread_id, priority, status, acknowledged_at,
                responded_at, task_id, deadline_at, expires_at, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
            "#,
            params![
                message.id,
                message.user_id,
                message.sender_id,
                message.receiver_id,
                message.message_type.as_str(),
                message.subject,
                message.content,
                message.metadata.to_string(),
                message.reply_to,
                message.thread_id,
                message.priority,
                message.status.as_str(),
                message.acknowledged_at,
                message.responded_at,
                message.task_id,
                message.deadline_at,
                message.expires_at,
                message.created_at,
            ],
        )?;
        if let Some(thread_id) = &message.thread_id {
            conn.execute(
                "UPDATE threads SET message_count = message_count + 1, last_message_at = ?1 WHERE id = ?2",
                params![message.created_at, thread_id],
            )?;
        }
        Ok(())
    }

    pub fn get_agent_message(&self, id: &str) -> Result<AgentMessage, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM agent_messages WHERE id = ?1",
            params![id],
            row_to_message,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("message {id}"))
            }
            other => StoreError::Sqlite(other),
        })
    }

    pub fn set_agent_message_status(
        &self,
        id: &str,
        status: AgentMessageStatus,
    ) -> Result<(), StoreError> {
        let now = now_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE agent_messages
            SET status = ?1,
                acknowledged_at = CASE WHEN ?1 = 'acknowledged' THEN ?2 ELSE acknowledged_at END,
                responded_at = CASE WHEN ?1 = 'responded' THEN ?2 ELSE responded_at END
            WHERE id = ?3
            "#,
            params![status.as_str(), now, id],
        )?;
        Ok(())
    }

    pub fn list_inbox(
        &self,
        receiver_id: &str,
        unread_only: bool,
    ) -> Result<Vec<AgentMessage>, StoreError> {
        let conn = self.lock()?;
        let sql = if unread_only {
            "SELECT * FROM agent_messages WHERE receiver_id = ?1 AND status IN ('pending','delivered') ORDER BY created_at DESC"
        } else {
            "SELECT * FROM agent_messages WHERE receiver_id = ?1 ORDER BY created_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![receiver_id], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_sent(&self, sender_id: &str) -> Result<Vec<AgentMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM agent_messages WHERE sender_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![sender_id], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_thread_messages(&self, thread_id: &str) -> Result<Vec<AgentMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM agent_messages WHERE thread_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![thread_id], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn unread_count(&self, receiver_id: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM agent_messages WHERE receiver_id = ?1 AND status IN ('pending','delivered')",
            params![receiver_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_key_is_order_independent() {
        let a = thread_key(&["b".into(), "a".into()], None);
        let b = thread_key(&["a".into(), "b".into()], None);
        assert_eq!(a, b);
        assert_eq!(a, "a:b");

        let with_task = thread_key(&["a".into(), "b".into()], Some("t1"));
        assert_eq!(with_task, "a:b#t1");
    }

    #[test]
    fn get_or_create_thread_reuses_existing() {
        let store = Store::in_memory().unwrap();
        let participants = vec!["a1".to_string(), "a2".to_string()];
        let t1 = store
            .get_or_create_thread("u1", &participants, None, "hello", "direct")
            .unwrap();
        let t2 = store
            .get_or_create_thread("u1", &participants, None, "ignored", "direct")
            .unwrap();
        assert_eq!(t1.id, t2.id, "same participant set reuses the thread");
    }

    #[test]
    fn insert_updates_thread_counters() {
        let store = Store::in_memory().unwrap();
        let participants = vec!["a1".to_string(), "a2".to_string()];
        let thread = store
            .get_or_create_thread("u1", &participants, None, "s", "direct")
            .unwrap();

        let msg = AgentMessage {
            id: new_id(),
            user_id: "u1".to_string(),
            sender_id: "a1".to_string(),
            receiver_id: "a2".to_string(),
            message_type: AgentMessageType::Request,
            subject: "s".to_string(),
            content: "c".to_string(),
            metadata: serde_json::json!({}),
            reply_to: None,
            thread_id: Some(thread.id.clone()),
            priority: "normal".to_string(),
            status: AgentMessageStatus::Delivered,
            acknowledged_at: None,
            responded_at: None,
            task_id: None,
            deadline_at: None,
            expires_at: None,
            created_at: now_rfc3339(),
        };
        store.insert_agent_message(&msg).unwrap();

        let reloaded = store
            .get_or_create_thread("u1", &participants, None, "s", "direct")
            .unwrap();
        assert_eq!(reloaded.message_count, 1);
        assert!(reloaded.last_message_at.is_some());
        assert_eq!(store.unread_count("a2").unwrap(), 1);
    }
}
