//! Collaboration conversations (consultation / consensus / conflict).

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Consultation,
    Consensus,
    AsyncConsensus,
    ConflictResolution,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consultation => "consultation",
            Self::Consensus => "consensus",
            Self::AsyncConsensus => "async_consensus",
            Self::ConflictResolution => "conflict_resolution",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "consensus" => Self::Consensus,
            "async_consensus" => Self::AsyncConsensus,
            "conflict_resolution" => Self::ConflictResolution,
            _ => Self::Consultation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
    Failed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub initiator_id: String,
    pub participant_ids: Vec<String>,
    pub conversation_type: ConversationType,
    pub topic: String,
    pub status: ConversationStatus,
    /// Vote options, deadlines, positions — shape depends on the type.
    pub metadata: serde_json::Value,
    pub result: Option<String>,
    pub deadline: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// Message inside a collaboration conversation.
/// Types: `question`, `response`, `vote`, `result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub message_type: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        initiator_id: row.get("initiator_id")?,
        participant_ids: serde_json::from_str(&row.get::<_, String>("participant_ids")?)
            .unwrap_or_default(),
        conversation_type: ConversationType::parse(&row.get::<_, String>("conversation_type")?),
        topic: row.get("topic")?,
        status: ConversationStatus::parse(&row.get::<_, String>("status")?),
        metadata: serde_json::from_str(&row.get::<_, String>("metadata")?)
            .unwrap_or(serde_json::Value::Null),
        result: row.get("result")?,
        deadline: row.get("deadline")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_conv_message(row: &Row<'_>) -> rusqlite::Result<ConversationMessage> {
    Ok(ConversationMessage {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        sender_id: row.get("sender_id")?,
        message_type: row.get("message_type")?,
        content: row.get("content")?,
        metadata: serde_json::from_str(&row.get::<_, String>("metadata")?)
            .unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn create_conversation(
        &self,
        user_id: &str,
        initiator_id: &str,
        participant_ids: &[String],
        conversation_type: ConversationType,
        topic: &str,
        metadata: serde_json::Value,
        deadline: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: new_id(),
            user_id: user_id.to_string(),
            initiator_id: initiator_id.to_string(),
            participant_ids: participant_ids.to_vec(),
            conversation_type,
            topic: topic.to_string(),
            status: ConversationStatus::Active,
            metadata,
            result: None,
            deadline: deadline.map(str::to_string),
            completed_at: None,
            created_at: now_rfc3339(),
        };
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO conversations (id, user_id, initiator_id, participant_ids,
                conversation_type, topic, status, metadata, result, deadline,
                completed_at, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,NULL,?9,NULL,?10)
            "#,
            params![
                conversation.id,
                conversation.user_id,
                conversation.initiator_id,
                serde_json::to_string(&conversation.participant_ids)
                    .unwrap_or_else(|_| "[]".into()),
                conversation.conversation_type.as_str(),
                conversation.topic,
                conversation.status.as_str(),
                conversation.metadata.to_string(),
                conversation.deadline,
                conversation.created_at,
            ],
        )?;
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("conversation {id}"))
            }
            other => StoreError::Sqlite(other),
        })
    }

    pub fn list_conversations_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM conversations WHERE initiator_id = ?1 OR participant_ids LIKE ?2 ORDER BY created_at DESC",
        )?;
        let pattern = format!("%\"{agent_id}\"%");
        let rows = stmt.query_map(params![agent_id, pattern], row_to_conversation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn complete_conversation(
        &self,
        id: &str,
        status: ConversationStatus,
        result: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET status = ?1, result = ?2, completed_at = ?3 WHERE id = ?4",
            params![status.as_str(), result, now_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn add_conversation_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        message_type: &str,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<ConversationMessage, StoreError> {
        let message = ConversationMessage {
            id: new_id(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            message_type: message_type.to_string(),
            content: content.to_string(),
            metadata,
            created_at: now_rfc3339(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversation_messages (id, conversation_id, sender_id, message_type, content, metadata, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                message.id,
                message.conversation_id,
                message.sender_id,
                message.message_type,
                message.content,
                message.metadata.to_string(),
                message.created_at,
            ],
        )?;
        Ok(message)
    }

    pub fn list_conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM conversation_messages WHERE conversation_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![conversation_id], row_to_conv_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count of `vote` messages recorded so far — used by the async-consensus
    /// finalizer.
    pub fn count_votes(&self, conversation_id: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM conversation_messages WHERE conversation_id = ?1 AND message_type = 'vote'",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_lifecycle() {
        let store = Store::in_memory().unwrap();
        let conv = store
            .create_conversation(
                "u1",
                "a1",
                &["a1".to_string(), "a2".to_string()],
                ConversationType::Consensus,
                "Which vendor?",
                serde_json::json!({"options": ["X", "Y"]}),
                None,
            )
            .unwrap();

        store
            .add_conversation_message(&conv.id, "a2", "vote", "1", serde_json::json!({}))
            .unwrap();
        assert_eq!(store.count_votes(&conv.id).unwrap(), 1);

        store
            .complete_conversation(&conv.id, ConversationStatus::Completed, Some("X"))
            .unwrap();
        let loaded = store.get_conversation(&conv.id).unwrap();
        assert_eq!(loaded.status, ConversationStatus::Completed);
        assert_eq!(loaded.result.as_deref(), Some("X"));
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn participant_listing_matches_membership() {
        let store = Store::in_memory().unwrap();
        store
            .create_conversation(
                "u1",
                "a1",
                &["a2".to_string()],
                ConversationType::Consultation,
                "t",
                serde_json::json!({}),
                None,
            )
            .unwrap();

        assert_eq!(store.list_conversations_for_agent("a2").unwrap().len(), 1);
        assert_eq!(store.list_conversations_for_agent("a3").unwrap().len(), 0);
    }
}
