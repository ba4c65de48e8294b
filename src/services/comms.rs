//! Agent-to-agent messaging: directed messages, threads, delegation records.

use serde_json::Value;

use crate::store::messaging::{
    AgentMessage, AgentMessageStatus, AgentMessageType, Thread,
};
use crate::store::{Store, new_id, now_rfc3339};

pub struct AgentComms {
    store: Store,
}

/// Parameters for [`AgentComms::send`].
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub message_type: AgentMessageType,
    pub subject: String,
    pub content: String,
    pub metadata: Value,
    pub priority: String,
    pub task_id: Option<String>,
    pub deadline_at: Option<String>,
    pub expires_at: Option<String>,
}

impl SendMessage {
    pub fn request(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            message_type: AgentMessageType::Request,
            subject: String::new(),
            content: content.into(),
            metadata: serde_json::json!({}),
            priority: "normal".to_string(),
            task_id: None,
            deadline_at: None,
            expires_at: None,
        }
    }
}

impl AgentComms {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Send a directed message.  Sender and receiver must belong to the same
    /// user; the message is inserted `pending` and transitions to `delivered`
    /// in the same call.
    pub fn send(&self, message: SendMessage) -> Result<AgentMessage, String> {
        let sender = self
            .store
            .get_agent(&message.sender_id)
            .map_err(|e| e.to_string())?;
        let receiver = self
            .store
            .get_agent(&message.receiver_id)
            .map_err(|e| e.to_string())?;
        if sender.user_id != receiver.user_id {
            return Err(format!(
                "agents {} and {} belong to different users",
                sender.id, receiver.id
            ));
        }

        let participants = vec![sender.id.clone(), receiver.id.clone()];
        let thread = self
            .store
            .get_or_create_thread(
                &sender.user_id,
                &participants,
                message.task_id.as_deref(),
                &message.subject,
                if message.task_id.is_some() { "task" } else { "direct" },
            )
            .map_err(|e| e.to_string())?;

        let row = AgentMessage {
            id: new_id(),
            user_id: sender.user_id.clone(),
            sender_id: sender.id,
            receiver_id: receiver.id,
            message_type: message.message_type,
            subject: message.subject,
            content: message.content,
            metadata: message.metadata,
            reply_to: None,
            thread_id: Some(thread.id.clone()),
            priority: message.priority,
            status: AgentMessageStatus::Pending,
            acknowledged_at: None,
            responded_at: None,
            task_id: message.task_id,
            deadline_at: message.deadline_at,
            expires_at: message.expires_at,
            created_at: now_rfc3339(),
        };
        self.store.insert_agent_message(&row).map_err(|e| e.to_string())?;
        // Delivery is in-process: the receiver reads from the same store.
        self.store
            .set_agent_message_status(&row.id, AgentMessageStatus::Delivered)
            .map_err(|e| e.to_string())?;
        self.store.get_agent_message(&row.id).map_err(|e| e.to_string())
    }

    /// Reply to a message: copies its priority and thread, marks the original
    /// `responded`.
    pub fn reply(
        &self,
        original_id: &str,
        content: impl Into<String>,
    ) -> Result<AgentMessage, String> {
        let original = self
            .store
            .get_agent_message(original_id)
            .map_err(|e| e.to_string())?;

        let row = AgentMessage {
            id: new_id(),
            user_id: original.user_id.clone(),
            sender_id: original.receiver_id.clone(),
            receiver_id: original.sender_id.clone(),
            message_type: AgentMessageType::Response,
            subject: format!("Re: {}", original.subject),
            content: content.into(),
            metadata: serde_json::json!({}),
            reply_to: Some(original.id.clone()),
            thread_id: original.thread_id.clone(),
            priority: original.priority.clone(),
            status: AgentMessageStatus::Pending,
            acknowledged_at: None,
            responded_at: None,
            task_id: original.task_id.clone(),
            deadline_at: None,
            expires_at: None,
            created_at: now_rfc3339(),
        };
        self.store.insert_agent_message(&row).map_err(|e| e.to_string())?;
        self.store
            .set_agent_message_status(&row.id, AgentMessageStatus::Delivered)
            .map_err(|e| e.to_string())?;
        self.store
            .set_agent_message_status(&original.id, AgentMessageStatus::Responded)
            .map_err(|e| e.to_string())?;
        self.store.get_agent_message(&row.id).map_err(|e| e.to_string())
    }

    /// Delegate a task to another agent (message + task assignment).
    pub fn delegate_task(
        &self,
        sender_id: &str,
        receiver_id: &str,
        task_id: &str,
        instructions: &str,
    ) -> Result<AgentMessage, String> {
        let message = self.send(SendMessage {
            message_type: AgentMessageType::TaskDelegation,
            subject: format!("Task {task_id}"),
            task_id: Some(task_id.to_string()),
            priority: "high".to_string(),
            ..SendMessage::request(sender_id, receiver_id, instructions)
        })?;
        self.store
            .update_task_status(task_id, crate::store::tasks::TaskStatus::Assigned, None)
            .map_err(|e| e.to_string())?;
        Ok(message)
    }

    pub fn mark_read(&self, message_id: &str) -> Result<(), String> {
        self.store
            .set_agent_message_status(message_id, AgentMessageStatus::Read)
            .map_err(|e| e.to_string())
    }

    pub fn acknowledge(&self, message_id: &str) -> Result<(), String> {
        self.store
            .set_agent_message_status(message_id, AgentMessageStatus::Acknowledged)
            .map_err(|e| e.to_string())
    }

    pub fn inbox(&self, agent_id: &str, unread_only: bool) -> Result<Vec<AgentMessage>, String> {
        self.store.list_inbox(agent_id, unread_only).map_err(|e| e.to_string())
    }

    pub fn sent(&self, agent_id: &str) -> Result<Vec<AgentMessage>, String> {
        self.store.list_sent(agent_id).map_err(|e| e.to_string())
    }

    pub fn thread_messages(&self, thread_id: &str) -> Result<Vec<AgentMessage>, String> {
        self.store.list_thread_messages(thread_id).map_err(|e| e.to_string())
    }

    pub fn unread_count(&self, agent_id: &str) -> Result<i64, String> {
        self.store.unread_count(agent_id).map_err(|e| e.to_string())
    }

    pub fn thread_for(
        &self,
        user_id: &str,
        participants: &[String],
        task_id: Option<&str>,
    ) -> Result<Thread, String> {
        self.store
            .get_or_create_thread(user_id, participants, task_id, "", "direct")
            .map_err(|e| e.to_string())
    }
}
