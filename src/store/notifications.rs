//! Master notifications — outbound alerts to an agent's master contact.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ApprovalNeeded,
    DailyReport,
    CriticalError,
    BudgetWarning,
    BudgetExceeded,
    TaskCompleted,
    OutOfScope,
    Test,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalNeeded => "approval_needed",
            Self::DailyReport => "daily_report",
            Self::CriticalError => "critical_error",
            Self::BudgetWarning => "budget_warning",
            Self::BudgetExceeded => "budget_exceeded",
            Self::TaskCompleted => "task_completed",
            Self::OutOfScope => "out_of_scope",
            Self::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approval_needed" => Self::ApprovalNeeded,
            "daily_report" => Self::DailyReport,
            "critical_error" => Self::CriticalError,
            "budget_warning" => Self::BudgetWarning,
            "budget_exceeded" => Self::BudgetExceeded,
            "task_completed" => Self::TaskCompleted,
            "out_of_scope" => Self::OutOfScope,
            _ => Self::Test,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterNotification {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub content: String,
    /// Priority and action metadata.
    pub context: serde_json::Value,
    pub channel: String,
    pub delivery_status: DeliveryStatus,
    pub delivery_attempts: i64,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub created_at: String,
}

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<MasterNotification> {
    Ok(MasterNotification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        agent_id: row.get("agent_id")?,
        notification_type: NotificationType::parse(&row.get::<_, String>("notification_type")?),
        title: row.get("title")?,
        content: row.get("content")?,
        context: serde_json::from_str(&row.get::<_, String>("context")?)
            .unwrap_or(serde_json::Value::Null),
        channel: row.get("channel")?,
        delivery_status: DeliveryStatus::parse(&row.get::<_, String>("delivery_status")?),
        delivery_attempts: row.get("delivery_attempts")?,
        sent_at: row.get("sent_at")?,
        delivered_at: row.get("delivered_at")?,
        read_at: row.get("read_at")?,
        reference_type: row.get("reference_type")?,
        reference_id: row.get("reference_id")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn insert_master_notification(
        &self,
        notification: &MasterNotification,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO master_notifications (
                id, user_id, agent_id, notification_type, title, content, context,
                channel, delivery_status, delivery_attempts, sent_at, delivered_at,
                read_at, reference_type, reference_id, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)
            "#,
            params![
                notification.id,
                notification.user_id,
                notification.agent_id,
                notification.notification_type.as_str(),
                notification.title,
                notification.content,
                notification.context.to_string(),
                notification.channel,
                notification.delivery_status.as_str(),
                notification.delivery_attempts,
                notification.sent_at,
                notification.delivered_at,
                notification.read_at,
                notification.reference_type,
                notification.reference_id,
                notification.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_master_notification(&self, id: &str) -> Result<MasterNotification, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM master_notifications WHERE id = ?1",
            params![id],
            row_to_notification,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("notification {id}"))
            }
            other => StoreError::Sqlite(other),
        })
    }

    /// Record a delivery attempt and its outcome.
    pub fn mark_notification_delivery(
        &self,
        id: &str,
        status: DeliveryStatus,
    ) -> Result<(), StoreError> {
        let now = now_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE master_notifications
            SET delivery_status = ?1,
                delivery_attempts = delivery_attempts + 1,
                sent_at = CASE WHEN ?1 IN ('sent','delivered') AND sent_at IS NULL THEN ?2 ELSE sent_at END,
                delivered_at = CASE WHEN ?1 = 'delivered' THEN ?2 ELSE delivered_at END
            WHERE id = ?3
            "#,
            params![status.as_str(), now, id],
        )?;
        Ok(())
    }

    pub fn list_notifications_for_agent(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<MasterNotification>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM master_notifications WHERE agent_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, limit as i64], row_to_notification)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
