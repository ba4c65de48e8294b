//! Approval queue rows and contact-scope configuration.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }
}

/// Priority for the pending queue ordering: urgent > high > normal > low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl ApprovalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "urgent" => Self::Urgent,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub action_type: String,
    pub action_title: String,
    pub action_description: String,
    /// `{ "tool": …, "params": … }`
    pub action_payload: serde_json::Value,
    pub triggered_by: Option<String>,
    pub trigger_context: Option<String>,
    pub confidence_score: Option<f64>,
    pub reasoning: Option<String>,
    pub master_contact_id: String,
    pub notification_channel: String,
    pub status: ApprovalStatus,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
    pub resolution_notes: Option<String>,
    pub modified_payload: Option<serde_json::Value>,
    pub priority: ApprovalPriority,
    pub expires_at: Option<String>,
    pub created_at: String,
}

fn row_to_approval(row: &Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    Ok(ApprovalRequest {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        user_id: row.get("user_id")?,
        action_type: row.get("action_type")?,
        action_title: row.get("action_title")?,
        action_description: row.get("action_description")?,
        action_payload: serde_json::from_str(&row.get::<_, String>("action_payload")?)
            .unwrap_or(serde_json::Value::Null),
        triggered_by: row.get("triggered_by")?,
        trigger_context: row.get("trigger_context")?,
        confidence_score: row.get("confidence_score")?,
        reasoning: row.get("reasoning")?,
        master_contact_id: row.get("master_contact_id")?,
        notification_channel: row.get("notification_channel")?,
        status: ApprovalStatus::parse(&row.get::<_, String>("status")?),
        resolved_by: row.get("resolved_by")?,
        resolved_at: row.get("resolved_at")?,
        resolution_notes: row.get("resolution_notes")?,
        modified_payload: row
            .get::<_, Option<String>>("modified_payload")?
            .and_then(|s| serde_json::from_str(&s).ok()),
        priority: ApprovalPriority::parse(&row.get::<_, String>("priority")?),
        expires_at: row.get("expires_at")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn insert_approval(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO approval_queue (
                id, agent_id, user_id, action_type, action_title, action_description,
                action_payload, triggered_by, trigger_context, confidence_score,
                reasoning, master_contact_id, notification_channel, status,
                resolved_by, resolved_at, resolution_notes, modified_payload,
                priority, expires_at, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
            "#,
            params![
                request.id,
                request.agent_id,
                request.user_id,
                request.action_type,
                request.action_title,
                request.action_description,
                request.action_payload.to_string(),
                request.triggered_by,
                request.trigger_context,
                request.confidence_score,
                request.reasoning,
                request.master_contact_id,
                request.notification_channel,
                request.status.as_str(),
                request.resolved_by,
                request.resolved_at,
                request.resolution_notes,
                request.modified_payload.as_ref().map(|v| v.to_string()),
                request.priority.as_str(),
                request.expires_at,
                request.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_approval(&self, id: &str) -> Result<ApprovalRequest, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM approval_queue WHERE id = ?1",
            params![id],
            row_to_approval,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("approval {id}"))
            }
            other => StoreError::Sqlite(other),
        })
    }

    /// Pending approvals ordered urgent → low, newest first within a priority.
    pub fn list_pending_approvals(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM approval_queue
            WHERE user_id = ?1 AND status = 'pending'
            ORDER BY CASE priority
                        WHEN 'urgent' THEN 0
                        WHEN 'high' THEN 1
                        WHEN 'normal' THEN 2
                        ELSE 3
                     END,
                     created_at DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64, offset as i64], row_to_approval)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recent pending approval whose master contact matches — target of
    /// an ID-less `APPROVE`/`REJECT` reply.
    pub fn latest_pending_for_contact(
        &self,
        master_contact_id: &str,
        user_id: &str,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT * FROM approval_queue WHERE master_contact_id = ?1 AND user_id = ?2 AND status = 'pending' ORDER BY created_at DESC LIMIT 1",
                params![master_contact_id, user_id],
                row_to_approval,
            )
            .ok();
        Ok(found)
    }

    /// Guarded status transition: only a `pending` row may move.  Returns the
    /// number of rows changed (0 when the guard failed).
    pub fn resolve_approval(
        &self,
        id: &str,
        status: ApprovalStatus,
        resolved_by: Option<&str>,
        resolution_notes: Option<&str>,
        modified_payload: Option<&serde_json::Value>,
    ) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n = conn.execute(
            r#"
            UPDATE approval_queue
            SET status = ?1, resolved_by = ?2, resolved_at = ?3,
                resolution_notes = ?4,
                modified_payload = COALESCE(?5, modified_payload)
            WHERE id = ?6 AND status = 'pending'
            "#,
            params![
                status.as_str(),
                resolved_by,
                now_rfc3339(),
                resolution_notes,
                modified_payload.map(|v| v.to_string()),
                id
            ],
        )?;
        Ok(n)
    }

    /// Sweep: every pending row past its deadline becomes `expired`.  Returns
    /// the expired IDs so callers can notify.
    pub fn expire_overdue_approvals(&self, now: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM approval_queue WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![now], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        for id in &ids {
            conn.execute(
                "UPDATE approval_queue SET status = 'expired', resolved_at = ?1 WHERE id = ?2 AND status = 'pending'",
                params![now, id],
            )?;
        }
        Ok(ids)
    }
}

// ─── Contact scope ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Unrestricted,
    AllUserContacts,
    ContactsWhitelist,
    ContactsTags,
    TeamOnly,
}

impl ScopeType {
    pub fn parse(s: &str) -> Self {
        match s {
            "unrestricted" => Self::Unrestricted,
            "all_user_contacts" => Self::AllUserContacts,
            "contacts_whitelist" => Self::ContactsWhitelist,
            "contacts_tags" => Self::ContactsTags,
            _ => Self::TeamOnly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrestricted => "unrestricted",
            Self::AllUserContacts => "all_user_contacts",
            Self::ContactsWhitelist => "contacts_whitelist",
            Self::ContactsTags => "contacts_tags",
            Self::TeamOnly => "team_only",
        }
    }
}

/// Per-agent contact scope row.  A `platform_account_id = NULL` row is the
/// default; platform-specific rows take precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactScope {
    pub id: String,
    pub agent_id: String,
    pub platform_account_id: Option<String>,
    pub scope_type: ScopeType,
    pub allow_team_members: bool,
    pub allowed_contact_ids: Vec<String>,
    pub allowed_tags: Vec<String>,
    pub notify_on_out_of_scope: bool,
}

fn row_to_scope(row: &Row<'_>) -> rusqlite::Result<ContactScope> {
    Ok(ContactScope {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        platform_account_id: row.get("platform_account_id")?,
        scope_type: ScopeType::parse(&row.get::<_, String>("scope_type")?),
        allow_team_members: row.get::<_, i64>("allow_team_members")? != 0,
        allowed_contact_ids: serde_json::from_str(
            &row.get::<_, String>("allowed_contact_ids")?,
        )
        .unwrap_or_default(),
        allowed_tags: serde_json::from_str(&row.get::<_, String>("allowed_tags")?)
            .unwrap_or_default(),
        notify_on_out_of_scope: row.get::<_, i64>("notify_on_out_of_scope")? != 0,
    })
}

impl Store {
    pub fn insert_contact_scope(&self, scope: &ContactScope) -> Result<(), StoreError> {
        let id = if scope.id.is_empty() { new_id() } else { scope.id.clone() };
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO contact_scopes (id, agent_id, platform_account_id, scope_type,
                allow_team_members, allowed_contact_ids, allowed_tags,
                notify_on_out_of_scope, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
            "#,
            params![
                id,
                scope.agent_id,
                scope.platform_account_id,
                scope.scope_type.as_str(),
                scope.allow_team_members as i64,
                serde_json::to_string(&scope.allowed_contact_ids)
                    .unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&scope.allowed_tags).unwrap_or_else(|_| "[]".into()),
                scope.notify_on_out_of_scope as i64,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Platform cascade: prefer the platform-specific row, fall back to the
    /// default row (NULL platform).
    pub fn get_contact_scope(
        &self,
        agent_id: &str,
        platform_account_id: Option<&str>,
    ) -> Result<Option<ContactScope>, StoreError> {
        let conn = self.lock()?;
        if let Some(account) = platform_account_id {
            let specific = conn
                .query_row(
                    "SELECT * FROM contact_scopes WHERE agent_id = ?1 AND platform_account_id = ?2",
                    params![agent_id, account],
                    row_to_scope,
                )
                .ok();
            if specific.is_some() {
                return Ok(specific);
            }
        }
        Ok(conn
            .query_row(
                "SELECT * FROM contact_scopes WHERE agent_id = ?1 AND platform_account_id IS NULL",
                params![agent_id],
                row_to_scope,
            )
            .ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(store: &Store, priority: ApprovalPriority) -> ApprovalRequest {
        let request = ApprovalRequest {
            id: new_id(),
            agent_id: "a1".to_string(),
            user_id: "u1".to_string(),
            action_type: "tool_execution".to_string(),
            action_title: "Send email".to_string(),
            action_description: String::new(),
            action_payload: serde_json::json!({"tool": "sendEmail", "params": {}}),
            triggered_by: None,
            trigger_context: None,
            confidence_score: None,
            reasoning: None,
            master_contact_id: "c1".to_string(),
            notification_channel: "email".to_string(),
            status: ApprovalStatus::Pending,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            modified_payload: None,
            priority,
            expires_at: None,
            created_at: now_rfc3339(),
        };
        store.insert_approval(&request).unwrap();
        request
    }

    #[test]
    fn pending_ordering_is_priority_then_recency() {
        let store = Store::in_memory().unwrap();
        pending(&store, ApprovalPriority::Low);
        let urgent = pending(&store, ApprovalPriority::Urgent);
        pending(&store, ApprovalPriority::Normal);

        let list = store.list_pending_approvals("u1", 10, 0).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].id, urgent.id, "urgent first");
        assert_eq!(list[2].priority, ApprovalPriority::Low);
    }

    #[test]
    fn resolve_guard_rejects_non_pending() {
        let store = Store::in_memory().unwrap();
        let request = pending(&store, ApprovalPriority::Normal);

        let first = store
            .resolve_approval(&request.id, ApprovalStatus::Approved, Some("u1"), None, None)
            .unwrap();
        assert_eq!(first, 1);

        // Second transition is a no-op: the row is no longer pending.
        let second = store
            .resolve_approval(&request.id, ApprovalStatus::Rejected, Some("u1"), None, None)
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            store.get_approval(&request.id).unwrap().status,
            ApprovalStatus::Approved
        );
    }

    #[test]
    fn expiry_sweep_targets_overdue_pending_only() {
        let store = Store::in_memory().unwrap();
        let mut overdue = pending(&store, ApprovalPriority::Normal);
        overdue.expires_at = Some("2020-01-01T00:00:00+00:00".to_string());
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE approval_queue SET expires_at = ?1 WHERE id = ?2",
                params![overdue.expires_at, overdue.id],
            )
            .unwrap();
        }
        let fresh = pending(&store, ApprovalPriority::Normal);

        let expired = store
            .expire_overdue_approvals(&now_rfc3339())
            .unwrap();
        assert_eq!(expired, vec![overdue.id.clone()]);
        assert_eq!(
            store.get_approval(&fresh.id).unwrap().status,
            ApprovalStatus::Pending
        );
    }

    #[test]
    fn scope_cascade_prefers_platform_row() {
        let store = Store::in_memory().unwrap();
        store
            .insert_contact_scope(&ContactScope {
                id: new_id(),
                agent_id: "a1".to_string(),
                platform_account_id: None,
                scope_type: ScopeType::TeamOnly,
                allow_team_members: true,
                allowed_contact_ids: vec![],
                allowed_tags: vec![],
                notify_on_out_of_scope: true,
            })
            .unwrap();
        store
            .insert_contact_scope(&ContactScope {
                id: new_id(),
                agent_id: "a1".to_string(),
                platform_account_id: Some("wa-1".to_string()),
                scope_type: ScopeType::Unrestricted,
                allow_team_members: true,
                allowed_contact_ids: vec![],
                allowed_tags: vec![],
                notify_on_out_of_scope: false,
            })
            .unwrap();

        let specific = store.get_contact_scope("a1", Some("wa-1")).unwrap().unwrap();
        assert_eq!(specific.scope_type, ScopeType::Unrestricted);

        let fallback = store.get_contact_scope("a1", Some("tg-9")).unwrap().unwrap();
        assert_eq!(fallback.scope_type, ScopeType::TeamOnly);
    }
}
