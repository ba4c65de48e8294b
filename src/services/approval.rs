//! Approval queue service: creation, resolution, contact scope, reply parsing,
//! and the expiry sweep.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use super::notifier::MasterNotificationService;
use crate::agent::types::TriggerContext;
use crate::event_bus::{AppEvent, EventBus};
use crate::store::agents::AgenticProfile;
use crate::store::approvals::{ApprovalPriority, ApprovalRequest, ApprovalStatus, ScopeType};
use crate::store::notifications::NotificationType;
use crate::store::{Store, StoreError, new_id, now_rfc3339};

// ─── Scope check result ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeCheck {
    pub allowed: bool,
    /// When the contact is out of scope, whether an approval should be raised
    /// (vs. silently dropping the interaction).
    pub requires_approval: bool,
}

// ─── Reply parsing ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalReply {
    Approve { id: Option<String> },
    Reject { id: Option<String>, reason: Option<String> },
    NotAReply,
}

/// Parse `APPROVE [#id]` / `REJECT [#id] [reason]`, case-insensitive.
/// `known_ids` disambiguates a reject's second token between an ID and the
/// start of a free-text reason.
pub fn parse_reply(message: &str, known_ids: &[String]) -> ApprovalReply {
    let trimmed = message.trim();
    let mut tokens = trimmed.split_whitespace();
    let Some(verb) = tokens.next() else {
        return ApprovalReply::NotAReply;
    };
    let verb = verb.to_lowercase();
    let rest: Vec<&str> = tokens.collect();

    let take_id = |token: &str| -> Option<String> {
        let candidate = token.trim_start_matches('#');
        known_ids
            .iter()
            .find(|id| *id == candidate || id.starts_with(candidate))
            .cloned()
    };

    match verb.as_str() {
        "approve" | "yes" | "ok" | "confirm" => {
            if rest.len() > 1 {
                return ApprovalReply::NotAReply; // trailing prose is not an approval
            }
            let id = rest.first().and_then(|t| take_id(t));
            if id.is_none() && !rest.is_empty() {
                return ApprovalReply::NotAReply;
            }
            ApprovalReply::Approve { id }
        }
        "reject" | "no" | "deny" | "decline" => {
            if rest.is_empty() {
                return ApprovalReply::Reject { id: None, reason: None };
            }
            match take_id(rest[0]) {
                Some(id) => {
                    let reason = (rest.len() > 1).then(|| rest[1..].join(" "));
                    ApprovalReply::Reject { id: Some(id), reason }
                }
                None => ApprovalReply::Reject {
                    id: None,
                    reason: Some(rest.join(" ")),
                },
            }
        }
        _ => ApprovalReply::NotAReply,
    }
}

// ─── ApprovalService ──────────────────────────────────────────────────────────

pub struct ApprovalService {
    store: Store,
    notifier: Arc<MasterNotificationService>,
    bus: Option<Arc<dyn EventBus>>,
}

impl ApprovalService {
    pub fn new(
        store: Store,
        notifier: Arc<MasterNotificationService>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Arc<Self> {
        Arc::new(Self { store, notifier, bus })
    }

    /// Queue a tool execution for human approval.
    ///
    /// Fails when the agent has no master contact configured.  The master
    /// notification is dispatched asynchronously so the reasoning loop never
    /// waits on delivery.
    pub fn create_tool_approval(
        &self,
        profile: &AgenticProfile,
        tool: &str,
        params: serde_json::Value,
        reasoning: Option<String>,
        confidence: Option<f64>,
        trigger_context: &TriggerContext,
        deadline_present: bool,
    ) -> Result<ApprovalRequest, String> {
        let master_contact_id = profile
            .master_contact_id
            .clone()
            .ok_or_else(|| format!("agent {} has no master contact configured", profile.id))?;

        let expires_at = (Utc::now()
            + chrono::Duration::minutes(profile.escalation_timeout_minutes.max(1)))
        .to_rfc3339();
        let priority = if deadline_present {
            ApprovalPriority::High
        } else {
            ApprovalPriority::Normal
        };

        let request = ApprovalRequest {
            id: new_id(),
            agent_id: profile.id.clone(),
            user_id: profile.user_id.clone(),
            action_type: "tool_execution".to_string(),
            action_title: format!("Execute {tool}"),
            action_description: format!(
                "{} wants to run {tool}",
                profile.name
            ),
            action_payload: serde_json::json!({"tool": tool, "params": params}),
            triggered_by: trigger_context.sender.clone(),
            trigger_context: serde_json::to_string(trigger_context).ok(),
            confidence_score: confidence,
            reasoning,
            master_contact_id,
            notification_channel: profile.notification_channel.clone(),
            status: ApprovalStatus::Pending,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            modified_payload: None,
            priority,
            expires_at: Some(expires_at),
            created_at: now_rfc3339(),
        };
        self.store.insert_approval(&request).map_err(|e| e.to_string())?;

        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::ApprovalQueued {
                approval_id: request.id.clone(),
                agent_id: request.agent_id.clone(),
                tool: tool.to_string(),
            });
        }

        // Fan the master notification out without blocking the caller.
        let notifier = Arc::clone(&self.notifier);
        let notify_request = request.clone();
        tokio::spawn(async move {
            let _ = notifier
                .notify(
                    &notify_request.user_id,
                    &notify_request.agent_id,
                    NotificationType::ApprovalNeeded,
                    &notify_request.action_title,
                    &format!(
                        "{}\nReply APPROVE {} or REJECT {} <reason>.",
                        notify_request.action_description,
                        notify_request.id,
                        notify_request.id
                    ),
                    &notify_request.notification_channel,
                    Some(&notify_request.master_contact_id),
                    Some(("approval", &notify_request.id)),
                )
                .await;
        });

        Ok(request)
    }

    pub fn list_pending(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        self.store.list_pending_approvals(user_id, limit, offset)
    }

    /// Approve a pending request.  Past-deadline requests transition to
    /// `expired` first and the approval fails.
    pub fn approve_action(
        &self,
        id: &str,
        resolved_by: &str,
        resolution_notes: Option<&str>,
        modified_payload: Option<serde_json::Value>,
    ) -> Result<ApprovalRequest, String> {
        self.resolve(id, ApprovalStatus::Approved, resolved_by, resolution_notes, modified_payload)
    }

    pub fn reject_action(
        &self,
        id: &str,
        resolved_by: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest, String> {
        self.resolve(id, ApprovalStatus::Rejected, resolved_by, reason, None)
    }

    fn resolve(
        &self,
        id: &str,
        status: ApprovalStatus,
        resolved_by: &str,
        resolution_notes: Option<&str>,
        modified_payload: Option<serde_json::Value>,
    ) -> Result<ApprovalRequest, String> {
        let request = self.store.get_approval(id).map_err(|e| e.to_string())?;
        if request.status != ApprovalStatus::Pending {
            return Err(format!(
                "approval {id} is {}, only pending requests can be resolved",
                request.status.as_str()
            ));
        }
        if let Some(expires_at) = &request.expires_at {
            if expires_at.as_str() < now_rfc3339().as_str() {
                let _ = self.store.resolve_approval(
                    id,
                    ApprovalStatus::Expired,
                    None,
                    Some("expired before resolution"),
                    None,
                );
                return Err(format!("approval {id} expired before it was resolved"));
            }
        }

        let changed = self
            .store
            .resolve_approval(id, status, Some(resolved_by), resolution_notes, modified_payload.as_ref())
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err(format!("approval {id} was resolved concurrently"));
        }
        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::ApprovalResolved {
                approval_id: id.to_string(),
                approved: status == ApprovalStatus::Approved,
            });
        }
        self.store.get_approval(id).map_err(|e| e.to_string())
    }

    /// Per-platform contact-scope cascade.
    pub fn check_contact_scope(
        &self,
        profile: &AgenticProfile,
        contact_id: &str,
        platform_account_id: Option<&str>,
    ) -> Result<ScopeCheck, String> {
        // The master contact is always allowed.
        if profile.master_contact_id.as_deref() == Some(contact_id) {
            return Ok(ScopeCheck { allowed: true, requires_approval: false });
        }

        let scope = self
            .store
            .get_contact_scope(&profile.id, platform_account_id)
            .map_err(|e| e.to_string())?;
        let Some(scope) = scope else {
            // No scope row configured: default to team-only semantics.
            let contact = self.store.get_contact(contact_id).map_err(|e| e.to_string())?;
            return Ok(ScopeCheck {
                allowed: contact.is_team_member,
                requires_approval: !contact.is_team_member,
            });
        };

        let contact = self.store.get_contact(contact_id).map_err(|e| e.to_string())?;
        if scope.allow_team_members && contact.is_team_member {
            return Ok(ScopeCheck { allowed: true, requires_approval: false });
        }

        let allowed = match scope.scope_type {
            ScopeType::Unrestricted | ScopeType::AllUserContacts => true,
            ScopeType::ContactsWhitelist => scope
                .allowed_contact_ids
                .iter()
                .any(|id| id == contact_id),
            ScopeType::ContactsTags => contact
                .tags
                .iter()
                .any(|tag| scope.allowed_tags.contains(tag)),
            ScopeType::TeamOnly => contact.is_team_member,
        };
        Ok(ScopeCheck {
            allowed,
            requires_approval: !allowed && scope.notify_on_out_of_scope,
        })
    }

    /// Build the trigger context for an `approval_resume` run: the original
    /// `{tool, params}` payload with any `modified_payload` keys overlaid
    /// onto `params`.
    pub fn build_resume_context(request: &ApprovalRequest) -> TriggerContext {
        let mut payload = request.action_payload.clone();
        if let (Some(params), Some(modified)) = (
            payload.get_mut("params").and_then(|p| p.as_object_mut()),
            request.modified_payload.as_ref().and_then(|m| m.as_object()),
        ) {
            for (key, value) in modified {
                params.insert(key.clone(), value.clone());
            }
        }
        TriggerContext {
            approved_payload: Some(payload),
            ..Default::default()
        }
    }

    /// Parse and apply an `APPROVE`/`REJECT` reply from a master contact.
    /// Without an explicit ID the most recent pending approval for that
    /// contact is targeted.
    pub fn process_approval_reply(
        &self,
        contact_id: &str,
        message: &str,
        user_id: &str,
    ) -> Result<Option<ApprovalRequest>, String> {
        let pending = self
            .store
            .list_pending_approvals(user_id, 100, 0)
            .map_err(|e| e.to_string())?;
        let known_ids: Vec<String> = pending
            .iter()
            .filter(|r| r.master_contact_id == contact_id)
            .map(|r| r.id.clone())
            .collect();

        let target_of = |explicit: Option<String>| -> Result<String, String> {
            match explicit {
                Some(id) => Ok(id),
                None => self
                    .store
                    .latest_pending_for_contact(contact_id, user_id)
                    .map_err(|e| e.to_string())?
                    .map(|r| r.id)
                    .ok_or_else(|| "no pending approval to resolve".to_string()),
            }
        };

        match parse_reply(message, &known_ids) {
            ApprovalReply::Approve { id } => {
                let id = target_of(id)?;
                self.approve_action(&id, contact_id, None, None).map(Some)
            }
            ApprovalReply::Reject { id, reason } => {
                let id = target_of(id)?;
                self.reject_action(&id, contact_id, reason.as_deref()).map(Some)
            }
            ApprovalReply::NotAReply => Ok(None),
        }
    }

    /// Sweep pending approvals past their deadline and notify the master.
    pub async fn process_expired_approvals(&self) -> Result<usize, String> {
        let expired = self
            .store
            .expire_overdue_approvals(&now_rfc3339())
            .map_err(|e| e.to_string())?;
        for id in &expired {
            let Ok(request) = self.store.get_approval(id) else { continue };
            if let Err(e) = self
                .notifier
                .notify(
                    &request.user_id,
                    &request.agent_id,
                    NotificationType::OutOfScope,
                    "Approval expired",
                    &format!("\"{}\" expired unanswered.", request.action_title),
                    &request.notification_channel,
                    Some(&request.master_contact_id),
                    Some(("approval", id)),
                )
                .await
            {
                warn!("expiry notification for {id} failed: {e}");
            }
        }
        Ok(expired.len())
    }
}
