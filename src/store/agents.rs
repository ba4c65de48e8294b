//! Agentic profiles — the agents themselves.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

// ─── Autonomy ─────────────────────────────────────────────────────────────────

/// Default approval stance for an agent's tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Autonomy {
    /// Every tool call requires approval.
    #[default]
    #[serde(rename = "supervised")]
    Supervised,
    /// Safe tools auto-execute; everything else is queued.
    #[serde(rename = "semi-autonomous")]
    SemiAutonomous,
    /// Everything auto-executes except explicit per-agent overrides.
    #[serde(rename = "autonomous")]
    Autonomous,
}

impl Autonomy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supervised => "supervised",
            Self::SemiAutonomous => "semi-autonomous",
            Self::Autonomous => "autonomous",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "autonomous" => Self::Autonomous,
            "semi-autonomous" => Self::SemiAutonomous,
            _ => Self::Supervised,
        }
    }
}

// ─── AgentStatus ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Running,
    Paused,
    Deactivated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Deactivated => "deactivated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "deactivated" => Self::Deactivated,
            _ => Self::Active,
        }
    }
}

// ─── AgenticProfile ───────────────────────────────────────────────────────────

/// A configured agent, owned by a user.
///
/// Deactivated profiles are retained for audit, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticProfile {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub role: String,
    pub system_prompt: String,
    pub autonomy: Autonomy,
    pub status: AgentStatus,
    /// `None` means "use the task router" for provider/model selection.
    pub ai_provider: Option<String>,
    pub ai_model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub master_contact_id: Option<String>,
    pub master_contact_name: Option<String>,
    pub notification_channel: String,
    pub notify_on: Vec<String>,
    pub escalation_timeout_minutes: i64,
    /// Explicit per-agent approval overrides (tool IDs).
    pub require_approval_for: Vec<String>,
    pub can_create_children: bool,
    pub max_children: u32,
    pub hierarchy_depth: u32,
    pub parent_agent_id: Option<String>,
    pub daily_budget_usd: f64,
    pub daily_budget_used: f64,
    pub interaction_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl AgenticProfile {
    /// Minimal profile used by tests and by agent creation before the caller
    /// fills in specifics.
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            name: name.into(),
            role: String::new(),
            system_prompt: String::new(),
            autonomy: Autonomy::Supervised,
            status: AgentStatus::Active,
            ai_provider: None,
            ai_model: None,
            temperature: None,
            max_tokens: None,
            master_contact_id: None,
            master_contact_name: None,
            notification_channel: "email".to_string(),
            notify_on: Vec::new(),
            escalation_timeout_minutes: 60,
            require_approval_for: Vec::new(),
            can_create_children: false,
            max_children: 0,
            hierarchy_depth: 0,
            parent_agent_id: None,
            daily_budget_usd: 0.0,
            daily_budget_used: 0.0,
            interaction_count: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

fn json_vec(s: String) -> Vec<String> {
    serde_json::from_str(&s).unwrap_or_default()
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<AgenticProfile> {
    Ok(AgenticProfile {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        role: row.get("role")?,
        system_prompt: row.get("system_prompt")?,
        autonomy: Autonomy::parse(&row.get::<_, String>("autonomy")?),
        status: AgentStatus::parse(&row.get::<_, String>("status")?),
        ai_provider: row.get("ai_provider")?,
        ai_model: row.get("ai_model")?,
        temperature: row.get("temperature")?,
        max_tokens: row.get::<_, Option<i64>>("max_tokens")?.map(|v| v as u32),
        master_contact_id: row.get("master_contact_id")?,
        master_contact_name: row.get("master_contact_name")?,
        notification_channel: row.get("notification_channel")?,
        notify_on: json_vec(row.get("notify_on")?),
        escalation_timeout_minutes: row.get("escalation_timeout_minutes")?,
        require_approval_for: json_vec(row.get("require_approval_for")?),
        can_create_children: row.get::<_, i64>("can_create_children")? != 0,
        max_children: row.get::<_, i64>("max_children")? as u32,
        hierarchy_depth: row.get::<_, i64>("hierarchy_depth")? as u32,
        parent_agent_id: row.get("parent_agent_id")?,
        daily_budget_usd: row.get("daily_budget_usd")?,
        daily_budget_used: row.get("daily_budget_used")?,
        interaction_count: row.get("interaction_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

// ─── Repository ───────────────────────────────────────────────────────────────

impl Store {
    pub fn insert_agent(&self, profile: &AgenticProfile) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO agents (
                id, user_id, name, role, system_prompt, autonomy, status,
                ai_provider, ai_model, temperature, max_tokens,
                master_contact_id, master_contact_name, notification_channel,
                notify_on, escalation_timeout_minutes, require_approval_for,
                can_create_children, max_children, hierarchy_depth, parent_agent_id,
                daily_budget_usd, daily_budget_used, interaction_count,
                created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26)
            "#,
            params![
                profile.id,
                profile.user_id,
                profile.name,
                profile.role,
                profile.system_prompt,
                profile.autonomy.as_str(),
                profile.status.as_str(),
                profile.ai_provider,
                profile.ai_model,
                profile.temperature,
                profile.max_tokens.map(i64::from),
                profile.master_contact_id,
                profile.master_contact_name,
                profile.notification_channel,
                serde_json::to_string(&profile.notify_on).unwrap_or_else(|_| "[]".into()),
                profile.escalation_timeout_minutes,
                serde_json::to_string(&profile.require_approval_for)
                    .unwrap_or_else(|_| "[]".into()),
                profile.can_create_children as i64,
                i64::from(profile.max_children),
                i64::from(profile.hierarchy_depth),
                profile.parent_agent_id,
                profile.daily_budget_usd,
                profile.daily_budget_used,
                profile.interaction_count,
                profile.created_at,
                profile.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<AgenticProfile, StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT * FROM agents WHERE id = ?1", params![id], |row| {
            row_to_profile(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("agent {id}"))
            }
            other => StoreError::Sqlite(other),
        })
    }

    pub fn list_agents_for_user(&self, user_id: &str) -> Result<Vec<AgenticProfile>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM agents WHERE user_id = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![user_id], row_to_profile)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Agents eligible for scheduling and collaboration.
    pub fn list_active_agents_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<AgenticProfile>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM agents WHERE user_id = ?1 AND status IN ('active','running') ORDER BY name",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_profile)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_agent_status(&self, id: &str, status: AgentStatus) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Bump the interaction counter driving the familiarity band.
    pub fn increment_interaction_count(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE agents SET interaction_count = interaction_count + 1, updated_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Atomically add `amount` to the agent's spent daily budget and return
    /// the new `(used, budget)` pair.
    pub fn add_daily_budget_used(&self, id: &str, amount: f64) -> Result<(f64, f64), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE agents SET daily_budget_used = daily_budget_used + ?1, updated_at = ?2 WHERE id = ?3",
            params![amount, now_rfc3339(), id],
        )?;
        let pair = conn.query_row(
            "SELECT daily_budget_used, daily_budget_usd FROM agents WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(pair)
    }

    /// Daily maintenance: zero every agent's spent budget.  Usage-log history
    /// is unaffected.
    pub fn reset_daily_budgets(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE agents SET daily_budget_used = 0, updated_at = ?1",
            params![now_rfc3339()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let store = Store::in_memory().unwrap();
        let mut profile = AgenticProfile::new("u1", "Atlas");
        profile.autonomy = Autonomy::SemiAutonomous;
        profile.require_approval_for = vec!["sendEmail".to_string()];
        profile.master_contact_id = Some("c1".to_string());
        store.insert_agent(&profile).unwrap();

        let loaded = store.get_agent(&profile.id).unwrap();
        assert_eq!(loaded.name, "Atlas");
        assert_eq!(loaded.autonomy, Autonomy::SemiAutonomous);
        assert_eq!(loaded.require_approval_for, vec!["sendEmail"]);
        assert_eq!(loaded.master_contact_id.as_deref(), Some("c1"));
    }

    #[test]
    fn missing_agent_is_not_found() {
        let store = Store::in_memory().unwrap();
        assert!(matches!(
            store.get_agent("nope"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn budget_increment_returns_new_totals() {
        let store = Store::in_memory().unwrap();
        let mut profile = AgenticProfile::new("u1", "Atlas");
        profile.daily_budget_usd = 1.0;
        profile.daily_budget_used = 0.99;
        store.insert_agent(&profile).unwrap();

        let (used, budget) = store.add_daily_budget_used(&profile.id, 0.05).unwrap();
        assert!((used - 1.04).abs() < 1e-9);
        assert!((budget - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reset_daily_budgets_zeroes_used() {
        let store = Store::in_memory().unwrap();
        let mut profile = AgenticProfile::new("u1", "Atlas");
        profile.daily_budget_used = 5.0;
        store.insert_agent(&profile).unwrap();

        store.reset_daily_budgets().unwrap();
        let loaded = store.get_agent(&profile.id).unwrap();
        assert_eq!(loaded.daily_budget_used, 0.0);
    }

    #[test]
    fn autonomy_parse_round_trip() {
        for a in [Autonomy::Supervised, Autonomy::SemiAutonomous, Autonomy::Autonomous] {
            assert_eq!(Autonomy::parse(a.as_str()), a);
        }
    }
}
