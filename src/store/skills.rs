//! Per-agent skill proficiency and its history.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

/// Default XP thresholds for levels 2..=4 (index = current level − 1).
pub const DEFAULT_THRESHOLDS: [i64; 4] = [100, 300, 600, 1000];

/// Highest reachable skill level.
pub const MAX_LEVEL: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Communication,
    Analysis,
    Automation,
    Integration,
    Management,
}

impl SkillCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Communication => "communication",
            Self::Analysis => "analysis",
            Self::Automation => "automation",
            Self::Integration => "integration",
            Self::Management => "management",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "communication" => Some(Self::Communication),
            "analysis" => Some(Self::Analysis),
            "automation" => Some(Self::Automation),
            "integration" => Some(Self::Integration),
            "management" => Some(Self::Management),
            _ => None,
        }
    }

    pub fn all() -> [Self; 5] {
        [
            Self::Communication,
            Self::Analysis,
            Self::Automation,
            Self::Integration,
            Self::Management,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub agent_id: String,
    pub category: SkillCategory,
    pub current_level: i64,
    pub xp: i64,
    pub thresholds: Vec<i64>,
    pub last_used_at: Option<String>,
}

impl Skill {
    /// XP needed for the next level, or `None` at the cap.
    pub fn next_threshold(&self) -> Option<i64> {
        if self.current_level >= MAX_LEVEL {
            return None;
        }
        self.thresholds
            .get((self.current_level - 1) as usize)
            .copied()
    }

    /// Threshold that had to be met to hold the current level.
    pub fn previous_threshold(&self) -> i64 {
        if self.current_level <= 1 {
            return 0;
        }
        self.thresholds
            .get((self.current_level - 2) as usize)
            .copied()
            .unwrap_or(0)
    }
}

fn row_to_skill(row: &Row<'_>) -> rusqlite::Result<Skill> {
    let category_str: String = row.get("category")?;
    Ok(Skill {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        category: SkillCategory::parse(&category_str).unwrap_or(SkillCategory::Communication),
        current_level: row.get("current_level")?,
        xp: row.get("xp")?,
        thresholds: serde_json::from_str(&row.get::<_, String>("thresholds")?)
            .unwrap_or_else(|_| DEFAULT_THRESHOLDS.to_vec()),
        last_used_at: row.get("last_used_at")?,
    })
}

impl Store {
    /// Fetch the agent's skill for `category`, creating a level-1 row on
    /// first touch.
    pub fn get_or_create_skill(
        &self,
        agent_id: &str,
        category: SkillCategory,
    ) -> Result<Skill, StoreError> {
        let conn = self.lock()?;
        let existing = conn
            .query_row(
                "SELECT * FROM agent_skills WHERE agent_id = ?1 AND category = ?2",
                params![agent_id, category.as_str()],
                row_to_skill,
            )
            .ok();
        if let Some(skill) = existing {
            return Ok(skill);
        }
        let skill = Skill {
            id: new_id(),
            agent_id: agent_id.to_string(),
            category,
            current_level: 1,
            xp: 0,
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            last_used_at: None,
        };
        conn.execute(
            "INSERT INTO agent_skills (id, agent_id, category, current_level, xp, thresholds, last_used_at, created_at) VALUES (?1,?2,?3,1,0,?4,NULL,?5)",
            params![
                skill.id,
                skill.agent_id,
                skill.category.as_str(),
                serde_json::to_string(&skill.thresholds).unwrap_or_else(|_| "[]".into()),
                now_rfc3339(),
            ],
        )?;
        Ok(skill)
    }

    pub fn list_skills(&self, agent_id: &str) -> Result<Vec<Skill>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT * FROM agent_skills WHERE agent_id = ?1 ORDER BY category")?;
        let rows = stmt.query_map(params![agent_id], row_to_skill)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Persist XP/level changes and stamp `last_used_at` when `touch` is set.
    pub fn update_skill(
        &self,
        skill_id: &str,
        xp: i64,
        level: i64,
        touch: bool,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE agent_skills SET xp = ?1, current_level = ?2, last_used_at = CASE WHEN ?3 THEN ?4 ELSE last_used_at END WHERE id = ?5",
            params![xp, level, touch, now_rfc3339(), skill_id],
        )?;
        Ok(())
    }

    /// Append a history row (level_up, level_down, decay, xp_award).
    pub fn log_skill_event(
        &self,
        agent_id: &str,
        category: SkillCategory,
        event_type: &str,
        from_level: Option<i64>,
        to_level: Option<i64>,
        xp_delta: i64,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO skill_history (id, agent_id, category, event_type, from_level, to_level, xp_delta, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                new_id(),
                agent_id,
                category.as_str(),
                event_type,
                from_level,
                to_level,
                xp_delta,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count_skill_events(
        &self,
        agent_id: &str,
        event_type: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM skill_history WHERE agent_id = ?1 AND event_type = ?2",
            params![agent_id, event_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
