//! User contacts referenced by scope checks and master-contact resolution.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, new_id, now_rfc3339};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub platform: Option<String>,
    pub is_team_member: bool,
    pub tags: Vec<String>,
    pub created_at: String,
}

impl Contact {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            platform: None,
            is_team_member: false,
            tags: Vec::new(),
            created_at: now_rfc3339(),
        }
    }
}

fn row_to_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        display_name: row.get("display_name")?,
        platform: row.get("platform")?,
        is_team_member: row.get::<_, i64>("is_team_member")? != 0,
        tags: serde_json::from_str(&row.get::<_, String>("tags")?).unwrap_or_default(),
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO contacts (id, user_id, display_name, platform, is_team_member, tags, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                contact.id,
                contact.user_id,
                contact.display_name,
                contact.platform,
                contact.is_team_member as i64,
                serde_json::to_string(&contact.tags).unwrap_or_else(|_| "[]".into()),
                contact.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, id: &str) -> Result<Contact, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM contacts WHERE id = ?1",
            params![id],
            row_to_contact,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("contact {id}"))
            }
            other => StoreError::Sqlite(other),
        })
    }

    pub fn count_team_members(&self, user_id: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM contacts WHERE user_id = ?1 AND is_team_member = 1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
