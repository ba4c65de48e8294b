//! SQLite-backed [`Memory`] store.
//!
//! Recall is full-text (FTS5 with bm25 ranking) over entry content, scoped
//! per agent and filtered by expiry; blank queries fall back to an
//! importance-weighted recency scan.  All access is serialized through one
//! mutex-guarded connection, which keeps the store shareable across tasks
//! without fighting SQLite's single-writer rule.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use super::traits::{Memory, MemoryEntry, MemoryType};

// ─── Schema setup ─────────────────────────────────────────────────────────────

/// DDL executed when the store is opened.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    memory_type TEXT NOT NULL DEFAULT 'context',
    content TEXT NOT NULL,
    summary TEXT,
    importance REAL NOT NULL DEFAULT 0.5,
    valence REAL NOT NULL DEFAULT 0,
    related_entity TEXT,
    session_id TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    expires_at TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories (agent_id);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories (memory_type);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    content='memories',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES('delete', old.rowid, old.content);
END;
"#;

// ─── SqliteMemoryStore ────────────────────────────────────────────────────────

/// SQLite-backed, thread-safe memory store with FTS5 full-text recall.
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    /// Open the store at `path`, creating the file and schema on first use.
    pub fn open(path: &str) -> Result<Self, String> {
        let conn =
            Connection::open(path).map_err(|e| format!("memory db open failed: {e}"))?;
        // WAL keeps concurrent readers cheap while a write is in flight.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| format!("memory db pragma failed: {e}"))?;
        Self::bootstrap(conn)
    }

    /// Fully in-memory store, used by the test suites.
    pub fn in_memory() -> Result<Self, String> {
        Connection::open_in_memory()
            .map_err(|e| format!("memory db open failed: {e}"))
            .and_then(Self::bootstrap)
    }

    fn bootstrap(conn: Connection) -> Result<Self, String> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| format!("memory db schema failed: {e}"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, String> {
        match self.conn.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => Err(format!("memory db mutex poisoned: {poisoned}")),
        }
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>, score: f64) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        memory_type: MemoryType::parse(&row.get::<_, String>("memory_type")?),
        content: row.get("content")?,
        summary: row.get("summary")?,
        importance: row.get("importance")?,
        valence: row.get("valence")?,
        related_entity: row.get("related_entity")?,
        session_id: row.get("session_id")?,
        access_count: row.get("access_count")?,
        expires_at: row.get("expires_at")?,
        tags: serde_json::from_str(&row.get::<_, String>("tags")?).unwrap_or_default(),
        score,
        created_at: row.get("created_at")?,
    })
}

/// Escape a free-text query for an FTS5 MATCH: each token becomes a quoted
/// phrase, joined with OR so partial overlap still matches.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ─── Memory implementation ────────────────────────────────────────────────────

#[async_trait]
impl Memory for SqliteMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> Result<String, String> {
        let id = if entry.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            entry.id.clone()
        };
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO memories (id, agent_id, memory_type, content, summary,
                importance, valence, related_entity, session_id, access_count,
                expires_at, tags, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,0,?10,?11,?12)
            "#,
            params![
                id,
                entry.agent_id,
                entry.memory_type.to_string(),
                entry.content,
                entry.summary,
                entry.importance.clamp(0.0, 1.0),
                entry.valence.clamp(-1.0, 1.0),
                entry.related_entity,
                entry.session_id,
                entry.expires_at,
                serde_json::to_string(&entry.tags).unwrap_or_else(|_| "[]".into()),
                if entry.created_at.is_empty() {
                    Utc::now().to_rfc3339()
                } else {
                    entry.created_at.clone()
                },
            ],
        )
        .map_err(|e| format!("SQLite insert error: {e}"))?;
        Ok(id)
    }

    async fn recall(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, String> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;

        // Blank query: most recent entries, importance-weighted.
        let entries: Vec<MemoryEntry> = if query.trim().is_empty() {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM memories WHERE agent_id = ?1 AND (expires_at IS NULL OR expires_at > ?2) ORDER BY importance DESC, created_at DESC LIMIT ?3",
                )
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(params![agent_id, now, limit as i64], |row| {
                    row_to_entry(row, 0.5)
                })
                .map_err(|e| e.to_string())?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| e.to_string())?
        } else {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT m.*, bm25(memories_fts) AS rank
                    FROM memories_fts
                    JOIN memories m ON m.rowid = memories_fts.rowid
                    WHERE memories_fts MATCH ?1
                      AND m.agent_id = ?2
                      AND (m.expires_at IS NULL OR m.expires_at > ?3)
                    ORDER BY rank
                    LIMIT ?4
                    "#,
                )
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(
                    params![fts_query(query), agent_id, now, limit as i64],
                    |row| {
                        // bm25 rank is negative-better; negate and clamp to [0, 1].
                        let rank: f64 = row.get("rank")?;
                        row_to_entry(row, (-rank).clamp(0.0, 1.0))
                    },
                )
                .map_err(|e| e.to_string())?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| e.to_string())?
        };

        for entry in &entries {
            let _ = conn.execute(
                "UPDATE memories SET access_count = access_count + 1 WHERE id = ?1",
                params![entry.id],
            );
        }

        Ok(entries)
    }

    async fn forget(&self, id: &str) -> Result<bool, String> {
        let conn = self.lock()?;
        let n = conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id])
            .map_err(|e| format!("SQLite delete error: {e}"))?;
        Ok(n > 0)
    }

    async fn sweep_expired(&self) -> Result<usize, String> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(|e| format!("SQLite delete error: {e}"))?;
        Ok(n)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(agent_id: &str, content: &str) -> MemoryEntry {
        MemoryEntry {
            id: String::new(),
            agent_id: agent_id.to_string(),
            memory_type: MemoryType::Context,
            content: content.to_string(),
            summary: None,
            importance: 0.5,
            valence: 0.0,
            related_entity: None,
            session_id: None,
            access_count: 0,
            expires_at: None,
            tags: vec![],
            score: 0.0,
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn store_then_recall_by_content() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store
            .store(entry("a1", "The supplier Northwind prefers email contact"))
            .await
            .unwrap();
        store
            .store(entry("a1", "Weekly report goes out on Fridays"))
            .await
            .unwrap();

        let found = store.recall("a1", "supplier email", 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].content.contains("Northwind"));
    }

    #[tokio::test]
    async fn recall_is_scoped_per_agent() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store.store(entry("a1", "private fact about budget")).await.unwrap();

        let other = store.recall("a2", "budget", 5).await.unwrap();
        assert!(other.is_empty(), "a2 must not see a1's memories");
    }

    #[tokio::test]
    async fn recall_bumps_access_count() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store.store(entry("a1", "remember the vendor deadline")).await.unwrap();

        store.recall("a1", "vendor", 5).await.unwrap();
        let again = store.recall("a1", "vendor", 5).await.unwrap();
        assert_eq!(again[0].access_count, 1, "first recall already counted");
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_sweepable() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let mut e = entry("a1", "ephemeral note about standup");
        e.expires_at = Some("2020-01-01T00:00:00+00:00".to_string());
        store.store(e).await.unwrap();

        let found = store.recall("a1", "standup", 5).await.unwrap();
        assert!(found.is_empty(), "expired entries never surface");

        let swept = store.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn forget_removes_entry() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let id = store.store(entry("a1", "to be forgotten")).await.unwrap();
        assert!(store.forget(&id).await.unwrap());
        assert!(!store.forget(&id).await.unwrap());
    }

    #[test]
    fn fts_query_quotes_tokens() {
        assert_eq!(fts_query("rust async"), "\"rust\" OR \"async\"");
        assert_eq!(fts_query("  spaced   out "), "\"spaced\" OR \"out\"");
    }
}
