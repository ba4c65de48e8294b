//! Core types and the `Memory` trait for the memory subsystem.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── MemoryType ───────────────────────────────────────────────────────────────

/// Semantic classification of a memory entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Conversation,
    Transaction,
    Decision,
    Learning,
    Context,
    Entity,
    Preference,
    SharedLearning,
    PlanExecution,
    Reflection,
    /// Anything a tool invents that the runtime does not model.
    Custom(String),
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Transaction => write!(f, "transaction"),
            Self::Decision => write!(f, "decision"),
            Self::Learning => write!(f, "learning"),
            Self::Context => write!(f, "context"),
            Self::Entity => write!(f, "entity"),
            Self::Preference => write!(f, "preference"),
            Self::SharedLearning => write!(f, "shared_learning"),
            Self::PlanExecution => write!(f, "plan_execution"),
            Self::Reflection => write!(f, "reflection"),
            Self::Custom(s) => write!(f, "custom:{s}"),
        }
    }
}

impl MemoryType {
    pub fn parse(s: &str) -> Self {
        match s {
            "conversation" => Self::Conversation,
            "transaction" => Self::Transaction,
            "decision" => Self::Decision,
            "learning" => Self::Learning,
            "context" => Self::Context,
            "entity" => Self::Entity,
            "preference" => Self::Preference,
            "shared_learning" => Self::SharedLearning,
            "plan_execution" => Self::PlanExecution,
            "reflection" => Self::Reflection,
            other => Self::Custom(
                other.strip_prefix("custom:").unwrap_or(other).to_owned(),
            ),
        }
    }
}

// ─── MemoryEntry ──────────────────────────────────────────────────────────────

/// A single memory record returned by [`Memory::recall()`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier.
    pub id: String,
    /// Owning agent.
    pub agent_id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub summary: Option<String>,
    /// Importance in [0, 1].
    pub importance: f64,
    /// Emotional valence in [−1, 1].
    pub valence: f64,
    /// Related entity (contact, task, plan, …), if any.
    pub related_entity: Option<String>,
    pub session_id: Option<String>,
    pub access_count: i64,
    /// `None` means permanent.
    pub expires_at: Option<String>,
    pub tags: Vec<String>,
    /// Relevance score in [0, 1] — populated by recall, higher is better.
    pub score: f64,
    pub created_at: String,
}

// ─── Memory trait ─────────────────────────────────────────────────────────────

/// Abstraction over an agent's memory store.
///
/// Implementations may back the store with SQLite FTS, a remote vector
/// database, or an in-process map in tests.  All retrieval operations must
/// return results sorted by descending `score`.  The vector side is eventually
/// consistent with the relational side; recall tolerates missing embeddings.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Store a new memory entry and return its ID.
    async fn store(&self, entry: MemoryEntry) -> Result<String, String>;

    /// Search an agent's memories matching `query`.
    ///
    /// Returns at most `limit` non-expired entries sorted by descending
    /// relevance, bumping each returned entry's `access_count`.
    async fn recall(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, String>;

    /// Remove an entry by ID.  Returns `true` if it was found and removed.
    async fn forget(&self, id: &str) -> Result<bool, String>;

    /// Drop expired entries; returns how many were removed.
    async fn sweep_expired(&self) -> Result<usize, String>;
}
