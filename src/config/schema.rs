//! TOML configuration schema for the Colony runtime.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `~/.colony/config.toml`:
//! ```toml
//! [loop]
//! timeout_ms = 240000
//! max_responds_per_run = 2
//!
//! [scheduler]
//! check_interval_ms = 60000
//! max_concurrent_jobs = 5
//!
//! [budget]
//! warning_ratio = 0.8
//!
//! [classifier]
//! ai_override = false
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── LoopConfig ───────────────────────────────────────────────────────────────

/// Settings for the agent reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Hard wall-clock timeout for a reasoning run, in milliseconds.
    /// Overridden by `REASONING_LOOP_TIMEOUT_MS`.
    pub timeout_ms: u64,
    /// Maximum `respond` deliveries per run.
    pub max_responds_per_run: u32,
    /// How long an `incoming_message` trigger waits for a held lock, in seconds.
    pub lock_wait_secs: u64,
    /// Poll interval while waiting for a held lock, in seconds.
    pub lock_poll_secs: u64,
    /// Reasoning cycles allowed per agent per sliding hour.
    pub max_cycles_per_hour: usize,
    /// Per-tier iteration budget overrides: tier name → (max_iterations, max_tool_calls).
    pub budget_overrides: HashMap<String, (u32, u32)>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 240_000,
            max_responds_per_run: 2,
            lock_wait_secs: 30,
            lock_poll_secs: 3,
            max_cycles_per_hour: 20,
            budget_overrides: HashMap::new(),
        }
    }
}

// ─── SchedulerConfig ──────────────────────────────────────────────────────────

/// Settings for the recurring job engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often due jobs are checked, in milliseconds.
    pub check_interval_ms: u64,
    /// Maximum schedules executing simultaneously.
    pub max_concurrent_jobs: usize,
    /// Hard per-job timeout, in milliseconds.
    /// Overridden by `SCHEDULER_JOB_TIMEOUT_MS`.
    pub job_timeout_ms: u64,
    /// Delay applied per past-due schedule at startup, in seconds.
    pub stagger_step_secs: i64,
    /// Maximum wait for an AI-concurrency slot, in seconds.
    pub semaphore_wait_secs: u64,
    /// Size of the global AI-concurrency semaphore.
    pub ai_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            max_concurrent_jobs: 5,
            job_timeout_ms: 300_000,
            stagger_step_secs: 30,
            semaphore_wait_secs: 30,
            ai_concurrency: 4,
        }
    }
}

// ─── BudgetConfig ─────────────────────────────────────────────────────────────

/// Daily budget thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Fraction of the daily budget that triggers a warning notification.
    pub warning_ratio: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { warning_ratio: 0.8 }
    }
}

// ─── ClassifierConfig ─────────────────────────────────────────────────────────

/// Settings for the task classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClassifierConfig {
    /// When `true`, an AI call may override the locally computed tier.
    /// The override replaces the tier only; scores are preserved.
    pub ai_override: bool,
}

// ─── StoreConfig ──────────────────────────────────────────────────────────────

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file.  Empty string selects the default
    /// data directory (`~/.colony/colony.db`).
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
        }
    }
}

// ─── RuntimeConfig ────────────────────────────────────────────────────────────

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(rename = "loop")]
    pub loop_: LoopConfig,
    pub scheduler: SchedulerConfig,
    pub budget: BudgetConfig,
    pub classifier: ClassifierConfig,
    pub store: StoreConfig,
}
