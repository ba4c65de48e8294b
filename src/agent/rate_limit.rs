//! Per-agent reasoning-cycle rate limiter.
//!
//! A fixed one-hour window per agent: the first request (or the first after
//! the window lapses) resets the counter; beyond the cap the run is denied.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Window length.
const WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: usize,
    window_start: Instant,
    window_start_utc: DateTime<Utc>,
}

/// Read-only view for status queries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitStatus {
    pub used: usize,
    pub max: usize,
    pub resets_at: String,
}

pub struct RateLimiter {
    max_per_hour: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RateLimiter {
    pub fn new(max_per_hour: usize) -> Self {
        Self {
            max_per_hour,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a cycle attempt.  Returns `false` when the agent is over the cap.
    pub fn try_acquire(&self, agent_id: &str) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return true; // a poisoned limiter must not block the runtime
        };
        let now = Instant::now();
        match entries.get_mut(agent_id) {
            Some(entry) if now.duration_since(entry.window_start) < WINDOW => {
                if entry.count >= self.max_per_hour {
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                entries.insert(
                    agent_id.to_string(),
                    Entry {
                        count: 1,
                        window_start: now,
                        window_start_utc: Utc::now(),
                    },
                );
                true
            }
        }
    }

    pub fn status(&self, agent_id: &str) -> RateLimitStatus {
        let entries = match self.entries.lock() {
            Ok(e) => e,
            Err(_) => {
                return RateLimitStatus {
                    used: 0,
                    max: self.max_per_hour,
                    resets_at: Utc::now().to_rfc3339(),
                };
            }
        };
        match entries.get(agent_id) {
            Some(entry) if entry.window_start.elapsed() < WINDOW => RateLimitStatus {
                used: entry.count,
                max: self.max_per_hour,
                resets_at: (entry.window_start_utc + chrono::Duration::hours(1)).to_rfc3339(),
            },
            _ => RateLimitStatus {
                used: 0,
                max: self.max_per_hour,
                resets_at: Utc::now().to_rfc3339(),
            },
        }
    }
}
