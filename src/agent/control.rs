//! Pause / interrupt registers and the per-trigger run locks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::event_bus::{AppEvent, EventBus};

/// Final thought used when a run exits on interrupt.
pub const INTERRUPTED_THOUGHT: &str = "Execution interrupted by user";

/// Shared control state polled by every reasoning run.
pub struct ControlRegisters {
    paused: Mutex<HashSet<String>>,
    interrupted: Mutex<HashSet<String>>,
    /// `agent_id:trigger` keys of runs currently past lock acquisition.
    running: Mutex<HashSet<String>>,
    bus: Option<Arc<dyn EventBus>>,
}

impl ControlRegisters {
    pub fn new(bus: Option<Arc<dyn EventBus>>) -> Self {
        Self {
            paused: Mutex::new(HashSet::new()),
            interrupted: Mutex::new(HashSet::new()),
            running: Mutex::new(HashSet::new()),
            bus,
        }
    }

    fn emit_status(&self, agent_id: &str, status: &str) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::AgenticStatusChanged {
                agent_id: agent_id.to_string(),
                status: status.to_string(),
            });
        }
    }

    // ── Pause / resume / interrupt ────────────────────────────────────────────

    pub fn pause(&self, agent_id: &str) {
        if let Ok(mut set) = self.paused.lock() {
            set.insert(agent_id.to_string());
        }
        self.emit_status(agent_id, "paused");
    }

    pub fn resume(&self, agent_id: &str) {
        if let Ok(mut set) = self.paused.lock() {
            set.remove(agent_id);
        }
        self.emit_status(agent_id, "resumed");
    }

    pub fn interrupt(&self, agent_id: &str) {
        if let Ok(mut set) = self.interrupted.lock() {
            set.insert(agent_id.to_string());
        }
        self.emit_status(agent_id, "interrupted");
    }

    pub fn is_paused(&self, agent_id: &str) -> bool {
        self.paused.lock().map(|s| s.contains(agent_id)).unwrap_or(false)
    }

    /// Check-and-clear: an interrupt applies to exactly one run.
    pub fn take_interrupt(&self, agent_id: &str) -> bool {
        self.interrupted
            .lock()
            .map(|mut s| s.remove(agent_id))
            .unwrap_or(false)
    }

    // ── Per-trigger run locks ─────────────────────────────────────────────────

    /// Try to mark `agent:trigger` as running.  Returns `false` if already held.
    pub fn try_lock(&self, lock_key: &str) -> bool {
        self.running
            .lock()
            .map(|mut s| s.insert(lock_key.to_string()))
            .unwrap_or(false)
    }

    pub fn is_locked(&self, lock_key: &str) -> bool {
        self.running.lock().map(|s| s.contains(lock_key)).unwrap_or(false)
    }

    pub fn unlock(&self, lock_key: &str) {
        if let Ok(mut s) = self.running.lock() {
            s.remove(lock_key);
        }
    }
}
