//! Database-backed recurring job engine.
//!
//! `Scheduler` drives a background task that wakes on a fixed interval, scans
//! the `schedules` table for due rows, executes their action handlers under a
//! global AI-concurrency semaphore, records `job_history`, and reschedules.
//!
//! ## Restart recovery (in `start()`, each step best-effort)
//! 1. Backfill `next_run_at` for active interval schedules where it is NULL.
//! 2. Rewrite orphaned `running` job rows to `failed`.
//! 3. Stagger past-due schedules by 30 s per backlog position.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::actions::ActionHandlers;
use crate::config::SchedulerConfig;
use crate::event_bus::{AppEvent, EventBus};
use crate::store::Store;
use crate::store::jobs::JobStatus;
use crate::store::schedules::{AgenticSchedule, ScheduleType};

/// Delay before the first tick after `start()`.
const FIRST_TICK_DELAY_SECS: u64 = 5;

// ─── Dispatcher ───────────────────────────────────────────────────────────────

/// The clonable core handed to every spawned job — everything needed to run,
/// record, and reschedule one firing.
#[derive(Clone)]
struct Dispatcher {
    store: Store,
    handlers: Arc<ActionHandlers>,
    bus: Option<Arc<dyn EventBus>>,
    config: SchedulerConfig,
    running_jobs: Arc<Mutex<HashSet<String>>>,
    ai_semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    /// One tick: launch every due job up to the concurrency cap.  Jobs run
    /// detached; the returned handles exist for tests and shutdown draining.
    fn check_due_jobs(&self) -> Vec<JoinHandle<()>> {
        let running = match self.running_jobs.lock() {
            Ok(guard) => guard.len(),
            Err(_) => return Vec::new(),
        };
        let capacity = self.config.max_concurrent_jobs.saturating_sub(running);
        if capacity == 0 {
            return Vec::new();
        }

        let due = match self
            .store
            .list_due_schedules(&Utc::now().to_rfc3339(), capacity)
        {
            Ok(due) => due,
            Err(e) => {
                warn!("scheduler: due query failed: {e}");
                return Vec::new();
            }
        };

        let mut handles = Vec::new();
        for schedule in due {
            // In-memory guard against double selection while a run is live.
            {
                let Ok(mut guard) = self.running_jobs.lock() else { continue };
                if !guard.insert(schedule.id.clone()) {
                    continue;
                }
            }
            let dispatcher = self.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.execute_job(schedule).await;
            }));
        }
        handles
    }

    async fn execute_job(&self, schedule: AgenticSchedule) {
        let started = std::time::Instant::now();
        let job_id = match self.store.start_job_history(
            &schedule.id,
            &schedule.agent_id,
            &schedule.action_type,
            schedule.next_run_at.as_deref(),
        ) {
            Ok(id) => id,
            Err(e) => {
                warn!("scheduler: job row insert failed for {}: {e}", schedule.id);
                self.release(&schedule.id);
                return;
            }
        };

        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::ScheduleFired {
                schedule_id: schedule.id.clone(),
                agent_id: schedule.agent_id.clone(),
                action_type: schedule.action_type.clone(),
            });
        }

        // Every action-handler call holds an AI-concurrency slot.
        let permit = tokio::time::timeout(
            Duration::from_secs(self.config.semaphore_wait_secs),
            Arc::clone(&self.ai_semaphore).acquire_owned(),
        )
        .await;
        let _permit = match permit {
            Ok(Ok(permit)) => permit,
            _ => {
                self.finish(
                    &schedule,
                    &job_id,
                    JobStatus::Failed,
                    started.elapsed().as_millis() as i64,
                    None,
                    Some("AI concurrency slot unavailable after 30 s"),
                    0,
                    None,
                    None,
                );
                self.release(&schedule.id);
                return;
            }
        };

        let job_timeout = Duration::from_millis(self.config.job_timeout_ms);
        let outcome =
            tokio::time::timeout(job_timeout, self.handlers.handle(&schedule)).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(Ok(result)) => {
                self.finish(
                    &schedule,
                    &job_id,
                    JobStatus::Success,
                    duration_ms,
                    Some(&result.summary),
                    None,
                    result.tokens_used as i64,
                    result.provider.as_deref(),
                    result.model.as_deref(),
                );
            }
            Ok(Err(error)) => {
                self.finish(
                    &schedule,
                    &job_id,
                    JobStatus::Failed,
                    duration_ms,
                    None,
                    Some(&error),
                    0,
                    None,
                    None,
                );
            }
            Err(_elapsed) => {
                self.finish(
                    &schedule,
                    &job_id,
                    JobStatus::Failed,
                    duration_ms,
                    None,
                    Some(&format!(
                        "Job timed out after {} ms",
                        self.config.job_timeout_ms
                    )),
                    0,
                    None,
                    None,
                );
            }
        }
        self.release(&schedule.id);
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        schedule: &AgenticSchedule,
        job_id: &str,
        status: JobStatus,
        duration_ms: i64,
        summary: Option<&str>,
        error: Option<&str>,
        tokens: i64,
        provider: Option<&str>,
        model: Option<&str>,
    ) {
        if let Err(e) = self.store.finish_job_history(
            job_id, status, duration_ms, summary, error, tokens, provider, model,
        ) {
            warn!("scheduler: job row update failed for {job_id}: {e}");
        }

        // Failed or not, the schedule gets its next slot.
        let next = Scheduler::compute_next_run(schedule).map(|dt| dt.to_rfc3339());
        let deactivate = schedule.schedule_type == ScheduleType::Once;
        if let Err(e) =
            self.store
                .complete_schedule_run(&schedule.id, next.as_deref(), deactivate)
        {
            warn!("scheduler: reschedule failed for {}: {e}", schedule.id);
        }

        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::JobFinished {
                schedule_id: schedule.id.clone(),
                status: status.as_str().to_string(),
                duration_ms,
            });
            if status == JobStatus::Failed {
                let _ = bus.publish(AppEvent::SystemError {
                    message: format!(
                        "Scheduled job {} ({}) failed: {}",
                        schedule.id,
                        schedule.action_type,
                        error.unwrap_or("unknown")
                    ),
                });
            }
        }
    }

    fn release(&self, schedule_id: &str) {
        if let Ok(mut guard) = self.running_jobs.lock() {
            guard.remove(schedule_id);
        }
    }
}

// ─── Scheduler ────────────────────────────────────────────────────────────────

pub struct Scheduler {
    dispatcher: Dispatcher,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        handlers: Arc<ActionHandlers>,
        bus: Option<Arc<dyn EventBus>>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let ai_semaphore = Arc::new(Semaphore::new(config.ai_concurrency.max(1)));
        Arc::new(Self {
            dispatcher: Dispatcher {
                store,
                handlers,
                bus,
                config,
                running_jobs: Arc::new(Mutex::new(HashSet::new())),
                ai_semaphore,
            },
            stop_tx,
            stop_rx,
        })
    }

    /// Next fire time for a schedule, from now.
    ///
    /// Cron accepts 5-field (min hr dom mon dow) or 6-field (with seconds)
    /// expressions.  `once`/`event` return `None` — they do not recur.
    pub fn compute_next_run(schedule: &AgenticSchedule) -> Option<DateTime<Utc>> {
        match schedule.schedule_type {
            ScheduleType::Interval => schedule
                .interval_minutes
                .filter(|m| *m > 0)
                .map(|m| Utc::now() + chrono::Duration::minutes(m)),
            ScheduleType::Cron => {
                let expr = schedule.cron_expression.as_deref()?;
                let full_expr = if expr.split_whitespace().count() == 5 {
                    format!("0 {expr}")
                } else {
                    expr.to_string()
                };
                cron::Schedule::from_str(&full_expr).ok()?.upcoming(Utc).next()
            }
            ScheduleType::Once | ScheduleType::Event => None,
        }
    }

    /// Restart recovery + background tick loop.
    pub async fn start(&self) {
        let store = &self.dispatcher.store;
        match store.backfill_interval_next_runs() {
            Ok(n) if n > 0 => info!("scheduler: backfilled next_run_at for {n} interval schedule(s)"),
            Ok(_) => {}
            Err(e) => warn!("scheduler: backfill failed: {e}"),
        }
        match store.fail_orphaned_jobs() {
            Ok(n) if n > 0 => info!("scheduler: failed {n} orphaned running job(s)"),
            Ok(_) => {}
            Err(e) => warn!("scheduler: orphan recovery failed: {e}"),
        }
        if let Err(e) = self.stagger_past_due() {
            warn!("scheduler: staggering failed: {e}");
        }

        let dispatcher = self.dispatcher.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(FIRST_TICK_DELAY_SECS)).await;
            let mut ticker = tokio::time::interval(Duration::from_millis(
                dispatcher.config.check_interval_ms.max(1000),
            ));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        dispatcher.check_due_jobs();
                    }
                    Ok(()) = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// One synchronous tick (also used by tests).
    pub fn check_due_jobs(&self) -> Vec<JoinHandle<()>> {
        self.dispatcher.check_due_jobs()
    }

    /// Spread the restart backlog: past-due schedules fire `i · 30 s` apart,
    /// oldest first.  Long backlogs produce long tails; that is accepted.
    fn stagger_past_due(&self) -> Result<usize, String> {
        let now = Utc::now();
        let past_due = self
            .dispatcher
            .store
            .list_past_due_schedules(&now.to_rfc3339())
            .map_err(|e| e.to_string())?;
        for (i, schedule) in past_due.iter().enumerate() {
            let next = now
                + chrono::Duration::seconds(self.dispatcher.config.stagger_step_secs * i as i64);
            self.dispatcher
                .store
                .set_schedule_next_run(&schedule.id, Some(&next.to_rfc3339()))
                .map_err(|e| e.to_string())?;
        }
        if !past_due.is_empty() {
            info!("scheduler: staggered {} past-due schedule(s)", past_due.len());
        }
        Ok(past_due.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::loop_::test_support::ScriptedRouter;
    use crate::ai::types::AiResponse;
    use crate::scheduler::actions::test_support::handlers_fixture;
    use crate::store::agents::AgenticProfile;
    use crate::store::schedules::AgenticSchedule;

    fn due_now(schedule: &mut AgenticSchedule) {
        schedule.next_run_at = Some((Utc::now() - chrono::Duration::seconds(1)).to_rfc3339());
    }

    async fn drain(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn scheduler_with(
        store: &Store,
        responses: Vec<AiResponse>,
        config: SchedulerConfig,
    ) -> Arc<Scheduler> {
        let handlers = handlers_fixture(store.clone(), ScriptedRouter::new(responses));
        Scheduler::new(store.clone(), handlers, None, config)
    }

    fn insert_agent(store: &Store) -> String {
        let profile = AgenticProfile::new("u1", "Atlas");
        store.insert_agent(&profile).unwrap();
        profile.id
    }

    #[test]
    fn next_run_per_type() {
        let interval = AgenticSchedule::interval("u1", "a1", "check_messages", 30);
        let next = Scheduler::compute_next_run(&interval).unwrap();
        assert!(next > Utc::now() + chrono::Duration::minutes(29));

        let cron5 = AgenticSchedule::cron("u1", "a1", "send_report", "0 9 * * *");
        assert!(Scheduler::compute_next_run(&cron5).is_some(), "5-field cron accepted");

        let cron6 = AgenticSchedule::cron("u1", "a1", "send_report", "0 0 9 * * *");
        assert!(Scheduler::compute_next_run(&cron6).is_some(), "6-field cron accepted");

        let bad = AgenticSchedule::cron("u1", "a1", "send_report", "not cron");
        assert!(Scheduler::compute_next_run(&bad).is_none());

        let mut once = AgenticSchedule::interval("u1", "a1", "custom_prompt", 1);
        once.schedule_type = ScheduleType::Once;
        assert!(Scheduler::compute_next_run(&once).is_none());
    }

    #[tokio::test]
    async fn due_job_runs_and_records_history() {
        let store = Store::in_memory().unwrap();
        let agent_id = insert_agent(&store);
        let mut schedule = AgenticSchedule::interval("u1", &agent_id, "check_messages", 15);
        due_now(&mut schedule);
        store.insert_schedule(&schedule).unwrap();

        let scheduler = scheduler_with(&store, vec![], SchedulerConfig::default());
        drain(scheduler.check_due_jobs()).await;

        let history = store.list_job_history_for_schedule(&schedule.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Success);
        assert!(history[0].duration_ms.is_some());

        let reloaded = store.get_schedule(&schedule.id).unwrap();
        assert!(reloaded.last_run_at.is_some());
        let next = reloaded.next_run().unwrap();
        assert!(next > Utc::now() + chrono::Duration::minutes(14), "rescheduled");
    }

    #[tokio::test]
    async fn once_schedule_deactivates_after_firing() {
        let store = Store::in_memory().unwrap();
        let agent_id = insert_agent(&store);
        let mut schedule = AgenticSchedule::interval("u1", &agent_id, "check_messages", 1);
        schedule.schedule_type = ScheduleType::Once;
        schedule.interval_minutes = None;
        due_now(&mut schedule);
        store.insert_schedule(&schedule).unwrap();

        let scheduler = scheduler_with(&store, vec![], SchedulerConfig::default());
        drain(scheduler.check_due_jobs()).await;

        let reloaded = store.get_schedule(&schedule.id).unwrap();
        assert!(!reloaded.is_active);
        assert!(reloaded.next_run_at.is_none());
    }

    #[tokio::test]
    async fn concurrency_cap_limits_launches() {
        let store = Store::in_memory().unwrap();
        let agent_id = insert_agent(&store);
        for _ in 0..4 {
            let mut schedule =
                AgenticSchedule::interval("u1", &agent_id, "check_messages", 15);
            due_now(&mut schedule);
            store.insert_schedule(&schedule).unwrap();
        }

        let config = SchedulerConfig {
            max_concurrent_jobs: 2,
            ..Default::default()
        };
        let scheduler = scheduler_with(&store, vec![], config);
        let handles = scheduler.check_due_jobs();
        assert_eq!(handles.len(), 2, "capacity bounds the launch batch");
        drain(handles).await;
    }

    #[tokio::test]
    async fn failed_handler_still_reschedules() {
        let store = Store::in_memory().unwrap();
        let agent_id = insert_agent(&store);
        // custom_prompt without a prompt configured fails in the handler.
        let mut schedule = AgenticSchedule::interval("u1", &agent_id, "custom_prompt", 10);
        due_now(&mut schedule);
        store.insert_schedule(&schedule).unwrap();

        let scheduler = scheduler_with(&store, vec![], SchedulerConfig::default());
        drain(scheduler.check_due_jobs()).await;

        let history = store.list_job_history_for_schedule(&schedule.id, 10).unwrap();
        assert_eq!(history[0].status, JobStatus::Failed);
        assert!(history[0].error_message.is_some());

        let reloaded = store.get_schedule(&schedule.id).unwrap();
        assert!(reloaded.next_run_at.is_some(), "failure still reschedules");
    }

    #[tokio::test]
    async fn restart_recovery_rewrites_orphans_and_staggers() {
        let store = Store::in_memory().unwrap();
        let agent_id = insert_agent(&store);

        // Orphaned running row from a dead process.
        let orphan_job = store
            .start_job_history("s-dead", &agent_id, "reasoning_cycle", None)
            .unwrap();

        // Two past-due schedules.
        let mut first = AgenticSchedule::interval("u1", &agent_id, "check_messages", 5);
        first.next_run_at = Some("2020-01-01T00:00:00+00:00".to_string());
        let mut second = AgenticSchedule::interval("u1", &agent_id, "send_report", 5);
        second.next_run_at = Some("2020-01-02T00:00:00+00:00".to_string());
        store.insert_schedule(&first).unwrap();
        store.insert_schedule(&second).unwrap();

        let scheduler = scheduler_with(&store, vec![], SchedulerConfig::default());
        scheduler.start().await;
        scheduler.stop();

        let recovered = store.get_job_history(&orphan_job).unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert_eq!(
            recovered.error_message.as_deref(),
            Some("Server restarted while job was running")
        );

        // Oldest past-due fires first; the second is 30 s later.
        let first_next = store.get_schedule(&first.id).unwrap().next_run().unwrap();
        let second_next = store.get_schedule(&second.id).unwrap().next_run().unwrap();
        let gap = (second_next - first_next).num_seconds();
        assert!((29..=31).contains(&gap), "stagger gap was {gap}s");
        assert!(first_next >= Utc::now() - chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn inactive_agent_schedules_are_not_selected() {
        let store = Store::in_memory().unwrap();
        let mut profile = AgenticProfile::new("u1", "Atlas");
        profile.status = crate::store::agents::AgentStatus::Deactivated;
        store.insert_agent(&profile).unwrap();

        let mut schedule = AgenticSchedule::interval("u1", &profile.id, "check_messages", 5);
        due_now(&mut schedule);
        store.insert_schedule(&schedule).unwrap();

        let scheduler = scheduler_with(&store, vec![], SchedulerConfig::default());
        let handles = scheduler.check_due_jobs();
        assert!(handles.is_empty());
    }
}
