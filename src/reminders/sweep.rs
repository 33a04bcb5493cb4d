//! Due sweep — finds due occurrences and hands each to the runner once.
//!
//! Runs on startup and then every `sweep_interval`. An occurrence is the pair
//! (task ID, due instant), so a rescheduled task fires again at its new time
//! and the next occurrence of a recurring task (a new row) fires on its own.
//!
//! Success and permanent failure are recorded in the ledger and never
//! dispatched again. A run that exhausts its retries is left unrecorded so
//! the next sweep tries the occurrence again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reminders::dispatch::DispatchOutcome;
use crate::reminders::runner::ReminderRunner;
use crate::store::ReminderLedger;

type Occurrence = (String, DateTime<Utc>);

/// Releases an occurrence from the pending set once its record is written.
struct PendingGuard {
    pending: Arc<Mutex<HashSet<Occurrence>>>,
    occurrence: Occurrence,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.occurrence);
    }
}

/// Periodic scan for due reminders.
pub struct DueSweep {
    ledger: Arc<dyn ReminderLedger>,
    runner: Arc<ReminderRunner>,
    /// Occurrences spawned but not yet recorded.
    pending: Arc<Mutex<HashSet<Occurrence>>>,
}

impl DueSweep {
    pub fn new(ledger: Arc<dyn ReminderLedger>, runner: Arc<ReminderRunner>) -> Self {
        Self {
            ledger,
            runner,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Single sweep: list due tasks, skip handled occurrences, spawn the
    /// rest. Returns one handle per spawned occurrence; each completes once
    /// the outcome has been recorded.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let due = match self.ledger.list_due_tasks(now).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Failed to list due tasks");
                return Vec::new();
            }
        };

        if due.is_empty() {
            debug!("No due reminders");
            return Vec::new();
        }

        let mut handles = Vec::new();
        for task in due {
            let occurrence: Occurrence = (task.id.clone(), task.due_at);

            if self.is_pending(&occurrence) {
                continue;
            }

            match self.ledger.has_dispatched(&task.id, task.due_at).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Failed to check dispatch ledger");
                    continue;
                }
            }

            let Some(run) = self.runner.spawn(&task.id) else {
                continue;
            };

            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(occurrence.clone());
            let guard = PendingGuard {
                pending: Arc::clone(&self.pending),
                occurrence,
            };

            let ledger = Arc::clone(&self.ledger);
            let due_at = task.due_at;
            let task_id = task.id;
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                let report = match run.await {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "Reminder run aborted");
                        return;
                    }
                };

                if report.outcome == DispatchOutcome::RetryableFailure {
                    return;
                }
                if let Err(e) = ledger.record_dispatch(&task_id, due_at, &report).await {
                    warn!(task_id = %task_id, error = %e, "Failed to record reminder dispatch");
                }
            }));
        }

        if !handles.is_empty() {
            info!(count = handles.len(), "Dispatching due reminders");
        }
        handles
    }

    fn is_pending(&self, occurrence: &Occurrence) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(occurrence)
    }
}

/// Spawn the sweep loop. The first tick fires immediately.
pub fn spawn_due_sweep(sweep: Arc<DueSweep>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Reminder sweep started (interval: {}s)", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            sweep.run_cycle(Utc::now()).await;
        }
    })
}
