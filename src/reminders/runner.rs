//! Reminder runner — the job-dispatcher side of a dispatch.
//!
//! Runs the dispatch unit for one task ID, re-invoking it with exponential
//! backoff while it reports `RetryableFailure`, and never lets two runs for
//! the same task ID overlap.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::reminders::dispatch::{DispatchOutcome, ReminderDispatcher};

/// Final result of running one occurrence through the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: DispatchOutcome,
    /// Dispatch attempts made, including the first.
    pub attempts: u32,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Removes a task ID from the in-flight set when the run ends. Attempts are
/// awaited inside the run, so an aborted run takes its dispatch down with it
/// before the slot is released.
struct InFlightGuard {
    in_flight: InFlight,
    task_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.task_id);
    }
}

/// Runs dispatches with retry bookkeeping.
pub struct ReminderRunner {
    dispatcher: Arc<ReminderDispatcher>,
    policy: RetryPolicy,
    in_flight: InFlight,
}

impl ReminderRunner {
    pub fn new(dispatcher: Arc<ReminderDispatcher>, policy: RetryPolicy) -> Self {
        Self {
            dispatcher,
            policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run one occurrence to a terminal outcome on the current task.
    ///
    /// Does not take the in-flight slot; use `spawn` when overlapping runs
    /// are possible.
    pub async fn run(&self, task_id: &str) -> RunReport {
        run_with_retry(Arc::clone(&self.dispatcher), self.policy.clone(), task_id).await
    }

    /// Start a background run for `task_id`.
    ///
    /// Returns `None` if a run for the same task ID is already in flight.
    pub fn spawn(&self, task_id: &str) -> Option<JoinHandle<RunReport>> {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !in_flight.insert(task_id.to_string()) {
                debug!(task_id = %task_id, "Reminder run already in flight");
                return None;
            }
        }

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            task_id: task_id.to_string(),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let policy = self.policy.clone();
        let task_id = task_id.to_string();

        Some(tokio::spawn(async move {
            let _guard = guard;
            run_with_retry(dispatcher, policy, &task_id).await
        }))
    }

    /// Whether a spawned run for `task_id` is still going.
    pub fn is_in_flight(&self, task_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(task_id)
    }

    /// Number of spawned runs still going.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

async fn run_with_retry(
    dispatcher: Arc<ReminderDispatcher>,
    policy: RetryPolicy,
    task_id: &str,
) -> RunReport {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = attempt_once(&dispatcher, &policy, task_id).await;

        if !outcome.is_retryable() {
            return RunReport {
                outcome,
                attempts: attempt,
            };
        }

        if attempt >= max_attempts {
            error!(
                task_id = %task_id,
                attempts = attempt,
                "Reminder still failing after max attempts; giving up for now"
            );
            return RunReport {
                outcome,
                attempts: attempt,
            };
        }

        let delay = policy.backoff(attempt);
        debug!(
            task_id = %task_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retrying reminder dispatch"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// One dispatch under the per-attempt timeout. Timeouts and panics are
/// transient from the dispatcher's point of view.
///
/// The dispatch is polled in place: on timeout it is dropped, and delivery
/// is synchronous, so a dispatch that already delivered always returns its
/// own outcome.
async fn attempt_once(
    dispatcher: &ReminderDispatcher,
    policy: &RetryPolicy,
    task_id: &str,
) -> DispatchOutcome {
    let dispatch = AssertUnwindSafe(dispatcher.dispatch(Some(task_id))).catch_unwind();

    match tokio::time::timeout(policy.dispatch_timeout, dispatch).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            warn!(task_id = %task_id, "Reminder dispatch panicked");
            DispatchOutcome::RetryableFailure
        }
        Err(_) => {
            warn!(
                task_id = %task_id,
                timeout_ms = policy.dispatch_timeout.as_millis() as u64,
                "Reminder dispatch timed out"
            );
            DispatchOutcome::RetryableFailure
        }
    }
}
