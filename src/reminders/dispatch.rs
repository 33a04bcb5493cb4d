//! Reminder dispatch unit — decides whether one task occurrence fires and,
//! if so, delivers it.
//!
//! Invoked once per occurrence with the task ID. Every path ends in exactly
//! one of three outcomes; no error escapes to the caller:
//!
//! | Condition                          | Outcome            |
//! |------------------------------------|--------------------|
//! | task ID missing or blank           | `PermanentFailure` |
//! | task no longer exists              | `PermanentFailure` |
//! | task already completed             | `Success` (silent) |
//! | task pending                       | deliver, `Success` |
//! | store error while fetching         | `RetryableFailure` |
//!
//! The unit never writes to the store and keeps no state between
//! invocations, so cancelling it mid-flight is always safe.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::notify::{ChannelRegistry, NotificationSink, build_payload};
use crate::store::TaskStore;

/// Terminal result of one dispatch invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Handled: the reminder was issued, or the task was already done.
    Success,
    /// Transient infrastructure fault; invoke again later.
    RetryableFailure,
    /// Retrying cannot help (malformed invocation or task deleted).
    PermanentFailure,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableFailure => "retryable_failure",
            Self::PermanentFailure => "permanent_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "retryable_failure" => Some(Self::RetryableFailure),
            "permanent_failure" => Some(Self::PermanentFailure),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableFailure)
    }

    /// Process exit status for a one-shot run: 0, 75 (`EX_TEMPFAIL`) or 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Success => 0,
            Self::RetryableFailure => 75,
            Self::PermanentFailure => 1,
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dependencies of the dispatch unit, injected explicitly.
pub struct ReminderDispatcher {
    store: Arc<dyn TaskStore>,
    channels: Arc<dyn ChannelRegistry>,
    sink: Arc<dyn NotificationSink>,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        channels: Arc<dyn ChannelRegistry>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            channels,
            sink,
        }
    }

    /// Run the due-check / fetch / build / deliver sequence for one task.
    pub async fn dispatch(&self, task_id: Option<&str>) -> DispatchOutcome {
        let Some(task_id) = task_id.map(str::trim).filter(|id| !id.is_empty()) else {
            warn!("Reminder invocation without a task id");
            return DispatchOutcome::PermanentFailure;
        };

        self.channels.ensure_channel();

        match self.fetch_and_deliver(task_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Reminder dispatch hit a store error; will retry");
                DispatchOutcome::RetryableFailure
            }
        }
    }

    async fn fetch_and_deliver(&self, task_id: &str) -> Result<DispatchOutcome, DatabaseError> {
        let Some(task) = self.store.get_task_by_id(task_id).await? else {
            info!(task_id = %task_id, "Task no longer exists; dropping reminder");
            return Ok(DispatchOutcome::PermanentFailure);
        };

        if task.is_completed {
            debug!(task_id = %task_id, "Task already completed; reminder suppressed");
            return Ok(DispatchOutcome::Success);
        }

        // The plant may have been deleted since the task was read; render
        // the generic reminder in that case.
        let plant = match task.plant_id.as_deref() {
            Some(plant_id) => self.store.get_plant_by_id(plant_id).await?,
            None => None,
        };

        let payload = build_payload(&task, plant.as_ref());
        if let Err(e) = self.sink.deliver(&payload) {
            warn!(
                task_id = %task_id,
                sink = self.sink.name(),
                error = %e,
                "Reminder delivery failed; not retrying"
            );
        } else {
            info!(task_id = %task_id, task_type = %task.task_type, "Reminder delivered");
        }

        Ok(DispatchOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::error::NotificationError;
    use crate::notify::{LocalChannelRegistry, ReminderPayload};
    use crate::tasks::{Plant, Task, TaskType};

    /// In-memory store with call counting and fault injection.
    #[derive(Default)]
    struct StubStore {
        tasks: HashMap<String, Task>,
        plants: HashMap<String, Plant>,
        fail_tasks: bool,
        fail_plants: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskStore for StubStore {
        async fn get_task_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_tasks {
                return Err(DatabaseError::Pool("database is locked".into()));
            }
            Ok(self.tasks.get(id).cloned())
        }

        async fn get_plant_by_id(&self, id: &str) -> Result<Option<Plant>, DatabaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_plants {
                return Err(DatabaseError::Query("disk I/O error".into()));
            }
            Ok(self.plants.get(id).cloned())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<ReminderPayload>>,
        refuse: bool,
    }

    impl NotificationSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn deliver(&self, payload: &ReminderPayload) -> Result<(), NotificationError> {
            self.delivered.lock().unwrap().push(payload.clone());
            if self.refuse {
                return Err(NotificationError::ChannelDisabled {
                    channel: "plant_task_reminders".into(),
                });
            }
            Ok(())
        }
    }

    struct Harness {
        store: Arc<StubStore>,
        sink: Arc<RecordingSink>,
        channels: Arc<LocalChannelRegistry>,
        dispatcher: ReminderDispatcher,
    }

    fn harness(store: StubStore, sink: RecordingSink) -> Harness {
        let store = Arc::new(store);
        let sink = Arc::new(sink);
        let channels = Arc::new(LocalChannelRegistry::new());
        let dispatcher = ReminderDispatcher::new(store.clone(), channels.clone(), sink.clone());
        Harness {
            store,
            sink,
            channels,
            dispatcher,
        }
    }

    fn store_with(tasks: Vec<Task>, plants: Vec<Plant>) -> StubStore {
        StubStore {
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            plants: plants.into_iter().map(|p| (p.id.clone(), p)).collect(),
            ..Default::default()
        }
    }

    impl Harness {
        fn delivered(&self) -> Vec<ReminderPayload> {
            self.sink.delivered.lock().unwrap().clone()
        }
    }

    #[test]
    fn outcome_exit_codes() {
        assert_eq!(DispatchOutcome::Success.exit_code(), 0);
        assert_eq!(DispatchOutcome::RetryableFailure.exit_code(), 75);
        assert_eq!(DispatchOutcome::PermanentFailure.exit_code(), 1);
    }

    #[tokio::test]
    async fn blank_id_is_permanent_without_store_access() {
        let h = harness(StubStore::default(), RecordingSink::default());
        for input in [None, Some(""), Some("   ")] {
            assert_eq!(h.dispatcher.dispatch(input).await, DispatchOutcome::PermanentFailure);
        }
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
        assert!(h.delivered().is_empty());
    }

    #[tokio::test]
    async fn missing_task_is_permanent() {
        let h = harness(StubStore::default(), RecordingSink::default());
        assert_eq!(
            h.dispatcher.dispatch(Some("t3")).await,
            DispatchOutcome::PermanentFailure
        );
        assert!(h.delivered().is_empty());
    }

    #[tokio::test]
    async fn completed_task_is_silent_success() {
        let task = Task::new(TaskType::Feeding, Utc::now()).with_id("t2").completed();
        let h = harness(store_with(vec![task], vec![]), RecordingSink::default());
        assert_eq!(h.dispatcher.dispatch(Some("t2")).await, DispatchOutcome::Success);
        assert!(h.delivered().is_empty());
    }

    #[tokio::test]
    async fn pending_task_with_plant_is_delivered() {
        let task = Task::new(TaskType::Watering, Utc::now()).with_id("t1").with_plant("p1");
        let plant = Plant::new("p1", "Blue Dream", "B12");
        let h = harness(store_with(vec![task], vec![plant]), RecordingSink::default());

        assert_eq!(h.dispatcher.dispatch(Some("t1")).await, DispatchOutcome::Success);

        let delivered = h.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].body.contains("Blue Dream"));
        assert!(delivered[0].body.contains("B12"));
        assert_eq!(delivered[0].target_id, "t1");
    }

    #[tokio::test]
    async fn surrounding_whitespace_in_id_is_ignored() {
        let task = Task::new(TaskType::Watering, Utc::now()).with_id("t1");
        let h = harness(store_with(vec![task], vec![]), RecordingSink::default());
        assert_eq!(h.dispatcher.dispatch(Some(" t1 ")).await, DispatchOutcome::Success);
        assert_eq!(h.delivered().len(), 1);
    }

    #[tokio::test]
    async fn dangling_plant_renders_generic_body() {
        let task = Task::new(TaskType::Watering, Utc::now()).with_id("t1").with_plant("gone");
        let h = harness(store_with(vec![task], vec![]), RecordingSink::default());

        assert_eq!(h.dispatcher.dispatch(Some("t1")).await, DispatchOutcome::Success);
        assert_eq!(h.delivered()[0].body, "Time to water your plants.");
    }

    #[tokio::test]
    async fn task_store_error_is_retryable() {
        let store = StubStore {
            fail_tasks: true,
            ..Default::default()
        };
        let h = harness(store, RecordingSink::default());
        assert_eq!(
            h.dispatcher.dispatch(Some("t5")).await,
            DispatchOutcome::RetryableFailure
        );
        assert!(h.delivered().is_empty());
    }

    #[tokio::test]
    async fn plant_store_error_is_retryable() {
        let task = Task::new(TaskType::Watering, Utc::now()).with_id("t1").with_plant("p1");
        let mut store = store_with(vec![task], vec![]);
        store.fail_plants = true;
        let h = harness(store, RecordingSink::default());

        assert_eq!(
            h.dispatcher.dispatch(Some("t1")).await,
            DispatchOutcome::RetryableFailure
        );
        assert!(h.delivered().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let task = Task::new(TaskType::Inspection, Utc::now()).with_id("t4");
        let sink = RecordingSink {
            refuse: true,
            ..Default::default()
        };
        let h = harness(store_with(vec![task], vec![]), sink);

        assert_eq!(h.dispatcher.dispatch(Some("t4")).await, DispatchOutcome::Success);
        assert_eq!(h.delivered().len(), 1);
    }

    #[tokio::test]
    async fn repeated_invocations_deliver_identical_payloads() {
        let task = Task::new(TaskType::Feeding, Utc::now()).with_id("t1").with_plant("p1");
        let plant = Plant::new("p1", "Gelato", "G4");
        let h = harness(store_with(vec![task], vec![plant]), RecordingSink::default());

        h.dispatcher.dispatch(Some("t1")).await;
        h.dispatcher.dispatch(Some("t1")).await;

        let delivered = h.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0], delivered[1]);
    }

    #[tokio::test]
    async fn channel_is_ensured_before_delivery() {
        let h = harness(StubStore::default(), RecordingSink::default());
        assert!(h.channels.is_empty());
        h.dispatcher.dispatch(Some("missing")).await;
        h.dispatcher.dispatch(Some("missing")).await;
        assert_eq!(h.channels.len(), 1);
    }

    #[test]
    fn outcome_strings_roundtrip() {
        for outcome in [
            DispatchOutcome::Success,
            DispatchOutcome::RetryableFailure,
            DispatchOutcome::PermanentFailure,
        ] {
            assert_eq!(DispatchOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(DispatchOutcome::parse("bogus"), None);
    }
}
