//! Store traits — the read-only accessor the dispatcher depends on, and the
//! ledger the due sweep uses to hand out each occurrence once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::reminders::{DispatchOutcome, RunReport};
use crate::tasks::{Plant, Task};

/// Point-in-time lookups of tasks and plants.
///
/// `Ok(None)` means the row does not exist (for example it was deleted after
/// the reminder was scheduled). `Err` is reserved for infrastructure faults.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch one task by ID.
    async fn get_task_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError>;

    /// Fetch one plant by ID.
    async fn get_plant_by_id(&self, id: &str) -> Result<Option<Plant>, DatabaseError>;
}

/// A recorded, terminal dispatch of one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub task_id: String,
    pub due_at: DateTime<Utc>,
    pub outcome: DispatchOutcome,
    pub attempts: u32,
    pub dispatched_at: DateTime<Utc>,
}

/// Dispatcher-side bookkeeping of which occurrences have been handled.
#[async_trait]
pub trait ReminderLedger: Send + Sync {
    /// Non-completed tasks whose `due_at` is at or before `now`, oldest first.
    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError>;

    /// Whether the occurrence `(task_id, due_at)` already has a record.
    async fn has_dispatched(
        &self,
        task_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Record the terminal report for an occurrence. Recording the same
    /// occurrence twice keeps the first record.
    async fn record_dispatch(
        &self,
        task_id: &str,
        due_at: DateTime<Utc>,
        report: &RunReport,
    ) -> Result<(), DatabaseError>;

    /// Fetch the record for an occurrence, if any.
    async fn get_dispatch(
        &self,
        task_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<Option<DispatchRecord>, DatabaseError>;
}
