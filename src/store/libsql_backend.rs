//! libSQL backend — async `TaskStore` and `ReminderLedger` implementation.
//!
//! Supports local file and in-memory databases. Besides the read-only
//! lookups the dispatcher uses, it carries the task/plant writes the rest of
//! the application (and the tests) need, including materializing the next
//! occurrence of a recurring task when one is completed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::reminders::{DispatchOutcome, RunReport};
use crate::store::migrations;
use crate::store::traits::{DispatchRecord, ReminderLedger, TaskStore};
use crate::tasks::{Plant, Recurrence, RecurrenceUnit, Task, TaskType};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run all pending schema migrations.
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Plants ──────────────────────────────────────────────────────

    pub async fn insert_plant(&self, plant: &Plant) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO plants (id, strain_name, batch_number) VALUES (?1, ?2, ?3)",
                params![
                    plant.id.as_str(),
                    plant.strain_name.as_str(),
                    plant.batch_number.as_str()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_plant: {e}")))?;
        debug!(plant_id = %plant.id, "Plant inserted");
        Ok(())
    }

    /// Delete a plant. Tasks referencing it keep their dangling `plant_id`.
    pub async fn delete_plant(&self, id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute("DELETE FROM plants WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_plant: {e}")))?;
        Ok(affected > 0)
    }

    // ── Tasks ───────────────────────────────────────────────────────

    pub async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
        insert_task_on(self.conn(), task).await
    }

    /// Overwrite every mutable field of an existing task.
    pub async fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let (repeat_interval, repeat_unit) = recurrence_columns(task.recurrence);
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET task_type = ?1, title = ?2, due_at = ?3, is_completed = ?4,
                 repeat_interval = ?5, repeat_unit = ?6, plant_id = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    task.task_type.as_str(),
                    task.title.clone(),
                    ts(&task.due_at),
                    task.is_completed as i64,
                    repeat_interval,
                    repeat_unit,
                    task.plant_id.clone(),
                    ts(&Utc::now()),
                    task.id.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task".into(),
                id: task.id.clone(),
            });
        }
        Ok(())
    }

    /// Mark a task completed. For a recurring task the next occurrence is
    /// inserted and returned. Completing an already-completed task is a
    /// no-op and materializes nothing.
    ///
    /// The completion and the insert commit together: if the next
    /// occurrence cannot be written the task stays pending.
    pub async fn complete_task(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_task begin: {e}")))?;

        let next = match complete_on(&tx, id).await {
            Ok(next) => next,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(task_id = %id, error = %rb, "Rollback of complete_task failed");
                }
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_task commit: {e}")))?;

        if let Some(next) = &next {
            info!(
                task_id = %id,
                next_task_id = %next.id,
                next_due_at = %next.due_at,
                "Materialized next occurrence"
            );
        }
        Ok(next)
    }

    pub async fn delete_task(&self, id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        Ok(affected > 0)
    }

    /// All tasks, soonest due first.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY due_at ASC, id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;
        collect_tasks(rows, "list_tasks").await
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn insert_task_on(conn: &Connection, task: &Task) -> Result<(), DatabaseError> {
    let (repeat_interval, repeat_unit) = recurrence_columns(task.recurrence);
    conn.execute(
        &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            task.id.as_str(),
            task.task_type.as_str(),
            task.title.clone(),
            ts(&task.due_at),
            task.is_completed as i64,
            repeat_interval,
            repeat_unit,
            task.plant_id.clone(),
            ts(&task.created_at),
            ts(&task.updated_at),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;
    debug!(task_id = %task.id, task_type = %task.task_type, "Task inserted");
    Ok(())
}

async fn fetch_task(conn: &Connection, id: &str) -> Result<Option<Task>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_task_by_id: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("get_task_by_id row: {e}"))),
    }
}

/// Completion steps of `complete_task`, run inside its transaction.
async fn complete_on(conn: &Connection, id: &str) -> Result<Option<Task>, DatabaseError> {
    let affected = conn
        .execute(
            "UPDATE tasks SET is_completed = 1, updated_at = ?1 WHERE id = ?2 AND is_completed = 0",
            params![ts(&Utc::now()), id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("complete_task: {e}")))?;

    let task = fetch_task(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "task".into(),
            id: id.to_string(),
        })?;

    if affected == 0 {
        debug!(task_id = %id, "Task already completed");
        return Ok(None);
    }

    let Some(recurrence) = task.recurrence else {
        return Ok(None);
    };
    let next = task.next_occurrence().ok_or_else(|| {
        DatabaseError::Serialization(format!(
            "next occurrence of task {id} ({recurrence:?} after {}) is out of range",
            task.due_at
        ))
    })?;
    insert_task_on(conn, &next).await?;
    Ok(Some(next))
}

/// Canonical timestamp text: fixed-width RFC 3339 so that string order
/// matches time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn recurrence_columns(recurrence: Option<Recurrence>) -> (Option<i64>, Option<String>) {
    match recurrence {
        Some(Recurrence::Every { interval, unit }) => {
            (Some(i64::from(interval)), Some(unit.as_str().to_string()))
        }
        None => (None, None),
    }
}

/// Column list for task SELECT queries (10 columns).
const TASK_COLUMNS: &str = "id, task_type, title, due_at, is_completed, repeat_interval, repeat_unit, plant_id, created_at, updated_at";

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("task.id: {e}")))?;

    let task_type_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("task.task_type: {e}")))?;
    let task_type = TaskType::parse(&task_type_str);

    let title: Option<String> = row.get(2).ok();
    let title = title.filter(|s| !s.is_empty());

    let due_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("task.due_at: {e}")))?;
    let due_at = parse_ts(&due_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("task.due_at parse: {due_str}")))?;

    let is_completed = row.get::<i64>(4).unwrap_or(0) != 0;

    let repeat_interval: Option<i64> = row.get(5).ok();
    let repeat_unit: Option<String> = row.get(6).ok();
    let recurrence = match (repeat_interval, repeat_unit.as_deref().and_then(RecurrenceUnit::parse)) {
        (Some(interval), Some(unit)) => Some(Recurrence::Every {
            interval: u32::try_from(interval).unwrap_or(1),
            unit,
        }),
        _ => None,
    };

    let plant_id: Option<String> = row.get(7).ok();
    let plant_id = plant_id.filter(|s| !s.is_empty());

    let created_str: String = row.get(8).unwrap_or_default();
    let created_at = parse_ts(&created_str).unwrap_or_else(Utc::now);

    let updated_str: String = row.get(9).unwrap_or_default();
    let updated_at = parse_ts(&updated_str).unwrap_or_else(Utc::now);

    Ok(Task {
        id,
        task_type,
        title,
        due_at,
        is_completed,
        recurrence,
        plant_id,
        created_at,
        updated_at,
    })
}

async fn collect_tasks(mut rows: libsql::Rows, op: &str) -> Result<Vec<Task>, DatabaseError> {
    let mut tasks = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op} row: {e}")))?
    {
        tasks.push(row_to_task(&row)?);
    }
    Ok(tasks)
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlBackend {
    async fn get_task_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        fetch_task(self.conn(), id).await
    }

    async fn get_plant_by_id(&self, id: &str) -> Result<Option<Plant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, strain_name, batch_number FROM plants WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_plant_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let map = |e: libsql::Error| DatabaseError::Query(format!("plant row: {e}"));
                Ok(Some(Plant {
                    id: row.get(0).map_err(map)?,
                    strain_name: row.get(1).map_err(map)?,
                    batch_number: row.get(2).map_err(map)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_plant_by_id row: {e}"))),
        }
    }
}

#[async_trait]
impl ReminderLedger for LibSqlBackend {
    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE is_completed = 0 AND due_at <= ?1 ORDER BY due_at ASC, id ASC"
                ),
                params![ts(&now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_due_tasks: {e}")))?;
        collect_tasks(rows, "list_due_tasks").await
    }

    async fn has_dispatched(
        &self,
        task_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM reminder_dispatches WHERE task_id = ?1 AND due_at = ?2",
                params![task_id, ts(&due_at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_dispatched: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("has_dispatched row: {e}"))),
        }
    }

    async fn record_dispatch(
        &self,
        task_id: &str,
        due_at: DateTime<Utc>,
        report: &RunReport,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO reminder_dispatches (task_id, due_at, outcome, attempts, dispatched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    task_id,
                    ts(&due_at),
                    report.outcome.as_str(),
                    i64::from(report.attempts),
                    ts(&Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_dispatch: {e}")))?;
        debug!(task_id = %task_id, outcome = report.outcome.as_str(), "Dispatch recorded");
        Ok(())
    }

    async fn get_dispatch(
        &self,
        task_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<Option<DispatchRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT task_id, due_at, outcome, attempts, dispatched_at FROM reminder_dispatches
                 WHERE task_id = ?1 AND due_at = ?2",
                params![task_id, ts(&due_at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_dispatch: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_dispatch row: {e}"))),
        };

        let map = |e: libsql::Error| DatabaseError::Query(format!("dispatch row: {e}"));
        let due_str: String = row.get(1).map_err(map)?;
        let outcome_str: String = row.get(2).map_err(map)?;
        let dispatched_str: String = row.get(4).map_err(map)?;

        Ok(Some(DispatchRecord {
            task_id: row.get(0).map_err(map)?,
            due_at: parse_ts(&due_str).unwrap_or(due_at),
            outcome: DispatchOutcome::parse(&outcome_str).ok_or_else(|| {
                DatabaseError::Serialization(format!("unknown dispatch outcome: {outcome_str}"))
            })?,
            attempts: u32::try_from(row.get::<i64>(3).unwrap_or(1)).unwrap_or(1),
            dispatched_at: parse_ts(&dispatched_str).unwrap_or_else(Utc::now),
        }))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
