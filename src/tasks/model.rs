//! Task data model — cultivation tasks, plants, and recurrence.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of cultivation work a task represents.
///
/// Stored as a snake_case string. Values this build does not know about are
/// kept verbatim in `Other` so a newer writer never breaks an older reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Watering,
    Feeding,
    Inspection,
    Pruning,
    Harvest,
    Custom,
    Other(String),
}

impl TaskType {
    /// Parse a stored value. Never fails.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "watering" => Self::Watering,
            "feeding" => Self::Feeding,
            "inspection" => Self::Inspection,
            "pruning" => Self::Pruning,
            "harvest" => Self::Harvest,
            "custom" => Self::Custom,
            _ => Self::Other(s.to_string()),
        }
    }

    /// The stored string for this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Watering => "watering",
            Self::Feeding => "feeding",
            Self::Inspection => "inspection",
            Self::Pruning => "pruning",
            Self::Harvest => "harvest",
            Self::Custom => "custom",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of a repeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceUnit {
    Hours,
    Days,
    Weeks,
}

impl RecurrenceUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hours" => Some(Self::Hours),
            "days" => Some(Self::Days),
            "weeks" => Some(Self::Weeks),
            _ => None,
        }
    }
}

/// Repeat policy for a task. Absence means the task fires once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    Every { interval: u32, unit: RecurrenceUnit },
}

impl Recurrence {
    pub fn every(interval: u32, unit: RecurrenceUnit) -> Self {
        Self::Every { interval, unit }
    }

    /// Due instant of the occurrence after one due at `due_at`, or `None`
    /// when it falls outside the representable date range.
    ///
    /// A zero interval is treated as one unit so the next occurrence is
    /// always strictly later.
    pub fn next_due(&self, due_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Self::Every { interval, unit } = *self;
        let n = i64::from(interval.max(1));
        let step = match unit {
            RecurrenceUnit::Hours => Duration::try_hours(n),
            RecurrenceUnit::Days => Duration::try_days(n),
            RecurrenceUnit::Weeks => Duration::try_weeks(n),
        }?;
        due_at.checked_add_signed(step)
    }
}

/// A plant. Read-only from the reminder engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plant {
    pub id: String,
    pub strain_name: String,
    pub batch_number: String,
}

impl Plant {
    pub fn new(
        id: impl Into<String>,
        strain_name: impl Into<String>,
        batch_number: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            strain_name: strain_name.into(),
            batch_number: batch_number.into(),
        }
    }

    /// Human-facing identity, e.g. `Blue Dream (Batch B12)`.
    pub fn display_name(&self) -> String {
        format!("{} (Batch {})", self.strain_name, self.batch_number)
    }
}

/// A scheduled cultivation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable unique ID. Reminders are addressed by this, never by a
    /// snapshot of the other fields.
    pub id: String,
    /// Kind of work.
    pub task_type: TaskType,
    /// Optional label, mostly for custom tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// When the reminder should fire.
    pub due_at: DateTime<Utc>,
    /// Set once the user marks the task done.
    #[serde(default)]
    pub is_completed: bool,
    /// Repeat policy for materializing the next occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    /// Plant this task belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new, not-completed task with a fresh ID.
    pub fn new(task_type: TaskType, due_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type,
            title: None,
            due_at,
            is_completed: false,
            recurrence: None,
            plant_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set an explicit ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: set title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builder: attach to a plant.
    pub fn with_plant(mut self, plant_id: impl Into<String>) -> Self {
        self.plant_id = Some(plant_id.into());
        self
    }

    /// Builder: set recurrence.
    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    /// Builder: mark completed.
    pub fn completed(mut self) -> Self {
        self.is_completed = true;
        self
    }

    /// Whether the task's due instant has been reached.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }

    /// The next occurrence of a recurring task, with a fresh ID.
    /// `None` for one-off tasks and for a recurrence whose next due instant
    /// is out of range.
    pub fn next_occurrence(&self) -> Option<Task> {
        let due_at = self.recurrence?.next_due(self.due_at)?;
        let now = Utc::now();
        Some(Task {
            id: Uuid::new_v4().to_string(),
            task_type: self.task_type.clone(),
            title: self.title.clone(),
            due_at,
            is_completed: false,
            recurrence: self.recurrence,
            plant_id: self.plant_id.clone(),
            created_at: now,
            updated_at: now,
        })
    }
}
