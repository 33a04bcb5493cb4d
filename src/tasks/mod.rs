//! Cultivation tasks and the plants they belong to.

pub mod model;

pub use model::{Plant, Recurrence, RecurrenceUnit, Task, TaskType};
