//! Reminder engine — the dispatch unit plus the dispatcher-side runner and
//! due sweep that drive it.

pub mod dispatch;
pub mod runner;
pub mod sweep;

pub use dispatch::{DispatchOutcome, ReminderDispatcher};
pub use runner::{ReminderRunner, RunReport};
pub use sweep::{DueSweep, spawn_due_sweep};
