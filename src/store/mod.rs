//! Persistence layer — libSQL-backed storage for plants, tasks, and the
//! reminder dispatch ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{DispatchRecord, ReminderLedger, TaskStore};
