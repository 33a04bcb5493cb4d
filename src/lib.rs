//! Grow Reminder — task scheduling and reminder delivery for plant grows.

pub mod config;
pub mod error;
pub mod notify;
pub mod reminders;
pub mod store;
pub mod tasks;
