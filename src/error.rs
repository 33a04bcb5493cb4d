//! Error types for grow-reminder.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
///
/// Every variant is an infrastructure fault. A missing row is never an
/// error; lookups return `Ok(None)` instead.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("No subscribers connected to channel {channel}")]
    NoSubscribers { channel: String },

    #[error("Notification channel {channel} is disabled")]
    ChannelDisabled { channel: String },

    #[error("Failed to deliver on {sink}: {reason}")]
    SendFailed { sink: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
