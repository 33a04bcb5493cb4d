//! Notification channel registry.
//!
//! Platforms that group notifications into channels need the reminder
//! channel to exist before anything is posted to it. `ensure_channel()` is
//! called at the start of every dispatch, so it must stay idempotent and
//! cheap, and it never reports an error.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tracing::info;

/// ID of the single reminder channel.
pub const REMINDER_CHANNEL_ID: &str = "plant_task_reminders";

/// User-visible name of the reminder channel.
pub const REMINDER_CHANNEL_NAME: &str = "Plant Task Reminders";

/// How intrusively the platform presents notifications on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Default,
    High,
}

/// A delivery channel definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
}

impl NotificationChannel {
    /// The reminder channel: fixed ID, high importance.
    pub fn reminders() -> Self {
        Self {
            id: REMINDER_CHANNEL_ID.to_string(),
            name: REMINDER_CHANNEL_NAME.to_string(),
            description: "Reminders for watering, feeding and other plant tasks".to_string(),
            importance: Importance::High,
        }
    }
}

/// Idempotent setup of the reminder delivery channel.
pub trait ChannelRegistry: Send + Sync {
    /// Create the reminder channel if absent. No-op if it already exists.
    fn ensure_channel(&self);
}

/// Registry for platforms without a channel concept.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChannelRegistry;

impl ChannelRegistry for NoopChannelRegistry {
    fn ensure_channel(&self) {}
}

/// In-process channel table.
#[derive(Debug)]
pub struct LocalChannelRegistry {
    channel: NotificationChannel,
    channels: RwLock<HashMap<String, NotificationChannel>>,
}

impl LocalChannelRegistry {
    /// Registry that manages the standard reminder channel.
    pub fn new() -> Self {
        Self::with_channel(NotificationChannel::reminders())
    }

    /// Registry that manages a custom channel definition.
    pub fn with_channel(channel: NotificationChannel) -> Self {
        Self {
            channel,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a created channel.
    pub fn get(&self, id: &str) -> Option<NotificationChannel> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    /// Number of channels created so far.
    pub fn len(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry for LocalChannelRegistry {
    fn ensure_channel(&self) {
        // Fast path: already created.
        if self
            .channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&self.channel.id)
        {
            return;
        }

        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if channels.contains_key(&self.channel.id) {
            return;
        }
        channels.insert(self.channel.id.clone(), self.channel.clone());
        info!(
            channel_id = %self.channel.id,
            importance = ?self.channel.importance,
            "Notification channel created"
        );
    }
}
