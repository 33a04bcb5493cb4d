//! Notification sink trait and the simple sinks.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::NotificationError;
use crate::notify::payload::ReminderPayload;

/// Platform delivery primitive.
///
/// Fire-and-forget: `deliver` must not block, and a returned error only
/// reports that this attempt was not posted. There is no acknowledgement of
/// the user seeing the notification.
pub trait NotificationSink: Send + Sync {
    /// Sink name (for logging).
    fn name(&self) -> &str;

    /// Post one reminder.
    fn deliver(&self, payload: &ReminderPayload) -> Result<(), NotificationError>;
}

/// Writes reminders to the log. Useful headless and as a fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, payload: &ReminderPayload) -> Result<(), NotificationError> {
        info!(
            target_id = %payload.target_id,
            title = %payload.title,
            body = %payload.body,
            "Reminder"
        );
        Ok(())
    }
}

/// Delivers to every inner sink. Succeeds if at least one sink accepted the
/// payload.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    fn deliver(&self, payload: &ReminderPayload) -> Result<(), NotificationError> {
        let mut delivered = false;
        let mut last_err = None;

        for sink in &self.sinks {
            match sink.deliver(payload) {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(sink = sink.name(), error = %e, "Sink rejected reminder");
                    last_err = Some(e);
                }
            }
        }

        if delivered {
            return Ok(());
        }
        Err(last_err.unwrap_or_else(|| NotificationError::SendFailed {
            sink: "fanout".to_string(),
            reason: "no sinks configured".to_string(),
        }))
    }
}
