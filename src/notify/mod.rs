//! Notification delivery: channel setup, payload rendering, and sinks.

pub mod channel;
pub mod payload;
pub mod push;
pub mod sink;

pub use channel::{
    ChannelRegistry, Importance, LocalChannelRegistry, NoopChannelRegistry, NotificationChannel,
    REMINDER_CHANNEL_ID, REMINDER_CHANNEL_NAME,
};
pub use payload::{ReminderPayload, build_payload};
pub use push::PushChannel;
pub use sink::{FanoutSink, NotificationSink, TracingSink};
