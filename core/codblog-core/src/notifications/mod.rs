//! Live notification delivery.
//!
//! [`NotificationChannelManager`] keeps exactly one connection per signed-in
//! user, overwrites the shared [`UnreadCount`] with every server-reported
//! value, and forwards readable messages to an [`AlertSink`].

mod alerts;
mod connector;
mod machine;
mod manager;
pub mod page;
mod unread;

pub use alerts::{Alert, AlertKind, AlertSink, ChannelAlerts, LogAlerts};
pub use connector::{ChannelConnector, ChannelError, FrameStream, WsConnector};
pub use machine::ConnectionPhase;
pub use manager::NotificationChannelManager;
pub use page::{describe, mark_all_read, NotificationSummary, NotificationTab};
pub use unread::UnreadCount;
