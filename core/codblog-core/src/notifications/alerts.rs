//! Transient alert surface for notification messages.

use codblog_protocol::NotificationEvent;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Like,
    Comment,
    Follow,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

impl Alert {
    /// Alert for a frame, if the frame carries readable text.
    pub fn from_event(event: &NotificationEvent) -> Option<Self> {
        let message = event.alert_text()?.to_string();
        let kind = match event {
            NotificationEvent::Like { .. } => AlertKind::Like,
            NotificationEvent::Comment { .. } => AlertKind::Comment,
            NotificationEvent::Follow { .. } => AlertKind::Follow,
            NotificationEvent::CountUpdate { .. } | NotificationEvent::Other { .. } => {
                AlertKind::Other
            }
        };
        Some(Self { kind, message })
    }
}

/// Receives alerts. Must not block: it runs on the channel's read loop.
pub trait AlertSink: Send + Sync {
    fn show(&self, alert: Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn show(&self, alert: Alert) {
        tracing::info!(kind = ?alert.kind, message = %alert.message, "Notification");
    }
}

/// Forwards alerts to a receiver owned by the presentation layer.
#[derive(Debug, Clone)]
pub struct ChannelAlerts {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlerts {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlerts {
    fn show(&self, alert: Alert) {
        if self.tx.send(alert).is_err() {
            tracing::debug!("Alert receiver dropped");
        }
    }
}
