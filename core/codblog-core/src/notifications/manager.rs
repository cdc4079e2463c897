//! Async driver for [`ChannelMachine`].
//!
//! The connection and the reconnect timer are tokio tasks whose handles sit
//! next to the machine behind one lock. Executing `Close` or
//! `CancelReconnect` aborts the matching task, so teardown never leaves a
//! timer or socket behind.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use codblog_protocol::{notification_channel_path, parse_frame, UserId};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::alerts::{Alert, AlertSink};
use super::connector::ChannelConnector;
use super::machine::{ChannelCommand, ChannelMachine, ConnectionPhase};
use super::page::NotificationSummary;
use super::unread::UnreadCount;
use crate::api::{ApiError, NotificationsApi};
use crate::backoff::ReconnectPolicy;
use crate::config::join_url;
use crate::session::SessionState;

/// Live notification channel for one signed-in user.
///
/// Construct one per session. Dropping it tears the channel down.
pub struct NotificationChannelManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn ChannelConnector>,
    ws_base_url: String,
    connect_timeout: Duration,
    unread: UnreadCount,
    alerts: Arc<dyn AlertSink>,
    driver: Mutex<Driver>,
}

struct Driver {
    machine: ChannelMachine,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    session_watch: Option<JoinHandle<()>>,
}

impl NotificationChannelManager {
    /// `connect_timeout` bounds each handshake; a handshake that does not
    /// finish in time counts as a close and schedules a reconnect.
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        ws_base_url: impl Into<String>,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
        unread: UnreadCount,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                ws_base_url: ws_base_url.into(),
                connect_timeout,
                unread,
                alerts,
                driver: Mutex::new(Driver {
                    machine: ChannelMachine::new(policy),
                    connection: None,
                    reconnect: None,
                    session_watch: None,
                }),
            }),
        }
    }

    /// Opens the channel for `user_id`, closing any existing connection
    /// first. Does nothing when `user_id` is `None`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, user_id: Option<UserId>) {
        let mut driver = self.inner.lock();
        let commands = driver.machine.connect(user_id);
        self.inner.apply(&mut driver, commands);
    }

    /// Closes the connection and cancels any pending reconnect.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// Tears the channel down as soon as the session becomes
    /// unauthenticated or its publisher goes away. Replaces any earlier
    /// subscription.
    pub fn follow_session(&self, mut state: watch::Receiver<SessionState>) {
        let inner = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                if *state.borrow_and_update() == SessionState::Unauthenticated {
                    break;
                }
                if state.changed().await.is_err() {
                    break;
                }
            }
            if let Some(inner) = inner.upgrade() {
                tracing::info!("Session ended; closing notification channel");
                inner.teardown();
            }
        });

        let mut driver = self.inner.lock();
        if let Some(previous) = driver.session_watch.replace(task) {
            previous.abort();
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.lock().machine.phase()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock().machine.reconnect_pending()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.inner.lock().machine.user_id()
    }

    pub fn unread(&self) -> &UnreadCount {
        &self.inner.unread
    }

    /// Reloads the notification list and overwrites the counter with the
    /// number of unread records.
    pub async fn resync_unread(
        &self,
        api: &dyn NotificationsApi,
        user_id: UserId,
    ) -> Result<u64, ApiError> {
        let list = api.list_notifications(user_id).await?;
        let unread = NotificationSummary::from_records(&list.notification_data).unread as u64;
        self.inner.unread.set(unread);
        Ok(unread)
    }
}

impl Drop for NotificationChannelManager {
    fn drop(&mut self) {
        self.teardown();
        if let Some(task) = self.inner.lock().session_watch.take() {
            task.abort();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Driver> {
        self.driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn teardown(self: &Arc<Self>) {
        let mut driver = self.lock();
        let was = driver.machine.phase();
        let commands = driver.machine.teardown();
        self.apply(&mut driver, commands);
        if was != ConnectionPhase::Idle {
            tracing::info!("Notification channel torn down");
        }
    }

    fn apply(self: &Arc<Self>, driver: &mut Driver, commands: Vec<ChannelCommand>) {
        for command in commands {
            match command {
                ChannelCommand::Open {
                    user_id,
                    generation,
                } => {
                    let url = join_url(&self.ws_base_url, &notification_channel_path(user_id));
                    tracing::debug!(user_id, generation, url = %url, "Opening notification channel");
                    let task = run_connection(
                        Arc::downgrade(self),
                        Arc::clone(&self.connector),
                        url,
                        self.connect_timeout,
                        generation,
                    );
                    driver.connection = Some(tokio::spawn(task));
                }
                ChannelCommand::Close => {
                    if let Some(task) = driver.connection.take() {
                        task.abort();
                    }
                }
                ChannelCommand::ScheduleReconnect { delay, generation } => {
                    tracing::info!(
                        delay_ms = delay.as_millis() as u64,
                        "Notification channel closed; reconnect scheduled"
                    );
                    if let Some(stale) = driver.reconnect.take() {
                        stale.abort();
                    }
                    let inner = Arc::downgrade(self);
                    driver.reconnect = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(inner) = inner.upgrade() {
                            inner.on_reconnect_fired(generation);
                        }
                    }));
                }
                ChannelCommand::CancelReconnect => {
                    if let Some(task) = driver.reconnect.take() {
                        task.abort();
                    }
                }
            }
        }
    }

    fn on_opened(&self, generation: u64) -> bool {
        let mut driver = self.lock();
        let current = driver.machine.opened(generation);
        if current {
            tracing::info!(user_id = ?driver.machine.user_id(), "Notification channel open");
        }
        current
    }

    fn on_frame(&self, generation: u64, text: &str) {
        let event = match parse_frame(text) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping notification frame");
                return;
            }
        };

        {
            // Held across the write so a concurrent teardown cannot be
            // followed by a stale count.
            let driver = self.lock();
            if !driver.machine.accepts(generation) {
                return;
            }
            if let Some(count) = event.unread_count() {
                self.unread.set(count);
            }
        }
        if let Some(alert) = Alert::from_event(&event) {
            self.alerts.show(alert);
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        let mut driver = self.lock();
        if driver.machine.generation() == generation {
            driver.connection = None;
        }
        let commands = driver.machine.closed(generation);
        self.apply(&mut driver, commands);
    }

    fn on_reconnect_fired(self: &Arc<Self>, generation: u64) {
        let mut driver = self.lock();
        let commands = driver.machine.reconnect_fired(generation);
        if !commands.is_empty() {
            // The timer task is finishing; drop its handle without aborting.
            driver.reconnect = None;
        }
        self.apply(&mut driver, commands);
    }
}

async fn run_connection(
    inner: Weak<Inner>,
    connector: Arc<dyn ChannelConnector>,
    url: String,
    connect_timeout: Duration,
    generation: u64,
) {
    let mut frames = match tokio::time::timeout(connect_timeout, connector.connect(&url)).await {
        Ok(Ok(frames)) => frames,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "Notification channel connect failed");
            if let Some(inner) = inner.upgrade() {
                inner.on_closed(generation);
            }
            return;
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = connect_timeout.as_millis() as u64,
                "Notification channel handshake timed out"
            );
            if let Some(inner) = inner.upgrade() {
                inner.on_closed(generation);
            }
            return;
        }
    };

    match inner.upgrade() {
        Some(inner) if inner.on_opened(generation) => {}
        _ => return,
    }

    while let Some(item) = frames.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match item {
            Ok(text) => inner.on_frame(generation, &text),
            Err(err) => tracing::warn!(error = %err, "Notification channel error"),
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.on_closed(generation);
    }
}
