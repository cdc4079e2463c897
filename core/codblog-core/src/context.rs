//! Explicit session context.
//!
//! Everything a client needs (configuration, credential store, gateway,
//! session manager, unread counter) is owned here and handed to callers
//! instead of living in globals.

use std::sync::{Arc, Mutex};

use codblog_protocol::UserIdentity;

use crate::api::{ApiGateway, AuthApi};
use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::error::{CoreError, Result};
use crate::guard::RouteGuard;
use crate::notifications::{AlertSink, ChannelConnector, NotificationChannelManager, UnreadCount};
use crate::session::{PeriodicRefresh, SessionManager, SessionState};
use crate::storage::StorageConfig;

pub struct SessionContext {
    config: ClientConfig,
    storage: StorageConfig,
    gateway: Arc<ApiGateway>,
    session: Arc<SessionManager>,
    unread: UnreadCount,
    periodic: Mutex<Option<PeriodicRefresh>>,
}

impl SessionContext {
    /// Opens the persisted credential store and wires the HTTP gateway.
    pub fn new(config: ClientConfig, storage: StorageConfig) -> Result<Self> {
        config.validate()?;
        let credentials = CredentialStore::open(&storage.credentials_file())?;
        let gateway = Arc::new(ApiGateway::new(
            config.api_base_url.clone(),
            config.request_timeout(),
            credentials.clone(),
        )?);
        let auth: Arc<dyn AuthApi> = gateway.clone();
        let session = Arc::new(SessionManager::new(
            auth,
            credentials,
            config.request_timeout(),
        ));

        Ok(Self {
            config,
            storage,
            gateway,
            session,
            unread: UnreadCount::new(),
            periodic: Mutex::new(None),
        })
    }

    /// Resolves the session and, when authenticated, starts periodic refresh.
    pub async fn start(&self) -> SessionState {
        let state = self.session.initialize().await;
        if state == SessionState::Authenticated {
            self.start_periodic_refresh();
        }
        state
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity> {
        let user = self.session.login(email, password).await?;
        self.start_periodic_refresh();
        Ok(user)
    }

    /// Stops periodic refresh, then signs out (locally even if the server
    /// call fails).
    pub async fn logout(&self) -> Result<()> {
        self.stop_periodic_refresh();
        self.session.logout().await?;
        Ok(())
    }

    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(self.session.subscribe())
    }

    /// Builds a channel manager for the signed-in user and connects it. The
    /// channel closes itself once the session ends.
    pub fn notification_channel(
        &self,
        connector: Arc<dyn ChannelConnector>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<NotificationChannelManager> {
        if self.session.state() != SessionState::Authenticated {
            return Err(CoreError::NotAuthenticated);
        }
        let user = self.session.user().ok_or(CoreError::NotAuthenticated)?;

        let manager = NotificationChannelManager::new(
            connector,
            self.config.ws_base_url.clone(),
            self.config.reconnect_policy(),
            self.config.request_timeout(),
            self.unread.clone(),
            alerts,
        );
        manager.follow_session(self.session.subscribe());
        manager.connect(Some(user.id));
        Ok(manager)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn unread(&self) -> &UnreadCount {
        &self.unread
    }

    fn start_periodic_refresh(&self) {
        let handle = self
            .session
            .schedule_periodic_refresh(self.config.refresh_interval());
        // Replacing drops (and aborts) any previous schedule.
        *self.periodic_slot() = Some(handle);
    }

    fn stop_periodic_refresh(&self) {
        self.periodic_slot().take();
    }

    fn periodic_slot(&self) -> std::sync::MutexGuard<'_, Option<PeriodicRefresh>> {
        self.periodic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
