//! Session lifecycle.
//!
//! [`SessionManager`] owns the transition from "we have some stored
//! credentials" to a decided [`SessionState`], keeps the access credential
//! fresh, and is the only writer of the [`CredentialStore`].
//!
//! # State machine
//!
//! ```text
//! unknown ─► validating ─┬─► authenticated ─(tick)─► validating
//!                        └─► unauthenticated
//! ```
//!
//! `unauthenticated` is terminal until a fresh [`SessionManager::login`].
//!
//! # Fail-closed
//!
//! Every refresh failure clears the store and decides `unauthenticated`:
//! network errors, 4xx/5xx, timeouts, undecodable or already-expired
//! credentials. There is no retry-before-logout.
//!
//! # Single flight
//!
//! Refreshes, logins, and logouts serialize on one gate. A caller that waited
//! while another refresh completed adopts that outcome instead of issuing a
//! second request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use codblog_protocol::UserIdentity;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::{ApiError, AuthApi};
use crate::credentials::{CredentialPair, CredentialStore, StoreError};
use crate::token::{self, TokenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unknown,
    Validating,
    Authenticated,
    Unauthenticated,
}

impl SessionState {
    /// True once the session resolved to a definite answer.
    pub fn is_decided(self) -> bool {
        matches!(
            self,
            SessionState::Authenticated | SessionState::Unauthenticated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Validating => "validating",
            SessionState::Authenticated => "authenticated",
            SessionState::Unauthenticated => "unauthenticated",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no refresh credential stored")]
    MissingRefreshCredential,

    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("server issued a credential that expired at {0}")]
    AlreadyExpired(DateTime<Utc>),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: CredentialStore,
    state: watch::Sender<SessionState>,
    gate: Mutex<()>,
    completed_refreshes: AtomicU64,
    request_timeout: Duration,
}

impl SessionManager {
    pub fn new(api: Arc<dyn AuthApi>, store: CredentialStore, request_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            api,
            store,
            state,
            gate: Mutex::new(()),
            completed_refreshes: AtomicU64::new(0),
            request_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.store.user()
    }

    /// Resolves the stored credentials to a decided state. Runs once per load.
    pub async fn initialize(&self) -> SessionState {
        self.transition(SessionState::Validating, "initialize");
        let pair = self.store.snapshot();

        if pair.is_empty() {
            self.fail_closed("no stored credentials");
            return self.state();
        }

        if let Some(access) = pair.access() {
            match token::is_live(access, Utc::now()) {
                Ok(true) => {
                    self.transition(SessionState::Authenticated, "stored credential is live");
                    return self.state();
                }
                Ok(false) => {
                    tracing::debug!("Stored access credential expired");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Stored access credential is undecodable");
                    self.fail_closed("undecodable access credential");
                    return self.state();
                }
            }
        }

        if pair.refresh().is_none() {
            self.fail_closed("no refresh credential");
            return self.state();
        }

        if let Err(err) = self.refresh().await {
            tracing::info!(error = %err, "Startup refresh failed");
        }
        self.state()
    }

    /// Mints a new access credential from the stored refresh credential.
    ///
    /// Any failure clears the store and decides `unauthenticated`.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        if self.state() == SessionState::Unauthenticated {
            return Err(SessionError::NotAuthenticated);
        }

        let seen = self.completed_refreshes.load(Ordering::Acquire);
        let _gate = self.gate.lock().await;
        if self.completed_refreshes.load(Ordering::Acquire) != seen {
            tracing::debug!("Joined a refresh that completed while waiting");
            return match self.state() {
                SessionState::Authenticated => Ok(()),
                _ => Err(SessionError::NotAuthenticated),
            };
        }
        if self.state() == SessionState::Unauthenticated {
            return Err(SessionError::NotAuthenticated);
        }

        self.transition(SessionState::Validating, "refresh");
        let result = self.try_refresh().await;
        self.completed_refreshes.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(()) => {
                self.transition(SessionState::Authenticated, "refresh succeeded");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "Credential refresh failed, signing out");
                self.fail_closed("refresh failed");
                Err(err)
            }
        }
    }

    /// Returns an access credential valid for at least `margin`, refreshing
    /// first when the stored one is about to lapse.
    pub async fn fresh_access_token(&self, margin: Duration) -> Result<String, SessionError> {
        if self.state() == SessionState::Unauthenticated {
            return Err(SessionError::NotAuthenticated);
        }

        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        if let Some(access) = self.store.access_token() {
            if token::is_live(&access, Utc::now() + margin).unwrap_or(false) {
                return Ok(access);
            }
        }

        self.refresh().await?;
        self.store
            .access_token()
            .ok_or(SessionError::NotAuthenticated)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, SessionError> {
        let _gate = self.gate.lock().await;
        let result = self.try_login(email, password).await;
        self.completed_refreshes.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(user) => {
                tracing::info!(user_id = user.id, "Signed in");
                self.transition(SessionState::Authenticated, "login");
                Ok(user)
            }
            Err(err) => {
                if self.state() != SessionState::Authenticated {
                    self.transition(SessionState::Unauthenticated, "login failed");
                }
                Err(err)
            }
        }
    }

    /// Asks the server to revoke the refresh credential, then clears local
    /// state regardless of the server's answer. The server error, if any, is
    /// returned after the local sign-out.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let _gate = self.gate.lock().await;
        let server_result = match self.store.refresh_token() {
            Some(refresh) => self.with_timeout(self.api.logout(&refresh)).await,
            None => Ok(()),
        };
        self.completed_refreshes.fetch_add(1, Ordering::AcqRel);
        self.fail_closed("logout");

        if let Err(err) = &server_result {
            tracing::warn!(error = %err, "Server-side logout failed; local credentials cleared anyway");
        }
        server_result
    }

    /// Refreshes every `period` while authenticated. Dropping the returned
    /// handle stops the schedule.
    pub fn schedule_periodic_refresh(self: &Arc<Self>, period: Duration) -> PeriodicRefresh {
        let manager: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match manager.state() {
                    SessionState::Authenticated => {}
                    SessionState::Unauthenticated => break,
                    SessionState::Unknown | SessionState::Validating => continue,
                }

                tracing::debug!("Periodic credential refresh");
                if let Err(err) = manager.refresh().await {
                    tracing::warn!(error = %err, "Periodic refresh ended the session");
                    break;
                }
            }
        });
        PeriodicRefresh { task }
    }

    async fn try_refresh(&self) -> Result<(), SessionError> {
        let refresh = self
            .store
            .refresh_token()
            .ok_or(SessionError::MissingRefreshCredential)?;
        let response = self.with_timeout(self.api.refresh(&refresh)).await?;
        ensure_not_expired(&response.access)?;

        let user = self.store.user();
        let rotated = response.refresh.filter(|value| !value.is_empty());
        self.store.replace(CredentialPair::new(
            response.access,
            rotated.unwrap_or(refresh),
            user,
        ))?;
        Ok(())
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<UserIdentity, SessionError> {
        let response = self.with_timeout(self.api.login(email, password)).await?;
        ensure_not_expired(&response.access)?;
        self.store.replace(CredentialPair::new(
            response.access,
            response.refresh,
            Some(response.user.clone()),
        ))?;
        Ok(response.user)
    }

    async fn with_timeout<T, F>(&self, call: F) -> Result<T, SessionError>
    where
        F: std::future::Future<Output = Result<T, ApiError>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::Timeout(self.request_timeout)),
        }
    }

    fn fail_closed(&self, reason: &'static str) {
        if let Err(err) = self.store.clear() {
            tracing::error!(error = %err, "Failed to clear persisted credentials");
        }
        self.transition(SessionState::Unauthenticated, reason);
    }

    fn transition(&self, to: SessionState, reason: &'static str) {
        let mut from = to;
        self.state.send_if_modified(|current| {
            if *current == to {
                return false;
            }
            from = *current;
            *current = to;
            true
        });
        if from != to {
            tracing::info!(from = from.as_str(), to = to.as_str(), reason, "Session state changed");
        }
    }
}

fn ensure_not_expired(access: &str) -> Result<(), SessionError> {
    let expiry = token::decode_expiry(access)?;
    if expiry <= Utc::now() {
        return Err(SessionError::AlreadyExpired(expiry));
    }
    Ok(())
}

/// Handle to the periodic refresh task. Aborts the task on drop.
#[derive(Debug)]
pub struct PeriodicRefresh {
    task: JoinHandle<()>,
}

impl PeriodicRefresh {
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PeriodicRefresh {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        settle, token_expiring_in, unauthorized, user, FakeAuthApi,
    };
    use codblog_protocol::{LoginResponse, RefreshResponse};

    fn manager_with(api: Arc<FakeAuthApi>, pair: CredentialPair) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            api,
            CredentialStore::in_memory_with(pair),
            Duration::from_secs(10),
        ))
    }

    #[tokio::test]
    async fn live_access_authenticates_without_network() {
        let api = Arc::new(FakeAuthApi::new());
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(10), "r1", Some(user(7))),
        );

        assert_eq!(manager.initialize().await, SessionState::Authenticated);
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn expired_access_is_refreshed() {
        let fresh = token_expiring_in(15);
        let api = Arc::new(FakeAuthApi::new().with_access(fresh.clone()));
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(-1), "r1", Some(user(7))),
        );

        assert_eq!(manager.initialize().await, SessionState::Authenticated);
        assert_eq!(api.presented_refresh(), vec!["r1".to_string()]);
        let stored = manager.store().snapshot();
        assert_eq!(stored.access(), Some(fresh.as_str()));
        assert_eq!(stored.refresh(), Some("r1"));
        assert_eq!(stored.user(), Some(&user(7)));
    }

    #[tokio::test]
    async fn rejected_refresh_clears_store() {
        let api = Arc::new(FakeAuthApi::new().with_refresh(Err(unauthorized())));
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(-1), "r1", Some(user(7))),
        );

        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert!(manager.store().snapshot().is_empty());
        assert!(manager.user().is_none());
    }

    #[tokio::test]
    async fn every_refresh_failure_fails_closed() {
        let failures: Vec<Result<RefreshResponse, ApiError>> = vec![
            Err(ApiError::Server {
                status: 502,
                message: "Bad Gateway".to_string(),
            }),
            Err(ApiError::Decode("eof".to_string())),
            Ok(RefreshResponse {
                access: token_expiring_in(-5),
                refresh: None,
            }),
            Ok(RefreshResponse {
                access: "not-a-token".to_string(),
                refresh: None,
            }),
        ];

        for failure in failures {
            let api = Arc::new(FakeAuthApi::new().with_refresh(failure));
            let manager = manager_with(
                api,
                CredentialPair::new(token_expiring_in(10), "r1", Some(user(7))),
            );
            assert_eq!(manager.initialize().await, SessionState::Authenticated);

            assert!(manager.refresh().await.is_err());
            assert_eq!(manager.state(), SessionState::Unauthenticated);
            assert!(manager.store().snapshot().is_empty());
        }
    }

    #[tokio::test]
    async fn empty_store_is_unauthenticated() {
        let api = Arc::new(FakeAuthApi::new());
        let manager = manager_with(api.clone(), CredentialPair::default());
        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn undecodable_access_fails_closed() {
        let api = Arc::new(FakeAuthApi::new().with_access(token_expiring_in(15)));
        let manager = manager_with(
            api.clone(),
            CredentialPair::new("garbage", "r1", Some(user(7))),
        );
        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert_eq!(api.refresh_calls(), 0);
        assert!(manager.store().snapshot().is_empty());
    }

    #[tokio::test]
    async fn rotated_refresh_credential_is_stored() {
        let api = Arc::new(FakeAuthApi::new().with_refresh(Ok(RefreshResponse {
            access: token_expiring_in(15),
            refresh: Some("r2".to_string()),
        })));
        let manager = manager_with(
            api,
            CredentialPair::new(token_expiring_in(-1), "r1", None),
        );
        manager.initialize().await;
        assert_eq!(manager.store().refresh_token().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn unauthenticated_is_terminal_for_refresh() {
        let api = Arc::new(FakeAuthApi::new().with_access(token_expiring_in(15)));
        let manager = manager_with(api.clone(), CredentialPair::default());
        manager.initialize().await;

        assert!(matches!(
            manager.refresh().await,
            Err(SessionError::NotAuthenticated)
        ));
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_share_one_request() {
        let api = Arc::new(
            FakeAuthApi::new()
                .with_access(token_expiring_in(15))
                .with_refresh_delay(Duration::from_secs(1)),
        );
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(10), "r1", None),
        );
        manager.initialize().await;

        let (first, second) = tokio::join!(manager.refresh(), manager.refresh());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_refresh_times_out_and_fails_closed() {
        let api = Arc::new(
            FakeAuthApi::new()
                .with_access(token_expiring_in(15))
                .with_refresh_delay(Duration::from_secs(60)),
        );
        let manager = manager_with(
            api,
            CredentialPair::new(token_expiring_in(-1), "r1", None),
        );

        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert!(manager.store().snapshot().is_empty());
    }

    #[tokio::test]
    async fn state_changes_are_observable() {
        let api = Arc::new(FakeAuthApi::new().with_access(token_expiring_in(15)));
        let manager = manager_with(
            api,
            CredentialPair::new(token_expiring_in(-1), "r1", None),
        );
        let mut rx = manager.subscribe();
        assert_eq!(*rx.borrow_and_update(), SessionState::Unknown);

        manager.initialize().await;
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(*rx.borrow_and_update(), SessionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_refresh_renews_then_fails_closed() {
        let period = Duration::from_secs(50 * 60);
        let api = Arc::new(
            FakeAuthApi::new()
                .with_access(token_expiring_in(60))
                .with_refresh(Err(ApiError::Server {
                    status: 500,
                    message: "boom".to_string(),
                })),
        );
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(10), "r1", None),
        );
        manager.initialize().await;
        let periodic = manager.schedule_periodic_refresh(period);

        tokio::time::sleep(period / 2).await;
        assert_eq!(api.refresh_calls(), 0);

        tokio::time::sleep(period / 2).await;
        settle().await;
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(manager.state(), SessionState::Authenticated);

        tokio::time::sleep(period).await;
        settle().await;
        assert_eq!(api.refresh_calls(), 2);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(manager.store().snapshot().is_empty());
        assert!(periodic.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_periodic_refresh_stops() {
        let period = Duration::from_secs(60);
        let api = Arc::new(FakeAuthApi::new().with_access(token_expiring_in(60)));
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(10), "r1", None),
        );
        manager.initialize().await;

        let periodic = manager.schedule_periodic_refresh(period);
        periodic.cancel();
        tokio::time::sleep(period * 3).await;
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_periodic_handle_stops_refreshes() {
        let period = Duration::from_secs(60);
        let api = Arc::new(FakeAuthApi::new().with_access(token_expiring_in(60)));
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(10), "r1", None),
        );
        manager.initialize().await;

        drop(manager.schedule_periodic_refresh(period));
        tokio::time::sleep(period * 3).await;
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn login_stores_identity() {
        let api = Arc::new(FakeAuthApi::new().with_login(Ok(LoginResponse {
            access: token_expiring_in(15),
            refresh: "r1".to_string(),
            user: user(7),
            message: Some("login successfull".to_string()),
        })));
        let manager = manager_with(api, CredentialPair::default());
        manager.initialize().await;

        let signed_in = manager.login("ann@example.com", "pw").await.expect("login");
        assert_eq!(signed_in, user(7));
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(manager.user(), Some(user(7)));
    }

    #[tokio::test]
    async fn failed_login_keeps_signed_out() {
        let api = Arc::new(FakeAuthApi::new());
        let manager = manager_with(api, CredentialPair::default());
        assert!(manager.login("ann@example.com", "wrong").await.is_err());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_fails() {
        let api = Arc::new(FakeAuthApi::new().with_logout_error(ApiError::Server {
            status: 500,
            message: "boom".to_string(),
        }));
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(10), "r1", Some(user(7))),
        );
        manager.initialize().await;

        assert!(manager.logout().await.is_err());
        assert_eq!(api.logout_calls(), 1);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(manager.store().snapshot().is_empty());
    }

    #[tokio::test]
    async fn fresh_access_token_refreshes_inside_margin() {
        let fresh = token_expiring_in(30);
        let api = Arc::new(FakeAuthApi::new().with_access(fresh.clone()));
        let manager = manager_with(
            api.clone(),
            CredentialPair::new(token_expiring_in(1), "r1", None),
        );
        manager.initialize().await;

        let token = manager
            .fresh_access_token(Duration::from_secs(120))
            .await
            .expect("token");
        assert_eq!(token, fresh);
        assert_eq!(api.refresh_calls(), 1);

        let again = manager
            .fresh_access_token(Duration::from_secs(120))
            .await
            .expect("token");
        assert_eq!(again, fresh);
        assert_eq!(api.refresh_calls(), 1);
    }
}
