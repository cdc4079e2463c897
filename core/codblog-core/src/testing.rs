//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use codblog_protocol::{
    LoginResponse, NotificationList, RefreshResponse, UserId, UserIdentity,
};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::api::{ApiError, AuthApi, NotificationsApi};
use crate::notifications::{ChannelConnector, ChannelError, FrameStream};

/// Builds an unsigned JWT-shaped credential expiring at `exp` (unix seconds).
pub(crate) fn make_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"token_type":"access","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}

/// Credential valid for `minutes` from now (negative for already expired).
pub(crate) fn token_expiring_in(minutes: i64) -> String {
    make_token((Utc::now() + chrono::Duration::minutes(minutes)).timestamp())
}

pub(crate) fn user(id: UserId) -> UserIdentity {
    UserIdentity {
        id,
        username: format!("user{}", id),
        email: None,
        profile_image: None,
    }
}

pub(crate) fn unauthorized() -> ApiError {
    ApiError::Server {
        status: 401,
        message: "Token is invalid or expired".to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeAuthApi {
    refresh_results: Mutex<VecDeque<Result<RefreshResponse, ApiError>>>,
    login_results: Mutex<VecDeque<Result<LoginResponse, ApiError>>>,
    logout_error: Mutex<Option<ApiError>>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    presented_refresh: Mutex<Vec<String>>,
}

impl FakeAuthApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_refresh(self, result: Result<RefreshResponse, ApiError>) -> Self {
        lock(&self.refresh_results).push_back(result);
        self
    }

    pub(crate) fn with_access(self, access: String) -> Self {
        self.with_refresh(Ok(RefreshResponse {
            access,
            refresh: None,
        }))
    }

    pub(crate) fn with_login(self, result: Result<LoginResponse, ApiError>) -> Self {
        lock(&self.login_results).push_back(result);
        self
    }

    pub(crate) fn with_logout_error(self, err: ApiError) -> Self {
        *lock(&self.logout_error) = Some(err);
        self
    }

    pub(crate) fn with_refresh_delay(self, delay: Duration) -> Self {
        *lock(&self.refresh_delay) = delay;
        self
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn presented_refresh(&self) -> Vec<String> {
        lock(&self.presented_refresh).clone()
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn refresh(&self, refresh: &str) -> Result<RefreshResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.presented_refresh).push(refresh.to_string());
        let delay = *lock(&self.refresh_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.refresh_results)
            .pop_front()
            .unwrap_or_else(|| Err(unauthorized()))
    }

    async fn login(&self, _email: &str, _password: &str) -> Result<LoginResponse, ApiError> {
        lock(&self.login_results).pop_front().unwrap_or_else(|| {
            Err(ApiError::Server {
                status: 400,
                message: "Invalid credentials".to_string(),
            })
        })
    }

    async fn logout(&self, _refresh: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.logout_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct FakeNotificationsApi {
    list: Mutex<Option<Result<NotificationList, ApiError>>>,
}

impl FakeNotificationsApi {
    pub(crate) fn returning(result: Result<NotificationList, ApiError>) -> Self {
        Self {
            list: Mutex::new(Some(result)),
        }
    }
}

#[async_trait]
impl NotificationsApi for FakeNotificationsApi {
    async fn list_notifications(&self, _user_id: UserId) -> Result<NotificationList, ApiError> {
        lock(&self.list).take().unwrap_or_else(|| {
            Ok(NotificationList {
                count: 0,
                notification_data: Vec::new(),
            })
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

type FrameSender = mpsc::UnboundedSender<Result<String, ChannelError>>;

/// Server side of one fake channel connection.
pub(crate) struct FakeSocket {
    pub(crate) url: String,
    tx: Mutex<Option<FrameSender>>,
}

impl FakeSocket {
    pub(crate) fn push(&self, frame: &str) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(Ok(frame.to_string()));
        }
    }

    pub(crate) fn fail(&self, message: &str) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(Err(ChannelError::Transport(message.to_string())));
        }
    }

    /// Server-initiated close.
    pub(crate) fn close(&self) {
        lock(&self.tx).take();
    }

    /// True once the client dropped its end.
    pub(crate) fn client_closed(&self) -> bool {
        lock(&self.tx).as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Hands out [`FakeSocket`]s. Queued refusals fail the next connects and
/// queued stalls never finish their handshake.
#[derive(Default)]
pub(crate) struct FakeConnector {
    refusals: AtomicUsize,
    stalls: AtomicUsize,
    sockets: Mutex<Vec<std::sync::Arc<FakeSocket>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refuse_next(&self, count: usize) {
        self.refusals.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn stall_next(&self, count: usize) {
        self.stalls.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        lock(&self.sockets).len()
    }

    pub(crate) fn socket(&self, index: usize) -> std::sync::Arc<FakeSocket> {
        lock(&self.sockets)[index].clone()
    }

    pub(crate) fn last(&self) -> std::sync::Arc<FakeSocket> {
        let sockets = lock(&self.sockets);
        sockets[sockets.len() - 1].clone()
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let socket = std::sync::Arc::new(FakeSocket {
            url: url.to_string(),
            tx: Mutex::new(if refused { None } else { Some(tx) }),
        });
        lock(&self.sockets).push(socket);

        if refused {
            return Err(ChannelError::Transport("connection refused".to_string()));
        }
        let stalled = self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            return futures::future::pending().await;
        }
        let frames = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(frames.boxed())
    }
}

/// Lets spawned tasks run without crossing any real timer deadline.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
