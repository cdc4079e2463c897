//! HTTP access to the codblog API.
//!
//! [`ApiGateway`] attaches the current access credential as a bearer header
//! to every request and enforces an explicit timeout. The session manager and
//! the notification channel depend on the narrow [`AuthApi`] and
//! [`NotificationsApi`] traits so tests can script server behavior.

use std::time::Duration;

use async_trait::async_trait;
use codblog_protocol::{
    list_notifications_path, notification_action_path, LoginRequest, LoginResponse, LogoutRequest,
    NotificationAction, NotificationActionRequest, NotificationList, RefreshRequest,
    RefreshResponse, RegisterRequest, UserId, UserIdentity, GET_USER_PATH, LOGIN_PATH, LOGOUT_PATH,
    REGISTER_PATH, TOKEN_REFRESH_PATH,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::join_url;
use crate::credentials::CredentialStore;

const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ApiError {
    /// True when the server rejected the presented credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Server { status, .. } if *status == StatusCode::UNAUTHORIZED.as_u16())
    }
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchanges a refresh credential for a new access credential.
    async fn refresh(&self, refresh: &str) -> Result<RefreshResponse, ApiError>;

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;

    /// Asks the server to invalidate `refresh`.
    async fn logout(&self, refresh: &str) -> Result<(), ApiError>;
}

#[async_trait]
pub trait NotificationsApi: Send + Sync {
    async fn list_notifications(&self, user_id: UserId) -> Result<NotificationList, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ApiGateway {
    http: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
    timeout: Duration,
}

impl ApiGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: CredentialStore,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("codblog/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            credentials,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), ApiError> {
        let body = RegisterRequest {
            username,
            email,
            password,
            confirm_password,
        };
        self.send_empty(self.request(Method::POST, REGISTER_PATH).json(&body))
            .await
    }

    pub async fn get_user(&self) -> Result<UserIdentity, ApiError> {
        self.send_json(self.request(Method::GET, GET_USER_PATH)).await
    }

    pub async fn notification_action(
        &self,
        notification_id: u64,
        action: NotificationAction,
    ) -> Result<(), ApiError> {
        let path = notification_action_path(notification_id);
        let body = NotificationActionRequest { action };
        self.send_empty(self.request(Method::POST, &path).json(&body))
            .await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, join_url(&self.base_url, path));
        match self.credentials.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.send_json(self.request(Method::POST, path).json(body))
            .await
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(builder).await?;
        let bytes = response.bytes().await.map_err(|err| self.classify(err))?;
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.send(builder).await.map(|_| ())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(|err| self.classify(err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Server {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }

    fn classify(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Network(err)
        }
    }
}

#[async_trait]
impl AuthApi for ApiGateway {
    async fn refresh(&self, refresh: &str) -> Result<RefreshResponse, ApiError> {
        self.post_json(TOKEN_REFRESH_PATH, &RefreshRequest { refresh })
            .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        self.post_json(LOGIN_PATH, &LoginRequest { email, password })
            .await
    }

    async fn logout(&self, refresh: &str) -> Result<(), ApiError> {
        let body = LogoutRequest { refresh };
        self.send_empty(self.request(Method::POST, LOGOUT_PATH).json(&body))
            .await
    }
}

#[async_trait]
impl NotificationsApi for ApiGateway {
    async fn list_notifications(&self, user_id: UserId) -> Result<NotificationList, ApiError> {
        let path = list_notifications_path(user_id);
        self.send_json(self.request(Method::GET, &path)).await
    }
}

/// Pulls a readable message out of an error body.
///
/// Handles `{"detail": ..}`, `{"error": ..}`, `{"message": ..}` and
/// field-keyed validation maps like `{"email": ["already taken"]}`.
fn error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            trimmed.chars().take(MAX_ERROR_BODY).collect()
        }
    };

    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };

    for key in ["detail", "error", "message"] {
        if let Some(text) = map.get(key).and_then(Value::as_str) {
            return text.to_string();
        }
    }

    map.iter()
        .find_map(|(field, value)| {
            let first = match value {
                Value::String(text) => Some(text.as_str()),
                Value::Array(items) => items.first().and_then(Value::as_str),
                _ => None,
            }?;
            Some(format!("{}: {}", field, first))
        })
        .unwrap_or_else(fallback)
}
