//! Wire types shared by codblog clients and the codblog API.
//!
//! This crate owns the shape of every HTTP body and notification frame the
//! client exchanges with the server, so the session and channel code never
//! touch raw JSON. The server remains the authority on validation; the
//! parsers here only reject what the client cannot act on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable numeric identifier of a user account.
pub type UserId = u64;

pub const TOKEN_REFRESH_PATH: &str = "token/refresh/";
pub const LOGIN_PATH: &str = "accounts/login/";
pub const REGISTER_PATH: &str = "accounts/register/";
pub const LOGOUT_PATH: &str = "accounts/logout/";
pub const GET_USER_PATH: &str = "accounts/get-user/";

pub fn list_notifications_path(user_id: UserId) -> String {
    format!("posts/list-notifications/{}/", user_id)
}

pub fn notification_action_path(notification_id: u64) -> String {
    format!("posts/notification-actions/{}/", notification_id)
}

/// Path of the per-user notification channel, relative to the WebSocket base.
pub fn notification_channel_path(user_id: UserId) -> String {
    format!("ws/notifications/{}/", user_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

/// The authenticated user's stable identifier plus a minimal profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Response of the token refresh endpoint. The refresh credential is only
/// present when the server rotates it.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: UserIdentity,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub confirm_password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct LogoutRequest<'a> {
    pub refresh: &'a str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification records (HTTP)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSender {
    #[serde(default)]
    pub id: Option<UserId>,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: u64,
    pub notification_type: NotificationKind,
    #[serde(default)]
    pub is_read: bool,
    pub sender: NotificationSender,
    #[serde(default)]
    pub post_title: Option<String>,
    #[serde(default)]
    pub comment_content: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response of `posts/list-notifications/<user_id>/`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationList {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub notification_data: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    MarkRead,
    MarkUnread,
    Delete,
}

#[derive(Debug, Serialize)]
pub struct NotificationActionRequest {
    pub action: NotificationAction,
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification frames (channel)
// ─────────────────────────────────────────────────────────────────────────────

/// An event pushed by the server over the notification channel.
///
/// Every variant that carries an `unread_count` carries the server's
/// authoritative value: consumers overwrite their counter with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    CountUpdate {
        unread_count: u64,
    },
    Like {
        message: String,
        unread_count: u64,
    },
    Comment {
        message: String,
        unread_count: u64,
    },
    Follow {
        message: String,
        unread_count: u64,
    },
    /// Generic shape, e.g. unfollow notices: `{notification, unread_count?}`.
    Other {
        kind: String,
        notification: Option<String>,
        unread_count: Option<u64>,
    },
}

impl NotificationEvent {
    pub fn unread_count(&self) -> Option<u64> {
        match self {
            NotificationEvent::CountUpdate { unread_count }
            | NotificationEvent::Like { unread_count, .. }
            | NotificationEvent::Comment { unread_count, .. }
            | NotificationEvent::Follow { unread_count, .. } => Some(*unread_count),
            NotificationEvent::Other { unread_count, .. } => *unread_count,
        }
    }

    /// Human-readable text to surface as a transient alert, if any.
    pub fn alert_text(&self) -> Option<&str> {
        let text = match self {
            NotificationEvent::CountUpdate { .. } => return None,
            NotificationEvent::Like { message, .. }
            | NotificationEvent::Comment { message, .. }
            | NotificationEvent::Follow { message, .. } => message.as_str(),
            NotificationEvent::Other { notification, .. } => notification.as_deref()?,
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no type discriminator")]
    MissingType,

    #[error("{kind} frame is missing unread_count")]
    MissingUnreadCount { kind: String },

    #[error("unread_count must be a non-negative integer, got {0}")]
    InvalidUnreadCount(String),

    #[error("{kind} frame carries neither notification nor unread_count")]
    Unrecognized { kind: String },
}

/// Parses a text frame received on the notification channel.
pub fn parse_frame(text: &str) -> Result<NotificationEvent, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| FrameError::InvalidJson(err.to_string()))?;
    let object = value.as_object().ok_or(FrameError::NotAnObject)?;

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|kind| !kind.is_empty())
        .ok_or(FrameError::MissingType)?
        .to_string();

    let unread_count = match object.get("unread_count") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .ok_or_else(|| FrameError::InvalidUnreadCount(value.to_string()))?,
        ),
    };
    let message = string_field(object.get("message"));

    match kind.as_str() {
        "count_update" => {
            return Ok(NotificationEvent::CountUpdate {
                unread_count: require_count(&kind, unread_count)?,
            })
        }
        "like_notification" => {
            return Ok(NotificationEvent::Like {
                unread_count: require_count(&kind, unread_count)?,
                message: message.unwrap_or_default(),
            })
        }
        "comment_notification" => {
            return Ok(NotificationEvent::Comment {
                unread_count: require_count(&kind, unread_count)?,
                message: message.unwrap_or_default(),
            })
        }
        "follow_notification" => {
            return Ok(NotificationEvent::Follow {
                unread_count: require_count(&kind, unread_count)?,
                message: message.unwrap_or_default(),
            })
        }
        _ => {}
    }

    let notification = string_field(object.get("notification")).or(message);
    if notification.is_none() && unread_count.is_none() {
        return Err(FrameError::Unrecognized { kind });
    }
    Ok(NotificationEvent::Other {
        kind,
        notification,
        unread_count,
    })
}

fn require_count(kind: &str, unread_count: Option<u64>) -> Result<u64, FrameError> {
    unread_count.ok_or_else(|| FrameError::MissingUnreadCount {
        kind: kind.to_string(),
    })
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}
