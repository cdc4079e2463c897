//! Client configuration loading.
//!
//! Values come from `~/.codblog/config.toml` (missing file means defaults),
//! then `CODBLOG_API_URL` / `CODBLOG_WS_URL` override the two base URLs.

use std::env;
use std::path::Path;
use std::time::Duration;

use codblog_protocol::{notification_channel_path, UserId};
use serde::Deserialize;

use crate::backoff::ReconnectPolicy;
use crate::error::{CoreError, Result};

pub const API_URL_ENV: &str = "CODBLOG_API_URL";
pub const WS_URL_ENV: &str = "CODBLOG_WS_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/";
const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 50 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: ReconnectStrategy,
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::default(),
            delay_ms: default_reconnect_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        let base = Duration::from_millis(self.delay_ms.max(1));
        match self.strategy {
            ReconnectStrategy::Fixed => ReconnectPolicy::Fixed(base),
            ReconnectStrategy::Exponential => ReconnectPolicy::Exponential {
                base,
                max: Duration::from_millis(self.max_delay_ms.max(self.delay_ms)),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_base_url: default_ws_base_url(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads the config file, returning defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs_err::read_to_string(path).map_err(|source| CoreError::Io {
            context: format!("reading {}", path.display()),
            source,
        })?;
        let config: ClientConfig =
            toml::from_str(&content).map_err(|err| CoreError::ConfigMalformed {
                path: path.to_path_buf(),
                details: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// [`ClientConfig::load`] followed by environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(API_URL_ENV) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(url) = non_empty(WS_URL_ENV) {
            self.ws_base_url = url.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_scheme(&self.api_base_url, &["http://", "https://"])?;
        require_scheme(&self.ws_base_url, &["ws://", "wss://"])?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect.policy()
    }

    /// `<ws-base>/ws/notifications/<user_id>/`
    pub fn channel_url(&self, user_id: UserId) -> String {
        join_url(&self.ws_base_url, &notification_channel_path(user_id))
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn require_scheme(url: &str, schemes: &[&str]) -> Result<()> {
    if schemes.iter().any(|scheme| url.starts_with(scheme)) {
        return Ok(());
    }
    Err(CoreError::InvalidBaseUrl {
        url: url.to_string(),
        reason: format!("expected one of {}", schemes.join(", ")),
    })
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_ws_base_url() -> String {
    DEFAULT_WS_BASE_URL.to_string()
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_reconnect_max_delay_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_DELAY_MS
}
