//! # codblog-core
//!
//! Client-side core for codblog: keeps the credential pair usable and keeps a
//! live notification channel attached to the signed-in user.
//!
//! ## Design Principles
//!
//! - **Injected context**: no ambient globals. [`SessionContext`] wires the
//!   credential store, API gateway and session manager together and is passed
//!   to whatever needs it; tests inject fakes through [`AuthApi`] and
//!   [`ChannelConnector`].
//! - **Fail closed**: any doubt about a credential resolves to
//!   `Unauthenticated` with an empty store.
//! - **Server-authoritative counts**: the unread counter is overwritten, never
//!   incremented locally.
//! - **Scoped cleanup**: timers and sockets are owned by handles that cancel
//!   on drop.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use codblog_core::{ClientConfig, SessionContext, StorageConfig};
//!
//! let storage = StorageConfig::from_env()?;
//! let config = ClientConfig::load_with_env(&storage.config_file())?;
//! let context = SessionContext::new(config, storage)?;
//! let state = context.start().await;
//! ```

pub mod api;
pub mod backoff;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod notifications;
pub mod session;
pub mod storage;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, ApiGateway, AuthApi, NotificationsApi};
pub use backoff::ReconnectPolicy;
pub use config::{ClientConfig, ReconnectConfig, ReconnectStrategy};
pub use context::SessionContext;
pub use credentials::{CredentialPair, CredentialStore, StoreError};
pub use error::{CoreError, Result};
pub use guard::{GuardDecision, RouteGuard};
pub use notifications::{
    Alert, AlertKind, AlertSink, ChannelAlerts, ChannelConnector, ChannelError, ConnectionPhase,
    LogAlerts, NotificationChannelManager, UnreadCount, WsConnector,
};
pub use session::{PeriodicRefresh, SessionError, SessionManager, SessionState};
pub use storage::StorageConfig;
pub use token::TokenError;
