//! Storage configuration and path management for codblog.
//!
//! All on-disk locations are decided here so the rest of the crate never
//! builds paths by hand. Tests use [`StorageConfig::with_root`] to point
//! everything at a temp directory.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Overrides the storage root (default: `~/.codblog`).
pub const HOME_ENV: &str = "CODBLOG_HOME";

/// Central configuration for all codblog storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the root from `CODBLOG_HOME`, falling back to `~/.codblog`.
    pub fn from_env() -> Result<Self> {
        if let Some(root) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(CoreError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(".codblog")))
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persisted credential pair and user identity.
    pub fn credentials_file(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
