//! Persisted credential pair.
//!
//! Lives at `~/.codblog/credentials.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "credentials": { "access": "...", "refresh": "...", "user": { "id": 7, "username": "ann" } }
//! }
//! ```
//!
//! Loading is defensive: an empty, corrupt, or wrong-version file loads as
//! "no credentials" so a damaged file signs the user out instead of crashing.
//! Writes go through a temp file and rename.
//!
//! Readers are public. Only the session manager mutates the store, which is
//! why `replace` and `clear` are crate-private.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use codblog_protocol::UserIdentity;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

const FILE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Access credential, refresh credential, and the identity they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
    #[serde(default)]
    user: Option<UserIdentity>,
}

impl CredentialPair {
    pub fn new(
        access: impl Into<String>,
        refresh: impl Into<String>,
        user: Option<UserIdentity>,
    ) -> Self {
        Self {
            access: Some(access.into()),
            refresh: Some(refresh.into()),
            user,
        }
    }

    pub fn access(&self) -> Option<&str> {
        self.access.as_deref()
    }

    pub fn refresh(&self) -> Option<&str> {
        self.refresh.as_deref()
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        self.user.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }

    /// Empty strings count as absent.
    fn normalized(self) -> Self {
        let keep = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            access: keep(self.access),
            refresh: keep(self.refresh),
            user: self.user,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    #[serde(default)]
    credentials: CredentialPair,
}

/// Shared handle to the credential pair. Cloning shares the same storage.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    pair: Arc<RwLock<CredentialPair>>,
    file_path: Option<PathBuf>,
}

impl CredentialStore {
    pub fn open(file_path: &Path) -> Result<Self, StoreError> {
        let pair = load_file(file_path)?;
        Ok(Self {
            pair: Arc::new(RwLock::new(pair)),
            file_path: Some(file_path.to_path_buf()),
        })
    }

    pub fn in_memory() -> Self {
        Self::in_memory_with(CredentialPair::default())
    }

    pub fn in_memory_with(pair: CredentialPair) -> Self {
        Self {
            pair: Arc::new(RwLock::new(pair.normalized())),
            file_path: None,
        }
    }

    pub fn snapshot(&self) -> CredentialPair {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh.clone()
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.read().user.clone()
    }

    pub(crate) fn replace(&self, pair: CredentialPair) -> Result<(), StoreError> {
        let pair = pair.normalized();
        let mut guard = self.write();
        if let Some(path) = &self.file_path {
            persist(path, &pair)?;
        }
        *guard = pair;
        Ok(())
    }

    /// Removes both credentials and the cached identity. The in-memory pair
    /// is cleared even when the file write fails.
    pub(crate) fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.write();
        *guard = CredentialPair::default();
        match &self.file_path {
            Some(path) => persist(path, &guard),
            None => Ok(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CredentialPair> {
        self.pair
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CredentialPair> {
        self.pair
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_file(path: &Path) -> Result<CredentialPair, StoreError> {
    if !path.exists() {
        return Ok(CredentialPair::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if content.trim().is_empty() {
        tracing::warn!(path = %path.display(), "Credential file is empty, starting signed out");
        return Ok(CredentialPair::default());
    }

    match serde_json::from_str::<CredentialFile>(&content) {
        Ok(file) if file.version == FILE_VERSION => Ok(file.credentials.normalized()),
        Ok(file) => {
            tracing::warn!(
                path = %path.display(),
                version = file.version,
                expected = FILE_VERSION,
                "Unsupported credential file version, starting signed out"
            );
            Ok(CredentialPair::default())
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Credential file is corrupt, starting signed out"
            );
            Ok(CredentialPair::default())
        }
    }
}

fn persist(path: &Path, pair: &CredentialPair) -> Result<(), StoreError> {
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let content = serde_json::to_string_pretty(&CredentialFile {
        version: FILE_VERSION,
        credentials: pair.clone(),
    })?;

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(parent_dir).map_err(write_err)?;

    // NamedTempFile is created 0600, which the rename preserves.
    let mut temp_file = NamedTempFile::new_in(parent_dir).map_err(write_err)?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(write_err)?;
    temp_file.flush().map_err(write_err)?;
    temp_file.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}
