//! Local persistence of a device's session so a reload can resume it.

use crate::client::reconciler::ClientRole;
use crate::state::projection::LobbyProjection;
use crate::types::{LobbyCode, OwnerToken};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

/// Everything a device remembers about its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSession {
    pub role: Option<ClientRole>,
    pub lobby_code: Option<LobbyCode>,
    pub owner_token: Option<OwnerToken>,
    pub projection: LobbyProjection,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache contents are invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache lock poisoned")]
    Poisoned,
}

/// Best-effort storage. Callers log failures and carry on.
pub trait StateCache: Send + Sync {
    fn load(&self) -> Result<Option<CachedSession>, CacheError>;
    fn store(&self, session: &CachedSession) -> Result<(), CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
}

/// JSON file on disk
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateCache for FileCache {
    fn load(&self) -> Result<Option<CachedSession>, CacheError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn store(&self, session: &CachedSession) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process cache, mostly for tests and headless devices
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<Option<CachedSession>>,
}

impl StateCache for MemoryCache {
    fn load(&self) -> Result<Option<CachedSession>, CacheError> {
        Ok(self.inner.lock().map_err(|_| CacheError::Poisoned)?.clone())
    }

    fn store(&self, session: &CachedSession) -> Result<(), CacheError> {
        *self.inner.lock().map_err(|_| CacheError::Poisoned)? = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        *self.inner.lock().map_err(|_| CacheError::Poisoned)? = None;
        Ok(())
    }
}
