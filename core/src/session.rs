//! Signed-in identity and its persisted copy.

use std::fs;
use std::io::{self, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tally_gateway::CredentialSource;
use tally_types::{Credential, UserId};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub credential: Credential,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("session file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode session: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Where a [`Session`] survives restarts.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<Session>, SessionError>;
    fn save(&self, session: &Session) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

/// JSON file readable only by its owner, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SessionError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec_pretty(session).map_err(SessionError::Encode)?;
        self.write_atomic(&bytes)
            .map_err(|err| self.io_error(err))
    }

    fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    session: Mutex<Option<Session>>,
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// The current session, shared by the gateway (as its credential source) and
/// the read and write sides.
#[derive(Clone)]
pub struct SessionStore {
    current: Arc<RwLock<Option<Session>>>,
    storage: Arc<dyn SessionStorage>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("user_id", &self.user_id())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            storage,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStorage::default()))
    }

    /// Load the persisted session. A corrupt file is discarded.
    pub fn restore(&self) -> Result<Option<Session>, SessionError> {
        let restored = match self.storage.load() {
            Ok(session) => session,
            Err(err @ SessionError::Corrupt { .. }) => {
                warn!(%err, "Discarding unreadable session");
                self.storage.clear()?;
                None
            }
            Err(err) => return Err(err),
        };
        if let Some(session) = &restored {
            info!(user_id = %session.user_id, "Session restored");
        }
        self.replace(restored.clone());
        Ok(restored)
    }

    /// Make `session` current and persist it.
    pub fn set(&self, session: Session) -> Result<(), SessionError> {
        info!(user_id = %session.user_id, "Signed in");
        self.storage.save(&session)?;
        self.replace(Some(session));
        Ok(())
    }

    /// Forget the session in memory and on disk.
    ///
    /// The in-memory session is dropped even if deleting the file fails.
    pub fn clear(&self) -> Result<(), SessionError> {
        if let Some(previous) = self.replace(None) {
            info!(user_id = %previous.user_id, "Signed out");
        }
        self.storage.clear()
    }

    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.user_id)
    }

    fn replace(&self, session: Option<Session>) -> Option<Session> {
        mem::replace(
            &mut *self.current.write().unwrap_or_else(PoisonError::into_inner),
            session,
        )
    }
}

impl CredentialSource for SessionStore {
    fn bearer(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.credential.clone())
    }
}
