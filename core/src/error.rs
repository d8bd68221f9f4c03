use tally_gateway::{GatewayError, RemoteError};
use tally_types::ValidationError;
use thiserror::Error;

use crate::cache::CacheError;
use crate::session::SessionError;

/// Failure of a read or write, classified by what the caller can do next.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Rejected locally; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The backend rejected the credential. The session has been cleared.
    #[error("signed out: {0}")]
    Auth(RemoteError),
    /// The entity is gone. Its cached scopes have been invalidated.
    #[error("not found: {0}")]
    NotFound(RemoteError),
    #[error("{0}")]
    Remote(RemoteError),
    /// The operation needs a signed-in user.
    #[error("not signed in")]
    SignedOut,
    /// The awaited entry was flushed (logout or user switch) before it settled.
    #[error("result discarded: the session changed while loading")]
    Discarded,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SyncError {
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(remote) => SyncError::Auth(remote),
            GatewayError::NotFound(remote) => SyncError::NotFound(remote),
            GatewayError::Remote(remote) => SyncError::Remote(remote),
        }
    }
}

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Fetch(err) => err.into(),
            CacheError::Discarded => SyncError::Discarded,
        }
    }
}
