use std::fmt;

use thiserror::Error;

/// What the backend (or the transport) said when a request failed.
///
/// `status` is `None` when no HTTP response arrived at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Gateway failure, classified by what the caller should do about it.
///
/// Cloneable so a failed fetch can sit in a cache entry and be handed to every
/// observer of that entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// 401/403: the credential is missing, expired, or rejected.
    #[error("authentication rejected ({0})")]
    Auth(RemoteError),
    /// 404, or a 5xx whose message says the entity was not found: the
    /// referenced entity no longer exists.
    #[error("not found ({0})")]
    NotFound(RemoteError),
    /// Any other non-2xx status, a transport failure, or a malformed body.
    #[error("{0}")]
    Remote(RemoteError),
}

/// The backend answers a lookup of a missing todo or folder with a 500 whose
/// body reads `An error occurred: Todo not found with id: N`.
const MISSING_ENTITY_MARKER: &str = "not found with id";

impl GatewayError {
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        let remote = RemoteError::new(Some(status), message);
        match status {
            401 | 403 => GatewayError::Auth(remote),
            404 => GatewayError::NotFound(remote),
            500..=599 if remote.message.contains(MISSING_ENTITY_MARKER) => {
                GatewayError::NotFound(remote)
            }
            _ => GatewayError::Remote(remote),
        }
    }

    pub fn transport(operation: &str, err: impl fmt::Display) -> Self {
        GatewayError::Remote(RemoteError::new(None, format!("{operation}: {err}")))
    }

    pub fn malformed(operation: &str, status: u16, err: impl fmt::Display) -> Self {
        GatewayError::Remote(RemoteError::new(
            Some(status),
            format!("{operation}: malformed response body: {err}"),
        ))
    }

    #[must_use]
    pub fn remote(&self) -> &RemoteError {
        match self {
            GatewayError::Auth(remote)
            | GatewayError::NotFound(remote)
            | GatewayError::Remote(remote) => remote,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.remote().status
    }

    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}
