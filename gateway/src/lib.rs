//! Typed REST client for the Tally backend.
//!
//! # Architecture
//!
//! The crate is a pure boundary adapter: it turns typed arguments into HTTP
//! requests and HTTP responses into typed values or a [`GatewayError`]. It does
//! no caching and no retries; both belong to callers.
//!
//! - [`Gateway`] - the operations the synchronization core needs, one per
//!   backend endpoint
//! - [`HttpGateway`] - the reqwest implementation
//! - [`CredentialSource`] - where the bearer token comes from at request time
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `login` / `register` | `POST /api/auth/{login,register}` |
//! | `list_folders` | `GET /api/folders?userId=` |
//! | `create_folder` | `POST /api/folders` |
//! | `rename_folder` | `PUT /api/folders/{id}?userId=` |
//! | `delete_folder` | `DELETE /api/folders/{id}?userId=` |
//! | `list_tasks` | `GET /api/todos?userId=` + `all=true` / `folderId=` |
//! | `create_task` | `POST /api/todos` |
//! | `replace_task` | `PUT /api/todos/{id}` |
//! | `delete_task` | `DELETE /api/todos/{id}` |
//! | `set_completion` | `PUT /api/todos/{id}/{complete,incomplete}` |
//!
//! # Error Handling
//!
//! Every non-2xx status becomes a [`GatewayError`]: 401/403 map to
//! [`GatewayError::Auth`]; 404, and a 5xx whose body says
//! `not found with id`, to [`GatewayError::NotFound`]; everything else
//! (including transport failures and bodies that do not decode) to
//! [`GatewayError::Remote`]. The trimmed response body, capped at 32 KiB, is
//! the error message when present.

mod error;
mod http;

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tally_types::{
    Credential, Credentials, Folder, FolderId, FolderName, Task, TaskDraft, TaskId, TaskScope,
    UserId,
};

pub use error::{GatewayError, RemoteError};
pub use http::{GatewayConfig, HttpGateway};

pub use tally_types;

const CONNECT_TIMEOUT_SECS: u64 = 10;

const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_MAX_IDLE_PER_HOST: usize = 8;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub id: UserId,
    pub username: String,
    pub token: Credential,
}

/// Supplies the bearer credential for each authenticated request.
pub trait CredentialSource: Send + Sync {
    fn bearer(&self) -> Option<Credential>;
}

impl CredentialSource for Credential {
    fn bearer(&self) -> Option<Credential> {
        Some(self.clone())
    }
}

/// No credential; requests go out without an `Authorization` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialSource for Anonymous {
    fn bearer(&self) -> Option<Credential> {
        None
    }
}

/// Backend operations used by the synchronization core.
///
/// Implementations attach the current credential themselves; callers pass
/// only domain arguments.
pub trait Gateway: Send + Sync + 'static {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AuthGrant, GatewayError>> + Send;

    fn register(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AuthGrant, GatewayError>> + Send;

    fn list_folders(
        &self,
        owner: UserId,
    ) -> impl Future<Output = Result<Vec<Folder>, GatewayError>> + Send;

    fn create_folder(
        &self,
        owner: UserId,
        name: &FolderName,
    ) -> impl Future<Output = Result<Folder, GatewayError>> + Send;

    fn rename_folder(
        &self,
        owner: UserId,
        id: FolderId,
        name: &FolderName,
    ) -> impl Future<Output = Result<Folder, GatewayError>> + Send;

    fn delete_folder(
        &self,
        owner: UserId,
        id: FolderId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn list_tasks(
        &self,
        owner: UserId,
        scope: TaskScope,
    ) -> impl Future<Output = Result<Vec<Task>, GatewayError>> + Send;

    fn create_task(
        &self,
        draft: &TaskDraft,
    ) -> impl Future<Output = Result<Task, GatewayError>> + Send;

    /// Full replacement: the backend expects every field, not a partial patch.
    fn replace_task(
        &self,
        id: TaskId,
        draft: &TaskDraft,
    ) -> impl Future<Output = Result<Task, GatewayError>> + Send;

    fn delete_task(&self, id: TaskId) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn set_completion(
        &self,
        id: TaskId,
        completed: bool,
    ) -> impl Future<Output = Result<Task, GatewayError>> + Send;
}

fn base_client_builder(config: &GatewayConfig) -> reqwest::ClientBuilder {
    use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("tally/", env!("CARGO_PKG_VERSION"))),
    );

    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .https_only(config.https_only)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers);

    if let Some(timeout) = config.request_timeout {
        builder = builder.timeout(timeout);
    }
    builder
}

/// Message for a failed response: the trimmed body, cut at
/// [`MAX_ERROR_BODY_BYTES`], or the status reason when the body is blank.
///
/// The backend's exception handler puts its whole message in a plain-text
/// body, so that is what callers get to show and classify.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    use futures_util::StreamExt;

    let status = response.status();
    let mut body = Vec::new();
    let mut truncated = false;
    let mut stream = response.bytes_stream();
    while let Some(Ok(chunk)) = stream.next().await {
        let room = MAX_ERROR_BODY_BYTES - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }

    let text = String::from_utf8_lossy(&body);
    let text = text.trim();
    match (text.is_empty(), truncated) {
        (true, _) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        (false, true) => format!("{text} [truncated]"),
        (false, false) => text.to_string(),
    }
}
