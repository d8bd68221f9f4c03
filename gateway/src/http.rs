//! reqwest implementation of [`Gateway`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tally_types::{
    Credentials, Folder, FolderId, FolderName, Task, TaskDraft, TaskId, TaskScope, UserId,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    AuthGrant, CONNECT_TIMEOUT_SECS, CredentialSource, Gateway, GatewayError,
    base_client_builder, error_message,
};

/// Connection settings for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Backend origin, e.g. `http://localhost:8080`.
    pub base_url: Url,
    /// Whole-request timeout. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    /// Refuse plain-HTTP backends.
    pub https_only: bool,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: None,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            https_only: false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewFolder<'a> {
    name: &'a FolderName,
    user_id: UserId,
}

#[derive(Serialize)]
struct RenamedFolder<'a> {
    name: &'a FolderName,
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    pub fn new(
        config: &GatewayConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, GatewayError> {
        if config.base_url.cannot_be_a_base() {
            return Err(GatewayError::transport(
                "configure gateway",
                format!("'{}' is not a usable base URL", config.base_url),
            ));
        }
        let client = base_client_builder(config)
            .build()
            .map_err(|err| GatewayError::transport("build HTTP client", err))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            credentials,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejected cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn owned_endpoint(&self, segments: &[&str], owner: UserId) -> Url {
        let mut url = self.endpoint(segments);
        url.query_pairs_mut()
            .append_pair("userId", &owner.to_string());
        url
    }

    /// Send with the current bearer credential attached, if any.
    async fn send(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<Response, GatewayError> {
        let request = match self.credentials.bearer() {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        };
        dispatch(request, operation).await
    }

    async fn authenticate(
        &self,
        path: &str,
        credentials: &Credentials,
        operation: &'static str,
    ) -> Result<AuthGrant, GatewayError> {
        let url = self.endpoint(&["api", "auth", path]);
        // Auth endpoints never carry a bearer token.
        let response = dispatch(self.client.post(url).json(credentials), operation).await?;
        decode(response, operation).await
    }
}

async fn dispatch(request: RequestBuilder, operation: &'static str) -> Result<Response, GatewayError> {
    let response = request.send().await.map_err(|err| {
        warn!(operation, %err, "Request failed before a response arrived");
        GatewayError::transport(operation, err)
    })?;

    let status = response.status();
    if status.is_success() {
        debug!(operation, status = status.as_u16(), "Request succeeded");
        return Ok(response);
    }

    let message = error_message(response).await;
    warn!(operation, status = status.as_u16(), %message, "Backend rejected request");
    Err(GatewayError::from_status(status.as_u16(), message))
}

async fn decode<T: DeserializeOwned>(
    response: Response,
    operation: &'static str,
) -> Result<T, GatewayError> {
    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| GatewayError::transport(operation, err))?;
    serde_json::from_slice(&bytes).map_err(|err| {
        warn!(operation, %err, "Backend response did not decode");
        GatewayError::malformed(operation, status, err)
    })
}

impl Gateway for HttpGateway {
    async fn login(&self, credentials: &Credentials) -> Result<AuthGrant, GatewayError> {
        self.authenticate("login", credentials, "login").await
    }

    async fn register(&self, credentials: &Credentials) -> Result<AuthGrant, GatewayError> {
        self.authenticate("register", credentials, "register").await
    }

    async fn list_folders(&self, owner: UserId) -> Result<Vec<Folder>, GatewayError> {
        let url = self.owned_endpoint(&["api", "folders"], owner);
        let response = self.send(self.client.get(url), "list folders").await?;
        decode(response, "list folders").await
    }

    async fn create_folder(&self, owner: UserId, name: &FolderName) -> Result<Folder, GatewayError> {
        let url = self.endpoint(&["api", "folders"]);
        let body = NewFolder {
            name,
            user_id: owner,
        };
        let response = self
            .send(self.client.post(url).json(&body), "create folder")
            .await?;
        decode(response, "create folder").await
    }

    async fn rename_folder(
        &self,
        owner: UserId,
        id: FolderId,
        name: &FolderName,
    ) -> Result<Folder, GatewayError> {
        let url = self.owned_endpoint(&["api", "folders", &id.to_string()], owner);
        let response = self
            .send(self.client.put(url).json(&RenamedFolder { name }), "rename folder")
            .await?;
        decode(response, "rename folder").await
    }

    async fn delete_folder(&self, owner: UserId, id: FolderId) -> Result<(), GatewayError> {
        let url = self.owned_endpoint(&["api", "folders", &id.to_string()], owner);
        self.send(self.client.delete(url), "delete folder").await?;
        Ok(())
    }

    async fn list_tasks(&self, owner: UserId, scope: TaskScope) -> Result<Vec<Task>, GatewayError> {
        let mut url = self.owned_endpoint(&["api", "todos"], owner);
        match scope {
            TaskScope::All => {
                url.query_pairs_mut().append_pair("all", "true");
            }
            TaskScope::Folder(folder) => {
                url.query_pairs_mut()
                    .append_pair("folderId", &folder.to_string());
            }
            TaskScope::Unfiled => {}
        }
        let response = self.send(self.client.get(url), "list tasks").await?;
        decode(response, "list tasks").await
    }

    async fn create_task(&self, draft: &TaskDraft) -> Result<Task, GatewayError> {
        let url = self.endpoint(&["api", "todos"]);
        let response = self
            .send(self.client.post(url).json(draft), "create task")
            .await?;
        decode(response, "create task").await
    }

    async fn replace_task(&self, id: TaskId, draft: &TaskDraft) -> Result<Task, GatewayError> {
        let url = self.endpoint(&["api", "todos", &id.to_string()]);
        let response = self
            .send(self.client.put(url).json(draft), "update task")
            .await?;
        decode(response, "update task").await
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), GatewayError> {
        let url = self.endpoint(&["api", "todos", &id.to_string()]);
        self.send(self.client.delete(url), "delete task").await?;
        Ok(())
    }

    async fn set_completion(&self, id: TaskId, completed: bool) -> Result<Task, GatewayError> {
        let target = if completed { "complete" } else { "incomplete" };
        let url = self.endpoint(&["api", "todos", &id.to_string(), target]);
        let response = self
            .send(self.client.put(url), "set task completion")
            .await?;
        decode(response, "set task completion").await
    }
}
