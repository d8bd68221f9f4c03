//! In-memory backend for core tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

use tally_gateway::{AuthGrant, Gateway, GatewayError};
use tally_types::{
    Credential, Credentials, Folder, FolderId, FolderName, Task, TaskDraft, TaskForm, TaskId,
    TaskScope, UserId,
};

use crate::context::SyncContext;
use crate::session::{Session, SessionStore};

pub(crate) const ALICE: UserId = UserId::new(1);

#[derive(Default)]
struct Backend {
    next_id: i64,
    users: HashMap<String, UserId>,
    folders: BTreeMap<FolderId, Folder>,
    tasks: BTreeMap<TaskId, Task>,
    fail_next: Option<GatewayError>,
    calls: Vec<String>,
}

impl Backend {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Behaves like the real backend, including leaving `folderId` off listed
/// tasks and cascading folder deletes.
#[derive(Default)]
pub(crate) struct FakeGateway {
    backend: Mutex<Backend>,
}

impl FakeGateway {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Backend) -> T) -> T {
        f(&mut self.backend.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Record `call`, then fail it if a failure was queued.
    fn enter(&self, call: String) -> Result<(), GatewayError> {
        self.with(|backend| {
            backend.calls.push(call);
            backend.fail_next.take().map_or(Ok(()), Err)
        })
    }

    pub(crate) fn add_user(&self, username: &str) -> UserId {
        self.with(|backend| {
            let id = UserId::new(backend.next_id());
            backend.users.insert(username.to_string(), id);
            id
        })
    }

    pub(crate) fn seed_folder(&self, owner: UserId, name: &str) -> Folder {
        self.with(|backend| {
            let folder = Folder {
                id: FolderId::new(backend.next_id()),
                name: FolderName::new(name).unwrap(),
                user_id: owner,
            };
            backend.folders.insert(folder.id, folder.clone());
            folder
        })
    }

    pub(crate) fn seed_task(&self, owner: UserId, title: &str, folder: Option<FolderId>) -> Task {
        let draft = form(title, folder).validate(owner).unwrap();
        self.with(|backend| {
            let task = materialize(TaskId::new(backend.next_id()), &draft, false);
            backend.tasks.insert(task.id, task.clone());
            task
        })
    }

    /// Fail the next gateway call with `err`.
    pub(crate) fn fail_next(&self, err: GatewayError) {
        self.with(|backend| backend.fail_next = Some(err));
    }

    /// Calls whose description starts with `prefix`.
    pub(crate) fn calls(&self, prefix: &str) -> usize {
        self.with(|backend| {
            backend
                .calls
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        })
    }

    /// Server-side record, `folderId` included.
    pub(crate) fn task(&self, id: TaskId) -> Option<Task> {
        self.with(|backend| backend.tasks.get(&id).cloned())
    }

    pub(crate) fn remove_task_behind_the_scenes(&self, id: TaskId) {
        self.with(|backend| {
            backend.tasks.remove(&id);
        });
    }
}

pub(crate) fn form(title: &str, folder: Option<FolderId>) -> TaskForm {
    TaskForm {
        title: title.into(),
        task_type: "coding".into(),
        priority: "high".into(),
        start_time: "2025-02-10T14:25".into(),
        folder_id: folder,
        ..TaskForm::default()
    }
}

fn materialize(id: TaskId, draft: &TaskDraft, completed: bool) -> Task {
    Task {
        id,
        title: draft.title.clone(),
        task_type: draft.task_type,
        priority: draft.priority,
        start_time: draft.start_time,
        frequency: draft.frequency,
        context: draft.context.clone(),
        user_id: draft.user_id,
        folder_id: draft.folder_id,
        completed,
        created_at: None,
        end_time: None,
        predicted_completion_time: None,
        actual_completion_time: None,
    }
}

/// What the backend serializes: no `folderId`.
fn on_the_wire(task: &Task) -> Task {
    Task {
        folder_id: None,
        ..task.clone()
    }
}

/// The backend's answer for a missing entity: a 500 from its exception handler.
fn not_found(what: &str, id: impl Display) -> GatewayError {
    GatewayError::from_status(500, format!("An error occurred: {what} not found with id: {id}"))
}

fn grant(id: UserId, username: &str) -> AuthGrant {
    AuthGrant {
        id,
        username: username.to_string(),
        token: Credential::new(format!("token-{id}")),
    }
}

impl Gateway for FakeGateway {
    async fn login(&self, credentials: &Credentials) -> Result<AuthGrant, GatewayError> {
        self.enter(format!("login {}", credentials.username()))?;
        let username = credentials.username().to_string();
        self.with(|backend| match backend.users.get(&username) {
            Some(id) => Ok(grant(*id, &username)),
            None => Err(GatewayError::from_status(
                500,
                "An error occurred: Invalid username or password".into(),
            )),
        })
    }

    async fn register(&self, credentials: &Credentials) -> Result<AuthGrant, GatewayError> {
        self.enter(format!("register {}", credentials.username()))?;
        let username = credentials.username().to_string();
        if self.with(|backend| backend.users.contains_key(&username)) {
            return Err(GatewayError::from_status(
                500,
                "An error occurred: Username already exists".into(),
            ));
        }
        let id = self.add_user(&username);
        Ok(grant(id, &username))
    }

    async fn list_folders(&self, owner: UserId) -> Result<Vec<Folder>, GatewayError> {
        self.enter(format!("list_folders {owner}"))?;
        Ok(self.with(|backend| {
            backend
                .folders
                .values()
                .filter(|folder| folder.user_id == owner)
                .cloned()
                .collect()
        }))
    }

    async fn create_folder(&self, owner: UserId, name: &FolderName) -> Result<Folder, GatewayError> {
        self.enter(format!("create_folder {name}"))?;
        Ok(self.seed_folder(owner, name.as_str()))
    }

    async fn rename_folder(
        &self,
        owner: UserId,
        id: FolderId,
        name: &FolderName,
    ) -> Result<Folder, GatewayError> {
        self.enter(format!("rename_folder {id}"))?;
        self.with(|backend| match backend.folders.get_mut(&id) {
            Some(folder) if folder.user_id == owner => {
                folder.name = name.clone();
                Ok(folder.clone())
            }
            _ => Err(not_found("Folder", id)),
        })
    }

    async fn delete_folder(&self, owner: UserId, id: FolderId) -> Result<(), GatewayError> {
        self.enter(format!("delete_folder {id}"))?;
        self.with(|backend| {
            let owned = backend
                .folders
                .get(&id)
                .is_some_and(|folder| folder.user_id == owner);
            if !owned {
                return Err(not_found("Folder", id));
            }
            backend.folders.remove(&id);
            backend.tasks.retain(|_, task| task.folder_id != Some(id));
            Ok(())
        })
    }

    async fn list_tasks(&self, owner: UserId, scope: TaskScope) -> Result<Vec<Task>, GatewayError> {
        self.enter(format!("list_tasks {scope}"))?;
        Ok(self.with(|backend| {
            backend
                .tasks
                .values()
                .filter(|task| task.user_id == owner)
                .filter(|task| match scope {
                    TaskScope::All => true,
                    TaskScope::Folder(folder) => task.folder_id == Some(folder),
                    TaskScope::Unfiled => task.folder_id.is_none(),
                })
                .map(on_the_wire)
                .collect()
        }))
    }

    async fn create_task(&self, draft: &TaskDraft) -> Result<Task, GatewayError> {
        self.enter(format!("create_task {}", draft.title))?;
        self.with(|backend| {
            if let Some(folder) = draft.folder_id
                && !backend.folders.contains_key(&folder)
            {
                return Err(not_found("Folder", folder));
            }
            let task = materialize(TaskId::new(backend.next_id()), draft, false);
            backend.tasks.insert(task.id, task.clone());
            Ok(on_the_wire(&task))
        })
    }

    async fn replace_task(&self, id: TaskId, draft: &TaskDraft) -> Result<Task, GatewayError> {
        self.enter(format!("replace_task {id}"))?;
        self.with(|backend| {
            let Some(completed) = backend.tasks.get(&id).map(|task| task.completed) else {
                return Err(not_found("Todo", id));
            };
            let task = materialize(id, draft, completed);
            backend.tasks.insert(id, task.clone());
            Ok(on_the_wire(&task))
        })
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), GatewayError> {
        self.enter(format!("delete_task {id}"))?;
        self.with(|backend| {
            backend
                .tasks
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| not_found("Todo", id))
        })
    }

    async fn set_completion(&self, id: TaskId, completed: bool) -> Result<Task, GatewayError> {
        self.enter(format!("set_completion {id}"))?;
        self.with(|backend| match backend.tasks.get_mut(&id) {
            Some(task) => {
                task.completed = completed;
                Ok(on_the_wire(task))
            }
            None => Err(not_found("Todo", id)),
        })
    }
}

/// A context over `gateway` with `user` signed in.
pub(crate) fn signed_in(gateway: &Arc<FakeGateway>, user: UserId) -> SyncContext<FakeGateway> {
    let session = SessionStore::in_memory();
    session
        .set(Session {
            user_id: user,
            display_name: format!("user-{user}"),
            credential: Credential::new(format!("token-{user}")),
        })
        .unwrap();
    SyncContext::new(Arc::clone(gateway), session)
}

/// Let spawned fetches run to completion.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
