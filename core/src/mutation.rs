//! Write side: gateway call, then invalidation of every affected key.
//!
//! Nothing is written into the cache speculatively. A successful mutation
//! marks the keys it affected stale, and watched keys refetch at once. A
//! failed mutation leaves the cache alone, except that a not-found invalidates the
//! entity's scopes and a rejected credential signs out.

use std::collections::HashSet;

use tally_gateway::{Gateway, GatewayError};
use tally_types::{
    Folder, FolderId, FolderName, Task, TaskForm, TaskId, TaskPatch, TaskScope, UserId,
    ValidationError, contains_folder,
};
use tracing::{debug, info};

use crate::cache::{CacheKey, FetchStatus, KeyPrefix};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::store::contains_task;

pub struct MutationCoordinator<G> {
    ctx: SyncContext<G>,
}

impl<G> Clone for MutationCoordinator<G> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<G: Gateway> MutationCoordinator<G> {
    pub fn new(ctx: SyncContext<G>) -> Self {
        Self { ctx }
    }

    /// Create a task in its folder (or unfiled). Invalidates that scope and "all".
    pub async fn create_task(&self, form: &TaskForm) -> Result<Task, SyncError> {
        let owner = self.ctx.owner()?;
        let draft = form.validate(owner)?;
        self.check_folder(owner, draft.folder_id)?;

        let mut created = self
            .ctx
            .gateway()
            .create_task(&draft)
            .await
            .map_err(|err| {
                self.fail(err, || {
                    // The referenced folder may be the missing entity.
                    self.invalidate_folders(owner);
                })
            })?;
        created.folder_id = created.folder_id.or(draft.folder_id);

        info!(task_id = %created.id, folder = ?draft.folder_id, "Task created");
        self.invalidate_tasks(owner, [TaskScope::home(draft.folder_id), TaskScope::All]);
        Ok(created)
    }

    /// Replace `current` with `patch` applied. Invalidates the scopes the task
    /// was in, the scope it moves to, and "all".
    pub async fn update_task(&self, current: &Task, patch: &TaskPatch) -> Result<Task, SyncError> {
        let owner = self.ctx.owner()?;
        if let Some(target) = patch.folder {
            self.check_folder(owner, target)?;
        }
        let draft = current.merged(patch);
        let before = self.scopes_holding(owner, current.id);

        let mut updated = self
            .ctx
            .gateway()
            .replace_task(current.id, &draft)
            .await
            .map_err(|err| self.fail(err, || self.invalidate_located(owner, current.id, before.clone())))?;
        updated.folder_id = updated.folder_id.or(draft.folder_id);

        info!(task_id = %current.id, from = ?current.folder_id, to = ?draft.folder_id, "Task updated");
        let mut scopes = before;
        scopes.extend(self.scopes_holding(owner, current.id));
        scopes.extend([
            TaskScope::home(current.folder_id),
            TaskScope::home(draft.folder_id),
            TaskScope::All,
        ]);
        self.invalidate_tasks(owner, scopes);
        Ok(updated)
    }

    /// Delete a task. Invalidates the cached scopes holding it, or every task
    /// scope of the owner when none does.
    pub async fn remove_task(&self, id: TaskId) -> Result<(), SyncError> {
        let owner = self.ctx.owner()?;
        let before = self.scopes_holding(owner, id);

        self.ctx
            .gateway()
            .delete_task(id)
            .await
            .map_err(|err| self.fail(err, || self.invalidate_located(owner, id, before.clone())))?;

        info!(task_id = %id, "Task removed");
        self.invalidate_located(owner, id, before);
        Ok(())
    }

    /// Mark a task done or not done. Only `completed` changes.
    pub async fn set_completion(&self, id: TaskId, completed: bool) -> Result<Task, SyncError> {
        let owner = self.ctx.owner()?;
        let before = self.scopes_holding(owner, id);

        let mut task = self
            .ctx
            .gateway()
            .set_completion(id, completed)
            .await
            .map_err(|err| self.fail(err, || self.invalidate_located(owner, id, before.clone())))?;
        if task.folder_id.is_none() {
            task.folder_id = before.iter().find_map(|scope| scope.folder_id());
        }

        info!(task_id = %id, completed, "Task completion set");
        let mut scopes = before;
        scopes.extend(task.folder_id.map(TaskScope::Folder));
        self.invalidate_located(owner, id, scopes);
        Ok(task)
    }

    pub async fn create_folder(&self, name: &str) -> Result<Folder, SyncError> {
        let owner = self.ctx.owner()?;
        let name = FolderName::new(name)?;

        let folder = self
            .ctx
            .gateway()
            .create_folder(owner, &name)
            .await
            .map_err(|err| self.fail(err, || self.invalidate_folders(owner)))?;

        info!(folder_id = %folder.id, "Folder created");
        self.invalidate_folders(owner);
        Ok(folder)
    }

    pub async fn rename_folder(&self, id: FolderId, name: &str) -> Result<Folder, SyncError> {
        let owner = self.ctx.owner()?;
        let name = FolderName::new(name)?;

        let folder = self
            .ctx
            .gateway()
            .rename_folder(owner, id, &name)
            .await
            .map_err(|err| self.fail(err, || self.invalidate_folders(owner)))?;

        info!(folder_id = %id, "Folder renamed");
        self.invalidate_folders(owner);
        Ok(folder)
    }

    /// Delete a folder and, on the backend, every task in it. Invalidates the
    /// folder list and every task scope of the owner, and deselects the folder
    /// if it was selected.
    pub async fn remove_folder(&self, id: FolderId) -> Result<(), SyncError> {
        let owner = self.ctx.owner()?;

        self.ctx
            .gateway()
            .delete_folder(owner, id)
            .await
            .map_err(|err| self.fail(err, || self.forget_folder(owner, id)))?;

        info!(folder_id = %id, "Folder removed");
        self.forget_folder(owner, id);
        Ok(())
    }

    /// Reject a folder the owner does not have, when the cached folder list is
    /// fresh enough to say so.
    fn check_folder(&self, owner: UserId, folder: Option<FolderId>) -> Result<(), ValidationError> {
        let Some(folder) = folder else {
            return Ok(());
        };
        let Some(snapshot) = self.ctx.caches().folders.peek(&CacheKey::folders(owner)) else {
            return Ok(());
        };
        match snapshot.value {
            Some(folders)
                if snapshot.status == FetchStatus::Fresh && !contains_folder(&folders, folder) =>
            {
                Err(ValidationError::field(
                    "folderId",
                    format!("Folder {folder} does not exist"),
                ))
            }
            _ => Ok(()),
        }
    }

    fn fail(&self, err: GatewayError, on_not_found: impl FnOnce()) -> SyncError {
        if err.is_not_found() {
            on_not_found();
        }
        self.ctx.absorb(err)
    }

    fn scopes_holding(&self, owner: UserId, id: TaskId) -> Vec<TaskScope> {
        self.ctx
            .caches()
            .tasks
            .keys_where(&KeyPrefix::tasks_of(owner), |tasks| contains_task(tasks, id))
            .into_iter()
            .filter_map(|key| key.task_scope())
            .collect()
    }

    /// Invalidate `known` plus wherever the task is cached now, and "all".
    /// With no known location, invalidate every task scope of the owner.
    fn invalidate_located(&self, owner: UserId, id: TaskId, mut known: Vec<TaskScope>) {
        known.extend(self.scopes_holding(owner, id));
        if known.is_empty() {
            let count = self
                .ctx
                .caches()
                .tasks
                .invalidate_prefix(&KeyPrefix::tasks_of(owner));
            debug!(task_id = %id, count, "Task location unknown; invalidated every task scope");
            return;
        }
        known.push(TaskScope::All);
        self.invalidate_tasks(owner, known);
    }

    fn invalidate_tasks(&self, owner: UserId, scopes: impl IntoIterator<Item = TaskScope>) {
        let mut seen = HashSet::new();
        for scope in scopes {
            if seen.insert(scope) {
                let present = self
                    .ctx
                    .caches()
                    .tasks
                    .invalidate(&CacheKey::tasks(owner, scope));
                debug!(%scope, present, "Task scope invalidated");
            }
        }
    }

    fn invalidate_folders(&self, owner: UserId) {
        self.ctx
            .caches()
            .folders
            .invalidate(&CacheKey::folders(owner));
    }

    fn forget_folder(&self, owner: UserId, id: FolderId) {
        self.invalidate_folders(owner);
        self.ctx
            .caches()
            .tasks
            .invalidate_prefix(&KeyPrefix::tasks_of(owner));
        self.ctx.selection().clear_if(id);
    }
}
