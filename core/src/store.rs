//! Read side: resolves the session and selection to cache keys.

use std::sync::Arc;

use tally_gateway::{Gateway, RemoteError};
use tally_types::{Folder, Task, TaskFilter, TaskId, TaskScope};

use crate::cache::{CacheKey, Snapshot, Subscription};
use crate::context::SyncContext;
use crate::error::SyncError;

pub struct Store<G> {
    ctx: SyncContext<G>,
}

impl<G> Clone for Store<G> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<G: Gateway> Store<G> {
    pub fn new(ctx: SyncContext<G>) -> Self {
        Self { ctx }
    }

    /// Settled task list for `scope` of the signed-in user.
    pub async fn tasks(&self, scope: TaskScope) -> Result<Arc<Vec<Task>>, SyncError> {
        let owner = self.ctx.owner()?;
        self.ctx
            .caches()
            .tasks
            .fetch(CacheKey::tasks(owner, scope), self.ctx.task_fetcher(owner, scope))
            .await
            .map_err(|err| self.ctx.absorb_cache(err))
    }

    /// Tasks of the selected scope, narrowed by `filter`.
    ///
    /// Filtering happens on the cached list, so changing the filter never
    /// refetches.
    pub async fn selected_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, SyncError> {
        let tasks = self.tasks(self.ctx.selection().scope()).await?;
        Ok(filter.apply(&tasks).into_iter().cloned().collect())
    }

    /// Settled folder list. A selected folder that is no longer listed is
    /// deselected, here and on every folder fetch that lands in the cache.
    pub async fn folders(&self) -> Result<Arc<Vec<Folder>>, SyncError> {
        let owner = self.ctx.owner()?;
        let folders = self
            .ctx
            .caches()
            .folders
            .fetch(CacheKey::folders(owner), self.ctx.folder_fetcher(owner))
            .await
            .map_err(|err| self.ctx.absorb_cache(err))?;
        self.reconcile_selection(&folders);
        Ok(folders)
    }

    /// Deselect a folder missing from `folders`, a freshly fetched list.
    pub fn reconcile_selection(&self, folders: &[Folder]) -> bool {
        self.ctx.selection().retain_known(folders)
    }

    /// Current entry for `scope` without waiting; starts a fetch if needed.
    pub fn read_tasks(&self, scope: TaskScope) -> Result<Snapshot<Vec<Task>>, SyncError> {
        let owner = self.ctx.owner()?;
        Ok(self
            .ctx
            .caches()
            .tasks
            .read(CacheKey::tasks(owner, scope), self.ctx.task_fetcher(owner, scope)))
    }

    pub fn read_folders(&self) -> Result<Snapshot<Vec<Folder>>, SyncError> {
        let owner = self.ctx.owner()?;
        Ok(self
            .ctx
            .caches()
            .folders
            .read(CacheKey::folders(owner), self.ctx.folder_fetcher(owner)))
    }

    pub fn subscribe_tasks(&self, scope: TaskScope) -> Result<Subscription<Vec<Task>>, SyncError> {
        let owner = self.ctx.owner()?;
        Ok(self
            .ctx
            .caches()
            .tasks
            .subscribe(CacheKey::tasks(owner, scope), self.ctx.task_fetcher(owner, scope)))
    }

    /// Subscription for the scope selected right now. Resubscribe when the
    /// selection changes.
    pub fn subscribe_selected_tasks(&self) -> Result<Subscription<Vec<Task>>, SyncError> {
        self.subscribe_tasks(self.ctx.selection().scope())
    }

    pub fn subscribe_folders(&self) -> Result<Subscription<Vec<Folder>>, SyncError> {
        let owner = self.ctx.owner()?;
        Ok(self
            .ctx
            .caches()
            .folders
            .subscribe(CacheKey::folders(owner), self.ctx.folder_fetcher(owner)))
    }

    /// Refetch an errored task scope. Returns whether a fetch started.
    pub fn retry_tasks(&self, scope: TaskScope) -> Result<bool, SyncError> {
        let owner = self.ctx.owner()?;
        Ok(self.ctx.caches().tasks.retry(&CacheKey::tasks(owner, scope)))
    }

    pub fn retry_folders(&self) -> Result<bool, SyncError> {
        let owner = self.ctx.owner()?;
        Ok(self.ctx.caches().folders.retry(&CacheKey::folders(owner)))
    }

    /// Look a task up by id, with its folder resolved.
    ///
    /// Task records do not say which folder they are in, so when the task is
    /// not unfiled, the owner's folder scopes are searched for it.
    pub async fn find_task(&self, id: TaskId) -> Result<Task, SyncError> {
        let all = self.tasks(TaskScope::All).await?;
        let mut task = all
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| {
                SyncError::NotFound(RemoteError::new(None, format!("no task with id {id}")))
            })?;
        if task.folder_id.is_some() || contains_task(&self.tasks(TaskScope::Unfiled).await?, id) {
            return Ok(task);
        }

        for folder in self.folders().await?.iter() {
            let scope = TaskScope::Folder(folder.id);
            if contains_task(&self.tasks(scope).await?, id) {
                task.folder_id = Some(folder.id);
                break;
            }
        }
        Ok(task)
    }
}

pub(crate) fn contains_task(tasks: &[Task], id: TaskId) -> bool {
    tasks.iter().any(|task| task.id == id)
}
