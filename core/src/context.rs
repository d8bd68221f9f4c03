use std::sync::Arc;

use tally_gateway::{Gateway, GatewayError};
use tally_types::{Folder, Task, TaskScope, UserId};
use tracing::warn;

use crate::cache::{CacheError, Fetcher, ScopedCache, WeakScopedCache, fetcher};
use crate::error::SyncError;
use crate::selection::Selection;
use crate::session::SessionStore;

/// The two entity caches.
#[derive(Clone, Default)]
pub struct Caches {
    pub tasks: ScopedCache<Vec<Task>>,
    pub folders: ScopedCache<Vec<Folder>>,
}

impl Caches {
    pub fn clear(&self) {
        self.tasks.clear();
        self.folders.clear();
    }

    /// Apply the session and selection rules to every fetch that lands,
    /// including background refetches nobody awaits: a rejected credential
    /// signs out, and a fresh folder list deselects a folder it lacks.
    fn watch_results(&self, session: &SessionStore, selection: &Selection) {
        let eviction = Eviction {
            session: session.clone(),
            selection: selection.clone(),
            tasks: self.tasks.downgrade(),
            folders: self.folders.downgrade(),
        };

        let on_tasks = eviction.clone();
        self.tasks.on_settle(move |result| {
            if let Err(err) = result {
                on_tasks.on_failure(err);
            }
        });

        let selection = selection.clone();
        self.folders.on_settle(move |result| match result {
            Ok(folders) => {
                selection.retain_known(folders);
            }
            Err(err) => eviction.on_failure(err),
        });
    }
}

/// Signs out from a cache hook. The caches are held weakly since the hooks
/// live inside them.
#[derive(Clone)]
struct Eviction {
    session: SessionStore,
    selection: Selection,
    tasks: WeakScopedCache<Vec<Task>>,
    folders: WeakScopedCache<Vec<Folder>>,
}

impl Eviction {
    fn on_failure(&self, err: &GatewayError) {
        if !err.is_auth() {
            return;
        }
        warn!(%err, "Credential rejected during fetch; signing out");
        forget(&self.session, &self.selection);
        if let Some(tasks) = self.tasks.upgrade() {
            tasks.clear();
        }
        if let Some(folders) = self.folders.upgrade() {
            folders.clear();
        }
    }
}

fn forget(session: &SessionStore, selection: &Selection) {
    if let Err(err) = session.clear() {
        warn!(%err, "Failed to delete persisted session");
    }
    selection.select_all();
}

/// Everything the read and write sides share: the gateway, who is signed in,
/// what is selected, and the caches.
pub struct SyncContext<G> {
    gateway: Arc<G>,
    session: SessionStore,
    selection: Selection,
    caches: Caches,
}

impl<G> Clone for SyncContext<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            session: self.session.clone(),
            selection: self.selection.clone(),
            caches: self.caches.clone(),
        }
    }
}

impl<G: Gateway> SyncContext<G> {
    pub fn new(gateway: Arc<G>, session: SessionStore) -> Self {
        let selection = Selection::new();
        let caches = Caches::default();
        caches.watch_results(&session, &selection);
        Self {
            gateway,
            session,
            selection,
            caches,
        }
    }

    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    #[must_use]
    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// The signed-in user, or [`SyncError::SignedOut`].
    pub fn owner(&self) -> Result<UserId, SyncError> {
        self.session.user_id().ok_or(SyncError::SignedOut)
    }

    /// Drop the session, the selection, and every cached entry.
    pub fn sign_out(&self) {
        forget(&self.session, &self.selection);
        self.caches.clear();
    }

    /// Convert a gateway failure, signing out first if the credential was
    /// rejected.
    pub(crate) fn absorb(&self, err: GatewayError) -> SyncError {
        if err.is_auth() {
            warn!(%err, "Credential rejected; signing out");
            self.sign_out();
        }
        err.into()
    }

    pub(crate) fn absorb_cache(&self, err: CacheError) -> SyncError {
        match err {
            CacheError::Fetch(err) => self.absorb(err),
            CacheError::Discarded => SyncError::Discarded,
        }
    }

    /// Lists one task scope. The backend leaves `folderId` off task records,
    /// so tasks listed under a folder get that folder filled in.
    pub(crate) fn task_fetcher(&self, owner: UserId, scope: TaskScope) -> Fetcher<Vec<Task>> {
        let gateway = Arc::clone(&self.gateway);
        fetcher(move || {
            let gateway = Arc::clone(&gateway);
            async move {
                let mut tasks = gateway.list_tasks(owner, scope).await?;
                if let TaskScope::Folder(folder) = scope {
                    for task in &mut tasks {
                        task.folder_id.get_or_insert(folder);
                    }
                }
                Ok::<_, GatewayError>(tasks)
            }
        })
    }

    pub(crate) fn folder_fetcher(&self, owner: UserId) -> Fetcher<Vec<Folder>> {
        let gateway = Arc::clone(&self.gateway);
        fetcher(move || {
            let gateway = Arc::clone(&gateway);
            async move { gateway.list_folders(owner).await }
        })
    }
}
