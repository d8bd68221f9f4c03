//! Active folder scope shared by every view.
//!
//! Changing the selection never fetches anything; it only changes which cache
//! key task reads resolve to.

use std::sync::Arc;

use tally_types::{Folder, FolderId, TaskScope, contains_folder};
use tokio::sync::watch;
use tracing::info;

/// Observable `Option<FolderId>`, where `None` means "all tasks".
#[derive(Debug, Clone)]
pub struct Selection {
    tx: Arc<watch::Sender<Option<FolderId>>>,
}

impl Default for Selection {
    fn default() -> Self {
        Self::new()
    }
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn get(&self) -> Option<FolderId> {
        *self.tx.borrow()
    }

    /// The task scope reads should use for the current selection.
    #[must_use]
    pub fn scope(&self) -> TaskScope {
        TaskScope::for_selection(self.get())
    }

    pub fn select(&self, folder: FolderId) {
        self.set(Some(folder));
    }

    pub fn select_all(&self) {
        self.set(None);
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<FolderId>> {
        self.tx.subscribe()
    }

    /// Reset to "all" if `folder` is the one selected. Returns whether it was.
    pub fn clear_if(&self, folder: FolderId) -> bool {
        let cleared = self.tx.send_if_modified(|selected| {
            if *selected == Some(folder) {
                *selected = None;
                true
            } else {
                false
            }
        });
        if cleared {
            info!(%folder, "Selected folder is gone; selection reset to all");
        }
        cleared
    }

    /// Reset to "all" if the selected folder is missing from `folders`, the
    /// owner's authoritative list.
    pub fn retain_known(&self, folders: &[Folder]) -> bool {
        match self.get() {
            Some(selected) if !contains_folder(folders, selected) => self.clear_if(selected),
            _ => false,
        }
    }

    fn set(&self, value: Option<FolderId>) {
        self.tx.send_if_modified(|selected| {
            if *selected == value {
                false
            } else {
                *selected = value;
                true
            }
        });
    }
}
