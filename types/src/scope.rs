use std::fmt;

use crate::FolderId;

/// Which slice of a user's tasks a listing covers.
///
/// Maps onto the backend's three listing modes: `all=true`, `folderId=`, and
/// neither (tasks outside every folder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskScope {
    All,
    Folder(FolderId),
    Unfiled,
}

impl TaskScope {
    /// The narrowest scope a task with this folder assignment lives in.
    #[must_use]
    pub fn home(folder_id: Option<FolderId>) -> Self {
        folder_id.map_or(TaskScope::Unfiled, TaskScope::Folder)
    }

    /// Scope shown for a folder selection, where no folder means "all".
    #[must_use]
    pub fn for_selection(selected: Option<FolderId>) -> Self {
        selected.map_or(TaskScope::All, TaskScope::Folder)
    }

    #[must_use]
    pub fn folder_id(self) -> Option<FolderId> {
        match self {
            TaskScope::Folder(id) => Some(id),
            TaskScope::All | TaskScope::Unfiled => None,
        }
    }
}

impl fmt::Display for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskScope::All => f.write_str("all"),
            TaskScope::Folder(id) => write!(f, "folder:{id}"),
            TaskScope::Unfiled => f.write_str("unfiled"),
        }
    }
}
