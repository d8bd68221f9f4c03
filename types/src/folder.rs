use serde::{Deserialize, Serialize};

use crate::{FolderId, FolderName, UserId};

/// A user-owned folder. Names are not unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub name: FolderName,
    pub user_id: UserId,
}

/// Whether `folders` (an owner's authoritative list) still has `id`.
#[must_use]
pub fn contains_folder(folders: &[Folder], id: FolderId) -> bool {
    folders.iter().any(|folder| folder.id == id)
}
