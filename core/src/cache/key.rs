use std::fmt;

use tally_types::{TaskScope, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Task,
    Folder,
}

/// Which slice of an owner's entities a key covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminator {
    Tasks(TaskScope),
    /// The owner's whole collection (folders are never partitioned).
    Owner,
}

/// Identity of one cache entry: (entity kind, owner, scope).
///
/// Keys are namespaced by owner so two users never share an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntityKind,
    pub owner: UserId,
    pub scope: Discriminator,
}

impl CacheKey {
    #[must_use]
    pub const fn tasks(owner: UserId, scope: TaskScope) -> Self {
        Self {
            kind: EntityKind::Task,
            owner,
            scope: Discriminator::Tasks(scope),
        }
    }

    #[must_use]
    pub const fn folders(owner: UserId) -> Self {
        Self {
            kind: EntityKind::Folder,
            owner,
            scope: Discriminator::Owner,
        }
    }

    #[must_use]
    pub const fn task_scope(&self) -> Option<TaskScope> {
        match self.scope {
            Discriminator::Tasks(scope) => Some(scope),
            Discriminator::Owner => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Discriminator::Tasks(scope) => write!(f, "tasks/{}/{scope}", self.owner),
            Discriminator::Owner => write!(f, "folders/{}", self.owner),
        }
    }
}

/// Leading components of a key; unset components match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyPrefix {
    pub kind: Option<EntityKind>,
    pub owner: Option<UserId>,
}

impl KeyPrefix {
    /// Every task scope of `owner`.
    #[must_use]
    pub const fn tasks_of(owner: UserId) -> Self {
        Self {
            kind: Some(EntityKind::Task),
            owner: Some(owner),
        }
    }

    /// Every entry of `owner`, tasks and folders alike.
    #[must_use]
    pub const fn owner(owner: UserId) -> Self {
        Self {
            kind: None,
            owner: Some(owner),
        }
    }

    #[must_use]
    pub fn matches(&self, key: &CacheKey) -> bool {
        self.kind.is_none_or(|kind| kind == key.kind)
            && self.owner.is_none_or(|owner| owner == key.owner)
    }
}
