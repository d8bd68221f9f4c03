//! Core domain types for Tally.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application: the gateway decodes
//! backend payloads into these types, the cache stores them, and the CLI renders them.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod auth;
mod folder;
mod ids;
mod scope;
mod task;
mod validation;
mod values;

pub use auth::{Credential, Credentials};
pub use folder::{Folder, contains_folder};
pub use ids::{FolderId, TaskId, UserId};
pub use scope::TaskScope;
pub use task::{Frequency, Priority, Task, TaskDraft, TaskFilter, TaskForm, TaskPatch, TaskType};
pub use validation::{FieldIssue, ValidationError};
pub use values::{FolderName, MAX_TITLE_CHARS, StartTime, TaskTitle};
