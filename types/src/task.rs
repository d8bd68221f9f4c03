use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{FieldIssue, FolderId, StartTime, TaskId, TaskTitle, UserId, ValidationError};

/// Kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Coding,
    Study,
    Shopping,
    Exercise,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Coding,
        TaskType::Study,
        TaskType::Shopping,
        TaskType::Exercise,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskType::Coding => "coding",
            TaskType::Study => "study",
            TaskType::Shopping => "shopping",
            TaskType::Exercise => "exercise",
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown task type '{s}'"))
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|priority| priority.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown priority '{s}'"))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a task repeats.
///
/// On the wire `None` is the empty string; `""`, `"none"` and `null` all
/// decode to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Frequency {
    #[default]
    None,
    Daily,
    Weekly,
}

impl Frequency {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Frequency::None => "none",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }

    const fn wire_str(self) -> &'static str {
        match self {
            Frequency::None => "",
            other => other.as_str(),
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Frequency::None),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            _ => Err(format!("unknown frequency '{s}'")),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_str())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(Frequency::None),
            Some(raw) => raw.parse().map_err(D::Error::custom),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A task as the backend returns it.
///
/// `completed`, `created_at` and the timing fields are display-only: they are
/// never part of a create or replace payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: TaskTitle,
    pub task_type: TaskType,
    pub priority: Priority,
    pub start_time: StartTime,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: String,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_completion_time: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_completion_time: Option<i32>,
}

impl Task {
    /// The full replacement payload for this task as it stands.
    #[must_use]
    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            title: self.title.clone(),
            user_id: self.user_id,
            task_type: self.task_type,
            priority: self.priority,
            start_time: self.start_time,
            frequency: self.frequency,
            context: self.context.clone(),
            folder_id: self.folder_id,
        }
    }

    /// The full replacement payload: this record with `patch` applied on top.
    #[must_use]
    pub fn merged(&self, patch: &TaskPatch) -> TaskDraft {
        let mut draft = self.to_draft();
        if let Some(title) = &patch.title {
            draft.title = title.clone();
        }
        if let Some(task_type) = patch.task_type {
            draft.task_type = task_type;
        }
        if let Some(priority) = patch.priority {
            draft.priority = priority;
        }
        if let Some(start_time) = patch.start_time {
            draft.start_time = start_time;
        }
        if let Some(frequency) = patch.frequency {
            draft.frequency = frequency;
        }
        if let Some(context) = &patch.context {
            draft.context = context.clone();
        }
        if let Some(folder_id) = patch.folder {
            draft.folder_id = folder_id;
        }
        draft
    }
}

/// Create/replace payload. Everything the backend expects, nothing display-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: TaskTitle,
    pub user_id: UserId,
    pub task_type: TaskType,
    pub priority: Priority,
    pub start_time: StartTime,
    pub frequency: Frequency,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
}

/// Changed fields for an edit. `folder` is `Some(None)` to move a task out of
/// every folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<TaskTitle>,
    pub task_type: Option<TaskType>,
    pub priority: Option<Priority>,
    pub start_time: Option<StartTime>,
    pub frequency: Option<Frequency>,
    pub context: Option<String>,
    pub folder: Option<Option<FolderId>>,
}

impl TaskPatch {
    #[must_use]
    pub fn move_to(folder: Option<FolderId>) -> Self {
        Self {
            folder: Some(folder),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Unvalidated task input as typed by a user.
#[derive(Debug, Clone, Default)]
pub struct TaskForm {
    pub title: String,
    pub task_type: String,
    pub priority: String,
    pub start_time: String,
    pub frequency: Option<String>,
    pub context: Option<String>,
    pub folder_id: Option<FolderId>,
}

impl TaskForm {
    /// Validate every field, reporting all problems at once.
    pub fn validate(&self, owner: UserId) -> Result<TaskDraft, ValidationError> {
        let mut issues = Vec::new();

        let title = TaskTitle::new(self.title.clone())
            .map_err(|err| issues.extend(err.issues().iter().cloned()))
            .ok();

        let task_type = required(
            &self.task_type,
            "taskType",
            "Task type is required",
            &mut issues,
        )
        .and_then(|raw| {
            raw.parse::<TaskType>()
                .map_err(|msg| issues.push(FieldIssue::new("taskType", msg)))
                .ok()
        });

        let priority = required(&self.priority, "priority", "Priority is required", &mut issues)
            .and_then(|raw| {
                raw.parse::<Priority>()
                    .map_err(|msg| issues.push(FieldIssue::new("priority", msg)))
                    .ok()
            });

        let start_time = StartTime::parse(&self.start_time)
            .map_err(|err| issues.extend(err.issues().iter().cloned()))
            .ok();

        let frequency = match self.frequency.as_deref() {
            None => Some(Frequency::None),
            Some(raw) => raw
                .parse::<Frequency>()
                .map_err(|msg| issues.push(FieldIssue::new("frequency", msg)))
                .ok(),
        };

        if let Some(err) = ValidationError::from_issues(issues) {
            return Err(err);
        }

        match (title, task_type, priority, start_time, frequency) {
            (Some(title), Some(task_type), Some(priority), Some(start_time), Some(frequency)) => {
                Ok(TaskDraft {
                    title,
                    user_id: owner,
                    task_type,
                    priority,
                    start_time,
                    frequency,
                    context: self.context.clone().unwrap_or_default(),
                    folder_id: self.folder_id,
                })
            }
            // Every missing field recorded an issue above.
            _ => Err(ValidationError::field("form", "incomplete task")),
        }
    }
}

fn required<'a>(
    raw: &'a str,
    field: &'static str,
    message: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<&'a str> {
    if raw.trim().is_empty() {
        issues.push(FieldIssue::new(field, message));
        None
    } else {
        Some(raw)
    }
}

/// Display-time projection over a cached task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl TaskFilter {
    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Active => !task.completed,
            TaskFilter::Completed => task.completed,
        }
    }

    #[must_use]
    pub fn apply<'a>(self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|task| self.matches(task)).collect()
    }
}

impl FromStr for TaskFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TaskFilter::All),
            "active" => Ok(TaskFilter::Active),
            "completed" | "done" => Ok(TaskFilter::Completed),
            _ => Err(format!("unknown filter '{s}'")),
        }
    }
}
