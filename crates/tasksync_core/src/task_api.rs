//! Intents the UI may issue. Validation lives here; applying them is the coordinator's job.

use crate::error::AppError;
use crate::model::{MutationKind, Priority, Task, Timestamp};
use time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Client-chosen identifier; generated when absent.
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub due_at: Option<Timestamp>,
    pub priority: Priority,
    /// Placed after the owner's last task when absent.
    pub order_index: Option<i64>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            due_at: None,
            priority: Priority::default(),
            order_index: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_at: Option<Option<Timestamp>>,
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_at.is_none()
            && self.priority.is_none()
            && self.completed.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskIntent {
    Create(NewTask),
    Update { id: String, edit: TaskEdit },
    Delete { id: String },
    Reorder { id: String, order_index: i64 },
}

impl TaskIntent {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Create(_) => MutationKind::Create,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete { .. } => MutationKind::Delete,
            Self::Reorder { .. } => MutationKind::Reorder,
        }
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Self::Update {
            id: id.into(),
            edit: TaskEdit {
                completed: Some(true),
                ..TaskEdit::default()
            },
        }
    }

    pub fn rename(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Update {
            id: id.into(),
            edit: TaskEdit {
                title: Some(title.into()),
                ..TaskEdit::default()
            },
        }
    }

    /// Identifier of the targeted task, generating one for creations without it.
    pub fn resolve_id(&self) -> Result<String, AppError> {
        match self {
            Self::Create(new_task) => match new_task.id.as_deref().map(str::trim) {
                Some("") => Err(AppError::invalid_input("id is required")),
                Some(id) => Ok(id.to_string()),
                None => Ok(generate_task_id()),
            },
            Self::Update { id, .. } | Self::Delete { id } | Self::Reorder { id, .. } => {
                let trimmed = id.trim();
                if trimmed.is_empty() {
                    Err(AppError::invalid_input("id is required"))
                } else {
                    Ok(trimmed.to_string())
                }
            }
        }
    }
}

pub fn generate_task_id() -> String {
    format!("task-{}", Uuid::new_v4())
}

/// Timestamp for a local edit: the clock reading, but never at or before the previous one.
pub fn next_stamp(previous: Option<Timestamp>, now: Timestamp) -> Timestamp {
    match previous {
        Some(previous) if now <= previous => previous.plus(Duration::milliseconds(1)),
        _ => now,
    }
}

pub struct IntentContext<'a> {
    pub owner_id: &'a str,
    pub now: Timestamp,
    pub next_order_index: i64,
}

/// Next version of the task after `intent`, given its current version.
pub fn plan(
    intent: &TaskIntent,
    id: &str,
    current: Option<&Task>,
    ctx: &IntentContext<'_>,
) -> Result<Task, AppError> {
    let live = current.filter(|task| !task.deleted);

    match intent {
        TaskIntent::Create(new_task) => {
            if current.is_some() {
                return Err(AppError::invalid_input("task already exists"));
            }
            let stamp = ctx.now;
            Ok(Task {
                id: id.to_string(),
                owner_id: ctx.owner_id.to_string(),
                title: required_title(&new_task.title)?,
                description: normalize_description(new_task.description.as_deref()),
                due_at: new_task.due_at,
                priority: new_task.priority,
                completed: false,
                order_index: new_task.order_index.unwrap_or(ctx.next_order_index),
                created_at: stamp,
                modified_at: stamp,
                deleted: false,
                deleted_at: None,
            })
        }
        TaskIntent::Update { edit, .. } => {
            let current = live.ok_or_else(|| AppError::invalid_input("task not found"))?;
            if edit.is_empty() {
                return Err(AppError::invalid_input("nothing to update"));
            }
            let mut next = current.clone();
            if let Some(title) = edit.title.as_deref() {
                next.title = required_title(title)?;
            }
            if let Some(description) = &edit.description {
                next.description = normalize_description(description.as_deref());
            }
            if let Some(due_at) = edit.due_at {
                next.due_at = due_at;
            }
            if let Some(priority) = edit.priority {
                next.priority = priority;
            }
            if let Some(completed) = edit.completed {
                next.completed = completed;
            }
            next.modified_at = next_stamp(Some(current.modified_at), ctx.now);
            Ok(next)
        }
        TaskIntent::Delete { .. } => {
            let current = live.ok_or_else(|| AppError::invalid_input("task not found"))?;
            let mut next = current.clone();
            next.soft_delete(next_stamp(Some(current.modified_at), ctx.now));
            Ok(next)
        }
        TaskIntent::Reorder { order_index, .. } => {
            let current = live.ok_or_else(|| AppError::invalid_input("task not found"))?;
            let mut next = current.clone();
            next.order_index = *order_index;
            next.modified_at = next_stamp(Some(current.modified_at), ctx.now);
            Ok(next)
        }
    }
}

fn required_title(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("title is required"));
    }
    Ok(trimmed.to_string())
}

fn normalize_description(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
