use super::Timestamp;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_at: Option<Timestamp>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub order_index: i64,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Task {
    /// Soft delete stamped no earlier than the last modification.
    pub fn soft_delete(&mut self, at: Timestamp) {
        let stamp = self.modified_at.max(at);
        self.deleted = true;
        self.deleted_at = Some(stamp);
        self.modified_at = stamp;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" | "urgent" => Some(Self::High),
            _ => None,
        }
    }
}

/// Snapshot of the fields a single mutation changed.
///
/// `modified_at` is always present: every mutation stamps the task. Clearable fields use a
/// double option so that "set to none" survives a round trip through the mutation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChanges {
    pub modified_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_at: Option<Option<Timestamp>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<Option<Timestamp>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TaskChanges {
    pub fn stamped(modified_at: Timestamp) -> Self {
        Self {
            modified_at,
            owner_id: None,
            title: None,
            description: None,
            due_at: None,
            priority: None,
            completed: None,
            order_index: None,
            created_at: None,
            deleted: None,
            deleted_at: None,
        }
    }

    /// Every field of `task`; used for creations and full-state follow-up writes.
    pub fn full(task: &Task) -> Self {
        Self {
            modified_at: task.modified_at,
            owner_id: Some(task.owner_id.clone()),
            title: Some(task.title.clone()),
            description: Some(task.description.clone()),
            due_at: Some(task.due_at),
            priority: Some(task.priority),
            completed: Some(task.completed),
            order_index: Some(task.order_index),
            created_at: Some(task.created_at),
            deleted: Some(task.deleted),
            deleted_at: Some(task.deleted_at),
        }
    }

    /// Only the fields that differ between `before` and `after`.
    pub fn diff(before: &Task, after: &Task) -> Self {
        let mut changes = Self::stamped(after.modified_at);
        if before.owner_id != after.owner_id {
            changes.owner_id = Some(after.owner_id.clone());
        }
        if before.title != after.title {
            changes.title = Some(after.title.clone());
        }
        if before.description != after.description {
            changes.description = Some(after.description.clone());
        }
        if before.due_at != after.due_at {
            changes.due_at = Some(after.due_at);
        }
        if before.priority != after.priority {
            changes.priority = Some(after.priority);
        }
        if before.completed != after.completed {
            changes.completed = Some(after.completed);
        }
        if before.order_index != after.order_index {
            changes.order_index = Some(after.order_index);
        }
        if before.deleted != after.deleted {
            changes.deleted = Some(after.deleted);
        }
        if before.deleted_at != after.deleted_at {
            changes.deleted_at = Some(after.deleted_at);
        }
        changes
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(owner_id) = &self.owner_id {
            task.owner_id = owner_id.clone();
        }
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(due_at) = self.due_at {
            task.due_at = due_at;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(order_index) = self.order_index {
            task.order_index = order_index;
        }
        if let Some(created_at) = self.created_at {
            task.created_at = created_at;
        }
        if let Some(deleted) = self.deleted {
            task.deleted = deleted;
        }
        if let Some(deleted_at) = self.deleted_at {
            task.deleted_at = deleted_at;
        }
        task.modified_at = self.modified_at;
    }

    /// Builds a task from a creation snapshot. Missing fields fall back to defaults.
    pub fn materialize(&self, id: &str) -> Task {
        let mut task = Task {
            id: id.to_string(),
            owner_id: String::new(),
            title: String::new(),
            description: None,
            due_at: None,
            priority: Priority::default(),
            completed: false,
            order_index: 0,
            created_at: self.created_at.unwrap_or(self.modified_at),
            modified_at: self.modified_at,
            deleted: false,
            deleted_at: None,
        };
        self.apply_to(&mut task);
        task
    }
}
