use super::{TaskChanges, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Clean,
    Pending,
    Conflicted,
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Pending => "pending",
            Self::Conflicted => "conflicted",
        }
    }
}

/// Reconciliation state for one task. Never shown to the user directly.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default)]
    pub remote_modified_at: Option<Timestamp>,
    #[serde(default)]
    pub status: SyncStatus,
}

impl SyncMetadata {
    pub fn pending(remote_modified_at: Option<Timestamp>) -> Self {
        Self {
            remote_modified_at,
            status: SyncStatus::Pending,
        }
    }

    /// Confirmed remote state equal to the local one.
    pub fn clean(remote_modified_at: Timestamp) -> Self {
        Self {
            remote_modified_at: Some(remote_modified_at),
            status: SyncStatus::Clean,
        }
    }

    /// Clean only when the local timestamp matches the last known remote one.
    pub fn for_local(local_modified_at: Timestamp, remote_modified_at: Option<Timestamp>) -> Self {
        if remote_modified_at == Some(local_modified_at) {
            Self::clean(local_modified_at)
        } else {
            Self::pending(remote_modified_at)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Reorder,
}

impl MutationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Reorder => "reorder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub sequence: u64,
    pub task_id: String,
    pub kind: MutationKind,
    pub changes: TaskChanges,
    pub enqueued_at: Timestamp,
    #[serde(default)]
    pub retry_count: u32,
}
