use super::json_store;
use crate::error::AppError;
use crate::model::{SyncMetadata, SyncStatus, Task, Timestamp};
use crate::remote::Revision;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use time::UtcOffset;

pub const TASKS_FILE_NAME: &str = "tasks.json";

/// A task together with its reconciliation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTask {
    pub task: Task,
    #[serde(default)]
    pub sync: SyncMetadata,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct TaskTable {
    #[serde(default)]
    tasks: BTreeMap<String, StoredTask>,
    /// Remote revision covered by the last pull.
    #[serde(default)]
    pull_revision: Option<Revision>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub owner_id: Option<String>,
    pub completed: Option<bool>,
    /// Inclusive lower bound on `due_at`.
    pub due_from: Option<Timestamp>,
    /// Exclusive upper bound on `due_at`.
    pub due_before: Option<Timestamp>,
    /// Keep tasks without a due date when a due window is set.
    pub include_undated: bool,
    pub include_deleted: bool,
}

impl TaskFilter {
    pub fn all(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            ..Self::default()
        }
    }

    /// Open tasks due before the end of the local day, overdue ones included.
    pub fn today(owner_id: &str, now: Timestamp, offset: UtcOffset) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            completed: Some(false),
            due_before: Some(start_of_next_day(now, offset)),
            ..Self::default()
        }
    }

    /// Open tasks due after today, plus undated ones.
    pub fn upcoming(owner_id: &str, now: Timestamp, offset: UtcOffset) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            completed: Some(false),
            due_from: Some(start_of_next_day(now, offset)),
            include_undated: true,
            ..Self::default()
        }
    }

    pub fn completed(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            completed: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if task.deleted && !self.include_deleted {
            return false;
        }
        if let Some(owner_id) = self.owner_id.as_deref()
            && task.owner_id != owner_id
        {
            return false;
        }
        if let Some(completed) = self.completed
            && task.completed != completed
        {
            return false;
        }
        if self.due_from.is_none() && self.due_before.is_none() {
            return true;
        }
        match task.due_at {
            None => self.include_undated,
            Some(due_at) => {
                self.due_from.is_none_or(|from| due_at >= from)
                    && self.due_before.is_none_or(|before| due_at < before)
            }
        }
    }
}

fn start_of_next_day(now: Timestamp, offset: UtcOffset) -> Timestamp {
    let local = now.as_offset_date_time().to_offset(offset);
    let next = local.date().next_day().unwrap_or(local.date());
    Timestamp::from(next.midnight().assume_offset(offset))
}

fn view_order(a: &Task, b: &Task) -> Ordering {
    a.order_index
        .cmp(&b.order_index)
        .then_with(|| match (a.due_at, b.due_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Durable materialized view of tasks plus their sync metadata.
///
/// Readers clone an `Arc` of the current snapshot and never wait on a disk write; writers
/// build the next snapshot, persist it, and only then publish it.
pub struct LocalStore {
    path: Option<PathBuf>,
    snapshot: RwLock<Arc<TaskTable>>,
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let table = json_store::load::<TaskTable>(path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path.to_path_buf()),
            snapshot: RwLock::new(Arc::new(table)),
            write_lock: Mutex::new(()),
        })
    }

    pub fn open_in(data_dir: &Path) -> Result<Self, AppError> {
        Self::open(&data_dir.join(TASKS_FILE_NAME))
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            snapshot: RwLock::new(Arc::new(TaskTable::default())),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.current().tasks.get(id).map(|stored| stored.task.clone())
    }

    pub fn get_record(&self, id: &str) -> Option<StoredTask> {
        self.current().tasks.get(id).cloned()
    }

    pub fn sync_metadata(&self, id: &str) -> Option<SyncMetadata> {
        self.current().tasks.get(id).map(|stored| stored.sync.clone())
    }

    /// A fresh snapshot on every call, filtered and in view order.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let snapshot = self.current();
        let mut tasks: Vec<Task> = snapshot
            .tasks
            .values()
            .filter(|stored| filter.matches(&stored.task))
            .map(|stored| stored.task.clone())
            .collect();
        tasks.sort_by(view_order);
        tasks
    }

    pub fn records(&self) -> Vec<StoredTask> {
        self.current().tasks.values().cloned().collect()
    }

    pub fn count_by_status(&self, status: SyncStatus) -> usize {
        self.current()
            .tasks
            .values()
            .filter(|stored| stored.sync.status == status)
            .count()
    }

    pub fn pull_cursor(&self) -> Option<Revision> {
        self.current().pull_revision
    }

    /// Replaces the task with the same identifier. The row stays `clean` only if the new
    /// version is the last one the remote confirmed.
    pub(crate) fn upsert(&self, task: Task) -> Result<(), AppError> {
        self.mutate(|table| {
            let remote_modified_at = table
                .tasks
                .get(&task.id)
                .and_then(|existing| existing.sync.remote_modified_at);
            let sync = SyncMetadata::for_local(task.modified_at, remote_modified_at);
            table.tasks.insert(task.id.clone(), StoredTask { task, sync });
            Ok(())
        })
    }

    /// Soft delete: the row stays so the deletion can be reconciled.
    pub(crate) fn mark_deleted(&self, id: &str, at: Timestamp) -> Result<Task, AppError> {
        self.mutate(|table| {
            let stored = table
                .tasks
                .get_mut(id)
                .ok_or_else(|| AppError::invalid_input("task not found"))?;
            stored.task.soft_delete(at);
            stored.sync =
                SyncMetadata::for_local(stored.task.modified_at, stored.sync.remote_modified_at);
            Ok(stored.task.clone())
        })
    }

    pub(crate) fn put(&self, task: Task, sync: SyncMetadata) -> Result<(), AppError> {
        self.mutate(|table| {
            table.tasks.insert(task.id.clone(), StoredTask { task, sync });
            Ok(())
        })
    }

    pub(crate) fn set_sync(&self, id: &str, sync: SyncMetadata) -> Result<(), AppError> {
        self.mutate(|table| {
            if let Some(stored) = table.tasks.get_mut(id) {
                stored.sync = sync;
            }
            Ok(())
        })
    }

    /// Puts a record back exactly as it was, or removes it when it did not exist.
    pub(crate) fn restore(&self, id: &str, previous: Option<StoredTask>) -> Result<(), AppError> {
        self.mutate(|table| {
            match previous {
                Some(stored) => {
                    table.tasks.insert(id.to_string(), stored);
                }
                None => {
                    table.tasks.remove(id);
                }
            }
            Ok(())
        })
    }

    pub(crate) fn advance_pull_cursor(&self, seen: Revision) -> Result<(), AppError> {
        if self.pull_cursor().is_some_and(|cursor| cursor >= seen) {
            return Ok(());
        }
        self.mutate(|table| {
            table.pull_revision = Some(table.pull_revision.map_or(seen, |cursor| cursor.max(seen)));
            Ok(())
        })
    }

    pub(crate) fn purge(&self, ids: &[String]) -> Result<usize, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.mutate(|table| {
            let before = table.tasks.len();
            for id in ids {
                table.tasks.remove(id);
            }
            Ok(before - table.tasks.len())
        })
    }

    fn current(&self) -> Arc<TaskTable> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut TaskTable) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.current()).clone();
        let result = apply(&mut next)?;
        if let Some(path) = &self.path {
            json_store::save(path, &next)?;
        }
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(result)
    }
}
