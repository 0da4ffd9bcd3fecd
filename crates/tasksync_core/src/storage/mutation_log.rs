use super::json_store;
use crate::error::AppError;
use crate::model::{MutationKind, MutationRecord, TaskChanges, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const MUTATIONS_FILE_NAME: &str = "mutations.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LogState {
    /// Highest sequence number ever handed out; survives an empty log.
    #[serde(default)]
    last_sequence: u64,
    #[serde(default)]
    records: Vec<MutationRecord>,
}

/// Durable queue of mutations not yet confirmed by the remote store.
///
/// Owned by the sync coordinator; every method that changes the queue persists before it
/// returns and leaves the in-memory state untouched when persisting fails.
#[derive(Debug)]
pub struct MutationLog {
    path: Option<PathBuf>,
    state: LogState,
}

impl MutationLog {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let mut state = json_store::load::<LogState>(path)?.unwrap_or_default();
        state.records.sort_by_key(|record| record.sequence);
        if let Some(last) = state.records.last() {
            state.last_sequence = state.last_sequence.max(last.sequence);
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            state,
        })
    }

    pub fn open_in(data_dir: &Path) -> Result<Self, AppError> {
        Self::open(&data_dir.join(MUTATIONS_FILE_NAME))
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: LogState::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }

    pub fn records(&self) -> &[MutationRecord] {
        &self.state.records
    }

    pub fn get(&self, sequence: u64) -> Option<&MutationRecord> {
        self.state
            .records
            .iter()
            .find(|record| record.sequence == sequence)
    }

    pub fn has_pending(&self, task_id: &str) -> bool {
        self.state
            .records
            .iter()
            .any(|record| record.task_id == task_id)
    }

    pub fn enqueue(
        &mut self,
        task_id: &str,
        kind: MutationKind,
        changes: TaskChanges,
        enqueued_at: Timestamp,
    ) -> Result<u64, AppError> {
        let sequence = self.state.last_sequence + 1;
        let mut next = self.state.clone();
        next.last_sequence = sequence;
        next.records.push(MutationRecord {
            sequence,
            task_id: task_id.to_string(),
            kind,
            changes,
            enqueued_at,
            retry_count: 0,
        });
        self.commit(next)?;
        Ok(sequence)
    }

    /// Oldest records first, with each task's records kept together and in sequence order.
    pub fn peek_batch(&self, max_count: usize) -> Vec<MutationRecord> {
        let mut first_seen: Vec<&str> = Vec::new();
        let mut by_task: HashMap<&str, Vec<&MutationRecord>> = HashMap::new();
        for record in &self.state.records {
            let entry = by_task.entry(record.task_id.as_str()).or_default();
            if entry.is_empty() {
                first_seen.push(record.task_id.as_str());
            }
            entry.push(record);
        }

        first_seen
            .into_iter()
            .flat_map(|task_id| by_task.remove(task_id).unwrap_or_default())
            .take(max_count)
            .cloned()
            .collect()
    }

    /// Removes exactly one record. Confirming an unknown sequence number is a no-op.
    pub fn confirm(&mut self, sequence: u64) -> Result<bool, AppError> {
        let Some(index) = self
            .state
            .records
            .iter()
            .position(|record| record.sequence == sequence)
        else {
            return Ok(false);
        };
        let mut next = self.state.clone();
        next.records.remove(index);
        self.commit(next)?;
        Ok(true)
    }

    pub fn bump_retry(&mut self, sequence: u64) -> Result<Option<u32>, AppError> {
        let Some(index) = self
            .state
            .records
            .iter()
            .position(|record| record.sequence == sequence)
        else {
            return Ok(None);
        };
        let mut next = self.state.clone();
        let record = &mut next.records[index];
        record.retry_count = record.retry_count.saturating_add(1);
        let retry_count = record.retry_count;
        self.commit(next)?;
        Ok(Some(retry_count))
    }

    fn commit(&mut self, next: LogState) -> Result<(), AppError> {
        if let Some(path) = &self.path {
            json_store::save(path, &next)?;
        }
        self.state = next;
        Ok(())
    }
}
