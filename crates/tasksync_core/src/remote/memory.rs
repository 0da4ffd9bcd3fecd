use super::{Ack, ChangeSet, RemoteGateway, Revision, Session, TaskStream};
use crate::error::AppError;
use crate::model::{MutationRecord, Task};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::warn;

const CHANGE_FEED_CAPACITY: usize = 256;

/// Server-side task table with last-write-wins acceptance. Every accepted write bumps the
/// table revision and stamps the row with it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTable {
    #[serde(default)]
    tasks: BTreeMap<String, Task>,
    #[serde(default)]
    revisions: BTreeMap<String, Revision>,
    #[serde(default)]
    revision: Revision,
}

impl RemoteTable {
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Stores `task` as-is under the next revision.
    pub fn write(&mut self, task: Task) -> Revision {
        self.revision += 1;
        self.revisions.insert(task.id.clone(), self.revision);
        self.tasks.insert(task.id.clone(), task);
        self.revision
    }

    /// Applies a mutation unless the stored version is strictly newer, in which case the stored
    /// version is returned as a conflict. Rows owned by someone else are rejected.
    pub fn apply(&mut self, session: &Session, record: &MutationRecord) -> Result<Ack, AppError> {
        match self.tasks.get(&record.task_id).cloned() {
            Some(current) if current.owner_id != session.identity => Err(AppError::rejected(
                format!("{} may not modify {}", session.identity, record.task_id),
            )),
            Some(current) if current.modified_at > record.changes.modified_at => Ok(Ack {
                server_state: current,
                conflict: true,
            }),
            Some(current) => {
                let mut next = current.clone();
                record.changes.apply_to(&mut next);
                next.owner_id = current.owner_id;
                self.write(next.clone());
                Ok(Ack {
                    server_state: next,
                    conflict: false,
                })
            }
            None => {
                let mut created = record.changes.materialize(&record.task_id);
                created.owner_id = session.identity.clone();
                self.write(created.clone());
                Ok(Ack {
                    server_state: created,
                    conflict: false,
                })
            }
        }
    }

    /// Tasks of `owner_id` written after revision `since`, in revision order.
    pub fn changed_since(&self, owner_id: &str, since: Option<Revision>) -> ChangeSet {
        let mut changed: Vec<(Revision, &Task)> = self
            .tasks
            .values()
            .filter(|task| task.owner_id == owner_id)
            .map(|task| (self.revisions.get(&task.id).copied().unwrap_or(0), task))
            .filter(|(revision, _)| since.is_none_or(|since| *revision > since))
            .collect();
        changed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        ChangeSet {
            tasks: changed.into_iter().map(|(_, task)| task.clone()).collect(),
            revision: self.revision,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    table: RemoteTable,
    revoked: HashSet<String>,
    scripted_failures: VecDeque<AppError>,
    sent: Vec<u64>,
    unreachable: bool,
    stall_sends: bool,
}

/// In-process authoritative store with a live change feed. Stands in for the hosted backend
/// in tests and embedded setups, and can simulate outages, revoked access and other devices.
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    feed: broadcast::Sender<Task>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (feed, _rx) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            feed,
        }
    }

    /// A write made by another device: stored as-is and pushed to subscribers.
    pub fn apply_remote_edit(&self, task: Task) {
        self.lock().table.write(task.clone());
        self.feed.send(task).ok();
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.lock().table.get(id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().table.tasks().cloned().collect()
    }

    /// Sequence numbers in the order `send` received them.
    pub fn sent_sequences(&self) -> Vec<u64> {
        self.lock().sent.clone()
    }

    pub fn fail_next(&self, err: AppError) {
        self.lock().scripted_failures.push_back(err);
    }

    pub fn revoke(&self, identity: &str) {
        self.lock().revoked.insert(identity.to_string());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Sends never complete while stalled; callers must rely on their timeout.
    pub fn stall_sends(&self, stall: bool) {
        self.lock().stall_sends = stall;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(state: &mut MemoryState, session: &Session) -> Result<(), AppError> {
        if state.unreachable {
            return Err(AppError::transient("remote unreachable"));
        }
        if state.revoked.contains(&session.identity) {
            return Err(AppError::rejected("access revoked"));
        }
        if let Some(err) = state.scripted_failures.pop_front() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for MemoryRemote {
    async fn send(&self, session: &Session, mutation: &MutationRecord) -> Result<Ack, AppError> {
        let stalled = self.lock().stall_sends;
        if stalled {
            futures::future::pending::<()>().await;
        }

        let ack = {
            let mut state = self.lock();
            state.sent.push(mutation.sequence);
            Self::admit(&mut state, session)?;
            state.table.apply(session, mutation)?
        };
        if !ack.conflict {
            self.feed.send(ack.server_state.clone()).ok();
        }
        Ok(ack)
    }

    async fn fetch_all(
        &self,
        session: &Session,
        owner_id: &str,
        since: Option<Revision>,
    ) -> Result<ChangeSet, AppError> {
        let mut state = self.lock();
        Self::admit(&mut state, session)?;
        Ok(state.table.changed_since(owner_id, since))
    }

    async fn subscribe(&self, session: &Session, owner_id: &str) -> Result<TaskStream, AppError> {
        {
            let mut state = self.lock();
            Self::admit(&mut state, session)?;
        }
        let owner_id = owner_id.to_string();
        let rx = self.feed.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            // A lagged receiver has lost updates; ending the stream makes the caller pull and
            // re-subscribe.
            match rx.recv().await {
                Ok(task) => Some((task, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged; ending subscription");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .filter(move |task| futures::future::ready(task.owner_id == owner_id));
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryRemote, RemoteTable};
    use crate::model::{MutationKind, MutationRecord, Priority, Task, TaskChanges, Timestamp};
    use crate::remote::{RemoteGateway, Session};
    use futures::StreamExt;

    fn session() -> Session {
        Session::new("user-1", "token")
    }

    fn task(id: &str, title: &str, modified: i64) -> Task {
        Task {
            id: id.to_string(),
            owner_id: "user-1".to_string(),
            title: title.to_string(),
            description: None,
            due_at: None,
            priority: Priority::Medium,
            completed: false,
            order_index: 0,
            created_at: Timestamp::from_unix_millis(1),
            modified_at: Timestamp::from_unix_millis(modified),
            deleted: false,
            deleted_at: None,
        }
    }

    fn record(sequence: u64, task: &Task, kind: MutationKind) -> MutationRecord {
        MutationRecord {
            sequence,
            task_id: task.id.clone(),
            kind,
            changes: TaskChanges::full(task),
            enqueued_at: task.modified_at,
            retry_count: 0,
        }
    }

    #[test]
    fn table_reports_conflict_when_server_is_newer() {
        let mut table = RemoteTable::default();
        table
            .apply(&session(), &record(1, &task("task-1", "B", 20), MutationKind::Create))
            .unwrap();

        let ack = table
            .apply(&session(), &record(2, &task("task-1", "A", 10), MutationKind::Update))
            .unwrap();

        assert!(ack.conflict);
        assert_eq!(ack.server_state.title, "B");
    }

    #[test]
    fn table_rejects_rows_of_other_owners() {
        let mut table = RemoteTable::default();
        let mut foreign = task("task-1", "theirs", 5);
        foreign.owner_id = "user-2".to_string();
        table.write(foreign);

        let err = table
            .apply(&session(), &record(1, &task("task-1", "mine", 9), MutationKind::Update))
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn changed_since_follows_write_order_not_client_clocks() {
        let mut table = RemoteTable::default();
        for (id, modified) in [("task-b", 30), ("task-a", 10), ("task-c", 20)] {
            table.write(task(id, id, modified));
        }
        let mut foreign = task("task-x", "theirs", 40);
        foreign.owner_id = "user-2".to_string();
        table.write(foreign);

        let changes = table.changed_since("user-1", Some(1));
        let ids: Vec<String> = changes.tasks.into_iter().map(|task| task.id).collect();

        assert_eq!(ids, vec!["task-a", "task-c"]);
        assert_eq!(changes.revision, 4);
        assert!(table.changed_since("user-1", Some(4)).tasks.is_empty());
    }

    #[test]
    fn rewriting_a_row_moves_it_past_the_cursor() {
        let mut table = RemoteTable::default();
        table
            .apply(&session(), &record(1, &task("task-1", "A", 50), MutationKind::Create))
            .unwrap();
        let cursor = table.revision();

        table
            .apply(&session(), &record(2, &task("task-1", "B", 50), MutationKind::Update))
            .unwrap();

        let changes = table.changed_since("user-1", Some(cursor));
        assert_eq!(changes.tasks.len(), 1);
        assert_eq!(changes.tasks[0].title, "B");
    }

    #[tokio::test]
    async fn subscription_delivers_other_device_edits() {
        let remote = MemoryRemote::new();
        let mut stream = remote.subscribe(&session(), "user-1").await.unwrap();

        let mut foreign = task("task-x", "not mine", 3);
        foreign.owner_id = "user-2".to_string();
        remote.apply_remote_edit(foreign);
        remote.apply_remote_edit(task("task-1", "from phone", 4));

        let received = stream.next().await.unwrap();
        assert_eq!(received.title, "from phone");
    }

    #[tokio::test]
    async fn lagging_subscription_ends_instead_of_skipping() {
        let remote = MemoryRemote::new();
        let mut stream = remote.subscribe(&session(), "user-1").await.unwrap();

        for n in 0..(super::CHANGE_FEED_CAPACITY as i64 + 10) {
            remote.apply_remote_edit(task(&format!("task-{n}"), "burst", n));
        }

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn revoked_identity_gets_permanent_error() {
        let remote = MemoryRemote::new();
        remote.revoke("user-1");

        let err = remote
            .send(&session(), &record(1, &task("task-1", "A", 1), MutationKind::Create))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "network_error");
        assert!(!err.is_retryable());
        assert_eq!(remote.sent_sequences(), vec![1]);
    }
}
