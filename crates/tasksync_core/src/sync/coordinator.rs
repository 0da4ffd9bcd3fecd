//! Drives the mutation log against the remote gateway and folds remote changes back into the
//! local store.

use crate::config::SyncConfig;
use crate::error::AppError;
use crate::model::{
    Clock, MutationKind, MutationRecord, SyncMetadata, SyncStatus, SystemClock, Task, TaskChanges,
    Timestamp,
};
use crate::remote::{Ack, RemoteGateway, Session, TaskStream};
use crate::storage::{LocalStore, MutationLog, StoredTask, TaskFilter};
use crate::sync::backoff::Backoff;
use crate::sync::connectivity::ConnectivityMonitor;
use crate::sync::resolver::{self, Winner};
use crate::task_api::{IntentContext, TaskIntent, plan};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Draining,
    Reconciling,
    Offline,
}

impl SyncState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Draining => "draining",
            Self::Reconciling => "reconciling",
            Self::Offline => "offline",
        }
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The remote refused a mutation for good; the task is now marked conflicted.
    Rejected {
        task_id: String,
        sequence: u64,
        error: AppError,
    },
    /// A conflict was settled by last-write-wins.
    Resolved { task_id: String, winner: Winner },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub state: SyncState,
    pub online: bool,
    pub pending_mutations: usize,
    pub pending_tasks: usize,
    pub conflicted_tasks: usize,
    pub last_error: Option<AppError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub confirmed: Vec<u64>,
    pub conflicts: usize,
    pub rejected: Vec<u64>,
    /// Set when a retryable failure stopped the drain.
    pub retry_after: Option<Duration>,
    pub remaining: usize,
}

impl DrainReport {
    fn absorb(&mut self, next: DrainReport) {
        self.confirmed.extend(next.confirmed);
        self.conflicts += next.conflicts;
        self.rejected.extend(next.rejected);
        self.retry_after = next.retry_after;
        self.remaining = next.remaining;
    }
}

/// What happened to an incoming remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    KeptLocal,
    /// Buffered until the task's pending mutations are confirmed.
    Deferred,
    Ignored,
}

struct Sequencer {
    log: MutationLog,
    deferred: HashMap<String, Vec<Task>>,
}

struct Inner {
    store: Arc<LocalStore>,
    sequencer: Mutex<Sequencer>,
    drain_gate: Mutex<()>,
    gateway: Arc<dyn RemoteGateway>,
    session: Session,
    config: SyncConfig,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    online: AtomicBool,
    state_tx: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    wake: Notify,
    last_error: StdMutex<Option<AppError>>,
}

/// Cheap to clone; clones share the same queue, store and state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LocalStore>,
        log: MutationLog,
        gateway: Arc<dyn RemoteGateway>,
        session: Session,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(store, log, gateway, session, config, Arc::new(SystemClock))
    }

    /// Starts offline; feed connectivity through [`Self::on_connectivity_change`] or [`Self::run`].
    pub fn with_clock(
        store: Arc<LocalStore>,
        log: MutationLog,
        gateway: Arc<dyn RemoteGateway>,
        session: Session,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        );
        let (state_tx, _) = watch::channel(SyncState::Offline);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                sequencer: Mutex::new(Sequencer {
                    log,
                    deferred: HashMap::new(),
                }),
                drain_gate: Mutex::new(()),
                gateway,
                session,
                config,
                backoff,
                clock,
                online: AtomicBool::new(false),
                state_tx,
                events,
                wake: Notify::new(),
                last_error: StdMutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn owner_id(&self) -> &str {
        &self.inner.session.identity
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        self.inner.store.list(filter)
    }

    pub async fn pending_mutations(&self) -> Vec<MutationRecord> {
        self.inner.sequencer.lock().await.log.records().to_vec()
    }

    pub async fn status(&self) -> SyncSummary {
        let pending_mutations = self.inner.sequencer.lock().await.log.len();
        SyncSummary {
            state: self.state(),
            online: self.is_online(),
            pending_mutations,
            pending_tasks: self.inner.store.count_by_status(SyncStatus::Pending),
            conflicted_tasks: self.inner.store.count_by_status(SyncStatus::Conflicted),
            last_error: self.last_error(),
        }
    }

    pub fn last_error(&self) -> Option<AppError> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies a user intent optimistically: the store reflects it and a record is queued before
    /// this returns. The remote round trip happens on the next drain.
    #[instrument(skip(self), fields(kind = intent.kind().label()))]
    pub async fn on_local_mutation(&self, intent: TaskIntent) -> Result<Task, AppError> {
        let id = intent.resolve_id()?;
        let task = {
            let mut seq = self.inner.sequencer.lock().await;
            let previous = self.inner.store.get_record(&id);
            let now = self.inner.clock.now();
            let ctx = IntentContext {
                owner_id: self.owner_id(),
                now,
                next_order_index: self.next_order_index(),
            };
            let next = plan(&intent, &id, previous.as_ref().map(|stored| &stored.task), &ctx)?;
            let changes = match (&intent, &previous) {
                (TaskIntent::Create(_), _) | (_, None) => TaskChanges::full(&next),
                (_, Some(stored)) => TaskChanges::diff(&stored.task, &next),
            };

            let written = match &intent {
                TaskIntent::Delete { .. } => self
                    .inner
                    .store
                    .mark_deleted(&id, next.modified_at)
                    .map(|_| ()),
                _ => self.inner.store.upsert(next.clone()),
            };
            written.map_err(|err| self.degrade(err))?;
            if let Err(err) = seq.log.enqueue(&id, intent.kind(), changes, now) {
                if let Err(restore_err) = self.inner.store.restore(&id, previous) {
                    error!(task_id = %id, error = %restore_err, "failed to roll back local write");
                }
                return Err(self.degrade(err));
            }
            next
        };

        debug!(task_id = %task.id, "local mutation queued");
        if self.is_online() {
            self.inner.wake.notify_one();
        }
        Ok(task)
    }

    /// Records a platform connectivity transition. Coming back online drains the queue.
    #[instrument(skip(self))]
    pub async fn on_connectivity_change(
        &self,
        online: bool,
    ) -> Result<Option<DrainReport>, AppError> {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if !online {
            if was_online {
                info!("connectivity lost");
            }
            // An in-flight drain finishes its current send and parks itself.
            if self.inner.drain_gate.try_lock().is_ok() {
                self.set_state(SyncState::Offline);
            }
            return Ok(None);
        }
        if !was_online || self.state() == SyncState::Offline {
            info!("connectivity restored");
            return self.drain().await.map(Some);
        }
        Ok(None)
    }

    /// Drains until the queue is empty, a retryable failure asks for backoff, or the link drops.
    pub async fn drain(&self) -> Result<DrainReport, AppError> {
        let mut report = DrainReport::default();
        loop {
            let before = report.confirmed.len() + report.rejected.len() + report.conflicts;
            report.absorb(self.drain_once().await?);
            let progressed = report.confirmed.len() + report.rejected.len() + report.conflicts;
            if report.remaining == 0
                || report.retry_after.is_some()
                || !self.is_online()
                || progressed == before
            {
                return Ok(report);
            }
        }
    }

    /// Sends one batch from the head of the queue.
    #[instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<DrainReport, AppError> {
        let _gate = self.inner.drain_gate.lock().await;
        let mut report = DrainReport::default();

        if !self.is_online() {
            self.set_state(SyncState::Offline);
            report.remaining = self.inner.sequencer.lock().await.log.len();
            return Ok(report);
        }

        let batch = {
            let seq = self.inner.sequencer.lock().await;
            seq.log.peek_batch(self.inner.config.batch_size)
        };
        if batch.is_empty() {
            self.set_state(SyncState::Idle);
            return Ok(report);
        }

        self.set_state(SyncState::Draining);
        debug!(records = batch.len(), "draining batch");

        for record in &batch {
            if !self.is_online() {
                info!("connectivity lost mid-drain; parking remaining records");
                break;
            }
            match self.send_with_timeout(record).await {
                Ok(ack) if ack.conflict => {
                    self.set_state(SyncState::Reconciling);
                    self.reconcile(record, ack.server_state)
                        .await
                        .map_err(|err| self.degrade(err))?;
                    report.conflicts += 1;
                    self.set_state(SyncState::Draining);
                }
                Ok(ack) => {
                    self.confirm_sent(record, ack.server_state)
                        .await
                        .map_err(|err| self.degrade(err))?;
                    report.confirmed.push(record.sequence);
                }
                Err(err) if err.is_retryable() => {
                    let retries = {
                        let mut seq = self.inner.sequencer.lock().await;
                        seq.log
                            .bump_retry(record.sequence)
                            .map_err(|err| self.degrade(err))?
                            .unwrap_or(1)
                    };
                    let delay = self.inner.backoff.delay(retries.saturating_sub(1));
                    warn!(
                        sequence = record.sequence,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "send failed; backing off"
                    );
                    self.remember_error(err);
                    report.retry_after = Some(delay);
                    break;
                }
                Err(err) => {
                    self.reject(record, err)
                        .await
                        .map_err(|err| self.degrade(err))?;
                    report.rejected.push(record.sequence);
                }
            }
        }

        report.remaining = self.inner.sequencer.lock().await.log.len();
        let next_state = if !self.is_online() {
            SyncState::Offline
        } else if report.remaining == 0 {
            SyncState::Idle
        } else {
            SyncState::Draining
        };
        self.set_state(next_state);
        Ok(report)
    }

    /// Folds one remote version into the local store. Versions for tasks with queued mutations
    /// wait until those are confirmed so they cannot clobber unconfirmed local edits.
    #[instrument(skip(self, remote), fields(task_id = %remote.id))]
    pub async fn on_remote_update(&self, remote: Task) -> Result<RemoteOutcome, AppError> {
        if remote.owner_id != self.owner_id() {
            debug!("ignoring task owned by another identity");
            return Ok(RemoteOutcome::Ignored);
        }
        let mut seq = self.inner.sequencer.lock().await;
        if seq.log.has_pending(&remote.id) {
            seq.deferred.entry(remote.id.clone()).or_default().push(remote);
            return Ok(RemoteOutcome::Deferred);
        }
        self.settle_remote(&mut seq, remote)
            .map_err(|err| self.degrade(err))
    }

    /// Fetches everything changed since the last pull and folds it in.
    #[instrument(skip(self))]
    pub async fn pull(&self) -> Result<usize, AppError> {
        if !self.is_online() {
            return Err(AppError::transient("offline"));
        }
        let since = self.inner.store.pull_cursor();
        let fetch = self
            .inner
            .gateway
            .fetch_all(&self.inner.session, self.owner_id(), since);
        let timeout = self.inner.config.request_timeout();
        let changes = match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(AppError::transient("remote fetch timed out")),
        };

        let mut applied = 0;
        for task in changes.tasks {
            if self.on_remote_update(task).await? == RemoteOutcome::Applied {
                applied += 1;
            }
        }
        self.inner
            .store
            .advance_pull_cursor(changes.revision)
            .map_err(|err| self.degrade(err))?;
        info!(applied, "pull complete");
        Ok(applied)
    }

    /// Purges tombstones the remote already holds, once they are older than the retention
    /// window.
    #[instrument(skip(self))]
    pub async fn collect_garbage(&self, now: Timestamp) -> Result<usize, AppError> {
        let seq = self.inner.sequencer.lock().await;
        let retention = self.inner.config.tombstone_retention();
        let expired: Vec<String> = self
            .inner
            .store
            .records()
            .into_iter()
            .filter(|stored| is_expired_tombstone(stored, now, retention))
            .filter(|stored| !seq.log.has_pending(&stored.task.id))
            .map(|stored| stored.task.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        let purged = self.inner.store.purge(&expired)?;
        info!(purged, "tombstones purged");
        Ok(purged)
    }

    /// Background loop: follows connectivity, keeps the live subscription open, drains on wake
    /// and on a timer. Returns when the connectivity source goes away.
    pub async fn run(&self, mut connectivity: watch::Receiver<bool>) {
        let initial = *connectivity.borrow_and_update();
        let mut retry_at = self.after_drain(self.on_connectivity_change(initial).await);
        let mut feed: Option<TaskStream> = None;
        let mut resubscribe_at = Instant::now();

        loop {
            if feed.is_none() && self.is_online() && Instant::now() >= resubscribe_at {
                feed = self.open_feed().await;
                if feed.is_none() {
                    resubscribe_at = Instant::now() + self.inner.backoff.delay(0);
                }
            }
            let wait = retry_at
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or_else(|| self.inner.config.wake_interval());

            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        info!("connectivity source closed; stopping sync loop");
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    if !online {
                        feed = None;
                    }
                    retry_at = self.after_drain(self.on_connectivity_change(online).await);
                }
                _ = self.inner.wake.notified(), if retry_at.is_none() => {
                    retry_at = self.after_drain(self.drain().await);
                }
                _ = tokio::time::sleep(wait) => {
                    retry_at = self.after_drain(self.drain().await);
                }
                next = next_remote(&mut feed) => match next {
                    Some(task) => {
                        if let Err(err) = self.on_remote_update(task).await {
                            warn!(error = %err, "failed to apply remote update");
                        }
                    }
                    None => {
                        info!("remote subscription dropped; re-subscribing");
                        feed = None;
                        resubscribe_at = Instant::now() + self.inner.backoff.delay(0);
                    }
                },
            }
        }
    }

    /// Runs [`Self::run`] on the current runtime, fed by `monitor` debounced over
    /// `connectivity_debounce_ms`.
    pub fn spawn(&self, monitor: &ConnectivityMonitor) -> JoinHandle<()> {
        let connectivity = monitor.debounced(self.inner.config.connectivity_debounce());
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run(connectivity).await })
    }

    async fn open_feed(&self) -> Option<TaskStream> {
        if let Err(err) = self.pull().await {
            warn!(error = %err, "catch-up pull failed");
        }
        match self
            .inner
            .gateway
            .subscribe(&self.inner.session, self.owner_id())
            .await
        {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(error = %err, "remote subscription failed");
                None
            }
        }
    }

    fn after_drain(
        &self,
        result: Result<impl Into<Option<DrainReport>>, AppError>,
    ) -> Option<Instant> {
        match result {
            Ok(report) => report
                .into()
                .and_then(|report| report.retry_after)
                .map(|delay| Instant::now() + delay),
            Err(err) => {
                error!(error = %err, "drain failed");
                Some(Instant::now() + self.inner.backoff.delay(0))
            }
        }
    }

    async fn send_with_timeout(&self, record: &MutationRecord) -> Result<Ack, AppError> {
        let send = self.inner.gateway.send(&self.inner.session, record);
        match tokio::time::timeout(self.inner.config.request_timeout(), send).await {
            Ok(result) => result,
            Err(_) => Err(AppError::transient("remote call timed out")),
        }
    }

    async fn confirm_sent(
        &self,
        record: &MutationRecord,
        server_state: Task,
    ) -> Result<(), AppError> {
        let mut seq = self.inner.sequencer.lock().await;
        let id = record.task_id.as_str();
        let more_pending = has_other_records(&seq.log, id, record.sequence);

        if more_pending {
            if self.inner.store.get(id).is_some() {
                self.inner
                    .store
                    .set_sync(id, SyncMetadata::pending(Some(server_state.modified_at)))?;
            }
        } else {
            self.fold_authoritative(&mut seq, server_state)?;
        }
        seq.log.confirm(record.sequence)?;
        debug!(sequence = record.sequence, task_id = %id, "mutation confirmed");
        self.flush_deferred(&mut seq, id)
    }

    async fn reconcile(&self, record: &MutationRecord, server_state: Task) -> Result<(), AppError> {
        let mut seq = self.inner.sequencer.lock().await;
        let id = record.task_id.clone();
        let winner = self.fold_authoritative(&mut seq, server_state)?;
        seq.log.confirm(record.sequence)?;
        info!(sequence = record.sequence, task_id = %id, winner = ?winner, "conflict resolved");
        let _ = self.inner.events.send(SyncEvent::Resolved {
            task_id: id.clone(),
            winner,
        });
        self.flush_deferred(&mut seq, &id)
    }

    async fn reject(&self, record: &MutationRecord, err: AppError) -> Result<(), AppError> {
        let mut seq = self.inner.sequencer.lock().await;
        let id = record.task_id.as_str();
        if let Some(stored) = self.inner.store.get_record(id) {
            let sync = SyncMetadata {
                remote_modified_at: stored.sync.remote_modified_at,
                status: SyncStatus::Conflicted,
            };
            self.inner.store.set_sync(id, sync)?;
        }
        seq.log.confirm(record.sequence)?;
        warn!(
            sequence = record.sequence,
            task_id = %id,
            error = %err,
            "mutation rejected by remote"
        );
        self.remember_error(err.clone());
        let _ = self.inner.events.send(SyncEvent::Rejected {
            task_id: id.to_string(),
            sequence: record.sequence,
            error: err,
        });
        self.flush_deferred(&mut seq, id)
    }

    /// Writes the outcome of last-write-wins between the local copy and a version the server
    /// returned. When local wins the remote must still learn the whole local version.
    fn fold_authoritative(&self, seq: &mut Sequencer, remote: Task) -> Result<Winner, AppError> {
        let Some(local) = self.inner.store.get(&remote.id) else {
            self.adopt(remote)?;
            return Ok(Winner::Remote);
        };
        let winner = resolver::winner(&local, &remote);
        match winner {
            Winner::Remote => self.adopt(resolver::merge(&local, &remote))?,
            Winner::Local => self.keep_local(seq, &local, remote.modified_at)?,
        }
        Ok(winner)
    }

    fn settle_remote(&self, seq: &mut Sequencer, remote: Task) -> Result<RemoteOutcome, AppError> {
        let Some(stored) = self.inner.store.get_record(&remote.id) else {
            self.adopt(remote)?;
            return Ok(RemoteOutcome::Applied);
        };
        if stored
            .sync
            .remote_modified_at
            .is_some_and(|known| known >= remote.modified_at)
        {
            return Ok(RemoteOutcome::Ignored);
        }

        match resolver::winner(&stored.task, &remote) {
            Winner::Remote => {
                self.adopt(resolver::merge(&stored.task, &remote))?;
                Ok(RemoteOutcome::Applied)
            }
            Winner::Local if stored.sync.status == SyncStatus::Conflicted => {
                let sync = SyncMetadata {
                    remote_modified_at: Some(remote.modified_at),
                    status: SyncStatus::Conflicted,
                };
                self.inner.store.set_sync(&remote.id, sync)?;
                Ok(RemoteOutcome::KeptLocal)
            }
            Winner::Local => {
                self.keep_local(seq, &stored.task, remote.modified_at)?;
                Ok(RemoteOutcome::KeptLocal)
            }
        }
    }

    fn adopt(&self, remote: Task) -> Result<(), AppError> {
        let sync = SyncMetadata::clean(remote.modified_at);
        self.inner.store.put(remote, sync)
    }

    fn keep_local(
        &self,
        seq: &mut Sequencer,
        local: &Task,
        remote_modified_at: Timestamp,
    ) -> Result<(), AppError> {
        let sequence = seq.log.enqueue(
            &local.id,
            MutationKind::Update,
            TaskChanges::full(local),
            self.inner.clock.now(),
        )?;
        debug!(task_id = %local.id, sequence, "local version kept; follow-up queued");
        self.inner
            .store
            .set_sync(&local.id, SyncMetadata::pending(Some(remote_modified_at)))?;
        if self.is_online() {
            self.inner.wake.notify_one();
        }
        Ok(())
    }

    fn flush_deferred(&self, seq: &mut Sequencer, task_id: &str) -> Result<(), AppError> {
        if seq.log.has_pending(task_id) {
            return Ok(());
        }
        let Some(waiting) = seq.deferred.remove(task_id) else {
            return Ok(());
        };
        let mut waiting = waiting.into_iter();
        while let Some(remote) = waiting.next() {
            let outcome = self.settle_remote(seq, remote)?;
            debug!(task_id, outcome = ?outcome, "deferred remote update applied");
            if seq.log.has_pending(task_id) {
                // A follow-up was queued; the rest waits for its confirmation.
                let rest: Vec<Task> = waiting.collect();
                if !rest.is_empty() {
                    seq.deferred.entry(task_id.to_string()).or_default().extend(rest);
                }
                break;
            }
        }
        Ok(())
    }

    fn next_order_index(&self) -> i64 {
        self.inner
            .store
            .list(&TaskFilter::all(self.owner_id()))
            .iter()
            .map(|task| task.order_index + 1)
            .max()
            .unwrap_or(0)
    }

    fn set_state(&self, next: SyncState) {
        let changed = self.inner.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(state = next.label(), "sync state changed");
        }
    }

    fn remember_error(&self, err: AppError) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    /// Local storage failures park the engine offline until the next successful drain.
    fn degrade(&self, err: AppError) -> AppError {
        if err.is_local_fatal() {
            error!(error = %err, "local storage failure; going offline");
            self.set_state(SyncState::Offline);
            self.remember_error(err.clone());
        }
        err
    }
}

fn has_other_records(log: &MutationLog, task_id: &str, sequence: u64) -> bool {
    log.records()
        .iter()
        .any(|record| record.task_id == task_id && record.sequence != sequence)
}

fn is_expired_tombstone(stored: &StoredTask, now: Timestamp, retention: time::Duration) -> bool {
    stored.task.deleted
        && stored.sync.status == SyncStatus::Clean
        && stored
            .task
            .deleted_at
            .is_some_and(|deleted_at| deleted_at.plus(retention) <= now)
}

async fn next_remote(feed: &mut Option<TaskStream>) -> Option<Task> {
    match feed {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}
