use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tasksync_core::config::SyncConfig;
use tasksync_core::error::AppError;
use tasksync_core::model::{ManualClock, SyncStatus, Timestamp};
use tasksync_core::remote::{FileRemote, MemoryRemote, RemoteGateway, Session};
use tasksync_core::storage::{LocalStore, MutationLog, TaskFilter};
use tasksync_core::sync::{ConnectivityMonitor, SyncCoordinator, SyncEvent, SyncState};
use tasksync_core::task_api::{NewTask, TaskEdit, TaskIntent};

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("tasksync-{nanos}-{name}"))
}

fn coordinator_with(
    gateway: Arc<dyn RemoteGateway>,
    clock: Arc<ManualClock>,
    config: SyncConfig,
) -> SyncCoordinator {
    SyncCoordinator::with_clock(
        Arc::new(LocalStore::in_memory()),
        MutationLog::in_memory(),
        gateway,
        Session::new("owner-1", "token"),
        config,
        clock,
    )
}

fn create(id: &str, title: &str) -> TaskIntent {
    TaskIntent::Create(NewTask {
        id: Some(id.to_string()),
        ..NewTask::titled(title)
    })
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn offline_create_is_confirmed_after_reconnect() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1_000));
    let coordinator = coordinator_with(remote.clone(), clock, SyncConfig::default());

    coordinator
        .on_local_mutation(create("T1", "buy milk"))
        .await
        .unwrap();
    assert_eq!(coordinator.pending_mutations().await.len(), 1);
    assert_eq!(
        coordinator.store().sync_metadata("T1").unwrap().status,
        SyncStatus::Pending
    );

    coordinator.on_connectivity_change(true).await.unwrap();

    assert!(coordinator.pending_mutations().await.is_empty());
    assert_eq!(
        coordinator.store().sync_metadata("T1").unwrap().status,
        SyncStatus::Clean
    );
    assert_eq!(remote.task("T1").unwrap().title, "buy milk");
    assert_eq!(coordinator.state(), SyncState::Idle);
}

#[tokio::test]
async fn newer_remote_edit_wins_conflict() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1));
    let coordinator = coordinator_with(remote.clone(), clock.clone(), SyncConfig::default());
    coordinator
        .on_local_mutation(create("T1", "original"))
        .await
        .unwrap();
    coordinator.on_connectivity_change(true).await.unwrap();
    coordinator.on_connectivity_change(false).await.unwrap();

    clock.set_millis(10);
    coordinator
        .on_local_mutation(TaskIntent::rename("T1", "A"))
        .await
        .unwrap();
    let mut other_device = remote.task("T1").unwrap();
    other_device.title = "B".to_string();
    other_device.modified_at = Timestamp::from_unix_millis(20);
    remote.apply_remote_edit(other_device);

    let mut events = coordinator.subscribe_events();
    let report = coordinator
        .on_connectivity_change(true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.conflicts, 1);
    let stored = coordinator.store().get_record("T1").unwrap();
    assert_eq!(stored.task.title, "B");
    assert_eq!(stored.task.modified_at, Timestamp::from_unix_millis(20));
    assert_eq!(stored.sync.status, SyncStatus::Clean);
    assert!(coordinator.pending_mutations().await.is_empty());
    assert!(matches!(
        events.try_recv().unwrap(),
        SyncEvent::Resolved { .. }
    ));
}

#[tokio::test]
async fn rapid_edits_are_sent_in_order() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1));
    let coordinator = coordinator_with(remote.clone(), clock.clone(), SyncConfig::default());
    coordinator
        .on_local_mutation(create("T1", "draft"))
        .await
        .unwrap();
    coordinator.on_connectivity_change(true).await.unwrap();
    coordinator.on_connectivity_change(false).await.unwrap();

    clock.set_millis(5);
    coordinator
        .on_local_mutation(TaskIntent::rename("T1", "first"))
        .await
        .unwrap();
    clock.set_millis(8);
    coordinator
        .on_local_mutation(TaskIntent::rename("T1", "second"))
        .await
        .unwrap();
    let queued: Vec<u64> = coordinator
        .pending_mutations()
        .await
        .iter()
        .map(|record| record.sequence)
        .collect();
    assert_eq!(queued, vec![2, 3]);

    let report = coordinator
        .on_connectivity_change(true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.confirmed, vec![2, 3]);
    assert_eq!(remote.sent_sequences(), vec![1, 2, 3]);
    let server = remote.task("T1").unwrap();
    let local = coordinator.store().get("T1").unwrap();
    assert_eq!(server.modified_at, Timestamp::from_unix_millis(8));
    assert_eq!(local.modified_at, Timestamp::from_unix_millis(8));
    assert_eq!(server.title, "second");
    assert_eq!(local, server);
}

#[tokio::test]
async fn revoked_permission_drops_record_and_flags_task() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1_000));
    let coordinator = coordinator_with(remote.clone(), clock, SyncConfig::default());
    let mut events = coordinator.subscribe_events();
    coordinator
        .on_local_mutation(create("T1", "secret"))
        .await
        .unwrap();
    remote.revoke("owner-1");

    coordinator.on_connectivity_change(true).await.unwrap();

    assert!(coordinator.pending_mutations().await.is_empty());
    assert_eq!(
        coordinator.store().sync_metadata("T1").unwrap().status,
        SyncStatus::Conflicted
    );
    match events.try_recv().unwrap() {
        SyncEvent::Rejected { task_id, error, .. } => {
            assert_eq!(task_id, "T1");
            assert!(!error.is_retryable());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    coordinator.drain().await.unwrap();
    assert_eq!(remote.sent_sequences(), vec![1]);
    let summary = coordinator.status().await;
    assert_eq!(summary.conflicted_tasks, 1);
    assert!(summary.last_error.is_some());
}

#[tokio::test]
async fn every_offline_mutation_reaches_remote_or_resolution() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(100));
    let coordinator = coordinator_with(remote.clone(), clock.clone(), SyncConfig::default());

    for (step, id) in ["a", "b", "c"].iter().enumerate() {
        clock.set_millis(100 + step as i64);
        coordinator
            .on_local_mutation(create(id, &format!("task {id}")))
            .await
            .unwrap();
    }
    clock.set_millis(200);
    coordinator
        .on_local_mutation(TaskIntent::complete("a"))
        .await
        .unwrap();
    coordinator
        .on_local_mutation(TaskIntent::Reorder {
            id: "c".to_string(),
            order_index: -1,
        })
        .await
        .unwrap();
    coordinator
        .on_local_mutation(TaskIntent::Delete { id: "b".to_string() })
        .await
        .unwrap();
    coordinator
        .on_local_mutation(TaskIntent::Update {
            id: "a".to_string(),
            edit: TaskEdit {
                description: Some(Some("with oat milk".to_string())),
                ..TaskEdit::default()
            },
        })
        .await
        .unwrap();

    let report = coordinator
        .on_connectivity_change(true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.confirmed.len(), 7);
    assert_eq!(report.remaining, 0);
    for stored in coordinator.store().records() {
        let server = remote.task(&stored.task.id).unwrap();
        assert_eq!(server, stored.task);
        assert_eq!(stored.sync.status, SyncStatus::Clean);
    }
    assert!(remote.task("b").unwrap().deleted);
    assert_eq!(remote.task("c").unwrap().order_index, -1);
}

#[tokio::test]
async fn timed_out_send_is_retried_not_confirmed() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1_000));
    let config = SyncConfig {
        request_timeout_ms: 50,
        ..SyncConfig::default()
    };
    let coordinator = coordinator_with(remote.clone(), clock, config);
    coordinator
        .on_local_mutation(create("T1", "slow"))
        .await
        .unwrap();
    remote.stall_sends(true);

    let report = coordinator
        .on_connectivity_change(true)
        .await
        .unwrap()
        .unwrap();

    assert!(report.confirmed.is_empty());
    assert!(report.retry_after.is_some());
    assert_eq!(coordinator.pending_mutations().await[0].retry_count, 1);
    assert_eq!(
        coordinator.last_error(),
        Some(AppError::transient("remote call timed out"))
    );

    remote.stall_sends(false);
    let report = coordinator.drain().await.unwrap();
    assert_eq!(report.confirmed, vec![1]);
    assert_eq!(coordinator.state(), SyncState::Idle);
}

#[tokio::test]
async fn queue_survives_restart() {
    let data_dir = temp_path("restart");
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1_000));
    {
        let coordinator = SyncCoordinator::with_clock(
            Arc::new(LocalStore::open_in(&data_dir).unwrap()),
            MutationLog::open_in(&data_dir).unwrap(),
            remote.clone(),
            Session::new("owner-1", "token"),
            SyncConfig::default(),
            clock.clone(),
        );
        coordinator
            .on_local_mutation(create("T1", "persisted"))
            .await
            .unwrap();
        coordinator
            .on_local_mutation(TaskIntent::complete("T1"))
            .await
            .unwrap();
    }

    let coordinator = SyncCoordinator::with_clock(
        Arc::new(LocalStore::open_in(&data_dir).unwrap()),
        MutationLog::open_in(&data_dir).unwrap(),
        remote.clone(),
        Session::new("owner-1", "token"),
        SyncConfig::default(),
        clock,
    );
    assert_eq!(coordinator.pending_mutations().await.len(), 2);
    coordinator.on_connectivity_change(true).await.unwrap();

    std::fs::remove_dir_all(&data_dir).ok();
    assert_eq!(remote.sent_sequences(), vec![1, 2]);
    assert!(remote.task("T1").unwrap().completed);
    assert!(coordinator.pending_mutations().await.is_empty());
}

#[tokio::test]
async fn second_device_pulls_changes_through_shared_file_remote() {
    let remote_path = temp_path("shared-remote.json");
    let clock = Arc::new(ManualClock::at_millis(1_000));
    let laptop = coordinator_with(
        Arc::new(FileRemote::new(&remote_path)),
        clock.clone(),
        SyncConfig::default(),
    );
    let phone = coordinator_with(
        Arc::new(FileRemote::new(&remote_path)),
        clock.clone(),
        SyncConfig::default(),
    );

    laptop
        .on_local_mutation(create("T1", "from laptop"))
        .await
        .unwrap();
    laptop.on_connectivity_change(true).await.unwrap();
    phone.on_connectivity_change(true).await.unwrap();
    let applied = phone.pull().await.unwrap();

    assert_eq!(applied, 1);
    assert_eq!(phone.store().get("T1").unwrap().title, "from laptop");
    assert_eq!(phone.pull().await.unwrap(), 0);

    clock.set_millis(5_000);
    phone
        .on_local_mutation(TaskIntent::complete("T1"))
        .await
        .unwrap();
    phone.drain().await.unwrap();
    laptop.pull().await.unwrap();

    std::fs::remove_file(&remote_path).ok();
    assert!(laptop.store().get("T1").unwrap().completed);
    assert_eq!(
        laptop.store().sync_metadata("T1").unwrap().status,
        SyncStatus::Clean
    );
}

#[tokio::test]
async fn pull_sees_writes_from_devices_with_slower_clocks() {
    let remote = Arc::new(MemoryRemote::new());
    let fast = coordinator_with(
        remote.clone(),
        Arc::new(ManualClock::at_millis(100_000)),
        SyncConfig::default(),
    );
    let slow = coordinator_with(
        remote.clone(),
        Arc::new(ManualClock::at_millis(50_000)),
        SyncConfig::default(),
    );
    let reader = coordinator_with(
        remote.clone(),
        Arc::new(ManualClock::at_millis(70_000)),
        SyncConfig::default(),
    );
    reader.on_connectivity_change(true).await.unwrap();

    fast.on_local_mutation(create("Ta", "from fast clock"))
        .await
        .unwrap();
    fast.on_connectivity_change(true).await.unwrap();
    assert_eq!(reader.pull().await.unwrap(), 1);

    slow.on_local_mutation(create("Tb", "from slow clock"))
        .await
        .unwrap();
    slow.on_connectivity_change(true).await.unwrap();
    assert!(remote.task("Tb").is_some());

    assert_eq!(reader.pull().await.unwrap(), 1);
    let tb = reader.store().get("Tb").unwrap();
    assert_eq!(tb.title, "from slow clock");
    assert_eq!(tb.modified_at, Timestamp::from_unix_millis(50_000));
    assert_eq!(reader.pull().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_loop_drains_and_applies_live_updates() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1_000));
    let config = SyncConfig {
        connectivity_debounce_ms: 20,
        ..SyncConfig::default()
    };
    let coordinator = coordinator_with(remote.clone(), clock.clone(), config);
    let monitor = ConnectivityMonitor::new(false);
    let runner = coordinator.spawn(&monitor);

    coordinator
        .on_local_mutation(create("T1", "queued offline"))
        .await
        .unwrap();
    monitor.set_online(true);
    wait_for(|| remote.task("T1").is_some()).await;

    coordinator
        .on_local_mutation(TaskIntent::rename("T1", "sent on wake"))
        .await
        .unwrap();
    wait_for(|| remote.task("T1").is_some_and(|task| task.title == "sent on wake")).await;
    wait_for(|| coordinator.state() == SyncState::Idle).await;

    let mut other_device = remote.task("T1").unwrap();
    other_device.title = "edited elsewhere".to_string();
    other_device.modified_at = Timestamp::from_unix_millis(90_000);
    remote.apply_remote_edit(other_device);
    wait_for(|| {
        coordinator
            .store()
            .get("T1")
            .is_some_and(|task| task.title == "edited elsewhere")
    })
    .await;

    monitor.set_online(false);
    wait_for(|| coordinator.state() == SyncState::Offline).await;
    drop(monitor);
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("sync loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn local_reads_stay_available_while_offline() {
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::at_millis(1_000));
    let coordinator = coordinator_with(remote, clock, SyncConfig::default());
    coordinator
        .on_local_mutation(create("T1", "second"))
        .await
        .unwrap();
    coordinator
        .on_local_mutation(TaskIntent::Create(NewTask {
            id: Some("T0".to_string()),
            order_index: Some(-5),
            ..NewTask::titled("first")
        }))
        .await
        .unwrap();

    let titles: Vec<String> = coordinator
        .list(&TaskFilter::all("owner-1"))
        .into_iter()
        .map(|task| task.title)
        .collect();

    assert_eq!(titles, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(coordinator.status().await.pending_tasks, 2);
}
