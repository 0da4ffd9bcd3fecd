use clap::Parser;
use clap::error::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tasksync_cli::cli::{Cli, Command, ListCommand, build_overrides, parse_due, parse_priority};
use tasksync_core::config::{self, SyncConfig};
use tasksync_core::error::AppError;
use tasksync_core::model::{SyncStatus, Task, Timestamp};
use tasksync_core::remote::{FileRemote, Session};
use tasksync_core::storage::json_store;
use tasksync_core::storage::{LocalStore, MutationLog, TaskFilter};
use tasksync_core::sync::{SyncCoordinator, SyncEvent};
use tasksync_core::task_api::{NewTask, TaskEdit, TaskIntent};
use time::UtcOffset;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const REMOTE_PATH_ENV_VAR: &str = "TASKSYNC_REMOTE_PATH";
const ACCESS_TOKEN_ENV_VAR: &str = "TASKSYNC_ACCESS_TOKEN";
const LOG_ENV_VAR: &str = "TASKSYNC_LOG";
const DEFAULT_OWNER: &str = "local";

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "priority")]
    priority: &'static str,
    #[tabled(rename = "due")]
    due: String,
    #[tabled(rename = "done")]
    done: &'static str,
    #[tabled(rename = "sync")]
    sync: &'static str,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(raw_overrides: &[String]) -> Result<SyncConfig, AppError> {
    let loaded = config::load_config_with_fallback();
    if let Some(err) = loaded.error {
        warn!(error = %err, "using default configuration");
    }
    let overrides = build_overrides(raw_overrides)?;
    Ok(config::merge_overrides(&loaded.config, &overrides))
}

fn remote_path(config: &SyncConfig, data_dir: &std::path::Path) -> PathBuf {
    if let Ok(path) = std::env::var(REMOTE_PATH_ENV_VAR)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    config
        .remote_path
        .clone()
        .unwrap_or_else(|| data_dir.join("remote.json"))
}

fn open_coordinator(config: SyncConfig) -> Result<SyncCoordinator, AppError> {
    let data_dir = json_store::resolve_data_dir(config.data_dir.as_deref())?;
    let store = Arc::new(LocalStore::open_in(&data_dir)?);
    let log = MutationLog::open_in(&data_dir)?;
    let gateway = Arc::new(FileRemote::new(&remote_path(&config, &data_dir)));
    let owner = config
        .owner_id
        .clone()
        .filter(|owner| !owner.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OWNER.to_string());
    let token = std::env::var(ACCESS_TOKEN_ENV_VAR).unwrap_or_default();
    Ok(SyncCoordinator::new(
        store,
        log,
        gateway,
        Session::new(owner, token),
        config,
    ))
}

fn sync_label(coordinator: &SyncCoordinator, id: &str) -> &'static str {
    coordinator
        .store()
        .sync_metadata(id)
        .map(|meta| meta.status)
        .unwrap_or(SyncStatus::Pending)
        .label()
}

fn task_json(coordinator: &SyncCoordinator, task: &Task) -> Result<serde_json::Value, AppError> {
    let mut value =
        serde_json::to_value(task).map_err(|err| AppError::invalid_data(err.to_string()))?;
    value["sync_status"] = serde_json::json!(sync_label(coordinator, &task.id));
    Ok(value)
}

fn print_task_json(coordinator: &SyncCoordinator, task: &Task) -> Result<(), AppError> {
    println!("{}", task_json(coordinator, task)?);
    Ok(())
}

fn print_tasks_json(coordinator: &SyncCoordinator, tasks: &[Task]) -> Result<(), AppError> {
    let payload = tasks
        .iter()
        .map(|task| task_json(coordinator, task))
        .collect::<Result<Vec<_>, _>>()?;
    println!("{}", serde_json::Value::Array(payload));
    Ok(())
}

fn print_tasks_plain(coordinator: &SyncCoordinator, tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    let rows = tasks.iter().map(|task| TaskRow {
        id: task.id.clone(),
        title: task.title.clone(),
        priority: task.priority.label(),
        due: task
            .due_at
            .map(|due| due.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        done: if task.completed { "yes" } else { "no" },
        sync: sync_label(coordinator, &task.id),
    });
    let mut table = Table::new(rows);
    table.with(Style::psql());
    println!("{table}");
}

fn print_task_plain(coordinator: &SyncCoordinator, task: &Task) {
    println!("ID: {}", task.id);
    println!("Title: {}", task.title);
    println!(
        "Description: {}",
        task.description.as_deref().unwrap_or("-")
    );
    println!("Priority: {}", task.priority.label());
    println!(
        "Due: {}",
        task.due_at
            .map(|due| due.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Completed: {}", if task.completed { "yes" } else { "no" });
    println!("Order: {}", task.order_index);
    println!("Created: {}", task.created_at);
    println!("Modified: {}", task.modified_at);
    println!("Sync: {}", sync_label(coordinator, &task.id));
}

fn report_task(
    coordinator: &SyncCoordinator,
    task: &Task,
    json: bool,
    verb: &str,
) -> Result<(), AppError> {
    if json {
        print_task_json(coordinator, task)
    } else {
        println!("{verb} task: {} ({})", task.title, task.id);
        Ok(())
    }
}

fn edit(id: String, edit: TaskEdit) -> TaskIntent {
    TaskIntent::Update { id, edit }
}

fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

async fn run_sync(coordinator: &SyncCoordinator, json: bool) -> Result<(), AppError> {
    let mut events = coordinator.subscribe_events();
    let report = coordinator
        .on_connectivity_change(true)
        .await?
        .unwrap_or_default();
    let pulled = match coordinator.pull().await {
        Ok(applied) => applied,
        Err(err) if err.is_retryable() => {
            warn!(error = %err, "pull skipped");
            0
        }
        Err(err) => return Err(err),
    };

    let mut rejected = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Rejected { task_id, error, .. } = event {
            rejected.push((task_id, error));
        }
    }
    let summary = coordinator.status().await;

    if json {
        let payload = serde_json::json!({
            "sent": report.confirmed.len(),
            "conflicts": report.conflicts,
            "rejected": rejected
                .iter()
                .map(|(task_id, error)| {
                    serde_json::json!({ "id": task_id, "error": error.to_string() })
                })
                .collect::<Vec<_>>(),
            "pulled": pulled,
            "pending": summary.pending_mutations,
            "retry_after_ms": report.retry_after.map(|delay| delay.as_millis() as u64),
        });
        println!("{payload}");
        return Ok(());
    }

    println!(
        "Synced: {} sent, {} conflicts resolved, {} pulled",
        report.confirmed.len(),
        report.conflicts,
        pulled
    );
    for (task_id, error) in &rejected {
        eprintln!("Rejected change to {task_id}: {error}");
    }
    if summary.pending_mutations > 0 {
        let reason = summary
            .last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "remote unavailable".to_string());
        println!(
            "{} changes pending ({reason})",
            summary.pending_mutations
        );
    }
    Ok(())
}

async fn run_command(cli: Cli) -> Result<(), AppError> {
    let config = load_config(&cli.config_override)?;
    let coordinator = open_coordinator(config)?;
    let json = cli.json;

    match cli.command {
        Command::Add {
            title,
            description,
            due,
            priority,
        } => {
            let title = match title {
                Some(value) if !value.trim().is_empty() => value,
                _ => return Err(AppError::invalid_input("title is required")),
            };
            let intent = TaskIntent::Create(NewTask {
                description,
                due_at: due.as_deref().map(parse_due).transpose()?,
                priority: priority
                    .as_deref()
                    .map(parse_priority)
                    .transpose()?
                    .unwrap_or_default(),
                ..NewTask::titled(title)
            });
            let task = coordinator.on_local_mutation(intent).await?;
            report_task(&coordinator, &task, json, "Added")?;
        }
        Command::Edit {
            id,
            title,
            description,
            clear_description,
            priority,
        } => {
            let description = if clear_description {
                Some(None)
            } else {
                description.map(Some)
            };
            let changes = TaskEdit {
                title,
                description,
                priority: priority.as_deref().map(parse_priority).transpose()?,
                ..TaskEdit::default()
            };
            let task = coordinator.on_local_mutation(edit(id, changes)).await?;
            report_task(&coordinator, &task, json, "Updated")?;
        }
        Command::Done { id } => {
            let task = coordinator.on_local_mutation(TaskIntent::complete(id)).await?;
            report_task(&coordinator, &task, json, "Completed")?;
        }
        Command::Reopen { id } => {
            let changes = TaskEdit {
                completed: Some(false),
                ..TaskEdit::default()
            };
            let task = coordinator.on_local_mutation(edit(id, changes)).await?;
            report_task(&coordinator, &task, json, "Reopened")?;
        }
        Command::Delete { id } => {
            let task = coordinator
                .on_local_mutation(TaskIntent::Delete { id })
                .await?;
            report_task(&coordinator, &task, json, "Deleted")?;
        }
        Command::Reorder { id, position } => {
            let task = coordinator
                .on_local_mutation(TaskIntent::Reorder {
                    id,
                    order_index: position,
                })
                .await?;
            report_task(&coordinator, &task, json, "Moved")?;
        }
        Command::Due {
            id,
            datetime,
            clear,
        } => {
            let due_at = if clear {
                None
            } else {
                datetime.as_deref().map(parse_due).transpose()?
            };
            let changes = TaskEdit {
                due_at: Some(due_at),
                ..TaskEdit::default()
            };
            let task = coordinator.on_local_mutation(edit(id, changes)).await?;
            report_task(&coordinator, &task, json, "Rescheduled")?;
        }
        Command::Show { id } => {
            let task = coordinator
                .store()
                .get(id.trim())
                .filter(|task| !task.deleted)
                .ok_or_else(|| AppError::invalid_input("task not found"))?;
            if json {
                print_task_json(&coordinator, &task)?;
            } else {
                print_task_plain(&coordinator, &task);
            }
        }
        Command::List { list } => {
            let owner = coordinator.owner_id();
            let now = Timestamp::now();
            let filter = match list {
                ListCommand::Today => TaskFilter::today(owner, now, local_offset()),
                ListCommand::Upcoming => TaskFilter::upcoming(owner, now, local_offset()),
                ListCommand::Completed => TaskFilter::completed(owner),
                ListCommand::All => TaskFilter::all(owner),
            };
            let tasks = coordinator.list(&filter);
            if json {
                print_tasks_json(&coordinator, &tasks)?;
            } else {
                print_tasks_plain(&coordinator, &tasks);
            }
        }
        Command::Status => {
            let summary = coordinator.status().await;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "pending_mutations": summary.pending_mutations,
                        "pending_tasks": summary.pending_tasks,
                        "conflicted_tasks": summary.conflicted_tasks,
                    })
                );
            } else {
                println!("Pending changes: {}", summary.pending_mutations);
                println!("Tasks waiting to sync: {}", summary.pending_tasks);
                println!("Tasks needing attention: {}", summary.conflicted_tasks);
            }
        }
        Command::Sync => run_sync(&coordinator, json).await?,
        Command::Gc => {
            let purged = coordinator.collect_garbage(Timestamp::now()).await?;
            if json {
                println!("{}", serde_json::json!({ "purged": purged }));
            } else {
                println!("Purged {purged} deleted tasks");
            }
        }
    }

    Ok(())
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };
    init_tracing();

    if let Err(err) = run_command(cli).await {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
