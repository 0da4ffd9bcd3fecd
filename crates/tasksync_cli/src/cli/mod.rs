use clap::{Parser, Subcommand};
use tasksync_core::config::ConfigOverrides;
use tasksync_core::error::AppError;
use tasksync_core::model::{Priority, Timestamp};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Offline-first task list with background sync",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task
    ///
    /// Example: tasksync add "Buy milk" --priority high --due 2026-01-05T09:00:00Z
    Add {
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_name = "RFC3339")]
        due: Option<String>,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Edit a task's title, description or priority
    ///
    /// Example: tasksync edit task-1 --title "Buy oat milk"
    /// Example: tasksync edit task-1 --clear-description
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long)]
        clear_description: bool,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Mark a task as completed
    ///
    /// Example: tasksync done task-1
    Done { id: String },
    /// Mark a completed task as open again
    ///
    /// Example: tasksync reopen task-1
    Reopen { id: String },
    /// Delete a task
    ///
    /// Example: tasksync delete task-1
    Delete { id: String },
    /// Move a task to a new position in the list
    ///
    /// Example: tasksync reorder task-1 -3
    Reorder {
        id: String,
        #[arg(allow_hyphen_values = true)]
        position: i64,
    },
    /// Set or clear a task's due time
    ///
    /// Example: tasksync due task-1 2026-01-05T09:00:00Z
    /// Example: tasksync due task-1 --clear
    Due {
        id: String,
        #[arg(value_name = "RFC3339", required_unless_present = "clear")]
        datetime: Option<String>,
        #[arg(long, conflicts_with = "datetime")]
        clear: bool,
    },
    /// Show details of a task
    ///
    /// Example: tasksync show task-1
    Show { id: String },
    /// List tasks
    ///
    /// Example: tasksync list today
    /// Example: tasksync list completed
    List {
        #[command(subcommand)]
        list: ListCommand,
    },
    /// Show queued changes, conflicts and the last sync error
    Status,
    /// Send queued changes to the remote store and pull remote changes
    Sync,
    /// Purge old deleted tasks that the remote store already has
    Gc,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListCommand {
    /// Open tasks due by the end of today, overdue included
    Today,
    /// Open tasks due after today, plus undated ones
    Upcoming,
    /// Completed tasks
    Completed,
    /// Every task that is not deleted
    All,
}

/// Splits a raw `KEY=VALUE` override.
pub fn parse_config_override(raw: &str) -> Result<(String, String), AppError> {
    let (key, value) = raw
        .trim()
        .split_once('=')
        .ok_or_else(|| AppError::invalid_input("override must be in KEY=VALUE format"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

pub fn build_overrides(raw: &[String]) -> Result<ConfigOverrides, AppError> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let (key, value) = parse_config_override(entry)?;
        overrides.set(&key, &value)?;
    }
    Ok(overrides)
}

pub fn parse_priority(raw: &str) -> Result<Priority, AppError> {
    Priority::parse(raw)
        .ok_or_else(|| AppError::invalid_input("priority must be low, medium or high"))
}

pub fn parse_due(raw: &str) -> Result<Timestamp, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("datetime is required"));
    }
    Timestamp::parse(trimmed).map_err(|_| AppError::invalid_input("datetime must be RFC3339"))
}
