use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "TASKSYNC_CONFIG_PATH";

fn default_batch_size() -> usize {
    32
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_wake_interval_ms() -> u64 {
    30_000
}

fn default_tombstone_retention_days() -> u32 {
    30
}

fn default_connectivity_debounce_ms() -> u64 {
    750
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub remote_path: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_wake_interval_ms")]
    pub wake_interval_ms: u64,
    #[serde(default = "default_tombstone_retention_days")]
    pub tombstone_retention_days: u32,
    #[serde(default = "default_connectivity_debounce_ms")]
    pub connectivity_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            owner_id: None,
            remote_path: None,
            batch_size: default_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            wake_interval_ms: default_wake_interval_ms(),
            tombstone_retention_days: default_tombstone_retention_days(),
            connectivity_debounce_ms: default_connectivity_debounce_ms(),
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms.max(1))
    }

    pub fn connectivity_debounce(&self) -> Duration {
        Duration::from_millis(self.connectivity_debounce_ms)
    }

    pub fn tombstone_retention(&self) -> time::Duration {
        time::Duration::days(i64::from(self.tombstone_retention_days))
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: SyncConfig,
    pub error: Option<AppError>,
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub owner_id: Option<String>,
    pub remote_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    pub tombstone_retention_days: Option<u32>,
}

impl ConfigOverrides {
    /// Applies one `KEY=VALUE` pair.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        let value = value.trim();
        match canonical_key(key).as_str() {
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            "owner_id" | "owner" => self.owner_id = Some(value.to_string()),
            "remote_path" | "remote" => self.remote_path = Some(PathBuf::from(value)),
            "batch_size" => self.batch_size = Some(parse_number(key, value)?),
            "request_timeout_ms" => self.request_timeout_ms = Some(parse_number(key, value)?),
            "tombstone_retention_days" => {
                self.tombstone_retention_days = Some(parse_number(key, value)?)
            }
            "" => return Err(AppError::invalid_input("override key cannot be empty")),
            other => {
                return Err(AppError::invalid_input(format!(
                    "unknown config field '{other}'"
                )));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|_| AppError::invalid_input(format!("{} must be a number", key.trim())))
}

fn canonical_key(raw: &str) -> String {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    cleaned.trim_matches('_').to_string()
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("tasksync")
            .join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("tasksync")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config() -> Result<SyncConfig, AppError> {
    let path = config_path()?;
    load_config_from_path(&path)
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: SyncConfig::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: SyncConfig::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: SyncConfig::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<SyncConfig, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::store_unavailable(format!("{}: {}", path.display(), err)))?;
    let config: SyncConfig = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    if config.batch_size == 0 {
        return Err(AppError::invalid_data("batch_size must be at least 1"));
    }
    Ok(config)
}

pub fn merge_overrides(base: &SyncConfig, overrides: &ConfigOverrides) -> SyncConfig {
    let mut merged = base.clone();
    if let Some(data_dir) = overrides.data_dir.as_ref() {
        merged.data_dir = Some(data_dir.clone());
    }
    if let Some(owner_id) = overrides.owner_id.as_ref() {
        merged.owner_id = Some(owner_id.clone());
    }
    if let Some(remote_path) = overrides.remote_path.as_ref() {
        merged.remote_path = Some(remote_path.clone());
    }
    if let Some(batch_size) = overrides.batch_size {
        merged.batch_size = batch_size.max(1);
    }
    if let Some(timeout) = overrides.request_timeout_ms {
        merged.request_timeout_ms = timeout;
    }
    if let Some(days) = overrides.tombstone_retention_days {
        merged.tombstone_retention_days = days;
    }
    merged
}
