use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("tasksync-{nanos}-{name}"))
}

fn run(config_path: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tasksync"))
        .args(args)
        .env_remove("TASKSYNC_DATA_DIR")
        .env_remove("TASKSYNC_REMOTE_PATH")
        .env("TASKSYNC_CONFIG_PATH", config_path)
        .output()
        .expect("failed to run tasksync")
}

#[test]
fn config_file_selects_data_dir_and_owner() {
    let root = temp_path("cli-config");
    let data_dir = root.join("data");
    let config_path = root.join("config.json");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(
        &config_path,
        serde_json::json!({ "data_dir": data_dir, "owner_id": "alice" }).to_string(),
    )
    .unwrap();

    let output = run(&config_path, &["add", "from config", "--json"]);
    let exists = data_dir.join("tasks.json").exists();

    std::fs::remove_dir_all(&root).ok();
    assert!(output.status.success());
    let task: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(task["owner_id"], "alice");
    assert!(exists);
}

#[test]
fn config_override_wins_over_file() {
    let root = temp_path("cli-config-override");
    let data_dir = root.join("data");
    let config_path = root.join("config.json");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(
        &config_path,
        serde_json::json!({ "data_dir": data_dir, "owner_id": "alice" }).to_string(),
    )
    .unwrap();

    let output = run(
        &config_path,
        &["add", "override", "--json", "--config-override", "owner=bob"],
    );

    std::fs::remove_dir_all(&root).ok();
    let task: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(task["owner_id"], "bob");
}

#[test]
fn invalid_override_is_rejected() {
    let root = temp_path("cli-config-bad");
    let config_path = root.join("config.json");
    let output = run(
        &config_path,
        &["list", "all", "--config-override", "batch_size=lots"],
    );

    std::fs::remove_dir_all(&root).ok();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: invalid_input - batch_size must be a number"));
}
