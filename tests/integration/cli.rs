//! Command-line tests for the `mqtt-logger` binary
//!
//! None of these reach a broker: they cover listing runs and argument
//! validation that happens before connecting.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use super::common::fixtures::TestStore;

/// Binary with an isolated home so no user config file is picked up
fn mqtt_logger(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mqtt-logger").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_runs_lists_recorded_runs() {
    let home = TempDir::new().unwrap();
    let store = TestStore::with_runs(&[
        &[(1.0, "a/1", "x"), (2.0, "a/2", "y")],
        &[(3.0, "b/1", "z")],
    ]);

    mqtt_logger(&home)
        .arg("--database")
        .arg(&store.path)
        .arg("runs")
        .assert()
        .success()
        .stdout(predicate::str::contains("RUN"))
        .stdout(predicate::str::contains("MESSAGES"))
        .stdout(predicate::str::is_match(r"(?m)^\s+1\s.*\s2$").unwrap())
        .stdout(predicate::str::is_match(r"(?m)^\s+2\s.*\s1$").unwrap());
}

#[test]
fn test_runs_json() {
    let home = TempDir::new().unwrap();
    let store = TestStore::with_runs(&[&[(1.0, "a/1", "x")]]);

    let output = mqtt_logger(&home)
        .args(["runs", "--json", "--database"])
        .arg(&store.path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let runs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["id"], 1);
    assert_eq!(runs[0]["entries"], 1);
    assert!(runs[0]["end_unix_time"].is_number());
}

#[test]
fn test_runs_on_missing_database_fails() {
    let home = TempDir::new().unwrap();
    let store = TestStore::empty();

    mqtt_logger(&home)
        .arg("--database")
        .arg(&store.path)
        .arg("runs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open"));
}

#[test]
fn test_play_rejects_invalid_speed_before_connecting() {
    let home = TempDir::new().unwrap();
    let store = TestStore::with_runs(&[&[(1.0, "a/1", "x")]]);

    for speed in ["0", "-2"] {
        mqtt_logger(&home)
            .args(["--broker", "unreachable.invalid", "play", "--speed", speed])
            .arg("--database")
            .arg(&store.path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("speed"));
    }
}

#[test]
fn test_explicit_config_file_must_parse() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("broken.toml");
    std::fs::write(&config, "topics = 5").unwrap();

    mqtt_logger(&home)
        .arg("--config")
        .arg(&config)
        .arg("runs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn test_config_file_supplies_database_path() {
    let home = TempDir::new().unwrap();
    let store = TestStore::with_runs(&[&[(1.0, "a/1", "x")]]);
    let config = home.path().join("config.toml");
    std::fs::write(
        &config,
        format!("sqlite_database_path = {:?}\n", store.path.display().to_string()),
    )
    .unwrap();

    mqtt_logger(&home)
        .arg("--config")
        .arg(&config)
        .args(["runs", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"entries\": 1"));
}
