//! End-to-end tests for the `tg` binary

mod common;

use common::TgCommand;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_tick_writes_sidecar() {
    let state = TempDir::new().unwrap();

    let result = TgCommand::new(state.path()).args(&["tick", "alpha"]).execute();
    result.assert_success();
    assert!(result.stdout().contains("Started working on alpha"));

    let raw = fs::read_to_string(state.path().join("tick")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["project_name"], "alpha");
    assert!(json["tick"].as_str().unwrap().ends_with('Z'));

    let again = TgCommand::new(state.path()).args(&["tick", "beta"]).execute();
    again.assert_success();
    assert!(again.stdout().contains("Switched from alpha to beta"));
}

#[test]
fn test_status_on_fresh_state() {
    let state = TempDir::new().unwrap();

    let result = TgCommand::new(state.path()).args(&["status"]).execute();
    result.assert_success();
    let stdout = result.stdout();
    assert!(stdout.contains("Not running"));
    assert!(stdout.contains("No ticks yet"));
    assert!(stdout.contains("None registered"));
}

#[test]
fn test_watch_missing_directory_fails_cleanly() {
    let state = TempDir::new().unwrap();
    let missing = state.path().join("does-not-exist");

    let result = TgCommand::new(state.path())
        .args(&["watch", "alpha", missing.to_str().unwrap()])
        .execute();

    assert!(!result.success());
    assert!(result.stderr().contains("path not found"));
    assert!(!state.path().join("watch").exists());
}

#[test]
fn test_resume_without_roots_fails() {
    let state = TempDir::new().unwrap();

    let result = TgCommand::new(state.path()).args(&["resume"]).execute();
    assert!(!result.success());
    assert!(result.stderr().contains("No directories registered"));
}

#[test]
fn test_second_watcher_is_refused() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let mut first = TgCommand::new(state.path())
        .args(&["watch", "alpha", work.path().to_str().unwrap()])
        .spawn();

    // The registry is written only after the lock is taken
    let deadline = Instant::now() + Duration::from_secs(10);
    while !state.path().join("watch").exists() {
        assert!(Instant::now() < deadline, "watcher never started");
        thread::sleep(Duration::from_millis(100));
    }

    // Unreadable config must not mask the lock
    fs::write(state.path().join("config.toml"), "quiet_period_ms = [").unwrap();
    let second = TgCommand::new(state.path()).args(&["resume"]).execute();
    let status = TgCommand::new(state.path()).args(&["status"]).execute();

    first.kill().unwrap();
    first.wait().unwrap();

    assert!(!second.success());
    assert!(second.stderr().contains("already running"));
    assert!(status.stdout().contains("Running"));

    let registry: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(state.path().join("watch")).unwrap()).unwrap();
    let root = fs::canonicalize(work.path()).unwrap();
    assert_eq!(registry[root.to_str().unwrap()], "alpha");
}
