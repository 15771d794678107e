//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use state::{RootEntry, RootState, TickOutcome};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

/// Environment variable overriding the state directory
pub const STATE_DIR_ENV: &str = "TOGGL_WATCHER_DIRECTORY";

/// Name of the state directory under $HOME
pub const DEFAULT_STATE_DIR: &str = ".toggle-tool";

/// Log file written by `--log-file`
pub const LOG_FILE_NAME: &str = "watch.log";

/// Pick the state directory: flag, then environment, then ~/.toggle-tool
pub fn state_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    resolve_state_dir(flag, std::env::var_os(STATE_DIR_ENV).map(PathBuf::from), dirs::home_dir())
}

fn resolve_state_dir(
    flag: Option<PathBuf>,
    env: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(dir) = flag.or(env).filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir);
    }
    let home = home.context("Could not determine the home directory; set TOGGL_WATCHER_DIRECTORY")?;
    Ok(home.join(DEFAULT_STATE_DIR))
}

/// Initialize logging
///
/// Level follows `-v`: info by default, debug with one, trace with two.
/// With `log_dir`, output goes to `<log_dir>/watch.log` through a
/// background writer; the returned guard must outlive the program.
pub fn init_tracing(verbose: u8, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Project name reported for activity: labels of the active roots
///
/// Several distinct labels are joined with `,`.
pub fn activity_label(roots: &[RootEntry]) -> String {
    let mut labels: Vec<&str> = roots
        .iter()
        .filter(|r| r.state == RootState::Active)
        .map(|r| r.label.as_str())
        .collect();
    labels.sort_unstable();
    labels.dedup();
    labels.join(",")
}

/// One-line, human readable summary of a tick
pub fn describe_tick(project: &str, outcome: &TickOutcome) -> String {
    match outcome {
        TickOutcome::Started => format!("Started working on {}", project),
        TickOutcome::Continued => format!("Still working on {}", project),
        TickOutcome::Restarted { previous_end } => format!(
            "Previous session ended {}; started a new one on {}",
            format_relative_time(*previous_end),
            project
        ),
        TickOutcome::Switched { previous_project } => {
            format!("Switched from {} to {}", previous_project, project)
        }
    }
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    format_relative_to(ts, Utc::now())
}

fn format_relative_to(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(ts).num_seconds();

    if secs < 0 {
        "in the future".to_string()
    } else if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86400)
    }
}
