//! Tracking sidecar: the last moment work was observed, and on what
//!
//! Stored in `<state>/tick` as
//! `{"tick": "<RFC3339>", "project_name": "...", "project_id": "..."}`.
//! The watcher core never reads or writes this file; the CLI updates it
//! from the activity callback and from `tg tick`.

use crate::{write_atomic, Result, StateError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the sidecar file inside the state directory
pub const TICK_FILE_NAME: &str = "tick";

/// If the previous tick is older than this many minutes, the previous
/// session is over
pub const MAX_TICK_GAP_MINUTES: i64 = 24;

/// Latest observed work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Last time work was registered
    pub tick: DateTime<Utc>,
    /// Project the last tick belonged to
    pub project_name: String,
    /// Remote id of that project (empty until the tracker resolves it)
    #[serde(default)]
    pub project_id: String,
}

/// What a tick did to the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No previous tick existed
    Started,
    /// The previous tick was recent; the session continues
    Continued,
    /// The previous session ended at `previous_end` and a new one began
    Restarted { previous_end: DateTime<Utc> },
    /// Work moved to a different project
    Switched { previous_project: String },
}

impl Status {
    /// Read `<state>/tick`; `None` if it does not exist yet
    pub fn load(state_dir: &Path) -> Result<Option<Self>> {
        let path = state_dir.join(TICK_FILE_NAME);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let status = serde_json::from_slice(&bytes)
            .map_err(|source| StateError::Parse { path, source })?;
        Ok(Some(status))
    }

    /// Replace `<state>/tick` with this status
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let serialized = serde_json::to_vec(self)?;
        write_atomic(&state_dir.join(TICK_FILE_NAME), &serialized)
    }

    /// Record work on `project_name` at `now` and persist it
    pub fn tick(state_dir: &Path, project_name: &str, now: DateTime<Utc>) -> Result<TickOutcome> {
        let previous = Self::load(state_dir)?;

        let (outcome, project_id) = match &previous {
            None => (TickOutcome::Started, String::new()),
            Some(prev) if now.signed_duration_since(prev.tick) > Duration::minutes(MAX_TICK_GAP_MINUTES) => (
                TickOutcome::Restarted {
                    previous_end: prev.tick,
                },
                id_if_same(prev, project_name),
            ),
            Some(prev) if prev.project_name != project_name => (
                TickOutcome::Switched {
                    previous_project: prev.project_name.clone(),
                },
                String::new(),
            ),
            Some(prev) => (TickOutcome::Continued, prev.project_id.clone()),
        };

        let status = Status {
            tick: now,
            project_name: project_name.to_string(),
            project_id,
        };
        status.save(state_dir)?;

        tracing::debug!("tick {} -> {:?}", project_name, outcome);
        Ok(outcome)
    }
}

fn id_if_same(prev: &Status, project_name: &str) -> String {
    if prev.project_name == project_name {
        prev.project_id.clone()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap()
    }

    #[test]
    fn test_load_missing() {
        let state = TempDir::new().unwrap();
        assert_eq!(Status::load(state.path()).unwrap(), None);
    }

    #[test]
    fn test_file_format() {
        let state = TempDir::new().unwrap();
        let status = Status {
            tick: at(5),
            project_name: "proj".to_string(),
            project_id: "42".to_string(),
        };
        status.save(state.path()).unwrap();

        let raw = std::fs::read_to_string(state.path().join(TICK_FILE_NAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["tick"], "2024-03-01T09:05:00Z");
        assert_eq!(value["project_name"], "proj");
        assert_eq!(value["project_id"], "42");

        assert_eq!(Status::load(state.path()).unwrap(), Some(status));
    }

    #[test]
    fn test_tick_sequence() {
        let state = TempDir::new().unwrap();
        let dir = state.path();

        assert_eq!(Status::tick(dir, "proj", at(0)).unwrap(), TickOutcome::Started);
        assert_eq!(Status::tick(dir, "proj", at(10)).unwrap(), TickOutcome::Continued);
        assert_eq!(
            Status::tick(dir, "proj", at(40)).unwrap(),
            TickOutcome::Restarted { previous_end: at(10) }
        );
        assert_eq!(
            Status::tick(dir, "other", at(41)).unwrap(),
            TickOutcome::Switched {
                previous_project: "proj".to_string()
            }
        );

        let status = Status::load(dir).unwrap().unwrap();
        assert_eq!(status.tick, at(41));
        assert_eq!(status.project_name, "other");
    }

    #[test]
    fn test_tick_keeps_project_id() {
        let state = TempDir::new().unwrap();
        let dir = state.path();
        Status {
            tick: at(0),
            project_name: "proj".to_string(),
            project_id: "7".to_string(),
        }
        .save(dir)
        .unwrap();

        Status::tick(dir, "proj", at(1)).unwrap();
        assert_eq!(Status::load(dir).unwrap().unwrap().project_id, "7");
    }
}
