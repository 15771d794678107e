//! Durable state for the `tg` watcher
//!
//! This crate provides:
//! - Root registry (`watch` file: root path -> project label)
//! - Instance lock (one live watcher per state directory)
//! - Tracking sidecar (`tick` file consumed by the time tracker)
//! - Atomic whole-file replacement used by all of the above

pub mod lock;
pub mod registry;
pub mod status;

// Re-exports
pub use lock::InstanceLock;
pub use registry::{AddOutcome, RootEntry, RootRegistry, RootState};
pub use status::{Status, TickOutcome};

use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors raised while reading or writing the state directory
#[derive(Debug, Error)]
pub enum StateError {
    /// Another process holds the instance lock
    #[error("another watch process is already running")]
    AlreadyRunning,

    /// Acquiring the instance lock failed for a reason other than contention
    #[error("error locking {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A root path does not exist
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// A root path exists but is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A state file could not be parsed
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Replace `path` with `contents` in one step
///
/// The data is written to a temporary file in the same directory, synced,
/// and renamed over `path`, so readers see either the old or the new file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
    Ok(())
}
