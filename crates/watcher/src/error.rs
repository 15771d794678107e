//! Error types for the watcher

use state::StateError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors returned to callers of [`crate::Watch`] and [`crate::WatchTree`]
#[derive(Debug, Error)]
pub enum WatchError {
    /// Root path absent at install time; nothing was added
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Another process holds the state directory's lock
    #[error("another watch process is already running")]
    AlreadyRunning,

    /// Registering a monitor failed (e.g. the kernel watch limit was reached)
    #[error("could not add watch for {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] ignore::Error),

    #[error("invalid config file: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    State(StateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StateError> for WatchError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(path) => WatchError::NotFound(path),
            StateError::NotADirectory(path) => WatchError::NotADirectory(path),
            StateError::AlreadyRunning => WatchError::AlreadyRunning,
            other => WatchError::State(other),
        }
    }
}

/// Failure of the notification channel itself
///
/// The read loop cannot continue after one of these; it is reported once to
/// the owner of the [`crate::Watch`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not initialize inotify: {0}")]
    Init(#[source] std::io::Error),

    #[error("inotify read error: {0}")]
    Read(#[source] std::io::Error),
}
