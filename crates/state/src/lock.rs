//! Instance lock: at most one live watcher per state directory

use crate::{Result, StateError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the sentinel file inside the state directory
pub const LOCK_FILE_NAME: &str = "watch.lock";

/// Exclusive advisory lock on `<state>/watch.lock`
///
/// The lock lives as long as this value. The sentinel file itself stays on
/// disk and is always zero-length; only the `flock` matters.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

impl InstanceLock {
    /// Acquire the lock without blocking
    ///
    /// Returns:
    /// - `StateError::AlreadyRunning` if another process holds it
    /// - `StateError::Lock` for any other failure
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(LOCK_FILE_NAME);

        std::fs::create_dir_all(state_dir).map_err(|source| StateError::Lock {
            path: path.clone(),
            source,
        })?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| StateError::Lock {
                path: path.clone(),
                source,
            })?;

        if !try_flock_exclusive(&file, &path)? {
            return Err(StateError::AlreadyRunning);
        }

        tracing::debug!("acquired instance lock at {}", path.display());
        Ok(Self { path, file })
    }

    /// Location of the sentinel file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Try to take an exclusive lock; `Ok(false)` means another holder exists
#[cfg(unix)]
fn try_flock_exclusive(file: &File, path: &Path) -> Result<bool> {
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    loop {
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(Errno::EWOULDBLOCK) => return Ok(false),
            Err(e) => {
                return Err(StateError::Lock {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(e),
                })
            }
        }
    }
}
