//! Shared fixture for the inotify integration tests

use crossbeam_channel::{unbounded, Receiver};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use watcher::{Watch, WatchConfig};

/// Quiet period used by every integration test
pub const QUIET: Duration = Duration::from_millis(300);

/// A running watch over one fresh root
pub struct Harness {
    pub root: PathBuf,
    pub watch: Watch,
    notifications: Receiver<()>,
    _work: TempDir,
    _state: TempDir,
}

impl Harness {
    pub fn start(label: &str) -> Self {
        let state = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let config = WatchConfig {
            quiet_period_ms: QUIET.as_millis() as u64,
            ..WatchConfig::default()
        };

        let watch = Watch::start(state.path(), &config).unwrap();
        let root = watch.add_root(work.path(), label).unwrap();

        let (tx, notifications) = unbounded();
        watch.set_callback(move || {
            let _ = tx.send(());
        });

        Self {
            root,
            watch,
            notifications,
            _work: work,
            _state: state,
        }
    }

    /// Wait out the current burst and count the notifications it produced
    pub fn settle(&self) -> usize {
        thread::sleep(QUIET * 4);
        self.notifications.try_iter().count()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.watch.state_dir().to_path_buf()
    }
}
