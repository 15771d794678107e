//! Recursive directory watching for `tg`
//!
//! This crate provides:
//! - Race-free recursive installation of per-directory kernel monitors
//! - Binary event decoding with overflow detection
//! - Quiet-period debouncing into a single activity callback
//! - The [`Watch`] orchestrator tying these to the durable root registry
//!
//! Data flow:
//!
//! ```text
//! inotify fd -> EventSource -> WatchTree::resolve -> bounded queue -> Debouncer -> callback
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod filter;
pub mod platform;
pub mod reconcile;
pub mod tree;

// Re-exports
pub use config::WatchConfig;
pub use debounce::{Callback, CallbackSlot, Debouncer};
pub use error::{Result, SourceError, WatchError};
pub use event::{EventMask, EventSource, RawEvent, ResolvedEvent, SourceEvent, WatchHandle};
pub use filter::{DefaultFilter, DirFilter, WatchAll};
pub use reconcile::{resync, ResyncReport};
pub use tree::{DirMonitor, PathState, WatchTree};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use state::{AddOutcome, InstanceLock, RootEntry, RootRegistry};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// A running watcher bound to one state directory
///
/// Holds the instance lock for as long as it lives. Two background threads
/// do the work:
/// - `tg-events` blocks on the kernel channel, resolves events and feeds
///   the queue (blocking when it is full)
/// - `tg-debounce` drains the queue and runs the callback once per burst
#[cfg(target_os = "linux")]
pub struct Watch {
    state_dir: PathBuf,
    _lock: InstanceLock,
    config: WatchConfig,
    registry: SharedRoots,
    tree: Arc<WatchTree>,
    callbacks: CallbackSlot,
    fatal: Receiver<SourceError>,
}

#[cfg(target_os = "linux")]
impl Watch {
    /// Lock `state_dir`, start the event threads and install every
    /// persisted root
    ///
    /// Fails with [`WatchError::AlreadyRunning`] before anything is watched
    /// if another process holds the lock.
    pub fn start(state_dir: &Path, config: &WatchConfig) -> Result<Self> {
        let lock = InstanceLock::acquire(state_dir)?;
        let filter = default_filter(config)?;
        Self::launch(lock, state_dir, config.clone(), filter)
    }

    /// Like [`Watch::start`], reading `<state>/config.toml` once the lock
    /// is held
    pub fn open(state_dir: &Path) -> Result<Self> {
        let lock = InstanceLock::acquire(state_dir)?;
        let config = WatchConfig::load(state_dir)?;
        let filter = default_filter(&config)?;
        Self::launch(lock, state_dir, config, filter)
    }

    /// Like [`Watch::start`] with a caller-supplied directory filter
    pub fn start_with_filter(
        state_dir: &Path,
        config: &WatchConfig,
        filter: Arc<dyn DirFilter>,
    ) -> Result<Self> {
        let lock = InstanceLock::acquire(state_dir)?;
        Self::launch(lock, state_dir, config.clone(), filter)
    }

    fn launch(
        lock: InstanceLock,
        state_dir: &Path,
        config: WatchConfig,
        filter: Arc<dyn DirFilter>,
    ) -> Result<Self> {
        let registry = RootRegistry::load(state_dir)?;

        let inotify = Arc::new(platform::linux::Inotify::init()?);
        let tree = Arc::new(WatchTree::new(inotify.clone(), filter));
        let callbacks = CallbackSlot::new();

        let (event_tx, event_rx) = bounded(config.queue_capacity.max(1));
        let (fatal_tx, fatal_rx) = bounded(1);

        let source = Arc::clone(&inotify).events();
        let reader_tree = tree.clone();
        thread::Builder::new()
            .name("tg-events".to_string())
            .spawn(move || read_loop(source, reader_tree, event_tx, fatal_tx))?;

        let debouncer = Debouncer::new(config.quiet_period(), callbacks.clone());
        thread::Builder::new()
            .name("tg-debounce".to_string())
            .spawn(move || {
                let bursts = debouncer.run(event_rx);
                debug!("dispatcher stopped after {} burst(s)", bursts);
            })?;

        let watch = Self {
            state_dir: state_dir.to_path_buf(),
            _lock: lock,
            config,
            registry: SharedRoots(Arc::new(Mutex::new(registry))),
            tree,
            callbacks,
            fatal: fatal_rx,
        };
        watch.install_persisted()?;
        Ok(watch)
    }

    /// Install every registered root; missing ones stay pending
    fn install_persisted(&self) -> Result<()> {
        let roots: Vec<PathBuf> = self.registry.0.lock().roots().map(|e| e.path.clone()).collect();

        for root in roots {
            match self.tree.install_root(&root) {
                Ok(_) => self.registry.0.lock().mark_active(&root),
                Err(WatchError::NotFound(_)) | Err(WatchError::NotADirectory(_)) => {
                    warn!("{} is not available, leaving it pending", root.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Register `path` under `label` and start watching it
    ///
    /// The registry is written before anything is installed. A missing path
    /// fails with [`WatchError::NotFound`] and leaves the registry untouched.
    pub fn add_root(&self, path: &Path, label: &str) -> Result<PathBuf> {
        let (root, outcome) = self.registry.0.lock().add(path, label)?;
        match outcome {
            AddOutcome::Added => info!("registered {} as {}", root.display(), label),
            AddOutcome::Relabeled => info!("relabeled {} as {}", root.display(), label),
            AddOutcome::Unchanged => debug!("{} already registered", root.display()),
        }

        self.tree.install_root(&root)?;
        self.registry.0.lock().mark_active(&root);
        Ok(root)
    }

    /// Unregister `path` and stop treating it as a root
    ///
    /// Its monitors are released lazily as their events arrive.
    pub fn remove_root(&self, path: &Path) -> Result<bool> {
        let removed = self.registry.0.lock().remove(path)?;
        self.tree.remove_root(path);
        Ok(removed)
    }

    /// Set (or replace) the activity callback
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.set(callback);
    }

    pub fn clear_callback(&self) {
        self.callbacks.clear();
    }

    /// Shared handle on the callback slot
    pub fn callbacks(&self) -> CallbackSlot {
        self.callbacks.clone()
    }

    /// Registered roots that have not been removed
    pub fn roots(&self) -> Vec<RootEntry> {
        self.registry.entries()
    }

    /// Live view of the registered roots, for use inside a callback
    pub fn shared_roots(&self) -> SharedRoots {
        self.registry.clone()
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Directories currently watched, sorted
    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.tree.active_paths()
    }

    pub fn tree(&self) -> &Arc<WatchTree> {
        &self.tree
    }

    /// Receives at most one error: the event channel failed and no further
    /// activity will be reported
    pub fn fatal_errors(&self) -> &Receiver<SourceError> {
        &self.fatal
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

/// Cloneable view of a [`Watch`]'s root registry
///
/// Reflects roots added or removed after it was taken.
#[derive(Clone)]
pub struct SharedRoots(Arc<Mutex<RootRegistry>>);

impl SharedRoots {
    /// Registered roots that have not been removed
    pub fn entries(&self) -> Vec<RootEntry> {
        self.0.lock().roots().cloned().collect()
    }
}

fn default_filter(config: &WatchConfig) -> Result<Arc<dyn DirFilter>> {
    let filter = DefaultFilter::from_config(config)?;
    debug!("directory filter with {} rule source(s)", filter.active_sources());
    Ok(Arc::new(filter))
}

/// Body of the `tg-events` thread
fn read_loop<R: Read>(
    source: EventSource<R>,
    tree: Arc<WatchTree>,
    events: Sender<ResolvedEvent>,
    fatal: Sender<SourceError>,
) {
    for item in source {
        match item {
            Ok(SourceEvent::Raw(raw)) => {
                if let Some(event) = tree.resolve(&raw) {
                    // Blocks while the queue is full
                    if events.send(event).is_err() {
                        debug!("dispatcher gone, stopping reader");
                        return;
                    }
                }
            }
            Ok(SourceEvent::OverflowResync) => {
                warn!("kernel event queue overflowed, rescanning all roots");
                resync(&tree);
            }
            Err(e) => {
                error!("{}", e);
                if fatal.send(e).is_err() {
                    debug!("nobody listening for fatal errors");
                }
                return;
            }
        }
    }
    debug!("notification channel closed");
}
