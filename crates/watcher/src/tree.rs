//! Watch tree: the path <-> handle index and race-safe installation
//!
//! Every directory below an active root gets one kernel monitor. The index
//! keeps two maps in lockstep under a single mutex:
//! - `by_path`: directory -> node (handle + lifecycle state)
//! - `by_handle`: handle -> directory, used to resolve raw events
//!
//! Installation follows install-then-rescan: register the monitor first,
//! then list the directory, install unknown children, and list again until
//! nothing new shows up. A child created between registration and listing
//! is either in the listing or announced by a Create event on the parent's
//! (already live) monitor. Both paths converge on `install_dir`, which is
//! idempotent per path: a second caller waits for the first to converge
//! instead of returning early.
//!
//! The mutex is never held across a syscall.

use crate::error::{Result, WatchError};
use crate::event::{EventMask, RawEvent, ResolvedEvent, WatchHandle};
use crate::filter::DirFilter;
use parking_lot::{Condvar, Mutex};
use state::registry::canonical_dir;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Registers and removes kernel monitors for single directories
pub trait DirMonitor: Send + Sync {
    /// Start monitoring `dir`; the same directory yields the same handle
    fn watch(&self, dir: &Path) -> io::Result<WatchHandle>;

    /// Stop monitoring; errors for handles the kernel already dropped
    fn unwatch(&self, handle: WatchHandle) -> io::Result<()>;
}

/// Lifecycle of one watched path
///
/// `SettingUp -> Active -> Retired`. Retired is terminal: a retired path is
/// dropped from the index, and a path retired while still being set up is
/// discarded by its installer instead of being promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    /// Monitor requested, rescan loop not converged yet
    SettingUp,
    /// Monitored and fully scanned
    Active,
    /// Deleted or moved away while being set up
    Retired,
}

#[derive(Debug)]
struct Node {
    handle: Option<WatchHandle>,
    state: PathState,
    /// Bumped on every claim; an installer only touches its own generation
    gen: u64,
    /// Thread running the installer for this generation
    owner: ThreadId,
}

enum Bind {
    Bound { replaced: Option<WatchHandle> },
    /// The path was retired during setup; release the handle if set
    Abandoned { release: Option<WatchHandle> },
}

/// Outcome of trying to claim a path for installation
enum Claim {
    /// Ours to install under this generation
    Claimed(u64),
    /// Already fully installed
    Active,
    /// Being set up further up this thread's own stack
    Reentrant,
}

#[derive(Debug, Default)]
struct Index {
    by_path: HashMap<PathBuf, Node>,
    by_handle: HashMap<WatchHandle, PathBuf>,
    roots: BTreeSet<PathBuf>,
    next_gen: u64,
}

impl Index {
    /// Reserve `dir` for installation by `owner`
    ///
    /// An unknown or retired path gets a fresh `SettingUp` node, which
    /// supersedes any installer still holding the retired generation.
    fn claim(&mut self, dir: &Path, owner: ThreadId) -> u64 {
        self.next_gen += 1;
        let gen = self.next_gen;
        self.by_path.insert(
            dir.to_path_buf(),
            Node {
                handle: None,
                state: PathState::SettingUp,
                gen,
                owner,
            },
        );
        gen
    }

    /// Drop a claim whose monitor could not be registered
    fn forget(&mut self, dir: &Path, gen: u64) {
        if !self.by_path.get(dir).is_some_and(|n| n.gen == gen) {
            return;
        }
        if let Some(node) = self.by_path.remove(dir) {
            if let Some(handle) = node.handle {
                self.unmap_handle(handle, dir);
            }
        }
    }

    /// Attach `handle` to `dir`
    ///
    /// With `gen`, only that generation's node is bound. Without it, any
    /// live node is.
    fn bind(&mut self, dir: &Path, gen: Option<u64>, handle: WatchHandle) -> Bind {
        let live = self.by_path.get(dir).is_some_and(|n| {
            n.state != PathState::Retired && gen.map_or(true, |g| g == n.gen)
        });
        if !live {
            let ours_retired = self
                .by_path
                .get(dir)
                .is_some_and(|n| n.state == PathState::Retired && Some(n.gen) == gen);
            if ours_retired {
                self.by_path.remove(dir);
            }
            // Another path may own this handle (same directory, new name)
            let release = (!self.by_handle.contains_key(&handle)).then_some(handle);
            return Bind::Abandoned { release };
        }

        // Same directory known under an old name: it was moved here
        if let Some(old) = self.by_handle.get(&handle).cloned() {
            if old != dir {
                debug!("{} now reachable as {}", old.display(), dir.display());
                self.retire_path(&old);
            }
        }

        let replaced = match self.by_path.get_mut(dir) {
            Some(node) => node.handle.replace(handle).filter(|prev| *prev != handle),
            None => None,
        };
        if let Some(prev) = replaced {
            self.unmap_handle(prev, dir);
        }
        self.by_handle.insert(handle, dir.to_path_buf());
        Bind::Bound { replaced }
    }

    /// Installer of `gen` finished; false if the path was retired or
    /// claimed again meanwhile
    fn activate(&mut self, dir: &Path, gen: u64) -> bool {
        let state = match self.by_path.get(dir) {
            Some(node) if node.gen == gen => node.state,
            _ => return false,
        };
        match state {
            PathState::SettingUp => {
                if let Some(node) = self.by_path.get_mut(dir) {
                    node.state = PathState::Active;
                }
                true
            }
            PathState::Retired => {
                self.by_path.remove(dir);
                false
            }
            PathState::Active => true,
        }
    }

    /// Remove `path` from both maps, returning its handle
    ///
    /// A path still being set up stays in `by_path` as `Retired` so its
    /// installer can see what happened.
    fn retire_path(&mut self, path: &Path) -> Option<WatchHandle> {
        let (handle, active) = {
            let node = self.by_path.get_mut(path)?;
            let active = node.state == PathState::Active;
            if !active {
                node.state = PathState::Retired;
            }
            (node.handle.take(), active)
        };
        if active {
            self.by_path.remove(path);
        }
        if let Some(handle) = handle {
            self.unmap_handle(handle, path);
        }
        handle
    }

    fn retire_subtree(&mut self, prefix: &Path) -> Vec<WatchHandle> {
        let paths: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        paths.iter().filter_map(|p| self.retire_path(p)).collect()
    }

    fn unmap_handle(&mut self, handle: WatchHandle, path: &Path) {
        if self.by_handle.get(&handle).is_some_and(|p| p == path) {
            self.by_handle.remove(&handle);
        }
    }

    /// Path lies under an active root
    fn owned(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Path is known and not retired (and, with `gen`, not claimed again)
    fn is_live(&self, path: &Path, gen: Option<u64>) -> bool {
        self.by_path.get(path).is_some_and(|n| {
            n.state != PathState::Retired && gen.map_or(true, |g| g == n.gen)
        })
    }
}

/// Recursive directory monitor index
pub struct WatchTree {
    monitor: Arc<dyn DirMonitor>,
    filter: Arc<dyn DirFilter>,
    index: Mutex<Index>,
    /// Signalled whenever a node leaves `SettingUp`
    settled: Condvar,
}

impl WatchTree {
    pub fn new(monitor: Arc<dyn DirMonitor>, filter: Arc<dyn DirFilter>) -> Self {
        Self {
            monitor,
            filter,
            index: Mutex::new(Index::default()),
            settled: Condvar::new(),
        }
    }

    /// Watch `path` and every directory below it
    ///
    /// Returns the canonical root path. When this returns `Ok`, every
    /// directory that existed under the root (and was not filtered) is
    /// `Active`. The root itself is never passed to the filter.
    ///
    /// Installing a root that is already active rescans its whole subtree.
    pub fn install_root(&self, path: &Path) -> Result<PathBuf> {
        let root = canonical_dir(path)?;

        let (newly_added, active) = {
            let mut index = self.index.lock();
            let newly_added = index.roots.insert(root.clone());
            let active = index.by_path.get(&root).is_some_and(|n| n.state == PathState::Active);
            (newly_added, active)
        };

        let installed = if active {
            self.rescan(&root)
        } else {
            self.install_dir(&root, true)
        };

        if let Err(e) = installed {
            if newly_added {
                self.remove_root(&root);
                let handles = {
                    let mut index = self.index.lock();
                    if index.owned(&root) {
                        // Still covered by an enclosing root
                        Vec::new()
                    } else {
                        index.retire_subtree(&root)
                    }
                };
                self.settled.notify_all();
                self.release_all(handles);
            }
            return Err(e);
        }

        info!("watching {}", root.display());
        Ok(root)
    }

    /// Stop treating `path` as a root
    ///
    /// No bulk teardown happens here: monitors below the root are retired
    /// one by one as their next event arrives (see [`Self::resolve`]).
    pub fn remove_root(&self, path: &Path) -> bool {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let removed = self.index.lock().roots.remove(&key);
        if removed {
            info!("stopped watching {}", key.display());
        }
        removed
    }

    /// Map a raw event to a path, updating the index on the way
    ///
    /// - Create/MovedTo of a directory installs it (and its subtree) before
    ///   returning, so nothing created inside it can be missed
    /// - MovedFrom of a directory retires its whole subtree
    /// - Delete-self, move-self and handle-removed notices retire the handle
    ///   and are not forwarded
    ///
    /// Returns `None` for events that carry no activity, reference an
    /// unknown or retired handle, or fall outside every active root.
    pub fn resolve(&self, raw: &RawEvent) -> Option<ResolvedEvent> {
        let (path, owned) = {
            let index = self.index.lock();
            let dir = match index.by_handle.get(&raw.handle) {
                Some(dir) => dir,
                None => {
                    debug!("discarding {:?} for unknown {:?}", raw.mask, raw.handle);
                    return None;
                }
            };
            let path = match raw.name {
                Some(ref name) => dir.join(name),
                None => dir.clone(),
            };
            let owned = index.owned(&path);
            (path, owned)
        };

        let mask = raw.mask;

        if !owned {
            // Root was removed; let this monitor go
            if let Some(dir) = self.retire(raw.handle, true) {
                debug!("retired {} (no active root)", dir.display());
            }
            return None;
        }

        if mask.contains(EventMask::MOVE_SELF) {
            // Bulk policy: the whole subtree leaves with its top directory
            let handles = self.index.lock().retire_subtree(&path);
            self.settled.notify_all();
            debug!("{} moved away, retired {} handle(s)", path.display(), handles.len());
            self.release_all(handles);
            return None;
        }

        if mask.intersects(EventMask::RETIRING) {
            if let Some(dir) = self.retire(raw.handle, false) {
                debug!("retired {} ({:?})", dir.display(), mask);
            }
            return None;
        }

        if mask.contains(EventMask::IS_DIR) {
            if mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
                if self.filter.skip(&path) {
                    debug!("skipping {}", path.display());
                } else if let Err(e) = self.install_dir(&path, false) {
                    warn!("could not watch new directory {}: {}", path.display(), e);
                }
            } else if mask.contains(EventMask::MOVED_FROM) {
                let handles = self.index.lock().retire_subtree(&path);
                self.settled.notify_all();
                self.release_all(handles);
            } else if mask.contains(EventMask::DELETE) {
                // The kernel already dropped these monitors
                self.index.lock().retire_subtree(&path);
                self.settled.notify_all();
            }
        }

        if !mask.intersects(EventMask::CONTENT) {
            return None;
        }

        Some(ResolvedEvent { path, mask })
    }

    /// Retire one handle; idempotent
    pub fn retire(&self, handle: WatchHandle, release: bool) -> Option<PathBuf> {
        let (path, taken) = {
            let mut index = self.index.lock();
            let path = index.by_handle.get(&handle)?.clone();
            let taken = index.retire_path(&path);
            (path, taken)
        };
        self.settled.notify_all();
        if release {
            self.release_all(taken);
        }
        Some(path)
    }

    /// Directories that are fully installed, sorted
    pub fn active_paths(&self) -> Vec<PathBuf> {
        let index = self.index.lock();
        let mut paths: Vec<PathBuf> = index
            .by_path
            .iter()
            .filter(|(_, node)| node.state == PathState::Active)
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn state(&self, path: &Path) -> Option<PathState> {
        self.index.lock().by_path.get(path).map(|n| n.state)
    }

    pub fn handle_of(&self, path: &Path) -> Option<WatchHandle> {
        self.index.lock().by_path.get(path).and_then(|n| n.handle)
    }

    pub fn path_of(&self, handle: WatchHandle) -> Option<PathBuf> {
        self.index.lock().by_handle.get(&handle).cloned()
    }

    /// Active roots, sorted
    pub fn roots(&self) -> Vec<PathBuf> {
        self.index.lock().roots.iter().cloned().collect()
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.index.lock().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that the two maps agree with each other
    ///
    /// - every handle maps to a path whose node holds that handle
    /// - every node with a handle is reachable from that handle
    /// - active nodes have a handle, retired nodes do not
    pub fn is_consistent(&self) -> bool {
        let index = self.index.lock();

        let forward = index.by_handle.iter().all(|(handle, path)| {
            index
                .by_path
                .get(path)
                .is_some_and(|node| node.handle == Some(*handle))
        });

        let backward = index.by_path.iter().all(|(path, node)| {
            let linked = match node.handle {
                Some(handle) => index.by_handle.get(&handle) == Some(path),
                None => true,
            };
            let shaped = match node.state {
                PathState::Active => node.handle.is_some(),
                PathState::Retired => node.handle.is_none(),
                PathState::SettingUp => true,
            };
            linked && shaped
        });

        forward && backward
    }

    /// Known paths under `prefix` (any state)
    pub(crate) fn paths_under(&self, prefix: &Path) -> Vec<PathBuf> {
        let index = self.index.lock();
        let mut paths: Vec<PathBuf> = index
            .by_path
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Retire everything under `prefix`, releasing the monitors
    pub(crate) fn retire_subtree(&self, prefix: &Path) -> usize {
        let handles = self.index.lock().retire_subtree(prefix);
        self.settled.notify_all();
        let count = handles.len();
        self.release_all(handles);
        count
    }

    /// Re-register `dir` and fix the index if the kernel hands back a
    /// different handle than the one recorded
    pub(crate) fn rewatch(&self, dir: &Path) -> Result<()> {
        match self.monitor.watch(dir) {
            Ok(handle) => {
                let outcome = self.index.lock().bind(dir, None, handle);
                match outcome {
                    Bind::Bound { replaced } => self.release_all(replaced),
                    Bind::Abandoned { release } => self.release_all(release),
                }
                Ok(())
            }
            Err(e) if vanished(&e) => {
                self.retire_subtree(dir);
                Ok(())
            }
            Err(e) => Err(WatchError::Install {
                path: dir.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Descend every active directory under `dir` again
    pub(crate) fn rescan(&self, dir: &Path) -> Result<()> {
        for path in self.paths_under(dir) {
            if self.state(&path) == Some(PathState::Active) {
                self.descend(&path, None)?;
            }
        }
        Ok(())
    }

    /// Claim `dir`, waiting while another thread is setting it up
    fn claim(&self, dir: &Path) -> Claim {
        let me = thread::current().id();
        let mut index = self.index.lock();
        loop {
            match index.by_path.get(dir).map(|n| (n.state, n.owner)) {
                Some((PathState::SettingUp, owner)) if owner == me => return Claim::Reentrant,
                Some((PathState::SettingUp, _)) => self.settled.wait(&mut index),
                Some((PathState::Active, _)) => return Claim::Active,
                Some((PathState::Retired, _)) | None => {
                    return Claim::Claimed(index.claim(dir, me));
                }
            }
        }
    }

    /// Install one directory and, recursively, everything below it
    ///
    /// Returns once `dir` has converged, either here or in a concurrent
    /// installer this call waited for. With `strict`, a permission error is
    /// returned instead of skipping the directory.
    pub(crate) fn install_dir(&self, dir: &Path, strict: bool) -> Result<()> {
        // 1. claim the path
        let gen = match self.claim(dir) {
            Claim::Claimed(gen) => gen,
            Claim::Active | Claim::Reentrant => return Ok(()),
        };

        let result = self.install_claimed(dir, gen, strict);
        self.settled.notify_all();
        result
    }

    fn install_claimed(&self, dir: &Path, gen: u64, strict: bool) -> Result<()> {
        // 2. register the monitor before trusting any listing
        let handle = match self.monitor.watch(dir) {
            Ok(handle) => handle,
            Err(e) => {
                self.index.lock().forget(dir, gen);
                if vanished(&e) {
                    debug!("{} vanished before it could be watched", dir.display());
                    return Ok(());
                }
                if !strict && e.kind() == io::ErrorKind::PermissionDenied {
                    warn!("skipping {}: {}", dir.display(), e);
                    return Ok(());
                }
                return Err(WatchError::Install {
                    path: dir.to_path_buf(),
                    source: e,
                });
            }
        };

        let outcome = self.index.lock().bind(dir, Some(gen), handle);
        match outcome {
            Bind::Bound { replaced } => self.release_all(replaced),
            Bind::Abandoned { release } => {
                debug!("{} retired during setup", dir.display());
                self.release_all(release);
                return Ok(());
            }
        }
        debug!("watching {} as {:?}", dir.display(), handle);

        // 3 + 4. list, install new children, repeat until stable
        let result = self.descend(dir, Some(gen));

        if !self.index.lock().activate(dir, gen) {
            debug!("{} retired during setup", dir.display());
        }
        result
    }

    /// Rescan loop for a directory that is already monitored
    ///
    /// Every child directory is tried at most once per call, so each round
    /// that continues has grown the set of tried children; the loop ends
    /// once a listing turns up nothing new. Children another thread is
    /// still setting up are waited for. With `gen`, the loop stops as soon
    /// as `dir` is retired or claimed by a newer installer.
    pub(crate) fn descend(&self, dir: &Path, gen: Option<u64>) -> Result<()> {
        let mut tried: HashSet<PathBuf> = HashSet::new();

        loop {
            let children = match list_subdirs(dir) {
                Ok(children) => children,
                Err(e) if vanished(&e) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    warn!("cannot list {}: {}", dir.display(), e);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let pending: Vec<PathBuf> = {
                let index = self.index.lock();
                if !index.is_live(dir, gen) {
                    return Ok(());
                }
                children
                    .into_iter()
                    .filter(|child| {
                        !tried.contains(child)
                            && !index
                                .by_path
                                .get(child)
                                .is_some_and(|n| n.state == PathState::Active)
                    })
                    .collect()
            };

            if pending.is_empty() {
                return Ok(());
            }

            for child in pending {
                tried.insert(child.clone());
                if self.filter.skip(&child) {
                    debug!("skipping {}", child.display());
                    continue;
                }
                self.install_dir(&child, false)?;
            }
        }
    }

    fn release_all(&self, handles: impl IntoIterator<Item = WatchHandle>) {
        for handle in handles {
            // EINVAL when the kernel already dropped it
            if let Err(e) = self.monitor.unwatch(handle) {
                debug!("unwatch {:?}: {}", handle, e);
            }
        }
    }
}

/// Child directories of `dir` (symlinks are not followed)
fn list_subdirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            out.push(entry.path());
        }
    }
    Ok(out)
}

/// The directory is gone or was replaced by something else
fn vanished(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENOTDIR)
}
