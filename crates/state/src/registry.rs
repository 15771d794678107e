//! Root registry: which directories are watched, and for which project
//!
//! Stored in `<state>/watch` as a flat JSON object mapping absolute
//! directory paths to caller-supplied labels. The file is always replaced
//! whole (see [`crate::write_atomic`]).

use crate::{write_atomic, Result, StateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the registry file inside the state directory
pub const REGISTRY_FILE_NAME: &str = "watch";

/// Lifecycle of a registered root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootState {
    /// Persisted, monitors not installed yet
    Pending,
    /// Persisted and installed
    Active,
    /// Removed by the caller; no longer persisted
    Removed,
}

/// One registered root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEntry {
    /// Canonical absolute path
    pub path: PathBuf,
    /// Opaque label (project name)
    pub label: String,
    pub state: RootState,
}

/// Result of [`RootRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New root, persisted
    Added,
    /// Known root whose label changed, persisted
    Relabeled,
    /// Known root with the same label; nothing written
    Unchanged,
}

/// Durable mapping of root path -> label
#[derive(Debug)]
pub struct RootRegistry {
    /// Path of the registry file
    file: PathBuf,
    entries: BTreeMap<PathBuf, RootEntry>,
}

impl RootRegistry {
    /// Load the registry from `state_dir`
    ///
    /// A missing or empty file yields an empty registry. Every loaded root
    /// starts out `Pending`.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let file = state_dir.join(REGISTRY_FILE_NAME);
        let mut entries = BTreeMap::new();

        match std::fs::read(&file) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {}
            Ok(bytes) => {
                let map: BTreeMap<PathBuf, String> =
                    serde_json::from_slice(&bytes).map_err(|source| StateError::Parse {
                        path: file.clone(),
                        source,
                    })?;
                for (path, label) in map {
                    entries.insert(
                        path.clone(),
                        RootEntry {
                            path,
                            label,
                            state: RootState::Pending,
                        },
                    );
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!("loaded {} root(s) from {}", entries.len(), file.display());
        Ok(Self { file, entries })
    }

    /// Register `path` under `label` and persist the new mapping
    ///
    /// The path is canonicalized first; a missing path fails with
    /// `NotFound` before anything touches the disk. The mapping is written
    /// before the caller installs monitors, so a crash in between leaves a
    /// root that is simply re-installed on the next start.
    pub fn add(&mut self, path: &Path, label: &str) -> Result<(PathBuf, AddOutcome)> {
        let canonical = canonical_dir(path)?;

        let outcome = match self.entries.get_mut(&canonical) {
            Some(entry) if entry.state != RootState::Removed && entry.label == label => {
                AddOutcome::Unchanged
            }
            Some(entry) => {
                let outcome = if entry.state == RootState::Removed {
                    entry.state = RootState::Pending;
                    AddOutcome::Added
                } else {
                    AddOutcome::Relabeled
                };
                entry.label = label.to_string();
                outcome
            }
            None => {
                self.entries.insert(
                    canonical.clone(),
                    RootEntry {
                        path: canonical.clone(),
                        label: label.to_string(),
                        state: RootState::Pending,
                    },
                );
                AddOutcome::Added
            }
        };

        if outcome != AddOutcome::Unchanged {
            if let Err(e) = self.save() {
                // Keep memory in line with disk
                if outcome == AddOutcome::Added {
                    self.entries.remove(&canonical);
                }
                return Err(e);
            }
            tracing::info!("registered {} as {:?}", canonical.display(), label);
        }

        Ok((canonical, outcome))
    }

    /// Mark a root as installed
    pub fn mark_active(&mut self, path: &Path) {
        if let Some(entry) = self.entries.get_mut(path) {
            if entry.state == RootState::Pending {
                entry.state = RootState::Active;
            }
        }
    }

    /// Mark a root as removed and persist the mapping without it
    ///
    /// Returns false if the root was not registered.
    pub fn remove(&mut self, path: &Path) -> Result<bool> {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        let previous = match self.entries.get_mut(&key) {
            Some(entry) if entry.state != RootState::Removed => {
                std::mem::replace(&mut entry.state, RootState::Removed)
            }
            _ => return Ok(false),
        };

        if let Err(e) = self.save() {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.state = previous;
            }
            return Err(e);
        }

        tracing::info!("unregistered {}", key.display());
        Ok(true)
    }

    /// Look up a root
    pub fn get(&self, path: &Path) -> Option<&RootEntry> {
        self.entries.get(path)
    }

    /// All roots that have not been removed
    pub fn roots(&self) -> impl Iterator<Item = &RootEntry> {
        self.entries
            .values()
            .filter(|e| e.state != RootState::Removed)
    }

    /// Persisted mapping (path -> label), i.e. everything not removed
    pub fn mapping(&self) -> BTreeMap<PathBuf, String> {
        self.roots()
            .map(|e| (e.path.clone(), e.label.clone()))
            .collect()
    }

    /// Path of the registry file
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Write the whole mapping, replacing the file
    fn save(&self) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(&self.mapping())?;
        write_atomic(&self.file, &serialized)
    }
}

/// Canonicalize `path`, requiring an existing directory
pub fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let canonical = match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StateError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !canonical.is_dir() {
        return Err(StateError::NotADirectory(canonical));
    }
    Ok(canonical)
}
