//! Full resynchronization after a kernel queue overflow
//!
//! An overflow means events were dropped, so the index may hold handles
//! for directories that are gone and miss directories created meanwhile.
//! `resync` walks every root again:
//! 1. re-register each known path (vanished ones retire with their subtree)
//! 2. rescan each active path for children the index does not know
//!
//! No activity notification is produced by a resync.

use crate::tree::{PathState, WatchTree};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{info, warn};

/// What a resync changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Paths that were active before and are gone now
    pub retired: usize,
    /// Paths active now that were not before
    pub installed: usize,
    /// Paths that could not be re-registered or rescanned
    pub failed: usize,
}

/// Bring the tree back in line with the filesystem
pub fn resync(tree: &WatchTree) -> ResyncReport {
    let before: BTreeSet<PathBuf> = tree.active_paths().into_iter().collect();
    let mut report = ResyncReport::default();

    for root in tree.roots() {
        for path in tree.paths_under(&root) {
            // Retired together with an ancestor earlier in this pass
            if tree.state(&path).is_none() {
                continue;
            }
            if let Err(e) = tree.rewatch(&path) {
                warn!("resync: {}", e);
                report.failed += 1;
            }
        }

        if tree.state(&root).is_none() {
            warn!("resync: root {} is gone", root.display());
            continue;
        }

        for path in tree.paths_under(&root) {
            if tree.state(&path) != Some(PathState::Active) {
                continue;
            }
            if let Err(e) = tree.descend(&path, None) {
                warn!("resync: rescan of {} failed: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    let after: BTreeSet<PathBuf> = tree.active_paths().into_iter().collect();
    report.retired = before.difference(&after).count();
    report.installed = after.difference(&before).count();

    info!(
        "resync finished: {} retired, {} installed, {} failed",
        report.retired, report.installed, report.failed
    );
    report
}
