//! Directory exclusion during installation
//!
//! The watch tree asks a [`DirFilter`] once per directory whether to skip
//! it (and everything below it). Policy lives here, not in the tree:
//! 1. Hidden directories (`.git`, `.cache`, ...)
//! 2. Go vendor directories managed by `dep` or `govendor`
//! 3. Extra gitignore-style patterns from `config.toml`

use crate::config::WatchConfig;
use crate::error::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Decides which directories are left unwatched
pub trait DirFilter: Send + Sync {
    /// True if `dir` and its subtree should not be watched
    fn skip(&self, dir: &Path) -> bool;
}

impl<F> DirFilter for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn skip(&self, dir: &Path) -> bool {
        self(dir)
    }
}

/// Filter that watches everything
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchAll;

impl DirFilter for WatchAll {
    fn skip(&self, _dir: &Path) -> bool {
        false
    }
}

/// Built-in exclusion rules
#[derive(Debug)]
pub struct DefaultFilter {
    skip_hidden: bool,
    skip_vendor: bool,
    /// Compiled `extra_ignore` patterns (optional)
    extra: Option<Gitignore>,
}

impl DefaultFilter {
    /// Build the filter described by `config`
    pub fn from_config(config: &WatchConfig) -> Result<Self> {
        let extra = if config.extra_ignore.is_empty() {
            None
        } else {
            // Anchored at "/": slash-free patterns match a directory name anywhere
            let mut builder = GitignoreBuilder::new("/");
            for pattern in &config.extra_ignore {
                builder.add_line(None, pattern)?;
            }
            Some(builder.build()?)
        };

        Ok(Self {
            skip_hidden: config.skip_hidden,
            skip_vendor: config.skip_vendor,
            extra,
        })
    }

    /// Number of active rule sources
    pub fn active_sources(&self) -> usize {
        [self.skip_hidden, self.skip_vendor, self.extra.is_some()]
            .iter()
            .filter(|on| **on)
            .count()
    }
}

impl Default for DefaultFilter {
    fn default() -> Self {
        Self {
            skip_hidden: true,
            skip_vendor: true,
            extra: None,
        }
    }
}

impl DirFilter for DefaultFilter {
    fn skip(&self, dir: &Path) -> bool {
        let name = match dir.file_name() {
            Some(name) => name.to_string_lossy(),
            None => return false,
        };

        if self.skip_hidden && name.starts_with('.') {
            return true;
        }

        if self.skip_vendor && name == "vendor" && is_managed_vendor(dir) {
            return true;
        }

        if let Some(ref extra) = self.extra {
            if extra.matched(dir, true).is_ignore() {
                return true;
            }
        }

        false
    }
}

/// Vendor directory owned by a Go dependency tool
///
/// `dep` leaves `Gopkg.lock` next to `vendor/`; `govendor` keeps
/// `vendor.json` inside it.
fn is_managed_vendor(dir: &Path) -> bool {
    let dep_lock = dir
        .parent()
        .map(|parent| parent.join("Gopkg.lock").exists())
        .unwrap_or(false);
    dep_lock || dir.join("vendor.json").exists()
}
