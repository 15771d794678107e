//! Watcher configuration (`<state>/config.toml`)

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the optional config file inside the state directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Tunables for a [`crate::Watch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period that ends a burst (default: 3000ms)
    pub quiet_period_ms: u64,

    /// Capacity of the queue between the reader and the debouncer
    pub queue_capacity: usize,

    /// Skip directories whose name starts with '.' (default: true)
    pub skip_hidden: bool,

    /// Skip Go vendor directories managed by dep/govendor (default: true)
    pub skip_vendor: bool,

    /// Additional gitignore-style directory patterns
    pub extra_ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 3000,
            queue_capacity: 1024,
            skip_hidden: true,
            skip_vendor: true,
            extra_ignore: vec![],
        }
    }
}

impl WatchConfig {
    /// Load `<state>/config.toml`, falling back to defaults if it is absent
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(CONFIG_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}
