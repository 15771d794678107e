//! Register a directory and watch

use anyhow::Result;
use std::path::Path;

pub async fn run(state_dir: &Path, project: &str, dir: &Path) -> Result<()> {
    crate::daemon::run(state_dir, Some((dir, project))).await
}
