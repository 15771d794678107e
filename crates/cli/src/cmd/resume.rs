//! Watch every registered directory

use anyhow::Result;
use std::path::Path;

pub async fn run(state_dir: &Path) -> Result<()> {
    crate::daemon::run(state_dir, None).await
}
