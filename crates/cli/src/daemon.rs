//! Foreground watch loop shared by `tg watch` and `tg resume`

use crate::util;
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::TryRecvError;
use owo_colors::OwoColorize;
use state::Status;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use watcher::{SharedRoots, Watch};

/// How often the loop checks the watcher's fatal channel
const FATAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Start watching and block until Ctrl-C or a fatal watcher error
///
/// With `add`, the directory is registered (and persisted) under the given
/// project before the loop starts.
pub async fn run(state_dir: &Path, add: Option<(&Path, &str)>) -> Result<()> {
    // Takes the instance lock before config.toml is read
    let watch = Watch::open(state_dir)
        .with_context(|| format!("Failed to start watching (state: {})", state_dir.display()))?;

    if let Some((dir, project)) = add {
        let root = watch
            .add_root(dir, project)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        println!("Registered {} for {}", root.display().to_string().cyan(), project.yellow());
    }

    let roots = watch.roots();
    if roots.is_empty() {
        anyhow::bail!("No directories registered (add one with 'tg watch <project> <dir>')");
    }

    if util::activity_label(&roots).is_empty() {
        anyhow::bail!("None of the registered directories exist");
    }

    for root in &roots {
        if root.state == state::RootState::Active {
            println!("Watching {}  {}", root.label.yellow(), root.path.display());
        } else {
            println!(
                "Skipping {}  {} {}",
                root.label.yellow(),
                root.path.display(),
                "(missing)".red()
            );
        }
    }
    println!(
        "  {}",
        format!(
            "{} directories, quiet period {:?}",
            watch.active_paths().len(),
            watch.config().quiet_period()
        )
        .dimmed()
    );

    let tick_dir: PathBuf = state_dir.to_path_buf();
    let registry = watch.shared_roots();
    watch.set_callback(move || on_activity(&tick_dir, &registry));

    wait(&watch).await
}

/// Activity settled: tick the sidecar under the current root labels
fn on_activity(state_dir: &Path, registry: &SharedRoots) {
    let project = util::activity_label(&registry.entries());
    if project.is_empty() {
        warn!("activity with no active root, not ticking");
        return;
    }
    match Status::tick(state_dir, &project, Utc::now()) {
        Ok(outcome) => info!("{}", util::describe_tick(&project, &outcome)),
        Err(e) => warn!("could not record tick: {}", e),
    }
}

async fn wait(watch: &Watch) -> Result<()> {
    let fatal = watch.fatal_errors().clone();
    let mut ticker = tokio::time::interval(FATAL_POLL_INTERVAL);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("interrupted, stopping");
                return Ok(());
            }
            _ = ticker.tick() => match fatal.try_recv() {
                Ok(e) => return Err(e).context("Event channel failed"),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => anyhow::bail!("Watcher stopped unexpectedly"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_tick_uses_roots_registered_later() {
        let state_dir = TempDir::new().unwrap();
        let backend = TempDir::new().unwrap();
        let frontend = TempDir::new().unwrap();
        fs::write(state_dir.path().join("config.toml"), "quiet_period_ms = 50\n").unwrap();

        let watch = Watch::open(state_dir.path()).unwrap();
        watch.add_root(backend.path(), "backend").unwrap();
        let registry = watch.shared_roots();

        on_activity(state_dir.path(), &registry);
        let status = Status::load(state_dir.path()).unwrap().unwrap();
        assert_eq!(status.project_name, "backend");

        watch.add_root(frontend.path(), "frontend").unwrap();
        on_activity(state_dir.path(), &registry);
        let status = Status::load(state_dir.path()).unwrap().unwrap();
        assert_eq!(status.project_name, "backend,frontend");
    }

    #[test]
    fn test_no_tick_without_active_roots() {
        let state_dir = TempDir::new().unwrap();
        let watch = Watch::open(state_dir.path()).unwrap();

        on_activity(state_dir.path(), &watch.shared_roots());
        assert!(Status::load(state_dir.path()).unwrap().is_none());
    }
}
