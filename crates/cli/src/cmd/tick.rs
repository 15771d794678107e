//! Record work on a project

use crate::util;
use anyhow::{Context, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use state::Status;
use std::path::Path;

pub fn run(state_dir: &Path, project: &str) -> Result<()> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

    let outcome = Status::tick(state_dir, project, Utc::now()).context("Failed to record tick")?;
    println!("{}", util::describe_tick(project, &outcome));
    println!("  {}", "Tick recorded".dimmed());

    Ok(())
}
