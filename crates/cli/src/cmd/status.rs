//! Show the last tick and the registered directories

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use state::{InstanceLock, RootRegistry, StateError, Status};
use std::path::Path;

pub fn run(state_dir: &Path) -> Result<()> {
    // 1. Is a watcher holding the lock?
    let running = if state_dir.exists() {
        match InstanceLock::acquire(state_dir) {
            Ok(_lock) => false,
            Err(StateError::AlreadyRunning) => true,
            Err(e) => return Err(e).context("Failed to check the instance lock"),
        }
    } else {
        false
    };

    // 2. Last tick
    let status = Status::load(state_dir).context("Failed to read the tick file")?;

    // 3. Registered roots
    let registry = RootRegistry::load(state_dir).context("Failed to read the registry")?;
    let mapping = registry.mapping();

    // 4. Display output
    println!("{}", "Watch Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    println!("State:         {}", state_dir.display().to_string().cyan());

    print!("Watcher:       ");
    if running {
        println!("{}", "Running ✓".green());
    } else {
        println!("{}", "Not running".yellow());
        println!("  {}", "Tip: Start with 'tg resume'".dimmed());
    }
    println!();

    println!("Last tick:");
    match status {
        Some(status) => {
            println!("  Project:     {}", status.project_name.yellow());
            println!(
                "  Time:        {} ({})",
                util::format_relative_time(status.tick),
                status.tick.to_rfc3339().dimmed()
            );
            if !status.project_id.is_empty() {
                println!("  Project id:  {}", status.project_id);
            }
        }
        None => println!("  {}", "No ticks yet".dimmed()),
    }
    println!();

    println!("Directories:");
    if mapping.is_empty() {
        println!("  {}", "None registered".dimmed());
        println!("  {}", "Tip: Add one with 'tg watch <project> <dir>'".dimmed());
    } else {
        for (path, label) in &mapping {
            let marker = if path.is_dir() {
                "✓".green().to_string()
            } else {
                "missing".red().to_string()
            };
            println!("  {}  {}  {}", label.yellow(), path.display(), marker);
        }
    }

    Ok(())
}
