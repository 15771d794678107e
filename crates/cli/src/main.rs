//! tg - record time spent on projects by watching their directories

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod daemon;
mod util;

/// tg - Watch project directories and tick the time tracker on activity
#[derive(Parser)]
#[command(name = "tg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// State directory (default: $TOGGL_WATCHER_DIRECTORY or ~/.toggle-tool)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a directory for a project and start watching
    ///
    /// Activity anywhere under the watched directories is recorded under the
    /// labels of all active directories, sorted and joined with ','. The
    /// label set is read again on every tick, so directories registered
    /// later are included.
    Watch {
        /// Project the directory belongs to
        project: String,
        /// Directory to watch (recursively)
        dir: PathBuf,
        /// Write logs to <state>/watch.log instead of stderr
        #[arg(long)]
        log_file: bool,
    },
    /// Watch every registered directory
    Resume {
        /// Write logs to <state>/watch.log instead of stderr
        #[arg(long)]
        log_file: bool,
    },
    /// Record work on a project right now
    Tick {
        /// Project name
        project: String,
    },
    /// Show the last tick and the registered directories
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state_dir = util::state_dir(cli.state_dir)?;

    let log_file = match cli.command {
        Commands::Watch { log_file, .. } | Commands::Resume { log_file } => log_file,
        _ => false,
    };
    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = util::init_tracing(cli.verbose, log_file.then_some(state_dir.as_path()))?;

    match cli.command {
        Commands::Watch { project, dir, .. } => cmd::watch::run(&state_dir, &project, &dir).await,
        Commands::Resume { .. } => cmd::resume::run(&state_dir).await,
        Commands::Tick { project } => cmd::tick::run(&state_dir, &project),
        Commands::Status => cmd::status::run(&state_dir),
    }
}
