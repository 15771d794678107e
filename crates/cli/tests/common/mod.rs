//! Helpers for running the `tg` binary in tests

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};

/// `tg` command builder bound to a scratch state directory
pub struct TgCommand {
    state_dir: PathBuf,
    args: Vec<String>,
}

impl TgCommand {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_tg"));
        command
            .args(&self.args)
            .env("TOGGL_WATCHER_DIRECTORY", &self.state_dir)
            .env("NO_COLOR", "1");
        command
    }

    /// Run to completion
    pub fn execute(&self) -> CommandResult {
        let output = self.command().output().unwrap();
        CommandResult { output }
    }

    /// Start in the background (for long-running commands)
    pub fn spawn(&self) -> Child {
        self.command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }
}

/// Finished command
pub struct CommandResult {
    pub output: Output,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.output.status.success()
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    /// Panic with both streams if the command failed
    pub fn assert_success(&self) -> &Self {
        assert!(
            self.success(),
            "command failed\nstdout:\n{}\nstderr:\n{}",
            self.stdout(),
            self.stderr()
        );
        self
    }
}
