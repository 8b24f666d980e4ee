//! Command dispatching.
//!
//! This module provides the core command infrastructure:
//! - [`Command`] trait for implementing commands
//! - [`CommandResult`] for uniform result reporting
//! - [`CommandDispatcher`] for routing CLI subcommands

use std::path::{Path, PathBuf};

use crate::cli::args::{Cli, Commands, ListArgs};
use crate::config::ProcessEnv;
use crate::error::Result;
use crate::ui::UserInterface;

use super::config::ConfigCommand;
use super::list::ListCommand;

/// Trait for command implementations.
///
/// Each CLI subcommand implements this trait to provide its execution logic.
pub trait Command {
    /// Execute the command, reporting through `ui`.
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult>;
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult {
    /// Whether the command succeeded.
    pub success: bool,

    /// Exit code to use (0 for success, non-zero for failure).
    pub exit_code: i32,
}

impl CommandResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self {
            success: true,
            exit_code: 0,
        }
    }

    /// Create a failure result.
    pub fn failure(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
        }
    }
}

/// Dispatches CLI commands to their implementations.
pub struct CommandDispatcher {
    invocation_dir: PathBuf,
    process_env: ProcessEnv,
}

impl CommandDispatcher {
    /// Create a dispatcher resolving from `invocation_dir` against the
    /// current process environment.
    pub fn new(invocation_dir: PathBuf) -> Self {
        Self {
            invocation_dir,
            process_env: ProcessEnv::capture(),
        }
    }

    /// Resolve against a fixed environment instead.
    pub fn with_process_env(mut self, process_env: ProcessEnv) -> Self {
        self.process_env = process_env;
        self
    }

    pub fn invocation_dir(&self) -> &Path {
        &self.invocation_dir
    }

    /// Dispatch and execute a command.
    ///
    /// Without a subcommand the selected environments are listed.
    pub fn dispatch(&self, cli: &Cli, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        match &cli.command {
            Some(Commands::List(args)) => {
                let cmd = ListCommand::new(&self.invocation_dir, &self.process_env, args.clone());
                cmd.execute(ui)
            }
            Some(Commands::Config(args)) => {
                let cmd =
                    ConfigCommand::new(&self.invocation_dir, &self.process_env, args.clone());
                cmd.execute(ui)
            }
            None => {
                let cmd =
                    ListCommand::new(&self.invocation_dir, &self.process_env, ListArgs::default());
                cmd.execute(ui)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::MockUI;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn command_result_success() {
        let result = CommandResult::success();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn command_result_failure() {
        let result = CommandResult::failure(1);
        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn dispatcher_creation() {
        let dispatcher = CommandDispatcher::new(PathBuf::from("/test"));
        assert_eq!(dispatcher.invocation_dir(), Path::new("/test"));
    }

    #[test]
    fn no_subcommand_lists_envs() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tox.ini"), "[tox]\nenvlist = py{27,36}\n").unwrap();
        let dispatcher = CommandDispatcher::new(temp.path().to_path_buf())
            .with_process_env(ProcessEnv::default());
        let cli = Cli::parse_from(["envmatrix"]);
        let mut ui = MockUI::new();

        let result = dispatcher.dispatch(&cli, &mut ui).unwrap();

        assert!(result.success);
        assert_eq!(ui.messages(), ["py27", "py36"]);
    }
}
