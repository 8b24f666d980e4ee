//! List command implementation.
//!
//! The `envmatrix list` command prints environment names, one per line.

use std::path::{Path, PathBuf};

use crate::cli::args::ListArgs;
use crate::config::ProcessEnv;
use crate::error::Result;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::resolve::{load_config, EXIT_NO_CONFIG};

/// The list command implementation.
pub struct ListCommand {
    invocation_dir: PathBuf,
    process_env: ProcessEnv,
    args: ListArgs,
}

impl ListCommand {
    /// Create a new list command.
    pub fn new(invocation_dir: &Path, process_env: &ProcessEnv, args: ListArgs) -> Self {
        Self {
            invocation_dir: invocation_dir.to_path_buf(),
            process_env: process_env.clone(),
            args,
        }
    }

    pub fn args(&self) -> &ListArgs {
        &self.args
    }
}

impl Command for ListCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let Some(config) =
            load_config(&self.invocation_dir, &self.process_env, &self.args.resolve, ui)?
        else {
            return Ok(CommandResult::failure(EXIT_NO_CONFIG));
        };

        if self.args.all {
            for name in config.environments.keys() {
                ui.message(name);
            }
            return Ok(CommandResult::success());
        }

        for name in &config.envlist {
            if config.environments.contains_key(name) {
                ui.message(name);
            } else {
                ui.warning(&format!("{}: not configured, skipped", name));
            }
        }
        Ok(CommandResult::success())
    }
}
