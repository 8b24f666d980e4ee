//! Command-line interface for envmatrix.
//!
//! - [`args`] - Argument definitions using clap derive macros
//! - [`commands`] - Command implementations

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, ConfigArgs, ListArgs, ResolveArgs};
pub use commands::{Command, CommandDispatcher, CommandResult};
