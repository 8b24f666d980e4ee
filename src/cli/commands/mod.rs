//! CLI command implementations.
//!
//! Each command implements the [`Command`] trait and is routed to by
//! [`CommandDispatcher`]. Every command resolves the configuration first
//! through [`resolve::load_config`].

pub mod config;
pub mod dispatcher;
pub mod list;
pub mod resolve;

pub use dispatcher::{Command, CommandDispatcher, CommandResult};
