//! CLI argument definitions.
//!
//! This module defines all CLI arguments using clap's derive macros.
//! The main entry point is the [`Cli`] struct.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::GlobalOptions;

/// envmatrix - resolve test-environment matrix configuration.
#[derive(Debug, Parser)]
#[command(name = "envmatrix")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Only print resolved data and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List environments (default if no command specified)
    List(ListArgs),

    /// Show resolved configuration
    Config(ConfigArgs),
}

/// Options that change how the configuration resolves. Shared by every
/// subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ResolveArgs {
    /// Config file, or a directory containing tox.ini
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Environments to select, e.g. "py{27,36},lint" (repeatable)
    #[arg(short = 'e', long = "env")]
    pub envs: Vec<String>,

    /// Working directory, overrides toxworkdir
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// PYTHONHASHSEED for commands; "noset" leaves it unset
    #[arg(long)]
    pub hashseed: Option<String>,

    /// Requirement replacing any dependency for the same project (repeatable)
    #[arg(long = "force-dep")]
    pub force_deps: Vec<String>,

    /// Give environments access to globally installed packages
    #[arg(long)]
    pub sitepackages: bool,

    /// Always copy files instead of symlinking
    #[arg(long)]
    pub alwayscopy: bool,

    /// Allow pre-release versions of dependencies
    #[arg(long)]
    pub pre: bool,

    /// Install the project in develop mode
    #[arg(long)]
    pub develop: bool,

    /// Install this package file instead of building one
    #[arg(long)]
    pub installpkg: Option<PathBuf>,

    /// Index server URL, "url" or "name=url" (repeatable)
    #[arg(short = 'i', long = "index-url")]
    pub index_urls: Vec<String>,

    /// Force recreation of environments
    #[arg(short = 'r', long)]
    pub recreate: bool,

    /// Don't fail when an interpreter is missing
    #[arg(long)]
    pub skip_missing_interpreters: bool,

    /// Arguments substituted for {posargs}
    #[arg(last = true)]
    pub posargs: Vec<String>,
}

impl From<&ResolveArgs> for GlobalOptions {
    fn from(args: &ResolveArgs) -> Self {
        Self {
            config_file: args.config.clone(),
            envs: args.envs.clone(),
            workdir: args.workdir.clone(),
            hashseed: args.hashseed.clone(),
            force_deps: args.force_deps.clone(),
            sitepackages: args.sitepackages,
            alwayscopy: args.alwayscopy,
            pre: args.pre,
            develop: args.develop,
            installpkg: args.installpkg.clone(),
            index_urls: args.index_urls.clone(),
            recreate: args.recreate,
            skip_missing_interpreters: args.skip_missing_interpreters,
            posargs: args.posargs.clone(),
        }
    }
}

/// Arguments for the `list` command.
#[derive(Debug, Clone, Default, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub resolve: ResolveArgs,

    /// List every configured environment, not only the selected ones
    #[arg(short, long)]
    pub all: bool,
}

/// Arguments for the `config` command.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub resolve: ResolveArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
