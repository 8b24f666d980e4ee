//! envmatrix - configuration resolution for test-environment matrices.
//!
//! envmatrix reads a `tox.ini` style file and resolves it into a fully
//! typed description of every test environment: expanded environment
//! names, factor-conditional settings, `{...}` substitutions, and
//! commands split into argv vectors ready to execute.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Ini reading, substitution and environment resolution
//! - [`error`] - Error types and result aliases
//! - [`ui`] - Terminal output
//!
//! # Example
//!
//! ```
//! use envmatrix::config::expand_env_expr;
//!
//! let envs = expand_env_expr("py{27,36}-django{15,16}");
//! assert_eq!(
//!     envs,
//!     vec!["py27-django15", "py27-django16", "py36-django15", "py36-django16"]
//! );
//! ```
//!
//! For file-based config loading, see the integration tests.

pub mod cli;
pub mod config;
pub mod error;
pub mod ui;

pub use error::{EnvMatrixError, Result};
