//! Invocation options that influence configuration resolution.

use std::path::PathBuf;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "tox.ini";

/// Options given on the command line.
///
/// Everything is optional; [`GlobalOptions::default`] resolves a
/// configuration exactly as the file describes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    /// Configuration file, or a directory containing one.
    pub config_file: Option<PathBuf>,
    /// Environment expressions selecting what to run.
    pub envs: Vec<String>,
    /// Overrides the `toxworkdir` setting.
    pub workdir: Option<PathBuf>,
    /// `PYTHONHASHSEED` value; `noset` disables it, `None` picks one at random.
    pub hashseed: Option<String>,
    /// Requirements replacing same-named dependencies.
    pub force_deps: Vec<String>,
    pub sitepackages: bool,
    pub alwayscopy: bool,
    pub pre: bool,
    pub develop: bool,
    /// Install this package file instead of building one; disables develop mode.
    pub installpkg: Option<PathBuf>,
    /// Index URL overrides, `url` or `name=url`.
    pub index_urls: Vec<String>,
    pub recreate: bool,
    pub skip_missing_interpreters: bool,
    /// Positional arguments for `{posargs}`.
    pub posargs: Vec<String>,
}

impl GlobalOptions {
    /// The configured file name, or [`DEFAULT_CONFIG_FILE`].
    pub fn config_file(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}
