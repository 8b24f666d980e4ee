//! Configuration resolution for test-environment matrices.
//!
//! The pieces, bottom-up:
//! - [`ini`] reads the raw sections of the configuration file
//! - [`envlist`] expands `py{27,36}-django` style environment expressions
//! - [`factors`] matches factor conditions such as `py27,!cov:`
//! - [`substitution`] resolves `{...}` placeholders through a [`SectionReader`]
//! - [`command`] turns command settings into argv vectors
//! - [`attributes`] declares the typed settings of every environment
//! - [`loader`] discovers the file and builds the [`GlobalConfig`]
//!
//! # Example
//!
//! ```
//! use envmatrix::config::{IniSource, ProcessEnv, SectionReader};
//!
//! let source = IniSource::parse("tox.ini", r#"
//! [base]
//! deps = pytest
//!
//! [testenv]
//! deps = {[base]deps}
//!     py27: mock
//! "#).unwrap();
//!
//! let env = ProcessEnv::default();
//! let reader = SectionReader::new(&source, "testenv", &env)
//!     .with_factors(["py27"].into_iter().collect());
//! assert_eq!(reader.get_list("deps", '\n').unwrap(), vec!["pytest", "mock"]);
//! ```

pub mod attributes;
pub mod command;
pub mod deps;
pub mod envlist;
pub mod environment;
pub mod factors;
pub mod ini;
pub mod loader;
pub mod options;
pub mod paths;
pub mod setenv;
pub mod substitution;

pub use attributes::{
    AttrValue, AttributeDeclaration, AttributeRegistry, AttributeType, Attributes, Postprocess,
    PostprocessContext, SharedSettings,
};
pub use command::{join_args, shell_split, split_words};
pub use deps::{DepConfig, IndexServerConfig, IndexServers, DEFAULT_INDEX};
pub use envlist::{expand_env_expr, split_env_list};
pub use environment::EnvironmentConfig;
pub use factors::{filter_factor_lines, matches, FactorSet};
pub use ini::{IniSection, IniSource};
pub use loader::{ConfigLoader, GlobalConfig, ALL_ENVS};
pub use options::{GlobalOptions, DEFAULT_CONFIG_FILE};
pub use setenv::{EnvMapping, ProcessEnv};
pub use substitution::{Namespace, SectionReader, Substitution, Value};
