//! Configuration discovery and loading.
//!
//! [`ConfigLoader`] locates the ini file, resolves the global settings from
//! its `[tox]` section, determines which environments exist and builds an
//! [`EnvironmentConfig`] for each of them.
//!
//! # Example
//!
//! ```
//! use envmatrix::config::{ConfigLoader, GlobalOptions, IniSource, ProcessEnv};
//! use std::path::Path;
//!
//! let source = IniSource::parse("/project/tox.ini", r#"
//! [tox]
//! envlist = py{27,36}
//!
//! [testenv]
//! commands = pytest {posargs}
//! "#).unwrap();
//!
//! let config = ConfigLoader::new(GlobalOptions::default())
//!     .with_process_env(ProcessEnv::default())
//!     .with_invocation_dir("/project")
//!     .load_source(Path::new("/project/tox.ini"), &source)
//!     .unwrap();
//!
//! assert_eq!(config.envlist, vec!["py27", "py36"]);
//! assert_eq!(config.environments["py36"].basepython(), Some("python3.6"));
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::attributes::{AttributeRegistry, SharedSettings};
use super::deps::{index_servers, IndexServers};
use super::envlist::split_env_list;
use super::environment::{EnvironmentBuilder, EnvironmentConfig, TESTENV_PREFIX, TESTENV_SECTION};
use super::factors::{section_factors, FactorSet, DEFAULT_FACTORS};
use super::ini::IniSource;
use super::options::GlobalOptions;
use super::paths::join_absolute;
use super::setenv::ProcessEnv;
use super::substitution::SectionReader;
use crate::error::{EnvMatrixError, Result};

/// File consulted when no configuration file is found.
pub const SETUP_CFG: &str = "setup.cfg";

/// Section prefix used inside `setup.cfg`.
const SETUP_CFG_PREFIX: &str = "tox";

/// Environment selection that means every known environment.
pub const ALL_ENVS: &str = "ALL";

#[cfg(windows)]
const MAX_HASHSEED: u128 = 1024;
#[cfg(not(windows))]
const MAX_HASHSEED: u128 = 4_294_967_295;

/// The fully resolved configuration.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalConfig {
    pub config_path: PathBuf,
    /// Directory containing the configuration file (`{toxinidir}`).
    pub config_dir: PathBuf,
    pub home_dir: PathBuf,
    /// `{toxworkdir}`
    pub work_dir: PathBuf,
    pub dist_dir: PathBuf,
    pub dist_share: PathBuf,
    pub sdist_src: Option<PathBuf>,
    pub setup_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Recorded, not enforced.
    pub min_version: Option<String>,
    pub hashseed: Option<String>,
    pub skip_missing_interpreters: bool,
    pub skip_sdist: bool,
    pub index_servers: IndexServers,
    /// Selected environments, in selection order.
    pub envlist: Vec<String>,
    /// Every environment that could be built, by name.
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl GlobalConfig {
    /// Selected environments, skipping names that were not built.
    pub fn selected(&self) -> impl Iterator<Item = &EnvironmentConfig> {
        self.envlist
            .iter()
            .filter_map(|name| self.environments.get(name))
    }
}

/// Loads configuration for a set of invocation options.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    options: GlobalOptions,
    process_env: ProcessEnv,
    invocation_dir: PathBuf,
    registry: AttributeRegistry,
}

impl ConfigLoader {
    /// A loader reading the current process environment and directory.
    pub fn new(options: GlobalOptions) -> Self {
        Self {
            options,
            process_env: ProcessEnv::capture(),
            invocation_dir: std::env::current_dir().unwrap_or_default(),
            registry: AttributeRegistry::standard(),
        }
    }

    /// Use a fixed environment instead of the process environment.
    pub fn with_process_env(mut self, process_env: ProcessEnv) -> Self {
        self.process_env = process_env;
        self
    }

    /// Resolve relative paths and discovery against `dir`.
    pub fn with_invocation_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.invocation_dir = dir.into();
        self
    }

    /// Use a custom set of attribute declarations.
    pub fn with_registry(mut self, registry: AttributeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The attribute declarations environments are built from.
    pub fn registry_mut(&mut self) -> &mut AttributeRegistry {
        &mut self.registry
    }

    pub fn options(&self) -> &GlobalOptions {
        &self.options
    }

    /// Locate the configuration file.
    ///
    /// The configured name is tried as a file, then as a directory holding
    /// `tox.ini`, then in the invocation directory and each of its
    /// ancestors. `setup.cfg` in the invocation directory is the last resort.
    pub fn discover(&self) -> Result<PathBuf> {
        let name = self.options.config_file();
        let candidate = join_absolute(&self.invocation_dir, &name);

        if candidate.is_file() {
            return Ok(candidate);
        }
        if candidate.is_dir() {
            return Ok(candidate.join(super::options::DEFAULT_CONFIG_FILE));
        }
        for dir in self.invocation_dir.ancestors() {
            let path = dir.join(&name);
            if path.is_file() {
                return Ok(path);
            }
        }

        let setup_cfg = self.invocation_dir.join(SETUP_CFG);
        if setup_cfg.is_file() {
            return Ok(setup_cfg);
        }
        Err(EnvMatrixError::ConfigNotFound { path: name })
    }

    /// Discover, read and resolve the configuration.
    pub fn load(&self) -> Result<GlobalConfig> {
        let path = self.discover()?;
        debug!("Loading configuration from {}", path.display());
        let source = IniSource::load(&path)?;
        self.load_source(&path, &source)
    }

    /// Resolve an already parsed configuration read from `path`.
    pub fn load_source(&self, path: &Path, source: &IniSource) -> Result<GlobalConfig> {
        let config_path = join_absolute(&self.invocation_dir, path);
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.invocation_dir.clone());
        let prefix = (config_path.file_name().and_then(|n| n.to_str()) == Some(SETUP_CFG))
            .then_some(SETUP_CFG_PREFIX);
        let prefixed = |name: &str| match prefix {
            Some(p) => format!("{}:{}", p, name),
            None => name.to_string(),
        };

        let on_ci = self.process_env.contains("JENKINS_URL") || self.process_env.contains("HUDSON_URL");
        let (section, fallbacks, distshare_default) = if on_ci {
            debug!("CI server detected, reading [tox:jenkins] first");
            (
                prefixed("tox:jenkins"),
                vec![prefixed("tox")],
                "{toxworkdir}/distshare",
            )
        } else {
            (prefixed("tox"), Vec::new(), "{homedir}/.tox/distshare")
        };
        let mut reader =
            SectionReader::new(source, section, &self.process_env).with_fallbacks(fallbacks);

        let hashseed = match self.options.hashseed.as_deref() {
            None => Some(random_hashseed()),
            Some("noset") => None,
            Some(seed) => Some(seed.to_string()),
        };

        let home_dir = dirs::home_dir().unwrap_or_else(|| config_dir.clone());
        reader.add_substitution("toxinidir", config_dir.as_path());
        reader.add_substitution("homedir", home_dir.as_path());

        let min_version = reader.get_string("minversion", None)?;

        let work_dir = match &self.options.workdir {
            Some(dir) => {
                if let Some(configured) = reader.raw("toxworkdir") {
                    warn!("toxworkdir = {} ignored, --workdir given", configured);
                }
                join_absolute(&config_dir, dir)
            }
            None => reader
                .get_path("toxworkdir", Some("{toxinidir}/.tox"))?
                .unwrap_or_else(|| config_dir.join(".tox")),
        };

        let skip_missing_interpreters = self.options.skip_missing_interpreters
            || reader.get_bool("skip_missing_interpreters", Some("false"))?;

        let mut server_lines = Vec::new();
        for line in reader.get_list("indexserver", '\n')? {
            let (name, url) = line
                .split_once('=')
                .ok_or_else(|| EnvMatrixError::TypeMismatch {
                    section: reader.section_name().to_string(),
                    key: "indexserver".to_string(),
                    value: line.clone(),
                    message: "expected NAME = URL".to_string(),
                })?;
            server_lines.push((name.trim().to_string(), url.trim().to_string()));
        }
        let index_servers = index_servers(&server_lines, &self.options.index_urls);

        reader.add_substitution("toxworkdir", work_dir.as_path());
        let dist_dir = reader
            .get_path("distdir", Some("{toxworkdir}/dist"))?
            .unwrap_or_else(|| work_dir.join("dist"));
        reader.add_substitution("distdir", dist_dir.as_path());
        let dist_share = reader
            .get_path("distshare", Some(distshare_default))?
            .unwrap_or_else(|| work_dir.join("distshare"));
        reader.add_substitution("distshare", dist_share.as_path());
        let sdist_src = reader.get_path("sdistsrc", None)?;
        let setup_dir = reader
            .get_path("setupdir", Some("{toxinidir}"))?
            .unwrap_or_else(|| config_dir.clone());
        let log_dir = work_dir.join("log");

        let (envlist, all_envs) = self.env_selection(source, &reader, &prefixed(TESTENV_PREFIX));

        let mut known_factors = section_factors(source, &prefixed(TESTENV_SECTION));
        known_factors.extend(&DEFAULT_FACTORS.iter().map(|(f, _)| *f).collect::<FactorSet>());
        known_factors.insert("python");
        let stated = reader.get_raw_string("envlist", None).unwrap_or_default();
        for env in split_env_list(&[stated]) {
            known_factors.extend(&FactorSet::from_env_name(&env));
        }

        let settings = SharedSettings {
            options: &self.options,
            hashseed: hashseed.as_deref(),
            index_servers: &index_servers,
            invocation_dir: &self.invocation_dir,
        };
        let builder = EnvironmentBuilder {
            source,
            process_env: &self.process_env,
            namespace: reader.namespace(),
            registry: &self.registry,
            settings,
            prefix,
        };

        let mut environments = BTreeMap::new();
        for name in &all_envs {
            let section = prefixed(&format!("{}{}", TESTENV_PREFIX, name));
            let factors = FactorSet::from_env_name(name);
            if source.has_section(&section) || factors.is_subset(&known_factors) {
                environments.insert(name.clone(), builder.build(name)?);
            } else {
                debug!("Skipping {}: unknown factors and no [{}] section", name, section);
            }
        }

        let all_develop = envlist
            .iter()
            .all(|name| environments.get(name).is_some_and(|e| e.flag("usedevelop")));
        let skip_sdist = reader.get_bool(
            "skipsdist",
            Some(if all_develop { "true" } else { "false" }),
        )?;

        debug!(
            "Resolved {} environments ({} selected)",
            environments.len(),
            envlist.len()
        );

        Ok(GlobalConfig {
            config_path,
            config_dir,
            home_dir,
            work_dir,
            dist_dir,
            dist_share,
            sdist_src,
            setup_dir,
            log_dir,
            min_version,
            hashseed,
            skip_missing_interpreters,
            skip_sdist,
            index_servers,
            envlist,
            environments,
        })
    }

    /// The selected environment list and the set of all environments.
    ///
    /// Selection comes from the options, then a non-empty `TOXENV`, then
    /// the `envlist` setting. An empty selection or `ALL` selects every environment.
    fn env_selection(
        &self,
        source: &IniSource,
        reader: &SectionReader<'_>,
        section_prefix: &str,
    ) -> (Vec<String>, BTreeSet<String>) {
        let stated = if !self.options.envs.is_empty() {
            self.options.envs.clone()
        } else if let Some(toxenv) = self
            .process_env
            .get("TOXENV")
            .filter(|v| !v.trim().is_empty())
        {
            vec![toxenv.to_string()]
        } else {
            reader
                .get_raw_string("envlist", None)
                .into_iter()
                .collect()
        };
        let mut envlist = split_env_list(&stated);

        let mut all_envs: BTreeSet<String> = envlist
            .iter()
            .filter(|name| *name != ALL_ENVS)
            .cloned()
            .collect();
        all_envs.extend(
            source
                .sections()
                .filter_map(|s| s.name().strip_prefix(section_prefix))
                .map(str::to_string),
        );
        if all_envs.is_empty() {
            all_envs.insert("python".to_string());
        }

        if envlist.is_empty() || envlist.iter().any(|name| name == ALL_ENVS) {
            envlist = all_envs.iter().cloned().collect();
        }
        (envlist, all_envs)
    }
}

fn random_hashseed() -> String {
    let value = uuid::Uuid::new_v4().as_u128() % MAX_HASHSEED + 1;
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(options: GlobalOptions, env: &[(&str, &str)]) -> ConfigLoader {
        ConfigLoader::new(options)
            .with_process_env(ProcessEnv::from_pairs(env.iter().copied()))
            .with_invocation_dir("/project")
    }

    fn load(ini: &str, options: GlobalOptions, env: &[(&str, &str)]) -> Result<GlobalConfig> {
        let source = IniSource::parse("/project/tox.ini", ini)?;
        loader(options, env).load_source(Path::new("/project/tox.ini"), &source)
    }

    #[test]
    fn global_paths_have_defaults() {
        let config = load("[tox]\n", GlobalOptions::default(), &[]).unwrap();
        assert_eq!(config.config_dir, PathBuf::from("/project"));
        assert_eq!(config.work_dir, PathBuf::from("/project/.tox"));
        assert_eq!(config.dist_dir, PathBuf::from("/project/.tox/dist"));
        assert_eq!(config.log_dir, PathBuf::from("/project/.tox/log"));
        assert_eq!(config.setup_dir, PathBuf::from("/project"));
        assert_eq!(config.sdist_src, None);
    }

    #[test]
    fn workdir_option_overrides_setting() {
        let options = GlobalOptions {
            workdir: Some(PathBuf::from("build")),
            ..Default::default()
        };
        let config = load("[tox]\ntoxworkdir = /elsewhere\n", options, &[]).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/project/build"));
    }

    #[test]
    fn relative_workdir_is_relative_to_config_dir() {
        let options = GlobalOptions {
            workdir: Some(PathBuf::from("w")),
            ..Default::default()
        };
        let source = IniSource::parse("/project/tox.ini", "[tox]\n").unwrap();
        let config = ConfigLoader::new(options)
            .with_process_env(ProcessEnv::default())
            .with_invocation_dir("/project/sub")
            .load_source(Path::new("/project/tox.ini"), &source)
            .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/project/w"));
        assert_eq!(config.dist_dir, PathBuf::from("/project/w/dist"));

        let options = GlobalOptions {
            workdir: Some(PathBuf::from("/abs/work")),
            ..Default::default()
        };
        let config = ConfigLoader::new(options)
            .with_process_env(ProcessEnv::default())
            .with_invocation_dir("/project/sub")
            .load_source(Path::new("/project/tox.ini"), &source)
            .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/abs/work"));
    }

    #[test]
    fn envlist_expands_and_builds() {
        let config = load(
            "[tox]\nenvlist = py{27,36}-django,lint\n[testenv]\ndeps = django: Django\n",
            GlobalOptions::default(),
            &[],
        )
        .unwrap();
        assert_eq!(config.envlist, vec!["py27-django", "py36-django", "lint"]);
        assert!(config.environments.contains_key("lint"));
        assert_eq!(config.selected().count(), 3);
    }

    #[test]
    fn options_take_precedence_over_toxenv() {
        let options = GlobalOptions {
            envs: vec!["py36".to_string()],
            ..Default::default()
        };
        let config = load(
            "[tox]\nenvlist = py27\n",
            options,
            &[("TOXENV", "py35")],
        )
        .unwrap();
        assert_eq!(config.envlist, vec!["py36"]);

        let config = load("[tox]\nenvlist = py27\n", GlobalOptions::default(), &[("TOXENV", "py35")])
            .unwrap();
        assert_eq!(config.envlist, vec!["py35"]);
    }

    #[test]
    fn empty_toxenv_falls_back_to_envlist() {
        let ini = "[tox]\nenvlist = py27,py36\n";
        let config = load(ini, GlobalOptions::default(), &[("TOXENV", "")]).unwrap();
        assert_eq!(config.envlist, vec!["py27", "py36"]);
        assert!(config.environments.contains_key("py27"));

        let config = load(ini, GlobalOptions::default(), &[("TOXENV", "  ")]).unwrap();
        assert_eq!(config.envlist, vec!["py27", "py36"]);
    }

    #[test]
    fn all_selects_every_environment() {
        let ini = "[tox]\nenvlist = py27,ALL\n[testenv:docs]\ncommands = sphinx-build\n";
        let config = load(ini, GlobalOptions::default(), &[]).unwrap();
        assert_eq!(config.envlist, vec!["docs", "py27"]);

        // an explicit selection replaces the configured list entirely
        let options = GlobalOptions {
            envs: vec!["ALL".to_string()],
            ..Default::default()
        };
        let config = load(ini, options, &[]).unwrap();
        assert_eq!(config.envlist, vec!["docs"]);
    }

    #[test]
    fn empty_config_has_python_env() {
        let config = load("[tox]\n", GlobalOptions::default(), &[]).unwrap();
        assert_eq!(config.envlist, vec!["python"]);
        assert!(config.environments.contains_key("python"));
    }

    #[test]
    fn unknown_factor_environments_are_not_built() {
        let options = GlobalOptions {
            envs: vec!["py36-bogus".to_string()],
            ..Default::default()
        };
        let config = load("[tox]\nenvlist = py36\n", options, &[]).unwrap();
        assert_eq!(config.envlist, vec!["py36-bogus"]);
        assert!(!config.environments.contains_key("py36-bogus"));
        assert_eq!(config.selected().count(), 0);
    }

    #[test]
    fn hashseed_handling() {
        let config = load("[tox]\n", GlobalOptions::default(), &[]).unwrap();
        let seed: u64 = config.hashseed.as_deref().unwrap().parse().unwrap();
        assert!(seed >= 1);

        let options = GlobalOptions {
            hashseed: Some("noset".to_string()),
            ..Default::default()
        };
        let config = load("[tox]\n", options, &[]).unwrap();
        assert_eq!(config.hashseed, None);
        assert!(config.environments["python"].setenv().is_empty());
    }

    #[test]
    fn jenkins_section_is_preferred_on_ci() {
        let ini = "[tox]\ndistdir = {toxinidir}/plain\n[tox:jenkins]\ndistdir = {toxinidir}/ci\n";
        let config = load(ini, GlobalOptions::default(), &[("JENKINS_URL", "http://ci")]).unwrap();
        assert_eq!(config.dist_dir, PathBuf::from("/project/ci"));
        assert_eq!(config.dist_share, PathBuf::from("/project/.tox/distshare"));

        let config = load(ini, GlobalOptions::default(), &[]).unwrap();
        assert_eq!(config.dist_dir, PathBuf::from("/project/plain"));
    }

    #[test]
    fn skipsdist_defaults_to_all_develop() {
        let config = load("[tox]\n[testenv]\nusedevelop = true\n", GlobalOptions::default(), &[])
            .unwrap();
        assert!(config.skip_sdist);

        let config = load("[tox]\n", GlobalOptions::default(), &[]).unwrap();
        assert!(!config.skip_sdist);
    }

    #[test]
    fn index_servers_from_config_and_options() {
        let options = GlobalOptions {
            index_urls: vec!["http://mirror/simple".to_string()],
            ..Default::default()
        };
        let config = load(
            "[tox]\nindexserver =\n    local = http://localhost/simple\n",
            options,
            &[],
        )
        .unwrap();
        assert_eq!(
            config.index_servers["default"].url.as_deref(),
            Some("http://mirror/simple")
        );
        assert_eq!(
            config.index_servers["local"].url.as_deref(),
            Some("http://localhost/simple")
        );
    }

    #[test]
    fn first_environment_error_aborts_load() {
        let err = load(
            "[tox]\nenvlist = py36\n[testenv]\ncommands = {[nowhere]x}\n",
            GlobalOptions::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, EnvMatrixError::UndefinedReference { .. }));
    }

    #[test]
    fn setup_cfg_uses_prefixed_sections() {
        let source = IniSource::parse(
            "/project/setup.cfg",
            "[tox:tox]\nenvlist = py36\n[tox:testenv]\ncommands = pytest\n",
        )
        .unwrap();
        let config = loader(GlobalOptions::default(), &[])
            .load_source(Path::new("/project/setup.cfg"), &source)
            .unwrap();
        assert_eq!(config.envlist, vec!["py36"]);
        assert_eq!(
            config.environments["py36"].commands(),
            &[vec!["pytest".to_string()]]
        );
    }

    #[test]
    fn min_version_is_recorded() {
        let config = load("[tox]\nminversion = 2.5\n", GlobalOptions::default(), &[]).unwrap();
        assert_eq!(config.min_version.as_deref(), Some("2.5"));
    }

    #[test]
    fn random_hashseed_in_range() {
        for _ in 0..20 {
            let seed: u128 = random_hashseed().parse().unwrap();
            assert!((1..=MAX_HASHSEED).contains(&seed));
        }
    }
}
