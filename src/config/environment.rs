//! Per-environment configuration.
//!
//! An environment is built by reading every registered attribute, in
//! order, through a [`SectionReader`] over `[testenv:NAME]` that falls back
//! to `[testenv]`. Besides the attributes themselves the reader's namespace
//! gains `{envname}`, each path attribute as it is read, and the derived
//! `{envbindir}`, `{envpython}` and `{envsitepackagesdir}`. The derived
//! entries are computed when a placeholder needs them, so `setenv` can
//! reference `{envbindir}` even though `basepython` is read later.

use regex::Regex;
use serde::Serialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::LazyLock;
use tracing::debug;

use super::attributes::{
    AttrValue, AttributeRegistry, AttributeType, Attributes, PostprocessContext, SharedSettings,
};
use super::factors::FactorSet;
use super::ini::IniSource;
use super::setenv::ProcessEnv;
use super::substitution::{Namespace, SectionReader, Value};
use crate::error::{EnvMatrixError, Result};

/// Section every environment falls back to.
pub const TESTENV_SECTION: &str = "testenv";

/// Prefix of per-environment sections.
pub const TESTENV_PREFIX: &str = "testenv:";

static PYTHON_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"python(\d+)\.(\d+)").unwrap());

/// The resolved configuration of one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub factors: FactorSet,
    #[serde(flatten)]
    attributes: Attributes,
}

impl EnvironmentConfig {
    /// All attributes, in declaration order.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Look up one attribute.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// A boolean attribute, `false` when absent.
    pub fn flag(&self, name: &str) -> bool {
        self.attributes.flag(name)
    }

    pub fn envdir(&self) -> Option<&Path> {
        self.attributes.path("envdir")
    }

    pub fn basepython(&self) -> Option<&str> {
        self.attributes.text("basepython")
    }

    pub fn changedir(&self) -> Option<&Path> {
        self.attributes.path("changedir")
    }

    /// Commands to run, one argument vector each.
    pub fn commands(&self) -> &[Vec<String>] {
        match self.attributes.get("commands") {
            Some(AttrValue::ArgvList(commands)) => commands,
            _ => &[],
        }
    }

    /// Resolved `setenv` values, in definition order.
    pub fn setenv(&self) -> Vec<(String, String)> {
        match self.attributes.get("setenv") {
            Some(AttrValue::EnvMapping(mapping)) => mapping.resolved(),
            _ => Vec::new(),
        }
    }

    /// Directory holding the environment's executables.
    pub fn envbindir(&self) -> Option<PathBuf> {
        Some(bin_dir(self.envdir()?, self.basepython()))
    }

    /// The environment's interpreter.
    pub fn envpython(&self) -> Option<PathBuf> {
        Some(python_path(self.envdir()?, self.basepython()))
    }

    /// The environment's site-packages directory, when the interpreter
    /// version can be read from `basepython`.
    pub fn envsitepackagesdir(&self) -> Option<PathBuf> {
        site_packages_dir(self.envdir()?, self.basepython()?)
    }
}

/// `Scripts` on Windows for CPython, `bin` everywhere else.
pub fn bin_dir(envdir: &Path, basepython: Option<&str>) -> PathBuf {
    let basepython = basepython.unwrap_or("python");
    if cfg!(windows) && !basepython.contains("jython") && !basepython.contains("pypy") {
        envdir.join("Scripts")
    } else {
        envdir.join("bin")
    }
}

/// The interpreter inside an environment.
pub fn python_path(envdir: &Path, basepython: Option<&str>) -> PathBuf {
    let name = match basepython {
        Some(b) if b.contains("jython") => "jython",
        _ => "python",
    };
    bin_dir(envdir, basepython).join(name)
}

/// Site-packages for an interpreter named like `python3.6`.
pub fn site_packages_dir(envdir: &Path, basepython: &str) -> Option<PathBuf> {
    let caps = PYTHON_VERSION_RE.captures(basepython)?;
    if cfg!(windows) {
        return Some(envdir.join("Lib").join("site-packages"));
    }
    let version = format!("python{}.{}", caps.get(1)?.as_str(), caps.get(2)?.as_str());
    Some(envdir.join("lib").join(version).join("site-packages"))
}

/// Inputs shared by every environment of one configuration.
pub(crate) struct EnvironmentBuilder<'a> {
    pub source: &'a IniSource,
    pub process_env: &'a ProcessEnv,
    pub namespace: &'a Namespace,
    pub registry: &'a AttributeRegistry,
    pub settings: SharedSettings<'a>,
    /// Prefix applied to section names, e.g. `tox` for `setup.cfg`.
    pub prefix: Option<&'a str>,
}

impl EnvironmentBuilder<'_> {
    fn section_name(&self, name: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{}:{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// Resolve the environment `name`.
    pub fn build(&self, name: &str) -> Result<EnvironmentConfig> {
        let section = self.section_name(&format!("{}{}", TESTENV_PREFIX, name));
        let factors = FactorSet::from_env_name(name);
        debug!("Building environment {} from [{}]", name, section);

        let mut reader = SectionReader::new(self.source, section.clone(), self.process_env)
            .with_fallbacks(vec![self.section_name(TESTENV_SECTION)])
            .with_factors(factors.clone());
        reader.extend_namespace(self.namespace);
        reader.add_substitution("envname", name);

        let shared = Rc::new(RefCell::new(Attributes::new()));
        register_derived_paths(&mut reader, &shared, &section);

        for declaration in self.registry.iter() {
            let value = declaration.read(&reader)?;
            let value = match declaration.postprocess {
                Some(hook) => {
                    let attributes = shared.borrow();
                    let mut ctx = PostprocessContext {
                        env_name: name,
                        factors: &factors,
                        attributes: &attributes,
                        settings: self.settings,
                        reader: &mut reader,
                    };
                    hook(&mut ctx, value)?
                }
                None => value,
            };

            match (&value, declaration.kind) {
                (AttrValue::EnvMapping(mapping), _) => reader.set_env_mapping(mapping.clone()),
                (AttrValue::Path(path), AttributeType::Path) => {
                    reader.add_substitution(declaration.name.clone(), path.as_path())
                }
                _ => {}
            }
            debug!("{}: {} = {}", name, declaration.name, value);
            shared.borrow_mut().insert(declaration.name.clone(), value);
        }

        // Resolve setenv now that every attribute it may reference is known.
        if let Some(mapping) = reader.env_mapping() {
            mapping.resolve_all(&reader)?;
            let mut attributes = shared.borrow_mut();
            let names: Vec<String> = attributes
                .iter()
                .filter(|(_, v)| matches!(v, AttrValue::EnvMapping(_)))
                .map(|(k, _)| k.to_string())
                .collect();
            for attr in names {
                attributes.insert(attr, AttrValue::EnvMapping(mapping.clone()));
            }
        }

        let attributes = shared.borrow().clone();
        Ok(EnvironmentConfig {
            name: name.to_string(),
            factors,
            attributes,
        })
    }
}

fn register_derived_paths(
    reader: &mut SectionReader<'_>,
    shared: &Rc<RefCell<Attributes>>,
    section: &str,
) {
    let attrs = Rc::clone(shared);
    let section_name = section.to_string();
    reader.add_substitution(
        "envbindir",
        Value::lazy(move || {
            let attrs = attrs.borrow();
            let dir = attrs.path("envdir").ok_or_else(|| missing_envdir(&section_name, "envbindir"))?;
            Ok(bin_dir(dir, attrs.text("basepython")).display().to_string())
        }),
    );

    let attrs = Rc::clone(shared);
    let section_name = section.to_string();
    reader.add_substitution(
        "envpython",
        Value::lazy(move || {
            let attrs = attrs.borrow();
            let dir = attrs.path("envdir").ok_or_else(|| missing_envdir(&section_name, "envpython"))?;
            Ok(python_path(dir, attrs.text("basepython")).display().to_string())
        }),
    );

    let attrs = Rc::clone(shared);
    let section_name = section.to_string();
    reader.add_substitution(
        "envsitepackagesdir",
        Value::lazy(move || {
            let attrs = attrs.borrow();
            let dir = attrs
                .path("envdir")
                .ok_or_else(|| missing_envdir(&section_name, "envsitepackagesdir"))?;
            let basepython = attrs.text("basepython").unwrap_or("python");
            site_packages_dir(dir, basepython)
                .map(|p| p.display().to_string())
                .ok_or_else(|| EnvMatrixError::UndefinedReference {
                    section: section_name.clone(),
                    key: "envsitepackagesdir".to_string(),
                    reference: format!("interpreter version of {:?}", basepython),
                })
        }),
    );
}

fn missing_envdir(section: &str, key: &str) -> EnvMatrixError {
    EnvMatrixError::UndefinedReference {
        section: section.to_string(),
        key: key.to_string(),
        reference: "'envdir'".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::deps::index_servers;
    use crate::config::options::GlobalOptions;

    fn build(source: &IniSource, options: &GlobalOptions, name: &str) -> Result<EnvironmentConfig> {
        let env = ProcessEnv::from_pairs([("HOME", "/home/me")]);
        let mut namespace = Namespace::new();
        namespace.insert("toxinidir", "/project");
        namespace.insert("toxworkdir", "/project/.tox");
        let servers = index_servers(&[], &[]);
        let registry = AttributeRegistry::standard();
        let builder = EnvironmentBuilder {
            source,
            process_env: &env,
            namespace: &namespace,
            registry: &registry,
            settings: SharedSettings {
                options,
                hashseed: Some("42"),
                index_servers: &servers,
                invocation_dir: Path::new("/project"),
            },
            prefix: None,
        };
        builder.build(name)
    }

    #[test]
    fn defaults_chain_through_published_paths() {
        let source = IniSource::from_sections(vec![("testenv", Vec::<(&str, &str)>::new())]);
        let config = build(&source, &GlobalOptions::default(), "py36").unwrap();

        assert_eq!(config.envdir(), Some(Path::new("/project/.tox/py36")));
        assert_eq!(
            config.attributes().path("envtmpdir"),
            Some(Path::new("/project/.tox/py36/tmp"))
        );
        assert_eq!(
            config.attributes().path("envlogdir"),
            Some(Path::new("/project/.tox/py36/log"))
        );
        assert_eq!(config.changedir(), Some(Path::new("/project")));
        assert_eq!(config.basepython(), Some("python3.6"));
    }

    #[test]
    fn setenv_gets_hashseed_and_resolves_references() {
        let source = IniSource::from_sections(vec![(
            "testenv",
            vec![("setenv", "A=1\nB={A}\nC={env:B}\nBIN={envbindir}")],
        )]);
        let config = build(&source, &GlobalOptions::default(), "py36").unwrap();
        let setenv = config.setenv();
        let get = |k: &str| {
            setenv
                .iter()
                .find(|(name, _)| name == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("A").as_deref(), Some("1"));
        assert_eq!(get("B").as_deref(), Some("1"));
        assert_eq!(get("C").as_deref(), Some("1"));
        assert_eq!(get("PYTHONHASHSEED").as_deref(), Some("42"));
        let expected = bin_dir(Path::new("/project/.tox/py36"), Some("python3.6"));
        assert_eq!(get("BIN"), Some(expected.display().to_string()));
    }

    #[test]
    fn commands_see_env_and_paths() {
        let source = IniSource::from_sections(vec![(
            "testenv",
            vec![
                ("setenv", "TARGET=unit"),
                ("commands", "pytest {envtmpdir} {env:TARGET}\necho {env:HOME}"),
            ],
        )]);
        let config = build(&source, &GlobalOptions::default(), "py36").unwrap();
        assert_eq!(
            config.commands(),
            &[
                vec![
                    "pytest".to_string(),
                    "/project/.tox/py36/tmp".to_string(),
                    "unit".to_string()
                ],
                vec!["echo".to_string(), "/home/me".to_string()],
            ]
        );
    }

    #[test]
    fn specific_section_overrides_testenv() {
        let source = IniSource::from_sections(vec![
            ("testenv", vec![("commands", "pytest"), ("skip_install", "false")]),
            ("testenv:lint", vec![("commands", "flake8"), ("skip_install", "true")]),
        ]);
        let options = GlobalOptions::default();
        let lint = build(&source, &options, "lint").unwrap();
        assert_eq!(lint.commands(), &[vec!["flake8".to_string()]]);
        assert!(lint.flag("skip_install"));

        let py = build(&source, &options, "py36").unwrap();
        assert_eq!(py.commands(), &[vec!["pytest".to_string()]]);
        assert!(!py.flag("skip_install"));
    }

    #[test]
    fn posargs_reach_commands() {
        let source = IniSource::from_sections(vec![(
            "testenv",
            vec![("args_are_paths", "false"), ("commands", "pytest {posargs:tests}")],
        )]);
        let options = GlobalOptions {
            posargs: vec!["-x".to_string(), "some file".to_string()],
            ..Default::default()
        };
        let config = build(&source, &options, "py36").unwrap();
        assert_eq!(
            config.commands(),
            &[vec![
                "pytest".to_string(),
                "-x".to_string(),
                "some file".to_string()
            ]]
        );
    }

    #[test]
    fn sitepackages_dir_needs_versioned_interpreter() {
        let source = IniSource::from_sections(vec![(
            "testenv",
            vec![("commands", "echo {envsitepackagesdir}")],
        )]);
        let options = GlobalOptions::default();
        assert!(build(&source, &options, "py36").is_ok());
        let err = build(&source, &options, "lint").unwrap_err();
        assert!(matches!(err, EnvMatrixError::UndefinedReference { .. }));
    }

    #[test]
    fn install_command_without_packages_fails() {
        let source = IniSource::from_sections(vec![(
            "testenv",
            vec![("install_command", "pip install {opts}")],
        )]);
        let err = build(&source, &GlobalOptions::default(), "py36").unwrap_err();
        assert!(matches!(
            err,
            EnvMatrixError::DeclarationConstraintViolation { .. }
        ));
    }

    #[test]
    fn derived_paths() {
        let envdir = Path::new("/e");
        assert_eq!(python_path(envdir, Some("jython")).file_name().unwrap(), "jython");
        assert_eq!(python_path(envdir, Some("python3.6")).file_name().unwrap(), "python");
        assert_eq!(site_packages_dir(envdir, "pypy"), None);
        #[cfg(not(windows))]
        assert_eq!(
            site_packages_dir(envdir, "python3.6"),
            Some(PathBuf::from("/e/lib/python3.6/site-packages"))
        );
    }
}
