//! Declared per-environment attributes.
//!
//! Every environment is built by reading a fixed, ordered list of
//! [`AttributeDeclaration`]s. Each declaration names a key, its
//! [`AttributeType`], a default template and an optional postprocess hook.
//! Attributes are read in declaration order and path attributes are
//! published as placeholders as soon as they are known, so later defaults
//! such as `{envdir}/tmp` can build on earlier ones.
//!
//! Additional declarations can be appended to a registry before loading:
//!
//! ```
//! use envmatrix::config::{AttributeDeclaration, AttributeRegistry, AttributeType};
//!
//! let mut registry = AttributeRegistry::standard();
//! registry.declare(
//!     AttributeDeclaration::new("coverage_dir", AttributeType::Path)
//!         .with_default("{envdir}/coverage")
//!         .with_help("where coverage data is written"),
//! );
//! assert!(registry.get("coverage_dir").is_some());
//! ```

use regex::Regex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::command::join_args;
use super::deps::{apply_forced_dep, split_indexed_dep, DepConfig, IndexServers};
use super::factors::{default_interpreter, FactorSet};
use super::options::GlobalOptions;
use super::paths::{join_absolute, relative_to};
use super::setenv::EnvMapping;
use super::substitution::SectionReader;
use crate::error::{EnvMatrixError, Result};

/// Variables always passed through to commands.
#[cfg(not(windows))]
const BASE_PASSENV: &[&str] = &["PATH", "PIP_INDEX_URL", "LANG", "LD_LIBRARY_PATH", "TMPDIR"];
#[cfg(windows)]
const BASE_PASSENV: &[&str] = &[
    "PATH",
    "PIP_INDEX_URL",
    "LANG",
    "LD_LIBRARY_PATH",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "PATHEXT",
    "COMSPEC",
    "TEMP",
    "TMP",
];

/// The ways a raw value can be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Bool,
    Path,
    String,
    Mapping,
    EnvMapping,
    Argv,
    ArgvList,
    /// One entry per line.
    LineList,
    /// Entries separated by spaces.
    SpaceList,
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Not configured and no default.
    Unset,
    Bool(bool),
    Text(String),
    Path(PathBuf),
    Mapping(#[serde(serialize_with = "serialize_pairs")] Vec<(String, String)>),
    EnvMapping(EnvMapping),
    Argv(Vec<String>),
    ArgvList(Vec<Vec<String>>),
    List(Vec<String>),
    Deps(Vec<DepConfig>),
}

impl AttrValue {
    /// The boolean value, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The text value, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The path value, if this is one.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    /// The list value, if this is one.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Renders the value the way it would be written in the ini file: one
/// entry per line for lists and mappings, commands re-quoted.
impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = match self {
            Self::Unset => return Ok(()),
            Self::Bool(b) => return write!(f, "{}", b),
            Self::Text(s) => return f.write_str(s),
            Self::Path(p) => return write!(f, "{}", p.display()),
            Self::Mapping(pairs) => pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
            Self::EnvMapping(mapping) => mapping
                .resolved()
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            Self::Argv(argv) => return f.write_str(&join_args(argv)),
            Self::ArgvList(commands) => commands.iter().map(|argv| join_args(argv)).collect(),
            Self::List(items) => items.clone(),
            Self::Deps(deps) => deps.iter().map(ToString::to_string).collect(),
        };
        f.write_str(&lines.join("\n"))
    }
}

fn serialize_pairs<S: Serializer>(
    pairs: &[(String, String)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (k, v) in pairs {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

/// Resolved attributes of one environment, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: Vec<(String, AttrValue)>,
}

impl Attributes {
    /// Create an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Set an attribute, replacing an earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: AttrValue) {
        let name = name.into();
        match self.values.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.values.push((name, value)),
        }
    }

    /// Iterate attributes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A boolean attribute, `false` when absent.
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(AttrValue::as_bool).unwrap_or(false)
    }

    /// A path attribute.
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.get(name).and_then(AttrValue::as_path)
    }

    /// A text attribute.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_str)
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (k, v) in &self.values {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Global settings visible to postprocess hooks.
#[derive(Debug, Clone, Copy)]
pub struct SharedSettings<'a> {
    pub options: &'a GlobalOptions,
    pub hashseed: Option<&'a str>,
    pub index_servers: &'a IndexServers,
    pub invocation_dir: &'a Path,
}

/// Everything a postprocess hook may consult.
pub struct PostprocessContext<'r, 'a> {
    pub env_name: &'r str,
    pub factors: &'r FactorSet,
    /// Attributes declared before this one.
    pub attributes: &'r Attributes,
    pub settings: SharedSettings<'r>,
    pub reader: &'r mut SectionReader<'a>,
}

impl PostprocessContext<'_, '_> {
    fn violation(&self, key: &str, message: impl Into<String>) -> EnvMatrixError {
        EnvMatrixError::DeclarationConstraintViolation {
            section: self.reader.section_name().to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Transforms a parsed value, or rejects it.
pub type Postprocess = fn(&mut PostprocessContext<'_, '_>, AttrValue) -> Result<AttrValue>;

/// One attribute every environment carries.
#[derive(Debug, Clone)]
pub struct AttributeDeclaration {
    pub name: String,
    pub kind: AttributeType,
    /// Raw default, substituted like a configured value.
    pub default: Option<String>,
    pub help: String,
    pub postprocess: Option<Postprocess>,
}

impl AttributeDeclaration {
    /// Declare an attribute with no default, help or hook.
    pub fn new(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            help: String::new(),
            postprocess: None,
        }
    }

    /// Set the default template.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set the help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Set the postprocess hook.
    pub fn with_postprocess(mut self, hook: Postprocess) -> Self {
        self.postprocess = Some(hook);
        self
    }

    /// Read and parse this attribute from `reader`.
    pub fn read(&self, reader: &SectionReader<'_>) -> Result<AttrValue> {
        let name = self.name.as_str();
        let default = self.default.as_deref();
        Ok(match self.kind {
            AttributeType::Bool => AttrValue::Bool(reader.get_bool(name, default)?),
            AttributeType::Path => reader
                .get_path(name, default)?
                .map_or(AttrValue::Unset, AttrValue::Path),
            AttributeType::String => reader
                .get_string(name, default)?
                .map_or(AttrValue::Unset, AttrValue::Text),
            AttributeType::Mapping => AttrValue::Mapping(reader.get_mapping(name)?),
            AttributeType::EnvMapping => AttrValue::EnvMapping(reader.get_env_mapping(name)?),
            AttributeType::Argv => AttrValue::Argv(reader.get_argv(name, default.unwrap_or(""))?),
            AttributeType::ArgvList => {
                AttrValue::ArgvList(reader.get_argv_list(name, default.unwrap_or(""))?)
            }
            AttributeType::LineList => AttrValue::List(reader.get_list(name, '\n')?),
            AttributeType::SpaceList => AttrValue::List(reader.get_list(name, ' ')?),
        })
    }
}

/// The ordered attribute declarations used to build environments.
#[derive(Debug, Clone, Default)]
pub struct AttributeRegistry {
    declarations: Vec<AttributeDeclaration>,
}

impl AttributeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in attributes, in reading order.
    pub fn standard() -> Self {
        use AttributeType as T;
        let declarations = vec![
            AttributeDeclaration::new("envdir", T::Path)
                .with_default("{toxworkdir}/{envname}")
                .with_help("venv directory; removed when recreating the environment"),
            AttributeDeclaration::new("setenv", T::EnvMapping)
                .with_help("list of X=Y lines with environment variable settings")
                .with_postprocess(inject_hashseed),
            AttributeDeclaration::new("basepython", T::String)
                .with_help("executable name or path of the interpreter used to create the environment")
                .with_postprocess(default_basepython),
            AttributeDeclaration::new("envtmpdir", T::Path)
                .with_default("{envdir}/tmp")
                .with_help("venv temporary directory"),
            AttributeDeclaration::new("envlogdir", T::Path)
                .with_default("{envdir}/log")
                .with_help("venv log directory"),
            AttributeDeclaration::new("changedir", T::Path)
                .with_default("{toxinidir}")
                .with_help("directory to change to when running commands"),
            AttributeDeclaration::new("args_are_paths", T::Bool)
                .with_default("true")
                .with_help("treat positional args in commands as paths")
                .with_postprocess(install_posargs),
            AttributeDeclaration::new("skip_install", T::Bool)
                .with_default("false")
                .with_help("do not install the current package"),
            AttributeDeclaration::new("ignore_errors", T::Bool)
                .with_default("false")
                .with_help("run all commands irrespective of their exit status"),
            AttributeDeclaration::new("recreate", T::Bool)
                .with_default("false")
                .with_help("always recreate this test environment")
                .with_postprocess(force_recreate),
            AttributeDeclaration::new("passenv", T::LineList)
                .with_help("environment variables passed through from the invocation environment")
                .with_postprocess(expand_passenv),
            AttributeDeclaration::new("whitelist_externals", T::LineList)
                .with_help("paths or basenames of commands allowed from outside the environment"),
            AttributeDeclaration::new("platform", T::String)
                .with_default(".*")
                .with_help("regular expression the platform must match, otherwise the env is skipped"),
            AttributeDeclaration::new("sitepackages", T::Bool)
                .with_default("false")
                .with_help("give the environment access to globally installed packages")
                .with_postprocess(force_sitepackages),
            AttributeDeclaration::new("alwayscopy", T::Bool)
                .with_default("false")
                .with_help("always copy files rather than symlinking")
                .with_postprocess(force_alwayscopy),
            AttributeDeclaration::new("pip_pre", T::Bool)
                .with_default("false")
                .with_help("add --pre to the install command options")
                .with_postprocess(force_pip_pre),
            AttributeDeclaration::new("usedevelop", T::Bool)
                .with_default("false")
                .with_help("install the package in develop mode")
                .with_postprocess(resolve_develop),
            AttributeDeclaration::new("install_command", T::Argv)
                .with_default("pip install {opts} {packages}")
                .with_help("install command for dependencies and the package under test")
                .with_postprocess(require_packages_placeholder),
            AttributeDeclaration::new("list_dependencies_command", T::Argv)
                .with_default("pip freeze")
                .with_help("list dependencies for a virtual environment"),
            AttributeDeclaration::new("deps", T::LineList)
                .with_help("each line specifies a dependency in pip format")
                .with_postprocess(parse_deps),
            AttributeDeclaration::new("commands", T::ArgvList)
                .with_default("")
                .with_help("each line specifies a test command and can use substitution"),
            AttributeDeclaration::new("ignore_outcome", T::Bool)
                .with_default("false")
                .with_help("a failing result of this env only produces a warning"),
            AttributeDeclaration::new("extras", T::LineList)
                .with_help("extras to install with the package"),
        ];
        Self { declarations }
    }

    /// Append a declaration; it is read after all existing ones.
    pub fn declare(&mut self, declaration: AttributeDeclaration) {
        self.declarations.push(declaration);
    }

    /// Look up a declaration by name.
    pub fn get(&self, name: &str) -> Option<&AttributeDeclaration> {
        self.declarations.iter().find(|d| d.name == name)
    }

    /// Iterate declarations in reading order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeDeclaration> {
        self.declarations.iter()
    }

    /// Number of declarations.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

fn inject_hashseed(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    let AttrValue::EnvMapping(mut mapping) = value else {
        return Ok(value);
    };
    if let Some(seed) = ctx.settings.hashseed {
        if !mapping.contains("PYTHONHASHSEED") {
            mapping.insert("PYTHONHASHSEED", seed);
        }
    }
    Ok(AttrValue::EnvMapping(mapping))
}

fn default_basepython(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    if value != AttrValue::Unset {
        return Ok(value);
    }
    let interpreter = ctx
        .env_name
        .split('-')
        .find_map(default_interpreter)
        .unwrap_or("python");
    Ok(AttrValue::Text(interpreter.to_string()))
}

fn install_posargs(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    let args = &ctx.settings.options.posargs;
    if args.is_empty() {
        return Ok(value);
    }

    let args = if value.as_bool() == Some(true) {
        let changedir = ctx
            .attributes
            .path("changedir")
            .unwrap_or(ctx.settings.invocation_dir);
        args.iter()
            .map(|arg| {
                if arg.is_empty() {
                    return arg.clone();
                }
                let original = join_absolute(ctx.settings.invocation_dir, Path::new(arg));
                if original.exists() {
                    relative_to(changedir, &original).display().to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    } else {
        args.clone()
    };
    ctx.reader.set_posargs(args);
    Ok(value)
}

fn force_recreate(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    Ok(override_flag(value, ctx.settings.options.recreate))
}

fn force_sitepackages(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    Ok(override_flag(value, ctx.settings.options.sitepackages))
}

fn force_alwayscopy(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    Ok(override_flag(value, ctx.settings.options.alwayscopy))
}

fn force_pip_pre(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    Ok(override_flag(value, ctx.settings.options.pre))
}

fn override_flag(value: AttrValue, forced: bool) -> AttrValue {
    if forced {
        AttrValue::Bool(true)
    } else {
        value
    }
}

fn resolve_develop(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    let options = ctx.settings.options;
    let configured = value.as_bool().unwrap_or(false);
    if configured && options.installpkg.is_some() {
        warn!("{}: usedevelop ignored, installing the given package", ctx.env_name);
    }
    Ok(AttrValue::Bool(
        options.installpkg.is_none() && (configured || options.develop),
    ))
}

fn expand_passenv(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    let mut patterns: Vec<String> = value
        .as_list()
        .unwrap_or_default()
        .iter()
        .flat_map(|line| line.split(' '))
        .map(str::to_string)
        .collect();

    let process_env = ctx.reader.process_env();
    if let Some(extra) = process_env.get("TOX_TESTENV_PASSENV") {
        patterns.extend(extra.split_whitespace().map(str::to_string));
    }

    let mut names: BTreeSet<String> = BASE_PASSENV.iter().map(|s| s.to_string()).collect();
    for pattern in patterns.iter().filter(|p| !p.is_empty()) {
        let Some(re) = glob_to_regex(&pattern.to_uppercase()) else {
            continue;
        };
        names.extend(
            process_env
                .names()
                .filter(|name| re.is_match(&name.to_uppercase()))
                .map(str::to_string),
        );
    }
    Ok(AttrValue::List(names.into_iter().collect()))
}

fn require_packages_placeholder(
    ctx: &mut PostprocessContext<'_, '_>,
    value: AttrValue,
) -> Result<AttrValue> {
    let has_packages = match &value {
        AttrValue::Argv(argv) => argv.iter().any(|arg| arg == "{packages}"),
        _ => false,
    };
    if has_packages {
        Ok(value)
    } else {
        Err(ctx.violation(
            "install_command",
            "'install_command' must contain '{packages}' substitution",
        ))
    }
}

fn parse_deps(ctx: &mut PostprocessContext<'_, '_>, value: AttrValue) -> Result<AttrValue> {
    let forced = &ctx.settings.options.force_deps;
    let mut deps = Vec::new();
    for line in value.as_list().unwrap_or_default() {
        let (name, index_server) = match split_indexed_dep(line) {
            Some((index, name)) => {
                let server = ctx.settings.index_servers.get(index).cloned().ok_or_else(|| {
                    EnvMatrixError::UndefinedReference {
                        section: ctx.reader.section_name().to_string(),
                        key: "deps".to_string(),
                        reference: format!("indexserver '{}'", index),
                    }
                })?;
                (name, Some(server))
            }
            None => (line.trim(), None),
        };
        deps.push(DepConfig {
            name: apply_forced_dep(name, forced),
            index_server,
        });
    }
    Ok(AttrValue::Deps(deps))
}

/// Translate a shell glob into an anchored regex. `None` for patterns that
/// produce an invalid expression.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // `]` right after `[` or `[!` belongs to the set
                let mut j = i + 1;
                if chars.get(j) == Some(&'!') {
                    j += 1;
                }
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str("\\[");
                } else {
                    let set: String = chars[i + 1..j].iter().collect();
                    let set = match set.strip_prefix('!') {
                        Some(rest) => format!("^{}", rest),
                        None => set,
                    };
                    out.push('[');
                    out.push_str(&set.replace('\\', "\\\\").replace('[', "\\["));
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out).ok()
}
