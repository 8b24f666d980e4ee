//! Placeholder substitution over raw section values.
//!
//! # Syntax
//!
//! - `{key}` - value from the reader's namespace, or a cross-section
//!   reference if the key is not defined locally
//! - `{[section]key}` - raw value of `key` in `section`, itself substituted
//! - `{env:NAME}` / `{env:NAME:default}` - environment variable lookup
//! - `{}` - the platform path-list separator
//! - `{opts}` / `{packages}` - kept verbatim for the install command
//! - `\{` / `\}` - literal braces, never open a placeholder
//!
//! # Example
//!
//! ```
//! use envmatrix::config::{IniSource, ProcessEnv, SectionReader};
//!
//! let source = IniSource::from_sections(vec![
//!     ("base", vec![("deps", "pytest")]),
//!     ("testenv", vec![("deps", "{[base]deps}\nmock")]),
//! ]);
//! let env = ProcessEnv::default();
//! let reader = SectionReader::new(&source, "testenv", &env);
//!
//! let deps = reader.get_string("deps", None).unwrap();
//! assert_eq!(deps.as_deref(), Some("pytest\nmock"));
//! ```

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::LazyLock;

use super::factors::{filter_factor_lines, FactorSet};
use super::ini::IniSource;
use super::paths::join_absolute;
use super::setenv::{EnvMapping, ProcessEnv};
use crate::error::{EnvMatrixError, Result};

/// One `{kind:value:default}` placeholder. Only applied where the `{` is
/// not preceded by a backslash.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^\{
        (?:(?P<kind>[^\[:\{\}]+):)?                  # optional kind, e.g. env:
        (?P<value>(?:\[[^,\{\}]*\])?[^:,\{\}]*)      # key or [section]key
        (?::(?P<default>[^\{\}]*))?                  # optional default
        \}",
    )
    .unwrap()
});

/// Platform separator for path lists, produced by `{}`.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
/// Platform separator for path lists, produced by `{}`.
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// Section recorded on the resolution stack while a namespace value is
/// expanded.
const NAMESPACE_FRAME: &str = "<namespace>";

/// A namespace entry.
#[derive(Clone)]
pub enum Value {
    /// A plain string.
    Literal(String),
    /// Produced on every read, e.g. a path derived from attributes that are
    /// resolved later.
    Lazy(Rc<dyn Fn() -> Result<String>>),
}

impl Value {
    /// Wrap a producer as a lazy value.
    pub fn lazy(producer: impl Fn() -> Result<String> + 'static) -> Self {
        Self::Lazy(Rc::new(producer))
    }

    /// Evaluate the value.
    pub fn evaluate(&self) -> Result<String> {
        match self {
            Self::Literal(s) => Ok(s.clone()),
            Self::Lazy(producer) => producer(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl From<&Path> for Value {
    fn from(p: &Path) -> Self {
        Self::Literal(p.display().to_string())
    }
}

/// Names available to bare `{key}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    values: HashMap<String, Value>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or replace a name.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Check whether a name is defined.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Copy every entry of `other` into this namespace.
    pub fn extend(&mut self, other: &Namespace) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

/// How much substitution [`SectionReader`] applies to a value it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitution {
    /// Return the factor-filtered raw text.
    None,
    /// Only splice in `{[section]key}` references.
    CrossOnly,
    /// Resolve every placeholder.
    Full,
}

/// Bookkeeping for one top-level resolution.
///
/// `stack` holds the `(section, key)` values currently being substituted;
/// `env_lookups` the environment mapping entries currently being resolved.
#[derive(Debug, Default)]
pub(crate) struct ResolveState {
    stack: Vec<(String, Option<String>)>,
    env_lookups: Vec<String>,
}

impl ResolveState {
    fn contains(&self, section: &str, key: &str) -> bool {
        self.stack
            .iter()
            .any(|(s, k)| s == section && k.as_deref() == Some(key))
    }

    fn location(&self) -> (String, String) {
        match self.stack.last() {
            Some((section, key)) => (
                section.clone(),
                key.clone().unwrap_or_else(|| "<value>".to_string()),
            ),
            None => (String::new(), String::new()),
        }
    }

    fn chain(&self) -> String {
        self.stack
            .iter()
            .map(|(s, k)| format!("[{}]{}", s, k.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub(crate) fn is_resolving_env(&self, name: &str) -> bool {
        self.env_lookups.iter().any(|n| n == name)
    }

    pub(crate) fn in_env_lookup(&self) -> bool {
        !self.env_lookups.is_empty()
    }

    pub(crate) fn push_env(&mut self, name: &str) {
        self.env_lookups.push(name.to_string());
    }

    pub(crate) fn pop_env(&mut self) {
        self.env_lookups.pop();
    }
}

/// Reads values from one section, with fallback sections, factor filtering
/// and placeholder substitution.
#[derive(Debug)]
pub struct SectionReader<'a> {
    source: &'a IniSource,
    section_name: String,
    fallback_sections: Vec<String>,
    factors: FactorSet,
    namespace: Namespace,
    posargs: Option<Vec<String>>,
    env_mapping: Option<EnvMapping>,
    process_env: &'a ProcessEnv,
}

impl<'a> SectionReader<'a> {
    /// Create a reader over `section_name`.
    pub fn new(
        source: &'a IniSource,
        section_name: impl Into<String>,
        process_env: &'a ProcessEnv,
    ) -> Self {
        Self {
            source,
            section_name: section_name.into(),
            fallback_sections: Vec::new(),
            factors: FactorSet::new(),
            namespace: Namespace::new(),
            posargs: None,
            env_mapping: None,
            process_env,
        }
    }

    /// Sections consulted, in order, when the primary section lacks a key.
    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallback_sections = fallbacks;
        self
    }

    /// Factors used to filter conditional lines.
    pub fn with_factors(mut self, factors: FactorSet) -> Self {
        self.factors = factors;
        self
    }

    /// The primary section name.
    pub fn section_name(&self) -> &str {
        &self.section_name
    }

    /// The factors used to filter conditional lines.
    pub fn factors(&self) -> &FactorSet {
        &self.factors
    }

    /// The ini source being read.
    pub fn source(&self) -> &'a IniSource {
        self.source
    }

    /// The process environment used by `{env:...}` placeholders.
    pub fn process_env(&self) -> &'a ProcessEnv {
        self.process_env
    }

    /// The names available to bare placeholders.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Define a name for later placeholders.
    pub fn add_substitution(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.namespace.insert(key, value);
    }

    /// Copy a whole namespace into this reader.
    pub fn extend_namespace(&mut self, namespace: &Namespace) {
        self.namespace.extend(namespace);
    }

    /// Install positional arguments for `{posargs}` and `[]`.
    pub fn set_posargs(&mut self, posargs: Vec<String>) {
        self.posargs = Some(posargs);
    }

    /// Positional arguments, empty when none were installed.
    pub fn posargs(&self) -> &[String] {
        self.posargs.as_deref().unwrap_or(&[])
    }

    /// Install the environment mapping consulted by `{env:...}`.
    pub fn set_env_mapping(&mut self, mapping: EnvMapping) {
        self.env_mapping = Some(mapping);
    }

    /// The installed environment mapping, if any.
    pub fn env_mapping(&self) -> Option<&EnvMapping> {
        self.env_mapping.as_ref()
    }

    /// Raw, unfiltered value from the primary or a fallback section.
    pub fn raw(&self, name: &str) -> Option<&'a str> {
        std::iter::once(self.section_name.as_str())
            .chain(self.fallback_sections.iter().map(String::as_str))
            .find_map(|section| self.source.get(section, name))
    }

    /// Read a value with the given level of substitution.
    ///
    /// Values found in the file are factor-filtered first; `default` is used
    /// verbatim when no section defines `name`. Both are then substituted.
    pub fn get(
        &self,
        name: &str,
        default: Option<&str>,
        substitution: Substitution,
    ) -> Result<Option<String>> {
        let value = match self.raw(name) {
            Some(raw) => filter_factor_lines(raw, &self.factors),
            None => match default {
                Some(default) => default.to_string(),
                None => return Ok(None),
            },
        };

        let value = match substitution {
            Substitution::None => value,
            Substitution::CrossOnly => self.replace_with(
                &value,
                Some(name),
                None,
                true,
                &mut ResolveState::default(),
            )?,
            Substitution::Full => self.replace_with(
                &value,
                Some(name),
                None,
                false,
                &mut ResolveState::default(),
            )?,
        };
        Ok(Some(value))
    }

    /// Read a fully substituted string.
    pub fn get_string(&self, name: &str, default: Option<&str>) -> Result<Option<String>> {
        self.get(name, default, Substitution::Full)
    }

    /// Read a factor-filtered string without substitution.
    pub fn get_raw_string(&self, name: &str, default: Option<&str>) -> Option<String> {
        self.raw(name)
            .map(|raw| filter_factor_lines(raw, &self.factors))
            .or_else(|| default.map(str::to_string))
    }

    /// Read a path, made absolute against `{toxinidir}`.
    pub fn get_path(&self, name: &str, default: Option<&str>) -> Result<Option<PathBuf>> {
        let Some(path) = self.get_string(name, default)? else {
            return Ok(None);
        };
        let base = match self.namespace.get("toxinidir") {
            Some(value) => value.evaluate()?,
            None => {
                return Err(EnvMatrixError::UndefinedReference {
                    section: self.section_name.clone(),
                    key: name.to_string(),
                    reference: "'toxinidir'".to_string(),
                })
            }
        };
        Ok(Some(join_absolute(Path::new(&base), Path::new(&path))))
    }

    /// Read a boolean. An absent or empty value falls back to `default`.
    pub fn get_bool(&self, name: &str, default: Option<&str>) -> Result<bool> {
        let raw = match self.get_string(name, None)? {
            Some(s) if !s.is_empty() => s,
            _ => match default {
                Some(d) => d.to_string(),
                None => {
                    return Err(EnvMatrixError::UndefinedReference {
                        section: self.section_name.clone(),
                        key: name.to_string(),
                        reference: format!("'{}'", name),
                    })
                }
            },
        };
        parse_bool(&raw).ok_or_else(|| EnvMatrixError::TypeMismatch {
            section: self.section_name.clone(),
            key: name.to_string(),
            value: raw.clone(),
            message: "boolean value needs to be 'True' or 'False'".to_string(),
        })
    }

    /// Read a list split on `sep`, with entries trimmed and empties dropped.
    pub fn get_list(&self, name: &str, sep: char) -> Result<Vec<String>> {
        let Some(value) = self.get_string(name, None)? else {
            return Ok(Vec::new());
        };
        Ok(value
            .split(sep)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Read `KEY=VALUE` lines into an ordered mapping.
    pub fn get_mapping(&self, name: &str) -> Result<Vec<(String, String)>> {
        let value = self.get_string(name, None)?;
        self.parse_mapping(name, value.as_deref())
    }

    /// Read `KEY=VALUE` lines into a lazily resolved environment mapping.
    ///
    /// Only cross-section references are spliced in here; the values keep
    /// their other placeholders until looked up.
    pub fn get_env_mapping(&self, name: &str) -> Result<EnvMapping> {
        let value = self.get(name, None, Substitution::CrossOnly)?;
        let definitions = self.parse_mapping(name, value.as_deref())?;
        Ok(EnvMapping::new(definitions))
    }

    /// Read a command block into argument vectors.
    pub fn get_argv_list(&self, name: &str, default: &str) -> Result<Vec<Vec<String>>> {
        let value = self
            .get(name, Some(default), Substitution::None)?
            .unwrap_or_default();
        super::command::argv_list(self, name, &value)
    }

    /// Read a single command; the first vector of the block.
    pub fn get_argv(&self, name: &str, default: &str) -> Result<Vec<String>> {
        self.get_argv_list(name, default)?
            .into_iter()
            .next()
            .ok_or_else(|| EnvMatrixError::TypeMismatch {
                section: self.section_name.clone(),
                key: name.to_string(),
                value: self.get_raw_string(name, Some(default)).unwrap_or_default(),
                message: "expected a command".to_string(),
            })
    }

    /// Substitute placeholders in `value` as if it were read from this
    /// reader's primary section.
    pub fn replace(&self, value: &str, cross_only: bool) -> Result<String> {
        self.replace_with(value, None, None, cross_only, &mut ResolveState::default())
    }

    pub(crate) fn replace_with(
        &self,
        value: &str,
        key: Option<&str>,
        section: Option<&str>,
        cross_only: bool,
        state: &mut ResolveState,
    ) -> Result<String> {
        if !value.contains('{') {
            return Ok(value.to_string());
        }

        let section = section.unwrap_or(&self.section_name);
        state
            .stack
            .push((section.to_string(), key.map(str::to_string)));
        let result = Replacer {
            reader: self,
            cross_only,
        }
        .replace(value, state);
        state.stack.pop();
        result
    }

    /// Value of an environment variable: the mapping if one is installed,
    /// otherwise the process environment.
    pub(crate) fn environ_value(
        &self,
        name: &str,
        state: &mut ResolveState,
    ) -> Result<Option<String>> {
        match &self.env_mapping {
            Some(mapping) => mapping.lookup(name, self, state),
            None => Ok(self.process_env.get(name).map(str::to_string)),
        }
    }

    fn parse_mapping(&self, name: &str, value: Option<&str>) -> Result<Vec<(String, String)>> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(String, String)> = Vec::new();
        for line in value.lines().filter(|l| !l.trim().is_empty()) {
            let (key, rest) =
                line.split_once('=')
                    .ok_or_else(|| EnvMatrixError::TypeMismatch {
                        section: self.section_name.clone(),
                        key: name.to_string(),
                        value: line.to_string(),
                        message: "expected KEY=VALUE".to_string(),
                    })?;
            let key = key.trim().to_string();
            let rest = rest.trim().to_string();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = rest,
                None => entries.push((key, rest)),
            }
        }
        Ok(entries)
    }
}

/// Parse `true`/`false`, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

struct Placeholder<'t> {
    text: &'t str,
    kind: Option<&'t str>,
    value: &'t str,
    default: Option<&'t str>,
}

impl<'t> Placeholder<'t> {
    fn from_captures(caps: &Captures<'t>) -> Self {
        Self {
            text: caps.get(0).map_or("", |m| m.as_str()),
            kind: caps.name("kind").map(|m| m.as_str()),
            value: caps.name("value").map_or("", |m| m.as_str()),
            default: caps.name("default").map(|m| m.as_str()),
        }
    }

    fn is_empty(&self) -> bool {
        self.kind.is_none() && self.value.is_empty() && self.default.unwrap_or("").is_empty()
    }
}

struct Replacer<'r, 'a> {
    reader: &'r SectionReader<'a>,
    cross_only: bool,
}

impl Replacer<'_, '_> {
    fn replace(&self, value: &str, state: &mut ResolveState) -> Result<String> {
        let mut out = String::with_capacity(value.len());
        let mut pos = 0;

        while let Some(offset) = value[pos..].find('{') {
            let start = pos + offset;
            out.push_str(&value[pos..start]);

            let escaped = value[..start].ends_with('\\');
            let caps = if escaped {
                None
            } else {
                PLACEHOLDER_RE.captures(&value[start..])
            };

            match caps {
                Some(caps) => {
                    let placeholder = Placeholder::from_captures(&caps);
                    out.push_str(&self.substitute(&placeholder, state)?);
                    pos = start + placeholder.text.len();
                }
                None => {
                    out.push('{');
                    pos = start + 1;
                }
            }
        }
        out.push_str(&value[pos..]);
        Ok(out)
    }

    fn substitute(&self, placeholder: &Placeholder<'_>, state: &mut ResolveState) -> Result<String> {
        if self.cross_only {
            if placeholder.value.starts_with('[') {
                return self.from_other_section(placeholder.value, state);
            }
            return Ok(placeholder.text.to_string());
        }

        if placeholder.is_empty() {
            return Ok(PATH_LIST_SEPARATOR.to_string());
        }

        // Expanded by the install step, not here.
        if matches!(placeholder.value, "opts" | "packages") {
            return Ok(format!("{{{}}}", placeholder.value));
        }

        match placeholder.kind {
            Some("env") => self.from_environment(placeholder, state),
            Some(kind) => {
                let (section, key) = state.location();
                Err(EnvMatrixError::MalformedPlaceholder {
                    section,
                    key,
                    text: placeholder.text.to_string(),
                    message: format!("no support for the {} substitution type", kind),
                })
            }
            None => self.from_namespace(placeholder.value, state),
        }
    }

    fn from_environment(
        &self,
        placeholder: &Placeholder<'_>,
        state: &mut ResolveState,
    ) -> Result<String> {
        let name = placeholder.value;
        if name.is_empty() {
            let (section, key) = state.location();
            return Err(EnvMatrixError::MalformedPlaceholder {
                section,
                key,
                text: placeholder.text.to_string(),
                message: "env: requires an environment variable name".to_string(),
            });
        }

        match self.reader.environ_value(name, state)? {
            Some(value) => Ok(value),
            None => match placeholder.default {
                Some(default) => Ok(default.to_string()),
                None => {
                    let (section, key) = state.location();
                    Err(EnvMatrixError::UndefinedReference {
                        section,
                        key,
                        reference: format!("env:'{}' (unknown or recursively defined)", name),
                    })
                }
            },
        }
    }

    fn from_namespace(&self, key: &str, state: &mut ResolveState) -> Result<String> {
        if let Some(value) = self.reader.namespace.get(key) {
            return match value {
                Value::Literal(text) if text.contains('{') => {
                    if state.contains(NAMESPACE_FRAME, key) {
                        let (section, current_key) = state.location();
                        return Err(EnvMatrixError::CyclicReference {
                            section,
                            key: current_key,
                            reference: key.to_string(),
                            chain: state.chain(),
                        });
                    }
                    self.reader
                        .replace_with(text, Some(key), Some(NAMESPACE_FRAME), false, state)
                }
                _ => value.evaluate(),
            };
        }

        // Entries of an environment mapping may refer to each other by name.
        if state.in_env_lookup() {
            if let Some(mapping) = self.reader.env_mapping() {
                if mapping.contains(key) {
                    if let Some(value) = mapping.lookup(key, self.reader, state)? {
                        return Ok(value);
                    }
                }
            }
        }

        self.from_other_section(key, state)
    }

    fn from_other_section(&self, reference: &str, state: &mut ResolveState) -> Result<String> {
        if let Some(rest) = reference.strip_prefix('[') {
            if let Some((section, item)) = rest.split_once(']') {
                if let Some(raw) = self.reader.source.get(section, item) {
                    if state.contains(section, item) {
                        let (current_section, key) = state.location();
                        return Err(EnvMatrixError::CyclicReference {
                            section: current_section,
                            key,
                            reference: reference.to_string(),
                            chain: state.chain(),
                        });
                    }
                    return self.reader.replace_with(
                        raw,
                        Some(item),
                        Some(section),
                        self.cross_only,
                        state,
                    );
                }
            }
        }

        let (section, key) = state.location();
        Err(EnvMatrixError::UndefinedReference {
            section,
            key,
            reference: format!("'{}'", reference),
        })
    }
}
