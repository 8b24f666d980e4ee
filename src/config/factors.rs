//! Factors and factor-conditional configuration lines.
//!
//! An environment name such as `py36-django17` is made of the factors
//! `py36` and `django17`. Configuration lines may be prefixed with a factor
//! expression and are only kept for environments whose factors match:
//!
//! ```ini
//! deps =
//!     py27,py36: mock
//!     django17: Django>=1.7,<1.8
//!     pytest
//! ```

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::envlist::expand_env_expr;
use super::ini::IniSource;

/// A `<factor-expr>:<whitespace><content>` line.
static FACTOR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w{}\.,-]+):\s+(.+)").unwrap());

/// Same prefix, scanned across a whole multi-line value.
static FACTOR_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([\w{}\.,-]+):\s+").unwrap());

/// Interpreter executables implied by well-known factors.
///
/// Consulted when an environment does not set `basepython`, and as part of
/// the factors every configuration knows about.
pub const DEFAULT_FACTORS: &[(&str, &str)] = &[
    ("jython", "jython"),
    ("pypy", "pypy"),
    ("pypy3", "pypy3"),
    ("py", "python"),
    ("py2", "python2"),
    ("py3", "python3"),
    ("py26", "python2.6"),
    ("py27", "python2.7"),
    ("py32", "python3.2"),
    ("py33", "python3.3"),
    ("py34", "python3.4"),
    ("py35", "python3.5"),
    ("py36", "python3.6"),
    ("py37", "python3.7"),
];

/// Look up the interpreter a factor implies, if any.
pub fn default_interpreter(factor: &str) -> Option<&'static str> {
    DEFAULT_FACTORS
        .iter()
        .find(|(name, _)| *name == factor)
        .map(|(_, exe)| *exe)
}

/// The set of factors making up an environment name.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct FactorSet(BTreeSet<String>);

impl FactorSet {
    /// Create an empty factor set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the factors of an environment name by splitting on `-`.
    pub fn from_env_name(name: &str) -> Self {
        Self(name.split('-').map(str::to_string).collect())
    }

    /// Check whether a factor is present.
    pub fn contains(&self, factor: &str) -> bool {
        self.0.contains(factor)
    }

    /// Add a factor.
    pub fn insert(&mut self, factor: impl Into<String>) {
        self.0.insert(factor.into());
    }

    /// Merge another set into this one.
    pub fn extend(&mut self, other: &FactorSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Check whether every factor of `self` is in `other`.
    pub fn is_subset(&self, other: &FactorSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Iterate factors in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of factors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for FactorSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Expand a factor expression into its alternatives.
///
/// `py27,py36-django` yields `{py27}` and `{py36, django}`.
pub fn split_factor_expr(expr: &str) -> Vec<FactorSet> {
    expand_env_expr(expr)
        .iter()
        .map(|env| FactorSet::from_env_name(env))
        .collect()
}

/// Check whether a factor expression matches a set of factors.
///
/// Alternatives are OR-ed; the factors within one alternative are AND-ed.
pub fn matches(expr: &str, factors: &FactorSet) -> bool {
    split_factor_expr(expr)
        .iter()
        .any(|alternative| alternative.is_subset(factors))
}

/// Apply factor-conditional line filtering to a raw value.
///
/// Conditional lines are kept (with their prefix stripped) when their
/// expression matches `factors` and dropped otherwise. Unconditional lines
/// are kept verbatim; blank lines are dropped.
pub fn filter_factor_lines(value: &str, factors: &FactorSet) -> String {
    value
        .trim()
        .lines()
        .filter_map(|line| match FACTOR_LINE_RE.captures(line) {
            None => Some(line),
            Some(caps) => {
                let expr = caps.get(1).map_or("", |m| m.as_str());
                let content = caps.get(2).map_or("", |m| m.as_str());
                matches(expr, factors).then_some(content)
            }
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collect every factor named by conditional lines in a section.
pub fn section_factors(source: &IniSource, section: &str) -> FactorSet {
    let mut factors = FactorSet::new();
    let Some(section) = source.section(section) else {
        return factors;
    };
    for (_, value) in section.entries() {
        for caps in FACTOR_PREFIX_RE.captures_iter(value) {
            let Some(expr) = caps.get(1) else { continue };
            for alternative in split_factor_expr(expr.as_str()) {
                factors.extend(&alternative);
            }
        }
    }
    factors
}
