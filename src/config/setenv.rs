//! Environment variables seen by placeholders.
//!
//! [`ProcessEnv`] is a snapshot of the process environment. [`EnvMapping`]
//! holds an environment's `setenv` definitions; each value is substituted
//! the first time it is looked up, and names it does not define fall
//! through to the process environment.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cell::RefCell;
use std::collections::HashMap;

use super::substitution::{ResolveState, SectionReader};
use crate::error::Result;

/// A snapshot of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEnv {
    vars: HashMap<String, String>,
}

impl ProcessEnv {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    /// Build an environment from explicit pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Check whether a variable is set.
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Iterate variable names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Set a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

/// Ordered `NAME=value` definitions resolved on first lookup.
///
/// Resolved values are cached, so later lookups never re-run substitution.
/// While a name is being resolved, a lookup of that same name yields the
/// process environment value instead, which lets `PATH={env:PATH}:/extra`
/// extend the inherited variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvMapping {
    definitions: Vec<(String, String)>,
    resolved: RefCell<HashMap<String, String>>,
}

impl EnvMapping {
    /// Wrap raw definitions. Later duplicates should already be merged.
    pub fn new(definitions: Vec<(String, String)>) -> Self {
        Self {
            definitions,
            resolved: RefCell::new(HashMap::new()),
        }
    }

    /// Check whether a name is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.definition(name).is_some()
    }

    /// The unresolved definition of a name.
    pub fn definition(&self, name: &str) -> Option<&str> {
        self.definitions
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Defined names, in definition order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|(k, _)| k.as_str())
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if there are no definitions.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Define a name with an already final value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        self.resolved.borrow_mut().insert(name.clone(), value.clone());
        match self.definitions.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.definitions.push((name, value)),
        }
    }

    /// Look up a name, resolving its definition against `reader`.
    pub fn get(&self, name: &str, reader: &SectionReader<'_>) -> Result<Option<String>> {
        self.lookup(name, reader, &mut ResolveState::default())
    }

    /// Resolve every definition, returning them in definition order.
    pub fn resolve_all(&self, reader: &SectionReader<'_>) -> Result<Vec<(String, String)>> {
        self.definitions
            .iter()
            .map(|(name, _)| {
                let value = self.get(name, reader)?.unwrap_or_default();
                Ok((name.clone(), value))
            })
            .collect()
    }

    /// Values resolved so far, in definition order.
    pub fn resolved(&self) -> Vec<(String, String)> {
        let cache = self.resolved.borrow();
        self.definitions
            .iter()
            .filter_map(|(name, _)| cache.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    pub(crate) fn lookup(
        &self,
        name: &str,
        reader: &SectionReader<'_>,
        state: &mut ResolveState,
    ) -> Result<Option<String>> {
        if let Some(value) = self.resolved.borrow().get(name) {
            return Ok(Some(value.clone()));
        }

        let definition = match self.definition(name) {
            Some(def) if !state.is_resolving_env(name) => def,
            _ => return Ok(reader.process_env().get(name).map(str::to_string)),
        };

        state.push_env(name);
        let value = reader.replace_with(definition, Some("setenv"), None, false, state);
        state.pop_env();
        let value = value?;

        self.resolved
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Ok(Some(value))
    }
}

impl Serialize for EnvMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let resolved = self.resolved();
        let mut map = serializer.serialize_map(Some(resolved.len()))?;
        for (name, value) in &resolved {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
