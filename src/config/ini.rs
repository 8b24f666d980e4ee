//! Ini file tokenizing.
//!
//! Turns an ini file into named sections of raw, possibly multi-line
//! string values. Nothing here interprets values: placeholders, factor
//! prefixes and command continuations are all left for the resolver.
//!
//! # Supported Format
//!
//! - Section headers: `[name]`
//! - Entries: `key = value` or `key: value`
//! - Continuation: any indented line extends the previous value
//! - Comments: lines starting with `#` or `;`
//!
//! # Example
//!
//! ```
//! use envmatrix::config::IniSource;
//!
//! let source = IniSource::parse("tox.ini", r#"
//! [testenv]
//! deps =
//!     pytest
//!     mock
//! "#).unwrap();
//!
//! assert_eq!(source.get("testenv", "deps"), Some("pytest\nmock"));
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EnvMatrixError, Result};

const COMMENT_CHARS: [char; 2] = ['#', ';'];

/// A named section holding raw entries in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    /// Create an empty section.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// The section name, without brackets.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a raw value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Check whether the section defines a key.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set a raw value, replacing any existing one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// The parsed contents of one ini file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniSource {
    path: PathBuf,
    sections: Vec<IniSection>,
}

enum Line<'a> {
    Section(&'a str),
    Entry(&'a str, &'a str),
    Continuation(&'a str),
}

impl IniSource {
    /// Read and parse an ini file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EnvMatrixError::ConfigNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                EnvMatrixError::Io(e)
            }
        })?;
        Self::parse(path, &content)
    }

    /// Parse ini text. `path` is only used for error reporting.
    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Self> {
        let path = path.into();
        let mut source = Self {
            path,
            sections: Vec::new(),
        };
        // Name of the value the next continuation line extends.
        let mut open_key: Option<String> = None;

        for (index, raw) in content.lines().enumerate() {
            let lineno = index + 1;
            let Some(line) = classify(&source.path, raw, lineno)? else {
                continue;
            };

            match line {
                Line::Section(name) => {
                    if name.is_empty() {
                        return Err(parse_error(&source.path, lineno, "empty section name"));
                    }
                    if source.has_section(name) {
                        let message = format!("duplicate section {:?}", name);
                        return Err(parse_error(&source.path, lineno, &message));
                    }
                    source.sections.push(IniSection::new(name));
                    open_key = None;
                }
                Line::Entry(key, value) => {
                    let Some(section) = source.sections.last_mut() else {
                        let message = "no section header defined";
                        return Err(parse_error(&source.path, lineno, message));
                    };
                    if section.contains(key) {
                        let message = format!("duplicate name {:?}", key);
                        return Err(parse_error(&source.path, lineno, &message));
                    }
                    section.set(key, value);
                    open_key = Some(key.to_string());
                }
                Line::Continuation(data) => {
                    let (Some(key), Some(section)) = (&open_key, source.sections.last_mut())
                    else {
                        let message = "unexpected value continuation";
                        return Err(parse_error(&source.path, lineno, message));
                    };
                    let previous = section.get(key).unwrap_or_default();
                    let joined = if previous.is_empty() {
                        data.to_string()
                    } else {
                        format!("{}\n{}", previous, data)
                    };
                    section.set(key.clone(), joined);
                }
            }
        }

        Ok(source)
    }

    /// Build a source directly from section/entry pairs.
    pub fn from_sections<S, K, V>(sections: impl IntoIterator<Item = (S, Vec<(K, V)>)>) -> Self
    where
        S: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        let sections = sections
            .into_iter()
            .map(|(name, entries)| {
                let mut section = IniSection::new(name);
                for (k, v) in entries {
                    section.set(k, v);
                }
                section
            })
            .collect();
        Self {
            path: PathBuf::new(),
            sections,
        }
    }

    /// Path of the file this source was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether a section exists.
    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Look up a section by name.
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Look up a raw value in a section.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key)
    }

    /// Iterate sections in file order.
    pub fn sections(&self) -> impl Iterator<Item = &IniSection> {
        self.sections.iter()
    }
}

fn classify<'a>(path: &Path, raw: &'a str, lineno: usize) -> Result<Option<Line<'a>>> {
    if raw.trim_start().starts_with(COMMENT_CHARS) {
        return Ok(None);
    }
    let line = raw.trim_end();
    let Some(first) = line.chars().next() else {
        return Ok(None);
    };

    if first == '[' {
        let header = line
            .split(COMMENT_CHARS)
            .next()
            .unwrap_or_default()
            .trim_end();
        return match header.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(name) => Ok(Some(Line::Section(name))),
            None => Err(parse_error(path, lineno, &format!("unexpected line: {:?}", line))),
        };
    }

    if first.is_whitespace() {
        return Ok(Some(Line::Continuation(line.trim())));
    }

    let split = match line.split_once('=') {
        Some((name, value)) if !name.contains(':') => Some((name, value)),
        _ => line.split_once(':'),
    };
    match split {
        Some((name, value)) => Ok(Some(Line::Entry(name.trim(), value.trim()))),
        None => Err(parse_error(path, lineno, &format!("unexpected line: {:?}", line))),
    }
}

fn parse_error(path: &Path, line: usize, message: &str) -> EnvMatrixError {
    EnvMatrixError::ConfigParseError {
        path: path.to_path_buf(),
        line,
        message: message.to_string(),
    }
}
