//! Dependencies and the package index servers they install from.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// `:name:requirement`, selecting a named index server.
static INDEXED_DEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:(\w+):\s*(\S+)").unwrap());

/// `name=url` in an index URL override.
static NAMED_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\W*(\w+)=(\S+)").unwrap());

/// Leading project name of a requirement, with optional extras and a
/// version or marker clause.
static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(?:[<>=!~;,].*)?$").unwrap()
});

static NAME_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9.]+").unwrap());

/// Name of the index server used when none is selected.
pub const DEFAULT_INDEX: &str = "default";

/// A named package index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexServerConfig {
    pub name: String,
    pub url: Option<String>,
}

impl IndexServerConfig {
    /// Create an index server entry.
    pub fn new(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url,
        }
    }
}

/// Index servers by name. Always contains [`DEFAULT_INDEX`].
pub type IndexServers = BTreeMap<String, IndexServerConfig>;

/// A dependency, optionally pinned to a named index server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepConfig {
    pub name: String,
    pub index_server: Option<IndexServerConfig>,
}

impl fmt::Display for DepConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index_server {
            Some(server) if server.name != DEFAULT_INDEX => {
                write!(f, ":{}:{}", server.name, self.name)
            }
            _ => f.write_str(&self.name),
        }
    }
}

/// Split a `:name:requirement` line into its index name and requirement.
pub fn split_indexed_dep(line: &str) -> Option<(&str, &str)> {
    let caps = INDEXED_DEP_RE.captures(line)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Build the index server table from `name = url` lines and command-line
/// overrides.
///
/// An override of the form `name=url` replaces that server's URL; a bare
/// URL replaces the default server's. `ALL=url` replaces every server.
pub fn index_servers(lines: &[(String, String)], overrides: &[String]) -> IndexServers {
    let mut servers = IndexServers::new();
    servers.insert(
        DEFAULT_INDEX.to_string(),
        IndexServerConfig::new(DEFAULT_INDEX, None),
    );
    for (name, url) in lines {
        servers.insert(
            name.clone(),
            IndexServerConfig::new(name.clone(), Some(url.clone())),
        );
    }

    let mut override_all = None;
    for urldef in overrides {
        let (name, url) = match NAMED_URL_RE.captures(urldef) {
            Some(caps) => (
                caps.get(1).map_or(DEFAULT_INDEX, |m| m.as_str()),
                caps.get(2).map_or("", |m| m.as_str()),
            ),
            None => (DEFAULT_INDEX, urldef.as_str()),
        };
        if name == "ALL" {
            override_all = Some(url.to_string());
            continue;
        }
        servers
            .entry(name.to_string())
            .or_insert_with(|| IndexServerConfig::new(name, None))
            .url = Some(url.to_string());
    }

    if let Some(url) = override_all {
        for server in servers.values_mut() {
            server.url = Some(url.clone());
        }
    }
    servers
}

/// Normalized project name of a requirement, or `None` for things that do
/// not parse as one, such as URLs.
pub fn project_name(requirement: &str) -> Option<String> {
    let caps = REQUIREMENT_RE.captures(requirement)?;
    let name = caps.get(1)?.as_str();
    Some(NAME_SEPARATOR_RE.replace_all(name, "-").into_owned())
}

/// Replace `name` by a forced dependency naming the same project.
pub fn apply_forced_dep(name: &str, forced: &[String]) -> String {
    let Some(project) = project_name(name) else {
        return name.to_string();
    };
    forced
        .iter()
        .find(|dep| project_name(dep).as_deref() == Some(project.as_str()))
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_server_always_exists() {
        let servers = index_servers(&[], &[]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[DEFAULT_INDEX].url, None);
    }

    #[test]
    fn configured_servers_are_added() {
        let servers = index_servers(&lines(&[("local", "http://localhost/simple")]), &[]);
        assert_eq!(
            servers["local"].url.as_deref(),
            Some("http://localhost/simple")
        );
    }

    #[test]
    fn bare_override_sets_default() {
        let servers = index_servers(&[], &["http://mirror/simple".to_string()]);
        assert_eq!(
            servers[DEFAULT_INDEX].url.as_deref(),
            Some("http://mirror/simple")
        );
    }

    #[test]
    fn named_override_sets_that_server() {
        let servers = index_servers(
            &lines(&[("local", "http://localhost/simple")]),
            &["local=http://other/simple".to_string()],
        );
        assert_eq!(servers["local"].url.as_deref(), Some("http://other/simple"));
        assert_eq!(servers[DEFAULT_INDEX].url, None);
    }

    #[test]
    fn all_override_replaces_every_server() {
        let servers = index_servers(
            &lines(&[("local", "http://localhost/simple")]),
            &["ALL=http://proxy/simple".to_string()],
        );
        assert!(servers
            .values()
            .all(|s| s.url.as_deref() == Some("http://proxy/simple")));
    }

    #[test]
    fn indexed_dep_line_is_split() {
        assert_eq!(
            split_indexed_dep(":local: pkg==1.0"),
            Some(("local", "pkg==1.0"))
        );
        assert_eq!(split_indexed_dep("pkg==1.0"), None);
    }

    #[test]
    fn dep_display_hides_default_index() {
        let dep = DepConfig {
            name: "pkg".to_string(),
            index_server: Some(IndexServerConfig::new(DEFAULT_INDEX, None)),
        };
        assert_eq!(dep.to_string(), "pkg");

        let dep = DepConfig {
            name: "pkg".to_string(),
            index_server: Some(IndexServerConfig::new("local", None)),
        };
        assert_eq!(dep.to_string(), ":local:pkg");
    }

    #[test]
    fn project_names_ignore_versions_and_extras() {
        assert_eq!(project_name("Django>=1.7,<1.8").as_deref(), Some("Django"));
        assert_eq!(project_name("requests[security]").as_deref(), Some("requests"));
        assert_eq!(project_name("zope_interface").as_deref(), Some("zope-interface"));
        assert_eq!(project_name("http://example.com/pkg.tar.gz"), None);
    }

    #[test]
    fn forced_dep_replaces_same_project() {
        let forced = vec!["Django==1.8".to_string()];
        assert_eq!(apply_forced_dep("Django>=1.7,<1.8", &forced), "Django==1.8");
        assert_eq!(apply_forced_dep("pytest", &forced), "pytest");
    }
}
