//! Environment name expansion.
//!
//! An environment expression is a comma-separated list where each segment
//! may contain `{a,b}` groups. Groups expand to the Cartesian product of
//! their variants, leftmost group varying slowest:
//!
//! ```
//! use envmatrix::config::expand_env_expr;
//!
//! let names = expand_env_expr("py{27,36}-{dj16,dj17},lint");
//! assert_eq!(
//!     names,
//!     vec!["py27-dj16", "py27-dj17", "py36-dj16", "py36-dj17", "lint"]
//! );
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Splits on commas outside of brace groups. A run of adjacent groups is
/// matched as a unit so its commas are never split points.
static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\{[^}]+\})+|,").unwrap());

static GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").unwrap());

/// Expand an environment expression into the names it denotes.
///
/// Segment order and duplicates are preserved. Segments that are empty
/// after trimming are dropped.
pub fn expand_env_expr(expr: &str) -> Vec<String> {
    split_segments(expr)
        .iter()
        .flat_map(|segment| expand_segment(segment))
        .collect()
}

/// Expand a list of environment expressions, as given by repeated `-e`
/// flags or a multi-line `envlist` value.
///
/// Newlines inside a single expression act as commas.
pub fn split_env_list<S: AsRef<str>>(exprs: &[S]) -> Vec<String> {
    exprs
        .iter()
        .flat_map(|expr| expand_env_expr(&expr.as_ref().replace('\n', ",")))
        .collect()
}

fn split_segments(expr: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut last = 0;

    for m in SEGMENT_RE.find_iter(expr) {
        current.push_str(&expr[last..m.start()]);
        if m.as_str() == "," {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push_str(m.as_str());
        }
        last = m.end();
    }
    current.push_str(&expr[last..]);
    segments.push(current);

    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn expand_segment(segment: &str) -> Vec<String> {
    let mut positions: Vec<Vec<&str>> = Vec::new();
    let mut last = 0;

    for caps in GROUP_RE.captures_iter(segment) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        positions.push(vec![&segment[last..whole.start()]]);
        positions.push(inner.as_str().split(',').collect());
        last = whole.end();
    }
    positions.push(vec![&segment[last..]]);

    positions.iter().fold(vec![String::new()], |acc, choices| {
        acc.iter()
            .flat_map(|prefix| choices.iter().map(move |choice| format!("{prefix}{choice}")))
            .collect()
    })
}
