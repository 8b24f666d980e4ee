//! Command blocks to argument vectors.
//!
//! A command block is a multi-line value. Each non-empty line is one
//! command, except that a line ending in `\` continues onto the next one.
//! A line consisting only of a `{[section]key}` reference is replaced by
//! the commands of the referenced block.
//!
//! Each command is tokenized into words that keep `{...}` groups intact,
//! the words are substituted, and the result is split shell-style into the
//! final arguments.
//!
//! ```
//! use envmatrix::config::{split_words, shell_split};
//!
//! assert_eq!(split_words("pytest {posargs:tests}"), vec!["pytest", " ", "{posargs:tests}"]);
//! assert_eq!(
//!     shell_split("echo 'a b' c").unwrap(),
//!     vec!["echo", "a b", "c"]
//! );
//! ```

use regex::Regex;
use std::sync::LazyLock;

use super::substitution::{ResolveState, SectionReader};
use crate::error::{EnvMatrixError, Result};

/// A command line that is nothing but a cross-section reference.
static SECTION_REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{\[[^{}\s]+\]\S+?\}$").unwrap());

/// Characters that separate words, matching the set recognized by the
/// tokenizer's callers.
fn is_word_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

fn is_shell_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Resolve a command block into argument vectors.
///
/// `value` is the factor-filtered, unsubstituted block. Empty commands are
/// dropped.
pub fn argv_list(reader: &SectionReader<'_>, key: &str, value: &str) -> Result<Vec<Vec<String>>> {
    let mut commands = Vec::new();
    let mut current = String::new();

    for line in value.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(head) = line.strip_suffix('\\') {
            current.push(' ');
            current.push_str(head);
            continue;
        }
        current.push_str(line);

        let command = std::mem::take(&mut current);
        let trimmed = command.trim();
        if SECTION_REFERENCE_RE.is_match(trimmed) {
            let spliced = replace_for(reader, key, trimmed, true)?;
            if spliced != trimmed {
                commands.extend(argv_list(reader, key, &spliced)?);
                continue;
            }
        }

        let argv = process_command(reader, key, &command)?;
        if !argv.is_empty() {
            commands.push(argv);
        }
    }

    if !current.is_empty() {
        return Err(EnvMatrixError::UnterminatedContinuation {
            section: reader.section_name().to_string(),
            key: key.to_string(),
        });
    }
    Ok(commands)
}

/// Substitute and split one command.
///
/// `{posargs}` and the legacy `[]` are replaced by the positional arguments;
/// `{posargs:default}` falls back to `default` when there are none.
pub fn process_command(reader: &SectionReader<'_>, key: &str, command: &str) -> Result<Vec<String>> {
    let posargs = reader.posargs();
    let posargs_string = join_args(posargs.iter().filter(|a| !a.is_empty()));

    let mut expanded = String::new();
    for word in split_words(command) {
        if word == "{posargs}" || word == "[]" {
            expanded.push_str(&posargs_string);
            continue;
        }

        let mut word = word.as_str();
        if let Some(default) = word
            .strip_prefix("{posargs:")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            if !posargs.is_empty() {
                expanded.push_str(&posargs_string);
                continue;
            }
            word = default;
        }

        // A substituted value may itself contain placeholders.
        let once = replace_for(reader, key, word, false)?;
        let twice = replace_for(reader, key, &once, false)?;
        expanded.push_str(&twice.replace("\\{", "{").replace("\\}", "}"));
    }

    shell_split(&expanded).ok_or_else(|| EnvMatrixError::UnterminatedQuote {
        section: reader.section_name().to_string(),
        key: key.to_string(),
        command: expanded.clone(),
    })
}

fn replace_for(reader: &SectionReader<'_>, key: &str, value: &str, cross_only: bool) -> Result<String> {
    reader.replace_with(value, Some(key), None, cross_only, &mut ResolveState::default())
}

/// Split a command into words, keeping `{...}` groups (and their inner
/// whitespace) together. Runs of whitespace between words are yielded as
/// words of their own, so concatenating the result restores the command
/// minus trailing whitespace.
pub fn split_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut depth: i32 = 0;

    for c in command.chars() {
        if is_word_space(c) {
            if depth == 0 && word_has_ended(c, &word, depth) {
                words.push(std::mem::take(&mut word));
            }
            word.push(c);
        } else if c == '{' {
            if word_has_ended(c, &word, depth) {
                words.push(std::mem::take(&mut word));
            }
            word.push(c);
            depth += 1;
        } else if c == '}' {
            word.push(c);
            depth -= 1;
        } else {
            if word_has_ended(c, &word, depth) {
                words.push(std::mem::take(&mut word));
            }
            word.push(c);
        }
    }

    if !word.trim_matches(is_word_space).is_empty() {
        words.push(word);
    }
    words.retain(|w| !w.is_empty());
    words
}

fn word_has_ended(c: char, word: &str, depth: i32) -> bool {
    let last = word.chars().next_back();
    let space_after_text = is_word_space(c) && last.is_some_and(|l| !is_word_space(l));
    let group_opens = c == '{' && depth == 0 && !word.ends_with('\\');
    let group_closed = depth == 0 && last == Some('}');
    let text_after_space =
        !is_word_space(c) && !word.is_empty() && word.trim_matches(is_word_space).is_empty();
    space_after_text || group_opens || group_closed || text_after_space
}

/// Join arguments into one command-line string.
///
/// Arguments containing a space or tab, and empty arguments, are wrapped in
/// double quotes; embedded quotes and the backslashes before them are
/// escaped.
pub fn join_args<S: AsRef<str>>(args: impl IntoIterator<Item = S>) -> String {
    let mut out = String::new();
    for (index, arg) in args.into_iter().enumerate() {
        let arg = arg.as_ref();
        if index > 0 {
            out.push(' ');
        }

        let needs_quotes = arg.is_empty() || arg.contains([' ', '\t']);
        if needs_quotes {
            out.push('"');
        }

        let mut backslashes = 0;
        for c in arg.chars() {
            match c {
                '\\' => backslashes += 1,
                '"' => {
                    out.push_str(&"\\".repeat(backslashes * 2));
                    backslashes = 0;
                    out.push_str("\\\"");
                }
                _ => {
                    out.push_str(&"\\".repeat(backslashes));
                    backslashes = 0;
                    out.push(c);
                }
            }
        }
        out.push_str(&"\\".repeat(backslashes));

        if needs_quotes {
            out.push_str(&"\\".repeat(backslashes));
            out.push('"');
        }
    }
    out
}

#[derive(Clone, Copy)]
enum SplitState {
    Space,
    Word,
    Quoted(char),
}

/// Split a string into shell words.
///
/// Single and double quotes group text and are removed; there is no escape
/// character. An unquoted `#` starts a comment running to the end of the
/// line. Returns `None` when a quote is never closed.
pub fn shell_split(input: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quoted = false;
    let mut state = SplitState::Space;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match state {
            SplitState::Space => {
                if is_shell_space(c) {
                    continue;
                } else if c == '#' {
                    skip_line(&mut chars);
                } else if c == '\'' || c == '"' {
                    state = SplitState::Quoted(c);
                    quoted = true;
                } else {
                    token.push(c);
                    state = SplitState::Word;
                }
            }
            SplitState::Word => {
                if is_shell_space(c) || c == '#' {
                    if c == '#' {
                        skip_line(&mut chars);
                    }
                    state = SplitState::Space;
                    if !token.is_empty() || quoted {
                        tokens.push(std::mem::take(&mut token));
                        quoted = false;
                    }
                } else if c == '\'' || c == '"' {
                    state = SplitState::Quoted(c);
                    quoted = true;
                } else {
                    token.push(c);
                }
            }
            SplitState::Quoted(quote) => {
                if c == quote {
                    state = SplitState::Word;
                } else {
                    token.push(c);
                }
            }
        }
    }

    match state {
        SplitState::Quoted(_) => None,
        _ => {
            if !token.is_empty() || quoted {
                tokens.push(token);
            }
            Some(tokens)
        }
    }
}

fn skip_line(chars: &mut std::str::Chars<'_>) {
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ini::IniSource;
    use crate::config::setenv::ProcessEnv;

    fn words(s: &str) -> Vec<String> {
        split_words(s)
    }

    #[test]
    fn words_keep_whitespace_runs() {
        assert_eq!(words("cmd arg1  arg2"), vec!["cmd", " ", "arg1", "  ", "arg2"]);
    }

    #[test]
    fn words_keep_groups_together() {
        assert_eq!(
            words("pytest {posargs:tests -x}"),
            vec!["pytest", " ", "{posargs:tests -x}"]
        );
    }

    #[test]
    fn adjacent_groups_are_separate_words() {
        assert_eq!(words("{a}{b}"), vec!["{a}", "{b}"]);
    }

    #[test]
    fn text_before_group_is_separate_word() {
        assert_eq!(words("x{a} y"), vec!["x", "{a}", " ", "y"]);
    }

    #[test]
    fn text_after_group_is_separate_word() {
        assert_eq!(words("{a}x"), vec!["{a}", "x"]);
    }

    #[test]
    fn escaped_brace_does_not_start_group() {
        assert_eq!(words(r"echo \{a}"), vec!["echo", " ", r"\{a}"]);
    }

    #[test]
    fn nested_groups_stay_whole() {
        assert_eq!(words("{env:X:{y}} z"), vec!["{env:X:{y}}", " ", "z"]);
    }

    #[test]
    fn trailing_whitespace_is_dropped() {
        assert_eq!(words("a   "), vec!["a"]);
    }

    #[test]
    fn join_quotes_when_needed() {
        assert_eq!(join_args(["a", "b c", ""]), r#"a "b c" """#);
    }

    #[test]
    fn join_escapes_quotes_and_backslashes() {
        assert_eq!(join_args([r#"say "hi""#]), r#""say \"hi\"""#);
        assert_eq!(join_args([r#"a\"b"#]), r#"a\\\"b"#);
        assert_eq!(join_args([r"dir\"]), r"dir\");
        assert_eq!(join_args([r"my dir\"]), r#""my dir\\""#);
    }

    #[test]
    fn split_handles_quotes_without_escapes() {
        assert_eq!(
            shell_split(r#"echo "a b" 'c d' e\f"#).unwrap(),
            vec!["echo", "a b", "c d", r"e\f"]
        );
    }

    #[test]
    fn split_keeps_empty_quoted_token() {
        assert_eq!(shell_split(r#"a "" b"#).unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn split_joins_adjacent_quoted_parts() {
        assert_eq!(shell_split(r#"--x="a b"c"#).unwrap(), vec!["--x=a bc"]);
    }

    #[test]
    fn split_drops_comments() {
        assert_eq!(shell_split("pytest # run tests").unwrap(), vec!["pytest"]);
        assert_eq!(shell_split("a#b c").unwrap(), vec!["a"]);
        assert_eq!(shell_split("'a#b'").unwrap(), vec!["a#b"]);
    }

    #[test]
    fn split_rejects_unclosed_quote() {
        assert!(shell_split("echo 'oops").is_none());
    }

    fn reader<'a>(source: &'a IniSource, env: &'a ProcessEnv) -> SectionReader<'a> {
        let mut reader = SectionReader::new(source, "testenv", env);
        reader.add_substitution("envname", "py36");
        reader
    }

    #[test]
    fn block_with_continuation_and_posargs() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let mut r = reader(&source, &env);
        r.set_posargs(vec!["-k".to_string(), "a b".to_string()]);

        let argv = argv_list(
            &r,
            "commands",
            "pytest \\\n--cov {posargs}\necho {envname}",
        )
        .unwrap();
        assert_eq!(
            argv,
            vec![
                vec!["pytest", "--cov", "-k", "a b"],
                vec!["echo", "py36"],
            ]
        );
    }

    #[test]
    fn posargs_default_used_when_none_given() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let r = reader(&source, &env);
        let argv = argv_list(&r, "commands", "pytest {posargs:tests -x}").unwrap();
        assert_eq!(argv, vec![vec!["pytest", "tests", "-x"]]);
    }

    #[test]
    fn posargs_default_ignored_when_given() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let mut r = reader(&source, &env);
        r.set_posargs(vec!["unit".to_string()]);
        let argv = argv_list(&r, "commands", "pytest {posargs:tests}").unwrap();
        assert_eq!(argv, vec![vec!["pytest", "unit"]]);
    }

    #[test]
    fn legacy_brackets_are_posargs() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let mut r = reader(&source, &env);
        r.set_posargs(vec!["x".to_string()]);
        let argv = argv_list(&r, "commands", "pytest []").unwrap();
        assert_eq!(argv, vec![vec!["pytest", "x"]]);
    }

    #[test]
    fn cross_section_command_line_is_spliced() {
        let source = IniSource::from_sections(vec![(
            "base",
            vec![("commands", "flake8\npytest {envname}")],
        )]);
        let env = ProcessEnv::default();
        let r = reader(&source, &env);
        let argv = argv_list(&r, "commands", "{[base]commands}\necho done").unwrap();
        assert_eq!(
            argv,
            vec![
                vec!["flake8".to_string()],
                vec!["pytest".to_string(), "py36".to_string()],
                vec!["echo".to_string(), "done".to_string()],
            ]
        );
    }

    #[test]
    fn dangling_continuation_is_error() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let r = reader(&source, &env);
        let err = argv_list(&r, "commands", "pytest \\").unwrap_err();
        assert_eq!(
            err.to_string(),
            "line-continuation ends nowhere while resolving for [testenv] commands"
        );
    }

    #[test]
    fn escaped_braces_reach_argv_unescaped() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let r = reader(&source, &env);
        let argv = argv_list(&r, "commands", r"echo \{envname\}").unwrap();
        assert_eq!(argv, vec![vec!["echo", "{envname}"]]);
    }

    #[test]
    fn unclosed_quote_is_error() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let r = reader(&source, &env);
        let err = argv_list(&r, "commands", "echo 'oops").unwrap_err();
        assert!(matches!(err, EnvMatrixError::UnterminatedQuote { .. }));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let source = IniSource::default();
        let env = ProcessEnv::default();
        let r = reader(&source, &env);
        let argv = argv_list(&r, "commands", "a\n\n   \nb").unwrap();
        assert_eq!(argv, vec![vec!["a"], vec!["b"]]);
    }
}
