use std::sync::LazyLock;

use regex::Regex;

use super::types::{Operator, ShellFacts};

/// Redirection operators, longest first so `>>` is reported before `>`.
const REDIRECTION_OPERATORS: &[&str] = &["&>>", "&>", ">>", "<<", "<&", ">&", ">", "<"];

const CHAIN_MARKERS: &[&str] = &["&&", "||", ";"];

const GLOB_CHARS: &[char] = &['*', '?', '[', ']'];

static VARIABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:[A-Za-z_][A-Za-z0-9_]*|\{[A-Za-z_][A-Za-z0-9_]*\})")
        .expect("invalid variable pattern regex")
});

/// Derive the structural facts of a command and its argument list.
///
/// Chain detection is deliberately loose: an argument that merely contains
/// `&&`, `||` or `;` counts, because the router resolves ambiguity by asking.
/// Globbing detection likewise flags literal brackets and question marks.
pub fn analyze(command: &str, args: &[String]) -> ShellFacts {
    if command.trim().is_empty() && args.is_empty() {
        return ShellFacts::default();
    }

    let is_chain = args
        .iter()
        .any(|a| CHAIN_MARKERS.iter().any(|m| a.contains(m)));
    let is_pipe = args.iter().any(|a| a == "|" || a == "|&");
    let has_redirection = args.iter().any(|a| redirection_operator(a).is_some());
    let has_globbing = args.iter().any(|a| a.contains(GLOB_CHARS));
    let has_variables = args.iter().any(|a| VARIABLE_PATTERN.is_match(a));
    let has_substitution = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .any(|a| a.contains("$(") || a.contains('`'));

    let line = command_line(command, args);
    let chain_segments = split_at(&line, Operator::is_chain);
    let pipe_segments = split_at(&line, Operator::is_pipe);

    ShellFacts {
        is_chain,
        is_pipe,
        chain_segments,
        pipe_segments,
        has_redirection,
        has_globbing,
        has_variables,
        has_substitution,
    }
}

/// Join a command and its arguments into one display line.
pub fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.trim().to_string();
    for arg in args {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(arg);
    }
    line
}

/// The redirection operator an argument starts with, if any.
///
/// A leading file-descriptor number (`2>`, `1>>`) is skipped first.
pub fn redirection_operator(arg: &str) -> Option<&'static str> {
    let rest = arg.trim_start_matches(|c: char| c.is_ascii_digit());
    REDIRECTION_OPERATORS
        .iter()
        .copied()
        .find(|op| rest.starts_with(op))
}

/// Split a line at the operators selected by `keep`.
fn split_at(line: &str, keep: fn(&Operator) -> bool) -> Vec<String> {
    let (parts, operators) = split_compound_command(line);
    if parts.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut current = parts[0].clone();
    for (part, op) in parts.iter().skip(1).zip(operators.iter()) {
        if keep(op) {
            segments.push(std::mem::take(&mut current));
            current = part.clone();
        } else {
            current = format!("{current} {} {part}", op.as_str());
        }
    }
    segments.push(current);
    segments.retain(|s| !s.is_empty());
    segments
}

/// Split a command at shell operators (&&, ||, ;, |, |&),
/// respecting single/double quotes and backslash escapes.
///
/// Returns segments and the operators between them.
pub fn split_compound_command(command: &str) -> (Vec<String>, Vec<Operator>) {
    let mut parts = Vec::new();
    let mut operators = Vec::new();
    let mut buf = String::new();

    let chars: Vec<char> = command.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let (mut sq, mut dq, mut esc) = (false, false, false);

    while i < len {
        let c = chars[i];

        if esc {
            buf.push(c);
            esc = false;
            i += 1;
            continue;
        }
        if c == '\\' && !sq {
            esc = true;
            buf.push(c);
            i += 1;
            continue;
        }
        if c == '\'' && !dq {
            sq = !sq;
            buf.push(c);
            i += 1;
            continue;
        }
        if c == '"' && !sq {
            dq = !dq;
            buf.push(c);
            i += 1;
            continue;
        }
        if sq || dq {
            buf.push(c);
            i += 1;
            continue;
        }

        // Two-char operators
        if i + 1 < len {
            let next = chars[i + 1];
            let op = match (c, next) {
                ('&', '&') => Some(Operator::And),
                ('|', '|') => Some(Operator::Or),
                ('|', '&') => Some(Operator::PipeErr),
                _ => None,
            };
            if let Some(op) = op {
                parts.push(buf.trim().to_string());
                operators.push(op);
                buf.clear();
                i += 2;
                continue;
            }
        }

        // Single-char operators
        let op = match c {
            '|' => Some(Operator::Pipe),
            ';' => Some(Operator::Semi),
            _ => None,
        };
        if let Some(op) = op {
            parts.push(buf.trim().to_string());
            operators.push(op);
            buf.clear();
            i += 1;
            continue;
        }

        buf.push(c);
        i += 1;
    }

    let tail = buf.trim().to_string();
    if !tail.is_empty() {
        parts.push(tail);
    }

    // Empty parts (e.g. a trailing `;`) keep their operator slot aligned
    // by collapsing the pair.
    let mut kept_parts = Vec::with_capacity(parts.len());
    let mut kept_ops = Vec::with_capacity(operators.len());
    for (idx, part) in parts.into_iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if !kept_parts.is_empty()
            && let Some(op) = operators.get(idx - 1)
        {
            kept_ops.push(*op);
        }
        kept_parts.push(part);
    }

    (kept_parts, kept_ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_input_is_all_false() {
        assert_eq!(analyze("", &[]), ShellFacts::default());
    }

    #[test]
    fn plain_command_has_no_facts() {
        let facts = analyze("ls", &args(&["-la", "/tmp"]));
        assert!(!facts.is_chain);
        assert!(!facts.is_pipe);
        assert!(!facts.has_redirection);
        assert!(!facts.has_globbing);
        assert!(!facts.has_variables);
        assert_eq!(facts.chain_segments, vec!["ls -la /tmp"]);
    }

    #[test]
    fn chain_inside_token() {
        let facts = analyze("echo", &args(&["hi&&rm"]));
        assert!(facts.is_chain);
    }

    #[test]
    fn chain_standalone_token() {
        let facts = analyze("ls", &args(&["&&", "rm", "-rf", "/"]));
        assert!(facts.is_chain);
        assert_eq!(facts.chain_segments, vec!["ls", "rm -rf /"]);
    }

    #[test]
    fn semicolon_counts_as_chain() {
        assert!(analyze("find", &args(&[".", "-exec", "rm", "{}", ";"])).is_chain);
    }

    #[test]
    fn pipe_requires_bare_token() {
        let facts = analyze("cat", &args(&["log", "|", "grep", "x"]));
        assert!(facts.is_pipe);
        assert!(!facts.is_chain);
        assert_eq!(facts.pipe_segments, vec!["cat log", "grep x"]);
        assert!(!analyze("echo", &args(&["a|b"])).is_pipe);
    }

    #[test]
    fn pipe_segments_keep_chains_together() {
        let facts = analyze("a", &args(&["&&", "b", "|", "c"]));
        assert_eq!(facts.pipe_segments, vec!["a && b", "c"]);
        assert_eq!(facts.chain_segments, vec!["a", "b | c"]);
    }

    #[test]
    fn redirection_operators() {
        for arg in [">", ">out", ">>log", "<in", "<<EOF", "<&0", ">&2", "&>all", "&>>all", "2>err"] {
            assert!(
                analyze("cmd", &args(&[arg])).has_redirection,
                "expected redirection for {arg}"
            );
        }
        assert!(!analyze("cmd", &args(&["a>b"])).has_redirection);
    }

    #[test]
    fn redirection_operator_prefers_longest() {
        assert_eq!(redirection_operator(">>log"), Some(">>"));
        assert_eq!(redirection_operator("&>>x"), Some("&>>"));
        assert_eq!(redirection_operator("file"), None);
    }

    #[test]
    fn globbing_is_conservative() {
        assert!(analyze("ls", &args(&["*.rs"])).has_globbing);
        assert!(analyze("echo", &args(&["what?"])).has_globbing);
        assert!(analyze("echo", &args(&["[x]"])).has_globbing);
        assert!(!analyze("ls", &args(&["src"])).has_globbing);
    }

    #[test]
    fn variables() {
        assert!(analyze("echo", &args(&["$HOME"])).has_variables);
        assert!(analyze("echo", &args(&["${PATH}/bin"])).has_variables);
        assert!(!analyze("echo", &args(&["$5", "cost"])).has_variables);
    }

    #[test]
    fn substitution() {
        assert!(analyze("echo", &args(&["$(rm -rf /)"])).has_substitution);
        assert!(analyze("echo", &args(&["`id`"])).has_substitution);
        assert!(!analyze("echo", &args(&["$HOME"])).has_substitution);
    }

    #[test]
    fn split_respects_quotes() {
        let (parts, ops) = split_compound_command("echo 'a && b' && ls");
        assert_eq!(parts, vec!["echo 'a && b'", "ls"]);
        assert_eq!(ops, vec![Operator::And]);
    }

    #[test]
    fn split_trailing_semicolon() {
        let (parts, ops) = split_compound_command("ls;");
        assert_eq!(parts, vec!["ls"]);
        assert!(ops.is_empty());
    }

    #[test]
    fn split_pipe_err() {
        let (parts, ops) = split_compound_command("make |& tee log");
        assert_eq!(parts, vec!["make", "tee log"]);
        assert_eq!(ops, vec![Operator::PipeErr]);
    }
}
