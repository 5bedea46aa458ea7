use super::shell::split_compound_command;

/// Extract the first real command word, skipping leading VAR=value assignments.
pub fn base_command(command: &str) -> String {
    let rest = skip_assignments(command, &mut Vec::new());
    let word = rest.split_whitespace().next().unwrap_or("");
    // Extract basename: /usr/bin/ls → ls, ./script.sh → script.sh
    match word.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name.to_string(),
        _ => word.to_string(),
    }
}

/// Extract leading KEY=VALUE pairs from a command string.
// TODO: Breaks on quoted values like FOO="bar baz"; scans for first
// whitespace after `=` without respecting quotes.
pub fn env_vars(command: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    skip_assignments(command, &mut result);
    result
}

/// Walk past leading assignments, collecting them, and return the remainder.
fn skip_assignments<'a>(command: &'a str, out: &mut Vec<(String, String)>) -> &'a str {
    let mut rest = command.trim();
    while let Some(eq_pos) = rest.find('=') {
        let before_eq = &rest[..eq_pos];
        let is_name = !before_eq.is_empty()
            && before_eq
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && before_eq
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !is_name {
            break;
        }
        let after_eq = &rest[eq_pos + 1..];
        let Some(sp) = after_eq.find(char::is_whitespace) else {
            break;
        };
        out.push((before_eq.to_string(), after_eq[..sp].to_string()));
        rest = after_eq[sp..].trim_start();
    }
    rest
}

/// Tokenize a command segment into words using shlex (POSIX word splitting).
pub fn tokenize(command: &str) -> Vec<String> {
    shlex::split(command).unwrap_or_else(|| {
        // Fallback: simple whitespace splitting if shlex can't parse
        command.split_whitespace().map(String::from).collect()
    })
}

/// Tokenize a full command line, keeping shell operators as standalone words.
///
/// `ls|wc -l` becomes `["ls", "|", "wc", "-l"]` so that the analyzer sees the
/// pipe as its own argument. Leading assignments are dropped.
pub fn command_words(command: &str) -> Vec<String> {
    let (parts, operators) = split_compound_command(command);
    let mut words = Vec::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0
            && let Some(op) = operators.get(idx - 1)
        {
            words.push(op.as_str().to_string());
        }
        let part = if idx == 0 {
            skip_assignments(part, &mut Vec::new())
        } else {
            part.as_str()
        };
        words.extend(tokenize(part));
    }
    words
}
