//! Types produced by the shell analyzer and consumed by the router.

use serde::Serialize;

/// Shell operator separating consecutive command segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `&&`: run next only if previous succeeded
    And,
    /// `||`: run next only if previous failed
    Or,
    /// `;`: run next unconditionally
    Semi,
    /// `|`: pipe stdout
    Pipe,
    /// `|&`: pipe stdout+stderr
    PipeErr,
}

impl Operator {
    /// The operator's shell syntax.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Semi => ";",
            Operator::Pipe => "|",
            Operator::PipeErr => "|&",
        }
    }

    /// `&&`, `||` and `;` sequence commands; `|` and `|&` connect them.
    pub fn is_chain(&self) -> bool {
        matches!(self, Operator::And | Operator::Or | Operator::Semi)
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, Operator::Pipe | Operator::PipeErr)
    }
}

/// Structural facts about a `(command, args)` pair.
///
/// Computed fresh for every call and never cached: the same command name
/// carries different arguments every time it is routed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShellFacts {
    /// Some argument contains `&&`, `||` or `;`.
    pub is_chain: bool,
    /// Some argument is a bare `|` or `|&`.
    pub is_pipe: bool,
    /// The reconstructed command line split at chain operators.
    pub chain_segments: Vec<String>,
    /// The reconstructed command line split at pipe operators.
    pub pipe_segments: Vec<String>,
    /// Some argument starts with a redirection operator.
    pub has_redirection: bool,
    /// Some argument contains `*`, `?`, `[` or `]`.
    pub has_globbing: bool,
    /// Some argument references `$NAME` or `${NAME}`.
    pub has_variables: bool,
    /// Some argument contains `$(...)` or a backtick.
    pub has_substitution: bool,
}

impl ShellFacts {
    /// Chains and pipes can smuggle a second command past the head command.
    pub fn is_compound(&self) -> bool {
        self.is_chain || self.is_pipe
    }
}
