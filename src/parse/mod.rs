pub mod shell;
pub mod tokenize;
pub mod types;

pub use shell::{analyze, command_line, redirection_operator, split_compound_command};
pub use tokenize::{base_command, command_words, env_vars, tokenize};
pub use types::{Operator, ShellFacts};
