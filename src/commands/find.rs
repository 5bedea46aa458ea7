use crate::commands::{CommandSpec, SpecVerdict};
use crate::config::FindConfig;
use crate::router::CommandInvocation;

pub struct FindSpec {
    exec_flags: Vec<String>,
}

impl FindSpec {
    pub fn from_config(config: &FindConfig) -> Self {
        Self {
            exec_flags: config.exec_flags.clone(),
        }
    }
}

impl CommandSpec for FindSpec {
    fn evaluate(&self, inv: &CommandInvocation) -> SpecVerdict {
        if let Some(flag) = inv.args().iter().find(|a| self.exec_flags.contains(a)) {
            return SpecVerdict::Downgrade(format!(
                "find with {flag} can execute arbitrary commands"
            ));
        }
        // -delete is not an exec flag but is still a write
        if inv.has_flag("-delete") {
            return SpecVerdict::Downgrade("find with -delete removes files".into());
        }
        SpecVerdict::Safe("find without exec".into())
    }
}
