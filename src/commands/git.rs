use crate::commands::{CommandSpec, SpecVerdict};
use crate::config::GitConfig;
use crate::router::CommandInvocation;

pub struct GitSpec {
    read_only: Vec<String>,
}

impl GitSpec {
    pub fn from_config(config: &GitConfig) -> Self {
        Self {
            read_only: config.read_only.clone(),
        }
    }
}

impl CommandSpec for GitSpec {
    fn evaluate(&self, inv: &CommandInvocation) -> SpecVerdict {
        let Some(sub) = inv.subcommand() else {
            return SpecVerdict::Downgrade("git without a subcommand".into());
        };

        if self.read_only.iter().any(|s| s == sub) {
            // `git branch -D` deletes, `git branch -m` renames
            if sub == "branch"
                && inv
                    .args()
                    .iter()
                    .any(|a| matches!(a.as_str(), "-d" | "-D" | "--delete" | "-m" | "-M" | "--move"))
            {
                return SpecVerdict::Downgrade("git branch with a write flag".into());
            }
            return SpecVerdict::Safe(format!("read-only git {sub}"));
        }

        SpecVerdict::Downgrade(format!("git {sub} is not read-only"))
    }
}
