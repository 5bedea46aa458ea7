use serde::{Deserialize, Serialize};

/// Where a command was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Safe,
    Dangerous,
    Sudo,
    Builtin,
    Complex,
    Unknown,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Safe => "safe",
            Route::Dangerous => "dangerous",
            Route::Sudo => "sudo",
            Route::Builtin => "builtin",
            Route::Complex => "complex",
            Route::Unknown => "unknown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Route::Safe => "SAFE",
            Route::Dangerous => "DANGEROUS",
            Route::Sudo => "SUDO",
            Route::Builtin => "BUILTIN",
            Route::Complex => "COMPLEX",
            Route::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the rule that decided a route shipped with the gate or came
/// from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    #[default]
    BuiltIn,
    User,
}

impl RuleSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleSource::BuiltIn => "builtin",
            RuleSource::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub routed: Route,
    /// May be spawned without approval or analysis.
    pub direct: bool,
    pub requires_analysis: bool,
    pub requires_approval: bool,
    pub is_builtin: bool,
    /// Must run inside a shell; builtins have no executable of their own.
    pub requires_shell: bool,
    pub reason: String,
    pub source: RuleSource,
}

impl RoutingDecision {
    /// Anything other than a direct route needs approval and analysis.
    pub(crate) fn gated(routed: Route, reason: String, source: RuleSource) -> Self {
        Self {
            routed,
            direct: false,
            requires_analysis: true,
            requires_approval: true,
            is_builtin: routed == Route::Builtin,
            requires_shell: routed == Route::Builtin,
            reason,
            source,
        }
    }

    pub(crate) fn safe(reason: String, source: RuleSource) -> Self {
        Self {
            routed: Route::Safe,
            direct: true,
            requires_analysis: false,
            requires_approval: false,
            is_builtin: false,
            requires_shell: false,
            reason,
            source,
        }
    }
}
