use std::path::PathBuf;

use clap::{ArgAction, Args};

use crate::scoring::{ApprovalPolicy, PendingScope};

/// Runtime settings shared by every subcommand. Each flag falls back to an
/// environment variable.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// JSON fixture file to use instead of Postgres
    #[arg(long, env = "FUNDING_FIXTURES", global = true)]
    pub fixtures: Option<PathBuf>,

    #[arg(long, env = "FUNDING_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,

    /// Secret used to sign session tokens
    #[arg(
        long,
        env = "FUNDING_TOKEN_SECRET",
        default_value = "local-dev-secret",
        global = true,
        hide_env_values = true
    )]
    pub token_secret: String,

    /// Completed evaluations required before a round decision
    #[arg(long, env = "FUNDING_QUORUM", default_value_t = 1, global = true)]
    pub quorum: usize,

    /// Approve decisions required to take a round live
    #[arg(long, env = "FUNDING_MIN_APPROVALS", default_value_t = 1, global = true)]
    pub min_approvals: usize,

    /// `global` counts every round in review as pending, `assigned` only the member's
    #[arg(long, env = "FUNDING_PENDING_SCOPE", default_value = "global", global = true)]
    pub pending_scope: PendingScope,

    /// Refuse evaluations for rounds outside committee review
    #[arg(
        long,
        env = "FUNDING_STRICT_EVALUATION_GUARD",
        default_value_t = true,
        action = ArgAction::Set,
        global = true
    )]
    pub strict_evaluation_guard: bool,

    /// Emit JSON log lines
    #[arg(long, env = "FUNDING_LOG_JSON", global = true)]
    pub log_json: bool,
}

/// Business rules the service applies on top of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePolicy {
    pub approval: ApprovalPolicy,
    pub pending_scope: PendingScope,
    pub strict_evaluation_guard: bool,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        ServicePolicy {
            approval: ApprovalPolicy::default(),
            pending_scope: PendingScope::Global,
            strict_evaluation_guard: true,
        }
    }
}

impl Config {
    pub fn policy(&self) -> ServicePolicy {
        ServicePolicy {
            approval: ApprovalPolicy {
                quorum: self.quorum,
                min_approvals: self.min_approvals,
            },
            pending_scope: self.pending_scope,
            strict_evaluation_guard: self.strict_evaluation_guard,
        }
    }
}
