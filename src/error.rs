use thiserror::Error;

use crate::models::{CommitmentStatus, RoundStatus, UserRole};

pub type FundingResult<T> = std::result::Result<T, FundingError>;
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors returned to callers of the funding service.
#[derive(Error, Debug)]
pub enum FundingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Input that can never be accepted, whatever the current state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("amount {amount} is below the round minimum of {minimum}")]
    BelowMinimum { amount: i64, minimum: i64 },

    #[error("amount {amount} is above the round maximum of {maximum}")]
    AboveMaximum { amount: i64, maximum: i64 },

    #[error("missing score for criterion {0}")]
    MissingCriterion(String),

    #[error("unknown criterion {0}")]
    UnknownCriterion(String),

    #[error("score for {criterion} is not a finite number")]
    NonFiniteScore { criterion: String },

    #[error("score {value} for {criterion} is outside {min}..={max}")]
    ScoreOutOfRange {
        criterion: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Operation not valid for the current round, commitment or evaluation status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("round {round_id} is {status}, commitments require a live round")]
    RoundNotLive { round_id: String, status: RoundStatus },

    #[error("round {round_id} is {status}, expected {expected}")]
    InvalidRoundState {
        round_id: String,
        status: RoundStatus,
        expected: RoundStatus,
    },

    #[error("round cannot move from {from} to {to}")]
    InvalidTransition { from: RoundStatus, to: RoundStatus },

    #[error("transition to {to} refused: {reason}")]
    GuardFailed { to: RoundStatus, reason: String },

    #[error("commitment {commitment_id} is {status}, expected {expected}")]
    InvalidCommitmentState {
        commitment_id: String,
        status: CommitmentStatus,
        expected: CommitmentStatus,
    },

    #[error("member {committee_id} already evaluated round {round_id}")]
    EvaluationAlreadySubmitted {
        round_id: String,
        committee_id: String,
    },

    #[error("round {0} changed concurrently, retry the operation")]
    Conflict(String),

    #[error("email {0} is already registered")]
    EmailInUse(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotFoundError {
    #[error("round not found: {0}")]
    Round(String),

    #[error("commitment not found: {0}")]
    Commitment(String),

    #[error("user not found: {0}")]
    User(String),

    #[error("startup not found for user {0}")]
    Startup(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("malformed token")]
    MalformedToken,

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("role {role} is not permitted here")]
    Forbidden { role: UserRole },

    #[error("account {0} is inactive")]
    Inactive(String),
}

/// Failures of the persistence collaborator.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("fixture io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("duplicate evaluation for round {round_id} by {committee_id}")]
    DuplicateEvaluation {
        round_id: String,
        committee_id: String,
    },

    #[error("round {0} is no longer accepting this write")]
    RoundLocked(String),

    #[error("duplicate user email {0}")]
    DuplicateEmail(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_keep_their_message() {
        let err: FundingError = ValidationError::BelowMinimum {
            amount: 5,
            minimum: 10,
        }
        .into();
        assert!(matches!(err, FundingError::Validation(_)));
        assert_eq!(err.to_string(), "amount 5 is below the round minimum of 10");

        let err: FundingError = NotFoundError::Round("r9".to_string()).into();
        assert_eq!(err.to_string(), "round not found: r9");
    }

    #[test]
    fn round_not_live_message_names_status() {
        let err = StateError::RoundNotLive {
            round_id: "r1".to_string(),
            status: RoundStatus::Draft,
        };
        assert_eq!(
            err.to_string(),
            "round r1 is draft, commitments require a live round"
        );
    }
}
