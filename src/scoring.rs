use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FundingResult, StateError, ValidationError};
use crate::models::{
    Assignment, CommitteeEvaluation, CommitteeMemberStats, Decision, EvaluationScores, Round,
    RoundDecisionSummary, RoundStatus, CRITERIA_COUNT,
};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

/// What a committee member hands in for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSubmission {
    pub round_id: String,
    pub committee_id: String,
    pub scores: EvaluationScores,
    pub decision: Decision,
    #[serde(default)]
    pub comments: String,
}

/// How many completed evaluations a round needs, and how many must approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub quorum: usize,
    pub min_approvals: usize,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        ApprovalPolicy {
            quorum: 1,
            min_approvals: 1,
        }
    }
}

impl ApprovalPolicy {
    pub fn allows_approval(&self, summary: &RoundDecisionSummary) -> bool {
        summary.quorum_reached && summary.approve_count >= self.min_approvals.max(1)
    }
}

/// Which rounds count as a member's pending work on the committee dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingScope {
    /// Every round in committee review, regardless of assignment.
    #[default]
    Global,
    /// Only assigned rounds in committee review the member has not yet scored.
    Assigned,
}

impl std::str::FromStr for PendingScope {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "global" => Ok(PendingScope::Global),
            "assigned" => Ok(PendingScope::Assigned),
            other => Err(ValidationError::InvalidField {
                field: "pending scope",
                value: other.to_string(),
            }),
        }
    }
}

pub fn validate_scores(scores: &EvaluationScores) -> Result<(), ValidationError> {
    for (criterion, value) in scores.iter() {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteScore {
                criterion: criterion.name().to_string(),
            });
        }
        if !(SCORE_MIN..=SCORE_MAX).contains(&value) {
            return Err(ValidationError::ScoreOutOfRange {
                criterion: criterion.name().to_string(),
                value,
                min: SCORE_MIN,
                max: SCORE_MAX,
            });
        }
    }
    Ok(())
}

pub fn total_score(scores: &EvaluationScores) -> f64 {
    scores.iter().map(|(_, value)| value).sum()
}

pub fn average_score(total: f64) -> f64 {
    round2(total / CRITERIA_COUNT as f64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Builds the stored evaluation record for a submission against `round`.
///
/// With `enforce_review` set, the round must be in committee review.
pub fn submit_evaluation(
    round: &Round,
    submission: EvaluationSubmission,
    enforce_review: bool,
    now: DateTime<Utc>,
) -> FundingResult<CommitteeEvaluation> {
    if enforce_review && round.status != RoundStatus::CommitteeReview {
        return Err(StateError::InvalidRoundState {
            round_id: round.id.clone(),
            status: round.status,
            expected: RoundStatus::CommitteeReview,
        }
        .into());
    }
    validate_scores(&submission.scores)?;

    let total = total_score(&submission.scores);
    Ok(CommitteeEvaluation {
        id: format!("e-{}", Uuid::new_v4()),
        round_id: round.id.clone(),
        committee_id: submission.committee_id,
        average_score: average_score(total),
        total_score: total,
        scores: submission.scores,
        decision: submission.decision,
        comments: submission.comments,
        is_completed: true,
        submitted_at: Some(now),
        created_at: now,
        updated_at: now,
    })
}

pub fn aggregate_for_committee_member(
    member_id: &str,
    evaluations: &[CommitteeEvaluation],
    rounds: &[Round],
    assignments: &[Assignment],
    scope: PendingScope,
) -> CommitteeMemberStats {
    let own: Vec<&CommitteeEvaluation> = evaluations
        .iter()
        .filter(|evaluation| evaluation.committee_id == member_id)
        .collect();

    let average_score = if own.is_empty() {
        0.0
    } else {
        own.iter().map(|evaluation| evaluation.average_score).sum::<f64>() / own.len() as f64
    };

    let pending_evaluations = match scope {
        PendingScope::Global => rounds
            .iter()
            .filter(|round| round.status == RoundStatus::CommitteeReview)
            .count(),
        PendingScope::Assigned => {
            let done: HashSet<&str> = own
                .iter()
                .filter(|evaluation| evaluation.is_completed)
                .map(|evaluation| evaluation.round_id.as_str())
                .collect();
            let assigned: HashSet<&str> = assignments
                .iter()
                .filter(|assignment| assignment.committee_id == member_id)
                .map(|assignment| assignment.round_id.as_str())
                .collect();
            rounds
                .iter()
                .filter(|round| round.status == RoundStatus::CommitteeReview)
                .filter(|round| assigned.contains(round.id.as_str()))
                .filter(|round| !done.contains(round.id.as_str()))
                .count()
        }
    };

    CommitteeMemberStats {
        total_evaluations: own.len(),
        completed_evaluations: own.iter().filter(|evaluation| evaluation.is_completed).count(),
        average_score,
        pending_evaluations,
    }
}

pub fn aggregate_for_round(
    round_id: &str,
    evaluations: &[CommitteeEvaluation],
    policy: &ApprovalPolicy,
) -> RoundDecisionSummary {
    let completed: Vec<&CommitteeEvaluation> = evaluations
        .iter()
        .filter(|evaluation| evaluation.round_id == round_id && evaluation.is_completed)
        .collect();

    let count = |decision: Decision| {
        completed
            .iter()
            .filter(|evaluation| evaluation.decision == decision)
            .count()
    };

    let mean_average_score = if completed.is_empty() {
        0.0
    } else {
        round2(
            completed.iter().map(|evaluation| evaluation.average_score).sum::<f64>()
                / completed.len() as f64,
        )
    };

    RoundDecisionSummary {
        round_id: round_id.to_string(),
        approve_count: count(Decision::Approve),
        revise_count: count(Decision::Revise),
        reject_count: count(Decision::Reject),
        completed_evaluations: completed.len(),
        quorum: policy.quorum,
        quorum_reached: completed.len() >= policy.quorum,
        mean_average_score,
    }
}
