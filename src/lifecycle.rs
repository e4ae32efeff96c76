use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{FundingResult, StateError, ValidationError};
use crate::models::{
    Commitment, CommitmentStatus, CommitmentType, Round, RoundDecisionSummary, RoundStatus,
    RoundTotals,
};
use crate::scoring::ApprovalPolicy;

impl RoundStatus {
    /// Edges of the round state machine. Revision is the only backward edge.
    pub fn can_transition_to(&self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        matches!(
            (self, next),
            (Draft, CommitteeReview)
                | (CommitteeReview, Live)
                | (CommitteeReview, Draft)
                | (Live, Closed)
                | (Draft, Cancelled)
                | (CommitteeReview, Cancelled)
                | (Live, Cancelled)
        )
    }
}

fn transition(round: &Round, next: RoundStatus, now: DateTime<Utc>) -> FundingResult<Round> {
    if !round.status.can_transition_to(next) {
        return Err(StateError::InvalidTransition {
            from: round.status,
            to: next,
        }
        .into());
    }
    let mut updated = round.clone();
    updated.status = next;
    updated.updated_at = now;
    Ok(updated)
}

fn refuse(to: RoundStatus, reason: impl Into<String>) -> crate::error::FundingError {
    StateError::GuardFailed {
        to,
        reason: reason.into(),
    }
    .into()
}

/// Startup submits a draft for committee review.
pub fn submit_for_review(round: &Round, now: DateTime<Utc>) -> FundingResult<Round> {
    let updated = transition(round, RoundStatus::CommitteeReview, now)?;
    match round.business_plan_id.as_deref() {
        Some(plan) if !plan.trim().is_empty() => Ok(updated),
        _ => Err(refuse(
            RoundStatus::CommitteeReview,
            "no business plan attached",
        )),
    }
}

pub fn approve(
    round: &Round,
    summary: &RoundDecisionSummary,
    policy: &ApprovalPolicy,
    now: DateTime<Utc>,
) -> FundingResult<Round> {
    let mut updated = transition(round, RoundStatus::Live, now)?;
    if !summary.quorum_reached {
        return Err(refuse(
            RoundStatus::Live,
            format!(
                "{} of {} required evaluations completed",
                summary.completed_evaluations, summary.quorum
            ),
        ));
    }
    if !policy.allows_approval(summary) {
        return Err(refuse(
            RoundStatus::Live,
            format!(
                "{} approvals, {} required",
                summary.approve_count,
                policy.min_approvals.max(1)
            ),
        ));
    }
    if updated.start_date.is_none() {
        updated.start_date = Some(now);
    }
    Ok(updated)
}

pub fn request_revision(
    round: &Round,
    summary: &RoundDecisionSummary,
    now: DateTime<Utc>,
) -> FundingResult<Round> {
    let updated = transition(round, RoundStatus::Draft, now)?;
    if summary.revise_count == 0 {
        return Err(refuse(RoundStatus::Draft, "no evaluation asked for revision"));
    }
    Ok(updated)
}

pub fn close(round: &Round, now: DateTime<Utc>) -> FundingResult<Round> {
    let updated = transition(round, RoundStatus::Closed, now)?;
    let target_reached = round.current_amount >= round.target_amount;
    let window_over = round.end_date.map(|end| now > end).unwrap_or(false);
    if !target_reached && !window_over {
        return Err(refuse(
            RoundStatus::Closed,
            "target not reached and funding window still open",
        ));
    }
    Ok(updated)
}

pub fn cancel(round: &Round, now: DateTime<Utc>) -> FundingResult<Round> {
    transition(round, RoundStatus::Cancelled, now)
}

/// Checks an investor's pledge against the round and returns it as pending.
pub fn accept_commitment(
    round: &Round,
    investor_id: &str,
    amount: i64,
    commitment_type: CommitmentType,
    now: DateTime<Utc>,
) -> FundingResult<Commitment> {
    if round.status != RoundStatus::Live {
        return Err(StateError::RoundNotLive {
            round_id: round.id.clone(),
            status: round.status,
        }
        .into());
    }
    if amount < round.min_investment {
        return Err(ValidationError::BelowMinimum {
            amount,
            minimum: round.min_investment,
        }
        .into());
    }
    if amount > round.max_investment {
        return Err(ValidationError::AboveMaximum {
            amount,
            maximum: round.max_investment,
        }
        .into());
    }

    Ok(Commitment {
        id: format!("c-{}", Uuid::new_v4()),
        round_id: round.id.clone(),
        investor_id: investor_id.to_string(),
        amount,
        commitment_type,
        status: CommitmentStatus::Pending,
        contract_signed: false,
        receipt_uploaded: false,
        created_at: now,
        updated_at: now,
    })
}

/// Administrative approval or rejection of a pending commitment.
pub fn review_commitment(
    commitment: &Commitment,
    approved: bool,
    now: DateTime<Utc>,
) -> FundingResult<Commitment> {
    if commitment.status != CommitmentStatus::Pending {
        return Err(StateError::InvalidCommitmentState {
            commitment_id: commitment.id.clone(),
            status: commitment.status,
            expected: CommitmentStatus::Pending,
        }
        .into());
    }
    let mut updated = commitment.clone();
    updated.status = if approved {
        CommitmentStatus::Approved
    } else {
        CommitmentStatus::Rejected
    };
    updated.updated_at = now;
    Ok(updated)
}

pub fn confirm_payment(commitment: &Commitment, now: DateTime<Utc>) -> FundingResult<Commitment> {
    if commitment.status != CommitmentStatus::Approved {
        return Err(StateError::InvalidCommitmentState {
            commitment_id: commitment.id.clone(),
            status: commitment.status,
            expected: CommitmentStatus::Approved,
        }
        .into());
    }
    let mut updated = commitment.clone();
    updated.status = CommitmentStatus::Paid;
    updated.receipt_uploaded = true;
    updated.updated_at = now;
    Ok(updated)
}

/// Derives the raised amount and investor count from the paid commitments of a round.
pub fn recompute_round_totals(round: &Round, commitments: &[Commitment]) -> RoundTotals {
    let paid: Vec<&Commitment> = commitments
        .iter()
        .filter(|c| c.round_id == round.id && c.status == CommitmentStatus::Paid)
        .collect();
    let investors: HashSet<&str> = paid.iter().map(|c| c.investor_id.as_str()).collect();

    RoundTotals {
        current_amount: paid.iter().map(|c| c.amount).sum(),
        investor_count: investors.len() as i64,
    }
}

pub fn apply_totals(round: &Round, totals: RoundTotals, now: DateTime<Utc>) -> Round {
    let mut updated = round.clone();
    updated.current_amount = totals.current_amount;
    updated.investor_count = totals.investor_count;
    updated.updated_at = now;
    updated
}
