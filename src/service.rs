use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use crate::auth::{self, Registration, TokenPayload};
use crate::config::ServicePolicy;
use crate::dashboard;
use crate::error::{
    AuthError, FundingError, FundingResult, NotFoundError, StateError, StorageError,
};
use crate::lifecycle;
use crate::models::{
    Commitment, CommitmentType, CommitteeEvaluation, CommitteeMemberStats, DashboardStats, Round,
    RoundDecisionSummary, RoundStatus, RoundTotals, UserProfile, UserRole,
};
use crate::repository::Repository;
use crate::scoring::{self, EvaluationSubmission};

/// Administrative and startup actions on a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundAction {
    Submit,
    Approve,
    RequestRevision,
    Close,
    Cancel,
}

impl std::str::FromStr for RoundAction {
    type Err = crate::error::ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "submit" => Ok(RoundAction::Submit),
            "approve" => Ok(RoundAction::Approve),
            "revise" => Ok(RoundAction::RequestRevision),
            "close" => Ok(RoundAction::Close),
            "cancel" => Ok(RoundAction::Cancel),
            other => Err(crate::error::ValidationError::InvalidField {
                field: "round action",
                value: other.to_string(),
            }),
        }
    }
}

/// One async mutex per round, so read-compute-save sequences on the same
/// round never interleave within this process. Entries nobody holds or
/// waits on are dropped on the next acquire.
#[derive(Debug, Default)]
struct RoundLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoundLocks {
    async fn acquire(&self, round_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(round_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

fn storage(err: StorageError) -> FundingError {
    match err {
        StorageError::DuplicateEvaluation {
            round_id,
            committee_id,
        } => StateError::EvaluationAlreadySubmitted {
            round_id,
            committee_id,
        }
        .into(),
        StorageError::RoundLocked(round_id) => StateError::Conflict(round_id).into(),
        StorageError::DuplicateEmail(email) => StateError::EmailInUse(email).into(),
        other => FundingError::Storage(other),
    }
}

/// Stateless front door to the funding domain: loads snapshots from the
/// repository, runs the pure domain functions and saves the result.
pub struct FundingService {
    repo: Arc<dyn Repository>,
    policy: ServicePolicy,
    token_secret: String,
    locks: RoundLocks,
}

impl FundingService {
    pub fn new(repo: Arc<dyn Repository>, policy: ServicePolicy, token_secret: impl Into<String>) -> Self {
        FundingService {
            repo,
            policy,
            token_secret: token_secret.into(),
            locks: RoundLocks::default(),
        }
    }

    pub async fn find_round(&self, round_id: &str) -> FundingResult<Round> {
        self.repo
            .find_round(round_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| NotFoundError::Round(round_id.to_string()).into())
    }

    pub async fn evaluations_for_round(&self, round_id: &str) -> FundingResult<Vec<CommitteeEvaluation>> {
        self.repo
            .list_evaluations_by_round(round_id)
            .await
            .map_err(storage)
    }

    pub async fn commitments_for_round(&self, round_id: &str) -> FundingResult<Vec<Commitment>> {
        self.repo
            .list_commitments_by_round(round_id)
            .await
            .map_err(storage)
    }

    #[instrument(skip(self, submission), fields(round_id = %submission.round_id, committee_id = %submission.committee_id))]
    pub async fn submit_evaluation(
        &self,
        submission: EvaluationSubmission,
    ) -> FundingResult<CommitteeEvaluation> {
        let _guard = self.locks.acquire(&submission.round_id).await;
        let round = self.find_round(&submission.round_id).await?;

        let already = self
            .repo
            .list_evaluations_by_round(&round.id)
            .await
            .map_err(storage)?
            .into_iter()
            .any(|e| e.committee_id == submission.committee_id && e.is_completed);
        if already {
            return Err(StateError::EvaluationAlreadySubmitted {
                round_id: round.id.clone(),
                committee_id: submission.committee_id.clone(),
            }
            .into());
        }

        let evaluation = scoring::submit_evaluation(
            &round,
            submission,
            self.policy.strict_evaluation_guard,
            Utc::now(),
        )?;
        self.repo.save_evaluation(&evaluation).await.map_err(storage)?;
        info!(
            evaluation_id = %evaluation.id,
            total_score = evaluation.total_score,
            average_score = evaluation.average_score,
            decision = %evaluation.decision,
            "evaluation recorded"
        );
        Ok(evaluation)
    }

    #[instrument(skip(self))]
    pub async fn accept_commitment(
        &self,
        round_id: &str,
        investor_id: &str,
        amount: i64,
        commitment_type: CommitmentType,
    ) -> FundingResult<Commitment> {
        let _guard = self.locks.acquire(round_id).await;
        let round = self.find_round(round_id).await?;

        let commitment =
            match lifecycle::accept_commitment(&round, investor_id, amount, commitment_type, Utc::now()) {
                Ok(commitment) => commitment,
                Err(err) => {
                    warn!(error = %err, "commitment refused");
                    return Err(err);
                }
            };
        self.repo.save_commitment(&commitment).await.map_err(storage)?;
        info!(commitment_id = %commitment.id, "commitment pending review");
        Ok(commitment)
    }

    async fn find_commitment(&self, commitment_id: &str) -> FundingResult<Commitment> {
        self.repo
            .find_commitment(commitment_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| NotFoundError::Commitment(commitment_id.to_string()).into())
    }

    #[instrument(skip(self))]
    pub async fn review_commitment(&self, commitment_id: &str, approved: bool) -> FundingResult<Commitment> {
        let commitment = self.find_commitment(commitment_id).await?;
        let _guard = self.locks.acquire(&commitment.round_id).await;
        let commitment = self.find_commitment(commitment_id).await?;

        let reviewed = lifecycle::review_commitment(&commitment, approved, Utc::now())?;
        self.repo.save_commitment(&reviewed).await.map_err(storage)?;
        info!(status = %reviewed.status, "commitment reviewed");
        Ok(reviewed)
    }

    /// Marks an approved commitment paid and refreshes the round totals.
    /// A live round that reaches its target is closed.
    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, commitment_id: &str) -> FundingResult<(Commitment, Round)> {
        let commitment = self.find_commitment(commitment_id).await?;
        let _guard = self.locks.acquire(&commitment.round_id).await;
        let commitment = self.find_commitment(commitment_id).await?;

        let settled = lifecycle::confirm_payment(&commitment, Utc::now())?;
        self.repo.save_commitment(&settled).await.map_err(storage)?;

        let mut round = self.refresh_totals(&settled.round_id).await?.0;
        if round.status == RoundStatus::Live && round.current_amount >= round.target_amount {
            round = lifecycle::close(&round, Utc::now())?;
            self.repo.save_round(&round).await.map_err(storage)?;
            info!(round_id = %round.id, raised = round.current_amount, "target reached, round closed");
        }
        Ok((settled, round))
    }

    async fn refresh_totals(&self, round_id: &str) -> FundingResult<(Round, RoundTotals)> {
        let round = self.find_round(round_id).await?;
        let commitments = self
            .repo
            .list_commitments_by_round(round_id)
            .await
            .map_err(storage)?;
        let totals = lifecycle::recompute_round_totals(&round, &commitments);
        let updated = lifecycle::apply_totals(&round, totals, Utc::now());
        self.repo.save_round(&updated).await.map_err(storage)?;
        Ok((updated, totals))
    }

    #[instrument(skip(self))]
    pub async fn recompute_round_totals(&self, round_id: &str) -> FundingResult<RoundTotals> {
        let _guard = self.locks.acquire(round_id).await;
        let (_, totals) = self.refresh_totals(round_id).await?;
        info!(
            current_amount = totals.current_amount,
            investor_count = totals.investor_count,
            "round totals recomputed"
        );
        Ok(totals)
    }

    pub async fn round_decision_summary(&self, round_id: &str) -> FundingResult<RoundDecisionSummary> {
        let round = self.find_round(round_id).await?;
        let evaluations = self
            .repo
            .list_evaluations_by_round(&round.id)
            .await
            .map_err(storage)?;
        Ok(scoring::aggregate_for_round(
            &round.id,
            &evaluations,
            &self.policy.approval,
        ))
    }

    pub async fn committee_member_stats(&self, member_id: &str) -> FundingResult<CommitteeMemberStats> {
        let evaluations = self
            .repo
            .list_evaluations_by_committee_member(member_id)
            .await
            .map_err(storage)?;
        let rounds = self.repo.list_rounds().await.map_err(storage)?;
        let assignments = self
            .repo
            .list_assignments_by_committee_member(member_id)
            .await
            .map_err(storage)?;
        Ok(scoring::aggregate_for_committee_member(
            member_id,
            &evaluations,
            &rounds,
            &assignments,
            self.policy.pending_scope,
        ))
    }

    /// Only the owning startup's user may submit a round for review.
    async fn require_owner(&self, round: &Round, caller: &TokenPayload) -> FundingResult<()> {
        let owns = self
            .repo
            .list_startups()
            .await
            .map_err(storage)?
            .iter()
            .any(|s| s.id == round.startup_id && s.user_id == caller.user_id);
        if !owns {
            warn!(round_id = %round.id, user_id = %caller.user_id, "round not owned by caller");
            return Err(AuthError::Forbidden { role: caller.role }.into());
        }
        Ok(())
    }

    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn transition(
        &self,
        round_id: &str,
        action: RoundAction,
        caller: &TokenPayload,
    ) -> FundingResult<Round> {
        let _guard = self.locks.acquire(round_id).await;
        let round = self.find_round(round_id).await?;
        let now = Utc::now();

        let updated = match action {
            RoundAction::Submit => {
                self.require_owner(&round, caller).await?;
                lifecycle::submit_for_review(&round, now)?
            }
            RoundAction::Approve => {
                let summary = self.round_decision_summary(round_id).await?;
                lifecycle::approve(&round, &summary, &self.policy.approval, now)?
            }
            RoundAction::RequestRevision => {
                let summary = self.round_decision_summary(round_id).await?;
                lifecycle::request_revision(&round, &summary, now)?
            }
            RoundAction::Close => lifecycle::close(&round, now)?,
            RoundAction::Cancel => lifecycle::cancel(&round, now)?,
        };
        self.repo.save_round(&updated).await.map_err(storage)?;
        info!(from = %round.status, to = %updated.status, "round transitioned");
        Ok(updated)
    }

    pub async fn dashboard(&self, user_id: &str, role: UserRole) -> FundingResult<DashboardStats> {
        match role {
            UserRole::Startup => {
                let startup = self
                    .repo
                    .list_startups()
                    .await
                    .map_err(storage)?
                    .into_iter()
                    .find(|s| s.user_id == user_id)
                    .ok_or_else(|| NotFoundError::Startup(user_id.to_string()))?;
                let rounds = self.repo.list_rounds().await.map_err(storage)?;
                let commitments = self.repo.list_commitments().await.map_err(storage)?;
                Ok(DashboardStats::Startup(dashboard::startup_stats(
                    &startup,
                    &rounds,
                    &commitments,
                )))
            }
            UserRole::Investor => {
                let commitments = self
                    .repo
                    .list_commitments_by_investor(user_id)
                    .await
                    .map_err(storage)?;
                Ok(DashboardStats::Investor(dashboard::investor_stats(
                    user_id,
                    &commitments,
                )))
            }
            UserRole::Admin | UserRole::SuperAdmin => {
                let users = self.repo.list_users().await.map_err(storage)?;
                let startups = self.repo.list_startups().await.map_err(storage)?;
                let rounds = self.repo.list_rounds().await.map_err(storage)?;
                let commitments = self.repo.list_commitments().await.map_err(storage)?;
                Ok(DashboardStats::Admin(dashboard::admin_stats(
                    &users,
                    &startups,
                    &rounds,
                    &commitments,
                )))
            }
            UserRole::Committee => Ok(DashboardStats::Committee(
                self.committee_member_stats(user_id).await?,
            )),
        }
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str, role: UserRole) -> FundingResult<(String, UserProfile)> {
        let user = self.repo.find_user_by_email(email).await.map_err(storage)?;
        if let Err(err) = auth::check_credentials(user.as_ref(), password, role) {
            warn!(error = %err, "login refused");
            return Err(err.into());
        }
        let user = user.ok_or(AuthError::InvalidCredentials)?;
        let token = auth::issue_token(&user, &self.token_secret, Utc::now())?;
        info!(user_id = %user.id, "session issued");
        Ok((token, UserProfile::from(&user)))
    }

    /// Creates a startup or investor account. Emails are unique, ignoring case.
    #[instrument(skip(self, registration), fields(email = %registration.email, role = %registration.role))]
    pub async fn register(&self, registration: &Registration) -> FundingResult<UserProfile> {
        let (user, startup) = auth::new_account(registration, Utc::now())?;
        if self
            .repo
            .find_user_by_email(&user.email)
            .await
            .map_err(storage)?
            .is_some()
        {
            warn!("email already registered");
            return Err(StateError::EmailInUse(user.email).into());
        }

        self.repo.save_user(&user).await.map_err(storage)?;
        if let Some(startup) = &startup {
            self.repo.save_startup(startup).await.map_err(storage)?;
        }
        info!(user_id = %user.id, "account registered");
        Ok(UserProfile::from(&user))
    }

    /// Verifies a session token and the caller's role.
    pub async fn authenticate(&self, token: &str, allowed: &[UserRole]) -> FundingResult<TokenPayload> {
        let payload = auth::verify_token(token, &self.token_secret, Utc::now())?;
        let user = self
            .repo
            .find_user(&payload.user_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| NotFoundError::User(payload.user_id.clone()))?;
        if !user.is_active {
            return Err(AuthError::Inactive(user.email).into());
        }
        auth::require_role(&payload, allowed)?;
        Ok(payload)
    }

    pub async fn flush(&self) -> FundingResult<()> {
        self.repo.flush().await.map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::models::{CommitmentStatus, Decision, EvaluationScores};
    use crate::repository::{Fixtures, MemoryRepository};
    use crate::scoring::{ApprovalPolicy, PendingScope};

    fn service_with(policy: ServicePolicy) -> (Arc<MemoryRepository>, FundingService) {
        let repo = Arc::new(MemoryRepository::new(Fixtures::bundled().unwrap()));
        let service = FundingService::new(repo.clone(), policy, "test-secret");
        (repo, service)
    }

    fn service() -> (Arc<MemoryRepository>, FundingService) {
        service_with(ServicePolicy::default())
    }

    fn caller(user_id: &str, role: UserRole) -> TokenPayload {
        TokenPayload {
            user_id: user_id.to_string(),
            email: format!("{user_id}@example.io"),
            role,
            exp: i64::MAX,
        }
    }

    fn admin() -> TokenPayload {
        caller("u1", UserRole::Admin)
    }

    fn submission(round_id: &str, member: &str, decision: Decision) -> EvaluationSubmission {
        EvaluationSubmission {
            round_id: round_id.to_string(),
            committee_id: member.to_string(),
            scores: EvaluationScores::uniform(8.0),
            decision,
            comments: "ready".to_string(),
        }
    }

    #[tokio::test]
    async fn evaluation_is_scored_and_stored() {
        let (repo, service) = service();
        let evaluation = service
            .submit_evaluation(submission("r2", "u7", Decision::Approve))
            .await
            .unwrap();
        assert_eq!(evaluation.total_score, 136.0);
        assert_eq!(evaluation.average_score, 8.0);

        let stored = repo.list_evaluations_by_round("r2").await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn second_evaluation_by_same_member_is_refused() {
        let (_, service) = service();
        let err = service
            .submit_evaluation(submission("r2", "u6", Decision::Reject))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FundingError::State(StateError::EvaluationAlreadySubmitted { .. })
        ));
    }

    #[tokio::test]
    async fn evaluation_guard_depends_on_policy() {
        let (_, strict) = service();
        let err = strict
            .submit_evaluation(submission("r1", "u7", Decision::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::State(StateError::InvalidRoundState { .. })));

        let (_, lenient) = service_with(ServicePolicy {
            strict_evaluation_guard: false,
            ..ServicePolicy::default()
        });
        assert!(lenient
            .submit_evaluation(submission("r1", "u7", Decision::Approve))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_round_is_not_found() {
        let (_, service) = service();
        let err = service
            .submit_evaluation(submission("r404", "u7", Decision::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::NotFound(NotFoundError::Round(id)) if id == "r404"));
    }

    #[tokio::test]
    async fn commitment_flow_updates_totals() {
        let (repo, service) = service();
        let commitment = service
            .accept_commitment("r1", "u4", 100_000, CommitmentType::Hard)
            .await
            .unwrap();
        assert_eq!(commitment.status, CommitmentStatus::Pending);

        let round = repo.find_round("r1").await.unwrap().unwrap();
        assert_eq!(round.current_amount, 150_000);

        service.review_commitment(&commitment.id, true).await.unwrap();
        let (paid, round) = service.confirm_payment(&commitment.id).await.unwrap();
        assert_eq!(paid.status, CommitmentStatus::Paid);
        assert_eq!(round.current_amount, 250_000);
        assert_eq!(round.investor_count, 1);
        assert_eq!(round.status, RoundStatus::Live);
    }

    #[tokio::test]
    async fn commitments_need_a_live_round() {
        let (_, service) = service();
        let err = service
            .accept_commitment("r3", "u4", 50_000, CommitmentType::Soft)
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::State(StateError::RoundNotLive { .. })));

        let err = service
            .accept_commitment("r1", "u4", 5_000, CommitmentType::Soft)
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::Validation(ValidationError::BelowMinimum { .. })));
    }

    #[tokio::test]
    async fn reaching_target_closes_round() {
        let (repo, service) = service();
        let mut round = repo.find_round("r1").await.unwrap().unwrap();
        round.target_amount = 225_000;
        repo.save_round(&round).await.unwrap();

        let (_, round) = service.confirm_payment("c2").await.unwrap();
        assert_eq!(round.current_amount, 225_000);
        assert_eq!(round.investor_count, 2);
        assert_eq!(round.status, RoundStatus::Closed);
    }

    #[tokio::test]
    async fn recompute_matches_fixture_totals() {
        let (_, service) = service();
        let first = service.recompute_round_totals("r1").await.unwrap();
        let second = service.recompute_round_totals("r1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.current_amount, 150_000);
    }

    #[tokio::test]
    async fn approval_waits_for_quorum() {
        let (_, service) = service_with(ServicePolicy {
            approval: ApprovalPolicy {
                quorum: 2,
                min_approvals: 1,
            },
            ..ServicePolicy::default()
        });
        let err = service.transition("r2", RoundAction::Approve, &admin()).await.unwrap_err();
        assert!(matches!(err, FundingError::State(StateError::GuardFailed { .. })));

        service
            .submit_evaluation(submission("r2", "u7", Decision::Revise))
            .await
            .unwrap();
        let live = service.transition("r2", RoundAction::Approve, &admin()).await.unwrap();
        assert_eq!(live.status, RoundStatus::Live);
        assert!(live.start_date.is_some());
    }

    #[tokio::test]
    async fn revision_sends_round_back_to_draft() {
        let (_, service) = service();
        assert!(service.transition("r2", RoundAction::RequestRevision, &admin()).await.is_err());
        service
            .submit_evaluation(submission("r2", "u7", Decision::Revise))
            .await
            .unwrap();
        let draft = service
            .transition("r2", RoundAction::RequestRevision, &admin())
            .await
            .unwrap();
        assert_eq!(draft.status, RoundStatus::Draft);
    }

    #[tokio::test]
    async fn committee_dashboard_scopes_pending_work() {
        let (_, global) = service();
        match global.dashboard("u6", UserRole::Committee).await.unwrap() {
            DashboardStats::Committee(stats) => {
                assert_eq!(stats.total_evaluations, 2);
                assert!((stats.average_score - 7.5).abs() < 1e-9);
                assert_eq!(stats.pending_evaluations, 1);
            }
            other => panic!("unexpected stats {other:?}"),
        }

        let (_, assigned) = service_with(ServicePolicy {
            pending_scope: PendingScope::Assigned,
            ..ServicePolicy::default()
        });
        let stats = assigned.committee_member_stats("u6").await.unwrap();
        assert_eq!(stats.pending_evaluations, 0);
        let stats = assigned.committee_member_stats("u7").await.unwrap();
        assert_eq!(stats.pending_evaluations, 1);
    }

    #[tokio::test]
    async fn login_then_authenticate() {
        let (_, service) = service();
        let (token, profile) = service
            .login("selin@committee.io", "demo123", UserRole::Committee)
            .await
            .unwrap();
        assert_eq!(profile.id, "u6");
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("passwordHash").is_none());

        let payload = service.authenticate(&token, &[UserRole::Committee]).await.unwrap();
        assert_eq!(payload.user_id, "u6");

        let err = service
            .authenticate(&token, &[UserRole::Investor])
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::Auth(AuthError::Forbidden { .. })));

        let err = service
            .login("selin@committee.io", "nope", UserRole::Committee)
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn admin_token_is_not_an_investor_token() {
        let (_, service) = service();
        let (token, _) = service
            .login("admin@fundbridge.io", "demo123", UserRole::Admin)
            .await
            .unwrap();

        for guard in [&[UserRole::Investor][..], &[UserRole::Committee][..]] {
            let err = service.authenticate(&token, guard).await.unwrap_err();
            assert!(matches!(
                err,
                FundingError::Auth(AuthError::Forbidden { role: UserRole::Admin })
            ));
        }
        let payload = service.authenticate(&token, auth::ADMIN_ROLES).await.unwrap();
        assert_eq!(payload.user_id, "u1");
    }

    #[tokio::test]
    async fn only_the_owning_startup_submits_a_round() {
        let (repo, service) = service();
        let mut draft = repo.find_round("r3").await.unwrap().unwrap();
        draft.business_plan_id = Some("bp3".to_string());
        repo.save_round(&draft).await.unwrap();

        let err = service
            .transition("r3", RoundAction::Submit, &caller("u3", UserRole::Startup))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FundingError::Auth(AuthError::Forbidden { role: UserRole::Startup })
        ));
        let unchanged = repo.find_round("r3").await.unwrap().unwrap();
        assert_eq!(unchanged.status, RoundStatus::Draft);

        let submitted = service
            .transition("r3", RoundAction::Submit, &caller("u2", UserRole::Startup))
            .await
            .unwrap();
        assert_eq!(submitted.status, RoundStatus::CommitteeReview);
    }

    #[tokio::test]
    async fn cancel_action_stops_open_rounds_only() {
        let (repo, service) = service();
        let cancelled = service
            .transition("r1", RoundAction::Cancel, &admin())
            .await
            .unwrap();
        assert_eq!(cancelled.status, RoundStatus::Cancelled);
        let stored = repo.find_round("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, RoundStatus::Cancelled);

        let err = service
            .transition("r4", RoundAction::Cancel, &admin())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FundingError::State(StateError::InvalidTransition {
                from: RoundStatus::Closed,
                to: RoundStatus::Cancelled
            })
        ));
    }

    #[tokio::test]
    async fn registration_creates_account_once() {
        let (repo, service) = service();
        let registration = Registration {
            email: "deniz@greengrid.io".to_string(),
            password: "secret1".to_string(),
            first_name: "Deniz".to_string(),
            last_name: "Kaya".to_string(),
            role: UserRole::Startup,
            company_name: Some("GreenGrid".to_string()),
            sector: Some("energy".to_string()),
        };
        let profile = service.register(&registration).await.unwrap();
        assert_eq!(profile.role, UserRole::Startup);
        assert!(repo
            .list_startups()
            .await
            .unwrap()
            .iter()
            .any(|s| s.user_id == profile.id && s.company_name == "GreenGrid"));

        let (_, logged_in) = service
            .login("deniz@greengrid.io", "secret1", UserRole::Startup)
            .await
            .unwrap();
        assert_eq!(logged_in.id, profile.id);

        let err = service.register(&registration).await.unwrap_err();
        assert!(matches!(err, FundingError::State(StateError::EmailInUse(_))));

        let taken = Registration {
            email: "Ayse@Investors.io".to_string(),
            role: UserRole::Investor,
            ..registration
        };
        let err = service.register(&taken).await.unwrap_err();
        assert!(matches!(err, FundingError::State(StateError::EmailInUse(_))));
    }

    #[tokio::test]
    async fn idle_round_locks_are_released() {
        let (_, service) = service();
        for n in 0..10 {
            let _ = service
                .submit_evaluation(submission(&format!("missing-{n}"), "u7", Decision::Approve))
                .await;
        }
        service.recompute_round_totals("r1").await.unwrap();
        assert_eq!(service.locks.tracked(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commitments_all_land() {
        let (repo, service) = service();
        let service = Arc::new(service);
        let mut handles = Vec::new();
        for n in 0..16 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .accept_commitment("r1", "u5", 10_000 + n, CommitmentType::Soft)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let commitments = repo.list_commitments_by_round("r1").await.unwrap();
        assert_eq!(commitments.len(), 4 + 16);
    }
}
