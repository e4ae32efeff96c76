//! Persistence seam for the funding domain.
//!
//! `Repository` is the query/save surface the service depends on. Two
//! backends exist: [`MemoryRepository`] over a JSON fixture file and
//! `db::PgRepository` over Postgres.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::models::{
    Assignment, Commitment, CommitteeEvaluation, Round, RoundStatus, Startup, User,
};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_round(&self, id: &str) -> StorageResult<Option<Round>>;
    async fn list_rounds(&self) -> StorageResult<Vec<Round>>;
    async fn save_round(&self, round: &Round) -> StorageResult<()>;

    async fn find_commitment(&self, id: &str) -> StorageResult<Option<Commitment>>;
    async fn list_commitments(&self) -> StorageResult<Vec<Commitment>>;
    async fn list_commitments_by_round(&self, round_id: &str) -> StorageResult<Vec<Commitment>>;
    async fn list_commitments_by_investor(&self, investor_id: &str) -> StorageResult<Vec<Commitment>>;

    /// Inserts or updates a commitment. A new commitment is refused with
    /// `StorageError::RoundLocked` unless its round is live at write time.
    async fn save_commitment(&self, commitment: &Commitment) -> StorageResult<()>;

    async fn list_evaluations(&self) -> StorageResult<Vec<CommitteeEvaluation>>;
    async fn list_evaluations_by_round(&self, round_id: &str) -> StorageResult<Vec<CommitteeEvaluation>>;
    async fn list_evaluations_by_committee_member(
        &self,
        committee_id: &str,
    ) -> StorageResult<Vec<CommitteeEvaluation>>;

    /// Stores a new evaluation. At most one per (round, member).
    async fn save_evaluation(&self, evaluation: &CommitteeEvaluation) -> StorageResult<()>;

    async fn find_user(&self, id: &str) -> StorageResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;
    async fn list_users(&self) -> StorageResult<Vec<User>>;

    /// Inserts or updates a user. An email already held by another user is
    /// refused with `StorageError::DuplicateEmail`.
    async fn save_user(&self, user: &User) -> StorageResult<()>;

    async fn list_startups(&self) -> StorageResult<Vec<Startup>>;
    async fn save_startup(&self, startup: &Startup) -> StorageResult<()>;
    async fn list_assignments_by_committee_member(
        &self,
        committee_id: &str,
    ) -> StorageResult<Vec<Assignment>>;

    /// Makes buffered writes durable. No-op for backends that write through.
    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// The full data set, as stored in a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixtures {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub startups: Vec<Startup>,
    #[serde(default)]
    pub rounds: Vec<Round>,
    #[serde(default)]
    pub commitments: Vec<Commitment>,
    #[serde(default)]
    pub evaluations: Vec<CommitteeEvaluation>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

pub const BUNDLED_FIXTURES: &str = include_str!("../fixtures/platform.json");

impl Fixtures {
    pub fn bundled() -> StorageResult<Self> {
        Ok(serde_json::from_str(BUNDLED_FIXTURES)?)
    }
}

/// In-memory repository, optionally backed by a fixture file on disk.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    data: Mutex<Fixtures>,
    path: Option<PathBuf>,
}

impl MemoryRepository {
    pub fn new(fixtures: Fixtures) -> Self {
        MemoryRepository {
            data: Mutex::new(fixtures),
            path: None,
        }
    }

    /// Loads fixtures from `path`; `flush` writes them back there.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let fixtures: Fixtures = serde_json::from_str(&raw)?;
        debug!(
            path = %path.display(),
            rounds = fixtures.rounds.len(),
            commitments = fixtures.commitments.len(),
            evaluations = fixtures.evaluations.len(),
            "loaded fixtures"
        );
        Ok(MemoryRepository {
            data: Mutex::new(fixtures),
            path: Some(path.to_path_buf()),
        })
    }

    fn data(&self) -> MutexGuard<'_, Fixtures> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn upsert<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_round(&self, id: &str) -> StorageResult<Option<Round>> {
        Ok(self.data().rounds.iter().find(|r| r.id == id).cloned())
    }

    async fn list_rounds(&self) -> StorageResult<Vec<Round>> {
        Ok(self.data().rounds.clone())
    }

    async fn save_round(&self, round: &Round) -> StorageResult<()> {
        upsert(&mut self.data().rounds, round, |r| r.id == round.id);
        Ok(())
    }

    async fn find_commitment(&self, id: &str) -> StorageResult<Option<Commitment>> {
        Ok(self.data().commitments.iter().find(|c| c.id == id).cloned())
    }

    async fn list_commitments(&self) -> StorageResult<Vec<Commitment>> {
        Ok(self.data().commitments.clone())
    }

    async fn list_commitments_by_round(&self, round_id: &str) -> StorageResult<Vec<Commitment>> {
        Ok(self
            .data()
            .commitments
            .iter()
            .filter(|c| c.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn list_commitments_by_investor(&self, investor_id: &str) -> StorageResult<Vec<Commitment>> {
        Ok(self
            .data()
            .commitments
            .iter()
            .filter(|c| c.investor_id == investor_id)
            .cloned()
            .collect())
    }

    async fn save_commitment(&self, commitment: &Commitment) -> StorageResult<()> {
        let mut data = self.data();
        let exists = data.commitments.iter().any(|c| c.id == commitment.id);
        if !exists {
            let live = data
                .rounds
                .iter()
                .any(|r| r.id == commitment.round_id && r.status == RoundStatus::Live);
            if !live {
                return Err(StorageError::RoundLocked(commitment.round_id.clone()));
            }
        }
        upsert(&mut data.commitments, commitment, |c| c.id == commitment.id);
        Ok(())
    }

    async fn list_evaluations(&self) -> StorageResult<Vec<CommitteeEvaluation>> {
        Ok(self.data().evaluations.clone())
    }

    async fn list_evaluations_by_round(&self, round_id: &str) -> StorageResult<Vec<CommitteeEvaluation>> {
        Ok(self
            .data()
            .evaluations
            .iter()
            .filter(|e| e.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn list_evaluations_by_committee_member(
        &self,
        committee_id: &str,
    ) -> StorageResult<Vec<CommitteeEvaluation>> {
        Ok(self
            .data()
            .evaluations
            .iter()
            .filter(|e| e.committee_id == committee_id)
            .cloned()
            .collect())
    }

    async fn save_evaluation(&self, evaluation: &CommitteeEvaluation) -> StorageResult<()> {
        let mut data = self.data();
        let duplicate = data.evaluations.iter().any(|e| {
            e.id != evaluation.id
                && e.round_id == evaluation.round_id
                && e.committee_id == evaluation.committee_id
        });
        if duplicate {
            return Err(StorageError::DuplicateEvaluation {
                round_id: evaluation.round_id.clone(),
                committee_id: evaluation.committee_id.clone(),
            });
        }
        upsert(&mut data.evaluations, evaluation, |e| e.id == evaluation.id);
        Ok(())
    }

    async fn find_user(&self, id: &str) -> StorageResult<Option<User>> {
        Ok(self.data().users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        Ok(self
            .data()
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self) -> StorageResult<Vec<User>> {
        Ok(self.data().users.clone())
    }

    async fn save_user(&self, user: &User) -> StorageResult<()> {
        let mut data = self.data();
        let taken = data
            .users
            .iter()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email));
        if taken {
            return Err(StorageError::DuplicateEmail(user.email.clone()));
        }
        upsert(&mut data.users, user, |u| u.id == user.id);
        Ok(())
    }

    async fn list_startups(&self) -> StorageResult<Vec<Startup>> {
        Ok(self.data().startups.clone())
    }

    async fn save_startup(&self, startup: &Startup) -> StorageResult<()> {
        upsert(&mut self.data().startups, startup, |s| s.id == startup.id);
        Ok(())
    }

    async fn list_assignments_by_committee_member(
        &self,
        committee_id: &str,
    ) -> StorageResult<Vec<Assignment>> {
        Ok(self
            .data()
            .assignments
            .iter()
            .filter(|a| a.committee_id == committee_id)
            .cloned()
            .collect())
    }

    async fn flush(&self) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(&*self.data())?;
        std::fs::write(path, raw)?;
        debug!(path = %path.display(), "fixtures written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_fixtures_parse() {
        let fixtures = Fixtures::bundled().unwrap();
        assert!(!fixtures.users.is_empty());
        assert!(fixtures.rounds.iter().any(|r| r.status == RoundStatus::Live));
        assert!(fixtures
            .rounds
            .iter()
            .any(|r| r.status == RoundStatus::CommitteeReview));
    }

    #[tokio::test]
    async fn duplicate_evaluation_is_refused() {
        let repo = MemoryRepository::new(Fixtures::bundled().unwrap());
        let existing = repo.list_evaluations().await.unwrap().remove(0);

        let mut copy = existing.clone();
        copy.id = "e-copy".to_string();
        let err = repo.save_evaluation(&copy).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateEvaluation { .. }));

        repo.save_evaluation(&existing).await.unwrap();
    }

    #[tokio::test]
    async fn new_commitment_needs_live_round() {
        let repo = MemoryRepository::new(Fixtures::bundled().unwrap());
        let draft = repo
            .list_rounds()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.status == RoundStatus::Draft)
            .unwrap();
        let mut commitment = repo.list_commitments().await.unwrap().remove(0);
        commitment.id = "c-new".to_string();
        commitment.round_id = draft.id.clone();

        let err = repo.save_commitment(&commitment).await.unwrap_err();
        assert!(matches!(err, StorageError::RoundLocked(id) if id == draft.id));
    }

    #[tokio::test]
    async fn user_emails_stay_unique() {
        let repo = MemoryRepository::new(Fixtures::bundled().unwrap());
        let mut user = repo.find_user("u4").await.unwrap().unwrap();
        user.first_name = "Ayşe".to_string();
        repo.save_user(&user).await.unwrap();

        user.id = "u-other".to_string();
        user.email = "AYSE@investors.io".to_string();
        let err = repo.save_user(&user).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateEmail(email) if email == "AYSE@investors.io"));
        assert_eq!(repo.list_users().await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn flush_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.json");
        std::fs::write(&path, BUNDLED_FIXTURES).unwrap();

        let repo = MemoryRepository::open(&path).unwrap();
        let mut round = repo.list_rounds().await.unwrap().remove(0);
        round.title = "Renamed".to_string();
        repo.save_round(&round).await.unwrap();
        repo.flush().await.unwrap();

        let reopened = MemoryRepository::open(&path).unwrap();
        let stored = reopened.find_round(&round.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Renamed");
    }
}
