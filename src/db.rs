use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::models::{
    Assignment, Commitment, CommitteeEvaluation, EvaluationScores, Round, RoundStatus, Startup,
    User,
};
use crate::repository::{Fixtures, Repository};

pub async fn init_db(pool: &PgPool) -> StorageResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads the bundled demo fixtures. Rows that already exist are left alone.
pub async fn seed(pool: &PgPool) -> StorageResult<usize> {
    let fixtures = Fixtures::bundled()?;
    let mut inserted = 0usize;

    for user in &fixtures.users {
        let result = sqlx::query(
            r#"
            INSERT INTO funding.users
            (id, email, first_name, last_name, role, password_hash, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(pool)
        .await?;
        inserted += result.rows_affected() as usize;
    }

    for startup in &fixtures.startups {
        let result = sqlx::query(
            r#"
            INSERT INTO funding.startups (id, user_id, company_name, sector)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&startup.id)
        .bind(&startup.user_id)
        .bind(&startup.company_name)
        .bind(&startup.sector)
        .execute(pool)
        .await?;
        inserted += result.rows_affected() as usize;
    }

    for round in &fixtures.rounds {
        let result = sqlx::query(
            r#"
            INSERT INTO funding.rounds
            (id, startup_id, title, target_amount, min_investment, max_investment,
             current_amount, investor_count, status, start_date, end_date,
             business_plan_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&round.id)
        .bind(&round.startup_id)
        .bind(&round.title)
        .bind(round.target_amount)
        .bind(round.min_investment)
        .bind(round.max_investment)
        .bind(round.current_amount)
        .bind(round.investor_count)
        .bind(round.status.as_str())
        .bind(round.start_date)
        .bind(round.end_date)
        .bind(&round.business_plan_id)
        .bind(round.created_at)
        .bind(round.updated_at)
        .execute(pool)
        .await?;
        inserted += result.rows_affected() as usize;
    }

    for commitment in &fixtures.commitments {
        let result = sqlx::query(
            r#"
            INSERT INTO funding.commitments
            (id, round_id, investor_id, amount, commitment_type, status,
             contract_signed, receipt_uploaded, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&commitment.id)
        .bind(&commitment.round_id)
        .bind(&commitment.investor_id)
        .bind(commitment.amount)
        .bind(commitment.commitment_type.as_str())
        .bind(commitment.status.as_str())
        .bind(commitment.contract_signed)
        .bind(commitment.receipt_uploaded)
        .bind(commitment.created_at)
        .bind(commitment.updated_at)
        .execute(pool)
        .await?;
        inserted += result.rows_affected() as usize;
    }

    for evaluation in &fixtures.evaluations {
        let result = insert_evaluation(evaluation)
            .execute(pool)
            .await?;
        inserted += result.rows_affected() as usize;
    }

    for assignment in &fixtures.assignments {
        let result = sqlx::query(
            r#"
            INSERT INTO funding.assignments (round_id, committee_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&assignment.round_id)
        .bind(&assignment.committee_id)
        .execute(pool)
        .await?;
        inserted += result.rows_affected() as usize;
    }

    info!(inserted, "seed complete");
    Ok(inserted)
}

fn insert_evaluation(
    evaluation: &CommitteeEvaluation,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO funding.evaluations
        (id, round_id, committee_id, scores, total_score, average_score, decision,
         comments, is_completed, submitted_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&evaluation.id)
    .bind(&evaluation.round_id)
    .bind(&evaluation.committee_id)
    .bind(Json(&evaluation.scores))
    .bind(evaluation.total_score)
    .bind(evaluation.average_score)
    .bind(evaluation.decision.as_str())
    .bind(&evaluation.comments)
    .bind(evaluation.is_completed)
    .bind(evaluation.submitted_at)
    .bind(evaluation.created_at)
    .bind(evaluation.updated_at)
}

fn parse<T: std::str::FromStr>(row: &PgRow, column: &str) -> StorageResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| StorageError::Corrupt(format!("{column} = {raw}")))
}

fn round_from_row(row: &PgRow) -> StorageResult<Round> {
    Ok(Round {
        id: row.try_get("id")?,
        startup_id: row.try_get("startup_id")?,
        title: row.try_get("title")?,
        target_amount: row.try_get("target_amount")?,
        min_investment: row.try_get("min_investment")?,
        max_investment: row.try_get("max_investment")?,
        current_amount: row.try_get("current_amount")?,
        investor_count: row.try_get("investor_count")?,
        status: parse(row, "status")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        business_plan_id: row.try_get("business_plan_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn commitment_from_row(row: &PgRow) -> StorageResult<Commitment> {
    Ok(Commitment {
        id: row.try_get("id")?,
        round_id: row.try_get("round_id")?,
        investor_id: row.try_get("investor_id")?,
        amount: row.try_get("amount")?,
        commitment_type: parse(row, "commitment_type")?,
        status: parse(row, "status")?,
        contract_signed: row.try_get("contract_signed")?,
        receipt_uploaded: row.try_get("receipt_uploaded")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn evaluation_from_row(row: &PgRow) -> StorageResult<CommitteeEvaluation> {
    let Json(scores): Json<EvaluationScores> = row.try_get("scores")?;
    Ok(CommitteeEvaluation {
        id: row.try_get("id")?,
        round_id: row.try_get("round_id")?,
        committee_id: row.try_get("committee_id")?,
        scores,
        total_score: row.try_get("total_score")?,
        average_score: row.try_get("average_score")?,
        decision: parse(row, "decision")?,
        comments: row.try_get("comments")?,
        is_completed: row.try_get("is_completed")?,
        submitted_at: row.try_get("submitted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from_row(row: &PgRow) -> StorageResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: parse(row, "role")?,
        password_hash: row.try_get("password_hash")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn collect<T>(rows: Vec<PgRow>, map: fn(&PgRow) -> StorageResult<T>) -> StorageResult<Vec<T>> {
    rows.iter().map(map).collect()
}

const ROUND_COLUMNS: &str = "SELECT id, startup_id, title, target_amount, min_investment, \
    max_investment, current_amount, investor_count, status, start_date, end_date, \
    business_plan_id, created_at, updated_at FROM funding.rounds";

const COMMITMENT_COLUMNS: &str = "SELECT id, round_id, investor_id, amount, commitment_type, \
    status, contract_signed, receipt_uploaded, created_at, updated_at FROM funding.commitments";

const EVALUATION_COLUMNS: &str = "SELECT id, round_id, committee_id, scores, total_score, \
    average_score, decision, comments, is_completed, submitted_at, created_at, updated_at \
    FROM funding.evaluations";

const USER_COLUMNS: &str = "SELECT id, email, first_name, last_name, role, password_hash, \
    is_active, created_at FROM funding.users";

/// Postgres-backed repository.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        PgRepository { pool }
    }

    async fn select<T>(
        &self,
        sql: String,
        bind: Option<&str>,
        map: fn(&PgRow) -> StorageResult<T>,
    ) -> StorageResult<Vec<T>> {
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        collect(query.fetch_all(&self.pool).await?, map)
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_round(&self, id: &str) -> StorageResult<Option<Round>> {
        let rows = self
            .select(format!("{ROUND_COLUMNS} WHERE id = $1"), Some(id), round_from_row)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_rounds(&self) -> StorageResult<Vec<Round>> {
        self.select(format!("{ROUND_COLUMNS} ORDER BY created_at"), None, round_from_row)
            .await
    }

    async fn save_round(&self, round: &Round) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO funding.rounds
            (id, startup_id, title, target_amount, min_investment, max_investment,
             current_amount, investor_count, status, start_date, end_date,
             business_plan_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                target_amount = EXCLUDED.target_amount,
                min_investment = EXCLUDED.min_investment,
                max_investment = EXCLUDED.max_investment,
                current_amount = EXCLUDED.current_amount,
                investor_count = EXCLUDED.investor_count,
                status = EXCLUDED.status,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                business_plan_id = EXCLUDED.business_plan_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&round.id)
        .bind(&round.startup_id)
        .bind(&round.title)
        .bind(round.target_amount)
        .bind(round.min_investment)
        .bind(round.max_investment)
        .bind(round.current_amount)
        .bind(round.investor_count)
        .bind(round.status.as_str())
        .bind(round.start_date)
        .bind(round.end_date)
        .bind(&round.business_plan_id)
        .bind(round.created_at)
        .bind(round.updated_at)
        .execute(&self.pool)
        .await?;
        debug!(round_id = %round.id, status = %round.status, "round saved");
        Ok(())
    }

    async fn find_commitment(&self, id: &str) -> StorageResult<Option<Commitment>> {
        let rows = self
            .select(
                format!("{COMMITMENT_COLUMNS} WHERE id = $1"),
                Some(id),
                commitment_from_row,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_commitments(&self) -> StorageResult<Vec<Commitment>> {
        self.select(
            format!("{COMMITMENT_COLUMNS} ORDER BY created_at"),
            None,
            commitment_from_row,
        )
        .await
    }

    async fn list_commitments_by_round(&self, round_id: &str) -> StorageResult<Vec<Commitment>> {
        self.select(
            format!("{COMMITMENT_COLUMNS} WHERE round_id = $1 ORDER BY created_at"),
            Some(round_id),
            commitment_from_row,
        )
        .await
    }

    async fn list_commitments_by_investor(&self, investor_id: &str) -> StorageResult<Vec<Commitment>> {
        self.select(
            format!("{COMMITMENT_COLUMNS} WHERE investor_id = $1 ORDER BY created_at"),
            Some(investor_id),
            commitment_from_row,
        )
        .await
    }

    async fn save_commitment(&self, commitment: &Commitment) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM funding.rounds WHERE id = $1 FOR UPDATE")
                .bind(&commitment.round_id)
                .fetch_optional(&mut *tx)
                .await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM funding.commitments WHERE id = $1)")
                .bind(&commitment.id)
                .fetch_one(&mut *tx)
                .await?;
        if !exists && status.as_deref() != Some(RoundStatus::Live.as_str()) {
            return Err(StorageError::RoundLocked(commitment.round_id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO funding.commitments
            (id, round_id, investor_id, amount, commitment_type, status,
             contract_signed, receipt_uploaded, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                contract_signed = EXCLUDED.contract_signed,
                receipt_uploaded = EXCLUDED.receipt_uploaded,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&commitment.id)
        .bind(&commitment.round_id)
        .bind(&commitment.investor_id)
        .bind(commitment.amount)
        .bind(commitment.commitment_type.as_str())
        .bind(commitment.status.as_str())
        .bind(commitment.contract_signed)
        .bind(commitment.receipt_uploaded)
        .bind(commitment.created_at)
        .bind(commitment.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(commitment_id = %commitment.id, status = %commitment.status, "commitment saved");
        Ok(())
    }

    async fn list_evaluations(&self) -> StorageResult<Vec<CommitteeEvaluation>> {
        self.select(
            format!("{EVALUATION_COLUMNS} ORDER BY created_at"),
            None,
            evaluation_from_row,
        )
        .await
    }

    async fn list_evaluations_by_round(&self, round_id: &str) -> StorageResult<Vec<CommitteeEvaluation>> {
        self.select(
            format!("{EVALUATION_COLUMNS} WHERE round_id = $1 ORDER BY created_at"),
            Some(round_id),
            evaluation_from_row,
        )
        .await
    }

    async fn list_evaluations_by_committee_member(
        &self,
        committee_id: &str,
    ) -> StorageResult<Vec<CommitteeEvaluation>> {
        self.select(
            format!("{EVALUATION_COLUMNS} WHERE committee_id = $1 ORDER BY created_at"),
            Some(committee_id),
            evaluation_from_row,
        )
        .await
    }

    async fn save_evaluation(&self, evaluation: &CommitteeEvaluation) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT id FROM funding.rounds WHERE id = $1 FOR UPDATE")
            .bind(&evaluation.round_id)
            .fetch_optional(&mut *tx)
            .await?;

        match insert_evaluation(evaluation).execute(&mut *tx).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(StorageError::DuplicateEvaluation {
                    round_id: evaluation.round_id.clone(),
                    committee_id: evaluation.committee_id.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        debug!(evaluation_id = %evaluation.id, round_id = %evaluation.round_id, "evaluation saved");
        Ok(())
    }

    async fn find_user(&self, id: &str) -> StorageResult<Option<User>> {
        let rows = self
            .select(format!("{USER_COLUMNS} WHERE id = $1"), Some(id), user_from_row)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let rows = self
            .select(
                format!("{USER_COLUMNS} WHERE lower(email) = lower($1)"),
                Some(email),
                user_from_row,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_users(&self) -> StorageResult<Vec<User>> {
        self.select(format!("{USER_COLUMNS} ORDER BY created_at"), None, user_from_row)
            .await
    }

    async fn save_user(&self, user: &User) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO funding.users
            (id, email, first_name, last_name, role, password_hash, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                role = EXCLUDED.role,
                password_hash = EXCLUDED.password_hash,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StorageError::DuplicateEmail(user.email.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save_startup(&self, startup: &Startup) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO funding.startups (id, user_id, company_name, sector)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                company_name = EXCLUDED.company_name,
                sector = EXCLUDED.sector
            "#,
        )
        .bind(&startup.id)
        .bind(&startup.user_id)
        .bind(&startup.company_name)
        .bind(&startup.sector)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_startups(&self) -> StorageResult<Vec<Startup>> {
        let rows = sqlx::query("SELECT id, user_id, company_name, sector FROM funding.startups")
            .fetch_all(&self.pool)
            .await?;
        let mut startups = Vec::new();
        for row in rows {
            startups.push(Startup {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                company_name: row.try_get("company_name")?,
                sector: row.try_get("sector")?,
            });
        }
        Ok(startups)
    }

    async fn list_assignments_by_committee_member(
        &self,
        committee_id: &str,
    ) -> StorageResult<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT round_id, committee_id FROM funding.assignments WHERE committee_id = $1",
        )
        .bind(committee_id)
        .fetch_all(&self.pool)
        .await?;
        let mut assignments = Vec::new();
        for row in rows {
            assignments.push(Assignment {
                round_id: row.try_get("round_id")?,
                committee_id: row.try_get("committee_id")?,
            });
        }
        Ok(assignments)
    }
}
