use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use csv::StringRecord;
use tracing::warn;

use crate::error::{FundingError, ValidationError};
use crate::models::{Criterion, EvaluationScores};
use crate::scoring::EvaluationSubmission;
use crate::service::FundingService;

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: Vec<(u64, String)>,
}

fn field<'a>(headers: &StringRecord, record: &'a StringRecord, name: &'static str) -> Result<&'a str, ValidationError> {
    headers
        .iter()
        .position(|header| header == name)
        .and_then(|index| record.get(index))
        .ok_or(ValidationError::InvalidField {
            field: name,
            value: String::new(),
        })
}

/// Parses one CSV row: `round_id`, `committee_id`, one column per criterion,
/// `decision`, and an optional `comments`.
pub fn parse_row(headers: &StringRecord, record: &StringRecord) -> Result<EvaluationSubmission, ValidationError> {
    let mut scores = HashMap::new();
    for (header, value) in headers.iter().zip(record.iter()) {
        if matches!(header, "round_id" | "committee_id" | "decision" | "comments") {
            continue;
        }
        let criterion: Criterion = header.parse()?;
        let parsed: f64 = value.trim().parse().map_err(|_| ValidationError::InvalidField {
            field: criterion.name(),
            value: value.to_string(),
        })?;
        scores.insert(criterion.name().to_string(), parsed);
    }

    Ok(EvaluationSubmission {
        round_id: field(headers, record, "round_id")?.trim().to_string(),
        committee_id: field(headers, record, "committee_id")?.trim().to_string(),
        scores: EvaluationScores::from_named(&scores)?,
        decision: field(headers, record, "decision")?.trim().parse()?,
        comments: field(headers, record, "comments").unwrap_or_default().to_string(),
    })
}

/// Submits every row through the service. Malformed records and rows the
/// domain refuses are skipped and reported. I/O and storage failures abort.
pub async fn import_evaluations_csv(service: &FundingService, csv_path: &Path) -> anyhow::Result<ImportOutcome> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let headers = reader.headers()?.clone();
    let mut outcome = ImportOutcome::default();

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) if err.is_io_error() => {
                return Err(err).with_context(|| format!("failed to read {}", csv_path.display()));
            }
            Err(err) => {
                let line = err.position().map(|p| p.line()).unwrap_or_default();
                warn!(line, error = %err, "skipping malformed record");
                outcome.skipped.push((line, err.to_string()));
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let submission = match parse_row(&headers, &record) {
            Ok(submission) => submission,
            Err(err) => {
                warn!(line, error = %err, "skipping unparseable row");
                outcome.skipped.push((line, err.to_string()));
                continue;
            }
        };

        match service.submit_evaluation(submission).await {
            Ok(_) => outcome.imported += 1,
            Err(FundingError::Storage(err)) => {
                return Err(err).with_context(|| format!("storage failed at line {line}"));
            }
            Err(err) => {
                warn!(line, error = %err, "skipping refused row");
                outcome.skipped.push((line, err.to_string()));
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ServicePolicy;
    use crate::models::{Criterion, Decision};
    use crate::repository::{Fixtures, MemoryRepository, Repository};

    fn header_line() -> String {
        let mut columns = vec!["round_id".to_string(), "committee_id".to_string()];
        columns.extend(Criterion::ALL.iter().map(|c| c.name().to_string()));
        columns.push("decision".to_string());
        columns.push("comments".to_string());
        columns.join(",")
    }

    fn row(round: &str, member: &str, score: &str, decision: &str) -> String {
        let mut columns = vec![round.to_string(), member.to_string()];
        columns.extend(std::iter::repeat(score.to_string()).take(17));
        columns.push(decision.to_string());
        columns.push("imported".to_string());
        columns.join(",")
    }

    #[test]
    fn parses_complete_row() {
        let headers = StringRecord::from(header_line().split(',').collect::<Vec<_>>());
        let line = row("r2", "u7", "6.5", "revise");
        let record = StringRecord::from(line.split(',').collect::<Vec<_>>());
        let submission = parse_row(&headers, &record).unwrap();
        assert_eq!(submission.decision, Decision::Revise);
        assert_eq!(submission.scores.scalability, 6.5);
        assert_eq!(submission.comments, "imported");
    }

    #[tokio::test]
    async fn import_submits_rows_and_skips_refusals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluations.csv");
        let body = [
            header_line(),
            row("r2", "u7", "7", "approve"),
            row("r2", "u6", "7", "approve"),
            row("r2", "u1", "x", "approve"),
        ]
        .join("\n");
        std::fs::write(&path, body).unwrap();

        let repo = Arc::new(MemoryRepository::new(Fixtures::bundled().unwrap()));
        let service = FundingService::new(repo.clone(), ServicePolicy::default(), "secret");
        let outcome = import_evaluations_csv(&service, &path).await.unwrap();

        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(repo.list_evaluations_by_round("r2").await.unwrap().len(), 2);
    }

    #[test]
    fn unparseable_score_names_the_criterion() {
        let headers = StringRecord::from(header_line().split(',').collect::<Vec<_>>());
        let line = row("r2", "u7", "seven", "approve");
        let record = StringRecord::from(line.split(',').collect::<Vec<_>>());
        let err = parse_row(&headers, &record).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidField {
                field: "teamExperience",
                value: "seven".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn short_record_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluations.csv");
        let body = [header_line(), "r2,u6,7".to_string(), row("r2", "u7", "7", "approve")].join("\n");
        std::fs::write(&path, body).unwrap();

        let repo = Arc::new(MemoryRepository::new(Fixtures::bundled().unwrap()));
        let service = FundingService::new(repo.clone(), ServicePolicy::default(), "secret");
        let outcome = import_evaluations_csv(&service, &path).await.unwrap();

        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].0, 2);
        assert_eq!(repo.list_evaluations_by_round("r2").await.unwrap().len(), 2);
    }
}
