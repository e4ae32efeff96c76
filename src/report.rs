use std::fmt::Write;

use crate::lifecycle;
use crate::models::{Commitment, CommitteeEvaluation, Criterion, Round, RoundDecisionSummary};

/// Mean score per criterion across the given evaluations, highest first.
pub fn criterion_means(evaluations: &[CommitteeEvaluation]) -> Vec<(Criterion, f64)> {
    if evaluations.is_empty() {
        return Vec::new();
    }

    let mut means: Vec<(Criterion, f64)> = Criterion::ALL
        .iter()
        .map(|criterion| {
            let total: f64 = evaluations.iter().map(|e| e.scores.get(*criterion)).sum();
            (*criterion, total / evaluations.len() as f64)
        })
        .collect();

    means.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    means
}

pub fn build_report(
    round: &Round,
    summary: &RoundDecisionSummary,
    evaluations: &[CommitteeEvaluation],
    commitments: &[Commitment],
) -> String {
    let totals = lifecycle::recompute_round_totals(round, commitments);
    let mut output = String::new();

    let _ = writeln!(output, "# Round Report: {}", round.title);
    let _ = writeln!(output, "Round {} is {} (startup {})", round.id, round.status, round.startup_id);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Funding");
    let _ = writeln!(
        output,
        "- Raised {} of {} from {} investors",
        totals.current_amount, round.target_amount, totals.investor_count
    );
    let _ = writeln!(
        output,
        "- Ticket size {}..={}",
        round.min_investment, round.max_investment
    );
    if let Some(end) = round.end_date {
        let _ = writeln!(output, "- Funding window ends {}", end.format("%Y-%m-%d"));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Committee Decision");
    let _ = writeln!(
        output,
        "- {} approve, {} revise, {} reject ({} of {} required evaluations, quorum {})",
        summary.approve_count,
        summary.revise_count,
        summary.reject_count,
        summary.completed_evaluations,
        summary.quorum,
        if summary.quorum_reached { "reached" } else { "pending" }
    );
    let _ = writeln!(output, "- Mean average score {:.2}", summary.mean_average_score);

    let means = criterion_means(evaluations);
    if !means.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Strongest Criteria");
        for (criterion, mean) in means.iter().take(3) {
            let _ = writeln!(output, "- {}: {:.1}", criterion.name(), mean);
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "## Weakest Criteria");
        for (criterion, mean) in means.iter().rev().take(3) {
            let _ = writeln!(output, "- {}: {:.1}", criterion.name(), mean);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Evaluations");
    if evaluations.is_empty() {
        let _ = writeln!(output, "No evaluations submitted yet.");
    } else {
        for evaluation in evaluations {
            let _ = writeln!(
                output,
                "- {}: {} with {:.2}/10 (total {:.0}): {}",
                evaluation.committee_id,
                evaluation.decision,
                evaluation.average_score,
                evaluation.total_score,
                evaluation.comments
            );
        }
    }

    let mut recent = commitments.to_vec();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Commitments");
    if recent.is_empty() {
        let _ = writeln!(output, "No commitments recorded for this round.");
    } else {
        for commitment in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} pledged {} ({}, {}) on {}",
                commitment.investor_id,
                commitment.amount,
                commitment.commitment_type,
                commitment.status,
                commitment.created_at.format("%Y-%m-%d")
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Fixtures;
    use crate::scoring::{aggregate_for_round, ApprovalPolicy};

    #[test]
    fn report_lists_funding_and_decisions() {
        let fixtures = Fixtures::bundled().unwrap();
        let round = fixtures.rounds.iter().find(|r| r.id == "r4").unwrap();
        let evaluations: Vec<_> = fixtures
            .evaluations
            .iter()
            .filter(|e| e.round_id == "r4")
            .cloned()
            .collect();
        let commitments: Vec<_> = fixtures
            .commitments
            .iter()
            .filter(|c| c.round_id == "r4")
            .cloned()
            .collect();
        let summary = aggregate_for_round("r4", &evaluations, &ApprovalPolicy::default());

        let report = build_report(round, &summary, &evaluations, &commitments);
        assert!(report.contains("# Round Report: FinanceAI Pre-Seed"));
        assert!(report.contains("- Raised 300000 of 300000 from 1 investors"));
        assert!(report.contains("- 2 approve, 0 revise, 0 reject"));
        assert!(report.contains("- Mean average score 8.00"));
        assert!(report.contains("- u5 pledged 300000 (hard, paid)"));
    }

    #[test]
    fn empty_round_report_says_so() {
        let fixtures = Fixtures::bundled().unwrap();
        let round = fixtures.rounds.iter().find(|r| r.id == "r3").unwrap();
        let summary = aggregate_for_round("r3", &[], &ApprovalPolicy::default());
        let report = build_report(round, &summary, &[], &[]);
        assert!(report.contains("No evaluations submitted yet."));
        assert!(report.contains("No commitments recorded for this round."));
        assert!(!report.contains("## Strongest Criteria"));
    }

    #[test]
    fn criterion_means_average_each_field() {
        let fixtures = Fixtures::bundled().unwrap();
        let evaluations: Vec<_> = fixtures
            .evaluations
            .iter()
            .filter(|e| e.round_id == "r4")
            .cloned()
            .collect();
        let means = criterion_means(&evaluations);
        assert_eq!(means.len(), 17);
        assert!(means.iter().all(|(_, mean)| (*mean - 8.0).abs() < 1e-9));
    }
}
