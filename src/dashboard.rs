use std::collections::HashSet;

use crate::models::{
    AdminStats, Commitment, CommitmentStatus, InvestorStats, Round, RoundStatus, Startup,
    StartupStats, User, UserRole,
};

fn is_paid(commitment: &Commitment) -> bool {
    commitment.status == CommitmentStatus::Paid
}

pub fn startup_stats(startup: &Startup, rounds: &[Round], commitments: &[Commitment]) -> StartupStats {
    let owned: Vec<&Round> = rounds.iter().filter(|r| r.startup_id == startup.id).collect();
    let owned_ids: HashSet<&str> = owned.iter().map(|r| r.id.as_str()).collect();
    let related: Vec<&Commitment> = commitments
        .iter()
        .filter(|c| owned_ids.contains(c.round_id.as_str()))
        .collect();

    StartupStats {
        total_rounds: owned.len(),
        active_rounds: owned.iter().filter(|r| r.status == RoundStatus::Live).count(),
        total_raised: related.iter().filter(|c| is_paid(c)).map(|c| c.amount).sum(),
        total_investors: related
            .iter()
            .map(|c| c.investor_id.as_str())
            .collect::<HashSet<_>>()
            .len(),
    }
}

pub fn investor_stats(investor_id: &str, commitments: &[Commitment]) -> InvestorStats {
    let own: Vec<&Commitment> = commitments
        .iter()
        .filter(|c| c.investor_id == investor_id)
        .collect();

    InvestorStats {
        total_investments: own.iter().filter(|c| is_paid(c)).count(),
        total_invested: own.iter().filter(|c| is_paid(c)).map(|c| c.amount).sum(),
        active_commitments: own
            .iter()
            .filter(|c| matches!(c.status, CommitmentStatus::Pending | CommitmentStatus::Approved))
            .count(),
        portfolio_count: own
            .iter()
            .filter(|c| is_paid(c))
            .map(|c| c.round_id.as_str())
            .collect::<HashSet<_>>()
            .len(),
    }
}

pub fn admin_stats(
    users: &[User],
    startups: &[Startup],
    rounds: &[Round],
    commitments: &[Commitment],
) -> AdminStats {
    let settled: Vec<i64> = commitments.iter().filter(|c| is_paid(c)).map(|c| c.amount).collect();
    let total: i64 = settled.iter().sum();

    AdminStats {
        total_users: users.len(),
        total_startups: startups.len(),
        total_investors: users.iter().filter(|u| u.role == UserRole::Investor).count(),
        total_rounds: rounds.len(),
        active_rounds: rounds.iter().filter(|r| r.status == RoundStatus::Live).count(),
        total_investment_amount: total,
        average_investment_size: if settled.is_empty() {
            0.0
        } else {
            total as f64 / settled.len() as f64
        },
        successful_exits: 0,
    }
}
