use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Draft,
    CommitteeReview,
    Live,
    Closed,
    Cancelled,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Draft => "draft",
            RoundStatus::CommitteeReview => "committee_review",
            RoundStatus::Live => "live",
            RoundStatus::Closed => "closed",
            RoundStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: String,
    pub startup_id: String,
    pub title: String,
    pub target_amount: i64,
    pub min_investment: i64,
    pub max_investment: i64,
    pub current_amount: i64,
    pub investor_count: i64,
    pub status: RoundStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub business_plan_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentType {
    Soft,
    Hard,
}

impl CommitmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentType::Soft => "soft",
            CommitmentType::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentStatus::Pending => "pending",
            CommitmentStatus::Approved => "approved",
            CommitmentStatus::Rejected => "rejected",
            CommitmentStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub id: String,
    pub round_id: String,
    pub investor_id: String,
    pub amount: i64,
    #[serde(rename = "type")]
    pub commitment_type: CommitmentType,
    pub status: CommitmentStatus,
    pub contract_signed: bool,
    pub receipt_uploaded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Revise,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Revise => "revise",
            Decision::Reject => "reject",
        }
    }
}

macro_rules! criteria {
    ($($variant:ident => $field:ident : $name:literal),+ $(,)?) => {
        /// The named criteria a committee member scores a round on.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Criterion {
            $($variant),+
        }

        impl Criterion {
            pub const ALL: [Criterion; CRITERIA_COUNT] = [$(Criterion::$variant),+];

            /// Wire name of the criterion.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Criterion::$variant => $name),+
                }
            }
        }

        impl FromStr for Criterion {
            type Err = ValidationError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($name => Ok(Criterion::$variant),)+
                    other => Err(ValidationError::UnknownCriterion(other.to_string())),
                }
            }
        }

        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct EvaluationScores {
            $(pub $field: f64),+
        }

        impl EvaluationScores {
            pub fn get(&self, criterion: Criterion) -> f64 {
                match criterion {
                    $(Criterion::$variant => self.$field),+
                }
            }

            /// Builds a score set from name/value pairs, requiring every criterion.
            pub fn from_named(values: &HashMap<String, f64>) -> Result<Self, ValidationError> {
                for name in values.keys() {
                    name.parse::<Criterion>()?;
                }
                let lookup = |criterion: Criterion| {
                    values
                        .get(criterion.name())
                        .copied()
                        .ok_or_else(|| ValidationError::MissingCriterion(criterion.name().to_string()))
                };
                Ok(EvaluationScores {
                    $($field: lookup(Criterion::$variant)?),+
                })
            }

            #[cfg(test)]
            pub fn uniform(value: f64) -> Self {
                EvaluationScores {
                    $($field: value),+
                }
            }
        }
    };
}

pub const CRITERIA_COUNT: usize = 17;

criteria! {
    TeamExperience => team_experience: "teamExperience",
    MarketSize => market_size: "marketSize",
    ProductInnovation => product_innovation: "productInnovation",
    BusinessModel => business_model: "businessModel",
    FinancialProjections => financial_projections: "financialProjections",
    CompetitiveAdvantage => competitive_advantage: "competitiveAdvantage",
    MarketTraction => market_traction: "marketTraction",
    Scalability => scalability: "scalability",
    RiskAssessment => risk_assessment: "riskAssessment",
    ExitStrategy => exit_strategy: "exitStrategy",
    LegalStructure => legal_structure: "legalStructure",
    IntellectualProperty => intellectual_property: "intellectualProperty",
    CustomerValidation => customer_validation: "customerValidation",
    RevenueModel => revenue_model: "revenueModel",
    FundingHistory => funding_history: "fundingHistory",
    GovernanceStructure => governance_structure: "governanceStructure",
    SustainabilityImpact => sustainability_impact: "sustainabilityImpact",
}

impl EvaluationScores {
    pub fn iter(&self) -> impl Iterator<Item = (Criterion, f64)> + '_ {
        Criterion::ALL.into_iter().map(|criterion| (criterion, self.get(criterion)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeEvaluation {
    pub id: String,
    pub round_id: String,
    pub committee_id: String,
    pub scores: EvaluationScores,
    pub total_score: f64,
    pub average_score: f64,
    pub decision: Decision,
    pub comments: String,
    pub is_completed: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    SuperAdmin,
    Investor,
    Startup,
    Committee,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::SuperAdmin => "super_admin",
            UserRole::Investor => "investor",
            UserRole::Startup => "startup",
            UserRole::Committee => "committee",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// What a session sees of its own account. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Startup {
    pub id: String,
    pub user_id: String,
    pub company_name: String,
    pub sector: String,
}

/// A committee member assigned to review a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub round_id: String,
    pub committee_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundTotals {
    pub current_amount: i64,
    pub investor_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeMemberStats {
    pub total_evaluations: usize,
    pub completed_evaluations: usize,
    pub average_score: f64,
    pub pending_evaluations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundDecisionSummary {
    pub round_id: String,
    pub approve_count: usize,
    pub revise_count: usize,
    pub reject_count: usize,
    pub completed_evaluations: usize,
    pub quorum: usize,
    pub quorum_reached: bool,
    pub mean_average_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupStats {
    pub total_rounds: usize,
    pub active_rounds: usize,
    pub total_raised: i64,
    pub total_investors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorStats {
    pub total_investments: usize,
    pub total_invested: i64,
    pub active_commitments: usize,
    pub portfolio_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_users: usize,
    pub total_startups: usize,
    pub total_investors: usize,
    pub total_rounds: usize,
    pub active_rounds: usize,
    pub total_investment_amount: i64,
    pub average_investment_size: f64,
    pub successful_exits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum DashboardStats {
    Startup(StartupStats),
    Investor(InvestorStats),
    Admin(AdminStats),
    Committee(CommitteeMemberStats),
}

macro_rules! string_enum {
    ($ty:ident, $field:literal, [$($variant:ident),+]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ValidationError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                $(
                    if value == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(ValidationError::InvalidField {
                    field: $field,
                    value: value.to_string(),
                })
            }
        }
    };
}

string_enum!(RoundStatus, "round status", [Draft, CommitteeReview, Live, Closed, Cancelled]);
string_enum!(CommitmentType, "commitment type", [Soft, Hard]);
string_enum!(CommitmentStatus, "commitment status", [Pending, Approved, Rejected, Paid]);
string_enum!(Decision, "decision", [Approve, Revise, Reject]);
string_enum!(UserRole, "role", [Admin, SuperAdmin, Investor, Startup, Committee]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_cover_seventeen_distinct_names() {
        let mut names: Vec<&str> = Criterion::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CRITERIA_COUNT);
    }

    #[test]
    fn from_named_reports_missing_criterion() {
        let mut values: HashMap<String, f64> = Criterion::ALL
            .iter()
            .map(|c| (c.name().to_string(), 7.0))
            .collect();
        values.remove("exitStrategy");

        let err = EvaluationScores::from_named(&values).unwrap_err();
        assert_eq!(err, ValidationError::MissingCriterion("exitStrategy".to_string()));
    }

    #[test]
    fn from_named_rejects_unknown_criterion() {
        let mut values: HashMap<String, f64> = Criterion::ALL
            .iter()
            .map(|c| (c.name().to_string(), 7.0))
            .collect();
        values.insert("vibes".to_string(), 10.0);

        let err = EvaluationScores::from_named(&values).unwrap_err();
        assert_eq!(err, ValidationError::UnknownCriterion("vibes".to_string()));
    }

    #[test]
    fn scores_use_camel_case_on_the_wire() {
        let json = serde_json::to_value(EvaluationScores::uniform(5.0)).unwrap();
        assert_eq!(json["teamExperience"], 5.0);
        assert_eq!(json["sustainabilityImpact"], 5.0);
        assert_eq!(json.as_object().unwrap().len(), CRITERIA_COUNT);
    }

    #[test]
    fn statuses_round_trip_through_strings() {
        assert_eq!("committee_review".parse::<RoundStatus>().unwrap(), RoundStatus::CommitteeReview);
        assert_eq!(RoundStatus::CommitteeReview.to_string(), "committee_review");
        assert_eq!("super_admin".parse::<UserRole>().unwrap(), UserRole::SuperAdmin);
        assert!("archived".parse::<RoundStatus>().is_err());
    }
}
