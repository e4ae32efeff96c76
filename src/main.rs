use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod auth;
mod config;
mod dashboard;
mod db;
mod error;
mod import;
mod lifecycle;
mod models;
mod report;
mod repository;
mod scoring;
mod service;
mod telemetry;

use auth::{Registration, ADMIN_ROLES};
use config::Config;
use models::{CommitmentType, Decision, EvaluationScores, UserRole};
use repository::{MemoryRepository, Repository};
use scoring::EvaluationSubmission;
use service::{FundingService, RoundAction};

#[derive(Parser)]
#[command(name = "crowdfund-ledger")]
#[command(about = "Funding round lifecycle and committee evaluation ledger", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the bundled demo data into Postgres
    Seed,
    /// Import committee evaluations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Create a startup or investor account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FUNDING_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        role: UserRole,
        /// Required for startup accounts
        #[arg(long)]
        company_name: Option<String>,
        #[arg(long)]
        sector: Option<String>,
    },
    /// Issue a session token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        role: UserRole,
    },
    /// Submit a committee evaluation for a round
    Evaluate {
        #[arg(long, env = "FUNDING_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        round: String,
        /// JSON object mapping each criterion to its score
        #[arg(long)]
        scores: PathBuf,
        #[arg(long)]
        decision: Decision,
        #[arg(long, default_value = "")]
        comments: String,
    },
    /// Pledge an amount to a live round
    Commit {
        #[arg(long, env = "FUNDING_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        round: String,
        #[arg(long)]
        amount: i64,
        #[arg(long = "type", default_value = "soft")]
        commitment_type: CommitmentType,
    },
    /// Approve or reject a pending commitment
    ReviewCommitment {
        #[arg(long, env = "FUNDING_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        reject: bool,
    },
    /// Record payment for an approved commitment
    ConfirmPayment {
        #[arg(long, env = "FUNDING_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        id: String,
    },
    /// Move a round through its lifecycle (submit, approve, revise, close, cancel)
    Transition {
        #[arg(long, env = "FUNDING_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        round: String,
        #[arg(long)]
        action: RoundAction,
    },
    /// Rebuild a round's raised amount and investor count from its commitments
    Recompute {
        #[arg(long)]
        round: String,
    },
    /// Show the dashboard numbers for the signed-in user
    Stats {
        #[arg(long, env = "FUNDING_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Show the committee decision summary for a round
    Summary {
        #[arg(long)]
        round: String,
    },
    /// Generate a markdown round report
    Report {
        #[arg(long)]
        round: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn open_repository(config: &Config) -> anyhow::Result<Arc<dyn Repository>> {
    if let Some(path) = &config.fixtures {
        let repo = MemoryRepository::open(path)
            .with_context(|| format!("failed to load fixtures from {}", path.display()))?;
        return Ok(Arc::new(repo));
    }
    Ok(Arc::new(db::PgRepository::new(connect(config).await?)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.config.log_json);

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&cli.config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
            return Ok(());
        }
        Commands::Seed => {
            let pool = connect(&cli.config).await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} rows).");
            return Ok(());
        }
        _ => {}
    }

    let repo = open_repository(&cli.config).await?;
    let service = FundingService::new(repo, cli.config.policy(), cli.config.token_secret.clone());

    let outcome = run(&service, cli.command).await;
    service.flush().await?;
    outcome
}

async fn run(service: &FundingService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::InitDb | Commands::Seed => {}
        Commands::Import { csv } => {
            let outcome = import::import_evaluations_csv(service, &csv).await?;
            println!(
                "Imported {} evaluations from {}.",
                outcome.imported,
                csv.display()
            );
            for (line, reason) in &outcome.skipped {
                println!("- line {line} skipped: {reason}");
            }
        }
        Commands::Register {
            email,
            password,
            first_name,
            last_name,
            role,
            company_name,
            sector,
        } => {
            let profile = service
                .register(&Registration {
                    email,
                    password,
                    first_name,
                    last_name,
                    role,
                    company_name,
                    sector,
                })
                .await?;
            print_json(&profile)?;
        }
        Commands::Login {
            email,
            password,
            role,
        } => {
            let (token, profile) = service.login(&email, &password, role).await?;
            info!(user_id = %profile.id, "logged in");
            println!("{token}");
        }
        Commands::Evaluate {
            token,
            round,
            scores,
            decision,
            comments,
        } => {
            let caller = service.authenticate(&token, &[UserRole::Committee]).await?;
            let raw = std::fs::read_to_string(&scores)
                .with_context(|| format!("failed to read {}", scores.display()))?;
            let named: HashMap<String, f64> = serde_json::from_str(&raw)?;
            let evaluation = service
                .submit_evaluation(EvaluationSubmission {
                    round_id: round,
                    committee_id: caller.user_id,
                    scores: EvaluationScores::from_named(&named)?,
                    decision,
                    comments,
                })
                .await?;
            print_json(&evaluation)?;
        }
        Commands::Commit {
            token,
            round,
            amount,
            commitment_type,
        } => {
            let caller = service.authenticate(&token, &[UserRole::Investor]).await?;
            let commitment = service
                .accept_commitment(&round, &caller.user_id, amount, commitment_type)
                .await?;
            print_json(&commitment)?;
        }
        Commands::ReviewCommitment { token, id, reject } => {
            service.authenticate(&token, ADMIN_ROLES).await?;
            let commitment = service.review_commitment(&id, !reject).await?;
            print_json(&commitment)?;
        }
        Commands::ConfirmPayment { token, id } => {
            service.authenticate(&token, ADMIN_ROLES).await?;
            let (commitment, round) = service.confirm_payment(&id).await?;
            println!(
                "Commitment {} paid; round {} raised {} from {} investors ({}).",
                commitment.id, round.id, round.current_amount, round.investor_count, round.status
            );
        }
        Commands::Transition {
            token,
            round,
            action,
        } => {
            let allowed: &[UserRole] = match action {
                RoundAction::Submit => &[UserRole::Startup],
                _ => ADMIN_ROLES,
            };
            let caller = service.authenticate(&token, allowed).await?;
            let updated = service.transition(&round, action, &caller).await?;
            println!("Round {} is now {}.", updated.id, updated.status);
        }
        Commands::Recompute { round } => {
            let totals = service.recompute_round_totals(&round).await?;
            println!(
                "Round {round}: raised {} from {} investors.",
                totals.current_amount, totals.investor_count
            );
        }
        Commands::Stats { token } => {
            let caller = service
                .authenticate(
                    &token,
                    &[
                        UserRole::Admin,
                        UserRole::SuperAdmin,
                        UserRole::Startup,
                        UserRole::Investor,
                        UserRole::Committee,
                    ],
                )
                .await?;
            let stats = service.dashboard(&caller.user_id, caller.role).await?;
            print_json(&stats)?;
        }
        Commands::Summary { round } => {
            let summary = service.round_decision_summary(&round).await?;
            print_json(&summary)?;
        }
        Commands::Report { round, out } => {
            let target = service.find_round(&round).await?;
            let summary = service.round_decision_summary(&round).await?;
            let evaluations = service.evaluations_for_round(&round).await?;
            let commitments = service.commitments_for_round(&round).await?;
            let report = report::build_report(&target, &summary, &evaluations, &commitments);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }
    Ok(())
}
