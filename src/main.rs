use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod db;
mod error;
mod models;
mod report;
mod stats;

use error::DashboardError;
use models::{AggregationWindow, DashboardSnapshot};

#[derive(Parser)]
#[command(name = "bienestar-dashboard")]
#[command(about = "Dashboard statistics builder for the school wellbeing platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import historical emotion check-ins from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        institution: Uuid,
    },
    /// Compute the dashboard snapshot and emit it as JSON
    Snapshot {
        #[arg(long)]
        institution: Uuid,
        #[arg(long, default_value_t = 30)]
        window_days: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compute the dashboard snapshot and write a markdown report
    Report {
        #[arg(long)]
        institution: Uuid,
        #[arg(long, default_value_t = 30)]
        window_days: i64,
        #[arg(long, default_value = "reporte.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted for institution {}.", db::SEED_INSTITUTION);
        }
        Commands::Import { csv, institution } => {
            let inserted = db::import_csv(&pool, institution, &csv).await?;
            println!("Inserted {inserted} check-ins from {}.", csv.display());
        }
        Commands::Snapshot {
            institution,
            window_days,
            out,
        } => {
            let snapshot = load_snapshot(&pool, institution, window_days).await?;
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|err| DashboardError::Unexpected(err.to_string()))?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Snapshot written to {}.", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Report {
            institution,
            window_days,
            out,
        } => {
            let snapshot = load_snapshot(&pool, institution, window_days).await?;
            let window = AggregationWindow::trailing(window_days);
            let report = report::build_report(&snapshot, &window, window_days);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn load_snapshot(
    pool: &PgPool,
    institution: Uuid,
    window_days: i64,
) -> anyhow::Result<DashboardSnapshot> {
    match stats::load_dashboard(pool, institution, window_days).await {
        Ok(snapshot) => Ok(snapshot),
        Err(err) => {
            tracing::error!(dataset = %err.dataset(), "dashboard computation failed");
            Err(err.into())
        }
    }
}
