use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod classify;
mod config;
mod db;
mod decode;
mod duration;
mod error;
mod export;
mod heartbeat;
mod identity;
mod models;
mod pipeline;
mod reconcile;
mod report;
mod store;

use config::Settings;
use db::PgStore;
use heartbeat::HeartbeatSupervisor;
use models::{ClassSession, Cohort};
use pipeline::ProcessOutcome;

#[derive(Parser)]
#[command(name = "attendance-reconciler")]
#[command(about = "Meeting attendance reconciler for Group Scholar cohorts", long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and tables
    InitDb,
    /// Import the enrollment roster from a CSV file
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Process one meeting attendance export
    Process {
        #[arg(long)]
        export: PathBuf,
        #[arg(long)]
        cohort_type: String,
        #[arg(long)]
        cohort_number: String,
        #[arg(long)]
        subject: String,
        /// Class date as YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        teacher: String,
    },
    /// Generate a markdown attendance report for a cohort
    Report {
        #[arg(long)]
        cohort_type: String,
        #[arg(long)]
        cohort_number: String,
        #[arg(long, default_value_t = 75.0)]
        below: f64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    let store = Arc::new(PgStore::connect(&database_url, &settings.store).await?);
    let supervisor = HeartbeatSupervisor::new(
        store.clone(),
        Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
    );

    supervisor
        .run_alongside(run_command(cli.command, &settings, &store, &supervisor))
        .await?;
    Ok(())
}

async fn run_command(
    command: Commands,
    settings: &Settings,
    store: &PgStore,
    supervisor: &HeartbeatSupervisor,
) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            store.init_db().await?;
            println!("Schema ready.");
        }
        Commands::ImportRoster { csv } => {
            let (inserted, skipped) = store.import_roster(&csv).await?;
            println!(
                "Imported {inserted} students from {} ({skipped} skipped).",
                csv.display()
            );
        }
        Commands::Process {
            export,
            cohort_type,
            cohort_number,
            subject,
            date,
            teacher,
        } => {
            let outcome = match (pipeline::parse_class_date(&date), std::fs::read(&export)) {
                (Err(err), _) => ProcessOutcome::failure(err),
                (Ok(_), Err(err)) => ProcessOutcome::failure(format!("{}: {err}", export.display())),
                (Ok(class_date), Ok(bytes)) => {
                    let session = ClassSession {
                        cohort: Cohort::new(cohort_type.trim(), cohort_number.trim()),
                        subject: subject.trim().to_string(),
                        class_date,
                        teacher_name: teacher.trim().to_string(),
                    };
                    process_upload(store, settings, supervisor, bytes, session).await
                }
            };

            println!("{}", serde_json::to_string(&outcome)?);
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Report {
            cohort_type,
            cohort_number,
            below,
            out,
        } => {
            let cohort = Cohort::new(cohort_type, cohort_number);
            let stats = store.fetch_cohort_stats(&cohort).await?;
            let report = report::build_report(&cohort, below, &stats);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

/// Runs the pipeline with the heartbeat held off until it finishes.
async fn process_upload(
    store: &PgStore,
    settings: &Settings,
    supervisor: &HeartbeatSupervisor,
    bytes: Vec<u8>,
    session: ClassSession,
) -> ProcessOutcome {
    supervisor
        .while_paused(
            Duration::from_secs(settings.heartbeat_resume_delay_secs),
            pipeline::process_export(store, settings, &bytes, &session),
        )
        .await
}
