use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod aggregate;
mod api;
mod cache;
mod config;
mod dashboard;
mod db;
mod error;
mod feedback;
mod ingest;
mod labels;
mod models;
mod monitor;
mod narrative;
mod records;
mod report;
mod scoring;
mod store;
mod sync;
mod tasks;
mod temporal;

use crate::config::AppConfig;
use crate::models::{Employee, SurveyResponse, WorkloadEntry};
use crate::narrative::{DisabledGenerator, OllamaGenerator, TextGenerator};
use crate::store::{KeyValueStore, MemoryStore};
use crate::temporal::HolidayCalendar;

#[derive(Parser)]
#[command(name = "wellbeing-risk")]
#[command(about = "Employee wellbeing risk metrics from engagement surveys", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,
    /// Create or upgrade the database schema
    InitDb,
    /// Load departments, employees and workloads so syncs have targets
    Seed,
    /// Score and store a survey CSV, then sync employees and departments
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(config.require_database_url()?)
        .await
        .context("failed to connect to Postgres")
}

fn load_calendar(config: &AppConfig) -> anyhow::Result<HolidayCalendar> {
    match &config.holidays_path {
        Some(path) => HolidayCalendar::from_file(path),
        None => Ok(HolidayCalendar::default()),
    }
}

fn text_generator(config: &AppConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    if !config.llm.enabled {
        tracing::info!("text generator disabled, narrative endpoints use fallbacks");
        return Ok(Arc::new(DisabledGenerator));
    }
    let generator = OllamaGenerator::new(&config.llm).context("failed to build text generator client")?;
    Ok(Arc::new(generator))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(config::log_json());
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Serve => {
            let store: Arc<dyn KeyValueStore> = match config.database_url {
                Some(_) => {
                    let pool = connect(&config).await?;
                    db::init_db(&pool).await?;
                    Arc::new(db::PgStore::new(pool, config.scan_page_size))
                }
                None => {
                    tracing::warn!("DATABASE_URL not set, serving from an in-memory store");
                    Arc::new(MemoryStore::new(config.scan_page_size))
                }
            };
            let state = api::AppState::new(store, text_generator(&config)?, &config, load_calendar(&config)?);
            api::serve(state, config.bind).await?;
        }
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            let store = db::PgStore::new(pool, config.scan_page_size);
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect(&config).await?;
            let store: Arc<dyn KeyValueStore> = Arc::new(db::PgStore::new(pool, config.scan_page_size));
            let ctx = ingest::IngestContext {
                store,
                monitor: Arc::new(monitor::RiskMonitor::new(
                    monitor::AlertHub::new(16),
                    config.stress_alert_threshold,
                )),
                dimension_map: config.dimension_map,
                calendar: Arc::new(load_calendar(&config)?),
            };
            let bytes = std::fs::read(&csv).with_context(|| format!("failed to read {}", csv.display()))?;
            let filename = csv
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| csv.display().to_string());
            ingest::validate_filename(&filename)?;
            let summary = ingest::ingest_survey_csv(&ctx, &bytes, &filename, Utc::now()).await?;
            println!(
                "Saved {} of {} responses from {} ({} failed, {} employees synced, {} alerts).",
                summary.total_rows_saved,
                summary.total_rows_processed,
                csv.display(),
                summary.failed_rows,
                summary.sync.employees_updated,
                summary.alerts.total()
            );
        }
        Commands::Report { department, year, out } => {
            let pool = connect(&config).await?;
            let store = db::PgStore::new(pool, config.scan_page_size);
            let responses: Vec<SurveyResponse> = records::load_all(&store).await?;
            let employees: Vec<Employee> = records::load_all(&store).await?;
            let workloads: Vec<WorkloadEntry> = records::load_all(&store).await?;
            let ctx = aggregate::AggregationContext::build(&employees, &workloads);
            let today = Utc::now().date_naive();

            let report = report::build_report(
                department.as_deref(),
                year.unwrap_or_else(|| today.year()),
                today,
                &responses,
                &ctx,
                &employees,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
