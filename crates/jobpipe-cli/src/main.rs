use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobpipe_sync::{Backend, BatchCounts, Pipeline, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "jobpipe")]
#[command(about = "Free-Work job offer pipeline: scrape, reduce, extract, load")]
struct Cli {
    /// Keep the cache and the store in memory instead of Redis/PostgreSQL.
    #[arg(long, global = true)]
    memory: bool,

    /// Directory holding sources.yaml and receiving reports/.
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect job URLs and buffer their raw HTML.
    Scrape,
    /// Reduce buffered HTML and extract fields with the LLM.
    Transform,
    /// Upsert analysed offers into the store.
    Load,
    /// Scrape, transform and load in one go; keeps running on the cron when
    /// JOBPIPE_SCHEDULER_ENABLED is set.
    Run,
    /// Run one URL through reduction, extraction and validation, printing the result.
    Analyze { url: String },
    /// Create the job_offers table.
    Migrate,
    /// Run the pipeline on the configured cron until interrupted.
    Schedule,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,jobpipe_sync=debug,jobpipe_adapters=debug,jobpipe_extract=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();
}

fn print_counts(stage: &str, counts: &BatchCounts) {
    println!(
        "{stage}: found={} succeeded={} skipped={} failed={}",
        counts.found, counts.succeeded, counts.skipped, counts.failed
    );
}

/// Run the pipeline on its cron until ctrl-c.
async fn run_scheduled(pipeline: Arc<Pipeline>) -> Result<()> {
    let cron = pipeline.config().cron.clone();
    let mut sched = jobpipe_sync::build_scheduler(pipeline).await?;
    sched.start().await.context("starting scheduler")?;
    tracing::info!(%cron, "scheduler started; ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    tracing::info!("scheduler stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    init_tracing();
    if let Some(root) = cli.workspace_root {
        config.workspace_root = root;
    }
    let backend = if cli.memory {
        Backend::Memory
    } else {
        Backend::External
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Migrate => {
            jobpipe_sync::migrate(&config).await?;
            println!("migrations applied");
        }
        Commands::Scrape => {
            let pipeline = jobpipe_sync::build_pipeline(config, backend).await?;
            let counts = pipeline.scrape(Uuid::new_v4()).await?;
            print_counts("scrape", &counts);
        }
        Commands::Transform => {
            let pipeline = jobpipe_sync::build_pipeline(config, backend).await?;
            let counts = pipeline.transform().await?;
            print_counts("clean", &counts.clean);
            print_counts("analyze", &counts.analyze);
        }
        Commands::Load => {
            let pipeline = jobpipe_sync::build_pipeline(config, backend).await?;
            let counts = pipeline.load().await?;
            print_counts("load", &counts);
        }
        Commands::Run => {
            let pipeline = jobpipe_sync::build_pipeline(config, backend).await?;
            let summary = pipeline.run_once().await?;
            println!("run complete: run_id={}", summary.run_id);
            print_counts("scrape", &summary.scrape);
            print_counts("clean", &summary.clean);
            print_counts("analyze", &summary.analyze);
            print_counts("load", &summary.load);
            if let Some(dir) = &summary.reports_dir {
                println!("reports: {dir}");
            }
            if pipeline.config().scheduler_enabled {
                run_scheduled(Arc::new(pipeline)).await?;
            }
        }
        Commands::Analyze { url } => {
            let pipeline = jobpipe_sync::build_pipeline(config, Backend::Memory).await?;
            let report = pipeline.analyze_url(&url).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing analysis")?
            );
        }
        Commands::Schedule => {
            let pipeline = jobpipe_sync::build_pipeline(config, backend).await?;
            run_scheduled(Arc::new(pipeline)).await?;
        }
    }

    Ok(())
}
