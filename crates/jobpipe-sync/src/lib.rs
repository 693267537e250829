//! Pipeline orchestration: configuration, stage runner, reports and the cron
//! scheduler.

pub mod config;
pub mod pipeline;
pub mod reports;

use std::sync::Arc;

use anyhow::{Context, Result};
use jobpipe_core::SynonymTable;
use jobpipe_extract::ChatCompletionsClient;
use jobpipe_storage::{
    DedupCache, JobStore, MemoryCache, MemoryJobStore, PgJobStore, RedisCache, SimpleTokenBucket,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub use config::{SourceRegistry, SyncConfig};
pub use pipeline::{AnalyzeReport, BatchCounts, Pipeline, RunSummary, TransformCounts};

pub const CRATE_NAME: &str = "jobpipe-sync";

/// Where the cache and the store live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Redis and PostgreSQL.
    External,
    /// Process-local maps; nothing survives the process.
    Memory,
}

pub fn load_technos(config: &SyncConfig) -> Result<Arc<SynonymTable>> {
    let table = match &config.technos_path {
        Some(path) => SynonymTable::load(path)
            .with_context(|| format!("loading synonym table {}", path.display()))?,
        None => SynonymTable::embedded().context("loading embedded synonym table")?,
    };
    info!(version = table.version(), "technos synonym table loaded");
    Ok(Arc::new(table))
}

pub async fn connect_store(config: &SyncConfig) -> Result<PgJobStore> {
    PgJobStore::connect(&config.database_url)
        .await
        .context("connecting to postgres")
}

pub async fn migrate(config: &SyncConfig) -> Result<()> {
    connect_store(config)
        .await?
        .migrate()
        .await
        .context("creating job_offers table")
}

fn llm_limiter(config: &SyncConfig) -> Option<Arc<SimpleTokenBucket>> {
    SimpleTokenBucket::per_minute(config.llm_requests_per_minute).map(Arc::new)
}

/// Build the long-lived clients once and hand them to the pipeline.
pub async fn build_pipeline(config: SyncConfig, backend: Backend) -> Result<Pipeline> {
    let technos = load_technos(&config)?;

    let (cache, store): (Arc<dyn DedupCache>, Arc<dyn JobStore>) = match backend {
        Backend::Memory => (Arc::new(MemoryCache::new()), Arc::new(MemoryJobStore::new())),
        Backend::External => {
            let cache = RedisCache::connect(&config.redis_url)
                .await
                .context("connecting to redis")?;
            let store = connect_store(&config).await?;
            store.migrate().await.context("creating job_offers table")?;
            (Arc::new(cache), Arc::new(store))
        }
    };

    let mut model =
        ChatCompletionsClient::new(config.llm.clone()).context("building LLM client")?;
    if let Some(limiter) = llm_limiter(&config) {
        model = model.with_limiter(limiter);
    }

    Pipeline::new(config, cache, store, Arc::new(model), technos)
}

/// A scheduler that runs the whole pipeline on `config.cron`.
pub async fn build_scheduler(pipeline: Arc<Pipeline>) -> Result<JobScheduler> {
    let cron = pipeline.config().cron.clone();
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            match pipeline.run_once().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    stored = summary.load.succeeded,
                    "scheduled run complete"
                ),
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_limiter_follows_requests_per_minute() {
        let mut config = SyncConfig::from_env();
        config.llm_requests_per_minute = 0;
        assert!(llm_limiter(&config).is_none());
        config.llm_requests_per_minute = 30;
        assert!(llm_limiter(&config).is_some());
    }

    #[test]
    fn technos_override_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("technos.yaml");
        std::fs::write(&path, "version: 42\ncanonical:\n  Rust: [rustlang]\nblacklist: [git]\n")
            .unwrap();
        let mut config = SyncConfig::from_env();
        config.technos_path = Some(path);
        assert_eq!(load_technos(&config).unwrap().version(), 42);

        config.technos_path = None;
        assert!(load_technos(&config).unwrap().version() >= 1);
    }
}
