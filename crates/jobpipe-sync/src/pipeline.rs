//! Scrape, transform and load stages over the dedup cache.
//!
//! Every stage reads its input from the cache and writes its output back, so a
//! stage can be re-run on its own and picks up where an earlier run stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use jobpipe_adapters::{
    adapter_for_source, reduce, reduce_listing, AdapterContext, ReduceStats, SourceConfig,
};
use jobpipe_core::{
    ExtractedFields, JobListingCleaned, JobListingRaw, SynonymTable, ValidatedJobOffer,
};
use jobpipe_extract::{CompletionModel, FieldExtractor, Validator};
use jobpipe_storage::{get_json, put_json, CacheStage, DedupCache, HttpFetcher, JobStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{SourceRegistry, SyncConfig};
use crate::reports;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub found: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchCounts {
    fn tally(found: usize, outcomes: &[Outcome]) -> Self {
        let mut counts = BatchCounts {
            found,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded => counts.succeeded += 1,
                Outcome::Skipped => counts.skipped += 1,
                Outcome::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn absorb(&mut self, other: BatchCounts) {
        self.found += other.found;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformCounts {
    pub clean: BatchCounts,
    pub analyze: BatchCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scrape: BatchCounts,
    pub clean: BatchCounts,
    pub analyze: BatchCounts,
    pub load: BatchCounts,
    pub reports_dir: Option<String>,
}

/// One-shot result of `analyze <url>`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeReport {
    pub url: String,
    pub reduce: ReduceStats,
    pub extracted: ExtractedFields,
    pub offer: ValidatedJobOffer,
}

pub struct Pipeline {
    config: SyncConfig,
    http: HttpFetcher,
    cache: Arc<dyn DedupCache>,
    store: Arc<dyn JobStore>,
    extractor: FieldExtractor,
    validator: Validator,
    sources: Option<Vec<SourceConfig>>,
}

/// Structural company fields beat whatever the model said.
fn merge_structural(fields: &mut ExtractedFields, cleaned: &JobListingCleaned) {
    if let Some(name) = &cleaned.extracted_company_name {
        fields.company = Some(name.clone());
    }
    if let Some(company_type) = cleaned.extracted_company_type {
        fields.company_type = Some(company_type.label().to_string());
    }
}

impl Pipeline {
    pub fn new(
        config: SyncConfig,
        cache: Arc<dyn DedupCache>,
        store: Arc<dyn JobStore>,
        model: Arc<dyn CompletionModel>,
        technos: Arc<SynonymTable>,
    ) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config()).context("building http fetcher")?;
        Ok(Self {
            config,
            http,
            cache,
            store,
            extractor: FieldExtractor::new(model, Arc::clone(&technos)),
            validator: Validator::new(technos),
            sources: None,
        })
    }

    /// Use these sources instead of reading `sources.yaml`.
    pub fn with_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn enabled_sources(&self) -> Result<Vec<SourceConfig>> {
        match &self.sources {
            Some(sources) => Ok(sources.iter().filter(|s| s.enabled).cloned().collect()),
            None => Ok(SourceRegistry::load(self.config.sources_path()).await?.enabled()),
        }
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    fn ttl(&self) -> Duration {
        self.config.cache_ttl
    }

    /// Whether `stage` already holds an artifact for `url`. A failed lookup
    /// is logged and treated as absent, so the work is redone.
    async fn cached(&self, stage: CacheStage, url: &str) -> bool {
        match self.cache.get(stage, url).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(url, ?stage, error = %err, "cache lookup failed");
                false
            }
        }
    }

    pub async fn scrape(&self, run_id: Uuid) -> Result<BatchCounts> {
        let mut counts = BatchCounts::default();

        for source in self.enabled_sources().await? {
            let Some(adapter) = adapter_for_source(&source) else {
                warn!(source_id = %source.source_id, adapter = %source.adapter, "no adapter for source");
                continue;
            };
            let ctx = AdapterContext {
                run_id,
                request_delay: self.config.request_delay,
            };
            let urls = match adapter.get_all_job_urls(&self.http, &ctx).await {
                Ok(urls) => urls,
                Err(err) => {
                    warn!(source_id = %source.source_id, error = %err, "listing failed");
                    continue;
                }
            };

            let source_id = adapter.source_id();
            let found = urls.len();
            let outcomes: Vec<Outcome> = stream::iter(urls)
                .map(|url| self.scrape_url(run_id, source_id, url))
                .buffer_unordered(self.concurrency())
                .collect()
                .await;
            let source_counts = BatchCounts::tally(found, &outcomes);
            info!(source_id, ?source_counts, "source scraped");
            counts.absorb(source_counts);
        }

        info!(?counts, "scrape stage done");
        Ok(counts)
    }

    async fn scrape_url(&self, run_id: Uuid, source_id: &str, url: String) -> Outcome {
        let cache = self.cache.as_ref();
        match cache.has(&url).await {
            Ok(true) => {
                debug!(url, "already processed");
                return Outcome::Skipped;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(url, error = %err, "cache lookup failed");
                return Outcome::Failed;
            }
        }
        if self.cached(CacheStage::RawHtml, &url).await {
            debug!(url, "raw html already buffered");
            return Outcome::Skipped;
        }

        let page = match self.http.fetch_html(run_id, source_id, &url).await {
            Ok(page) => page,
            Err(err) => {
                warn!(url, error = %err, "fetch failed");
                return Outcome::Failed;
            }
        };
        let raw = JobListingRaw {
            url: url.clone(),
            html_snapshot: page.body,
        };
        match put_json(cache, CacheStage::RawHtml, &url, &raw, self.ttl()).await {
            Ok(()) => Outcome::Succeeded,
            Err(err) => {
                warn!(url, error = %err, "caching raw html failed");
                Outcome::Failed
            }
        }
    }

    pub async fn transform(&self) -> Result<TransformCounts> {
        let clean = self.clean().await?;
        let analyze = self.analyze().await?;
        Ok(TransformCounts { clean, analyze })
    }

    pub async fn clean(&self) -> Result<BatchCounts> {
        let urls = self
            .cache
            .urls(CacheStage::RawHtml)
            .await
            .context("listing raw html keys")?;
        let found = urls.len();
        let outcomes: Vec<Outcome> = stream::iter(urls)
            .map(|url| self.clean_url(url))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        let counts = BatchCounts::tally(found, &outcomes);
        info!(?counts, "clean stage done");
        Ok(counts)
    }

    async fn clean_url(&self, url: String) -> Outcome {
        let cache = self.cache.as_ref();
        if self.cached(CacheStage::CleanedHtml, &url).await {
            return Outcome::Skipped;
        }
        let raw: JobListingRaw = match get_json(cache, CacheStage::RawHtml, &url).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Outcome::Skipped,
            Err(err) => {
                warn!(url, error = %err, "raw html unreadable");
                return Outcome::Failed;
            }
        };

        let cleaned = reduce_listing(&raw);
        if cleaned.reduced_html.is_empty() {
            warn!(url, "nothing left after reduction");
            return Outcome::Failed;
        }
        match put_json(cache, CacheStage::CleanedHtml, &url, &cleaned, self.ttl()).await {
            Ok(()) => Outcome::Succeeded,
            Err(err) => {
                warn!(url, error = %err, "caching cleaned html failed");
                Outcome::Failed
            }
        }
    }

    pub async fn analyze(&self) -> Result<BatchCounts> {
        let urls = self
            .cache
            .urls(CacheStage::CleanedHtml)
            .await
            .context("listing cleaned html keys")?;
        let found = urls.len();
        let outcomes: Vec<Outcome> = stream::iter(urls)
            .map(|url| self.analyze_cached(url))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        let counts = BatchCounts::tally(found, &outcomes);
        info!(?counts, "analyze stage done");
        Ok(counts)
    }

    async fn analyze_cached(&self, url: String) -> Outcome {
        let cache = self.cache.as_ref();
        if self.cached(CacheStage::Analysis, &url).await {
            return Outcome::Skipped;
        }
        let cleaned: JobListingCleaned = match get_json(cache, CacheStage::CleanedHtml, &url).await {
            Ok(Some(cleaned)) => cleaned,
            Ok(None) => return Outcome::Skipped,
            Err(err) => {
                warn!(url, error = %err, "cleaned html unreadable");
                return Outcome::Failed;
            }
        };
        if cleaned.reduced_html.is_empty() {
            warn!(url, "empty cleaned document, not sent to the model");
            return Outcome::Failed;
        }

        let mut fields = match self.extractor.try_extract(&cleaned.reduced_html, &url).await {
            Ok(fields) => fields,
            Err(err) => {
                warn!(url, error = %err, "extraction failed");
                return Outcome::Failed;
            }
        };
        merge_structural(&mut fields, &cleaned);

        match put_json(cache, CacheStage::Analysis, &url, &fields, self.ttl()).await {
            Ok(()) => Outcome::Succeeded,
            Err(err) => {
                warn!(url, error = %err, "caching analysis failed");
                Outcome::Failed
            }
        }
    }

    pub async fn load(&self) -> Result<BatchCounts> {
        let urls = self
            .cache
            .urls(CacheStage::Analysis)
            .await
            .context("listing analysis keys")?;
        let found = urls.len();
        let outcomes: Vec<Outcome> = stream::iter(urls)
            .map(|url| self.load_url(url))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        let counts = BatchCounts::tally(found, &outcomes);
        info!(?counts, "load stage done");
        Ok(counts)
    }

    async fn load_url(&self, url: String) -> Outcome {
        let cache = self.cache.as_ref();
        let mut fields: ExtractedFields = match get_json(cache, CacheStage::Analysis, &url).await {
            Ok(Some(fields)) => fields,
            Ok(None) => return Outcome::Skipped,
            Err(err) => {
                warn!(url, error = %err, "analysis unreadable");
                return Outcome::Failed;
            }
        };
        fields.url = Some(url.clone());
        let offer = self.validator.validate(fields);

        if let Err(err) = self.store.upsert(&offer).await {
            warn!(url, error = %err, "upsert failed, analysis kept for retry");
            return Outcome::Failed;
        }

        for stage in [CacheStage::Analysis, CacheStage::CleanedHtml, CacheStage::RawHtml] {
            if let Err(err) = cache.delete(stage, &url).await {
                warn!(url, ?stage, error = %err, "cache cleanup failed");
            }
        }
        if let Err(err) = cache.mark_processed(&url, self.ttl()).await {
            warn!(url, error = %err, "marking processed failed");
        }
        debug!(url, "offer stored");
        Outcome::Succeeded
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let stages = async {
            let scrape = self.scrape(run_id).await?;
            let transform = self.transform().await?;
            let load = self.load().await?;
            anyhow::Ok((scrape, transform, load))
        };
        let (scrape, transform, load) = stages
            .instrument(info_span!("pipeline_run", %run_id))
            .await?;

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            scrape,
            clean: transform.clean,
            analyze: transform.analyze,
            load,
            reports_dir: None,
        };

        if self.config.write_reports {
            let dir = reports::write_reports(&self.config.workspace_root, &mut summary).await?;
            info!(reports_dir = %dir.display(), "reports written");
        }
        info!(%run_id, stored = summary.load.succeeded, "pipeline run complete");
        Ok(summary)
    }

    /// Fetch, reduce, extract and validate one URL without touching the cache
    /// or the store.
    pub async fn analyze_url(&self, url: &str) -> Result<AnalyzeReport> {
        let page = self
            .http
            .fetch_html(Uuid::new_v4(), "analyze", url)
            .await
            .with_context(|| format!("fetching {url}"))?;
        let (reduced_html, stats) = reduce(&page.body);
        if reduced_html.is_empty() {
            bail!("{url}: nothing relevant left after reduction");
        }
        let cleaned = JobListingCleaned {
            url: url.to_string(),
            reduced_html,
            extracted_company_name: stats.company_name.clone(),
            extracted_company_type: stats.company_type,
        };

        let mut extracted = self
            .extractor
            .try_extract(&cleaned.reduced_html, url)
            .await
            .with_context(|| format!("extracting fields from {url}"))?;
        merge_structural(&mut extracted, &cleaned);
        let offer = self.validator.validate(extracted.clone());

        Ok(AnalyzeReport {
            url: url.to_string(),
            reduce: stats,
            extracted,
            offer,
        })
    }
}
