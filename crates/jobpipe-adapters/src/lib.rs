//! Source adapter contracts and the Free-Work listing/detail adapter.

pub mod reduce;
pub mod title;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use jobpipe_core::{JobListingCleaned, JobListingRaw};
use jobpipe_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub use reduce::{reduce, reduce_listing, try_reduce, ReduceError, ReduceStats};
pub use title::title_from_url;

pub const CRATE_NAME: &str = "jobpipe-adapters";

pub const FREE_WORK_ADAPTER: &str = "free-work";

/// Pause between two listing pages of the same source.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(2);

fn default_enabled() -> bool {
    true
}

fn default_adapter() -> String {
    FREE_WORK_ADAPTER.to_string()
}

fn default_max_pages() -> u32 {
    10
}

fn default_job_link_selector() -> String {
    r#"a[href*="/job-mission/"]"#.to_string()
}

fn default_next_selector() -> String {
    "a, button".to_string()
}

fn default_next_text() -> String {
    "Suivant".to_string()
}

/// One entry of `sources.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_adapter")]
    pub adapter: String,
    pub base_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_job_link_selector")]
    pub job_link_selector: String,
    #[serde(default = "default_next_selector")]
    pub next_selector: String,
    #[serde(default = "default_next_text")]
    pub next_text: String,
}

impl SourceConfig {
    pub fn new(source_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            display_name: source_id.clone(),
            source_id,
            enabled: true,
            adapter: default_adapter(),
            base_url: base_url.into(),
            max_pages: default_max_pages(),
            job_link_selector: default_job_link_selector(),
            next_selector: default_next_selector(),
            next_text: default_next_text(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub request_delay: Duration,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Job links found on one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub job_urls: Vec<String>,
    pub has_next: bool,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    fn listing_page_url(&self, page: u32) -> String;

    fn parse_listing(&self, page_url: &str, html: &str) -> Result<ListingPage, AdapterError>;

    fn reduce_detail(&self, raw: &JobListingRaw) -> JobListingCleaned {
        reduce_listing(raw)
    }

    /// Walk listing pages from 1 and collect job URLs in discovery order,
    /// without duplicates. A fetch failure on page 1 is an error; later
    /// failures end pagination with what was collected so far.
    async fn get_all_job_urls(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<String>, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct FreeWorkAdapter {
    config: SourceConfig,
    job_links: Selector,
    next_controls: Selector,
}

impl FreeWorkAdapter {
    pub fn new(config: SourceConfig) -> Result<Self, AdapterError> {
        let job_links = Selector::parse(&config.job_link_selector)
            .map_err(|_| AdapterError::Selector(config.job_link_selector.clone()))?;
        let next_controls = Selector::parse(&config.next_selector)
            .map_err(|_| AdapterError::Selector(config.next_selector.clone()))?;
        Ok(Self {
            config,
            job_links,
            next_controls,
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn is_disabled(control: &ElementRef<'_>) -> bool {
        let el = control.value();
        el.attr("disabled").is_some()
            || el
                .attr("aria-disabled")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
            || el.classes().any(|c| c == "disabled")
    }

    fn has_enabled_next(&self, document: &Html) -> bool {
        let wanted = self.config.next_text.trim().to_lowercase();
        document.select(&self.next_controls).any(|control| {
            let text = control.text().collect::<String>();
            let label = control.value().attr("aria-label").unwrap_or_default();
            let matches = text.trim().to_lowercase().contains(&wanted)
                || label.to_lowercase().contains(&wanted);
            matches && !Self::is_disabled(&control)
        })
    }
}

#[async_trait]
impl SourceAdapter for FreeWorkAdapter {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn listing_page_url(&self, page: u32) -> String {
        let sep = if self.config.base_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}page={}", self.config.base_url, sep, page)
    }

    fn parse_listing(&self, page_url: &str, html: &str) -> Result<ListingPage, AdapterError> {
        let base = Url::parse(page_url)
            .map_err(|e| AdapterError::Message(format!("invalid page url {page_url}: {e}")))?;
        let document = Html::parse_document(html);

        let mut seen = HashSet::new();
        let mut job_urls = Vec::new();
        for link in document.select(&self.job_links) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Ok(mut absolute) = base.join(href.trim()) else {
                debug!(href, "skipping unparseable job link");
                continue;
            };
            absolute.set_fragment(None);
            let absolute = absolute.to_string();
            if seen.insert(absolute.clone()) {
                job_urls.push(absolute);
            }
        }

        Ok(ListingPage {
            job_urls,
            has_next: self.has_enabled_next(&document),
        })
    }

    async fn get_all_job_urls(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<String>, AdapterError> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();

        for page in 1..=self.config.max_pages.max(1) {
            if page > 1 && !ctx.request_delay.is_zero() {
                tokio::time::sleep(ctx.request_delay).await;
            }

            let page_url = self.listing_page_url(page);
            let fetched = match http.fetch_html(ctx.run_id, self.source_id(), &page_url).await {
                Ok(fetched) => fetched,
                Err(err) if page == 1 => return Err(err.into()),
                Err(err) => {
                    warn!(source_id = self.source_id(), page, error = %err, "listing page failed, stopping");
                    break;
                }
            };

            let listing = self.parse_listing(&page_url, &fetched.body)?;
            if listing.job_urls.is_empty() {
                debug!(source_id = self.source_id(), page, "no job links, stopping");
                break;
            }
            let before = all.len();
            for url in listing.job_urls {
                if seen.insert(url.clone()) {
                    all.push(url);
                }
            }
            debug!(
                source_id = self.source_id(),
                page,
                new_urls = all.len() - before,
                "listing page parsed"
            );

            if !listing.has_next {
                break;
            }
        }

        info!(source_id = self.source_id(), urls = all.len(), "job urls collected");
        Ok(all)
    }
}

/// Build the adapter named by a source entry, or `None` for unknown adapters
/// and invalid selectors.
pub fn adapter_for_source(config: &SourceConfig) -> Option<Box<dyn SourceAdapter>> {
    match config.adapter.as_str() {
        FREE_WORK_ADAPTER => match FreeWorkAdapter::new(config.clone()) {
            Ok(adapter) => Some(Box::new(adapter)),
            Err(err) => {
                warn!(source_id = %config.source_id, error = %err, "adapter rejected");
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body>
      <div class="job-list">
        <a href="/fr/tech-it/developpeur/job-mission/dev-rust">Dev Rust</a>
        <a href="/fr/tech-it/developpeur/job-mission/dev-rust#apply">Postuler</a>
        <a href="https://www.free-work.com/fr/tech-it/data/job-mission/data-engineer">Data</a>
        <a href="/fr/tech-it/jobs?page=2">Page 2</a>
      </div>
      <nav><button class="pagination-next">Suivant</button></nav>
    </body></html>"#;

    fn adapter(base_url: &str) -> FreeWorkAdapter {
        FreeWorkAdapter::new(SourceConfig::new("fullstack", base_url)).unwrap()
    }

    #[test]
    fn page_urls_keep_existing_query() {
        let a = adapter("https://www.free-work.com/fr/tech-it/jobs?query=rust");
        assert_eq!(
            a.listing_page_url(3),
            "https://www.free-work.com/fr/tech-it/jobs?query=rust&page=3"
        );
        let a = adapter("https://www.free-work.com/fr/tech-it/jobs");
        assert_eq!(a.listing_page_url(1), "https://www.free-work.com/fr/tech-it/jobs?page=1");
    }

    #[test]
    fn listing_links_are_absolute_and_deduplicated() {
        let a = adapter("https://www.free-work.com/fr/tech-it/jobs");
        let page = a
            .parse_listing("https://www.free-work.com/fr/tech-it/jobs?page=1", LISTING)
            .unwrap();
        assert_eq!(
            page.job_urls,
            vec![
                "https://www.free-work.com/fr/tech-it/developpeur/job-mission/dev-rust",
                "https://www.free-work.com/fr/tech-it/data/job-mission/data-engineer",
            ]
        );
        assert!(page.has_next);
    }

    #[test]
    fn disabled_next_control_ends_pagination() {
        let a = adapter("https://www.free-work.com/fr/tech-it/jobs");
        for nav in [
            r#"<button disabled>Suivant</button>"#,
            r#"<a aria-disabled="true">Suivant</a>"#,
            r#"<a class="btn disabled">Suivant</a>"#,
            r#"<a>Précédent</a>"#,
        ] {
            let html = format!(
                r#"<html><body><a href="/job-mission/x">x</a>{nav}</body></html>"#
            );
            let page = a.parse_listing("https://www.free-work.com/fr/", &html).unwrap();
            assert!(!page.has_next, "{nav}");
        }
    }

    #[test]
    fn unknown_adapters_are_not_built() {
        let mut config = SourceConfig::new("other", "https://example.test");
        config.adapter = "indeed".into();
        assert!(adapter_for_source(&config).is_none());

        let mut config = SourceConfig::new("broken", "https://example.test");
        config.job_link_selector = "a[".into();
        assert!(adapter_for_source(&config).is_none());

        let config = SourceConfig::new("fullstack", "https://example.test");
        assert_eq!(adapter_for_source(&config).unwrap().source_id(), "fullstack");
    }

    #[test]
    fn sources_yaml_entries_fill_defaults() {
        let config: SourceConfig = serde_yaml_entry(
            "source_id: data\nbase_url: https://www.free-work.com/fr/tech-it/jobs?query=data\n",
        );
        assert!(config.enabled);
        assert_eq!(config.adapter, "free-work");
        assert_eq!(config.max_pages, 10);
        assert_eq!(config.next_text, "Suivant");
    }

    fn serde_yaml_entry(yaml: &str) -> SourceConfig {
        serde_yaml::from_str(yaml).unwrap()
    }
}
