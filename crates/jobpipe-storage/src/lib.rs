//! HTTP fetching, the dedup cache and the offer store.

pub mod cache;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub use cache::{
    get_json, put_json, CacheError, CacheStage, DedupCache, MemoryCache, RedisCache,
    DEFAULT_CACHE_TTL,
};
pub use store::{JobStore, MemoryJobStore, PgJobStore, StorageError};

pub const CRATE_NAME: &str = "jobpipe-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// A server-sent `Retry-After` replaces the exponential step, still
    /// capped at `max_delay`.
    pub fn delay_before_retry(&self, attempt_index: usize, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) => wait.min(self.max_delay),
            None => self.delay_for_attempt(attempt_index),
        }
    }
}

/// `Retry-After` in its delay-seconds form; HTTP dates are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse().ok().map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
    /// Page requests per minute across all sources; 0 means unthrottled.
    pub requests_per_minute: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            backoff: BackoffPolicy::default(),
            requests_per_minute: 0,
        }
    }
}

/// Minimal token bucket shared by the page fetcher and the LLM client.
#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// One token at a time, refilled evenly over the minute. `None` for 0.
    pub fn per_minute(requests: u32) -> Option<Self> {
        if requests == 0 {
            return None;
        }
        Some(Self::new(1, Duration::from_secs(60) / requests))
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if self.refill_every.is_zero() {
                return;
            }
            if elapsed >= self.refill_every {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every.saturating_sub(elapsed);
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetch limiter closed")]
    LimiterClosed,
}

impl FetchError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// Detail and listing page fetcher.
///
/// Requests pass a global and a per-source concurrency cap and an optional
/// per-minute token bucket. Only `200 OK` yields a page: any other status,
/// 2xx included, is a `FetchError::HttpStatus` so an empty or redirected
/// listing never reaches the cache. `5xx` and `429` are retried with
/// exponential backoff, or after the server's `Retry-After` when it sends one.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = SimpleTokenBucket::per_minute(config.requests_per_minute).map(Arc::new);

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            token_bucket,
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn fetch_html(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, url);
        self.fetch_html_inner(source_id, url).instrument(span).await
    }

    async fn fetch_html_inner(&self, source_id: &str, url: &str) -> Result<FetchedPage, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let mut attempt = 0usize;
        loop {
            let outcome = self.client.get(url).send().await;
            let can_retry = attempt < self.backoff.max_retries;

            match outcome {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status == StatusCode::OK {
                        let body = resp
                            .text()
                            .await
                            .map_err(|e| FetchError::from_reqwest(&final_url, e))?;
                        debug!(bytes = body.len(), "fetched page");
                        return Ok(FetchedPage {
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable && can_retry {
                        let wait = self
                            .backoff
                            .delay_before_retry(attempt, retry_after(resp.headers()));
                        warn!(%status, attempt, wait_ms = wait.as_millis() as u64, "retryable status");
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && can_retry {
                        warn!(error = %err, attempt, "retryable request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::from_reqwest(url, err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn fast_fetcher(max_retries: usize) -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            backoff: BackoffPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        })
        .expect("client")
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_overrides_backoff_within_cap() {
        let policy = BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_before_retry(1, None), Duration::from_millis(200));
        assert_eq!(
            policy.delay_before_retry(1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_before_retry(0, Some(Duration::from_secs(120))),
            Duration::from_secs(5)
        );

        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn throttled_requests_wait_for_retry_after() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/throttled")
            .with_status(429)
            .with_header("retry-after", "0")
            .expect(2)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            backoff: BackoffPolicy {
                max_retries: 1,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(30),
            },
            ..Default::default()
        })
        .expect("client");
        let url = format!("{}/throttled", server.url());
        let started = Instant::now();
        let err = fetcher
            .fetch_html(Uuid::new_v4(), "free-work", &url)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 429, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        mock.assert_async().await;
    }

    #[test]
    fn per_minute_limiter_is_optional() {
        assert!(SimpleTokenBucket::per_minute(0).is_none());
        let bucket = SimpleTokenBucket::per_minute(30).unwrap();
        assert_eq!(bucket.refill_every, Duration::from_secs(2));
        assert_eq!(bucket.capacity, 1);
    }

    #[test]
    fn only_server_errors_and_throttling_are_retried() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn fetch_returns_body_on_200() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/job-mission/dev-rust")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html><h1>Dev Rust</h1></html>")
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/job-mission/dev-rust", server.url());
        let page = fast_fetcher(0)
            .fetch_html(Uuid::new_v4(), "free-work", &url)
            .await
            .expect("fetch");
        assert!(page.final_url.ends_with("/job-mission/dev-rust"));
        assert!(page.body.contains("Dev Rust"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_200_success_codes_are_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/empty")
            .with_status(204)
            .create_async()
            .await;

        let url = format!("{}/empty", server.url());
        let err = fast_fetcher(0)
            .fetch_html(Uuid::new_v4(), "free-work", &url)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 204, .. }));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let url = format!("{}/flaky", server.url());
        let err = fast_fetcher(2)
            .fetch_html(Uuid::new_v4(), "free-work", &url)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/gone")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/gone", server.url());
        let err = fast_fetcher(3)
            .fetch_html(Uuid::new_v4(), "free-work", &url)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn token_bucket_hands_out_capacity_then_waits() {
        let bucket = SimpleTokenBucket::new(2, Duration::from_millis(20));
        let started = Instant::now();
        bucket.take().await;
        bucket.take().await;
        assert!(started.elapsed() < Duration::from_millis(20));
        bucket.take().await;
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
