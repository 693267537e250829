//! Stage-namespaced dedup cache.
//!
//! Keys are `raw_html:<url>`, `cleaned_html:<url>`, `analysis:<url>` for the
//! intermediate artifacts and `job:<url>` for the terminal processed marker.
//! Payloads are JSON text.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(48 * 3600);

const PROCESSED_PREFIX: &str = "job";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache payload for {key} is not valid JSON: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStage {
    RawHtml,
    CleanedHtml,
    Analysis,
}

impl CacheStage {
    pub const ALL: [CacheStage; 3] = [
        CacheStage::RawHtml,
        CacheStage::CleanedHtml,
        CacheStage::Analysis,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            CacheStage::RawHtml => "raw_html",
            CacheStage::CleanedHtml => "cleaned_html",
            CacheStage::Analysis => "analysis",
        }
    }

    pub fn key(self, url: &str) -> String {
        format!("{}:{url}", self.prefix())
    }

    /// Inverse of [`CacheStage::key`].
    pub fn url_from_key(self, key: &str) -> Option<&str> {
        key.strip_prefix(self.prefix())?.strip_prefix(':')
    }
}

pub fn processed_key(url: &str) -> String {
    format!("{PROCESSED_PREFIX}:{url}")
}

#[async_trait]
pub trait DedupCache: Send + Sync {
    /// True once the URL went through the whole pipeline.
    async fn has(&self, url: &str) -> Result<bool, CacheError>;
    async fn mark_processed(&self, url: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn put(
        &self,
        stage: CacheStage,
        url: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), CacheError>;
    async fn get(&self, stage: CacheStage, url: &str) -> Result<Option<String>, CacheError>;
    async fn delete(&self, stage: CacheStage, url: &str) -> Result<(), CacheError>;
    /// URLs currently holding an artifact for `stage`.
    async fn urls(&self, stage: CacheStage) -> Result<Vec<String>, CacheError>;
}

pub async fn put_json<T: Serialize + ?Sized>(
    cache: &dyn DedupCache,
    stage: CacheStage,
    url: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let payload = serde_json::to_string(value).map_err(|source| CacheError::Codec {
        key: stage.key(url),
        source,
    })?;
    cache.put(stage, url, &payload, ttl).await
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn DedupCache,
    stage: CacheStage,
    url: &str,
) -> Result<Option<T>, CacheError> {
    let Some(payload) = cache.get(stage, url).await? else {
        return Ok(None);
    };
    serde_json::from_str(&payload)
        .map(Some)
        .map_err(|source| CacheError::Codec {
            key: stage.key(url),
            source,
        })
}

/// Redis-backed cache over a single auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        // SETEX rejects a zero expiry.
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl DedupCache for RedisCache {
    async fn has(&self, url: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(processed_key(url)).await?)
    }

    async fn mark_processed(&self, url: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(processed_key(url), Utc::now().to_rfc3339(), Self::ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn put(
        &self,
        stage: CacheStage,
        url: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(stage.key(url), payload, Self::ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn get(&self, stage: CacheStage, url: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(stage.key(url)).await?)
    }

    async fn delete(&self, stage: CacheStage, url: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(stage.key(url)).await?;
        Ok(())
    }

    async fn urls(&self, stage: CacheStage) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}:*", stage.prefix()))
            .query_async(&mut conn)
            .await?;
        let mut urls: Vec<String> = keys
            .iter()
            .filter_map(|k| stage.url_from_key(k))
            .map(ToString::to_string)
            .collect();
        urls.sort();
        Ok(urls)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    payload: String,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Process-local cache with the same TTL semantics, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, key: String, payload: String, ttl: Duration) {
        let entry = Entry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.live());
        entries.insert(key, entry);
    }

    async fn live_payload(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.live())
            .map(|e| e.payload.clone())
    }
}

#[async_trait]
impl DedupCache for MemoryCache {
    async fn has(&self, url: &str) -> Result<bool, CacheError> {
        Ok(self.live_payload(&processed_key(url)).await.is_some())
    }

    async fn mark_processed(&self, url: &str, ttl: Duration) -> Result<(), CacheError> {
        self.insert(processed_key(url), Utc::now().to_rfc3339(), ttl)
            .await;
        Ok(())
    }

    async fn put(
        &self,
        stage: CacheStage,
        url: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.insert(stage.key(url), payload.to_string(), ttl).await;
        Ok(())
    }

    async fn get(&self, stage: CacheStage, url: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live_payload(&stage.key(url)).await)
    }

    async fn delete(&self, stage: CacheStage, url: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(&stage.key(url));
        Ok(())
    }

    async fn urls(&self, stage: CacheStage) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.read().await;
        let mut urls: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.live())
            .filter_map(|(k, _)| stage.url_from_key(k))
            .map(ToString::to_string)
            .collect();
        urls.sort();
        Ok(urls)
    }
}
