//! Storage sink for validated offers, keyed by URL.

use std::collections::HashMap;

use async_trait::async_trait;
use jobpipe_core::{
    CompanyType, ContractType, Country, ExperienceLevel, JobDomain, RemoteType,
    ValidatedJobOffer,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("offer has no url")]
    MissingUrl,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite the row for `offer.url`.
    async fn upsert(&self, offer: &ValidatedJobOffer) -> Result<(), StorageError>;
    async fn get(&self, url: &str) -> Result<Option<ValidatedJobOffer>, StorageError>;
    async fn count(&self) -> Result<u64, StorageError>;
}

const CREATE_JOB_OFFERS: &str = r#"
CREATE TABLE IF NOT EXISTS job_offers (
    url TEXT PRIMARY KEY,
    title TEXT,
    company TEXT,
    company_type TEXT,
    contract_type TEXT[] NOT NULL DEFAULT '{}',
    domain TEXT,
    xp TEXT,
    remote TEXT,
    country TEXT,
    region TEXT,
    technos TEXT[] NOT NULL DEFAULT '{}',
    duration_days BIGINT,
    tjm_min BIGINT,
    tjm_max BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const UPSERT_JOB_OFFER: &str = r#"
INSERT INTO job_offers (
    url, title, company, company_type, contract_type, domain, xp, remote,
    country, region, technos, duration_days, tjm_min, tjm_max
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
ON CONFLICT (url) DO UPDATE SET
    title = EXCLUDED.title,
    company = EXCLUDED.company,
    company_type = EXCLUDED.company_type,
    contract_type = EXCLUDED.contract_type,
    domain = EXCLUDED.domain,
    xp = EXCLUDED.xp,
    remote = EXCLUDED.remote,
    country = EXCLUDED.country,
    region = EXCLUDED.region,
    technos = EXCLUDED.technos,
    duration_days = EXCLUDED.duration_days,
    tjm_min = EXCLUDED.tjm_min,
    tjm_max = EXCLUDED.tjm_max,
    updated_at = now()
"#;

/// PostgreSQL sink; one pool built at startup and shared.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_JOB_OFFERS).execute(&self.pool).await?;
        info!("job_offers table ready");
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct JobOfferRow {
    url: String,
    title: Option<String>,
    company: Option<String>,
    company_type: Option<String>,
    contract_type: Vec<String>,
    domain: Option<String>,
    xp: Option<String>,
    remote: Option<String>,
    country: Option<String>,
    region: Option<String>,
    technos: Vec<String>,
    duration_days: Option<i64>,
    tjm_min: Option<i64>,
    tjm_max: Option<i64>,
}

impl From<JobOfferRow> for ValidatedJobOffer {
    fn from(row: JobOfferRow) -> Self {
        ValidatedJobOffer {
            url: row.url,
            title: row.title,
            company: row.company,
            company_type: row.company_type.as_deref().and_then(CompanyType::from_label),
            contract_type: row
                .contract_type
                .iter()
                .filter_map(|c| ContractType::from_label(c))
                .collect(),
            domain: row.domain.as_deref().and_then(JobDomain::from_label),
            xp: row.xp.as_deref().and_then(ExperienceLevel::from_label),
            remote: row.remote.as_deref().and_then(RemoteType::from_label),
            country: row.country.as_deref().and_then(Country::from_label),
            region: row.region,
            technos: row.technos,
            duration_days: row.duration_days,
            tjm_min: row.tjm_min,
            tjm_max: row.tjm_max,
        }
    }
}

fn label<T: Copy>(value: Option<T>, f: fn(T) -> &'static str) -> Option<&'static str> {
    value.map(f)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert(&self, offer: &ValidatedJobOffer) -> Result<(), StorageError> {
        if offer.url.trim().is_empty() {
            return Err(StorageError::MissingUrl);
        }
        let contract_type: Vec<&str> = offer.contract_type.iter().map(|c| c.label()).collect();

        sqlx::query(UPSERT_JOB_OFFER)
            .bind(&offer.url)
            .bind(&offer.title)
            .bind(&offer.company)
            .bind(label(offer.company_type, CompanyType::label))
            .bind(&contract_type)
            .bind(label(offer.domain, JobDomain::label))
            .bind(label(offer.xp, ExperienceLevel::label))
            .bind(label(offer.remote, RemoteType::label))
            .bind(label(offer.country, Country::label))
            .bind(&offer.region)
            .bind(&offer.technos)
            .bind(offer.duration_days)
            .bind(offer.tjm_min)
            .bind(offer.tjm_max)
            .execute(&self.pool)
            .await?;
        debug!(url = %offer.url, "upserted job offer");
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<Option<ValidatedJobOffer>, StorageError> {
        let row: Option<JobOfferRow> = sqlx::query_as(
            "SELECT url, title, company, company_type, contract_type, domain, xp, remote, \
             country, region, technos, duration_days, tjm_min, tjm_max \
             FROM job_offers WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_offers")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

/// Map-backed sink with the same overwrite-by-URL semantics.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    rows: RwLock<HashMap<String, ValidatedJobOffer>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ValidatedJobOffer> {
        let mut rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.url.cmp(&b.url));
        rows
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, offer: &ValidatedJobOffer) -> Result<(), StorageError> {
        if offer.url.trim().is_empty() {
            return Err(StorageError::MissingUrl);
        }
        self.rows
            .write()
            .await
            .insert(offer.url.clone(), offer.clone());
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<Option<ValidatedJobOffer>, StorageError> {
        Ok(self.rows.read().await.get(url).cloned())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.rows.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(url: &str, title: &str) -> ValidatedJobOffer {
        ValidatedJobOffer {
            url: url.to_string(),
            title: Some(title.to_string()),
            contract_type: vec![ContractType::Freelance],
            tjm_min: Some(500),
            tjm_max: Some(650),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upserting_same_url_twice_keeps_one_row_with_latest_values() {
        let store = MemoryJobStore::new();
        store.upsert(&offer("https://x.test/a", "first")).await.unwrap();
        store.upsert(&offer("https://x.test/a", "second")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let row = store.get("https://x.test/a").await.unwrap().unwrap();
        assert_eq!(row.title.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn offers_without_url_are_rejected() {
        let store = MemoryJobStore::new();
        let err = store.upsert(&offer("  ", "nope")).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingUrl));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn rows_map_back_to_vocabulary_types() {
        let row = JobOfferRow {
            url: "https://x.test/b".into(),
            title: None,
            company: Some("Acme".into()),
            company_type: Some("ESN".into()),
            contract_type: vec!["CDI".into(), "bogus".into()],
            domain: Some("Backend".into()),
            xp: Some("Confirmé".into()),
            remote: Some("Hybride".into()),
            country: Some("France".into()),
            region: Some("Occitanie".into()),
            technos: vec!["Rust".into()],
            duration_days: None,
            tjm_min: None,
            tjm_max: None,
        };
        let offer: ValidatedJobOffer = row.into();
        assert_eq!(offer.company_type, Some(CompanyType::Esn));
        assert_eq!(offer.contract_type, vec![ContractType::Cdi]);
        assert_eq!(offer.xp, Some(ExperienceLevel::Confirmed));
        assert_eq!(offer.remote, Some(RemoteType::Hybrid));
        assert_eq!(offer.country, Some(Country::France));
    }
}
