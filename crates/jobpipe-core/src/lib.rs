//! Core domain model for the job-offer pipeline: listing snapshots, the
//! extraction field schema and the validated offer persisted downstream.

pub mod technos;
pub mod vocab;

use serde::{Deserialize, Serialize};

pub use technos::{SynonymTable, TechLookup, TechnosError};
pub use vocab::{
    all_regions, city_region, fold_key, resolve_region, CompanyType, ContractType, Country,
    ExperienceLevel, JobDomain, RegionMatch, RemoteType,
};

pub const CRATE_NAME: &str = "jobpipe-core";

/// Upper bound on the technology list of a validated offer.
pub const MAX_TECHNOS: usize = 5;

/// The job board's own name; never a valid employer.
pub const JOB_BOARD_BRAND: &str = "Free-Work";

pub fn is_job_board_brand(name: &str) -> bool {
    let squashed: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    let brand: String = JOB_BOARD_BRAND
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    squashed == brand
}

/// Raw detail page as fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListingRaw {
    pub url: String,
    pub html_snapshot: String,
}

/// Reduced detail page plus whatever the page structure told us directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListingCleaned {
    pub url: String,
    pub reduced_html: String,
    #[serde(default)]
    pub extracted_company_name: Option<String>,
    #[serde(default)]
    pub extracted_company_type: Option<CompanyType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Enum,
    Integer,
    TextList,
    EnumList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Filled from the listing URL rather than asked of the model.
    pub from_url: bool,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        from_url: false,
    }
}

/// The contract between the extractor and the validator.
pub const FIELD_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "TITLE",
        kind: FieldKind::Text,
        from_url: true,
    },
    field("COMPANY", FieldKind::Text),
    field("COMPANY_TYPE", FieldKind::Enum),
    field("CONTRACT_TYPE", FieldKind::EnumList),
    field("DOMAIN", FieldKind::Enum),
    field("XP", FieldKind::Enum),
    field("REMOTE", FieldKind::Enum),
    field("COUNTRY", FieldKind::Enum),
    field("REGION", FieldKind::Enum),
    field("TECHNOS", FieldKind::TextList),
    field("DURATION_DAYS", FieldKind::Integer),
    field("TJM_MIN", FieldKind::Integer),
    field("TJM_MAX", FieldKind::Integer),
    FieldSpec {
        name: "URL",
        kind: FieldKind::Text,
        from_url: true,
    },
];

pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    FIELD_SCHEMA.iter().find(|f| f.name == name)
}

/// Fields the model must return; the rest are derived locally.
pub fn model_fields() -> impl Iterator<Item = &'static FieldSpec> {
    FIELD_SCHEMA.iter().filter(|f| !f.from_url)
}

/// Typed view of the extractor output, before vocabulary checks.
///
/// Serialized with the upper-case schema keys; this is also the cached
/// `analysis:<url>` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub company: Option<String>,
    pub company_type: Option<String>,
    pub contract_type: Vec<String>,
    pub domain: Option<String>,
    pub xp: Option<String>,
    pub remote: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub technos: Vec<String>,
    pub duration_days: Option<i64>,
    pub tjm_min: Option<i64>,
    pub tjm_max: Option<i64>,
    pub url: Option<String>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Terminal record, one row per URL in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ValidatedJobOffer {
    pub url: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub company_type: Option<CompanyType>,
    pub contract_type: Vec<ContractType>,
    pub domain: Option<JobDomain>,
    pub xp: Option<ExperienceLevel>,
    pub remote: Option<RemoteType>,
    pub country: Option<Country>,
    pub region: Option<String>,
    pub technos: Vec<String>,
    pub duration_days: Option<i64>,
    pub tjm_min: Option<i64>,
    pub tjm_max: Option<i64>,
}

impl ValidatedJobOffer {
    pub fn is_permanent(&self) -> bool {
        self.contract_type.contains(&ContractType::Cdi)
    }
}
