//! Vocabulary checks and business rules between extraction and storage.

use std::sync::Arc;

use jobpipe_core::{
    is_job_board_brand, resolve_region, CompanyType, ContractType, Country, ExperienceLevel, ExtractedFields,
    JobDomain, RemoteType, SynonymTable, ValidatedJobOffer,
};
use tracing::debug;

/// Pure and total: anything that fails a check is nulled, never rejected.
#[derive(Debug, Clone)]
pub struct Validator {
    technos: Arc<SynonymTable>,
}

fn member<T>(
    field: &'static str,
    value: Option<&str>,
    parse: fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = value?;
    let parsed = parse(raw);
    if parsed.is_none() {
        debug!(field, value = raw, "value outside vocabulary, nulled");
    }
    parsed
}

/// Employer name, or `None` for blanks and the job board's own brand.
fn clean_company(company: Option<&str>) -> Option<String> {
    let name = company?.trim();
    if name.is_empty() {
        return None;
    }
    if is_job_board_brand(name) {
        debug!(company = name, "job board brand given as employer, nulled");
        return None;
    }
    Some(name.to_string())
}

/// Region clean-up scoped to the country. Returns the canonical region and,
/// when the country was unknown, the country the region implies.
fn clean_region(country: Option<Country>, region: Option<&str>) -> (Option<Country>, Option<String>) {
    let Some(raw) = region else {
        return (country, None);
    };
    let matches = resolve_region(raw);

    match country {
        Some(country) => match matches.iter().find(|m| m.country == country) {
            Some(found) => (Some(country), Some(found.region.to_string())),
            None => {
                debug!(region = raw, country = %country, "region not in country, nulled");
                (Some(country), None)
            }
        },
        None => match matches.as_slice() {
            [only] => {
                debug!(region = only.region, country = %only.country, "country inferred from region");
                (Some(only.country), Some(only.region.to_string()))
            }
            [] => {
                debug!(region = raw, "unknown region, nulled");
                (None, None)
            }
            _ => {
                debug!(region = raw, "ambiguous region without country, nulled");
                (None, None)
            }
        },
    }
}

impl Validator {
    pub fn new(technos: Arc<SynonymTable>) -> Self {
        Self { technos }
    }

    pub fn technos(&self) -> &SynonymTable {
        &self.technos
    }

    pub fn validate(&self, record: ExtractedFields) -> ValidatedJobOffer {
        let mut offer = ValidatedJobOffer {
            url: record.url.clone().unwrap_or_default(),
            title: record.title.clone(),
            company: clean_company(record.company.as_deref()),
            duration_days: record.duration_days,
            tjm_min: record.tjm_min,
            tjm_max: record.tjm_max,
            ..Default::default()
        };

        offer.xp = member("XP", record.xp.as_deref(), ExperienceLevel::from_label);

        // CDI is judged on the raw entries so a permanent contract always
        // clears the freelance-only figures.
        let permanent = record
            .contract_type
            .iter()
            .any(|c| ContractType::from_label(c) == Some(ContractType::Cdi));
        if permanent {
            offer.duration_days = None;
            offer.tjm_min = None;
            offer.tjm_max = None;
        }

        let country = member("COUNTRY", record.country.as_deref(), Country::from_label);
        let (country, region) = clean_region(country, record.region.as_deref());
        offer.country = country;
        offer.region = region;

        offer.company_type = member(
            "COMPANY_TYPE",
            record.company_type.as_deref(),
            CompanyType::from_label,
        );

        for raw in &record.contract_type {
            match ContractType::from_label(raw) {
                Some(contract) if !offer.contract_type.contains(&contract) => {
                    offer.contract_type.push(contract)
                }
                Some(_) => {}
                None => debug!(value = %raw, "contract type dropped"),
            }
        }

        offer.domain = member("DOMAIN", record.domain.as_deref(), JobDomain::from_label);
        offer.remote = member("REMOTE", record.remote.as_deref(), RemoteType::from_label);
        offer.technos = self.technos.canonicalize_list(&record.technos);

        match (offer.tjm_min, offer.tjm_max) {
            (Some(min), None) => offer.tjm_max = Some(min),
            (None, Some(max)) => offer.tjm_min = Some(max),
            (Some(min), Some(max)) if min > max => {
                debug!(min, max, "tjm range inverted, swapped");
                offer.tjm_min = Some(max);
                offer.tjm_max = Some(min);
            }
            _ => {}
        }
        if offer.duration_days.is_some_and(|d| d < 0) {
            debug!(days = ?offer.duration_days, "negative duration, nulled");
            offer.duration_days = None;
        }

        offer
    }
}
