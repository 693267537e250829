//! Versioned technology synonym table.
//!
//! The table is read once (embedded copy or an override file) and never
//! mutated afterwards; callers share it behind an `Arc`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::MAX_TECHNOS;

const EMBEDDED_TABLE: &str = include_str!("../../../rules/technos.yaml");

#[derive(Debug, Error)]
pub enum TechnosError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing technos table: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("variant `{variant}` maps to both `{first}` and `{second}`")]
    Conflict {
        variant: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Deserialize)]
struct TechnosFile {
    version: u32,
    #[serde(default)]
    canonical: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    blacklist: Vec<String>,
}

/// Result of looking a single technology up in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechLookup<'a> {
    Canonical(&'a str),
    Blacklisted,
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct SynonymTable {
    version: u32,
    by_variant: HashMap<String, String>,
    canonical_names: Vec<String>,
    blacklist: HashSet<String>,
}

impl SynonymTable {
    /// The table compiled into the binary from `rules/technos.yaml`.
    pub fn embedded() -> Result<Self, TechnosError> {
        Self::from_yaml(EMBEDDED_TABLE)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TechnosError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TechnosError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, TechnosError> {
        let file: TechnosFile = serde_yaml::from_str(text)?;
        Self::build(file)
    }

    fn build(file: TechnosFile) -> Result<Self, TechnosError> {
        let mut by_variant: HashMap<String, String> = HashMap::new();
        let mut canonical_names = Vec::with_capacity(file.canonical.len());

        for (canonical, variants) in file.canonical {
            for variant in std::iter::once(&canonical).chain(variants.iter()) {
                let key = compact(variant);
                if key.is_empty() {
                    continue;
                }
                if let Some(existing) = by_variant.get(&key) {
                    if existing != &canonical {
                        return Err(TechnosError::Conflict {
                            variant: variant.clone(),
                            first: existing.clone(),
                            second: canonical.clone(),
                        });
                    }
                    continue;
                }
                by_variant.insert(key, canonical.clone());
            }
            canonical_names.push(canonical);
        }

        Ok(Self {
            version: file.version,
            by_variant,
            canonical_names,
            blacklist: file.blacklist.iter().map(|b| compact(b)).collect(),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn canonical_names(&self) -> &[String] {
        &self.canonical_names
    }

    pub fn lookup(&self, raw: &str) -> TechLookup<'_> {
        let key = compact(raw);
        if self.blacklist.contains(&key) {
            return TechLookup::Blacklisted;
        }
        match self.by_variant.get(&key) {
            Some(canonical) => TechLookup::Canonical(canonical.as_str()),
            None => TechLookup::Unknown(raw.trim().to_string()),
        }
    }

    /// Canonical spelling, blacklist filtering, case-insensitive dedup and the
    /// five-entry cap, in input order.
    pub fn canonicalize_list<S: AsRef<str>>(&self, items: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for item in items {
            let name = match self.lookup(item.as_ref()) {
                TechLookup::Canonical(c) => c.to_string(),
                TechLookup::Blacklisted => continue,
                TechLookup::Unknown(s) if s.is_empty() => continue,
                TechLookup::Unknown(s) => s,
            };
            if seen.insert(compact(&name)) {
                out.push(name);
            }
            if out.len() == MAX_TECHNOS {
                break;
            }
        }
        out
    }

    pub fn is_blacklisted(&self, raw: &str) -> bool {
        self.blacklist.contains(&compact(raw))
    }
}

/// Matching key: lower-case, accents stripped, separators removed.
/// `#` and `+` are kept so C, C# and C++ stay distinct.
fn compact(input: &str) -> String {
    input
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .filter_map(|c| match c {
            ' ' | '\t' | '.' | '-' | '_' | '/' | '\'' => None,
            'à' | 'â' | 'ä' => Some('a'),
            'é' | 'è' | 'ê' | 'ë' => Some('e'),
            'î' | 'ï' => Some('i'),
            'ô' | 'ö' => Some('o'),
            'ù' | 'û' | 'ü' => Some('u'),
            'ç' => Some('c'),
            c => Some(c),
        })
        .collect()
}
