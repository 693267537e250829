//! Closed vocabularies shared by the extractor prompt, the validator and storage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares a closed vocabulary enum whose serialized form is the French label
/// used on the job board and in stored rows.
macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            /// Exact membership test: the candidate must equal a label once
            /// surrounding whitespace is trimmed and case is folded.
            pub fn from_label(candidate: &str) -> Option<Self> {
                let wanted = candidate.trim().to_lowercase();
                if wanted.is_empty() {
                    return None;
                }
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.label().to_lowercase() == wanted)
            }

            pub fn labels() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.label()).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

vocabulary! {
    /// Company categories as published in the Free-Work company badge.
    CompanyType {
        CommunicationHrAgency => "Agence de COM / RH",
        WebAgency => "Agence WEB / Communication",
        Consulting => "Cabinet de conseil",
        Recruitment => "Cabinet de recrutement / placement",
        TrainingCentre => "Centre de formation",
        IndependentSales => "Commercial indépendant",
        EndClient => "DSI / Client final",
        School => "Ecole IT / Université",
        SoftwareVendor => "Editeur de logiciels",
        Esn => "ESN",
        Portage => "Société de portage",
        HeadHunter => "Sourcing / chasseur de têtes",
        Startup => "Start-up",
    }
}

vocabulary! {
    ContractType {
        Freelance => "Freelance",
        Cdi => "CDI",
        Cdd => "CDD",
        Internship => "Stage",
        WorkStudy => "Alternance",
    }
}

vocabulary! {
    JobDomain {
        Fullstack => "Fullstack",
        Frontend => "Frontend",
        Backend => "Backend",
        DataEngineer => "Data Engineer",
        DataScientist => "Data Scientist",
        DataAnalyst => "Data Analyst",
        MlEngineer => "ML Engineer",
        DevOps => "DevOps",
        Cloud => "Cloud",
        Mobile => "Mobile",
        Cybersecurity => "Cybersécurité",
        Pentester => "Pentester",
        QaEngineer => "QA Engineer",
        TestAutomation => "Test Automation Engineer",
        Performance => "Performance Engineer",
        TechLead => "Tech Lead",
        ProductManager => "Product Manager",
        ProductOwner => "Product Owner",
        ScrumMaster => "Scrum Master",
        Blockchain => "Blockchain Developer",
        GameDeveloper => "Game Developer",
        LowLevel => "Low Level Developer",
    }
}

vocabulary! {
    /// Junior < 2 years, Intermédiaire 2-5, Confirmé 5-10, Sénior > 10.
    ExperienceLevel {
        Junior => "Junior",
        Intermediate => "Intermédiaire",
        Confirmed => "Confirmé",
        Senior => "Sénior",
    }
}

vocabulary! {
    RemoteType {
        Full => "100%",
        Hybrid => "Hybride",
        OnSite => "Non",
    }
}

vocabulary! {
    Country {
        France => "France",
        Belgium => "Belgique",
        Luxembourg => "Luxembourg",
        Switzerland => "Suisse",
    }
}

const FRANCE_REGIONS: &[&str] = &[
    "Auvergne-Rhône-Alpes",
    "Bourgogne-Franche-Comté",
    "Bretagne",
    "Centre-Val de Loire",
    "Corse",
    "Grand Est",
    "Hauts-de-France",
    "Île-de-France",
    "Normandie",
    "Nouvelle-Aquitaine",
    "Occitanie",
    "Pays de la Loire",
    "Provence-Alpes-Côte d'Azur",
    "DOM-TOM",
];

const BELGIUM_REGIONS: &[&str] = &["Bruxelles-Capitale", "Flandre", "Wallonie"];

const LUXEMBOURG_REGIONS: &[&str] = &["Luxembourg-Ville", "Diekirch", "Grevenmacher"];

const SWITZERLAND_REGIONS: &[&str] = &[
    "Genève",
    "Vaud",
    "Zürich",
    "Berne",
    "Bâle",
    "Tessin",
    "Valais",
    "Fribourg",
    "Neuchâtel",
    "Saint-Gall",
    "Lucerne",
    "Argovie",
];

impl Country {
    pub fn regions(self) -> &'static [&'static str] {
        match self {
            Country::France => FRANCE_REGIONS,
            Country::Belgium => BELGIUM_REGIONS,
            Country::Luxembourg => LUXEMBOURG_REGIONS,
            Country::Switzerland => SWITZERLAND_REGIONS,
        }
    }

    pub fn has_region(self, region: &str) -> bool {
        self.regions().contains(&region)
    }
}

/// Every region label across all countries, in country order.
pub fn all_regions() -> Vec<&'static str> {
    Country::ALL
        .iter()
        .flat_map(|c| c.regions().iter().copied())
        .collect()
}

/// Cities commonly written in place of a region.
const CITY_REGIONS: &[(&str, Country, &str)] = &[
    ("paris", Country::France, "Île-de-France"),
    ("la defense", Country::France, "Île-de-France"),
    ("boulogne billancourt", Country::France, "Île-de-France"),
    ("issy les moulineaux", Country::France, "Île-de-France"),
    ("nanterre", Country::France, "Île-de-France"),
    ("saint denis", Country::France, "Île-de-France"),
    ("marseille", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("nice", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("sophia antipolis", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("aix en provence", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("toulon", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("lyon", Country::France, "Auvergne-Rhône-Alpes"),
    ("grenoble", Country::France, "Auvergne-Rhône-Alpes"),
    ("clermont ferrand", Country::France, "Auvergne-Rhône-Alpes"),
    ("saint etienne", Country::France, "Auvergne-Rhône-Alpes"),
    ("annecy", Country::France, "Auvergne-Rhône-Alpes"),
    ("toulouse", Country::France, "Occitanie"),
    ("montpellier", Country::France, "Occitanie"),
    ("bordeaux", Country::France, "Nouvelle-Aquitaine"),
    ("poitiers", Country::France, "Nouvelle-Aquitaine"),
    ("limoges", Country::France, "Nouvelle-Aquitaine"),
    ("lille", Country::France, "Hauts-de-France"),
    ("amiens", Country::France, "Hauts-de-France"),
    ("strasbourg", Country::France, "Grand Est"),
    ("nancy", Country::France, "Grand Est"),
    ("metz", Country::France, "Grand Est"),
    ("reims", Country::France, "Grand Est"),
    ("nantes", Country::France, "Pays de la Loire"),
    ("angers", Country::France, "Pays de la Loire"),
    ("le mans", Country::France, "Pays de la Loire"),
    ("rennes", Country::France, "Bretagne"),
    ("brest", Country::France, "Bretagne"),
    ("rouen", Country::France, "Normandie"),
    ("caen", Country::France, "Normandie"),
    ("le havre", Country::France, "Normandie"),
    ("dijon", Country::France, "Bourgogne-Franche-Comté"),
    ("besancon", Country::France, "Bourgogne-Franche-Comté"),
    ("orleans", Country::France, "Centre-Val de Loire"),
    ("tours", Country::France, "Centre-Val de Loire"),
    ("ajaccio", Country::France, "Corse"),
    ("bastia", Country::France, "Corse"),
    ("bruxelles", Country::Belgium, "Bruxelles-Capitale"),
    ("brussels", Country::Belgium, "Bruxelles-Capitale"),
    ("anvers", Country::Belgium, "Flandre"),
    ("antwerpen", Country::Belgium, "Flandre"),
    ("gand", Country::Belgium, "Flandre"),
    ("gent", Country::Belgium, "Flandre"),
    ("liege", Country::Belgium, "Wallonie"),
    ("namur", Country::Belgium, "Wallonie"),
    ("charleroi", Country::Belgium, "Wallonie"),
    ("mons", Country::Belgium, "Wallonie"),
    ("lausanne", Country::Switzerland, "Vaud"),
    ("zurich", Country::Switzerland, "Zürich"),
    ("bale", Country::Switzerland, "Bâle"),
    ("basel", Country::Switzerland, "Bâle"),
    ("berne", Country::Switzerland, "Berne"),
    ("bern", Country::Switzerland, "Berne"),
    ("lugano", Country::Switzerland, "Tessin"),
    ("sion", Country::Switzerland, "Valais"),
    ("esch sur alzette", Country::Luxembourg, "Luxembourg-Ville"),
    ("kirchberg", Country::Luxembourg, "Luxembourg-Ville"),
    ("ettelbruck", Country::Luxembourg, "Diekirch"),
    ("echternach", Country::Luxembourg, "Grevenmacher"),
];

/// Abbreviations and historical names resolving to a current region.
const REGION_ALIASES: &[(&str, Country, &str)] = &[
    ("idf", Country::France, "Île-de-France"),
    ("region parisienne", Country::France, "Île-de-France"),
    ("paris region", Country::France, "Île-de-France"),
    ("aura", Country::France, "Auvergne-Rhône-Alpes"),
    ("ara", Country::France, "Auvergne-Rhône-Alpes"),
    ("rhone alpes", Country::France, "Auvergne-Rhône-Alpes"),
    ("auvergne", Country::France, "Auvergne-Rhône-Alpes"),
    ("paca", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("region sud", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("provence", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("cote d azur", Country::France, "Provence-Alpes-Côte d'Azur"),
    ("aquitaine", Country::France, "Nouvelle-Aquitaine"),
    ("poitou charentes", Country::France, "Nouvelle-Aquitaine"),
    ("limousin", Country::France, "Nouvelle-Aquitaine"),
    ("languedoc roussillon", Country::France, "Occitanie"),
    ("midi pyrenees", Country::France, "Occitanie"),
    ("hdf", Country::France, "Hauts-de-France"),
    ("nord pas de calais", Country::France, "Hauts-de-France"),
    ("picardie", Country::France, "Hauts-de-France"),
    ("alsace", Country::France, "Grand Est"),
    ("lorraine", Country::France, "Grand Est"),
    ("champagne ardenne", Country::France, "Grand Est"),
    ("pdl", Country::France, "Pays de la Loire"),
    ("bfc", Country::France, "Bourgogne-Franche-Comté"),
    ("bourgogne", Country::France, "Bourgogne-Franche-Comté"),
    ("franche comte", Country::France, "Bourgogne-Franche-Comté"),
    ("cvdl", Country::France, "Centre-Val de Loire"),
    ("haute normandie", Country::France, "Normandie"),
    ("basse normandie", Country::France, "Normandie"),
    ("corsica", Country::France, "Corse"),
    ("brittany", Country::France, "Bretagne"),
    ("bruxelles", Country::Belgium, "Bruxelles-Capitale"),
    ("region de bruxelles capitale", Country::Belgium, "Bruxelles-Capitale"),
    ("vlaanderen", Country::Belgium, "Flandre"),
    ("geneve", Country::Switzerland, "Genève"),
    ("geneva", Country::Switzerland, "Genève"),
    ("luxembourg", Country::Luxembourg, "Luxembourg-Ville"),
    ("luxembourg ville", Country::Luxembourg, "Luxembourg-Ville"),
];

/// Lower-cases, strips French diacritics and collapses punctuation to single
/// spaces so "Île-de-France", "ile de france" and "ILE_DE_FRANCE" compare equal.
pub fn fold_key(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.trim().chars().flat_map(char::to_lowercase) {
        let mapped = match ch {
            'à' | 'â' | 'ä' | 'á' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' | 'í' => 'i',
            'ô' | 'ö' | 'ó' => 'o',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'ç' => 'c',
            'ÿ' => 'y',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        };
        out.push(mapped);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A region candidate resolved to its canonical label and owning country.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMatch {
    pub country: Country,
    pub region: &'static str,
}

/// Resolves a free-form region/city string to every canonical region it may
/// denote: canonical labels first, then aliases, then the city table.
pub fn resolve_region(candidate: &str) -> Vec<RegionMatch> {
    let key = fold_key(candidate);
    if key.is_empty() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for country in Country::ALL {
        for region in country.regions() {
            if fold_key(region) == key {
                matches.push(RegionMatch {
                    country: *country,
                    region: *region,
                });
            }
        }
    }
    if !matches.is_empty() {
        return matches;
    }

    for (alias, country, region) in REGION_ALIASES {
        if *alias == key {
            matches.push(RegionMatch {
                country: *country,
                region: *region,
            });
        }
    }
    if !matches.is_empty() {
        return matches;
    }

    CITY_REGIONS
        .iter()
        .filter(|(city, _, _)| *city == key)
        .map(|(_, country, region)| RegionMatch {
            country: *country,
            region: *region,
        })
        .collect()
}

/// City to region lookup alone, used by the prompt to show the model examples.
pub fn city_region(city: &str) -> Option<RegionMatch> {
    let key = fold_key(city);
    CITY_REGIONS
        .iter()
        .find(|(c, _, _)| *c == key)
        .map(|(_, country, region)| RegionMatch {
            country: *country,
            region: *region,
        })
}

pub fn example_cities(country: Country, limit: usize) -> Vec<(&'static str, &'static str)> {
    CITY_REGIONS
        .iter()
        .filter(|(_, c, _)| *c == country)
        .take(limit)
        .map(|(city, _, region)| (*city, *region))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_label_match_trims_and_folds_case() {
        assert_eq!(CompanyType::from_label("esn "), Some(CompanyType::Esn));
        assert_eq!(CompanyType::from_label(" ESN"), Some(CompanyType::Esn));
        assert_eq!(CompanyType::from_label("E.S.N"), None);
        assert_eq!(CompanyType::from_label("ESN Conseil"), None);
        assert_eq!(ExperienceLevel::from_label("sénior"), Some(ExperienceLevel::Senior));
        assert_eq!(ExperienceLevel::from_label("Senior"), None);
        assert_eq!(ContractType::from_label(""), None);
    }

    #[test]
    fn serde_uses_board_labels() {
        let json = serde_json::to_string(&vec![ContractType::Cdi, ContractType::Freelance]).unwrap();
        assert_eq!(json, r#"["CDI","Freelance"]"#);
        let remote: RemoteType = serde_json::from_str(r#""100%""#).unwrap();
        assert_eq!(remote, RemoteType::Full);
    }

    #[test]
    fn fold_key_ignores_accents_and_separators() {
        assert_eq!(fold_key("Île-de-France"), "ile de france");
        assert_eq!(fold_key("ILE_DE_FRANCE"), "ile de france");
        assert_eq!(fold_key("  Provence-Alpes-Côte d'Azur "), "provence alpes cote d azur");
    }

    #[test]
    fn largest_french_cities_resolve_to_regions() {
        for (city, region) in [
            ("Paris", "Île-de-France"),
            ("Lyon", "Auvergne-Rhône-Alpes"),
            ("Marseille", "Provence-Alpes-Côte d'Azur"),
            ("Toulouse", "Occitanie"),
            ("Nice", "Provence-Alpes-Côte d'Azur"),
            ("Nantes", "Pays de la Loire"),
            ("Strasbourg", "Grand Est"),
            ("Montpellier", "Occitanie"),
            ("Bordeaux", "Nouvelle-Aquitaine"),
            ("Lille", "Hauts-de-France"),
        ] {
            let found = city_region(city).unwrap_or_else(|| panic!("{city} unresolved"));
            assert_eq!(found.country, Country::France);
            assert_eq!(found.region, region);
        }
    }

    #[test]
    fn resolve_region_prefers_canonical_then_alias_then_city() {
        let idf = resolve_region("ile de france");
        assert_eq!(idf.len(), 1);
        assert_eq!(idf[0].region, "Île-de-France");

        let paca = resolve_region("PACA");
        assert_eq!(paca[0].region, "Provence-Alpes-Côte d'Azur");

        let lausanne = resolve_region("Lausanne");
        assert_eq!(lausanne[0].country, Country::Switzerland);
        assert_eq!(lausanne[0].region, "Vaud");

        assert!(resolve_region("Atlantis").is_empty());
    }

    #[test]
    fn every_region_belongs_to_its_country() {
        for country in Country::ALL {
            for region in country.regions() {
                assert!(country.has_region(region));
            }
        }
        assert!(!Country::Belgium.has_region("Île-de-France"));
        assert_eq!(all_regions().len(), 14 + 3 + 3 + 12);
    }
}
