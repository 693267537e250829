//! Extraction prompt built from the field schema and the closed vocabularies.

use std::fmt::Write as _;

use jobpipe_core::vocab::example_cities;
use jobpipe_core::{
    all_regions, model_fields, CompanyType, ContractType, Country, ExperienceLevel, JobDomain,
    RemoteType, SynonymTable, MAX_TECHNOS,
};

fn one_of(labels: &[&str]) -> String {
    format!("[{}]", labels.join(", "))
}

fn city_hints() -> String {
    Country::ALL
        .iter()
        .flat_map(|country| example_cities(*country, 4))
        .map(|(city, region)| format!("{city} -> {region}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Instruction for one model-filled field.
pub fn field_instruction(name: &str, technos: &SynonymTable) -> Option<String> {
    let text = match name {
        "COMPANY" => "Le nom exact de l'entreprise qui recrute. null si absent ou si c'est \
                      le site d'annonces lui-même (Free-Work)."
            .to_string(),
        "COMPANY_TYPE" => format!("Un parmi: {} ou null", one_of(&CompanyType::labels())),
        "CONTRACT_TYPE" => format!(
            "Liste de tous les types de contrat mentionnés, parmi: {}. [] si aucun",
            one_of(&ContractType::labels())
        ),
        "DOMAIN" => format!(
            "Analyse bien le domaine et choisis un parmi: {}",
            one_of(&JobDomain::labels())
        ),
        "XP" => format!(
            "Le niveau d'expérience, un parmi: {} sachant que Junior = <2 ans, \
             Intermédiaire = 2-5 ans, Confirmé = 5-10 ans, Sénior = >10 ans",
            one_of(&ExperienceLevel::labels())
        ),
        "REMOTE" => format!(
            "Un parmi: {} (100% = télétravail total, Hybride = partiel, Non = sur site)",
            one_of(&RemoteType::labels())
        ),
        "COUNTRY" => format!("Un parmi: {}", one_of(&Country::labels())),
        "REGION" => format!(
            "Une région parmi: {}, selon le pays. Convertis une ville en sa région ({}). \
             null si inconnue",
            one_of(&all_regions()),
            city_hints()
        ),
        "TECHNOS" => format!(
            "Liste d'au plus {MAX_TECHNOS} technologies requises, avec ces noms officiels si \
             possible: {}. Technos et outils uniquement: pas de soft-skills, pas de gestion \
             de version ni de ticketing",
            one_of(
                &technos
                    .canonical_names()
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
            )
        ),
        "DURATION_DAYS" => "La durée de la mission en jours (entier), null si le contrat est un \
                            CDI ou si aucune durée n'est indiquée. X jours = X, X semaines = \
                            X*7, X mois = X*30, X ans = X*365; 12 mois = 365, 18 mois = 540, \
                            24 mois = 730. Ne prends jamais un nombre seul sans unité"
            .to_string(),
        "TJM_MIN" => "Le taux journalier minimum en euros (entier). Pour une fourchette \
                      400-600€/jour prends 400. Un salaire annuel est divisé par 220. null \
                      pour un CDI ou si absent"
            .to_string(),
        "TJM_MAX" => "Le taux journalier maximum en euros (entier). Égal à TJM_MIN si un seul \
                      montant est donné. null pour un CDI ou si absent"
            .to_string(),
        _ => return None,
    };
    Some(text)
}

pub fn build_prompt(cleaned_html: &str, technos: &SynonymTable) -> String {
    let mut prompt = String::from(
        "Analyse cette offre d'emploi et extrais les informations suivantes. \
         Utilise exactement les valeurs proposées, sinon null.\n\n",
    );
    for field in model_fields() {
        if let Some(instruction) = field_instruction(field.name, technos) {
            let _ = writeln!(prompt, "- {}: {}", field.name, instruction);
        }
    }
    prompt.push_str("\nContenu HTML:\n");
    prompt.push_str(cleaned_html);
    prompt.push_str(
        "\n\nRéponds UNIQUEMENT avec un objet JSON valide contenant toutes les clés ci-dessus, \
         sans texte autour.",
    );
    prompt
}
