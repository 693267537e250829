//! Job title recovered from the detail-page URL slug.

const JOB_PATH_MARKER: &str = "/job-mission/";

/// Slug words that lost their accents in the URL.
const ACCENTED: &[(&str, &str)] = &[
    ("developpeur", "Développeur"),
    ("developpeuse", "Développeuse"),
    ("ingenieur", "Ingénieur"),
    ("ingenieure", "Ingénieure"),
    ("reseau", "Réseau"),
    ("reseaux", "Réseaux"),
    ("securite", "Sécurité"),
    ("systeme", "Système"),
    ("systemes", "Systèmes"),
    ("donnees", "Données"),
    ("integrateur", "Intégrateur"),
    ("integration", "Intégration"),
    ("strategie", "Stratégie"),
    ("experimente", "Expérimenté"),
];

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn rewrite(word: &str) -> String {
    let lower = word.to_lowercase();
    if let Some((_, accented)) = ACCENTED.iter().find(|(plain, _)| *plain == lower) {
        return (*accented).to_string();
    }
    match lower.as_str() {
        "nodejs" => return "Node.js".to_string(),
        "reactjs" => return "React.js".to_string(),
        _ => {}
    }
    if let Some(stem) = lower.strip_suffix("js") {
        if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_alphanumeric()) {
            return format!("{}.js", title_case(stem));
        }
    }
    title_case(&lower)
}

/// Title for a listing URL, or `None` when the URL carries no job slug.
///
/// `.../job-mission/developpeur-fullstack-nodejs` gives
/// `Développeur Fullstack Node.js`.
pub fn title_from_url(url: &str) -> Option<String> {
    let (_, tail) = url.split_once(JOB_PATH_MARKER)?;
    let tail = tail.split(['?', '#']).next().unwrap_or_default();
    let slug = tail.trim_matches('/').split('/').next().unwrap_or_default();

    let mut words: Vec<String> = Vec::new();
    for part in slug.split('-').filter(|p| !p.is_empty()) {
        if part.eq_ignore_ascii_case("js") {
            if let Some(prev) = words.last_mut() {
                if !prev.ends_with(".js") {
                    prev.push_str(".js");
                }
                continue;
            }
        }
        words.push(rewrite(part));
    }

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_becomes_readable_title() {
        assert_eq!(
            title_from_url(
                "https://www.free-work.com/fr/tech-it/developpeur-fullstack/job-mission/developpeur-fullstack-nodejs"
            )
            .as_deref(),
            Some("Développeur Fullstack Node.js")
        );
    }

    #[test]
    fn query_fragment_and_trailing_segments_are_ignored() {
        assert_eq!(
            title_from_url("https://x.test/job-mission/ingenieur-securite-reseaux/?utm=1#top")
                .as_deref(),
            Some("Ingénieur Sécurité Réseaux")
        );
        assert_eq!(
            title_from_url("https://x.test/job-mission/data-engineer/42").as_deref(),
            Some("Data Engineer")
        );
    }

    #[test]
    fn js_suffixes_are_rewritten() {
        assert_eq!(
            title_from_url("https://x.test/job-mission/lead-vue-js-reactjs").as_deref(),
            Some("Lead Vue.js React.js")
        );
        assert_eq!(
            title_from_url("https://x.test/job-mission/developpeur-nextjs").as_deref(),
            Some("Développeur Next.js")
        );
    }

    #[test]
    fn urls_without_slug_have_no_title() {
        assert_eq!(title_from_url("https://x.test/fr/tech-it/jobs"), None);
        assert_eq!(title_from_url("https://x.test/job-mission/"), None);
    }
}
