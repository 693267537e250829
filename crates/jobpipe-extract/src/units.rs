//! Durations and daily rates written the way listings write them.

use once_cell::sync::Lazy;
use regex::Regex;

/// Working days used to turn an annual salary into a daily rate.
pub const WORKING_DAYS_PER_YEAR: f64 = 220.0;

static DURATION_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d+(?:[.,]\d+)?)\s*(jours?|j|days?|semaines?|weeks?|mois|months?|ann[ée]es?|ans?|years?)\b",
    )
    .expect("duration regex")
});

static THOUSANDS_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)[\s\u{a0}\u{202f}](\d{3})\b").expect("thousands regex"));

static AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(k)?").expect("amount regex"));

static ANNUAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:/|par\s*|per\s*)\s*(?:an|ann[ée]e|year)\b|annuel|\bk\s*€|€\s*k\b|\d\s*k\b")
        .expect("annual regex")
});

/// An explicit per-day unit wins over any annual hint.
static DAILY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:/|par\s*|per\s*)\s*(?:j|jours?|day)\b|\bjournalier\b")
        .expect("daily regex")
});

fn month_override(months: i64) -> Option<i64> {
    match months {
        12 => Some(365),
        18 => Some(540),
        24 => Some(730),
        _ => None,
    }
}

fn is_month_unit(unit: &str) -> bool {
    let unit = unit.to_lowercase();
    unit.starts_with("mois") || unit.starts_with("month")
}

fn unit_days(unit: &str) -> f64 {
    let unit = unit.to_lowercase();
    if unit.starts_with('j') || unit.starts_with("day") {
        1.0
    } else if unit.starts_with("sem") || unit.starts_with("week") {
        7.0
    } else if unit.starts_with("mois") || unit.starts_with("month") {
        30.0
    } else {
        365.0
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

/// Days in a `<number> <unit>` expression. Compound expressions are summed;
/// 12, 18 and 24 months count as 365, 540 and 730 days wherever they appear.
/// A bare number with no unit is not a duration.
///
/// ```
/// use jobpipe_extract::units::parse_duration_days;
/// assert_eq!(parse_duration_days("18 mois"), Some(540));
/// assert_eq!(parse_duration_days("1 an et 6 mois"), Some(545));
/// ```
pub fn parse_duration_days(text: &str) -> Option<i64> {
    let mut total = 0.0;
    let mut found = false;
    for caps in DURATION_TERM.captures_iter(text) {
        let Some(n) = parse_number(&caps[1]) else {
            continue;
        };
        found = true;
        let overridden = is_month_unit(&caps[2])
            .then(|| caps[1].parse().ok().and_then(month_override))
            .flatten();
        match overridden {
            Some(days) => total += days as f64,
            None => total += n * unit_days(&caps[2]),
        }
    }
    found.then(|| total.round() as i64)
}

/// Daily rate range in euros. Annual amounts are spread over 220 working
/// days. Returns `(min, max)` with `min <= max`; a single amount gives
/// `(n, n)`.
pub fn parse_tjm(text: &str) -> Option<(i64, i64)> {
    let normalized = THOUSANDS_GAP.replace_all(text, "$1$2");
    let annual = ANNUAL.is_match(&normalized) && !DAILY.is_match(&normalized);

    let mut amounts: Vec<(f64, bool)> = AMOUNT
        .captures_iter(&normalized)
        .filter_map(|caps| Some((parse_number(&caps[1])?, caps.get(2).is_some())))
        .take(2)
        .collect();
    if amounts.is_empty() {
        return None;
    }

    // "37-45k" applies the thousands suffix to both ends.
    if amounts.iter().any(|(_, k)| *k) {
        for (value, k) in amounts.iter_mut() {
            if !*k && *value < 1000.0 {
                *value *= 1000.0;
                *k = true;
            }
        }
    }

    let mut values: Vec<i64> = amounts
        .into_iter()
        .map(|(value, k)| {
            let euros = if k { value * 1000.0 } else { value };
            let daily = if annual {
                euros / WORKING_DAYS_PER_YEAR
            } else {
                euros
            };
            daily.round() as i64
        })
        .collect();

    if values.len() == 1 {
        values.push(values[0]);
    }
    let (a, b) = (values[0], values[1]);
    Some(if a <= b { (a, b) } else { (b, a) })
}
