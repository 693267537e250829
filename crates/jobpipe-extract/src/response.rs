//! Model output handling: fence stripping, JSON parsing and per-field coercion
//! into [`ExtractedFields`]. Any structural problem rejects the whole record.

use jobpipe_core::{ExtractedFields, FieldKind, FieldSpec, FIELD_SCHEMA};
use serde_json::{Map, Value};

use crate::units::{parse_duration_days, parse_tjm};
use crate::ExtractionError;

/// Every schema field mapped to an empty string.
pub fn empty_response() -> Map<String, Value> {
    FIELD_SCHEMA
        .iter()
        .map(|f| (f.name.to_string(), Value::String(String::new())))
        .collect()
}

/// Drop a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the model output into an object with upper-cased keys.
pub fn parse_response(text: &str) -> Result<Map<String, Value>, ExtractionError> {
    let body = strip_code_fence(text);
    let value: Value =
        serde_json::from_str(body).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ExtractionError::NotAnObject);
    };
    Ok(object
        .into_iter()
        .map(|(k, v)| (k.trim().to_uppercase(), v))
        .collect())
}

fn is_null_marker(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "" | "null" | "none" | "n/a" | "nan" | "non spécifié" | "non precise" | "non précisé"
    )
}

fn mismatch(field: &FieldSpec, expected: &'static str) -> ExtractionError {
    ExtractionError::TypeMismatch {
        field: field.name,
        expected,
    }
}

fn coerce_text(field: &FieldSpec, value: &Value) -> Result<Option<String>, ExtractionError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if is_null_marker(s) => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(mismatch(field, "string")),
    }
}

fn coerce_list(field: &FieldSpec, value: &Value) -> Result<Vec<String>, ExtractionError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|item| !is_null_marker(item))
            .map(str::to_string)
            .collect()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => {}
                    Value::String(s) if is_null_marker(s) => {}
                    Value::String(s) => out.push(s.trim().to_string()),
                    Value::Number(n) => out.push(n.to_string()),
                    _ => return Err(mismatch(field, "list of strings")),
                }
            }
            Ok(out)
        }
        _ => Err(mismatch(field, "list of strings")),
    }
}

fn number_to_i64(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))
}

fn coerce_integer(field: &FieldSpec, value: &Value) -> Result<Option<i64>, ExtractionError> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => return Ok(number_to_i64(n)),
        Value::String(s) if is_null_marker(s) => return Ok(None),
        Value::String(s) => s.trim(),
        _ => return Err(mismatch(field, "integer")),
    };

    if let Ok(n) = text.parse::<i64>() {
        return Ok(Some(n));
    }
    let parsed = match field.name {
        "DURATION_DAYS" => parse_duration_days(text),
        "TJM_MIN" => parse_tjm(text).map(|(min, _)| min),
        "TJM_MAX" => parse_tjm(text).map(|(_, max)| max),
        _ => text.parse::<f64>().ok().map(|f| f.round() as i64),
    };
    Ok(parsed)
}

/// Map the parsed object onto the typed record. Every model field must be
/// present; locally filled fields are optional.
pub fn coerce_fields(object: &Map<String, Value>) -> Result<ExtractedFields, ExtractionError> {
    let mut fields = ExtractedFields::default();

    for spec in FIELD_SCHEMA {
        let value = match object.get(spec.name) {
            Some(value) => value,
            None if spec.from_url => continue,
            None => return Err(ExtractionError::MissingField(spec.name)),
        };

        match spec.kind {
            FieldKind::Text | FieldKind::Enum => {
                let text = coerce_text(spec, value)?;
                match spec.name {
                    "TITLE" => fields.title = text,
                    "COMPANY" => fields.company = text,
                    "COMPANY_TYPE" => fields.company_type = text,
                    "DOMAIN" => fields.domain = text,
                    "XP" => fields.xp = text,
                    "REMOTE" => fields.remote = text,
                    "COUNTRY" => fields.country = text,
                    "REGION" => fields.region = text,
                    "URL" => fields.url = text,
                    _ => {}
                }
            }
            FieldKind::TextList | FieldKind::EnumList => {
                let list = coerce_list(spec, value)?;
                match spec.name {
                    "CONTRACT_TYPE" => fields.contract_type = list,
                    "TECHNOS" => fields.technos = list,
                    _ => {}
                }
            }
            FieldKind::Integer => {
                let n = coerce_integer(spec, value)?;
                match spec.name {
                    "DURATION_DAYS" => fields.duration_days = n,
                    "TJM_MIN" => fields.tjm_min = n,
                    "TJM_MAX" => fields.tjm_max = n,
                    _ => {}
                }
            }
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_object() -> Value {
        json!({
            "COMPANY": "Acme",
            "COMPANY_TYPE": "ESN",
            "CONTRACT_TYPE": "Freelance",
            "DOMAIN": "Backend",
            "XP": "Confirmé",
            "remote": "Hybride",
            "COUNTRY": "France",
            "REGION": "Lyon",
            "TECHNOS": ["Rust", "postgres", null],
            "DURATION_DAYS": "6 mois",
            "TJM_MIN": "400-600€/jour",
            "TJM_MAX": "400-600€/jour"
        })
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn keys_are_upper_cased_and_values_coerced() {
        let text = format!("```json\n{}\n```", complete_object());
        let object = parse_response(&text).unwrap();
        let fields = coerce_fields(&object).unwrap();

        assert_eq!(fields.company.as_deref(), Some("Acme"));
        assert_eq!(fields.remote.as_deref(), Some("Hybride"));
        assert_eq!(fields.contract_type, vec!["Freelance"]);
        assert_eq!(fields.technos, vec!["Rust", "postgres"]);
        assert_eq!(fields.region.as_deref(), Some("Lyon"));
        assert_eq!(fields.duration_days, Some(180));
        assert_eq!(fields.tjm_min, Some(400));
        assert_eq!(fields.tjm_max, Some(600));
        assert_eq!(fields.title, None);
    }

    #[test]
    fn integers_accept_numbers_and_numeric_strings() {
        let mut object = complete_object();
        object["DURATION_DAYS"] = json!(90);
        object["TJM_MIN"] = json!("550");
        object["TJM_MAX"] = json!(612.4);
        let fields = coerce_fields(&parse_response(&object.to_string()).unwrap()).unwrap();
        assert_eq!(fields.duration_days, Some(90));
        assert_eq!(fields.tjm_min, Some(550));
        assert_eq!(fields.tjm_max, Some(612));
    }

    #[test]
    fn null_markers_become_none() {
        let mut object = complete_object();
        object["COMPANY"] = json!("null");
        object["REGION"] = Value::Null;
        object["CONTRACT_TYPE"] = json!("");
        object["DURATION_DAYS"] = json!("None");
        let fields = coerce_fields(&parse_response(&object.to_string()).unwrap()).unwrap();
        assert_eq!(fields.company, None);
        assert_eq!(fields.region, None);
        assert!(fields.contract_type.is_empty());
        assert_eq!(fields.duration_days, None);
    }

    #[test]
    fn missing_model_field_rejects_the_record() {
        let mut object = complete_object();
        object.as_object_mut().unwrap().remove("XP");
        let err = coerce_fields(&parse_response(&object.to_string()).unwrap()).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField("XP")));
    }

    #[test]
    fn structured_values_in_scalar_slots_are_mismatches() {
        let mut object = complete_object();
        object["COMPANY"] = json!({"name": "Acme"});
        let err = coerce_fields(&parse_response(&object.to_string()).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::TypeMismatch {
                field: "COMPANY",
                ..
            }
        ));
    }

    #[test]
    fn non_json_and_non_object_are_rejected() {
        assert!(matches!(
            parse_response("Voici les informations: ..."),
            Err(ExtractionError::InvalidJson(_))
        ));
        assert!(matches!(parse_response("[1, 2]"), Err(ExtractionError::NotAnObject)));
    }

    #[test]
    fn empty_response_coerces_to_empty_record() {
        let empty = empty_response();
        assert_eq!(empty.len(), FIELD_SCHEMA.len());
        assert!(empty.values().all(|v| v.as_str() == Some("")));
        assert!(coerce_fields(&empty).unwrap().is_empty());
    }
}
