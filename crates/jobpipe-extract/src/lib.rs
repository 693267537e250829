//! LLM field extraction and post-extraction validation.

pub mod llm;
pub mod prompt;
pub mod response;
pub mod units;
pub mod validate;

use std::sync::Arc;

use jobpipe_adapters::title_from_url;
use jobpipe_core::{ExtractedFields, SynonymTable};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub use llm::{ChatCompletionsClient, CompletionModel, LlmConfig, LlmError};
pub use prompt::build_prompt;
pub use response::{coerce_fields, empty_response, parse_response, strip_code_fence};
pub use validate::Validator;

pub const CRATE_NAME: &str = "jobpipe-extract";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("model output is not json: {0}")]
    InvalidJson(String),
    #[error("model output is not a json object")]
    NotAnObject,
    #[error("field {0} missing from model output")]
    MissingField(&'static str),
    #[error("field {field} should be {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },
}

/// The canonical failure payload: every schema field set to "".
pub fn extract_empty_response() -> Map<String, Value> {
    empty_response()
}

#[derive(Clone)]
pub struct FieldExtractor {
    model: Arc<dyn CompletionModel>,
    technos: Arc<SynonymTable>,
}

impl FieldExtractor {
    pub fn new(model: Arc<dyn CompletionModel>, technos: Arc<SynonymTable>) -> Self {
        Self { model, technos }
    }

    /// Prompt the model and map its answer onto the schema. TITLE and URL
    /// come from the listing URL, not from the model.
    pub async fn try_extract(
        &self,
        cleaned_html: &str,
        url: &str,
    ) -> Result<ExtractedFields, ExtractionError> {
        let prompt = build_prompt(cleaned_html, &self.technos);
        let completion = self.model.complete(&prompt).await?;
        let object = parse_response(&completion)?;
        let mut fields = coerce_fields(&object)?;

        fields.title = title_from_url(url);
        fields.url = Some(url.to_string());
        debug!(url, "fields extracted");
        Ok(fields)
    }

    /// Total variant: any failure yields the empty record.
    pub async fn extract(&self, cleaned_html: &str, url: &str) -> ExtractedFields {
        match self.try_extract(cleaned_html, url).await {
            Ok(fields) => fields,
            Err(err) => {
                warn!(url, error = %err, "extraction failed");
                ExtractedFields::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionModel for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .map_err(|_| LlmError::Network("connection reset".into()))
        }
    }

    fn scripted_extractor(reply: Result<String, ()>) -> (FieldExtractor, Arc<Scripted>) {
        let model = Arc::new(Scripted {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let technos = Arc::new(SynonymTable::embedded().unwrap());
        (FieldExtractor::new(model.clone(), technos), model)
    }

    const URL: &str = "https://www.free-work.com/fr/tech-it/job-mission/developpeur-fullstack-nodejs";

    const REPLY: &str = r#"```json
{"COMPANY": "Acme", "COMPANY_TYPE": "ESN", "CONTRACT_TYPE": ["Freelance"],
 "DOMAIN": "Fullstack", "XP": "Confirmé", "REMOTE": "Hybride", "COUNTRY": "France",
 "REGION": "Paris", "TECHNOS": ["nodejs", "react"], "DURATION_DAYS": "12 mois",
 "TJM_MIN": 500, "TJM_MAX": null, "TITLE": "ignored"}
```"#;

    #[tokio::test]
    async fn title_and_url_come_from_the_listing_url() {
        let (extractor, model) = scripted_extractor(Ok(REPLY.to_string()));
        let fields = extractor
            .try_extract("<div class=\"cleaned-content\"><h1>x</h1></div>", URL)
            .await
            .unwrap();

        assert_eq!(fields.title.as_deref(), Some("Développeur Fullstack Node.js"));
        assert_eq!(fields.url.as_deref(), Some(URL));
        assert_eq!(fields.duration_days, Some(365));
        assert_eq!(fields.tjm_min, Some(500));
        assert_eq!(fields.tjm_max, None);
        assert!(model.prompts.lock().unwrap()[0].contains("<h1>x</h1>"));
    }

    #[tokio::test]
    async fn model_failures_fall_back_to_the_empty_record() {
        let (extractor, _) = scripted_extractor(Err(()));
        let err = extractor.try_extract("<div></div>", URL).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Llm(LlmError::Network(_))));
        assert!(extractor.extract("<div></div>", URL).await.is_empty());

        let (extractor, _) = scripted_extractor(Ok(r#"{"COMPANY": "Acme"}"#.to_string()));
        assert!(extractor.extract("<div></div>", URL).await.is_empty());
    }

    #[test]
    fn empty_response_validates_to_nothing() {
        let fields = coerce_fields(&extract_empty_response()).unwrap();
        let validator = Validator::new(Arc::new(SynonymTable::embedded().unwrap()));
        let offer = validator.validate(fields);
        assert_eq!(offer, jobpipe_core::ValidatedJobOffer::default());
    }
}
