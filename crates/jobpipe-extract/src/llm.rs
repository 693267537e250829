//! OpenAI-compatible chat-completions client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobpipe_storage::SimpleTokenBucket;
use reqwest::header;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing API key or an unusable client setting.
    #[error("configuration error: {0}")]
    Config(String),
    /// Connection failure or timeout.
    #[error("network error: {0}")]
    Network(String),
    /// Non-2xx response.
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    /// Body is not a chat completion or carries no content.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Anything that turns one prompt into one completion text.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 1000,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct ChatCompletionsClient {
    http_client: reqwest::Client,
    config: LlmConfig,
    limiter: Option<Arc<SimpleTokenBucket>>,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::Config("LLM api key not set".into()));
        }
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self {
            http_client,
            config,
            limiter: None,
        })
    }

    /// Share a token bucket with other callers of the same provider.
    pub fn with_limiter(mut self, limiter: Arc<SimpleTokenBucket>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<String, LlmError> {
        if let Some(limiter) = &self.limiter {
            limiter.take().await;
        }
        let start = Instant::now();

        let response = self
            .http_client
            .post(self.endpoint())
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "chat completion request failed");
                LlmError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "chat completion api error");
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let raw: ChatResponseRaw =
            serde_json::from_str(&text).map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".into()))?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "chat completion"
        );
        Ok(content)
    }
}

#[async_trait]
impl CompletionModel for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![Message::user(prompt)],
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
        };
        self.chat_completion(&request).await
    }
}
