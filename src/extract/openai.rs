use super::Extractor;
use crate::cache::{cache_key, ResultCache};
use crate::config::LlmConfig;
use crate::http::HttpClient;
use crate::listing::Listing;
use crate::prompt::{ChatMessage, PromptBuilder};
use crate::{Result, ScoutError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    interesting: bool,
}

/// Extractor backed by an OpenAI-compatible chat completions endpoint.
///
/// Listing images are downloaded and inlined as base64. Every answer is memoised in the
/// injected cache, keyed by the hash of the full request body.
pub struct OpenAiExtractor {
    http: Arc<HttpClient>,
    cache: Arc<dyn ResultCache>,
    config: LlmConfig,
    api_key: String,
    example_image: Option<String>,
}

impl OpenAiExtractor {
    /// Creates a new `OpenAiExtractor`.
    ///
    /// # Returns
    ///
    /// An error if no API key is configured. A configured example image that cannot be read is
    /// logged and left out of the prompt.
    pub fn new(http: Arc<HttpClient>, cache: Arc<dyn ResultCache>, config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ScoutError::LLMError("no API key configured (llm.api_key or OPENAI_API_KEY)".into()))?;

        let example_image = config.example_image.as_ref().and_then(|path| match std::fs::read(path) {
            Ok(bytes) => Some(STANDARD.encode(bytes)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Example image unreadable, prompting without it");
                None
            }
        });

        Ok(Self {
            http,
            cache,
            config,
            api_key,
            example_image,
        })
    }

    /// Downloads up to `max_images` listing images. Images that fail to download are skipped.
    async fn fetch_images(&self, listing: &Listing) -> Vec<String> {
        let downloads = listing
            .image_urls
            .iter()
            .take(self.config.max_images)
            .map(|url| async move {
                match self.http.get_bytes(url).await {
                    Ok(bytes) => Some(STANDARD.encode(bytes)),
                    Err(e) => {
                        warn!(id = %listing.id, url = %url, error = %e, "Image download failed");
                        None
                    }
                }
            });
        join_all(downloads).await.into_iter().flatten().collect()
    }

    /// Sends the conversation and parses the answer as JSON, going through the cache.
    async fn complete_json(&self, messages: Vec<ChatMessage>) -> Result<Value> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let key = cache_key(&request)?;
        if let Some(hit) = self.cache.get(&key).await {
            debug!("LLM cache hit");
            return Ok(hit);
        }

        let start = Instant::now();
        let endpoint = &self.config.endpoint;
        let response = self
            .http
            .send_with_retries(endpoint, || {
                self.http
                    .inner()
                    .post(endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            })
            .await
            .map_err(|e| match e {
                ScoutError::HttpStatus {
                    status: status @ (401 | 403),
                    url,
                } => ScoutError::AuthError(format!("{} answered {}, check llm.api_key", url, status)),
                other => other,
            })?;

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| ScoutError::LLMError(format!("unreadable response: {}", e)))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ScoutError::LLMError("No response from the model".into()))?;

        debug!(
            model = %self.config.model,
            duration_ms = start.elapsed().as_millis(),
            "LLM chat completion"
        );

        let value: Value = serde_json::from_str(&content)
            .map_err(|e| ScoutError::ExtractionError(format!("answer is not JSON ({}): {}", e, content)))?;

        self.cache.put(&key, value.clone()).await;
        Ok(value)
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    #[instrument(skip(self, listing), fields(id = %listing.id))]
    async fn extract(&self, listing: &Listing) -> Result<Value> {
        let images = self.fetch_images(listing).await;
        let messages = PromptBuilder::new(listing)
            .with_images(images)
            .with_example_image(self.example_image.clone())
            .build();

        self.complete_json(messages).await
    }

    #[instrument(skip(self, listing, criteria), fields(id = %listing.id))]
    async fn judge(&self, listing: &Listing, criteria: &str) -> Result<bool> {
        let answer = self.complete_json(PromptBuilder::judge(listing, criteria)).await?;
        let verdict: Verdict = serde_json::from_value(answer)
            .map_err(|e| ScoutError::LLMError(format!("unexpected verdict shape: {}", e)))?;
        Ok(verdict.interesting)
    }
}
