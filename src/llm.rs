//! Language-model collaborator.
//!
//! Defines the [`ModelProvider`] trait and its implementations:
//! - **[`DisabledProvider`]**: fails every call; used when `model.provider = "disabled"`.
//! - **[`ChatCompletionsProvider`]**: OpenRouter or OpenAI chat-completions endpoint.
//!
//! A provider performs exactly one HTTP attempt per [`ModelProvider::generate`]
//! call and reports failures as typed [`ModelError`]s. Retry and backoff live
//! in [`crate::orchestrator`], which knows which calls belong to a request.
//!
//! # Error mapping
//!
//! | Response | `ModelError` |
//! |----------|--------------|
//! | HTTP 429 | `RateLimited` (with `Retry-After` seconds when present) |
//! | HTTP 408, client timeout | `Timeout` |
//! | other HTTP 4xx | `InvalidRequest` |
//! | HTTP 5xx, connection failure | `Provider` |
//! | 2xx without `choices[0].message.content` | `InvalidResponse` |

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::ModelError;

/// System message sent ahead of every prompt.
pub const SYSTEM_PROMPT: &str = "You are an expert document analyzer specializing in resumes and professional documents. Provide detailed, accurate, and helpful analysis.";

/// Sampling parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl GenerationParams {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier, e.g. `"openrouter"`.
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn generate(&self, prompt: &str, params: &GenerationParams)
        -> Result<String, ModelError>;
}

// ============ Disabled ============

pub struct DisabledProvider;

#[async_trait]
impl ModelProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ModelError> {
        Err(ModelError::InvalidRequest(
            "model provider is disabled".to_string(),
        ))
    }
}

// ============ Chat completions ============

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Spaces requests on one API key at least `interval` apart.
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl Pacer {
    fn new(requests_per_minute: u32) -> Option<Self> {
        if requests_per_minute == 0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs(60) / requests_per_minute,
            next_slot: Mutex::new(Instant::now()),
        })
    }

    async fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

/// OpenAI-compatible `POST {endpoint}/chat/completions` client.
pub struct ChatCompletionsProvider {
    name: String,
    endpoint: String,
    model: String,
    api_key: String,
    client: Client,
    pacer: Option<Arc<Pacer>>,
}

impl std::fmt::Debug for ChatCompletionsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsProvider")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsProvider {
    /// Build a provider from config, reading the key from `api_key_env`.
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            name: config.provider.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            client,
            pacer: Pacer::new(config.requests_per_minute).map(Arc::new),
        })
    }
}

#[async_trait]
impl ModelProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.endpoint);
        match self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ModelError> {
        if prompt.trim().is_empty() {
            return Err(ModelError::InvalidRequest("empty prompt".to_string()));
        }
        if let Some(pacer) = &self.pacer {
            pacer.wait().await;
        }

        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: params.max_output_tokens,
            temperature: params.temperature,
        };

        let url = format!("{}/chat/completions", self.endpoint);
        debug!(model = %self.model, prompt_chars = prompt.len(), "model request");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
            return reply_text(parsed);
        }

        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body_text = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), retry_after_secs, &body_text))
    }
}

fn reply_text(response: ChatResponse) -> Result<String, ModelError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ModelError::InvalidResponse("response had no message content".to_string()))
}

fn map_transport_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Provider(err.to_string())
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub(crate) fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> ModelError {
    match status {
        429 => ModelError::RateLimited { retry_after_secs },
        408 => ModelError::Timeout,
        400..=499 => ModelError::InvalidRequest(format!("HTTP {}: {}", status, body)),
        _ => ModelError::Provider(format!("HTTP {}: {}", status, body)),
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

/// Create the configured provider.
///
/// `"openrouter"` and `"openai"` share the chat-completions client and
/// differ only in `endpoint` and key variable.
pub fn create_provider(config: &ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openrouter" | "openai" => Ok(Arc::new(ChatCompletionsProvider::new(config)?)),
        other => anyhow::bail!("Unknown model provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(429, Some(7), ""),
            ModelError::RateLimited {
                retry_after_secs: Some(7)
            }
        );
        assert_eq!(classify_status(408, None, ""), ModelError::Timeout);
        assert!(matches!(
            classify_status(400, None, "bad"),
            ModelError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_status(503, None, "down"),
            ModelError::Provider(_)
        ));
    }

    #[test]
    fn retry_after_seconds_only() {
        assert_eq!(parse_retry_after(" 12 "), Some(12));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn reply_requires_content() {
        let ok: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  hi  "}}]}"#).unwrap();
        assert_eq!(reply_text(ok).unwrap(), "hi");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            reply_text(empty),
            Err(ModelError::InvalidResponse(_))
        ));

        let null: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(reply_text(null).is_err());
    }

    #[test]
    fn disabled_provider_selected_by_default() {
        let provider = create_provider(&ModelConfig::default()).unwrap();
        assert_eq!(provider.name(), "disabled");
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let config = ModelConfig {
            provider: "openrouter".to_string(),
            api_key_env: "DOCINTEL_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ModelConfig::default()
        };
        let Err(err) = create_provider(&config) else {
            panic!("provider built without an API key");
        };
        assert!(err.to_string().contains("DOCINTEL_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_requests() {
        let pacer = Pacer::new(60).unwrap();
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
