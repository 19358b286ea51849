use crate::llm_provider::*;
use async_trait::async_trait;
use medrag_core::MedragError;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4";

/// Configuration for the hosted OpenAI provider
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: SecretString,
    /// Base URL for API (default: https://api.openai.com/v1)
    pub base_url: String,
    pub model: String,
    pub context_window: usize,
    pub num_output: usize,
    pub timeout_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl OpenAIConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: OPENAI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            context_window: 8192,
            num_output: 256,
            timeout_secs: 120,
            max_retries: 0,
        }
    }
}

/// OpenAI LLM provider using the Chat Completions API
pub struct OpenAIProvider {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> LLMResult<Self> {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(MedragError::missing("llm.api_key (OPENAI_API_KEY)"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MedragError::llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Send a request with retry logic
    async fn send_request(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<ChatCompletionsResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match self.try_request(messages, config).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt < self.config.max_retries {
                        warn!(
                            "OpenAI request failed (attempt {}/{}), retrying: {}",
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MedragError::llm("All retry attempts failed")))
    }

    async fn try_request(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<ChatCompletionsResponse> {
        let request = ChatCompletionsRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            stop: config.stop.clone(),
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                MedragError::llm(format!(
                    "Failed to send request to OpenAI at {}: {}",
                    self.config.base_url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MedragError::llm(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json::<ChatCompletionsResponse>()
            .await
            .map_err(|e| MedragError::llm(format!("Failed to parse OpenAI response: {}", e)))
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        let start = Instant::now();
        let response = self.send_request(messages, config).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MedragError::llm("No choices in OpenAI response"))?;

        debug!(
            model = %self.config.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "OpenAI completion received"
        );

        Ok(LLMResponse {
            content: choice.message.content,
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
            finish_reason: choice.finish_reason,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/models", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: self.config.context_window,
            num_output: self.config.num_output,
            avg_latency_ms: 2000,
            hosted: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}
