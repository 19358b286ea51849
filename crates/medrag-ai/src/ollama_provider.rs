//! Self-hosted LLM served by Ollama (`/api/generate`).
use crate::llm_provider::*;
use async_trait::async_trait;
use medrag_core::MedragError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub model_name: String,
    pub base_url: String,
    pub context_window: usize,
    pub num_output: usize,
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model_name: "llama3.1:70b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            context_window: 3900,
            num_output: 256,
            timeout: Duration::from_secs(120),
            max_retries: 0,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
    num_ctx: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<usize>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
}

pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Flatten a chat transcript into a single prompt plus optional system text.
    fn build_prompt(messages: &[Message]) -> (String, Option<String>) {
        let system = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let turns: Vec<&Message> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        let prompt = match turns.as_slice() {
            [only] if only.role == MessageRole::User => only.content.clone(),
            _ => turns
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n\n"),
        };

        (prompt, (!system.is_empty()).then_some(system))
    }

    async fn try_generate(&self, request: &GenerateRequest) -> LLMResult<GenerateResponse> {
        let response = timeout(
            self.config.timeout,
            self.client
                .post(format!(
                    "{}/api/generate",
                    self.config.base_url.trim_end_matches('/')
                ))
                .json(request)
                .send(),
        )
        .await
        .map_err(|_| {
            MedragError::llm(format!(
                "Ollama request timeout after {:?}",
                self.config.timeout
            ))
        })?
        .map_err(|e| MedragError::llm(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MedragError::llm(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MedragError::llm(format!("Failed to parse Ollama response: {}", e)))
    }

    /// Check if the configured model is pulled on the server
    pub async fn check_availability(&self) -> LLMResult<bool> {
        debug!(
            "Checking {} availability at {}",
            self.config.model_name, self.config.base_url
        );

        let response = timeout(
            Duration::from_secs(5),
            self.client
                .get(format!(
                    "{}/api/tags",
                    self.config.base_url.trim_end_matches('/')
                ))
                .send(),
        )
        .await
        .map_err(|_| MedragError::llm("Ollama availability check timeout"))?
        .map_err(|e| MedragError::llm(format!("Ollama availability check failed: {}", e)))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let models: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MedragError::llm(format!("Failed to parse models response: {}", e)))?;

        let has_model = models["models"]
            .as_array()
            .map(|models| {
                models.iter().any(|model| {
                    model["name"]
                        .as_str()
                        .map(|name| model_matches(name, &self.config.model_name))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);

        info!("{} availability: {}", self.config.model_name, has_model);
        Ok(has_model)
    }
}

/// A listed model satisfies the configured one when the names agree ignoring
/// case, or when the configured name is untagged and the listed one adds a tag.
fn model_matches(listed: &str, configured: &str) -> bool {
    let listed = listed.to_lowercase();
    let configured = configured.to_lowercase();
    listed == configured || listed.starts_with(&format!("{}:", configured))
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        let start_time = Instant::now();
        let (prompt, system) = Self::build_prompt(messages);

        let request = GenerateRequest {
            model: self.config.model_name.clone(),
            prompt,
            system,
            stream: false,
            options: GenerateOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens.unwrap_or(self.config.num_output),
                num_ctx: self.config.context_window,
                top_p: config.top_p,
                stop: config.stop.clone(),
            },
        };

        let mut attempt = 0;
        let response = loop {
            match self.try_generate(&request).await {
                Ok(response) => break response,
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "Ollama request failed (attempt {}/{}), retrying: {}",
                        attempt,
                        self.config.max_retries + 1,
                        e
                    );
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt - 1))).await;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            "Ollama generation completed: {}ms, context: {} tokens, completion: {} tokens",
            start_time.elapsed().as_millis(),
            response.prompt_eval_count.unwrap_or(0),
            response.eval_count.unwrap_or(0)
        );

        Ok(LLMResponse {
            content: response.response,
            prompt_tokens: response.prompt_eval_count,
            completion_tokens: response.eval_count,
            finish_reason: response.done_reason,
            model: self.config.model_name.clone(),
        })
    }

    async fn is_available(&self) -> bool {
        self.check_availability().await.unwrap_or(false)
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: self.config.context_window,
            num_output: self.config.num_output,
            avg_latency_ms: 5000,
            hosted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_user_message_is_sent_verbatim() {
        let (prompt, system) = OllamaProvider::build_prompt(&[Message::user("What is the dose?")]);
        assert_eq!(prompt, "What is the dose?");
        assert!(system.is_none());
    }

    #[test]
    fn system_messages_are_separated() {
        let (prompt, system) = OllamaProvider::build_prompt(&[
            Message::system("Answer from the leaflet only."),
            Message::user("Dose?"),
        ]);
        assert_eq!(prompt, "Dose?");
        assert_eq!(system.as_deref(), Some("Answer from the leaflet only."));
    }

    #[test]
    fn defaults_match_self_hosted_backend() {
        let config = OllamaConfig::default();
        assert_eq!(config.model_name, "llama3.1:70b");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn listed_models_match_with_or_without_tag() {
        assert!(model_matches("llama3.1:70b", "llama3.1:70b"));
        assert!(model_matches("llama3.1:latest", "llama3.1"));
        assert!(model_matches("Llama3.1:70B", "llama3.1:70b"));
        assert!(!model_matches("llama3.1:8b", "llama3.1:70b"));
        assert!(!model_matches("llama3.10:latest", "llama3.1"));
    }

    #[tokio::test]
    async fn unreachable_server_is_an_llm_error() {
        let provider = OllamaProvider::new(OllamaConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        });
        let err = provider.generate("hello").await.unwrap_err();
        assert_eq!(
            err.upstream_service(),
            Some(medrag_core::UpstreamService::Llm)
        );
    }
}
