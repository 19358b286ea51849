use crate::llm_provider::*;
use crate::ollama_provider::{OllamaConfig, OllamaProvider};
use crate::openai_llm_provider::{OpenAIConfig, OpenAIProvider};
use medrag_core::LLMConfig;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const HOSTED_CONTEXT_WINDOW: usize = 8192;
const SELF_HOSTED_CONTEXT_WINDOW: usize = 3900;

/// Which language model serves the request, fixed once at startup.
#[derive(Debug, Clone)]
pub enum LlmBackend {
    /// Third-party hosted API, selected when an API key is configured
    Hosted { api_key: SecretString, model: String },
    /// Self-hosted Ollama server
    SelfHosted { base_url: String, model: String },
}

impl LlmBackend {
    /// Hosted when a non-empty API key is present, otherwise self-hosted.
    pub fn resolve(config: &LLMConfig) -> Self {
        match config.api_key.as_ref() {
            Some(key) if !key.expose_secret().trim().is_empty() => LlmBackend::Hosted {
                api_key: key.clone(),
                model: config.hosted_model.clone(),
            },
            _ => LlmBackend::SelfHosted {
                base_url: config.base_url.clone(),
                model: config.self_hosted_model.clone(),
            },
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmBackend::Hosted { model, .. } | LlmBackend::SelfHosted { model, .. } => model,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LlmBackend::Hosted { .. } => "hosted",
            LlmBackend::SelfHosted { .. } => "self-hosted",
        }
    }
}

/// Factory for creating LLM providers based on configuration
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    pub fn create_from_config(config: &LLMConfig) -> LLMResult<Arc<dyn LLMProvider>> {
        let backend = LlmBackend::resolve(config);
        Self::create_for_backend(&backend, config)
    }

    pub fn create_for_backend(
        backend: &LlmBackend,
        config: &LLMConfig,
    ) -> LLMResult<Arc<dyn LLMProvider>> {
        info!(
            backend = backend.kind(),
            model = backend.model(),
            "Creating LLM provider"
        );

        match backend {
            LlmBackend::Hosted { api_key, model } => {
                let openai_config = OpenAIConfig {
                    api_key: api_key.clone(),
                    base_url: config.hosted_base_url.clone(),
                    model: model.clone(),
                    context_window: config.context_window.unwrap_or(HOSTED_CONTEXT_WINDOW),
                    num_output: config.num_output,
                    timeout_secs: config.timeout_secs,
                    max_retries: config.max_retries,
                };
                Ok(Arc::new(OpenAIProvider::new(openai_config)?))
            }
            LlmBackend::SelfHosted { base_url, model } => {
                let ollama_config = OllamaConfig {
                    model_name: model.clone(),
                    base_url: base_url.clone(),
                    context_window: config.context_window.unwrap_or(SELF_HOSTED_CONTEXT_WINDOW),
                    num_output: config.num_output,
                    timeout: Duration::from_secs(config.timeout_secs),
                    max_retries: config.max_retries,
                };
                Ok(Arc::new(OllamaProvider::new(ollama_config)))
            }
        }
    }

    /// Generation settings shared by every request
    pub fn generation_config(config: &LLMConfig) -> GenerationConfig {
        GenerationConfig {
            temperature: config.temperature,
            max_tokens: Some(config.num_output),
            ..Default::default()
        }
    }
}
