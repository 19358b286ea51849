use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for LLM operations. Failures surface as
/// `MedragError::Upstream { service: Llm, .. }`.
pub type LLMResult<T> = medrag_core::Result<T>;

/// Performance characteristics of an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCharacteristics {
    /// Maximum tokens that can be processed in a single request
    pub max_tokens: usize,
    /// Tokens reserved for the generated answer
    pub num_output: usize,
    /// Typical latency in milliseconds (for estimation)
    pub avg_latency_ms: u64,
    /// Whether the provider needs a network connection to a third party
    pub hosted: bool,
}

/// Configuration for generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Temperature for sampling (0.0 to 2.0)
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
    /// Top-p nucleus sampling parameter
    pub top_p: Option<f32>,
    /// Stop sequences
    pub stop: Option<Vec<String>>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: Some(256),
            top_p: None,
            stop: None,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Response from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Generated text content
    pub content: String,
    /// Tokens used in the prompt
    pub prompt_tokens: Option<usize>,
    /// Tokens generated in the completion
    pub completion_tokens: Option<usize>,
    /// Finish reason (e.g., "stop", "length")
    pub finish_reason: Option<String>,
    /// Model used for generation
    pub model: String,
}

/// Main trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion for a single prompt
    async fn generate(&self, prompt: &str) -> LLMResult<LLMResponse> {
        self.generate_with_config(prompt, &GenerationConfig::default())
            .await
    }

    /// Generate a completion with custom configuration
    async fn generate_with_config(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        let messages = vec![Message::user(prompt)];
        self.generate_chat(&messages, config).await
    }

    /// Generate a chat completion with message history
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse>;

    /// Check if the provider is available and ready
    async fn is_available(&self) -> bool;

    /// Get the name of this provider
    fn provider_name(&self) -> &str;

    /// Get the model identifier
    fn model_name(&self) -> &str;

    /// Get performance characteristics
    fn characteristics(&self) -> ProviderCharacteristics;

    /// Get the maximum context window size
    fn context_window(&self) -> usize {
        self.characteristics().max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = Message::system("be brief");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn default_generation_is_deterministic() {
        assert_eq!(GenerationConfig::default().temperature, 0.0);
    }

    struct Echo;

    #[async_trait]
    impl LLMProvider for Echo {
        async fn generate_chat(
            &self,
            messages: &[Message],
            config: &GenerationConfig,
        ) -> LLMResult<LLMResponse> {
            Ok(LLMResponse {
                content: format!("{}:{}", messages[0].role, messages[0].content),
                prompt_tokens: None,
                completion_tokens: config.max_tokens,
                finish_reason: None,
                model: "echo".into(),
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn provider_name(&self) -> &str {
            "echo"
        }

        fn model_name(&self) -> &str {
            "echo"
        }

        fn characteristics(&self) -> ProviderCharacteristics {
            ProviderCharacteristics {
                max_tokens: 1024,
                num_output: 128,
                avg_latency_ms: 0,
                hosted: false,
            }
        }
    }

    #[test]
    fn generate_wraps_prompt_as_user_message() {
        let response = tokio_test::block_on(Echo.generate("dose?")).unwrap();
        assert_eq!(response.content, "user:dose?");
        assert_eq!(response.completion_tokens, Some(256));
        assert_eq!(Echo.context_window(), 1024);
    }
}
