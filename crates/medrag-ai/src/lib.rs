pub mod llm_factory;
pub mod llm_provider;
pub mod ollama_provider;
pub mod openai_llm_provider;
pub mod rag;

pub use llm_factory::{LLMProviderFactory, LlmBackend};
pub use llm_provider::*;
pub use ollama_provider::{OllamaConfig, OllamaProvider};
pub use openai_llm_provider::{OpenAIConfig, OpenAIProvider};
pub use rag::*;
