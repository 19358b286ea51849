use async_trait::async_trait;
use medrag_core::Result;
use std::time::Duration;

/// Unified trait for embedding providers.
///
/// The provider must use the same model the external index was built with,
/// otherwise query vectors and stored vectors live in different spaces.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension for this provider
    fn embedding_dimension(&self) -> usize;

    /// Get provider name for identification
    fn provider_name(&self) -> &str;

    /// Check if provider is available (e.g., API accessible, model loaded)
    async fn is_available(&self) -> bool;

    /// Get provider-specific performance characteristics
    fn performance_characteristics(&self) -> ProviderCharacteristics;
}

/// Performance and capability characteristics of an embedding provider
#[derive(Debug, Clone)]
pub struct ProviderCharacteristics {
    pub typical_latency: Duration,
    pub max_batch_size: usize,
    pub requires_network: bool,
}
