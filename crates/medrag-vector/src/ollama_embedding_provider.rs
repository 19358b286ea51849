//! Embedding provider backed by an Ollama server's `/api/embed` endpoint.
use async_trait::async_trait;
use medrag_core::{MedragError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::VectorError;
use crate::providers::{EmbeddingProvider, ProviderCharacteristics};

/// Configuration for Ollama embedding provider
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    pub model_name: String,
    pub base_url: String,
    pub dimension: usize,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 768,
            timeout: Duration::from_secs(60),
            batch_size: 32,
        }
    }
}

impl From<&medrag_core::EmbeddingConfig> for OllamaEmbeddingConfig {
    fn from(config: &medrag_core::EmbeddingConfig) -> Self {
        Self {
            model_name: config.model.clone(),
            base_url: config.base_url.clone(),
            dimension: config.dimension,
            timeout: Duration::from_secs(config.timeout_secs),
            batch_size: config.batch_size.clamp(1, 256),
        }
    }
}

/// Ollama API request for embeddings
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<bool>,
}

/// Ollama API response for embeddings
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbeddingProvider {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: OllamaEmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &OllamaEmbeddingConfig {
        &self.config
    }

    /// Check that the configured model is pulled on the server
    pub async fn check_availability(&self) -> Result<bool> {
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
        .map_err(|_| MedragError::embedding("Ollama availability check timeout"))?
        .map_err(|e| MedragError::embedding(format!("Ollama availability check failed: {}", e)))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let models: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MedragError::embedding(format!("Failed to parse models response: {}", e)))?;

        let desired = self.config.model_name.to_lowercase();
        let has_model = models["models"]
            .as_array()
            .map(|models| {
                models.iter().any(|model| {
                    model["name"]
                        .as_str()
                        .map(|name| {
                            let lower = name.to_lowercase();
                            lower == desired || lower.starts_with(&format!("{}:", desired))
                        })
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);

        info!("{} availability: {}", self.config.model_name, has_model);
        Ok(has_model)
    }

    async fn call_embed_endpoint(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OllamaEmbeddingRequest {
            model: &self.config.model_name,
            input: texts,
            truncate: Some(true),
        };

        let request_start = Instant::now();

        let response = timeout(
            self.config.timeout,
            self.client
                .post(format!(
                    "{}/api/embed",
                    self.config.base_url.trim_end_matches('/')
                ))
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| {
            VectorError::Embedding(format!(
                "Ollama embedding timeout after {:?}",
                self.config.timeout
            ))
        })?
        .map_err(|e| VectorError::Embedding(format!("Ollama embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VectorError::Embedding(format!(
                "Ollama embedding API error {}: {}",
                status, error_text
            ))
            .into());
        }

        let response_data: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            VectorError::Embedding(format!("Failed to parse Ollama embedding response: {}", e))
        })?;

        if response_data.embeddings.len() != texts.len() {
            return Err(VectorError::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                response_data.embeddings.len(),
                texts.len()
            ))
            .into());
        }

        for embedding in &response_data.embeddings {
            if embedding.len() != self.config.dimension {
                warn!(
                    expected = self.config.dimension,
                    actual = embedding.len(),
                    model = %self.config.model_name,
                    "Ollama embedding dimension mismatch"
                );
            }
        }

        debug!(
            "Ollama embed batch: {} texts in {}ms",
            texts.len(),
            request_start.elapsed().as_millis()
        );

        Ok(response_data.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let payload = vec![text.to_string()];
        let mut embeddings = self.call_embed_endpoint(&payload).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorError::Embedding("Ollama returned no embedding".into()).into())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(self.config.batch_size.max(1)).enumerate() {
            trace!(
                "Sending Ollama embed batch {} ({} items)",
                batch_idx + 1,
                batch.len()
            );
            all_embeddings.extend(self.call_embed_endpoint(batch).await?);
        }

        Ok(all_embeddings)
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        &self.config.model_name
    }

    async fn is_available(&self) -> bool {
        self.check_availability().await.unwrap_or(false)
    }

    fn performance_characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            typical_latency: Duration::from_millis(200),
            max_batch_size: self.config.batch_size,
            requires_network: true,
        }
    }
}
